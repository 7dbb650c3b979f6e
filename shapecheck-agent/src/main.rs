//! Shapecheck - hardware health checks for HPC compute nodes
//!
//! Compares what a node's shape declares against what the host reports:
//! - GPUs, NVLinks and driver state through `nvidia-smi`
//! - RDMA NICs, links and counters through the Mellanox tooling
//! - PCIe links and the kernel log
//!
//! Every check runs once; the report goes to stdout, logs to stderr.

mod config;
mod discovery;
mod execution;
mod recommend;
mod report;
mod session;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AgentConfig, LIMITS_FILE, SHAPES_FILE};
use discovery::HostInfo;
use execution::CommandExecutor;
use recommend::{recommend, RecommendationTable};
use report::{OutputFormat, Report};
use session::Session;
use shapecheck_engine::{CheckKind, FallbackPolicy, ShapesDocument, TestLimits};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn, Level};

/// Exit code for configuration and document errors
const EXIT_CONFIG_ERROR: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "shapecheck")]
#[command(about = "Check a compute node's hardware against its shape")]
#[command(version)]
struct Cli {
    /// Agent configuration file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the checks enabled for a shape
    Run {
        /// Shape name, e.g. BM.GPU.H100.8
        #[arg(short, long)]
        shape: String,

        /// Only run these checks (repeatable)
        #[arg(short = 'c', long = "check", value_name = "NAME")]
        checks: Vec<String>,

        /// Shapes document
        #[arg(long, value_name = "FILE")]
        shapes: Option<PathBuf>,

        /// Test limits document
        #[arg(long, value_name = "FILE")]
        limits: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Use built-in tables for checks enabled without a threshold
        #[arg(long)]
        builtin_defaults: bool,

        /// Timeout for each utility in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Run privileged utilities through `sudo -n`
        #[arg(long)]
        sudo: bool,

        /// Append recommendations for failing checks
        #[arg(long)]
        recommend: bool,

        /// Recommendation table (JSON or TOML)
        #[arg(long, value_name = "FILE")]
        recommendations: Option<PathBuf>,
    },

    /// Recommendations for a report saved with `--format json`
    Recommend {
        /// Saved report
        #[arg(long, value_name = "FILE")]
        report: PathBuf,

        /// Recommendation table (JSON or TOML)
        #[arg(long, value_name = "FILE")]
        recommendations: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// List the known checks
    #[command(name = "list-checks")]
    ListChecks,

    /// Print the declared topology of a shape
    #[command(name = "show-shape")]
    ShowShape {
        #[arg(short, long)]
        shape: String,

        /// Shapes document
        #[arg(long, value_name = "FILE")]
        shapes: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout is reserved for the report
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_CONFIG_ERROR
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::ListChecks => {
            for kind in CheckKind::ALL {
                println!("{:<34} {}", kind.name(), kind.description());
            }
            Ok(0)
        }

        Commands::ShowShape { shape, shapes } => {
            let config = load_config(cli.config.as_deref()).await?;
            let path = config::locate(shapes.as_deref(), config.shapes_path.as_deref(), SHAPES_FILE)?;
            let document = load_shapes(&path).await?;
            let topology = document.topology(&shape)?;
            println!("{}", serde_json::to_string_pretty(&topology)?);
            Ok(0)
        }

        Commands::Run {
            shape,
            checks,
            shapes,
            limits,
            format,
            builtin_defaults,
            timeout,
            sudo,
            recommend: with_recommendations,
            recommendations,
        } => {
            let config = load_config(cli.config.as_deref()).await?;
            let shapes_path = config::locate(shapes.as_deref(), config.shapes_path.as_deref(), SHAPES_FILE)?;
            let limits_path = config::locate(limits.as_deref(), config.limits_path.as_deref(), LIMITS_FILE)?;

            let topology = load_shapes(&shapes_path).await?.topology(&shape)?;
            let limits = load_limits(&limits_path).await?;
            let policy = if builtin_defaults || config.builtin_defaults {
                FallbackPolicy::BuiltIn
            } else {
                FallbackPolicy::Strict
            };
            info!(
                "Checking {} ({} GPUs, {} RDMA NICs declared), {:?} thresholds",
                shape,
                topology.gpus.len(),
                topology.rdma_nics.len(),
                policy
            );

            let session = Session::new(topology, limits, policy);
            let selection = session.select(&checks)?;
            if selection.checks.is_empty() && selection.unknown.is_empty() {
                warn!("No enabled checks for {}", shape);
            }

            let executor = CommandExecutor::new(timeout.unwrap_or(config.timeout_secs), sudo || config.use_sudo);
            let outcomes = session.run(&executor, &selection).await;

            let host = HostInfo::discover().context("Failed to identify host")?;
            debug!("Interfaces up: {}", host.interface_names().join(", "));
            let mut report = Report::new(host, &shape, outcomes);
            if with_recommendations || config.recommend {
                let path = recommendations.as_deref().or(config.recommendations_path.as_deref());
                let table = RecommendationTable::load(path).await?;
                let recommendations = recommend(&table, &report.outcomes);
                report = report.with_recommendations(recommendations);
            }
            println!("{}", report.render(format)?);

            let code = report.exit_code();
            debug!("Exiting with {}", code);
            Ok(code)
        }

        Commands::Recommend {
            report,
            recommendations,
            format,
        } => {
            let config = load_config(cli.config.as_deref()).await?;
            let text = tokio::fs::read_to_string(&report)
                .await
                .with_context(|| format!("Failed to read report {}", report.display()))?;
            let saved = Report::from_json(&text).with_context(|| format!("Invalid report {}", report.display()))?;
            info!("Recommendations for {} on {} (run {})", saved.shape, saved.host.hostname, saved.run_id);

            let path = recommendations.as_deref().or(config.recommendations_path.as_deref());
            let table = RecommendationTable::load(path).await?;
            println!("{}", recommend(&table, &saved.outcomes).render(format)?);
            Ok(0)
        }
    }
}

async fn load_config(explicit: Option<&Path>) -> Result<AgentConfig> {
    match explicit {
        Some(path) => AgentConfig::load_from(path).await,
        None => AgentConfig::load().await,
    }
}

async fn load_shapes(path: &Path) -> Result<ShapesDocument> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read shapes document {}", path.display()))?;
    ShapesDocument::from_json(&text).with_context(|| format!("Invalid shapes document {}", path.display()))
}

async fn load_limits(path: &Path) -> Result<TestLimits> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read test limits {}", path.display()))?;
    TestLimits::from_json(&text).with_context(|| format!("Invalid test limits {}", path.display()))
}
