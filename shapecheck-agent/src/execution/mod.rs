//! Probe execution
//!
//! Handles running the host utilities checks depend on:
//! - Shell execution with a per-command timeout
//! - Optional `sudo` for utilities that need root
//! - Concurrent collection, re-planned until every check has its inputs

use anyhow::{anyhow, Context, Result};
use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use shapecheck_engine::checks::{plan_all, CheckContext, CheckKind, Probe, ProbeOutput, ProbeOutputs};
use shapecheck_engine::{FallbackPolicy, ShapeTopology};
use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

/// Probes may depend on the output of earlier ones; this bounds the chain
pub const MAX_ROUNDS: usize = 3;

/// Something that can turn a probe into captured output
pub trait ProbeRunner: Sync {
    fn run<'a>(&'a self, probe: &'a Probe) -> BoxFuture<'a, ProbeOutput>;
}

/// Result of one shell command
#[derive(Debug)]
pub struct ExecutionResult {
    pub output: String,
    pub exit_code: i32,
    pub execution_time_ms: u128,
}

/// Runs probes through `bash -c`
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    timeout: Duration,
    use_sudo: bool,
}

impl CommandExecutor {
    pub fn new(timeout_secs: u64, use_sudo: bool) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            use_sudo,
        }
    }

    /// Shell command line for a probe
    pub fn command_line(&self, probe: &Probe) -> String {
        let command = shell_words::join(probe.argv());
        if self.use_sudo && probe.needs_root() {
            format!("sudo -n {}", command)
        } else {
            command
        }
    }

    /// Execute a shell command with the configured timeout. A non-zero exit
    /// status is not an error; the output is still returned.
    pub async fn execute_shell_command(&self, command: &str) -> Result<ExecutionResult> {
        let start_time = Instant::now();
        debug!("Executing shell command: {} (timeout: {:?})", command, self.timeout);

        let output = tokio::time::timeout(
            self.timeout,
            AsyncCommand::new("bash")
                .arg("-c")
                .arg(command)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow!("timed out after {}s", self.timeout.as_secs()))?
        .context("Failed to execute command")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("{} wrote to stderr: {}", command, stderr.trim());
        }

        // some utilities report their errors on stderr only
        let text = if stdout.trim().is_empty() { stderr } else { stdout };

        Ok(ExecutionResult {
            output: text.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}

impl ProbeRunner for CommandExecutor {
    fn run<'a>(&'a self, probe: &'a Probe) -> BoxFuture<'a, ProbeOutput> {
        Box::pin(async move {
            let command = self.command_line(probe);
            match self.execute_shell_command(&command).await {
                Ok(result) => {
                    debug!(
                        "{} exited with {} after {}ms",
                        command, result.exit_code, result.execution_time_ms
                    );
                    ProbeOutput::Captured(result.output)
                }
                Err(e) => {
                    warn!("{} failed: {:#}", command, e);
                    ProbeOutput::Failed(format!("{:#}", e))
                }
            }
        })
    }
}

/// A check selected to run, with its threshold from the limits document
#[derive(Debug, Clone, Copy)]
pub struct PlannedCheck<'a> {
    pub kind: CheckKind,
    pub threshold: Option<&'a Value>,
}

/// Run every probe the checks need, concurrently, re-planning after each
/// round until nothing is missing.
pub async fn collect_probes<R: ProbeRunner>(
    runner: &R,
    checks: &[PlannedCheck<'_>],
    topology: &ShapeTopology,
    policy: FallbackPolicy,
) -> ProbeOutputs {
    let mut outputs = ProbeOutputs::new();

    for round in 1..=MAX_ROUNDS {
        let pending: BTreeSet<Probe> = checks
            .iter()
            .flat_map(|check| {
                let ctx = CheckContext::new(topology, &outputs)
                    .with_threshold(check.threshold)
                    .with_policy(policy);
                plan_all(&[check.kind], &ctx)
            })
            .collect();

        if pending.is_empty() {
            break;
        }
        info!("Probe round {}: running {} utilities", round, pending.len());

        let results = join_all(pending.iter().map(|probe| runner.run(probe))).await;
        for (probe, output) in pending.into_iter().zip(results) {
            outputs.insert(probe, output);
        }
    }

    outputs
}
