//! Operator recommendations for failing checks
//!
//! A recommendation table maps each check to what to tell the operator
//! when it fails, warns or passes: severity, optional fault code, issue,
//! suggestion and commands to run. Templates may refer to the outcome:
//! - `{check}`, `{reason}`, `{unexpected}`
//! - `{devices}` / `{interfaces}`: the failing devices, comma separated
//! - `{device}` / `{interface}` in a command: one command per failing one
//!
//! The table is a JSON or TOML document. The built-in one is used when
//! no document is configured or found.

use crate::config;
use crate::report::OutputFormat;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shapecheck_engine::{CheckOutcome, Verdict};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info, warn};

pub const RECOMMENDATIONS_FILE: &str = "recommendations.json";

const BUILTIN_TABLE: &str = include_str!("recommendations.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

/// One entry of the table, before substitution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "type")]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_code: Option<String>,
    pub issue: String,
    pub suggestion: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

/// Templates of one check. WARN uses `warn`, else `fail`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckTemplates {
    #[serde(default)]
    pub fail: Option<Template>,
    #[serde(default)]
    pub warn: Option<Template>,
    #[serde(default)]
    pub pass: Option<Template>,
}

impl CheckTemplates {
    fn for_verdict(&self, verdict: Verdict) -> Option<&Template> {
        match verdict {
            Verdict::Fail => self.fail.as_ref(),
            Verdict::Warn => self.warn.as_ref().or(self.fail.as_ref()),
            Verdict::Pass => self.pass.as_ref(),
            Verdict::Skip => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationTable {
    #[serde(default)]
    pub recommendations: BTreeMap<String, CheckTemplates>,
    /// `no_issues` and `has_issues`, the latter with `{total_issues}`,
    /// `{critical_count}` and `{warning_count}`
    #[serde(default)]
    pub summary_templates: BTreeMap<String, String>,
}

impl RecommendationTable {
    pub fn builtin() -> Self {
        match serde_json::from_str(BUILTIN_TABLE) {
            Ok(table) => table,
            Err(e) => {
                warn!("Built-in recommendation table is invalid: {}", e);
                Self::default()
            }
        }
    }

    /// TOML when the file name ends in `.toml`, JSON otherwise
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(text).with_context(|| format!("Invalid recommendations {}", path.display()))
        } else {
            serde_json::from_str(text).with_context(|| format!("Invalid recommendations {}", path.display()))
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read recommendations {}", path.display()))?;
        let table = Self::parse(&text, path)?;
        info!("Loaded {} recommendations from {}", table.recommendations.len(), path.display());
        Ok(table)
    }

    /// A given path must load. Otherwise the search paths are tried, and a
    /// table that is missing or broken gives way to the built-in one.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path).await;
        }

        match config::locate(None, None, RECOMMENDATIONS_FILE) {
            Ok(path) => match Self::load_from(&path).await {
                Ok(table) => Ok(table),
                Err(e) => {
                    warn!("{:#}, using built-in recommendations", e);
                    Ok(Self::builtin())
                }
            },
            Err(e) => {
                debug!("{}, using built-in recommendations", e);
                Ok(Self::builtin())
            }
        }
    }

    fn summary(&self, total: usize, critical: usize, warning: usize) -> String {
        if total == 0 {
            return self
                .summary_templates
                .get("no_issues")
                .cloned()
                .unwrap_or_else(|| "All checks passed, no action needed".to_string());
        }
        match self.summary_templates.get("has_issues") {
            Some(template) => template
                .replace("{total_issues}", &total.to_string())
                .replace("{critical_count}", &critical.to_string())
                .replace("{warning_count}", &warning.to_string()),
            None => format!(
                "Found {} issue(s) requiring attention: {} critical, {} warning",
                total, critical, warning
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub severity: Severity,
    pub check: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_code: Option<String>,
    pub issue: String,
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub summary: String,
    pub total_issues: usize,
    pub critical_issues: usize,
    pub warning_issues: usize,
    pub info_issues: usize,
    pub recommendations: Vec<Recommendation>,
    pub generated_at: DateTime<Utc>,
}

/// Template variables of one outcome
struct Variables<'a> {
    outcome: &'a CheckOutcome,
    labels: Vec<&'a str>,
    /// `mlx5_1` out of `mlx5_1 (rdma1)`
    devices: Vec<&'a str>,
    /// `rdma1` out of `mlx5_1 (rdma1)`
    interfaces: Vec<&'a str>,
}

impl<'a> Variables<'a> {
    fn of(outcome: &'a CheckOutcome) -> Self {
        let labels = outcome.failing_devices();
        let devices = labels
            .iter()
            .copied()
            .filter_map(|label| label.split_whitespace().next())
            .collect();
        let interfaces = labels.iter().copied().filter_map(interface_of).collect();
        Self {
            outcome,
            labels,
            devices,
            interfaces,
        }
    }

    fn substitute(&self, template: &str) -> String {
        template
            .replace("{check}", &self.outcome.check)
            .replace("{reason}", &self.outcome.reason)
            .replace("{devices}", &self.labels.join(", "))
            .replace("{interfaces}", &self.interfaces.join(", "))
            .replace("{unexpected}", &self.outcome.unexpected.join(", "))
    }

    /// A command naming `{interface}` or `{device}` is repeated per failing
    /// one, and dropped when there is none
    fn commands(&self, commands: &[String]) -> Vec<String> {
        let mut expanded = Vec::new();
        for command in commands {
            let per_item = if command.contains("{interface}") {
                Some(("{interface}", &self.interfaces))
            } else if command.contains("{device}") {
                Some(("{device}", &self.devices))
            } else {
                None
            };

            match per_item {
                Some((placeholder, items)) => {
                    for item in items {
                        expanded.push(self.substitute(&command.replace(placeholder, item)));
                    }
                }
                None => expanded.push(self.substitute(command)),
            }
        }
        expanded
    }
}

fn interface_of(label: &str) -> Option<&str> {
    let (_, rest) = label.split_once('(')?;
    rest.strip_suffix(')').map(str::trim)
}

/// Recommendations for the outcomes of one run, in outcome order.
/// Configuration errors and skipped checks get none.
pub fn recommend(table: &RecommendationTable, outcomes: &[CheckOutcome]) -> Recommendations {
    let mut recommendations = Vec::new();

    for outcome in outcomes {
        if outcome.config_error {
            continue;
        }
        let template = table
            .recommendations
            .get(&outcome.check)
            .and_then(|templates| templates.for_verdict(outcome.verdict));
        let Some(template) = template else {
            if matches!(outcome.verdict, Verdict::Fail | Verdict::Warn) {
                debug!("No recommendation for {} {}", outcome.check, outcome.verdict);
            }
            continue;
        };

        let variables = Variables::of(outcome);
        recommendations.push(Recommendation {
            severity: template.severity,
            check: outcome.check.clone(),
            fault_code: template.fault_code.clone(),
            issue: variables.substitute(&template.issue),
            suggestion: variables.substitute(&template.suggestion),
            commands: variables.commands(&template.commands),
            references: template.references.clone(),
        });
    }

    let count = |severity: Severity| recommendations.iter().filter(|r| r.severity == severity).count();
    let (critical, warning, info) = (count(Severity::Critical), count(Severity::Warning), count(Severity::Info));
    let total = critical + warning;

    Recommendations {
        summary: table.summary(total, critical, warning),
        total_issues: total,
        critical_issues: critical,
        warning_issues: warning,
        info_issues: info,
        recommendations,
        generated_at: Utc::now(),
    }
}

impl Recommendations {
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Recommendations: {}", self.summary);

        for (i, rec) in self.recommendations.iter().enumerate() {
            match &rec.fault_code {
                Some(code) => {
                    let _ = writeln!(out, "  {}. [{}] {} ({})", i + 1, rec.severity.label(), rec.check, code);
                }
                None => {
                    let _ = writeln!(out, "  {}. [{}] {}", i + 1, rec.severity.label(), rec.check);
                }
            }
            let _ = writeln!(out, "     Issue: {}", rec.issue);
            let _ = writeln!(out, "     Suggestion: {}", rec.suggestion);
            for command in &rec.commands {
                let _ = writeln!(out, "     $ {}", command);
            }
            for reference in &rec.references {
                let _ = writeln!(out, "     See: {}", reference);
            }
        }
        out
    }

    pub fn render(&self, format: OutputFormat) -> serde_json::Result<String> {
        match format {
            OutputFormat::Json => serde_json::to_string_pretty(self),
            OutputFormat::Table => Ok(self.to_table()),
        }
    }
}
