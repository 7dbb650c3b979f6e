//! Report assembly and exit code
//!
//! One report per run: host identity, the shape checked, every check
//! outcome and the verdict counts, optionally followed by recommendations.
//! Printed as pretty JSON or as a table.

use crate::discovery::HostInfo;
use crate::recommend::Recommendations;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use shapecheck_engine::{CheckOutcome, Verdict};
use std::fmt::Write as _;
use uuid::Uuid;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per check, failing devices indented below
    #[default]
    Table,
    /// Full report as pretty-printed JSON
    Json,
}

/// Verdict counts over all outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub config_errors: usize,
}

impl Summary {
    fn of(outcomes: &[CheckOutcome]) -> Self {
        let mut summary = Summary::default();
        for outcome in outcomes {
            match outcome.verdict {
                Verdict::Pass => summary.passed += 1,
                Verdict::Warn => summary.warned += 1,
                Verdict::Fail => summary.failed += 1,
                Verdict::Skip => summary.skipped += 1,
            }
            if outcome.config_error {
                summary.config_errors += 1;
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub host: HostInfo,
    pub shape: String,
    pub summary: Summary,
    pub outcomes: Vec<CheckOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Recommendations>,
}

impl Report {
    pub fn new(host: HostInfo, shape: &str, outcomes: Vec<CheckOutcome>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            host,
            shape: shape.to_string(),
            summary: Summary::of(&outcomes),
            outcomes,
            recommendations: None,
        }
    }

    /// A report saved with `--format json`
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn with_recommendations(mut self, recommendations: Recommendations) -> Self {
        self.recommendations = Some(recommendations);
        self
    }

    /// 2 on any configuration error, 1 on any FAIL, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.summary.config_errors > 0 {
            2
        } else if self.summary.failed > 0 {
            1
        } else {
            0
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_table(&self) -> String {
        let width = self
            .outcomes
            .iter()
            .map(|o| o.check.len())
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} on {} ({}, run {})",
            self.shape,
            self.host.hostname,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.run_id
        );

        for outcome in &self.outcomes {
            if outcome.reason.is_empty() {
                let _ = writeln!(out, "  {:<width$}  {}", outcome.check, outcome.verdict, width = width);
            } else {
                let _ = writeln!(
                    out,
                    "  {:<width$}  {}  {}",
                    outcome.check,
                    outcome.verdict,
                    outcome.reason,
                    width = width
                );
            }
            for device in outcome
                .devices
                .iter()
                .filter(|d| d.verdict != Verdict::Pass && d.verdict != Verdict::Skip)
            {
                let _ = writeln!(out, "      {}: {} {}", device.device, device.verdict, device.reason);
            }
            for unexpected in &outcome.unexpected {
                let _ = writeln!(out, "      not declared: {}", unexpected);
            }
        }

        let s = &self.summary;
        let _ = writeln!(
            out,
            "{} passed, {} warned, {} failed, {} skipped, {} configuration errors",
            s.passed, s.warned, s.failed, s.skipped, s.config_errors
        );

        if let Some(recommendations) = &self.recommendations {
            out.push('\n');
            out.push_str(&recommendations.to_table());
        }
        out
    }

    pub fn render(&self, format: OutputFormat) -> serde_json::Result<String> {
        match format {
            OutputFormat::Json => self.to_json(),
            OutputFormat::Table => Ok(self.to_table()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::NetworkInterface;
    use crate::recommend::{recommend, RecommendationTable};
    use shapecheck_engine::{DeviceRecord, Evaluation};

    fn host() -> HostInfo {
        HostInfo {
            hostname: "gpu-node-1".into(),
            os: "linux".into(),
            architecture: "x86_64".into(),
            interfaces: vec![NetworkInterface { name: "eth0".into(), ip: "10.0.0.5".into() }],
        }
    }

    fn outcomes() -> Vec<CheckOutcome> {
        vec![
            CheckOutcome::single("peermem_module_check", "nvidia_peermem", Evaluation::pass()),
            CheckOutcome::fold(
                "link_check",
                vec![
                    DeviceRecord::new("mlx5_0 (rdma0)", Evaluation::pass()),
                    DeviceRecord::new("mlx5_1 (rdma1)", Evaluation::fail("speed: 100G, expected 200G")),
                ],
            ),
            CheckOutcome::skipped("eth_link_check", "no VCN NICs declared for the shape"),
        ]
    }

    #[test]
    fn test_summary_and_exit_code() {
        let report = Report::new(host(), "BM.GPU.H100.8", outcomes());
        assert_eq!(
            report.summary,
            Summary { passed: 1, warned: 0, failed: 1, skipped: 1, config_errors: 0 }
        );
        assert_eq!(report.exit_code(), 1);

        let mut with_config = outcomes();
        with_config.push(CheckOutcome::configuration_error("legacy_custom_check", "unknown check"));
        assert_eq!(Report::new(host(), "BM.GPU.H100.8", with_config).exit_code(), 2);

        let healthy = vec![CheckOutcome::single("eth0_presence_check", "eth0", Evaluation::pass())];
        assert_eq!(Report::new(host(), "BM.GPU.H100.8", healthy).exit_code(), 0);
    }

    #[test]
    fn test_json_report() {
        let report = Report::new(host(), "BM.GPU.H100.8", outcomes());
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["shape"], "BM.GPU.H100.8");
        assert_eq!(value["host"]["hostname"], "gpu-node-1");
        assert_eq!(value["outcomes"][1]["verdict"], "FAIL");
        assert_eq!(value["outcomes"][1]["devices"][1]["device"], "mlx5_1 (rdma1)");
        assert!(value["outcomes"][0].get("config_error").is_none());
        assert_eq!(value["run_id"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn test_table_lists_failing_devices_only() {
        let table = Report::new(host(), "BM.GPU.H100.8", outcomes()).to_table();
        assert!(table.contains("link_check"));
        assert!(table.contains("mlx5_1 (rdma1): FAIL speed: 100G, expected 200G"));
        assert!(!table.contains("mlx5_0 (rdma0)"));
        assert!(table.contains("no VCN NICs declared for the shape"));
        assert!(table.ends_with("1 passed, 0 warned, 1 failed, 1 skipped, 0 configuration errors\n"));
    }

    #[test]
    fn test_recommendations_section() {
        let plain = Report::new(host(), "BM.GPU.H100.8", outcomes());
        assert!(!plain.to_json().unwrap().contains("\"recommendations\""));

        let recommendations = recommend(&RecommendationTable::builtin(), &plain.outcomes);
        let report = plain.with_recommendations(recommendations);
        assert_eq!(report.exit_code(), 1);

        let table = report.to_table();
        assert!(table.contains("0 configuration errors\n\nRecommendations: Found 1 issue(s)"));
        assert!(table.contains("1. [CRITICAL] link_check"));

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["recommendations"]["critical_issues"], 1);
        assert_eq!(value["recommendations"]["recommendations"][0]["type"], "critical");
    }

    #[test]
    fn test_saved_report_reads_back() {
        let report = Report::new(host(), "BM.GPU.H100.8", outcomes());
        let saved = Report::from_json(&report.to_json().unwrap()).unwrap();
        assert_eq!(saved.run_id, report.run_id);
        assert_eq!(saved.outcomes, report.outcomes);
        assert_eq!(saved.summary, report.summary);
        assert!(saved.recommendations.is_none());
    }
}
