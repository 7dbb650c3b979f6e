//! Check orchestration: correlate, evaluate per device, fold.
//!
//! Results are returned as values. Aggregation across checks belongs to
//! the caller.

use crate::correlate::{correlate, Correlated, MatchedPair};
use crate::discovered::DiscoveredDevice;
use crate::error::Result;
use crate::pci::normalize;
use crate::topology::Declared;
use crate::verdict::{Evaluation, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEVICE_NOT_FOUND: &str = "device not found";

/// Result for one device (or one host-wide subject) within a check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device: String,
    pub verdict: Verdict,
    pub reason: String,
    /// Metric name to `PASS` / `FAIL - reason` cell
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, String>,
}

impl DeviceRecord {
    pub fn new(device: impl Into<String>, evaluation: Evaluation) -> Self {
        Self {
            device: device.into(),
            verdict: evaluation.verdict,
            reason: evaluation.reason,
            metrics: BTreeMap::new(),
        }
    }

    pub fn not_found(device: impl Into<String>) -> Self {
        Self::new(device, Evaluation::fail(DEVICE_NOT_FOUND))
    }

    /// Record built from per-metric results, folded worst-of
    pub fn from_metrics(device: impl Into<String>, metrics: Vec<(String, Evaluation)>) -> Self {
        let overall = crate::evaluate::fold_named(&metrics);
        let mut record = Self::new(device, overall);
        record.metrics = metrics
            .into_iter()
            .map(|(name, evaluation)| (name, evaluation.cell()))
            .collect();
        record
    }

    pub fn with_metric(mut self, name: &str, evaluation: &Evaluation) -> Self {
        self.metrics.insert(name.to_string(), evaluation.cell());
        self
    }
}

/// Everything one check produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: String,
    pub verdict: Verdict,
    pub reason: String,
    pub devices: Vec<DeviceRecord>,
    /// Hardware present but not declared for the shape
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unexpected: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// The check could not run because its configuration is broken
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub config_error: bool,
}

impl CheckOutcome {
    /// Fold device records: SKIP when there is nothing, otherwise worst-of.
    pub fn fold(check: &str, devices: Vec<DeviceRecord>) -> Self {
        let (verdict, reason) = if devices.is_empty() {
            (Verdict::Skip, "no devices of this kind declared for the shape".to_string())
        } else {
            let verdict = devices
                .iter()
                .fold(Verdict::Pass, |acc, d| acc.worst(d.verdict));
            let reason = match verdict {
                Verdict::Pass | Verdict::Skip => String::new(),
                _ => devices
                    .iter()
                    .filter(|d| d.verdict != Verdict::Pass && d.verdict != Verdict::Skip)
                    .map(|d| format!("{}: {}", d.device, d.reason))
                    .collect::<Vec<_>>()
                    .join("; "),
            };
            (verdict, reason)
        };

        debug!("{} -> {} {}", check, verdict, reason);

        Self {
            check: check.to_string(),
            verdict,
            reason,
            devices,
            unexpected: Vec::new(),
            warnings: Vec::new(),
            config_error: false,
        }
    }

    /// Single host-wide result
    pub fn single(check: &str, subject: &str, evaluation: Evaluation) -> Self {
        Self::fold(check, vec![DeviceRecord::new(subject, evaluation)])
    }

    /// Check skipped as a whole
    pub fn skipped(check: &str, reason: impl Into<String>) -> Self {
        let mut outcome = Self::fold(check, Vec::new());
        outcome.reason = reason.into();
        outcome
    }

    /// A check that could not run. Reported as FAIL, flagged separately.
    pub fn configuration_error(check: &str, error: impl std::fmt::Display) -> Self {
        Self {
            check: check.to_string(),
            verdict: Verdict::Fail,
            reason: format!("configuration error: {}", error),
            devices: Vec::new(),
            unexpected: Vec::new(),
            warnings: Vec::new(),
            config_error: true,
        }
    }

    /// Replace the overall reason when the check has a better summary
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Add a record and fold again, keeping unexpected devices and warnings
    pub fn with_device(self, record: DeviceRecord) -> Self {
        let mut devices = self.devices;
        devices.push(record);
        let mut outcome = Self::fold(&self.check, devices);
        outcome.unexpected = self.unexpected;
        outcome.warnings = self.warnings;
        outcome
    }

    /// Labels of the devices that did not pass
    pub fn failing_devices(&self) -> Vec<&str> {
        self.devices
            .iter()
            .filter(|d| d.verdict == Verdict::Fail || d.verdict == Verdict::Warn)
            .map(|d| d.device.as_str())
            .collect()
    }
}

/// Correlate declared entries with discovered devices and evaluate each
/// matched pair. Missing entries become FAIL records, extras are listed.
pub fn run_correlated<T, F>(
    check: &str,
    declared: &[T],
    discovered: Vec<DiscoveredDevice>,
    mut evaluate: F,
) -> Result<CheckOutcome>
where
    T: Declared,
    F: FnMut(&MatchedPair<'_, T>) -> DeviceRecord,
{
    let correlation = correlate(declared, discovered)?;

    let devices = correlation
        .entries
        .iter()
        .map(|entry| match entry {
            Correlated::Matched(pair) => evaluate(pair),
            Correlated::Missing(missing) => DeviceRecord::not_found(missing.label()),
        })
        .collect();

    let mut outcome = CheckOutcome::fold(check, devices);
    outcome.unexpected = correlation
        .unexpected
        .iter()
        .map(|device| normalize(&device.pci).to_string())
        .collect();
    outcome.warnings = correlation.warnings;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::ThresholdSpec;
    use crate::topology::{GpuEntry, NicEntry};

    fn gpu(pci: &str, module: &str) -> GpuEntry {
        GpuEntry {
            pci: pci.to_string(),
            model: String::new(),
            index: None,
            module_id: Some(module.to_string()),
        }
    }

    fn module_check(pair: &MatchedPair<'_, GpuEntry>) -> DeviceRecord {
        let expected = pair.declared.module_id.clone().unwrap_or_default();
        let found = pair.discovered.module_id.clone().unwrap_or_default();
        let value = crate::discovered::MetricValue::from(found.as_str());
        let evaluation = crate::evaluate::evaluate(&value, &ThresholdSpec::Exact(expected.clone()));
        let evaluation = if evaluation.is_pass() && found == expected {
            evaluation
        } else {
            Evaluation::fail(format!("Expected GPU module ID {}, found {}", expected, found))
        };
        DeviceRecord::new(pair.pci.to_string(), evaluation)
    }

    #[test]
    fn test_module_id_scenario() {
        let declared = vec![gpu("0000:0f:00.0", "2"), gpu("0000:2d:00.0", "4")];
        let discovered = vec![
            DiscoveredDevice::new("00000000:0F:00.0").with_module_id("2"),
            DiscoveredDevice::new("00000000:2D:00.0").with_module_id("5"),
        ];

        let outcome = run_correlated("cdfp_cable_check", &declared, discovered, module_check).unwrap();
        assert_eq!(outcome.devices[0].verdict, Verdict::Pass);
        assert_eq!(outcome.devices[1].verdict, Verdict::Fail);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert!(outcome.reason.contains("0000:2d:00.0"));
        assert!(outcome.reason.contains("Expected GPU module ID 4, found 5"));
    }

    #[test]
    fn test_missing_device_fails() {
        let declared = vec![gpu("0000:0f:00.0", "2")];
        let outcome = run_correlated("cdfp_cable_check", &declared, Vec::new(), module_check).unwrap();
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.devices[0].reason, DEVICE_NOT_FOUND);
    }

    #[test]
    fn test_empty_topology_skips() {
        let declared: Vec<NicEntry> = Vec::new();
        let outcome = run_correlated("rdma_nics_count", &declared, Vec::new(), |pair| {
            DeviceRecord::new(pair.pci.to_string(), Evaluation::pass())
        })
        .unwrap();
        assert_eq!(outcome.verdict, Verdict::Skip);
    }

    #[test]
    fn test_unexpected_listed_without_changing_verdict() {
        let declared = vec![gpu("0000:0f:00.0", "2")];
        let discovered = vec![
            DiscoveredDevice::new("0000:0f:00.0").with_module_id("2"),
            DiscoveredDevice::new("0000:99:00.0").with_module_id("1"),
        ];
        let outcome = run_correlated("cdfp_cable_check", &declared, discovered, module_check).unwrap();
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert_eq!(outcome.unexpected, vec!["0000:99:00.0".to_string()]);
    }

    #[test]
    fn test_fold_warn_and_config_error() {
        let outcome = CheckOutcome::fold(
            "gpu_driver_check",
            vec![
                DeviceRecord::new("host", Evaluation::pass()),
                DeviceRecord::new("driver", Evaluation::warn("unsupported")),
            ],
        );
        assert_eq!(outcome.verdict, Verdict::Warn);
        assert_eq!(outcome.reason, "driver: unsupported");

        let broken = CheckOutcome::configuration_error("gpu_clk_check", "missing threshold");
        assert!(broken.config_error);
        assert_eq!(broken.verdict, Verdict::Fail);
    }
}
