//! Per-shape test limits
//!
//! ```json
//! {"test_limits": {"BM.GPU.H100.8": {
//!     "gpu_count_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": 8}
//! }}}
//! ```
//!
//! A shape or check missing from the document is disabled, not an error.

use crate::error::{EngineError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestLimits {
    #[serde(rename = "test_limits", default)]
    pub shapes: BTreeMap<String, BTreeMap<String, CheckLimit>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckLimit {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub test_category: Option<String>,
    #[serde(default)]
    pub threshold: Option<Value>,
}

/// How one check is configured for one shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckSetting<'a> {
    Disabled,
    Enabled { threshold: Option<&'a Value> },
}

/// What to do when an enabled check has no threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Missing threshold is a configuration error
    #[default]
    Strict,
    /// Use the built-in tables shipped with each check
    BuiltIn,
}

impl TestLimits {
    pub fn from_json(text: &str) -> Result<Self> {
        let limits: TestLimits = serde_json::from_str(text)?;
        debug!("Loaded test limits for {} shapes", limits.shapes.len());
        Ok(limits)
    }

    pub fn setting(&self, shape: &str, check: &str) -> CheckSetting<'_> {
        match self.shapes.get(shape).and_then(|checks| checks.get(check)) {
            Some(limit) if limit.enabled => CheckSetting::Enabled {
                threshold: limit.threshold.as_ref().filter(|v| !v.is_null()),
            },
            _ => CheckSetting::Disabled,
        }
    }

    /// Names of enabled checks for a shape, sorted
    pub fn enabled_checks(&self, shape: &str) -> Vec<&str> {
        self.shapes
            .get(shape)
            .map(|checks| {
                checks
                    .iter()
                    .filter(|(_, limit)| limit.enabled)
                    .map(|(name, _)| name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_shape(&self, shape: &str) -> bool {
        self.shapes.contains_key(shape)
    }
}

/// Resolve the threshold an enabled check runs with.
///
/// `Ok(None)` means "use the built-in default" and is only returned when
/// the policy allows it or the check does not need a threshold.
pub fn resolve_threshold<'a>(
    shape: &str,
    check: &str,
    threshold: Option<&'a Value>,
    needs_threshold: bool,
    policy: FallbackPolicy,
) -> Result<Option<&'a Value>> {
    match (threshold, needs_threshold, policy) {
        (Some(value), _, _) => Ok(Some(value)),
        (None, false, _) | (None, true, FallbackPolicy::BuiltIn) => Ok(None),
        (None, true, FallbackPolicy::Strict) => Err(EngineError::MissingThreshold {
            check: check.to_string(),
            shape: shape.to_string(),
        }),
    }
}
