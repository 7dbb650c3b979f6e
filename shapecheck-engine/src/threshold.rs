//! Declarative threshold specifications
//!
//! The limits document stores thresholds as loose JSON (a number, a list, or
//! a nested object). Each check turns that value into a `ThresholdSpec` with
//! the helpers on [`ThresholdValue`].

use crate::error::{EngineError, Result};
use crate::verdict::Verdict;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdSpec {
    /// Value must contain this text
    Exact(String),
    /// Value must be at least `target - target * fraction_below`
    ToleranceBand { target: f64, fraction_below: f64 },
    /// Inclusive bounds
    Range { min: f64, max: f64 },
    /// Case-insensitive membership; anything reading ENABLED fails
    AllowSet(Vec<String>),
    /// Blocked fails, allowed passes, anything else warns
    BlockSet {
        blocked: Vec<String>,
        allowed: Vec<String>,
    },
    NumericCeiling(f64),
    /// Floating point, strictly below
    ExponentialCeiling(f64),
    /// Named sub-thresholds over named metrics
    Composite(Vec<SubSpec>),
}

/// One entry of a composite threshold
#[derive(Debug, Clone, PartialEq)]
pub struct SubSpec {
    pub metric: String,
    pub spec: ThresholdSpec,
    /// Verdict reported when this metric breaches (FAIL or WARN)
    pub on_breach: Verdict,
}

impl SubSpec {
    pub fn new(metric: &str, spec: ThresholdSpec) -> Self {
        Self {
            metric: metric.to_string(),
            spec,
            on_breach: Verdict::Fail,
        }
    }

    /// Breaches of this metric only warn
    pub fn soft(metric: &str, spec: ThresholdSpec) -> Self {
        Self {
            on_breach: Verdict::Warn,
            ..Self::new(metric, spec)
        }
    }
}

impl ThresholdSpec {
    /// Count that must match exactly
    pub fn count(expected: f64) -> Self {
        ThresholdSpec::Range {
            min: expected,
            max: expected,
        }
    }
}

/// Read-only view over a loose threshold value, tied to its check for errors
#[derive(Debug, Clone, Copy)]
pub struct ThresholdValue<'a> {
    check: &'a str,
    value: &'a Value,
}

impl<'a> ThresholdValue<'a> {
    pub fn new(check: &'a str, value: &'a Value) -> Self {
        Self { check, value }
    }

    pub fn raw(&self) -> &'a Value {
        self.value
    }

    pub fn is_object(&self) -> bool {
        self.value.is_object()
    }

    /// The value itself as a number
    pub fn number(&self) -> Result<f64> {
        self.value
            .as_f64()
            .ok_or_else(|| self.invalid(format!("expected a number, got {}", self.value)))
    }

    /// Either a bare number or `{key: number}`
    pub fn number_or_field(&self, key: &str) -> Result<f64> {
        if self.value.is_object() {
            self.field_number(key)?
                .ok_or_else(|| self.invalid(format!("missing numeric field '{}'", key)))
        } else {
            self.number()
        }
    }

    /// Optional numeric field of an object threshold
    pub fn field_number(&self, key: &str) -> Result<Option<f64>> {
        match self.value.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("field '{}' must be a number, got {}", key, v))),
        }
    }

    /// Optional field holding a number or a numeric string such as "1E-12"
    pub fn field_float(&self, key: &str) -> Result<Option<f64>> {
        match self.value.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.invalid(format!("field '{}' is not a number: {}", key, s))),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("field '{}' must be a number, got {}", key, v))),
        }
    }

    pub fn field_string(&self, key: &str) -> Result<Option<String>> {
        match self.value.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(v) => Err(self.invalid(format!("field '{}' must be a string, got {}", key, v))),
        }
    }

    /// Optional list of strings in an object threshold
    pub fn field_strings(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.value.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => strings_of(v)
                .map(Some)
                .ok_or_else(|| self.invalid(format!("field '{}' must be a list of strings", key))),
        }
    }

    /// The value itself as a list of strings
    pub fn strings(&self) -> Result<Vec<String>> {
        strings_of(self.value)
            .ok_or_else(|| self.invalid(format!("expected a list of strings, got {}", self.value)))
    }

    /// The value itself as a list of integers
    pub fn integers(&self) -> Result<Vec<i64>> {
        let items = self
            .value
            .as_array()
            .ok_or_else(|| self.invalid(format!("expected a list, got {}", self.value)))?;
        items
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| self.invalid(format!("list entry {} is not an integer", item)))
            })
            .collect()
    }

    /// Object of label to count, e.g. `{"Width x16": 8}`
    pub fn field_counts(&self, key: &str) -> Result<Vec<(String, u64)>> {
        match self.value.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(label, count)| {
                    count.as_u64().map(|c| (label.clone(), c)).ok_or_else(|| {
                        self.invalid(format!("count for '{}' in '{}' must be a whole number", label, key))
                    })
                })
                .collect(),
            Some(v) => Err(self.invalid(format!("field '{}' must be an object, got {}", key, v))),
        }
    }

    pub fn field(&self, key: &str) -> Option<ThresholdValue<'a>> {
        self.value.get(key).map(|value| ThresholdValue {
            check: self.check,
            value,
        })
    }

    pub fn invalid(&self, reason: impl Into<String>) -> EngineError {
        EngineError::invalid_threshold(self.check, reason)
    }
}

fn strings_of(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_or_field() {
        let bare = json!(1980);
        let nested = json!({"clock_speed": 1755});
        assert_eq!(ThresholdValue::new("gpu_clk_check", &bare).number_or_field("clock_speed").unwrap(), 1980.0);
        assert_eq!(ThresholdValue::new("gpu_clk_check", &nested).number_or_field("clock_speed").unwrap(), 1755.0);
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let value = json!("fast");
        let err = ThresholdValue::new("gpu_count_check", &value).number().unwrap_err();
        assert!(matches!(err, EngineError::InvalidThreshold { check, .. } if check == "gpu_count_check"));
    }

    #[test]
    fn test_lists_and_counts() {
        let value = json!({
            "blacklisted_versions": ["470.57.02"],
            "gpu_widths": {"Width x16": 8},
            "effective_physical_ber": "1E-12"
        });
        let threshold = ThresholdValue::new("x", &value);
        assert_eq!(threshold.field_strings("blacklisted_versions").unwrap().unwrap(), vec!["470.57.02"]);
        assert_eq!(threshold.field_strings("missing").unwrap(), None);
        assert_eq!(threshold.field_counts("gpu_widths").unwrap(), vec![("Width x16".to_string(), 8)]);
        assert_eq!(threshold.field_float("effective_physical_ber").unwrap(), Some(1e-12));

        let list = json!([0, 1, 2, 3]);
        assert_eq!(ThresholdValue::new("gid_index_check", &list).integers().unwrap(), vec![0, 1, 2, 3]);
    }
}
