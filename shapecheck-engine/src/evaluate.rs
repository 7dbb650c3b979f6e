//! Threshold evaluation
//!
//! A value that cannot be read the way its threshold needs (text against a
//! numeric ceiling, an unparseable BER) always fails.

use crate::discovered::MetricValue;
use crate::threshold::{SubSpec, ThresholdSpec};
use crate::verdict::{Evaluation, Verdict};
use std::collections::BTreeMap;

/// Evaluate one metric value against one threshold.
pub fn evaluate(value: &MetricValue, spec: &ThresholdSpec) -> Evaluation {
    match spec {
        ThresholdSpec::Exact(expected) => {
            if value.as_text().contains(expected.as_str()) {
                Evaluation::pass()
            } else {
                Evaluation::fail(format!("{}, expected {}", value, expected))
            }
        }

        ThresholdSpec::ToleranceBand { target, fraction_below } => match numeric(value) {
            Ok(observed) => {
                let floor = band_floor(*target, *fraction_below);
                if observed >= floor {
                    Evaluation::pass()
                } else {
                    Evaluation::fail(format!(
                        "{} below minimum {} (expected {})",
                        observed, floor, target
                    ))
                }
            }
            Err(mismatch) => mismatch,
        },

        ThresholdSpec::Range { min, max } => match numeric(value) {
            Ok(observed) if observed >= *min && observed <= *max => Evaluation::pass(),
            Ok(observed) if min == max => {
                Evaluation::fail(format!("expected {}, got {}", min, observed))
            }
            Ok(observed) => Evaluation::fail(format!("{} outside [{}, {}]", observed, min, max)),
            Err(mismatch) => mismatch,
        },

        ThresholdSpec::AllowSet(allowed) => {
            let text = value.as_text();
            let observed = text.trim();
            if observed.to_uppercase().contains("ENABLED") {
                Evaluation::fail(format!("{} is enabled", observed))
            } else if allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(observed)) {
                Evaluation::pass()
            } else {
                Evaluation::fail(format!("{} not in allowed set [{}]", observed, allowed.join(", ")))
            }
        }

        ThresholdSpec::BlockSet { blocked, allowed } => {
            let text = value.as_text();
            let observed = text.trim();
            if blocked.iter().any(|b| b.trim() == observed) {
                Evaluation::fail(format!("{} is blocklisted", observed))
            } else if allowed.iter().any(|a| a.trim() == observed) {
                Evaluation::pass()
            } else {
                Evaluation::warn(format!("{} is neither supported nor blocklisted", observed))
            }
        }

        ThresholdSpec::NumericCeiling(max) => match numeric(value) {
            Ok(observed) if observed > *max => {
                Evaluation::fail(format!("{} exceeds {}", observed, max))
            }
            Ok(_) => Evaluation::pass(),
            Err(mismatch) => mismatch,
        },

        ThresholdSpec::ExponentialCeiling(max) => match value.as_f64() {
            Some(observed) if observed < *max => Evaluation::pass(),
            Some(_) => Evaluation::fail(format!("{}, expected below {:E}", value, max)),
            None => Evaluation::fail(format!("unparseable value '{}'", value)),
        },

        ThresholdSpec::Composite(_) => Evaluation::fail(format!(
            "composite threshold needs named metrics, got a single value '{}'",
            value
        )),
    }
}

/// Per-metric results of a composite evaluation, plus the folded result
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeEvaluation {
    pub overall: Evaluation,
    pub metrics: Vec<(String, Evaluation)>,
}

/// Evaluate named metrics. A non-composite spec is treated as a single
/// entry named `value`.
pub fn evaluate_metrics(
    metrics: &BTreeMap<String, MetricValue>,
    spec: &ThresholdSpec,
) -> CompositeEvaluation {
    let single;
    let subs: &[SubSpec] = match spec {
        ThresholdSpec::Composite(subs) => subs,
        other => {
            single = [SubSpec::new("value", other.clone())];
            &single
        }
    };

    let results: Vec<(String, Evaluation)> = subs
        .iter()
        .map(|sub| {
            let evaluation = match metrics.get(&sub.metric) {
                Some(value) => evaluate(value, &sub.spec),
                None => Evaluation::fail(format!("{} not reported", sub.metric)),
            };
            let evaluation = if sub.on_breach == Verdict::Warn {
                evaluation.soften()
            } else {
                evaluation
            };
            (sub.metric.clone(), evaluation)
        })
        .collect();

    CompositeEvaluation {
        overall: fold_named(&results),
        metrics: results,
    }
}

/// Worst verdict; reason lists every non-passing entry.
pub fn fold_named(results: &[(String, Evaluation)]) -> Evaluation {
    let verdict = results
        .iter()
        .fold(Verdict::Pass, |acc, (_, e)| acc.worst(e.verdict));
    let reasons: Vec<String> = results
        .iter()
        .filter(|(_, e)| !e.is_pass())
        .map(|(name, e)| format!("{}: {}", name, e.reason))
        .collect();

    Evaluation::new(verdict, reasons.join("; "))
}

/// Lowest passing value of a tolerance band
pub fn band_floor(target: f64, fraction_below: f64) -> f64 {
    target - target * fraction_below
}

fn numeric(value: &MetricValue) -> Result<f64, Evaluation> {
    value
        .as_f64()
        .ok_or_else(|| Evaluation::fail(format!("expected a number, got '{}'", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> MetricValue {
        MetricValue::from(s)
    }

    fn band() -> ThresholdSpec {
        ThresholdSpec::ToleranceBand {
            target: 1980.0,
            fraction_below: 0.10,
        }
    }

    #[test]
    fn test_tolerance_band_boundary() {
        assert_eq!(evaluate(&MetricValue::from(1782u64), &band()).verdict, Verdict::Pass);
        assert_eq!(evaluate(&MetricValue::from(1781u64), &band()).verdict, Verdict::Fail);
        assert_eq!(evaluate(&text("1980"), &band()).verdict, Verdict::Pass);
    }

    #[test]
    fn test_exponential_ceiling_is_strict() {
        let spec = ThresholdSpec::ExponentialCeiling(1e-12);
        assert_eq!(evaluate(&text("1E-12"), &spec).verdict, Verdict::Fail);
        assert_eq!(evaluate(&text("1E-13"), &spec).verdict, Verdict::Pass);
        assert_eq!(evaluate(&text("15E-255"), &spec).verdict, Verdict::Pass);
        let garbage = evaluate(&text("N/A"), &spec);
        assert_eq!(garbage.verdict, Verdict::Fail);
        assert!(garbage.reason.contains("unparseable"));
    }

    #[test]
    fn test_block_takes_precedence() {
        let spec = ThresholdSpec::BlockSet {
            blocked: vec!["470.57.02".into()],
            allowed: vec!["470.57.02".into(), "535.104.12".into()],
        };
        assert_eq!(evaluate(&text("470.57.02"), &spec).verdict, Verdict::Fail);
        assert_eq!(evaluate(&text("535.104.12"), &spec).verdict, Verdict::Pass);
        assert_eq!(evaluate(&text("999.1"), &spec).verdict, Verdict::Warn);
    }

    #[test]
    fn test_allow_set_rejects_enabled() {
        let spec = ThresholdSpec::AllowSet(vec!["Disabled".into(), "N/A".into(), "Enabled".into()]);
        assert_eq!(evaluate(&text("disabled"), &spec).verdict, Verdict::Pass);
        assert_eq!(evaluate(&text("N/A"), &spec).verdict, Verdict::Pass);
        assert_eq!(evaluate(&text("Enabled"), &spec).verdict, Verdict::Fail);
        assert_eq!(evaluate(&text("Pending"), &spec).verdict, Verdict::Fail);
    }

    #[test]
    fn test_exact_is_substring() {
        let spec = ThresholdSpec::Exact("200G".into());
        assert_eq!(evaluate(&text("200G_4X"), &spec).verdict, Verdict::Pass);
        assert_eq!(evaluate(&text("100G"), &spec).verdict, Verdict::Fail);
    }

    #[test]
    fn test_numeric_ceiling_and_range() {
        let ceiling = ThresholdSpec::NumericCeiling(0.0);
        assert_eq!(evaluate(&MetricValue::from(0u64), &ceiling).verdict, Verdict::Pass);
        assert_eq!(evaluate(&MetricValue::from(1u64), &ceiling).verdict, Verdict::Fail);

        let count = ThresholdSpec::count(8.0);
        let miss = evaluate(&MetricValue::from(7u64), &count);
        assert_eq!(miss.verdict, Verdict::Fail);
        assert_eq!(miss.reason, "expected 8, got 7");
        let range = ThresholdSpec::Range { min: 1.0, max: 3.0 };
        assert_eq!(evaluate(&MetricValue::from(3u64), &range).verdict, Verdict::Pass);
    }

    #[test]
    fn test_type_mismatch_fails_closed() {
        let result = evaluate(&text("lots"), &ThresholdSpec::NumericCeiling(10.0));
        assert_eq!(result.verdict, Verdict::Fail);
        assert!(result.reason.contains("expected a number"));
        let composite = evaluate(&text("x"), &ThresholdSpec::Composite(Vec::new()));
        assert_eq!(composite.verdict, Verdict::Fail);
    }

    #[test]
    fn test_composite_worst_of() {
        let spec = ThresholdSpec::Composite(vec![
            SubSpec::new("speed", ThresholdSpec::Exact("400G".into())),
            SubSpec::soft("lane_errors", ThresholdSpec::NumericCeiling(10.0)),
            SubSpec::new("ber", ThresholdSpec::ExponentialCeiling(1e-12)),
        ]);

        let mut metrics = BTreeMap::new();
        metrics.insert("speed".to_string(), text("400G"));
        metrics.insert("lane_errors".to_string(), MetricValue::from(50u64));
        metrics.insert("ber".to_string(), text("1E-15"));
        let warned = evaluate_metrics(&metrics, &spec);
        assert_eq!(warned.overall.verdict, Verdict::Warn);
        assert!(warned.overall.reason.starts_with("lane_errors:"));

        metrics.remove("ber");
        let failed = evaluate_metrics(&metrics, &spec);
        assert_eq!(failed.overall.verdict, Verdict::Fail);
        assert!(failed.overall.reason.contains("ber: ber not reported"));
        assert!(failed.overall.reason.contains("lane_errors"));

        metrics.insert("ber".to_string(), text("1E-15"));
        metrics.insert("lane_errors".to_string(), MetricValue::from(0u64));
        let passed = evaluate_metrics(&metrics, &spec);
        assert_eq!(passed.overall.verdict, Verdict::Pass);
        assert!(passed.overall.reason.is_empty());
        assert_eq!(passed.metrics.len(), 3);
    }
}
