//! One health-check run: which checks, their inputs, their outcomes

use crate::execution::{collect_probes, PlannedCheck, ProbeRunner};
use anyhow::{Context, Result};
use shapecheck_engine::checks::{execute, CheckContext, CheckKind};
use shapecheck_engine::{CheckOutcome, CheckSetting, FallbackPolicy, ShapeTopology, TestLimits};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Documents and policy a run works from
pub struct Session {
    pub topology: ShapeTopology,
    pub limits: TestLimits,
    pub policy: FallbackPolicy,
}

/// What the limits document asks for
pub struct Selection<'a> {
    pub checks: Vec<PlannedCheck<'a>>,
    /// Enabled names the catalogue does not know, reported as configuration errors
    pub unknown: Vec<String>,
}

impl Session {
    pub fn new(topology: ShapeTopology, limits: TestLimits, policy: FallbackPolicy) -> Self {
        Self {
            topology,
            limits,
            policy,
        }
    }

    /// Enabled checks in catalogue order, restricted to `requested` when
    /// it is not empty. Requesting a name the catalogue lacks is an error.
    pub fn select(&self, requested: &[String]) -> Result<Selection<'_>> {
        let shape = &self.topology.shape;
        let requested: BTreeSet<CheckKind> = requested
            .iter()
            .map(|name| CheckKind::from_name(name))
            .collect::<shapecheck_engine::Result<_>>()
            .context("Invalid --check")?;

        if !self.limits.has_shape(shape) {
            warn!("No test limits for shape {}, no check is enabled", shape);
        }

        let mut checks = Vec::new();
        for kind in CheckKind::ALL {
            if !requested.is_empty() && !requested.contains(&kind) {
                continue;
            }
            match self.limits.setting(shape, kind.name()) {
                CheckSetting::Enabled { threshold } => checks.push(PlannedCheck { kind, threshold }),
                CheckSetting::Disabled if requested.contains(&kind) => {
                    warn!("{} was requested but is not enabled for {}", kind, shape);
                }
                CheckSetting::Disabled => {}
            }
        }

        // a restricted run only reports on what it was asked for
        let unknown = if requested.is_empty() {
            self.limits
                .enabled_checks(shape)
                .into_iter()
                .filter(|name| CheckKind::from_name(name).is_err())
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        Ok(Selection { checks, unknown })
    }

    /// Collect probe output and run the selected checks
    pub async fn run<R: ProbeRunner>(&self, runner: &R, selection: &Selection<'_>) -> Vec<CheckOutcome> {
        info!(
            "Running {} checks for shape {}",
            selection.checks.len(),
            self.topology.shape
        );

        let probes = collect_probes(runner, &selection.checks, &self.topology, self.policy).await;

        let mut outcomes: Vec<CheckOutcome> = selection
            .checks
            .iter()
            .map(|check| {
                let ctx = CheckContext::new(&self.topology, &probes)
                    .with_threshold(check.threshold)
                    .with_policy(self.policy);
                let outcome = execute(check.kind, &ctx);
                info!("{}: {}", outcome.check, outcome.verdict);
                outcome
            })
            .collect();

        outcomes.extend(selection.unknown.iter().map(|name| {
            warn!("Limits enable {}, which is not a known check", name);
            CheckOutcome::configuration_error(name, format!("unknown check {}", name))
        }));

        outcomes
    }
}
