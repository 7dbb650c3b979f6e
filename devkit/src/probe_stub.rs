/*!
Probe stub for running checks without the host utilities

Answers probes from canned outputs and records every probe it was asked
for, so tests can assert on what a run executed.
*/

use serde_json::Value;
use shapecheck_engine::checks::{plan_all, CheckContext, CheckKind, Probe, ProbeOutput, ProbeOutputs};
use shapecheck_engine::{FallbackPolicy, ShapeTopology};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Rounds of planning before giving up, same bound as the agent
const MAX_ROUNDS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct ProbeStub {
    responses: BTreeMap<Probe, ProbeOutput>,
    calls: Arc<Mutex<Vec<Probe>>>,
}

impl ProbeStub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned output for a probe, replacing any earlier one
    pub fn with_output(mut self, probe: Probe, output: impl Into<String>) -> Self {
        self.responses.insert(probe, ProbeOutput::Captured(output.into()));
        self
    }

    /// The probe fails to run (missing utility, timeout)
    pub fn with_failure(mut self, probe: Probe, error: impl Into<String>) -> Self {
        self.responses.insert(probe, ProbeOutput::Failed(error.into()));
        self
    }

    /// Answer one probe. Probes without a canned answer fail.
    pub fn respond(&self, probe: &Probe) -> ProbeOutput {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(probe.clone());
        }
        debug!("[STUB] {}", probe);
        self.responses
            .get(probe)
            .cloned()
            .unwrap_or_else(|| ProbeOutput::Failed(format!("no canned output for `{}`", probe)))
    }

    /// Every probe asked for so far, in order
    pub fn calls(&self) -> Vec<Probe> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, probe: &Probe) -> usize {
        self.calls().iter().filter(|call| *call == probe).count()
    }

    /// Plan and answer probes for `checks` the way the agent does, without
    /// an async runtime
    pub fn gather(
        &self,
        checks: &[(CheckKind, Option<&Value>)],
        topology: &ShapeTopology,
        policy: FallbackPolicy,
    ) -> ProbeOutputs {
        let mut outputs = ProbeOutputs::new();

        for _ in 0..MAX_ROUNDS {
            let pending: BTreeSet<Probe> = checks
                .iter()
                .flat_map(|(kind, threshold)| {
                    let ctx = CheckContext::new(topology, &outputs)
                        .with_threshold(*threshold)
                        .with_policy(policy);
                    plan_all(&[*kind], &ctx)
                })
                .collect();
            if pending.is_empty() {
                break;
            }
            for probe in pending {
                let output = self.respond(&probe);
                outputs.insert(probe, output);
            }
        }

        outputs
    }
}
