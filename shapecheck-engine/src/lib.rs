//! Shapecheck engine - declared topology vs. discovered hardware
//!
//! Decides whether a compute node's hardware matches what its shape
//! declares and whether each observed metric is within its limits:
//! - PCI address normalization and declared/discovered correlation
//! - Declarative thresholds and their evaluation into verdicts
//! - Per-device records folded into one outcome per check
//! - The check catalogue and the parsers for the utilities it reads
//!
//! The engine is synchronous and performs no I/O. Callers run the probes
//! [`checks::plan`] asks for and hand the outputs back in a
//! [`checks::ProbeOutputs`].

pub mod checks;
pub mod correlate;
pub mod discovered;
pub mod error;
pub mod evaluate;
pub mod limits;
pub mod orchestrate;
pub mod parsers;
pub mod pci;
pub mod threshold;
pub mod topology;
pub mod verdict;

pub use checks::{execute, plan, plan_all, CheckContext, CheckKind, Probe, ProbeOutput, ProbeOutputs};
pub use error::{EngineError, Result};
pub use limits::{CheckSetting, FallbackPolicy, TestLimits};
pub use orchestrate::{CheckOutcome, DeviceRecord};
pub use topology::{ShapeTopology, ShapesDocument};
pub use verdict::{Evaluation, Verdict};
