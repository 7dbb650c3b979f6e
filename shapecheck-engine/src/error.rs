//! Error type for the engine.
//!
//! Only configuration problems are errors. Missing devices, bad probe
//! output and threshold breaches are reported as data in a `CheckOutcome`.

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Declared topology is structurally unusable (empty PCI address, ...)
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Shape not found in shapes document: {0}")]
    UnknownShape(String),

    /// Check is enabled for the shape but carries no threshold
    #[error("Check {check} is enabled for shape {shape} but has no threshold configured")]
    MissingThreshold { check: String, shape: String },

    #[error("Invalid threshold for {check}: {reason}")]
    InvalidThreshold { check: String, reason: String },

    #[error("Unknown check: {0}")]
    UnknownCheck(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn invalid_threshold(check: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidThreshold {
            check: check.to_string(),
            reason: reason.into(),
        }
    }
}
