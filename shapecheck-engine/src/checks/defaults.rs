//! Built-in tables and fixed constants of the checks.
//!
//! A table standing in for a missing threshold is only consulted under
//! [`FallbackPolicy::BuiltIn`].
//!
//! [`FallbackPolicy::BuiltIn`]: crate::limits::FallbackPolicy::BuiltIn

pub const BLACKLISTED_DRIVERS: &[&str] = &["470.57.02"];

pub const SUPPORTED_DRIVERS: &[&str] = &[
    "450.119.03",
    "450.142.0",
    "470.103.01",
    "470.129.06",
    "470.141.03",
    "510.47.03",
    "535.104.12",
    "550.90.12",
];

/// (code, description); every entry is critical
pub const CRITICAL_XIDS: &[(&str, &str)] = &[
    ("8", "GPU stopped processing"),
    ("31", "GPU memory page fault"),
    ("48", "Double Bit ECC Error"),
    ("79", "GPU has fallen off the bus"),
    ("92", "High single-bit ECC error rate"),
    ("94", "Contained ECC error"),
    ("95", "Uncontained ECC error"),
    ("119", "GSP RPC Timeout"),
    ("120", "GSP Error"),
];

pub const GPU_ALLOWED_MODES: &[&str] = &["DISABLED", "N/A"];

pub const GID_ALLOWED_INDICES: &[i64] = &[0, 1, 2, 3];

pub const SRAM_UNCORRECTABLE: f64 = 5.0;
pub const SRAM_CORRECTABLE: f64 = 1000.0;

pub const EFFECTIVE_BER_CEILING: f64 = 1e-12;
pub const RAW_BER_CEILING: f64 = 1e-5;

/// Row remap failures allowed per GPU
pub const ROW_REMAP_FAILURES: f64 = 0.0;
/// Drivers older than this do not expose remapped rows
pub const ROW_REMAP_MIN_DRIVER: u32 = 550;

/// Clock tolerance below the configured target
pub const CLOCK_TOLERANCE: f64 = 0.10;

pub const MAX_ACC_OUT_READ_VALUES: &[&str] = &["0", "44", "128"];

pub const LINK_PHYSICAL_STATES: &[&str] = &["LinkUp", "ETH_AN_FSM_ENABLE"];

pub fn strings(table: &[&str]) -> Vec<String> {
    table.iter().map(|s| s.to_string()).collect()
}
