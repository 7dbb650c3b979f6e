//! Parsers for the text emitted by host utilities.
//!
//! Parsers never fail hard: unreadable output yields empty results or a
//! typed parse error that the calling check turns into a verdict.

pub mod kernel_log;
pub mod lspci;
pub mod mlxlink;
pub mod nvidia_smi;
pub mod rdma;
