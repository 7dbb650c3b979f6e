/*!
# Shapecheck DevKit - stubs and fixtures for tests

Helps testing checks and the agent without GPU or RDMA hardware:
- Probe stub answering utilities from canned output
- Sample shapes and limits documents with a healthy H100 node
- Temporary document directories and test logging
*/

pub mod fixtures;
pub mod probe_stub;
pub mod test_utils;

pub use probe_stub::ProbeStub;
pub use test_utils::{init_test_logging, TestHarness};
