/*!
Test harness for shapecheck

- Test logging through `tracing`, captured by the test runner
- Shapes, limits and config files in a temporary directory
- Whole-node runs against a probe stub, without an async runtime
*/

use crate::fixtures;
use crate::probe_stub::ProbeStub;
use anyhow::{Context, Result};
use serde_json::Value;
use shapecheck_engine::checks::{execute, CheckContext, CheckKind};
use shapecheck_engine::{CheckOutcome, CheckSetting, FallbackPolicy, ShapesDocument, TestLimits};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, Level};

/// Debug-level logging for tests. Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init();
}

/// Documents written to a temporary directory, removed on drop
pub struct TestHarness {
    dir: TempDir,
    shapes_path: PathBuf,
    limits_path: PathBuf,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        init_test_logging();
        let dir = TempDir::new().context("Failed to create temporary directory")?;
        let shapes_path = dir.path().join("shapes.json");
        let limits_path = dir.path().join("test_limits.json");
        Ok(Self {
            dir,
            shapes_path,
            limits_path,
        })
    }

    /// Harness with the fixture shapes and limits already written
    pub fn with_fixtures() -> Result<Self> {
        let harness = Self::new()?;
        harness.write_shapes(fixtures::SHAPES)?;
        harness.write_limits(fixtures::LIMITS)?;
        Ok(harness)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn shapes_path(&self) -> &Path {
        &self.shapes_path
    }

    pub fn limits_path(&self) -> &Path {
        &self.limits_path
    }

    pub fn write_shapes(&self, text: &str) -> Result<&Path> {
        std::fs::write(&self.shapes_path, text)
            .with_context(|| format!("Failed to write {}", self.shapes_path.display()))?;
        Ok(&self.shapes_path)
    }

    pub fn write_limits(&self, text: &str) -> Result<&Path> {
        std::fs::write(&self.limits_path, text)
            .with_context(|| format!("Failed to write {}", self.limits_path.display()))?;
        Ok(&self.limits_path)
    }

    /// Change one check's entry in the limits file
    pub fn edit_limits<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Value),
    {
        let text = std::fs::read_to_string(&self.limits_path)?;
        let mut document: Value = serde_json::from_str(&text)?;
        edit(&mut document);
        self.write_limits(&serde_json::to_string_pretty(&document)?)?;
        Ok(())
    }

    /// Any other file, relative to the harness directory
    pub fn write_file(&self, name: &str, text: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Load both documents from disk and run every enabled check for
    /// `shape`, answering probes from `stub`. Enabled names the catalogue
    /// does not know are skipped.
    pub fn run_checks(&self, shape: &str, stub: &ProbeStub, policy: FallbackPolicy) -> Result<Vec<CheckOutcome>> {
        let shapes = ShapesDocument::from_json(&std::fs::read_to_string(&self.shapes_path)?)?;
        let limits = TestLimits::from_json(&std::fs::read_to_string(&self.limits_path)?)?;
        let topology = shapes.topology(shape)?;

        let enabled: Vec<(CheckKind, Option<&Value>)> = CheckKind::ALL
            .into_iter()
            .filter_map(|kind| match limits.setting(shape, kind.name()) {
                CheckSetting::Enabled { threshold } => Some((kind, threshold)),
                CheckSetting::Disabled => None,
            })
            .collect();

        let probes = stub.gather(&enabled, &topology, policy);
        info!("Running {} checks for {} against the stub", enabled.len(), shape);

        Ok(enabled
            .iter()
            .map(|(kind, threshold)| {
                let ctx = CheckContext::new(&topology, &probes)
                    .with_threshold(*threshold)
                    .with_policy(policy);
                execute(*kind, &ctx)
            })
            .collect())
    }
}
