//! Agent configuration and document discovery
//!
//! Handles:
//! - Agent settings from `<config_dir>/shapecheck/config.toml`
//! - Search paths for the shapes, test-limits and recommendation documents

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SHAPES_FILE: &str = "shapes.json";
pub const LIMITS_FILE: &str = "test_limits.json";
const SYSTEM_DIR: &str = "/etc/shapecheck";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound for a single utility invocation
    pub timeout_secs: u64,
    pub shapes_path: Option<PathBuf>,
    pub limits_path: Option<PathBuf>,
    /// Prefix privileged utilities (dmesg, mlxlink, ...) with `sudo -n`
    pub use_sudo: bool,
    /// Fall back to built-in tables when a check has no threshold
    pub builtin_defaults: bool,
    /// Append recommendations to every `run` report
    pub recommend: bool,
    pub recommendations_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            shapes_path: None,
            limits_path: None,
            use_sudo: false,
            builtin_defaults: false,
            recommend: false,
            recommendations_path: None,
        }
    }
}

impl AgentConfig {
    /// Load from the OS-specific location; a missing file means defaults
    pub async fn load() -> Result<Self> {
        match Self::config_file_path() {
            Ok(path) => Self::load_from(&path).await,
            Err(e) => {
                debug!("No config directory ({}), using defaults", e);
                Ok(Self::default())
            }
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No agent config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid agent config {}", path.display()))?;

        info!("Loaded agent config from {}", path.display());
        Ok(config)
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;
        path.push("shapecheck");
        path.push("config.toml");
        Ok(path)
    }
}

/// Where a document named `file_name` is looked for, in order
pub fn search_paths(file_name: &str) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(file_name), Path::new(SYSTEM_DIR).join(file_name)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("shapecheck").join(file_name));
    }
    paths
}

/// Resolve a document path: command line, then agent config, then the
/// search paths
pub fn locate(explicit: Option<&Path>, configured: Option<&Path>, file_name: &str) -> Result<PathBuf> {
    if let Some(path) = explicit.or(configured) {
        return Ok(path.to_path_buf());
    }

    let candidates = search_paths(file_name);
    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or_else(|| {
            let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
            anyhow!("{} not found (tried {})", file_name, tried.join(", "))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("config.toml")).await.unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_secs = 5\nuse_sudo = true\nlimits_path = \"/opt/limits.json\"").unwrap();

        let config = AgentConfig::load_from(file.path()).await.unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert!(config.use_sudo);
        assert!(!config.builtin_defaults);
        assert!(!config.recommend);
        assert_eq!(config.limits_path, Some(PathBuf::from("/opt/limits.json")));
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_secs = \"soon\"").unwrap();
        assert!(AgentConfig::load_from(file.path()).await.is_err());
    }

    #[test]
    fn test_config_file_path() {
        if let Ok(path) = AgentConfig::config_file_path() {
            assert!(path.ends_with("shapecheck/config.toml"));
        }
    }

    #[test]
    fn test_locate_order() {
        let paths = search_paths(LIMITS_FILE);
        assert_eq!(paths[0], PathBuf::from("test_limits.json"));
        assert_eq!(paths[1], PathBuf::from("/etc/shapecheck/test_limits.json"));

        let explicit = PathBuf::from("/tmp/explicit.json");
        let configured = PathBuf::from("/tmp/configured.json");
        assert_eq!(locate(Some(&explicit), Some(&configured), LIMITS_FILE).unwrap(), explicit);
        assert_eq!(locate(None, Some(&configured), LIMITS_FILE).unwrap(), configured);
        assert!(locate(None, None, "no-such-shapecheck-document.json").is_err());
    }
}
