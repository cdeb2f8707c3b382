//! Project configuration stored in `tab.toml` at the project root.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// File name of the project configuration.
pub const CONFIG_FILE: &str = "tab.toml";

/// Project configuration (TOML).
///
/// Edited by humans; every field is optional and falls back to the
/// defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TabConfig {
    /// Directory holding role bundles, relative to the project root.
    pub roles_dir: String,

    /// Role used by `tab run` when `--role` is not given.
    pub default_role: String,

    pub tools: ToolSettings,
    pub api: ApiConfig,
}

/// Limits applied by the built-in tool bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolSettings {
    /// Default `bash` timeout when the model does not pass one.
    pub bash_timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub bash_output_limit_bytes: usize,
    pub read_limit_bytes: usize,
    pub fetch_limit_bytes: usize,
    pub fetch_timeout_secs: u64,
    pub exa_endpoint: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            bash_timeout_secs: 30,
            bash_output_limit_bytes: 100_000,
            read_limit_bytes: 100 * 1024,
            fetch_limit_bytes: 200 * 1024,
            fetch_timeout_secs: 15,
            exa_endpoint: "https://api.exa.ai/search".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Value of the `anthropic-version` header.
    pub version: String,
    /// Environment variable holding the API key. The key itself never lives in config.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            version: "2023-06-01".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            request_timeout_secs: 600,
        }
    }
}

impl Default for TabConfig {
    fn default() -> Self {
        Self {
            roles_dir: "roles".to_string(),
            default_role: "orchestrator".to_string(),
            tools: ToolSettings::default(),
            api: ApiConfig::default(),
        }
    }
}

impl TabConfig {
    pub fn validate(&self) -> Result<()> {
        if self.roles_dir.trim().is_empty() {
            return Err(anyhow!("roles_dir must be non-empty"));
        }
        if self.default_role.trim().is_empty() {
            return Err(anyhow!("default_role must be non-empty"));
        }
        if self.tools.bash_timeout_secs == 0 {
            return Err(anyhow!("tools.bash_timeout_secs must be > 0"));
        }
        if self.tools.bash_output_limit_bytes == 0 {
            return Err(anyhow!("tools.bash_output_limit_bytes must be > 0"));
        }
        if self.tools.read_limit_bytes == 0 {
            return Err(anyhow!("tools.read_limit_bytes must be > 0"));
        }
        if self.tools.fetch_limit_bytes == 0 {
            return Err(anyhow!("tools.fetch_limit_bytes must be > 0"));
        }
        if self.tools.fetch_timeout_secs == 0 {
            return Err(anyhow!("tools.fetch_timeout_secs must be > 0"));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(anyhow!("api.request_timeout_secs must be > 0"));
        }
        if self.api.api_key_env.trim().is_empty() {
            return Err(anyhow!("api.api_key_env must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TabConfig::default()`.
pub fn load_config(path: &Path) -> Result<TabConfig> {
    if !path.exists() {
        let cfg = TabConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TabConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TabConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, TabConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        let mut cfg = TabConfig::default();
        cfg.default_role = "researcher".to_string();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[tools]\nbash_timeout_secs = 5\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.tools.bash_timeout_secs, 5);
        assert_eq!(cfg.tools.read_limit_bytes, 100 * 1024);
        assert_eq!(cfg.roles_dir, "roles");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[tools]\nfetch_timeout_secs = 0\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("fetch_timeout_secs"));
    }
}
