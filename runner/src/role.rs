//! The resolved role: one immutable, fully merged and rendered configuration.
//!
//! Typed sub-configs are deserialized from the merged document, so every
//! default is applied after the inheritance merge and never before it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::governor::Limits;

/// Name of the tool that delegates to a sub-agent.
pub const SPAWN_TOOL: &str = "spawn_agent";

/// Template variables fed to system prompt rendering.
pub type TemplateVars = BTreeMap<String, String>;

/// Load-time configuration defect. Always aborts before any model call.
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("Role directory not found: {0}")]
    NotFound(PathBuf),
    #[error("Invalid role name '{0}': expected '/'-separated segments of [A-Za-z0-9._-]")]
    InvalidName(String),
    #[error("role.yml not found at {0}")]
    MissingDefinition(PathBuf),
    #[error("Cannot instantiate abstract role '{0}'. Abstract roles are prefixed with '_'.")]
    Abstract(String),
    #[error("Circular inheritance detected: {}", format_chain(.0))]
    Cycle(Vec<PathBuf>),
    #[error("Inheritance depth exceeds maximum ({max}). Chain: {}", format_chain(.chain))]
    DepthExceeded { max: usize, chain: Vec<PathBuf> },
    #[error("Parent role '{name}' not found (expected at {})", .expected.display())]
    MissingParent { name: String, expected: PathBuf },
    #[error("Invalid role definition {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("Schema validation failed for {role}: {messages}")]
    Schema { role: String, messages: String },
    #[error("{kind} not found: {}", .path.display())]
    MissingFile { kind: &'static str, path: PathBuf },
    #[error("Failed to render system prompt template: {0}")]
    Template(String),
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn default_model_id() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_temperature() -> Option<f64> {
    Some(0.5)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_id")]
    pub id: String,
    /// `None` when the merged document sets `temperature: null`.
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    #[serde(default = "ModelConfig::default_max_tokens")]
    pub max_tokens: u32,
}

impl ModelConfig {
    fn default_max_tokens() -> u32 {
        8096
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: default_model_id(),
            temperature: default_temperature(),
            max_tokens: Self::default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    pub max_tool_calls: u32,
    pub max_cost_usd: f64,
    pub checkpoint_every: Option<u32>,
    pub allowed_paths: Vec<String>,
    pub forbidden_patterns: Vec<String>,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 25,
            max_cost_usd: 0.50,
            checkpoint_every: Some(10),
            allowed_paths: vec!["./workspace/**".to_string()],
            forbidden_patterns: vec!["rm -rf".to_string(), "DROP TABLE".to_string()],
        }
    }
}

impl From<&AutonomyConfig> for Limits {
    fn from(autonomy: &AutonomyConfig) -> Self {
        Limits {
            max_tool_calls: autonomy.max_tool_calls,
            max_cost_usd: autonomy.max_cost_usd,
            checkpoint_every: autonomy.checkpoint_every,
        }
    }
}

/// Where a final result is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Destination {
    /// Already streamed while the session ran.
    Stdout,
    /// `path` is a template over `run_id`, relative to the project root.
    File {
        #[serde(default)]
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: String,
    /// Schema file, already resolved against the declaring directory.
    pub schema_path: Option<PathBuf>,
    pub destinations: Vec<Destination>,
}

impl OutputConfig {
    pub fn is_structured(&self) -> bool {
        matches!(self.format.as_str(), "json" | "structured")
    }
}

/// Raw `output` section as written in role.yml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct RawOutput {
    pub format: String,
    pub schema: Option<String>,
    pub destinations: Vec<Destination>,
}

impl Default for RawOutput {
    fn default() -> Self {
        Self {
            format: "markdown".to_string(),
            schema: None,
            destinations: vec![Destination::Stdout],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationKind {
    Orchestrator,
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStrategy {
    Sequential,
    /// Accepted for compatibility; delegations still run one at a time.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub role: OrchestrationKind,
    pub can_spawn: Vec<String>,
    pub can_delegate_to: Vec<String>,
    pub max_sub_agents: u32,
    pub delegation_strategy: DelegationStrategy,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            role: OrchestrationKind::Worker,
            can_spawn: Vec::new(),
            can_delegate_to: Vec::new(),
            max_sub_agents: 3,
            delegation_strategy: DelegationStrategy::Sequential,
        }
    }
}

/// A fully resolved role, owned by exactly one session.
#[derive(Debug, Clone)]
pub struct ResolvedRole {
    pub name: String,
    /// Directory of the most specific layer; base for relative references.
    pub role_dir: PathBuf,
    pub model: ModelConfig,
    pub system_prompt: String,
    pub tools: ToolsConfig,
    pub autonomy: AutonomyConfig,
    pub output: OutputConfig,
    pub orchestration: Option<OrchestrationConfig>,
    pub rules: Vec<String>,
    pub skills: Vec<String>,
    /// Merged document the typed configs were built from.
    pub raw: Value,
}

impl ResolvedRole {
    pub fn is_orchestrator(&self) -> bool {
        self.orchestration
            .as_ref()
            .is_some_and(|orch| orch.role == OrchestrationKind::Orchestrator)
    }

    /// `allow` minus `deny`, in allow-list order. Orchestrators gain the
    /// delegation tool unless it is denied.
    pub fn effective_tools(&self) -> Vec<String> {
        let mut effective: Vec<String> = self
            .tools
            .allow
            .iter()
            .filter(|name| !self.tools.deny.contains(name))
            .cloned()
            .collect();
        let spawn = SPAWN_TOOL.to_string();
        if self.is_orchestrator() && !effective.contains(&spawn) && !self.tools.deny.contains(&spawn)
        {
            effective.push(spawn);
        }
        effective
    }

    pub fn limits(&self) -> Limits {
        Limits::from(&self.autonomy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn autonomy_defaults_fill_missing_fields() {
        let autonomy: AutonomyConfig =
            serde_json::from_value(json!({"max_cost_usd": 1.0})).expect("parse");
        assert_eq!(autonomy.max_cost_usd, 1.0);
        assert_eq!(autonomy.max_tool_calls, 25);
        assert_eq!(autonomy.checkpoint_every, Some(10));
        assert_eq!(autonomy.allowed_paths, vec!["./workspace/**"]);
    }

    #[test]
    fn explicit_null_temperature_is_kept_as_none() {
        let model: ModelConfig =
            serde_json::from_value(json!({"id": "m", "temperature": null})).expect("parse");
        assert_eq!(model.temperature, None);
        assert_eq!(model.max_tokens, 8096);

        let model: ModelConfig = serde_json::from_value(json!({})).expect("parse");
        assert_eq!(model.temperature, Some(0.5));
    }

    #[test]
    fn destinations_parse_by_type_tag() {
        let raw: RawOutput = serde_json::from_value(json!({
            "destinations": [{"type": "stdout"}, {"type": "file", "path": "out/{{ run_id }}.md"}]
        }))
        .expect("parse");
        assert_eq!(raw.format, "markdown");
        assert_eq!(
            raw.destinations,
            vec![
                Destination::Stdout,
                Destination::File {
                    path: "out/{{ run_id }}.md".to_string()
                }
            ]
        );
    }

    #[test]
    fn cycle_error_names_full_chain() {
        let err = RoleError::Cycle(vec![
            PathBuf::from("/roles/a"),
            PathBuf::from("/roles/b"),
            PathBuf::from("/roles/a"),
        ]);
        assert_eq!(
            err.to_string(),
            "Circular inheritance detected: /roles/a -> /roles/b -> /roles/a"
        );
    }
}
