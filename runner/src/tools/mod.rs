//! Tool registry and the contracts between tools, the gate and the session.
//!
//! The registry is an explicit value built once at startup and passed by
//! reference; tests build their own registries with substitute tools.

pub mod access;
pub mod builtin;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::core::governor::AutonomyHalt;
use crate::core::path::anchor;
use crate::core::types::ToolSpec;
use crate::io::config::ToolSettings;
use crate::role::TemplateVars;

/// Prefix of every failed tool result fed back to the model.
pub const ERROR_PREFIX: &str = "ERROR: ";

/// A tool denial or failure.
///
/// Everything except [`ToolError::Halt`] becomes a result string.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool '{tool}' is denied for role '{role}'")]
    Denied { tool: String, role: String },
    #[error("Unknown tool '{0}'")]
    Unknown(String),
    #[error("Tool '{tool}' is not enabled for role '{role}'")]
    NotEnabled { tool: String, role: String },
    #[error("Path '{path}' is outside allowed_paths: {allowed:?}")]
    PathNotAllowed { path: String, allowed: Vec<String> },
    #[error("Command contains forbidden pattern '{0}'")]
    ForbiddenPattern(String),
    #[error("Role '{role}' is not permitted to spawn '{target}'. Allowed: {allowed:?}")]
    SpawnNotAllowed {
        role: String,
        target: String,
        allowed: Vec<String>,
    },
    #[error("Maximum spawn depth ({max}) reached, cannot spawn '{target}'")]
    DepthCeiling { max: u32, target: String },
    #[error("Role '{role}' already spawned its maximum of {max} sub-agents")]
    SubAgentLimit { role: String, max: u32 },
    #[error("Failed to load role '{role}': {message}")]
    RoleLoad { role: String, message: String },
    #[error("Invalid input for tool '{tool}': {message}")]
    InvalidInput { tool: String, message: String },
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Halt(#[from] AutonomyHalt),
}

impl ToolError {
    /// Result string for the model.
    pub fn to_result(&self) -> String {
        format!("{ERROR_PREFIX}{self}")
    }
}

/// What the gate must check before a tool body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAccess {
    /// `field` holds a filesystem path checked against `allowed_paths`.
    Path { field: &'static str },
    /// `field` holds a shell command scanned for forbidden patterns.
    Command { field: &'static str },
    /// `field` names the role to delegate to.
    Delegation { field: &'static str },
    /// No input-dependent checks.
    Open,
}

/// A request to run a sub-agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationRequest {
    pub role: String,
    pub task: String,
    pub vars: TemplateVars,
}

/// Runs delegated sub-agents to completion.
pub trait Delegate {
    fn delegate(&self, request: DelegationRequest) -> Result<String, ToolError>;
}

/// Everything a tool body may use.
pub struct ToolContext<'a> {
    pub root: &'a Path,
    pub settings: &'a ToolSettings,
    pub delegate: Option<&'a dyn Delegate>,
}

impl ToolContext<'_> {
    /// Anchor a model-supplied path at the project root.
    pub fn resolve(&self, raw: &str) -> PathBuf {
        anchor(self.root, Path::new(raw))
    }
}

/// A side-effecting tool the model can call.
pub trait Tool {
    fn name(&self) -> &'static str;

    /// Catalog entry sent to the model.
    fn spec(&self) -> ToolSpec;

    fn access(&self) -> ToolAccess;

    fn run(&self, input: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError>;
}

/// Deserialize a tool input into its typed form.
pub fn parse_input<T: DeserializeOwned>(tool: &str, input: &Value) -> Result<T, ToolError> {
    serde_json::from_value(input.clone()).map_err(|err| ToolError::InvalidInput {
        tool: tool.to_string(),
        message: err.to_string(),
    })
}

/// Tools known to this process, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(builtin::BashTool));
        registry.register(Box::new(builtin::ReadFileTool));
        registry.register(Box::new(builtin::WriteFileTool));
        registry.register(Box::new(builtin::WebFetchTool));
        registry.register(Box::new(builtin::ExaSearchTool));
        registry.register(Box::new(builtin::SpawnAgentTool));
        registry
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name();
        self.tools.retain(|existing| existing.name() != name);
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|tool| tool.name() == name)
            .map(|tool| tool.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_every_tool() {
        let registry = ToolRegistry::with_builtin_tools();
        assert_eq!(
            registry.names(),
            vec![
                "bash",
                "read_file",
                "write_file",
                "web_fetch",
                "exa_search",
                "spawn_agent"
            ]
        );
        assert!(registry.get("read_file").is_some());
        assert!(registry.get("telnet").is_none());
    }

    #[test]
    fn errors_render_with_fixed_prefix() {
        let err = ToolError::ForbiddenPattern("rm -rf".to_string());
        assert_eq!(
            err.to_result(),
            "ERROR: Command contains forbidden pattern 'rm -rf'"
        );
    }

    #[test]
    fn invalid_input_names_the_tool() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Input {
            path: String,
        }
        let err = parse_input::<Input>("read_file", &serde_json::json!({"file": "x"})).unwrap_err();
        assert!(err.to_string().starts_with("Invalid input for tool 'read_file'"));
    }
}
