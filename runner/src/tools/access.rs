//! Tool access control.
//!
//! The gate owns one session's view of its role's tool policy. Every check
//! runs before a tool body is reached, and every failure except an autonomy
//! halt comes back as an `ERROR: ` result string.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::governor::{AutonomyHalt, MAX_SPAWN_DEPTH};
use crate::core::path::{PathPolicy, anchor};
use crate::core::types::{ToolCall, ToolSpec};
use crate::io::config::ToolSettings;
use crate::role::{OrchestrationConfig, ResolvedRole};
use crate::tools::{Delegate, Tool, ToolAccess, ToolContext, ToolError, ToolRegistry};

/// Resolve `raw` against `root` and follow symlinks of its deepest existing ancestor.
///
/// Missing trailing components are kept lexically, so paths about to be
/// created are checked where they will land.
pub fn resolve_for_policy(root: &Path, raw: &str) -> PathBuf {
    let lexical = anchor(root, Path::new(raw));
    let mut existing = lexical.clone();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(mut resolved) = fs::canonicalize(&existing) {
            resolved.extend(missing.iter().rev());
            return resolved;
        }
        let Some(name) = existing.file_name().map(OsStr::to_os_string) else {
            return lexical;
        };
        missing.push(name);
        if !existing.pop() {
            return lexical;
        }
    }
}

/// Effective tool set of one role plus its path policy.
pub struct ToolGate<'a> {
    registry: &'a ToolRegistry,
    settings: &'a ToolSettings,
    root: &'a Path,
    role_name: String,
    effective: Vec<String>,
    deny: Vec<String>,
    allowed_paths: Vec<String>,
    forbidden_patterns: Vec<String>,
    orchestration: Option<OrchestrationConfig>,
    policy: PathPolicy,
    depth: u32,
    spawned: u32,
}

impl<'a> ToolGate<'a> {
    pub fn new(
        registry: &'a ToolRegistry,
        settings: &'a ToolSettings,
        root: &'a Path,
        role: &ResolvedRole,
        depth: u32,
    ) -> Self {
        Self {
            registry,
            settings,
            root,
            role_name: role.name.clone(),
            effective: role.effective_tools(),
            deny: role.tools.deny.clone(),
            allowed_paths: role.autonomy.allowed_paths.clone(),
            forbidden_patterns: role.autonomy.forbidden_patterns.clone(),
            orchestration: role.orchestration.clone(),
            policy: PathPolicy::new(root, &role.autonomy.allowed_paths),
            depth,
            spawned: 0,
        }
    }

    /// Catalog for the model. Names the registry does not know are omitted.
    pub fn catalog(&self) -> Vec<ToolSpec> {
        self.effective
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    pub fn effective_tools(&self) -> &[String] {
        &self.effective
    }

    /// Sub-agents started through this gate so far.
    pub fn spawned(&self) -> u32 {
        self.spawned
    }

    /// Run one call. Only an autonomy halt escapes as an error.
    pub fn execute(
        &mut self,
        call: &ToolCall,
        delegate: Option<&dyn Delegate>,
    ) -> Result<String, AutonomyHalt> {
        match self.try_execute(call, delegate) {
            Ok(result) => Ok(result),
            Err(ToolError::Halt(halt)) => Err(halt),
            Err(err) => {
                debug!(tool = %call.name, err = %err, "tool call failed");
                Ok(err.to_result())
            }
        }
    }

    fn try_execute(
        &mut self,
        call: &ToolCall,
        delegate: Option<&dyn Delegate>,
    ) -> Result<String, ToolError> {
        if self.deny.contains(&call.name) {
            return Err(ToolError::Denied {
                tool: call.name.clone(),
                role: self.role_name.clone(),
            });
        }
        let registry = self.registry;
        let Some(tool) = registry.get(&call.name) else {
            return Err(ToolError::Unknown(call.name.clone()));
        };
        if !self.effective.contains(&call.name) {
            return Err(ToolError::NotEnabled {
                tool: call.name.clone(),
                role: self.role_name.clone(),
            });
        }

        self.check_access(tool, &call.input)?;

        let ctx = ToolContext {
            root: self.root,
            settings: self.settings,
            delegate,
        };
        let result = tool.run(&call.input, &ctx);
        if matches!(tool.access(), ToolAccess::Delegation { .. }) && child_started(&result) {
            self.spawned += 1;
        }
        result
    }

    fn check_access(&mut self, tool: &dyn Tool, input: &Value) -> Result<(), ToolError> {
        match tool.access() {
            ToolAccess::Open => Ok(()),
            ToolAccess::Path { field } => {
                let raw = string_field(tool, input, field)?;
                let resolved = resolve_for_policy(self.root, raw);
                if self.policy.allows(&resolved) {
                    Ok(())
                } else {
                    warn!(tool = tool.name(), path = raw, "path outside allowed_paths");
                    Err(ToolError::PathNotAllowed {
                        path: raw.to_string(),
                        allowed: self.allowed_paths.clone(),
                    })
                }
            }
            ToolAccess::Command { field } => {
                let command = string_field(tool, input, field)?;
                match self
                    .forbidden_patterns
                    .iter()
                    .find(|pattern| command.contains(pattern.as_str()))
                {
                    Some(pattern) => {
                        warn!(tool = tool.name(), pattern = %pattern, "forbidden pattern blocked");
                        Err(ToolError::ForbiddenPattern(pattern.clone()))
                    }
                    None => Ok(()),
                }
            }
            ToolAccess::Delegation { field } => {
                let target = string_field(tool, input, field)?;
                self.check_delegation(target)?;
                info!(role = target, depth = self.depth + 1, "delegation admitted");
                Ok(())
            }
        }
    }

    /// Depth is checked first, independent of the spawn allow-list.
    fn check_delegation(&self, target: &str) -> Result<(), ToolError> {
        if self.depth >= MAX_SPAWN_DEPTH {
            return Err(ToolError::DepthCeiling {
                max: MAX_SPAWN_DEPTH,
                target: target.to_string(),
            });
        }
        let Some(orchestration) = &self.orchestration else {
            return Err(ToolError::SpawnNotAllowed {
                role: self.role_name.clone(),
                target: target.to_string(),
                allowed: Vec::new(),
            });
        };
        if !orchestration.can_spawn.iter().any(|name| name == target) {
            return Err(ToolError::SpawnNotAllowed {
                role: self.role_name.clone(),
                target: target.to_string(),
                allowed: orchestration.can_spawn.clone(),
            });
        }
        if self.spawned >= orchestration.max_sub_agents {
            return Err(ToolError::SubAgentLimit {
                role: self.role_name.clone(),
                max: orchestration.max_sub_agents,
            });
        }
        Ok(())
    }
}

/// A delegation that never got as far as a child session does not use a slot.
fn child_started(result: &Result<String, ToolError>) -> bool {
    !matches!(
        result,
        Err(ToolError::RoleLoad { .. } | ToolError::InvalidInput { .. })
    )
}

fn string_field<'v>(tool: &dyn Tool, input: &'v Value, field: &str) -> Result<&'v str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput {
            tool: tool.name().to_string(),
            message: format!("missing string field '{field}'"),
        })
}
