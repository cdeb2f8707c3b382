//! Role bundle loading: chain resolution, merge, schema check, rendering.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::core::merge::fold_layers;
use crate::core::path::normalize;
use crate::io::prompt::{append_sections, load_rules, load_skills, render_system_prompt, var_to_string};
use crate::role::{
    AutonomyConfig, ModelConfig, OrchestrationConfig, OutputConfig, RawOutput, ResolvedRole,
    RoleError, TemplateVars, ToolsConfig,
};

/// Maximum number of layers in a chain, including the requested role.
pub const MAX_INHERITANCE_DEPTH: usize = 3;

/// Definition file inside every role directory.
pub const ROLE_FILE: &str = "role.yml";

/// Role document schema (draft-07).
pub const ROLE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/role.schema.json"
));

/// Schema messages kept in a load-time schema error.
const SCHEMA_MESSAGES_SHOWN: usize = 3;

static ROLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+(/[A-Za-z0-9._-]+)*$").expect("role name regex is valid")
});

/// Compile the embedded role schema.
pub fn compile_role_schema() -> Result<Validator> {
    let schema: Value = serde_json::from_str(ROLE_SCHEMA).context("parse role schema")?;
    jsonschema::options()
        .with_draft(Draft::Draft7)
        .build(&schema)
        .context("compile role schema")
}

/// All violation messages for `document`, in schema order.
pub fn schema_violations(validator: &Validator, document: &Value) -> Vec<String> {
    validator
        .iter_errors(document)
        .map(|err| err.to_string())
        .collect()
}

/// True when any segment of the role name starts with `_`.
pub fn is_abstract(name: &str) -> bool {
    name.split('/').any(|segment| segment.starts_with('_'))
}

fn check_name(name: &str) -> Result<(), RoleError> {
    let valid = ROLE_NAME_RE.is_match(name)
        && name.split('/').all(|segment| segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(RoleError::InvalidName(name.to_string()))
    }
}

/// Parse one `role.yml`. Empty and non-mapping documents are rejected.
pub fn read_layer(role_dir: &Path) -> Result<Map<String, Value>, RoleError> {
    let path = role_dir.join(ROLE_FILE);
    if !path.is_file() {
        return Err(RoleError::MissingDefinition(path));
    }
    let contents = fs::read_to_string(&path).map_err(|err| RoleError::Parse {
        path: path.clone(),
        message: err.to_string(),
    })?;
    let value: Value = serde_yaml::from_str(&contents).map_err(|err| RoleError::Parse {
        path: path.clone(),
        message: err.to_string(),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Err(RoleError::Parse {
            path,
            message: "document is empty".to_string(),
        }),
        _ => Err(RoleError::Parse {
            path,
            message: "document must be a mapping".to_string(),
        }),
    }
}

/// One directory's contribution to an inheritance chain.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub dir: PathBuf,
    pub document: Map<String, Value>,
}

/// Layers ordered root ancestor first, requested role last.
#[derive(Debug, Clone)]
pub struct RoleChain {
    pub layers: Vec<Layer>,
}

impl RoleChain {
    /// Fold every layer through the deep merge.
    pub fn merged(&self) -> Map<String, Value> {
        fold_layers(self.layers.iter().map(|layer| &layer.document))
    }

    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name.as_str()).collect()
    }
}

/// Loads roles from a roles directory.
pub struct RoleLoader {
    roles_dir: PathBuf,
    allow_abstract: bool,
    schema: Validator,
}

impl RoleLoader {
    pub fn new(roles_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            roles_dir: roles_dir.into(),
            allow_abstract: false,
            schema: compile_role_schema()?,
        })
    }

    /// Permit loading `_`-prefixed roles directly.
    pub fn allow_abstract(mut self, allow: bool) -> Self {
        self.allow_abstract = allow;
        self
    }

    pub fn roles_dir(&self) -> &Path {
        &self.roles_dir
    }

    pub fn schema(&self) -> &Validator {
        &self.schema
    }

    /// Directory backing `name`, after name validation.
    pub fn role_dir(&self, name: &str) -> Result<PathBuf, RoleError> {
        check_name(name)?;
        Ok(self.roles_dir.join(name))
    }

    /// Walk `extends` from `name` up to the root.
    ///
    /// Cycle and depth checks run before the offending layer is read.
    pub fn resolve_chain(&self, name: &str) -> Result<RoleChain, RoleError> {
        let dir = self.role_dir(name)?;
        if !dir.is_dir() {
            return Err(RoleError::NotFound(dir));
        }

        let mut visited: Vec<PathBuf> = Vec::new();
        let mut layers = Vec::new();
        let mut current_name = name.to_string();
        let mut current_dir = dir;

        loop {
            let key = fs::canonicalize(&current_dir).unwrap_or_else(|_| normalize(&current_dir));
            if visited.contains(&key) {
                visited.push(key);
                return Err(RoleError::Cycle(visited));
            }
            if visited.len() >= MAX_INHERITANCE_DEPTH {
                visited.push(key);
                return Err(RoleError::DepthExceeded {
                    max: MAX_INHERITANCE_DEPTH,
                    chain: visited,
                });
            }
            visited.push(key);

            let document = read_layer(&current_dir)?;
            let parent = match document.get("extends") {
                None | Some(Value::Null) => None,
                Some(Value::String(parent)) => Some(parent.clone()),
                Some(_) => {
                    return Err(RoleError::Parse {
                        path: current_dir.join(ROLE_FILE),
                        message: "extends must be a role name".to_string(),
                    });
                }
            };
            layers.push(Layer {
                name: current_name,
                dir: current_dir,
                document,
            });

            let Some(parent) = parent else { break };
            let parent_dir = self.role_dir(&parent)?;
            if !parent_dir.is_dir() {
                return Err(RoleError::MissingParent {
                    name: parent,
                    expected: parent_dir,
                });
            }
            current_name = parent;
            current_dir = parent_dir;
        }

        layers.reverse();
        Ok(RoleChain { layers })
    }

    /// Resolve the chain and return the validated merged document.
    pub fn merged(&self, name: &str) -> Result<Map<String, Value>, RoleError> {
        let chain = self.resolve_chain(name)?;
        debug!(role = name, chain = ?chain.names(), "resolved inheritance chain");
        let merged = chain.merged();

        let violations = schema_violations(&self.schema, &Value::Object(merged.clone()));
        if !violations.is_empty() {
            return Err(RoleError::Schema {
                role: name.to_string(),
                messages: violations
                    .into_iter()
                    .take(SCHEMA_MESSAGES_SHOWN)
                    .collect::<Vec<_>>()
                    .join("; "),
            });
        }
        Ok(merged)
    }

    /// Load a fully resolved role.
    ///
    /// `extra_vars` override the role's own `system_prompt.vars`.
    #[instrument(skip(self, extra_vars), fields(roles_dir = %self.roles_dir.display()))]
    pub fn load(
        &self,
        name: &str,
        run_id: &str,
        extra_vars: &TemplateVars,
    ) -> Result<ResolvedRole, RoleError> {
        let role_dir = self.role_dir(name)?;
        if !role_dir.is_dir() {
            return Err(RoleError::NotFound(role_dir));
        }
        if is_abstract(name) && !self.allow_abstract {
            return Err(RoleError::Abstract(name.to_string()));
        }

        let merged = self.merged(name)?;

        let prompt_spec = merged.get("system_prompt");
        let mut vars: TemplateVars = prompt_spec
            .and_then(|spec| spec.get("vars"))
            .and_then(Value::as_object)
            .map(|vars| {
                vars.iter()
                    .map(|(key, value)| (key.clone(), var_to_string(value)))
                    .collect()
            })
            .unwrap_or_default();
        vars.extend(extra_vars.iter().map(|(k, v)| (k.clone(), v.clone())));

        let prompt = render_system_prompt(&role_dir, prompt_spec, &vars, run_id)?;

        let claude = merged.get("claude");
        let rules = load_rules(&role_dir, &string_list(claude, "rules"))?;
        let skills = load_skills(&role_dir, &string_list(claude, "skills"))?;
        let system_prompt = append_sections(&prompt, &rules, &skills);

        let model: ModelConfig = section(&merged, "model", name)?;
        let tools: ToolsConfig = section(&merged, "tools", name)?;
        let autonomy: AutonomyConfig = section(&merged, "autonomy", name)?;
        let raw_output: RawOutput = section(&merged, "output", name)?;
        let output = OutputConfig {
            format: raw_output.format,
            schema_path: raw_output
                .schema
                .map(|schema| normalize(&role_dir.join(schema))),
            destinations: raw_output.destinations,
        };
        let orchestration = match merged.get("orchestration") {
            Some(Value::Object(map)) if !map.is_empty() => {
                Some(section::<OrchestrationConfig>(&merged, "orchestration", name)?)
            }
            _ => None,
        };

        let display_name = merged
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();

        debug!(
            role = %display_name,
            model = %model.id,
            prompt_bytes = system_prompt.len(),
            "role loaded"
        );
        Ok(ResolvedRole {
            name: display_name,
            role_dir,
            model,
            system_prompt,
            tools,
            autonomy,
            output,
            orchestration,
            rules,
            skills,
            raw: Value::Object(merged),
        })
    }
}

/// Deserialize one merged section, applying defaults when it is absent.
fn section<T: DeserializeOwned + Default>(
    merged: &Map<String, Value>,
    key: &str,
    role: &str,
) -> Result<T, RoleError> {
    match merged.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|err| RoleError::Schema {
            role: role.to_string(),
            messages: format!("{key}: {err}"),
        }),
    }
}

fn string_list(section: Option<&Value>, key: &str) -> Vec<String> {
    section
        .and_then(|value| value.get(key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
