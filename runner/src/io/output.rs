//! Delivery of a session's final result to its configured destinations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::core::path::anchor;
use crate::io::console::Console;
use crate::io::prompt::render_run_template;
use crate::role::{Destination, OutputConfig};

/// Outcome of checking a structured result against its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaCheck {
    Passed,
    NotJson,
    Failed(String),
}

/// Write `result` to every file destination. Returns the written paths.
///
/// Stdout destinations were already streamed and are skipped. An empty
/// result writes nothing. Schema problems are reported, never fatal.
pub fn deliver(
    output: &OutputConfig,
    result: &str,
    run_id: &str,
    root: &Path,
    console: &Console,
) -> Result<Vec<PathBuf>> {
    if result.is_empty() {
        return Ok(Vec::new());
    }

    let mut written = Vec::new();
    for destination in &output.destinations {
        let Destination::File { path } = destination else {
            continue;
        };
        if path.trim().is_empty() {
            continue;
        }
        let rendered = render_run_template(path, run_id)
            .with_context(|| format!("render output path {path}"))?;
        let out_path = anchor(root, Path::new(&rendered));
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
        fs::write(&out_path, result)
            .with_context(|| format!("write output {}", out_path.display()))?;
        let shown = out_path.strip_prefix(root).unwrap_or(&out_path);
        console.line(&format!("[output] Written to {}", shown.display()));
        info!(path = %out_path.display(), bytes = result.len(), "output written");
        written.push(out_path);
    }

    if output.is_structured()
        && let Some(schema_path) = &output.schema_path
    {
        match check_structured(result, schema_path) {
            SchemaCheck::Passed => console.line("[output] Schema validation passed"),
            SchemaCheck::NotJson => {
                warn!("structured output is not valid JSON");
                console.line("[output] WARNING: Output is not valid JSON, skipping schema validation");
            }
            SchemaCheck::Failed(message) => {
                warn!(message = %message, "structured output failed schema validation");
                console.line(&format!("[output] WARNING: Schema validation failed: {message}"));
            }
        }
    }

    Ok(written)
}

/// Validate `result` as JSON against the schema file at `schema_path`.
pub fn check_structured(result: &str, schema_path: &Path) -> SchemaCheck {
    let Ok(instance) = serde_json::from_str::<Value>(result) else {
        return SchemaCheck::NotJson;
    };
    let schema = match fs::read_to_string(schema_path)
        .map_err(|err| err.to_string())
        .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(|err| err.to_string()))
    {
        Ok(schema) => schema,
        Err(err) => {
            return SchemaCheck::Failed(format!(
                "cannot read schema {}: {err}",
                schema_path.display()
            ));
        }
    };
    let validator = match jsonschema::validator_for(&schema) {
        Ok(validator) => validator,
        Err(err) => return SchemaCheck::Failed(format!("invalid schema: {err}")),
    };
    match validator.iter_errors(&instance).next() {
        None => SchemaCheck::Passed,
        Some(err) => SchemaCheck::Failed(err.to_string()),
    }
}
