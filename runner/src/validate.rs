//! Role bundle validation for `tab validate`.
//!
//! Unlike [`RoleLoader::load`], validation collects every defect of a bundle
//! instead of stopping at the first one, and it never renders templates.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::io::role_loader::{ROLE_FILE, RoleLoader, is_abstract, read_layer, schema_violations};
use crate::role::RoleError;

const RULE_WIDTH: usize = 60;

/// Result of validating one role bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// Abstract role checked without `--allow-abstract`.
    Skipped,
    Failed(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleReport {
    pub name: String,
    pub outcome: Outcome,
}

impl RoleReport {
    pub fn passed(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed(_))
    }
}

/// Every bundle under `roles_dir`, sorted.
///
/// `_`-prefixed directories are namespaces: their child directories are
/// listed instead of the directory itself.
pub fn discover_roles(roles_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for dir_name in sorted_subdirs(roles_dir)? {
        if dir_name.starts_with('_') {
            let namespace = roles_dir.join(&dir_name);
            for child in sorted_subdirs(&namespace)? {
                names.push(format!("{dir_name}/{child}"));
            }
        } else {
            names.push(dir_name);
        }
    }
    Ok(names)
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        if entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Map a CLI argument (`researcher`, `roles/researcher/`) to a role name.
pub fn role_name_from_arg(roles_dir: &Path, arg: &str) -> String {
    let trimmed = arg.trim_end_matches('/');
    let path = Path::new(trimmed);
    if let Ok(rel) = path.strip_prefix(roles_dir) {
        return rel.to_string_lossy().into_owned();
    }
    if let Some(dir_name) = roles_dir.file_name()
        && let Ok(rel) = path.strip_prefix(dir_name)
    {
        return rel.to_string_lossy().into_owned();
    }
    trimmed.to_string()
}

/// Run every check against one bundle.
pub fn validate_role(loader: &RoleLoader, name: &str, allow_abstract: bool) -> RoleReport {
    let report = |outcome| RoleReport {
        name: name.to_string(),
        outcome,
    };

    if is_abstract(name) && !allow_abstract {
        return report(Outcome::Skipped);
    }

    let role_dir = match loader.role_dir(name) {
        Ok(dir) => dir,
        Err(err) => return report(Outcome::Failed(vec![err.to_string()])),
    };
    if !role_dir.is_dir() {
        return report(Outcome::Failed(vec![
            RoleError::NotFound(role_dir).to_string(),
        ]));
    }
    if let Err(err) = read_layer(&role_dir) {
        return report(Outcome::Failed(vec![err.to_string()]));
    }

    let mut errors = Vec::new();
    match loader.resolve_chain(name) {
        Ok(chain) => {
            for layer in &chain.layers {
                let document = Value::Object(layer.document.clone());
                errors.extend(
                    schema_violations(loader.schema(), &document)
                        .into_iter()
                        .map(|message| format!("Schema violation in '{}': {message}", layer.name)),
                );
            }
            let merged = Value::Object(chain.merged());
            errors.extend(missing_references(&role_dir, &merged));
            debug!(role = name, chain = ?chain.names(), "chain resolved");
        }
        Err(err) => errors.push(err.to_string()),
    }

    if errors.is_empty() {
        report(Outcome::Passed)
    } else {
        report(Outcome::Failed(errors))
    }
}

/// Files named by the document that do not exist under `role_dir`.
pub fn missing_references(role_dir: &Path, document: &Value) -> Vec<String> {
    let mut refs: Vec<(String, String)> = Vec::new();

    if let Some(template) = document
        .pointer("/system_prompt/template")
        .and_then(Value::as_str)
    {
        refs.push(("system_prompt.template".to_string(), template.to_string()));
    }
    for key in ["skills", "commands", "rules"] {
        for entry in strings_at(document, &format!("/claude/{key}")) {
            refs.push((format!("claude.{key}"), entry));
        }
    }
    if let Some(hooks) = document.pointer("/claude/hooks").and_then(Value::as_array) {
        for hook in hooks {
            if let Some(script) = hook.get("script").and_then(Value::as_str) {
                let event = hook.get("event").and_then(Value::as_str).unwrap_or("?");
                refs.push((format!("claude.hooks[{event}].script"), script.to_string()));
            }
        }
    }
    if let Some(schema) = document.pointer("/output/schema").and_then(Value::as_str) {
        refs.push(("output.schema".to_string(), schema.to_string()));
    }

    refs.into_iter()
        .filter(|(_, rel)| !role_dir.join(rel).exists())
        .map(|(field, rel)| format!("Referenced file not found [{field}]: {rel}"))
        .collect()
}

fn strings_at(document: &Value, pointer: &str) -> Vec<String> {
    document
        .pointer(pointer)
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

/// Validate `names` (or every discovered bundle with `all`) and print a report.
///
/// Returns `true` when no bundle failed.
pub fn run_validate(
    roles_dir: &Path,
    names: &[String],
    all: bool,
    allow_abstract: bool,
) -> Result<bool> {
    let loader = RoleLoader::new(roles_dir)?.allow_abstract(true);
    let targets = if all {
        discover_roles(roles_dir)?
    } else {
        names
            .iter()
            .map(|arg| role_name_from_arg(roles_dir, arg))
            .collect()
    };
    anyhow::ensure!(!targets.is_empty(), "no roles to validate; pass role names or --all");

    let reports: Vec<RoleReport> = targets
        .iter()
        .map(|name| validate_role(&loader, name, allow_abstract))
        .collect();
    for report in &reports {
        print_report(report);
    }
    print_summary(&reports);
    Ok(reports.iter().all(RoleReport::passed))
}

fn print_report(report: &RoleReport) {
    println!("\n{}", "─".repeat(RULE_WIDTH));
    println!("Validating: {}", report.name);
    println!("{}", "─".repeat(RULE_WIDTH));
    match &report.outcome {
        Outcome::Passed => println!("  ✓ All checks passed"),
        Outcome::Skipped => {
            println!("  ⚠ Skipped (abstract role, use --allow-abstract to validate)");
        }
        Outcome::Failed(errors) => {
            for error in errors {
                println!("  ✗ {error}");
            }
            println!("\n  RESULT: FAILED ({} error(s))", errors.len());
        }
    }
}

fn print_summary(reports: &[RoleReport]) {
    println!("\n{}", "═".repeat(RULE_WIDTH));
    println!("SUMMARY");
    println!("{}", "═".repeat(RULE_WIDTH));
    for report in reports {
        let status = if report.passed() { "✓ PASS" } else { "✗ FAIL" };
        println!("  {status}  {}", report.name);
    }
    let passed = reports.iter().filter(|report| report.passed()).count();
    println!("\n{passed}/{} roles passed.", reports.len());
}

/// Starter bundle written by `tab init`.
pub const STARTER_ROLE: &str = "\
name: assistant
description: General-purpose starter role.
model:
  id: claude-sonnet-4-5-20250929
system_prompt:
  inline: You are a careful assistant. Keep your files under ./workspace.
tools:
  allow: [read_file, write_file, bash]
autonomy:
  max_tool_calls: 25
  max_cost_usd: 0.50
  allowed_paths: [\"./workspace/**\"]
";

/// Write the starter role `roles_dir/assistant/role.yml`.
pub fn write_starter_role(roles_dir: &Path, force: bool) -> Result<bool> {
    let path = roles_dir.join("assistant").join(ROLE_FILE);
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, STARTER_ROLE).with_context(|| format!("write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestBundle;

    #[test]
    fn namespace_directories_expand_to_children() {
        let bundle = TestBundle::new();
        bundle.role("_base/agent", "name: agent\n");
        bundle.role("_base/critic", "name: critic\n");
        bundle.role("writer", "extends: _base/agent\n");

        let names = discover_roles(&bundle.roles_dir()).expect("discover");
        assert_eq!(names, vec!["_base/agent", "_base/critic", "writer"]);
    }

    #[test]
    fn abstract_role_is_skipped_unless_allowed() {
        let bundle = TestBundle::new();
        bundle.role("_base/agent", "name: agent\n");
        let loader = bundle.loader().allow_abstract(true);

        assert_eq!(
            validate_role(&loader, "_base/agent", false).outcome,
            Outcome::Skipped
        );
        assert_eq!(
            validate_role(&loader, "_base/agent", true).outcome,
            Outcome::Passed
        );
    }

    #[test]
    fn collects_schema_and_reference_errors_together() {
        let bundle = TestBundle::new();
        bundle.role(
            "broken",
            "model:\n  temperature: 3\nsystem_prompt:\n  template: missing.j2\nclaude:\n  rules: [rules/none.md]\n",
        );

        let report = validate_role(&bundle.loader(), "broken", false);
        let Outcome::Failed(errors) = report.outcome else {
            panic!("expected failure");
        };
        assert!(errors.iter().any(|e| e.starts_with("Schema violation in 'broken'")));
        assert!(errors.contains(&"Referenced file not found [system_prompt.template]: missing.j2".to_string()));
        assert!(errors.contains(&"Referenced file not found [claude.rules]: rules/none.md".to_string()));
    }

    #[test]
    fn inherited_references_resolve_against_the_requested_role() {
        let bundle = TestBundle::new();
        bundle.role("base", "system_prompt:\n  template: prompt.j2\n");
        bundle.role("child", "extends: base\n");
        bundle.file("child/prompt.j2", "hello");

        let report = validate_role(&bundle.loader(), "child", false);
        assert_eq!(report.outcome, Outcome::Passed);
    }

    #[test]
    fn missing_parent_and_definition_fail() {
        let bundle = TestBundle::new();
        bundle.role("orphan", "extends: ghost\n");
        fs::create_dir_all(bundle.roles_dir().join("empty")).expect("mkdir");
        let loader = bundle.loader();

        assert!(!validate_role(&loader, "orphan", false).passed());
        let report = validate_role(&loader, "empty", false);
        assert!(
            matches!(&report.outcome, Outcome::Failed(errors) if errors[0].starts_with("role.yml not found")),
            "{report:?}"
        );
    }

    #[test]
    fn cli_paths_map_to_role_names() {
        let roles = Path::new("/project/roles");
        assert_eq!(role_name_from_arg(roles, "roles/researcher/"), "researcher");
        assert_eq!(role_name_from_arg(roles, "/project/roles/_base/agent"), "_base/agent");
        assert_eq!(role_name_from_arg(roles, "writer"), "writer");
    }

    #[test]
    fn starter_role_is_valid() {
        let bundle = TestBundle::new();
        assert!(write_starter_role(&bundle.roles_dir(), false).expect("write"));
        assert!(!write_starter_role(&bundle.roles_dir(), false).expect("second write"));

        let report = validate_role(&bundle.loader(), "assistant", false);
        assert_eq!(report.outcome, Outcome::Passed);
    }
}
