//! System prompt rendering for resolved roles.
//!
//! Rendering happens in two passes. Variable values may reference other
//! variables or `run_id`, so each value is rendered first; the prompt
//! template is then rendered against the resolved values.

use std::fs;
use std::path::{Path, PathBuf};

use minijinja::{Environment, path_loader};
use serde_json::Value;
use tracing::{debug, warn};

use crate::role::{RoleError, TemplateVars};

/// Prompt used when a role declares none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI agent.";

const SECTION_BREAK: &str = "\n\n---\n\n";

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    /// Engine for inline strings. Undefined names render empty.
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Engine that can load templates (and their includes) from `dir`.
    fn with_loader(dir: &Path) -> Self {
        let mut engine = Self::new();
        engine.env.set_loader(path_loader(dir));
        engine
    }

    fn render_str(&self, source: &str, ctx: &TemplateVars) -> Result<String, minijinja::Error> {
        self.env.render_str(source, ctx)
    }

    fn render_file(&self, name: &str, ctx: &TemplateVars) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(ctx)
    }
}

fn with_run_id(vars: &TemplateVars, run_id: &str) -> TemplateVars {
    let mut ctx = vars.clone();
    ctx.insert("run_id".to_string(), run_id.to_string());
    ctx
}

/// Stringify a YAML-sourced variable value. `null` becomes empty.
pub fn var_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pass 1: render every variable value that contains a template expression.
///
/// A value that fails to render keeps its raw literal.
pub fn resolve_vars(vars: &TemplateVars, run_id: &str) -> TemplateVars {
    let engine = PromptEngine::new();
    let ctx = with_run_id(vars, run_id);
    vars.iter()
        .map(|(key, raw)| {
            if !raw.contains("{{") {
                return (key.clone(), raw.clone());
            }
            let resolved = match engine.render_str(raw, &ctx) {
                Ok(rendered) => rendered,
                Err(err) => {
                    warn!(var = %key, err = %err, "template var failed to render, keeping literal");
                    raw.clone()
                }
            };
            (key.clone(), resolved)
        })
        .collect()
}

/// Render the merged `system_prompt` value.
///
/// A plain string is returned verbatim. A mapping renders its `template`
/// file relative to `role_dir`, or falls back to `inline`.
pub fn render_system_prompt(
    role_dir: &Path,
    spec: Option<&Value>,
    vars: &TemplateVars,
    run_id: &str,
) -> Result<String, RoleError> {
    let resolved = resolve_vars(vars, run_id);
    let ctx = with_run_id(&resolved, run_id);

    let spec = match spec {
        None | Some(Value::Null) => return Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
        Some(Value::String(literal)) => return Ok(literal.clone()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(RoleError::Template(format!(
                "system_prompt must be a string or mapping, got {other}"
            )));
        }
    };

    let Some(template_rel) = spec.get("template").and_then(Value::as_str) else {
        let inline = spec
            .get("inline")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        return Ok(inline.to_string());
    };

    let template_path = role_dir.join(template_rel);
    if !template_path.is_file() {
        return Err(RoleError::MissingFile {
            kind: "System prompt template",
            path: template_path,
        });
    }

    debug!(template = %template_path.display(), vars = ctx.len(), "rendering system prompt");
    PromptEngine::with_loader(role_dir)
        .render_file(template_rel, &ctx)
        .map_err(|err| RoleError::Template(format!("{err:#}")))
}

/// Render a one-off template string against `run_id` only.
pub fn render_run_template(source: &str, run_id: &str) -> Result<String, minijinja::Error> {
    PromptEngine::new().render_str(source, &with_run_id(&TemplateVars::new(), run_id))
}

/// Load rule file contents, relative to `role_dir`.
pub fn load_rules(role_dir: &Path, rules: &[String]) -> Result<Vec<String>, RoleError> {
    rules
        .iter()
        .map(|rel| read_reference(role_dir.join(rel), "Rule file"))
        .collect()
}

/// Load skill contents. A directory contributes its `SKILL.md`; a file is read as-is.
pub fn load_skills(role_dir: &Path, skills: &[String]) -> Result<Vec<String>, RoleError> {
    skills
        .iter()
        .map(|rel| {
            let full = role_dir.join(rel);
            if full.is_dir() {
                read_reference(full.join("SKILL.md"), "Skill SKILL.md")
            } else {
                read_reference(full, "Skill file")
            }
        })
        .collect()
}

fn read_reference(path: PathBuf, kind: &'static str) -> Result<String, RoleError> {
    if !path.is_file() {
        return Err(RoleError::MissingFile { kind, path });
    }
    fs::read_to_string(&path).map_err(|err| RoleError::Parse {
        path,
        message: err.to_string(),
    })
}

/// Append rule and skill texts as delimited sections.
pub fn append_sections(prompt: &str, rules: &[String], skills: &[String]) -> String {
    let mut out = prompt.to_string();
    if !rules.is_empty() {
        out.push_str(SECTION_BREAK);
        out.push_str("## Rules\n\n");
        out.push_str(&rules.join("\n\n"));
    }
    if !skills.is_empty() {
        out.push_str(SECTION_BREAK);
        out.push_str("## Skills\n\n");
        out.push_str(&skills.join("\n\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> TemplateVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn vars_may_reference_other_vars_and_run_id() {
        let resolved = resolve_vars(
            &vars(&[
                ("domain", "biology"),
                ("out", "workspace/{{ run_id }}/{{ domain }}.md"),
            ]),
            "run-1234",
        );
        assert_eq!(resolved["out"], "workspace/run-1234/biology.md");
        assert_eq!(resolved["domain"], "biology");
    }

    #[test]
    fn broken_var_expression_keeps_literal() {
        let resolved = resolve_vars(&vars(&[("bad", "{{ unclosed")]), "run-1");
        assert_eq!(resolved["bad"], "{{ unclosed");
    }

    #[test]
    fn undefined_references_render_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("prompt.j2"), "Hello {{ missing }}!\n").expect("write");
        let spec = json!({"template": "prompt.j2"});

        let rendered =
            render_system_prompt(temp.path(), Some(&spec), &TemplateVars::new(), "run-1")
                .expect("render");
        assert_eq!(rendered, "Hello !\n");
    }

    #[test]
    fn template_sees_resolved_vars_and_includes() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("footer.j2"), "run={{ run_id }}").expect("write");
        fs::write(
            temp.path().join("prompt.j2"),
            "Tone: {{ tone }}. {% include 'footer.j2' %}",
        )
        .expect("write");
        let spec = json!({"template": "prompt.j2"});

        let rendered = render_system_prompt(
            temp.path(),
            Some(&spec),
            &vars(&[("tone", "{{ 'dry' | upper }}")]),
            "run-9",
        )
        .expect("render");
        assert_eq!(rendered, "Tone: DRY. run=run-9");
    }

    #[test]
    fn string_and_inline_prompts_are_verbatim() {
        let dir = Path::new("/nonexistent");
        let literal = json!("Plain {{ not_rendered }}");
        assert_eq!(
            render_system_prompt(dir, Some(&literal), &TemplateVars::new(), "r").expect("render"),
            "Plain {{ not_rendered }}"
        );

        let inline = json!({"inline": "Inline prompt"});
        assert_eq!(
            render_system_prompt(dir, Some(&inline), &TemplateVars::new(), "r").expect("render"),
            "Inline prompt"
        );

        assert_eq!(
            render_system_prompt(dir, None, &TemplateVars::new(), "r").expect("render"),
            DEFAULT_SYSTEM_PROMPT
        );
    }

    #[test]
    fn missing_template_is_a_role_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = json!({"template": "nope.j2"});
        let err = render_system_prompt(temp.path(), Some(&spec), &TemplateVars::new(), "r")
            .unwrap_err();
        assert!(matches!(err, RoleError::MissingFile { .. }));
    }

    #[test]
    fn invalid_template_syntax_is_a_role_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("prompt.j2"), "{% if %}").expect("write");
        let spec = json!({"template": "prompt.j2"});
        let err = render_system_prompt(temp.path(), Some(&spec), &TemplateVars::new(), "r")
            .unwrap_err();
        assert!(matches!(err, RoleError::Template(_)));
    }

    #[test]
    fn skills_load_skill_md_from_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("skills/cite")).expect("mkdir");
        fs::write(temp.path().join("skills/cite/SKILL.md"), "Cite sources.").expect("write");
        fs::write(temp.path().join("extra.md"), "Extra skill.").expect("write");

        let loaded = load_skills(
            temp.path(),
            &["skills/cite".to_string(), "extra.md".to_string()],
        )
        .expect("load");
        assert_eq!(loaded, vec!["Cite sources.", "Extra skill."]);

        let err = load_skills(temp.path(), &["skills/missing".to_string()]).unwrap_err();
        assert!(matches!(err, RoleError::MissingFile { .. }));
    }

    #[test]
    fn sections_are_appended_with_delimiters() {
        let out = append_sections(
            "Base",
            &["Rule A".to_string(), "Rule B".to_string()],
            &["Skill".to_string()],
        );
        assert_eq!(
            out,
            "Base\n\n---\n\n## Rules\n\nRule A\n\nRule B\n\n---\n\n## Skills\n\nSkill"
        );
        assert_eq!(append_sections("Base", &[], &[]), "Base");
    }

    #[test]
    fn run_template_renders_output_paths() {
        let path = render_run_template("output/{{ run_id }}/report.md", "run-ab12").expect("render");
        assert_eq!(path, "output/run-ab12/report.md");
    }
}
