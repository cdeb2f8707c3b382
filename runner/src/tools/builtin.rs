//! Built-in tool bodies.
//!
//! Bodies assume the gate already ran its access checks; they only parse
//! input, do the work and bound the result size.

use std::env;
use std::fs;
use std::io::{self, Read};
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::core::types::ToolSpec;
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::role::{SPAWN_TOOL, TemplateVars};
use crate::tools::{DelegationRequest, Tool, ToolAccess, ToolContext, ToolError, parse_input};

const USER_AGENT: &str = concat!("tab/", env!("CARGO_PKG_VERSION"));
const EXA_KEY_ENV: &str = "EXA_API_KEY";
const EXA_QUERY_MAX_CHARS: usize = 500;
const EXA_EXCERPT_MAX_CHARS: usize = 500;

fn io_failure(path: &str, err: &io::Error) -> ToolError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        ToolError::Failed(format!("Permission denied: {path}"))
    } else {
        ToolError::Failed(format!("{path}: {err}"))
    }
}

/// Cut `text` to at most `limit` bytes on a char boundary.
fn truncate_bytes(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

pub struct BashTool;

#[derive(Deserialize)]
struct BashInput {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
}

/// Render captured output as `STDOUT`, `STDERR` and `EXIT CODE` sections.
pub fn format_command_output(output: &CommandOutput) -> String {
    let mut parts = Vec::new();
    let stdout = output.stdout_text();
    if !stdout.is_empty() {
        parts.push(format!("STDOUT:\n{}", stdout.trim_end()));
    }
    let stderr = output.stderr_text();
    if !stderr.is_empty() {
        parts.push(format!("STDERR:\n{}", stderr.trim_end()));
    }
    parts.push(format!("EXIT CODE: {}", output.status.code().unwrap_or(-1)));
    parts.join("\n")
}

impl Tool for BashTool {
    fn name(&self) -> &'static str {
        "bash"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name(),
            description: "Execute a bash command in a subprocess. Returns stdout, stderr, and exit \
                          code. Commands containing forbidden patterns are blocked.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The bash command to execute."},
                    "timeout": {"type": "integer", "description": "Timeout in seconds (default: 30).", "default": 30}
                },
                "required": ["command"]
            }),
        }
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Command { field: "command" }
    }

    fn run(&self, input: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let input: BashInput = parse_input(self.name(), input)?;
        let timeout = input
            .timeout
            .filter(|secs| *secs > 0)
            .unwrap_or(ctx.settings.bash_timeout_secs);

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&input.command).current_dir(ctx.root);
        let output = run_command_with_timeout(
            cmd,
            Duration::from_secs(timeout),
            ctx.settings.bash_output_limit_bytes,
        )
        .map_err(|err| ToolError::Failed(format!("{err:#}")))?;

        if output.timed_out {
            return Err(ToolError::Failed(format!(
                "Command timed out after {timeout}s"
            )));
        }
        Ok(format_command_output(&output))
    }
}

pub struct ReadFileTool;

#[derive(Deserialize)]
struct PathInput {
    path: String,
}

impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name(),
            description: "Read the contents of a file at the given path.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the file to read."}
                },
                "required": ["path"]
            }),
        }
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Path { field: "path" }
    }

    fn run(&self, input: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let input: PathInput = parse_input(self.name(), input)?;
        let path = ctx.resolve(&input.path);
        if !path.exists() {
            return Err(ToolError::Failed(format!("File not found: {}", input.path)));
        }
        if !path.is_file() {
            return Err(ToolError::Failed(format!("Not a file: {}", input.path)));
        }

        let bytes = fs::read(&path).map_err(|err| io_failure(&input.path, &err))?;
        let limit = ctx.settings.read_limit_bytes;
        if bytes.len() <= limit {
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        let mut content = String::from_utf8_lossy(&bytes[..limit]).into_owned();
        content.push_str(&format!(
            "\n\n[truncated: file is {} bytes, showing first {limit}]",
            bytes.len()
        ));
        Ok(content)
    }
}

pub struct WriteFileTool;

#[derive(Deserialize)]
struct WriteInput {
    path: String,
    content: String,
}

impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name(),
            description: "Write content to a file. Creates parent directories as needed. \
                          Overwrites if the file already exists.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to write to."},
                    "content": {"type": "string", "description": "Content to write."}
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Path { field: "path" }
    }

    fn run(&self, input: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let input: WriteInput = parse_input(self.name(), input)?;
        let path = ctx.resolve(&input.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| io_failure(&input.path, &err))?;
        }
        fs::write(&path, &input.content).map_err(|err| io_failure(&input.path, &err))?;
        debug!(path = %path.display(), bytes = input.content.len(), "file written");
        Ok(format!(
            "OK: Written {} bytes to {}",
            input.content.len(),
            input.path
        ))
    }
}

pub struct WebFetchTool;

#[derive(Deserialize)]
struct FetchInput {
    url: String,
    #[serde(default)]
    timeout: Option<u64>,
}

impl Tool for WebFetchTool {
    fn name(&self) -> &'static str {
        "web_fetch"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name(),
            description: "Fetch the content of a URL via HTTP GET. Returns the response body as \
                          text (truncated at 200 KB).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to fetch."},
                    "timeout": {"type": "integer", "description": "Timeout in seconds (default: 15).", "default": 15}
                },
                "required": ["url"]
            }),
        }
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Open
    }

    fn run(&self, input: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let input: FetchInput = parse_input(self.name(), input)?;
        let timeout = input
            .timeout
            .filter(|secs| *secs > 0)
            .unwrap_or(ctx.settings.fetch_timeout_secs);
        let limit = ctx.settings.fetch_limit_bytes;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ToolError::Failed(err.to_string()))?;
        let response = client.get(&input.url).send().map_err(|err| {
            if err.is_timeout() {
                ToolError::Failed(format!("Request timed out after {timeout}s"))
            } else {
                ToolError::Failed(format!("URL error: {err}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }

        let mut raw = Vec::new();
        response
            .take(limit as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(|err| ToolError::Failed(format!("read body: {err}")))?;
        if raw.len() <= limit {
            return Ok(String::from_utf8_lossy(&raw).into_owned());
        }
        let mut text = String::from_utf8_lossy(&raw[..limit]).into_owned();
        text.push_str(&format!("\n\n[truncated at {} KB]", limit / 1024));
        Ok(text)
    }
}

pub struct ExaSearchTool;

#[derive(Deserialize)]
struct SearchInput {
    query: String,
    #[serde(default)]
    num_results: Option<i64>,
    #[serde(default)]
    include_text: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExaResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Clamp a requested result count to 1..=10, defaulting to 5.
pub fn clamp_num_results(requested: Option<i64>) -> u32 {
    requested.unwrap_or(5).clamp(1, 10) as u32
}

/// Render search results as a numbered list, bounded to `limit` bytes.
pub fn format_search_results(
    query: &str,
    results: &[ExaResult],
    include_text: bool,
    limit: usize,
) -> String {
    let mut blocks = vec![format!("EXA search results for: {query:?}\n")];
    for (i, result) in results.iter().enumerate() {
        let title = result.title.as_deref().unwrap_or("(no title)");
        let mut block = format!("{}. {title}\n   URL: {}", i + 1, result.url);
        if let Some(date) = &result.published_date {
            block.push_str(&format!("\n   Published: {date}"));
        }
        if include_text && let Some(text) = &result.text {
            let excerpt: String = text.chars().take(EXA_EXCERPT_MAX_CHARS).collect();
            block.push_str(&format!("\n   Excerpt: {excerpt}"));
        }
        blocks.push(block);
    }
    let mut output = blocks.join("\n\n");
    if output.len() > limit {
        truncate_bytes(&mut output, limit);
        output.push_str(&format!("\n\n[truncated at {} KB]", limit / 1024));
    }
    output
}

impl Tool for ExaSearchTool {
    fn name(&self) -> &'static str {
        "exa_search"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name(),
            description: "Search the web using EXA AI's semantic search engine. Returns a ranked \
                          list of relevant URLs with titles and published dates. Use this to \
                          discover authoritative sources before fetching full content with \
                          web_fetch. Requires EXA_API_KEY to be set in the environment.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Natural-language search query (max 500 characters)."},
                    "num_results": {"type": "integer", "description": "Number of results to return (1-10, default 5).", "default": 5},
                    "include_text": {
                        "type": "boolean",
                        "description": "If true, include a short text excerpt from each result page.",
                        "default": false
                    }
                },
                "required": ["query"]
            }),
        }
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Open
    }

    fn run(&self, input: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let api_key = env::var(EXA_KEY_ENV).unwrap_or_default();
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ToolError::Failed(format!("{EXA_KEY_ENV} is not set")));
        }

        let input: SearchInput = parse_input(self.name(), input)?;
        let query = input.query.trim();
        if query.is_empty() {
            return Err(ToolError::Failed("query cannot be empty".to_string()));
        }
        if query.chars().count() > EXA_QUERY_MAX_CHARS {
            return Err(ToolError::Failed(format!(
                "query exceeds {EXA_QUERY_MAX_CHARS}-character limit"
            )));
        }
        let num_results = clamp_num_results(input.num_results);

        let mut body = json!({"query": query, "numResults": num_results, "type": "auto"});
        if input.include_text {
            body["contents"] = json!({"text": true});
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(ctx.settings.fetch_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ToolError::Failed(err.to_string()))?;
        // The key never appears in results or errors.
        let response = client
            .post(&ctx.settings.exa_endpoint)
            .header("x-api-key", api_key)
            .json(&body)
            .send()
            .map_err(|err| ToolError::Failed(format!("EXA search failed: {}", err.without_url())))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "EXA search failed: HTTP {}",
                status.as_u16()
            )));
        }
        let parsed: ExaResponse = response
            .json()
            .map_err(|err| ToolError::Failed(format!("EXA search failed: {err}")))?;

        Ok(format_search_results(
            query,
            &parsed.results,
            input.include_text,
            ctx.settings.fetch_limit_bytes,
        ))
    }
}

pub struct SpawnAgentTool;

#[derive(Deserialize)]
struct SpawnInput {
    role: String,
    task: String,
    #[serde(default)]
    vars: Option<TemplateVars>,
}

impl Tool for SpawnAgentTool {
    fn name(&self) -> &'static str {
        SPAWN_TOOL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name(),
            description: "Spawn a sub-agent with a specified role to complete a delegated task. \
                          The sub-agent runs independently and returns its final output. Use \
                          this to delegate research, writing, or other specialist work.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "role": {"type": "string", "description": "Role name to instantiate (e.g. 'researcher', 'writer')."},
                    "task": {"type": "string", "description": "Full task description for the sub-agent. Be specific."},
                    "vars": {
                        "type": "object",
                        "description": "Optional extra template vars injected into the sub-agent's system prompt.",
                        "additionalProperties": {"type": "string"}
                    }
                },
                "required": ["role", "task"]
            }),
        }
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Delegation { field: "role" }
    }

    fn run(&self, input: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let input: SpawnInput = parse_input(self.name(), input)?;
        let delegate = ctx.delegate.ok_or_else(|| {
            ToolError::Failed("spawn_agent not available (no delegate configured)".to_string())
        })?;
        delegate.delegate(DelegationRequest {
            role: input.role,
            task: input.task,
            vars: input.vars.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::ToolSettings;

    fn ctx<'a>(root: &'a std::path::Path, settings: &'a ToolSettings) -> ToolContext<'a> {
        ToolContext {
            root,
            settings,
            delegate: None,
        }
    }

    #[test]
    fn bash_reports_streams_and_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = ToolSettings::default();
        let out = BashTool
            .run(
                &json!({"command": "echo hi; echo oops >&2; exit 2"}),
                &ctx(temp.path(), &settings),
            )
            .expect("run");
        assert_eq!(out, "STDOUT:\nhi\nSTDERR:\noops\nEXIT CODE: 2");
    }

    #[test]
    fn bash_runs_in_project_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("marker.txt"), "x").expect("write");
        let settings = ToolSettings::default();
        let out = BashTool
            .run(&json!({"command": "ls"}), &ctx(temp.path(), &settings))
            .expect("run");
        assert!(out.contains("marker.txt"), "{out}");
    }

    #[test]
    fn write_then_read_relative_to_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = ToolSettings::default();
        let context = ctx(temp.path(), &settings);

        let written = WriteFileTool
            .run(
                &json!({"path": "workspace/notes/a.md", "content": "hello"}),
                &context,
            )
            .expect("write");
        assert_eq!(written, "OK: Written 5 bytes to workspace/notes/a.md");

        let read = ReadFileTool
            .run(&json!({"path": "workspace/notes/a.md"}), &context)
            .expect("read");
        assert_eq!(read, "hello");
    }

    #[test]
    fn read_truncates_large_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("big.txt"), "abcdefghij").expect("write");
        let settings = ToolSettings {
            read_limit_bytes: 4,
            ..ToolSettings::default()
        };
        let read = ReadFileTool
            .run(&json!({"path": "big.txt"}), &ctx(temp.path(), &settings))
            .expect("read");
        assert_eq!(read, "abcd\n\n[truncated: file is 10 bytes, showing first 4]");
    }

    #[test]
    fn read_missing_file_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = ToolSettings::default();
        let err = ReadFileTool
            .run(&json!({"path": "nope.md"}), &ctx(temp.path(), &settings))
            .unwrap_err();
        assert_eq!(err.to_result(), "ERROR: File not found: nope.md");
    }

    #[test]
    fn spawn_without_delegate_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = ToolSettings::default();
        let err = SpawnAgentTool
            .run(
                &json!({"role": "writer", "task": "t"}),
                &ctx(temp.path(), &settings),
            )
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }

    #[test]
    fn num_results_is_clamped() {
        assert_eq!(clamp_num_results(None), 5);
        assert_eq!(clamp_num_results(Some(0)), 1);
        assert_eq!(clamp_num_results(Some(50)), 10);
        assert_eq!(clamp_num_results(Some(-3)), 1);
    }

    #[test]
    fn search_results_are_numbered_with_optional_excerpts() {
        let results = vec![
            ExaResult {
                title: Some("Rust Book".to_string()),
                url: "https://doc.rust-lang.org/book/".to_string(),
                published_date: Some("2024-01-01".to_string()),
                text: Some("Ownership".to_string()),
            },
            ExaResult {
                url: "https://example.com".to_string(),
                ..ExaResult::default()
            },
        ];
        let out = format_search_results("rust", &results, true, 10_000);
        assert_eq!(
            out,
            "EXA search results for: \"rust\"\n\n\n1. Rust Book\n   URL: https://doc.rust-lang.org/book/\n   Published: 2024-01-01\n   Excerpt: Ownership\n\n2. (no title)\n   URL: https://example.com"
        );

        let bounded = format_search_results("rust", &results, false, 20);
        assert!(bounded.ends_with("[truncated at 0 KB]"));
    }
}
