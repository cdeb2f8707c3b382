//! Operator-facing output on stdout.
//!
//! Everything printed here is product output, not diagnostics; it is not
//! filtered by `RUST_LOG`. Nested sessions indent by two spaces per level.

use std::io::{self, Write};

use serde_json::Value;

use crate::core::governor::Counters;

const TOOL_SUMMARY_MAX: usize = 80;
const TASK_PREVIEW_MAX: usize = 100;
const RULE_WIDTH: usize = 50;

/// Depth-aware stdout printer for one session.
#[derive(Debug, Clone, Copy)]
pub struct Console {
    depth: u32,
}

impl Console {
    pub fn new(depth: u32) -> Self {
        Self { depth }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn indent(&self) -> String {
        "  ".repeat(self.depth as usize)
    }

    /// Prefix every line of `msg` with the session indent.
    pub fn format(&self, msg: &str) -> String {
        let indent = self.indent();
        msg.lines()
            .map(|line| format!("{indent}{line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn line(&self, msg: &str) {
        emit(&mut io::stdout().lock(), &format!("{}\n", self.format(msg)));
    }

    /// Print `msg` without a trailing newline, for an inline answer.
    pub fn prompt(&self, msg: &str) {
        emit(&mut io::stdout().lock(), &format!("{} ", self.format(msg)));
    }

    /// Print a streamed chunk, indenting continuation lines.
    pub fn stream(&self, chunk: &str) {
        let text = if self.depth == 0 {
            chunk.to_string()
        } else {
            chunk.replace('\n', &format!("\n{}", self.indent()))
        };
        emit(&mut io::stdout().lock(), &text);
    }

    /// Terminate streamed text with a newline if it did not end with one.
    pub fn end_stream(&self, text: &str) {
        if !text.is_empty() && !text.ends_with('\n') {
            self.blank();
        }
    }

    fn blank(&self) {
        emit(&mut io::stdout().lock(), "\n");
    }

    pub fn tool_call(&self, name: &str, input: &Value) {
        self.blank();
        self.line(&format!("[tool: {name}({})]", summarize(input, TOOL_SUMMARY_MAX)));
    }

    pub fn spawn(&self, role: &str, task: &str) {
        self.blank();
        self.line(&format!("[spawning: {role}]"));
        self.line(&format!("  task: {}", preview(task, TASK_PREVIEW_MAX)));
        self.line(&format!("  {}", "─".repeat(RULE_WIDTH)));
    }

    /// Banner printed when a delegated session starts.
    pub fn header(&self, role: &str) {
        if self.depth > 0 {
            self.line(&format!("[agent: {role} (depth {})]", self.depth));
        }
    }

    /// Banner printed when a delegated session finishes.
    pub fn footer(&self, role: &str, counters: Counters) {
        if self.depth > 0 {
            self.line(&format!(
                "[agent: {role} done | {} tool calls | ${:.4}]",
                counters.tool_calls, counters.cost_usd
            ));
            self.line(&format!("  {}", "─".repeat(RULE_WIDTH)));
        }
    }
}

/// Write and flush `text`. Display only: a closed stdout must not abort the session.
fn emit(out: &mut impl Write, text: &str) {
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

/// Cap `text` at `max` characters, marking the cut with `...`.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max).collect();
    format!("{kept}...")
}

/// One-line summary of a tool input, capped at `max` characters including the ellipsis.
pub fn summarize(input: &Value, max: usize) -> String {
    let full = input.to_string();
    if full.chars().count() <= max {
        return full;
    }
    let kept: String = full.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn write_errors_are_swallowed() {
        emit(&mut ClosedPipe, "[tool: bash({})]\n");

        let mut buf = Vec::new();
        emit(&mut buf, "  [agent: writer (depth 1)]\n");
        assert_eq!(buf, b"  [agent: writer (depth 1)]\n");
    }

    #[test]
    fn nested_sessions_indent_every_line() {
        let console = Console::new(2);
        assert_eq!(console.format("a\nb"), "    a\n    b");
        assert_eq!(Console::new(0).format("a"), "a");
    }

    #[test]
    fn tool_summary_is_capped_at_eighty_chars() {
        let input = json!({"content": "x".repeat(200)});
        let summary = summarize(&input, TOOL_SUMMARY_MAX);
        assert_eq!(summary.chars().count(), 80);
        assert!(summary.ends_with("..."));

        let short = json!({"path": "a.md"});
        assert_eq!(summarize(&short, TOOL_SUMMARY_MAX), r#"{"path":"a.md"}"#);
    }

    #[test]
    fn task_preview_marks_cut() {
        assert_eq!(preview("short", 100), "short");
        let long = "y".repeat(150);
        let cut = preview(&long, 100);
        assert_eq!(cut.len(), 103);
        assert!(cut.ends_with("..."));
    }
}
