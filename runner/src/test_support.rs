//! Test-only helpers: throwaway role bundles and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::{Message, ModelTurn, TokenUsage, ToolCall, TurnStatus};
use crate::io::checkpoint::Checkpoint;
use crate::io::console::Console;
use crate::io::role_loader::{ROLE_FILE, RoleLoader};
use crate::io::transport::{ModelRequest, ModelTransport};

/// A temporary project root with a `roles/` directory.
pub struct TestBundle {
    _temp: TempDir,
    root: PathBuf,
}

impl TestBundle {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        // Canonical so symlinked temp dirs compare equal to resolved paths.
        let root = temp.path().canonicalize().expect("canonical tempdir");
        fs::create_dir_all(root.join("roles")).expect("create roles dir");
        Self { _temp: temp, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn roles_dir(&self) -> PathBuf {
        self.root.join("roles")
    }

    /// Write `roles/<name>/role.yml`.
    pub fn role(&self, name: &str, yaml: &str) {
        self.file(&format!("{name}/{ROLE_FILE}"), yaml);
    }

    /// Write a file relative to `roles/`.
    pub fn file(&self, rel: &str, contents: &str) {
        let path = self.roles_dir().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, contents).expect("write file");
    }

    pub fn loader(&self) -> RoleLoader {
        RoleLoader::new(self.roles_dir()).expect("role loader")
    }
}

impl Default for TestBundle {
    fn default() -> Self {
        Self::new()
    }
}

/// What a [`ScriptedTransport`] saw for one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub tools: Vec<String>,
    pub messages: Vec<Message>,
}

/// Replays queued turns in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    turns: RefCell<VecDeque<ModelTurn>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: RefCell::new(turns.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.turns.borrow().len()
    }
}

impl ModelTransport for ScriptedTransport {
    fn submit(&self, request: &ModelRequest<'_>, on_text: &mut dyn FnMut(&str)) -> Result<ModelTurn> {
        self.requests.borrow_mut().push(RecordedRequest {
            system: request.system.to_string(),
            tools: request.tools.iter().map(|tool| tool.name.to_string()).collect(),
            messages: request.messages.to_vec(),
        });
        let turn = self
            .turns
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted transport exhausted"))?;
        if !turn.text.is_empty() {
            on_text(&turn.text);
        }
        Ok(turn)
    }
}

/// Answers checkpoints from a fixed script; continues once it runs out.
#[derive(Default)]
pub struct ScriptedCheckpoint {
    answers: RefCell<VecDeque<bool>>,
    asked: Cell<u32>,
}

impl ScriptedCheckpoint {
    pub fn new(answers: Vec<bool>) -> Self {
        Self {
            answers: RefCell::new(answers.into()),
            asked: Cell::new(0),
        }
    }

    pub fn asked(&self) -> u32 {
        self.asked.get()
    }
}

impl Checkpoint for ScriptedCheckpoint {
    fn confirm(&self, _console: &Console) -> bool {
        self.asked.set(self.asked.get() + 1);
        self.answers.borrow_mut().pop_front().unwrap_or(true)
    }
}

pub fn usage(input_tokens: u64, output_tokens: u64) -> TokenUsage {
    TokenUsage {
        input_tokens,
        output_tokens,
    }
}

/// A final answer with no tool calls.
pub fn text_turn(text: &str) -> ModelTurn {
    ModelTurn {
        text: text.to_string(),
        tool_calls: Vec::new(),
        status: TurnStatus::Completed,
        usage: usage(10, 10),
    }
}

static NEXT_CALL_ID: AtomicUsize = AtomicUsize::new(0);

/// A turn requesting the given `(name, input)` calls.
///
/// Ids are `call-N` with `N` unique within the test process, so scripted
/// histories never repeat a `tool_use_id`.
pub fn tool_turn(calls: Vec<(&str, Value)>) -> ModelTurn {
    let tool_calls = calls
        .into_iter()
        .map(|(name, input)| ToolCall {
            id: format!("call-{}", NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.to_string(),
            input,
        })
        .collect();
    ModelTurn {
        text: String::new(),
        tool_calls,
        status: TurnStatus::ToolRequested,
        usage: usage(10, 10),
    }
}

/// A turn cut off at `max_tokens` that still carries a partial tool call.
pub fn truncated_turn(text: &str, call: (&str, Value)) -> ModelTurn {
    let mut turn = tool_turn(vec![call]);
    turn.text = text.to_string();
    turn.status = TurnStatus::Truncated;
    turn
}
