//! The execution loop.
//!
//! A [`Session`] drives one resolved role through model turns until the
//! model stops asking for tools. Each turn moves through an explicit state:
//!
//! - `AwaitingResponse`: submit history and the tool catalog, stream text.
//! - `Truncated`: the reply hit the token budget; its tool calls are dropped
//!   and a recovery instruction is appended.
//! - `ToolDispatch`: run the proposed calls in order, append one batched
//!   tool-result turn.
//! - `Done`: the final text is the session's result.
//!
//! Halting is not a state: an [`AutonomyHalt`] is returned as an error. A
//! limit breach ends this session and every session awaiting it; a declined
//! checkpoint ends only the paused session.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::governor::{AutonomyHalt, Counters, Governor};
use crate::core::types::{Message, ModelTurn, ToolCall, ToolResult, TurnStatus};
use crate::io::checkpoint::Checkpoint;
use crate::io::config::ToolSettings;
use crate::io::console::Console;
use crate::io::output;
use crate::io::role_loader::RoleLoader;
use crate::io::transport::{ModelRequest, ModelTransport};
use crate::role::{ResolvedRole, TemplateVars};
use crate::tools::access::ToolGate;
use crate::tools::{Delegate, DelegationRequest, ToolError, ToolRegistry};

/// Appended after a truncated reply.
pub const TRUNCATION_RECOVERY: &str = "Your response was cut off because it exceeded the \
max_tokens limit. Any tool call in that response was not executed. For large files, use the \
bash tool instead of write_file, or write the content in smaller sections.";

/// Shared, read-only collaborators of every session in a run.
#[derive(Clone, Copy)]
pub struct Runtime<'a> {
    pub loader: &'a RoleLoader,
    pub registry: &'a ToolRegistry,
    pub transport: &'a dyn ModelTransport,
    pub checkpoint: &'a dyn Checkpoint,
    pub settings: &'a ToolSettings,
    /// Project root; relative tool paths and output paths resolve here.
    pub root: &'a Path,
}

enum Turn {
    AwaitingResponse,
    Truncated { partial: String },
    ToolDispatch(Vec<ToolCall>),
    Done,
}

/// Mutable state of one executing role instance.
pub struct Session<'a> {
    runtime: Runtime<'a>,
    role: ResolvedRole,
    run_id: String,
    depth: u32,
    governor: Governor,
    gate: ToolGate<'a>,
    console: Console,
    history: Vec<Message>,
}

impl<'a> Session<'a> {
    pub fn new(runtime: Runtime<'a>, role: ResolvedRole, run_id: impl Into<String>, depth: u32) -> Self {
        let governor = Governor::new(role.limits(), &role.model.id);
        let gate = ToolGate::new(
            runtime.registry,
            runtime.settings,
            runtime.root,
            &role,
            depth,
        );
        Self {
            runtime,
            role,
            run_id: run_id.into(),
            depth,
            governor,
            gate,
            console: Console::new(depth),
            history: Vec::new(),
        }
    }

    pub fn role(&self) -> &ResolvedRole {
        &self.role
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn counters(&self) -> Counters {
        self.governor.counters()
    }

    /// Run `task` to completion and deliver the final text.
    #[instrument(skip_all, fields(role = %self.role.name, depth = self.depth, run_id = %self.run_id))]
    pub fn run(&mut self, task: &str) -> Result<String> {
        info!("session started");
        self.console.header(&self.role.name);
        self.history = vec![Message::user_text(task)];

        let mut final_text = String::new();
        let mut state = Turn::AwaitingResponse;
        loop {
            state = match state {
                Turn::AwaitingResponse => {
                    let turn = self.request_turn()?;
                    if !turn.text.is_empty() {
                        final_text.clone_from(&turn.text);
                    }
                    self.classify(turn)
                }
                Turn::Truncated { partial } => {
                    self.recover(partial)?;
                    Turn::AwaitingResponse
                }
                Turn::ToolDispatch(calls) => {
                    self.dispatch(&calls)?;
                    Turn::AwaitingResponse
                }
                Turn::Done => break,
            };
        }

        output::deliver(
            &self.role.output,
            &final_text,
            &self.run_id,
            self.runtime.root,
            &self.console,
        )?;
        let counters = self.governor.counters();
        self.console.footer(&self.role.name, counters);
        info!(
            tool_calls = counters.tool_calls,
            cost_usd = counters.cost_usd,
            "session finished"
        );
        Ok(final_text)
    }

    fn request_turn(&mut self) -> Result<ModelTurn> {
        let catalog = self.gate.catalog();
        let request = ModelRequest {
            model: &self.role.model.id,
            max_tokens: self.role.model.max_tokens,
            temperature: self.role.model.temperature,
            system: &self.role.system_prompt,
            messages: &self.history,
            tools: &catalog,
        };
        let console = self.console;
        let turn = self
            .runtime
            .transport
            .submit(&request, &mut |chunk| console.stream(chunk))
            .context("model turn")?;
        console.end_stream(&turn.text);

        let cost = self.governor.record_usage(turn.usage);
        debug!(
            status = ?turn.status,
            tool_calls = turn.tool_calls.len(),
            turn_cost_usd = cost,
            total_cost_usd = self.governor.counters().cost_usd,
            "turn received"
        );
        Ok(turn)
    }

    fn classify(&mut self, turn: ModelTurn) -> Turn {
        if turn.status == TurnStatus::Truncated {
            warn!(
                discarded_tool_calls = turn.tool_calls.len(),
                "response truncated at max_tokens"
            );
            self.console.line(
                "[warn] Response truncated (max_tokens limit hit). Tool calls discarded. \
                 Injecting recovery guidance.",
            );
            return Turn::Truncated { partial: turn.text };
        }

        self.history
            .push(Message::assistant(&turn.text, &turn.tool_calls));
        if turn.tool_calls.is_empty() {
            Turn::Done
        } else {
            Turn::ToolDispatch(turn.tool_calls)
        }
    }

    fn recover(&mut self, partial: String) -> Result<()> {
        if !partial.is_empty() {
            self.history.push(Message::assistant(&partial, &[]));
        }
        self.history.push(Message::user_text(TRUNCATION_RECOVERY));
        self.governor.check_cost()?;
        Ok(())
    }

    fn dispatch(&mut self, calls: &[ToolCall]) -> Result<()> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            self.governor.admit_tool_call()?;
            self.console.tool_call(&call.name, &call.input);

            let spawner = Spawner {
                runtime: self.runtime,
                run_id: &self.run_id,
                depth: self.depth,
            };
            let delegate: &dyn Delegate = &spawner;
            let content = self.gate.execute(call, Some(delegate))?;
            results.push(ToolResult {
                tool_use_id: call.id.clone(),
                content,
            });

            self.pause_if_due()?;
        }
        self.history.push(Message::tool_results(results));
        self.governor.check_cost()?;
        Ok(())
    }

    fn pause_if_due(&self) -> Result<(), AutonomyHalt> {
        if !self.governor.checkpoint_due() {
            return Ok(());
        }
        let counters = self.governor.counters();
        self.console.line(&format!(
            "[checkpoint] {} tool calls | ${:.4} spent",
            counters.tool_calls, counters.cost_usd
        ));
        if self.runtime.checkpoint.confirm(&self.console) {
            return Ok(());
        }
        warn!(tool_calls = counters.tool_calls, "aborted at checkpoint");
        Err(self.governor.interrupted())
    }
}

/// Runs delegated sub-agents as fresh sessions one level deeper.
struct Spawner<'s, 'a> {
    runtime: Runtime<'a>,
    run_id: &'s str,
    depth: u32,
}

impl Delegate for Spawner<'_, '_> {
    fn delegate(&self, request: DelegationRequest) -> Result<String, ToolError> {
        Console::new(self.depth).spawn(&request.role, &request.task);

        let role = self
            .runtime
            .loader
            .load(&request.role, self.run_id, &request.vars)
            .map_err(|err| ToolError::RoleLoad {
                role: request.role.clone(),
                message: err.to_string(),
            })?;
        let mut child = Session::new(self.runtime, role, self.run_id, self.depth + 1);
        child
            .run(&request.task)
            .map_err(|err| match err.downcast::<AutonomyHalt>() {
                // An operator abort ends only the session that was paused.
                Ok(halt @ AutonomyHalt::Interrupted { .. }) => {
                    ToolError::Failed(format!("Sub-agent '{}' stopped: {halt}", request.role))
                }
                Ok(halt) => ToolError::Halt(halt),
                Err(err) => {
                    ToolError::Failed(format!("Sub-agent '{}' failed: {err:#}", request.role))
                }
            })
    }
}

/// Load `role_name` and run it as the top-level session of a run.
pub fn run_role(runtime: Runtime<'_>, role_name: &str, task: &str, run_id: &str) -> Result<String> {
    let role = runtime
        .loader
        .load(role_name, run_id, &TemplateVars::new())
        .with_context(|| format!("load role {role_name}"))?;
    Session::new(runtime, role, run_id, 0).run(task)
}
