//! Autonomy governor: per-session counters and limit decisions.
//!
//! The decision functions are pure. [`Governor`] owns the counters of one
//! session and applies them; nothing here is shared between sessions.

use thiserror::Error;

use crate::core::pricing::{Rates, rates_for, turn_cost_usd};
use crate::core::types::TokenUsage;

/// Maximum delegation depth below the top-level session.
pub const MAX_SPAWN_DEPTH: u32 = 2;

/// Unrecoverable condition that ends a session and every session awaiting it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutonomyHalt {
    #[error("Tool call limit reached: {count}/{max}")]
    ToolCalls { count: u32, max: u32 },
    #[error("Cost limit exceeded: ${spent:.4} > ${max:.2}")]
    Cost { spent: f64, max: f64 },
    #[error("Interrupted at checkpoint after {tool_calls} tool calls")]
    Interrupted { tool_calls: u32 },
}

/// Limits a governor enforces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub max_tool_calls: u32,
    pub max_cost_usd: f64,
    /// Pause every N executed calls; `None` or `Some(0)` disables.
    pub checkpoint_every: Option<u32>,
}

/// Mutable per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Counters {
    pub tool_calls: u32,
    pub cost_usd: f64,
}

/// Outcome of a governor check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Continue,
    Pause,
    Halt(AutonomyHalt),
}

/// Decide whether one more tool call may run. Checked before incrementing.
pub fn decide_tool_call(counters: &Counters, limits: &Limits) -> Decision {
    if counters.tool_calls >= limits.max_tool_calls {
        return Decision::Halt(AutonomyHalt::ToolCalls {
            count: counters.tool_calls,
            max: limits.max_tool_calls,
        });
    }
    Decision::Continue
}

/// Decide whether accumulated spend is still within the ceiling.
pub fn decide_cost(counters: &Counters, limits: &Limits) -> Decision {
    if counters.cost_usd > limits.max_cost_usd {
        return Decision::Halt(AutonomyHalt::Cost {
            spent: counters.cost_usd,
            max: limits.max_cost_usd,
        });
    }
    Decision::Continue
}

/// Decide whether the session should pause for a checkpoint.
pub fn decide_checkpoint(counters: &Counters, limits: &Limits) -> Decision {
    match limits.checkpoint_every {
        Some(every) if every > 0 && counters.tool_calls > 0 && counters.tool_calls % every == 0 => {
            Decision::Pause
        }
        _ => Decision::Continue,
    }
}

/// Counters plus limits for one session.
#[derive(Debug, Clone)]
pub struct Governor {
    limits: Limits,
    rates: Rates,
    counters: Counters,
}

impl Governor {
    pub fn new(limits: Limits, model_id: &str) -> Self {
        Self {
            limits,
            rates: rates_for(model_id),
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Admit one tool call, incrementing the counter only when allowed.
    pub fn admit_tool_call(&mut self) -> Result<(), AutonomyHalt> {
        if let Decision::Halt(halt) = decide_tool_call(&self.counters, &self.limits) {
            return Err(halt);
        }
        self.counters.tool_calls += 1;
        Ok(())
    }

    /// Whether the cadence calls for a checkpoint after the latest call.
    pub fn checkpoint_due(&self) -> bool {
        decide_checkpoint(&self.counters, &self.limits) == Decision::Pause
    }

    /// Add the cost of a completed turn; returns that turn's cost.
    pub fn record_usage(&mut self, usage: TokenUsage) -> f64 {
        let cost = turn_cost_usd(self.rates, usage);
        self.counters.cost_usd += cost;
        cost
    }

    pub fn check_cost(&self) -> Result<(), AutonomyHalt> {
        match decide_cost(&self.counters, &self.limits) {
            Decision::Halt(halt) => Err(halt),
            _ => Ok(()),
        }
    }

    pub fn interrupted(&self) -> AutonomyHalt {
        AutonomyHalt::Interrupted {
            tool_calls: self.counters.tool_calls,
        }
    }
}
