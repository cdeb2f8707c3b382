//! Checkpoint pauses between tool calls.

use std::io::{self, BufRead, IsTerminal};

use tracing::{info, warn};

use crate::io::console::Console;

/// Decides whether a paused session may continue.
pub trait Checkpoint {
    /// Returns `false` to abort the session.
    fn confirm(&self, console: &Console) -> bool;
}

/// Asks the operator on a terminal; auto-continues otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalCheckpoint;

impl Checkpoint for TerminalCheckpoint {
    fn confirm(&self, console: &Console) -> bool {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            console.line("  [non-interactive, auto-continuing]");
            info!("checkpoint auto-continued");
            return true;
        }

        console.prompt("  Press Enter to continue (type 'q' to abort)...");

        let mut answer = String::new();
        match stdin.lock().read_line(&mut answer) {
            Ok(0) => false,
            Ok(_) => accepts(&answer),
            Err(err) => {
                warn!(err = %err, "failed to read checkpoint answer");
                false
            }
        }
    }
}

/// Anything other than an explicit abort continues.
fn accepts(answer: &str) -> bool {
    !matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "q" | "quit" | "abort" | "n" | "no"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_answer_continues() {
        assert!(accepts("\n"));
        assert!(accepts("yes\n"));
    }

    #[test]
    fn abort_answers_stop() {
        assert!(!accepts("q\n"));
        assert!(!accepts("  ABORT "));
        assert!(!accepts("no"));
    }
}
