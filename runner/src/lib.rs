//! Role-driven agent runner.
//!
//! A role is a directory holding `role.yml` plus its prompt templates, rules
//! and skills. Roles inherit from each other through `extends`. Running a
//! role starts a session that alternates model turns and tool calls under
//! hard autonomy limits, and orchestrator roles may delegate to sub-agents.
//!
//! - **[`core`]**: Pure logic (deep merge, governor decisions, pricing,
//!   path policy, conversation types). No I/O.
//! - **[`io`]**: Side-effecting operations (role files, templates, the model
//!   transport, subprocesses, the console, output delivery).
//! - **[`tools`]**: The tool registry, built-in tools and the access gate.
//!
//! [`session`] ties these together; [`validate`] backs `tab validate`.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod role;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod validate;
