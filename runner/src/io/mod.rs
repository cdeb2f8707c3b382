//! I/O helpers for tab commands.

pub mod checkpoint;
pub mod config;
pub mod console;
pub mod output;
pub mod process;
pub mod prompt;
pub mod role_loader;
pub mod transport;
