//! Stable exit codes for `tab` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config or role bundle, failed validation, or any other error.
pub const FAILED: i32 = 1;
/// A session stopped at its tool-call or cost ceiling.
pub const HALTED: i32 = 2;
/// The operator aborted at a checkpoint.
pub const INTERRUPTED: i32 = 130;
