//! Deterministic, pure logic shared by the role loader and the session loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod governor;
pub mod merge;
pub mod path;
pub mod pricing;
pub mod types;
