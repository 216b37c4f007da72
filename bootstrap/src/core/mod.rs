//! Deterministic, pure logic shared by the bootstrap commands.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod arn;
pub mod fragment;
pub mod phases;
pub mod prerequisites;
pub mod report;
pub mod types;
