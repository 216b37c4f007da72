//! Stable exit codes for bootstrap CLI commands.

/// Command succeeded (phase applied, or every validation check passed).
pub const OK: i32 = 0;
/// Missing prerequisite, failed external command, malformed outputs, or a
/// failed validation check.
pub const FAILURE: i32 = 1;
