//! Stable exit codes for `pilot` CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid script, config or document, or any other setup error.
pub const INVALID: i32 = 1;
/// The run failed: retries exhausted, replay failure or a fatal model error.
pub const FAILED: i32 = 2;
/// A synthesized action was rejected by the safety gate.
pub const SAFETY_VIOLATION: i32 = 3;
