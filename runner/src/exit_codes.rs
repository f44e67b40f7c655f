//! Stable exit codes for the worker binary.

/// Completion signal seen, no work left, or watch mode interrupted.
pub const OK: i32 = 0;
/// Invalid arguments or configuration, or an unrecoverable I/O error.
pub const INVALID: i32 = 1;
/// A one-shot batch ran its full iteration bound without a completion signal.
pub const ITERATION_LIMIT: i32 = 1;
