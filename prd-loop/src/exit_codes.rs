//! Stable exit codes for `prd-loop` commands.

/// Command succeeded; for `run`, every story in the PRD passes.
pub const OK: i32 = 0;
/// Setup error, or `run` stopped before the PRD was complete (circuit
/// breaker, iteration ceiling, interrupt).
pub const INCOMPLETE: i32 = 1;
