//! Exit code constants for the prpflow CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, missing state, unknown ids)
//! - 2: Validation failure (malformed task, cyclic graph, bad embedding)
//! - 3: Task or feature failure (execution, gates, delivery, cancellation)
//! - 4: Claim conflict

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, missing `.prpflow/` state, unknown ids.
pub const USER_ERROR: i32 = 1;

/// Validation failure: malformed task, dependency cycle, embedding width mismatch.
pub const VALIDATION_FAILURE: i32 = 2;

/// A task or feature ended in a failed or cancelled state.
pub const TASK_FAILURE: i32 = 3;

/// A task claim lost the race against another agent.
pub const CLAIM_CONFLICT: i32 = 4;
