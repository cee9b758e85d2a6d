//! Exit code constants for the bcdi-post CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, unreadable files, invalid state)
//! - 2: Configuration validation failure
//! - 3: Pipeline stage failure
//! - 4: I/O failure while writing outputs or run events

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, missing files, or invalid invocation.
pub const USER_ERROR: i32 = 1;

/// Configuration validation failure: a parameter violates its documented domain.
pub const VALIDATION_FAILURE: i32 = 2;

/// Pipeline failure: a processing stage could not complete.
pub const PIPELINE_FAILURE: i32 = 3;

/// Output failure: results or run events could not be written.
pub const OUTPUT_FAILURE: i32 = 4;
