//! Error types for the bcdi-post CLI.
//!
//! Uses thiserror for derive macros and provides user-actionable error messages.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for bcdi-post operations.
///
/// Each variant maps to a specific exit code so that scripts driving the CLI
/// can distinguish configuration problems from pipeline failures.
#[derive(Error, Debug)]
pub enum PostError {
    /// User provided invalid arguments or referenced a missing file.
    #[error("{0}")]
    UserError(String),

    /// A configuration parameter violates its documented domain.
    #[error("Configuration invalid: {0}")]
    ConfigError(String),

    /// A processing stage could not complete.
    #[error("Pipeline failed: {0}")]
    PipelineError(String),

    /// Results or run events could not be written.
    #[error("Output failed: {0}")]
    OutputError(String),
}

impl PostError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            PostError::UserError(_) => exit_codes::USER_ERROR,
            PostError::ConfigError(_) => exit_codes::VALIDATION_FAILURE,
            PostError::PipelineError(_) => exit_codes::PIPELINE_FAILURE,
            PostError::OutputError(_) => exit_codes::OUTPUT_FAILURE,
        }
    }
}

/// Result type alias for bcdi-post operations.
pub type Result<T> = std::result::Result<T, PostError>;
