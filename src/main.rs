//! bcdi-post: post-processing pipeline for Bragg coherent diffraction imaging.
//!
//! This is the main entry point for the `bcdi-post` CLI. It parses arguments,
//! dispatches to the appropriate command handler, and handles errors with
//! proper exit codes.

mod adapters;
mod cli;
mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod exit_codes;
mod interp;
mod phase;
mod pipeline;
mod setup;
mod strain;
mod volume;

use cli::Cli;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse_args();

    match commands::dispatch(cli.command) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            // Return appropriate exit code
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

/// Stage-level logging on stderr, tuned with RUST_LOG.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
