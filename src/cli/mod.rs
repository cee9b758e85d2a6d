//! CLI argument parsing for bcdi-post.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// bcdi-post: post-processing pipeline for Bragg coherent diffraction imaging.
///
/// Takes the complex object retrieved by phase retrieval and turns it into
/// modulus, phase and strain maps in the requested frame. Everything is driven
/// by a YAML parameter file; see `bcdi-post template` for a starting point.
#[derive(Parser, Debug)]
#[command(name = "bcdi-post")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for bcdi-post.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a parameter file.
    ///
    /// Parses the YAML, applies defaults and checks the cross-key
    /// invariants. Exits 2 when the configuration is invalid.
    Validate(ValidateArgs),

    /// Show the resolved configuration.
    ///
    /// Prints the configuration with defaults applied and `custom_motors`
    /// cross-references resolved.
    Show(ShowArgs),

    /// Write a commented template parameter file.
    Template(TemplateArgs),

    /// Run the post-processing pipeline.
    ///
    /// Processes every configured scan, or a single one with `--scan`.
    Run(RunArgs),
}

/// Arguments for the `validate` command.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the YAML parameter file.
    pub config: PathBuf,
}

/// Arguments for the `show` command.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Path to the YAML parameter file.
    pub config: PathBuf,
}

/// Arguments for the `template` command.
#[derive(Parser, Debug)]
pub struct TemplateArgs {
    /// Where to write the template (must not exist).
    pub path: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the YAML parameter file.
    pub config: PathBuf,

    /// Process only this scan number.
    #[arg(long)]
    pub scan: Option<i64>,

    /// Report the run plan without touching any data.
    #[arg(long)]
    pub dry_run: bool,

    /// Where to append the NDJSON run log (defaults to run.ndjson in the
    /// output directory).
    #[arg(long)]
    pub run_log: Option<PathBuf>,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_validate() {
        let cli = Cli::try_parse_from(["bcdi-post", "validate", "params.yml"]).unwrap();
        if let Command::Validate(args) = cli.command {
            assert_eq!(args.config, PathBuf::from("params.yml"));
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn parse_show() {
        let cli = Cli::try_parse_from(["bcdi-post", "show", "params.yml"]).unwrap();
        assert!(matches!(cli.command, Command::Show(_)));
    }

    #[test]
    fn parse_template_with_force() {
        let cli =
            Cli::try_parse_from(["bcdi-post", "template", "params.yml", "--force"]).unwrap();
        if let Command::Template(args) = cli.command {
            assert_eq!(args.path, PathBuf::from("params.yml"));
            assert!(args.force);
        } else {
            panic!("Expected Template command");
        }
    }

    #[test]
    fn parse_run_minimal() {
        let cli = Cli::try_parse_from(["bcdi-post", "run", "params.yml"]).unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.config, PathBuf::from("params.yml"));
            assert!(args.scan.is_none());
            assert!(!args.dry_run);
            assert!(args.run_log.is_none());
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn parse_run_full() {
        let cli = Cli::try_parse_from([
            "bcdi-post",
            "run",
            "params.yml",
            "--scan",
            "11",
            "--dry-run",
            "--run-log",
            "/tmp/run.ndjson",
        ])
        .unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.scan, Some(11));
            assert!(args.dry_run);
            assert_eq!(args.run_log, Some(PathBuf::from("/tmp/run.ndjson")));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn missing_config_is_an_error() {
        assert!(Cli::try_parse_from(["bcdi-post", "validate"]).is_err());
    }
}
