//! Command implementations for bcdi-post.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. `validate` and `show` are small enough to live here;
//! `template` and `run` have their own modules.

mod run;
mod template;

use crate::cli::{Command, ShowArgs, ValidateArgs};
use crate::config::Config;
use crate::error::{PostError, Result};

/// Dispatch a command to its implementation.
pub fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Validate(args) => cmd_validate(args),
        Command::Show(args) => cmd_show(args),
        Command::Template(args) => template::cmd_template(args),
        Command::Run(args) => run::cmd_run(args),
    }
}

/// Load and validate a parameter file, reporting the outcome.
fn cmd_validate(args: ValidateArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    println!(
        "Configuration valid: {} scan(s) on beamline {:?}",
        config.scans.len(),
        config.beamline
    );
    Ok(())
}

/// Print the resolved configuration.
///
/// Defaults are applied and `custom_motors` cross-references are resolved to
/// their numeric values.
fn cmd_show(args: ShowArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    print!("{}", config.to_yaml()?);

    let motors = config.resolved_custom_motors()?;
    if !motors.is_empty() {
        println!("# resolved custom_motors");
        let rendered = serde_yaml::to_string(&motors).map_err(|e| {
            PostError::UserError(format!("failed to render custom_motors: {}", e))
        })?;
        print!("{}", rendered);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::TemplateArgs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn validate_accepts_a_minimal_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("params.yml");
        std::fs::write(&path, "scans: [11]\n").unwrap();
        cmd_validate(ValidateArgs { config: path }).unwrap();
    }

    #[test]
    fn validate_rejects_a_broken_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("params.yml");
        std::fs::write(&path, "scans: []\n").unwrap();
        let err = cmd_validate(ValidateArgs { config: path }).unwrap_err();
        assert!(matches!(err, PostError::ConfigError(_)));
    }

    #[test]
    fn validate_missing_file_is_a_user_error() {
        let err = cmd_validate(ValidateArgs {
            config: PathBuf::from("/nonexistent/params.yml"),
        })
        .unwrap_err();
        assert!(matches!(err, PostError::UserError(_)));
    }

    #[test]
    fn show_renders_resolved_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("params.yml");
        std::fs::write(
            &path,
            "scans: [11]\nenergy: 9000\ncustom_motors:\n  mu: energy\n",
        )
        .unwrap();
        cmd_show(ShowArgs { config: path }).unwrap();
    }

    #[test]
    fn dispatch_routes_template() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("template.yml");
        dispatch(Command::Template(TemplateArgs {
            path: path.clone(),
            force: false,
        }))
        .unwrap();
        assert!(path.exists());
    }
}
