//! The `run` command: execute the pipeline for the configured scans.

use crate::adapters::{DetectorGridOrthogonalizer, JsonLoader, JsonQSpaceLoader, JsonWriter};
use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::{PostError, Result};
use crate::events::EventSink;
use crate::pipeline::{AnalysisKind, Pipeline, analysis_kind};
use std::path::PathBuf;

pub fn cmd_run(args: RunArgs) -> Result<()> {
    let config = Config::load(&args.config)?;

    if let Some(scan) = args.scan
        && !config.scans.iter().any(|&s| i64::from(s) == scan)
    {
        return Err(PostError::UserError(format!(
            "scan {} is not listed in the configuration",
            scan
        )));
    }

    if args.dry_run {
        return print_plan(&config, args.scan);
    }

    let data_dir = resolve_dir(&config.data_dir, &config.root_folder, "");
    let output_dir = resolve_dir(&config.save_dir, &config.root_folder, "result");

    let loader = JsonLoader;
    let qspace_loader = JsonQSpaceLoader { dir: data_dir };
    let orthogonalizer = DetectorGridOrthogonalizer;
    let mut writer = JsonWriter {
        dir: output_dir.clone(),
    };

    let run_log = args
        .run_log
        .unwrap_or_else(|| output_dir.join("run.ndjson"));
    let mut events = EventSink::File(run_log);

    let pipeline = Pipeline::new(&config, &loader, &qspace_loader, &orthogonalizer);
    let summary = pipeline.run(args.scan, &mut writer, &mut events)?;

    for scan in &summary.scans {
        println!(
            "scan {}: kept {} candidate(s), voxel sizes [{:.2}, {:.2}, {:.2}] nm, |q| = {:.4} 1/nm",
            scan.scan,
            scan.candidates_kept,
            scan.voxel_sizes_nm[0],
            scan.voxel_sizes_nm[1],
            scan.voxel_sizes_nm[2],
            scan.q_norm,
        );
    }
    println!("{} scan(s) processed", summary.scans.len());
    Ok(())
}

/// Report what a run would do without touching any data.
fn print_plan(config: &Config, scan_filter: Option<i64>) -> Result<()> {
    let analysis = match analysis_kind(config) {
        AnalysisKind::Linearization => "linearization (detector frame)",
        AnalysisKind::OrthogonalFrame => "orthogonal frame",
    };
    println!("dry run, nothing will be written");
    println!("analysis: {}", analysis);
    println!("save frame: {:?}", config.save_frame);

    for (index, &scan) in config.scans.iter().enumerate() {
        let scan = i64::from(scan);
        if scan_filter.is_some_and(|wanted| wanted != scan) {
            continue;
        }
        let file = config
            .per_scan(&config.reconstruction_files, index)
            .and_then(|entry| entry.as_deref())
            .unwrap_or("<not configured>");
        println!("scan {}: {}", scan, file);
    }

    let mut optional = Vec::new();
    if config.apodize {
        optional.push("apodization");
    }
    if config.correct_refraction {
        optional.push("refraction correction");
    }
    if config.invert_phase {
        optional.push("phase inversion");
    }
    if config.fix_voxel.is_some() {
        optional.push("voxel regrid");
    }
    if optional.is_empty() {
        println!("optional stages: none");
    } else {
        println!("optional stages: {}", optional.join(", "));
    }
    Ok(())
}

/// First configured entry of a per-scan directory list, or a fallback under
/// the root folder.
fn resolve_dir(entries: &[Option<String>], root_folder: &str, fallback: &str) -> PathBuf {
    entries
        .iter()
        .flatten()
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(root_folder).join(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_inputs(temp: &TempDir) -> PathBuf {
        let root = temp.path();

        // One candidate: a centered box with constant modulus
        let n = 8usize;
        let mut re = vec![0.0f64; n * n * n];
        for i in 3..5 {
            for j in 3..5 {
                for k in 3..5 {
                    re[(i * n + j) * n + k] = 1.0;
                }
            }
        }
        let modes = serde_json::json!({
            "candidates": [{"shape": [n, n, n], "re": re, "im": vec![0.0; n * n * n]}],
        });
        std::fs::write(root.join("modes.json"), modes.to_string()).unwrap();

        let config = format!(
            r#"
scans: [11]
root_folder: {root}
data_dir: [{root}]
save_dir: [{root}/out]
reconstruction_files: [{root}/modes.json]
energy: 9000
detector_distance: 0.5
outofplane_angle: 35.0
inplane_angle: 0.5
tilt_angle: 0.01
keep_size: true
data_frame: detector
save_frame: crystal
"#,
            root = root.display()
        );
        let config_path = root.join("params.yml");
        std::fs::write(&config_path, config).unwrap();
        config_path
    }

    #[test]
    fn dry_run_reports_the_plan() {
        let temp = TempDir::new().unwrap();
        let config_path = write_inputs(&temp);
        cmd_run(RunArgs {
            config: config_path,
            scan: None,
            dry_run: true,
            run_log: None,
        })
        .unwrap();
        // Nothing written
        assert!(!temp.path().join("out").exists());
    }

    #[test]
    fn run_writes_results_and_log() {
        let temp = TempDir::new().unwrap();
        let config_path = write_inputs(&temp);
        cmd_run(RunArgs {
            config: config_path,
            scan: Some(11),
            dry_run: false,
            run_log: None,
        })
        .unwrap();

        let out = temp.path().join("out");
        assert!(out.join("S11_result.json").exists());
        assert!(out.join("run.ndjson").exists());
    }

    #[test]
    fn unknown_scan_is_rejected_before_running() {
        let temp = TempDir::new().unwrap();
        let config_path = write_inputs(&temp);
        let err = cmd_run(RunArgs {
            config: config_path,
            scan: Some(99),
            dry_run: false,
            run_log: None,
        })
        .unwrap_err();
        assert!(matches!(err, PostError::UserError(_)));
    }

    #[test]
    fn resolve_dir_prefers_configured_entry() {
        let dirs = vec![None, Some("/data/S12".to_string())];
        assert_eq!(resolve_dir(&dirs, "/root", "result"), PathBuf::from("/data/S12"));
        assert_eq!(
            resolve_dir(&[], "/root", "result"),
            PathBuf::from("/root/result")
        );
    }
}
