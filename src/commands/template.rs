//! The `template` command: write a commented starter parameter file.

use crate::cli::TemplateArgs;
use crate::error::{PostError, Result};

/// Starter parameter file.
///
/// Commented-out keys show their defaults; the uncommented ones are the
/// minimum worth editing for a real experiment.
const TEMPLATE: &str = r#"# bcdi-post parameter file
# Unknown keys are ignored, so the file can carry preprocessing keys too.

# ---------------------------------------------------------------------------
# scans and directories
# ---------------------------------------------------------------------------
scans: [11]
sample_name: [S]
root_folder: /data/experiment
# save_dir: [/data/experiment/result]
# data_dir: [/data/experiment/S11]
# comment: ""
# debug: false

# ---------------------------------------------------------------------------
# experiment geometry
# ---------------------------------------------------------------------------
beamline: ID01
rocking_angle: outofplane
energy: 9000            # eV
detector_distance: 0.5  # m
tilt_angle: 0.01        # degrees
# outofplane_angle: 35.0  # degrees; recovered from bragg_peak when omitted
# inplane_angle: 0.5      # degrees
# sample_offsets: [0, 0, 0]
# direct_beam: [208.0, 362.0]            # [vertical, horizontal] pixels
# dirbeam_detector_angles: [0.0, 0.0]    # [outofplane, inplane] degrees
# bragg_peak: [64, 108, 412]             # [z, y, x] on the unbinned detector
# beam_direction: [1, 0, 0]
# custom_scan: false
# custom_motors:
#   mu: 0.0
#   delta: outofplane_angle   # bare identifiers reference top-level keys

# ---------------------------------------------------------------------------
# detector
# ---------------------------------------------------------------------------
detector: Maxipix
# template_imagefile: [data_mpx4_%05d.edf.gz]
# roi_detector: [100, 400, 50, 450]   # [y0, y1, x0, x1]
# center_roi_x: 150
# center_roi_y: 150
# custom_pixelsize: 55.0e-6           # m
phasing_binning: [1, 1, 1]
# preprocessing_binning: [1, 1, 1]

# ---------------------------------------------------------------------------
# reconstruction handling
# ---------------------------------------------------------------------------
reconstruction_files: [/data/experiment/S11/modes.json]
# original_size: [140, 300, 300]
# keep_size: false
# flip_reconstruction: false
# roll_modes: [0, 0, 0]
sort_method: mean_amplitude
correlation_threshold: 0.9
# averaging_space: reciprocal_space

# ---------------------------------------------------------------------------
# frames and interpolation
# ---------------------------------------------------------------------------
data_frame: detector
save_frame: crystal
# interpolation_method: linearization
# centering_method:
#   direct_space: max_com
#   reciprocal_space: max_com
# fix_voxel: 5.0          # nm, scalar or [z, y, x]
ref_axis_q: y

# ---------------------------------------------------------------------------
# phase and strain
# ---------------------------------------------------------------------------
isosurface_strain: 0.2
# strain_method: default
# phase_offset: 0
# phase_offset_origin: null
# offset_method: mean
# half_width_avg_phase: 0
# apodize: false
# apodization_window: blackman
# apodization_sigma: [0.3, 0.3, 0.3]
# apodization_mu: [0.0, 0.0, 0.0]
# apodization_alpha: [1.0, 1.0, 1.0]
# threshold_gradient: 1.0
# invert_phase: true

# ---------------------------------------------------------------------------
# refraction correction
# ---------------------------------------------------------------------------
# correct_refraction: false
# optical_path_method: threshold
# dispersion: 5.0328e-05
# absorption: 4.1969e-06
# threshold_unwrap_refraction: 0.05

# ---------------------------------------------------------------------------
# outputs
# ---------------------------------------------------------------------------
save: true
# save_support: false
# save_rawdata: false
# colormap: turbo
# tick_direction: out
# tick_spacing: 50
# tick_length: 10
# tick_width: 2
"#;

/// Write the template parameter file.
pub fn cmd_template(args: TemplateArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        return Err(PostError::UserError(format!(
            "'{}' already exists, pass --force to overwrite",
            args.path.display()
        )));
    }

    std::fs::write(&args.path, TEMPLATE).map_err(|e| {
        PostError::OutputError(format!(
            "failed to write template to '{}': {}",
            args.path.display(),
            e
        ))
    })?;
    println!("Template written to {}", args.path.display());
    Ok(())
}
