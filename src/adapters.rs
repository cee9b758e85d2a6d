//! Trait seams for the pipeline's external collaborators.
//!
//! File formats (HDF5 modes files, q-space grids from preprocessing, VTI or
//! NPZ outputs) live behind these traits, so the orchestration logic stays
//! independent of any codec. The in-memory implementations back tests and
//! dry runs.

use crate::error::{PostError, Result};
use crate::setup::Setup;
use crate::volume::ComplexVolume;
use ndarray::Array3;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// =============================================================================
// Q-space grids
// =============================================================================

/// Per-scan momentum transfer grids from preprocessing, in 1/nm.
///
/// Grids follow the array axis order: qx downstream, qz vertical up,
/// qy outboard.
#[derive(Debug, Clone, Default)]
pub struct QSpace {
    pub qx: Vec<f64>,
    pub qz: Vec<f64>,
    pub qy: Vec<f64>,
}

impl QSpace {
    /// Extent of each grid (max - min), in z-y-x axis order.
    pub fn extents(&self) -> Result<[f64; 3]> {
        let extent = |name: &str, values: &[f64]| -> Result<f64> {
            if values.len() < 2 {
                return Err(PostError::PipelineError(format!(
                    "q grid '{}' needs at least 2 points, got {}",
                    name,
                    values.len()
                )));
            }
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            Ok(max - min)
        };
        Ok([
            extent("qx", &self.qx)?,
            extent("qz", &self.qz)?,
            extent("qy", &self.qy)?,
        ])
    }
}

// =============================================================================
// Adapter traits
// =============================================================================

/// Loads phase-retrieval output into complex volumes.
///
/// One file holds one or more reconstruction candidates (modes); the
/// pipeline sorts and averages them.
pub trait ReconstructionLoader {
    fn load(&self, path: &Path) -> Result<Vec<ComplexVolume>>;
}

/// Loads the per-scan q-space grids saved by preprocessing.
pub trait QSpaceLoader {
    fn load(&self, scan: i64) -> Result<QSpace>;
}

/// Interpolates a detector-frame object into the crystal frame.
///
/// The linearization matrix built from the goniometer angles lives behind
/// this seam. Returns the interpolated object and its voxel sizes in nm.
pub trait Orthogonalizer {
    fn orthogonalize(
        &self,
        data: &ComplexVolume,
        setup: &Setup,
    ) -> Result<(ComplexVolume, [f64; 3])>;
}

/// Final per-scan results handed to the writer.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub scan: i64,
    pub modulus: Array3<f64>,
    pub phase: Array3<f64>,
    pub strain: Array3<f64>,
    /// Present when `save_support` is enabled.
    pub support: Option<Array3<f64>>,
    pub voxel_sizes_nm: [f64; 3],
    /// Run metadata (q vector, interplanar distance, phase extent, ...).
    pub metadata: Value,
}

/// Writes the per-scan results.
pub trait OutputWriter {
    fn write(&mut self, output: ScanOutput) -> Result<()>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// Loader backed by a path-keyed map, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    volumes: BTreeMap<PathBuf, Vec<ComplexVolume>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, candidates: Vec<ComplexVolume>) {
        self.volumes.insert(path.into(), candidates);
    }
}

impl ReconstructionLoader for MemoryLoader {
    fn load(&self, path: &Path) -> Result<Vec<ComplexVolume>> {
        self.volumes.get(path).cloned().ok_or_else(|| {
            PostError::PipelineError(format!(
                "reconstruction file '{}' not found",
                path.display()
            ))
        })
    }
}

/// Q-space loader returning the same grids for every scan.
#[derive(Debug, Clone)]
pub struct FixedQSpace {
    pub qspace: QSpace,
}

impl QSpaceLoader for FixedQSpace {
    fn load(&self, _scan: i64) -> Result<QSpace> {
        Ok(self.qspace.clone())
    }
}

/// Pass-through orthogonalizer with fixed voxel sizes.
#[derive(Debug, Clone)]
pub struct IdentityOrthogonalizer {
    pub voxel_sizes_nm: [f64; 3],
}

impl Orthogonalizer for IdentityOrthogonalizer {
    fn orthogonalize(
        &self,
        data: &ComplexVolume,
        _setup: &Setup,
    ) -> Result<(ComplexVolume, [f64; 3])> {
        Ok((data.clone(), self.voxel_sizes_nm))
    }
}

/// Writer collecting outputs in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    pub outputs: Vec<ScanOutput>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputWriter for MemoryWriter {
    fn write(&mut self, output: ScanOutput) -> Result<()> {
        self.outputs.push(output);
        Ok(())
    }
}

// =============================================================================
// JSON-backed implementations
// =============================================================================

/// Flat row-major dump of a complex volume.
#[derive(Debug, Serialize, Deserialize)]
struct JsonVolume {
    shape: [usize; 3],
    re: Vec<f64>,
    im: Vec<f64>,
}

impl JsonVolume {
    fn to_volume(&self) -> Result<ComplexVolume> {
        let len = self.shape[0] * self.shape[1] * self.shape[2];
        if self.re.len() != len || self.im.len() != len {
            return Err(PostError::PipelineError(format!(
                "volume data length does not match shape {:?}",
                self.shape
            )));
        }
        let values: Vec<Complex64> = self
            .re
            .iter()
            .zip(&self.im)
            .map(|(&re, &im)| Complex64::new(re, im))
            .collect();
        Array3::from_shape_vec((self.shape[0], self.shape[1], self.shape[2]), values)
            .map_err(|e| PostError::PipelineError(format!("bad volume shape: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct JsonModesFile {
    candidates: Vec<JsonVolume>,
}

/// Reconstruction loader for JSON modes files.
///
/// Format: `{"candidates": [{"shape": [z, y, x], "re": [...], "im": [...]}]}`
/// with flat row-major arrays. Binary formats plug in through the same trait.
#[derive(Debug, Default)]
pub struct JsonLoader;

impl ReconstructionLoader for JsonLoader {
    fn load(&self, path: &Path) -> Result<Vec<ComplexVolume>> {
        let content = fs::read_to_string(path).map_err(|e| {
            PostError::PipelineError(format!(
                "failed to read reconstruction file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let file: JsonModesFile = serde_json::from_str(&content).map_err(|e| {
            PostError::PipelineError(format!(
                "failed to parse reconstruction file '{}': {}",
                path.display(),
                e
            ))
        })?;
        file.candidates.iter().map(|v| v.to_volume()).collect()
    }
}

/// Q-space loader reading `qspace_S<scan>.json` files from a directory.
#[derive(Debug, Clone)]
pub struct JsonQSpaceLoader {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct JsonQSpaceFile {
    qx: Vec<f64>,
    qz: Vec<f64>,
    qy: Vec<f64>,
}

impl QSpaceLoader for JsonQSpaceLoader {
    fn load(&self, scan: i64) -> Result<QSpace> {
        let path = self.dir.join(format!("qspace_S{}.json", scan));
        let content = fs::read_to_string(&path).map_err(|e| {
            PostError::PipelineError(format!(
                "failed to read q-space file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let file: JsonQSpaceFile = serde_json::from_str(&content).map_err(|e| {
            PostError::PipelineError(format!(
                "failed to parse q-space file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(QSpace {
            qx: file.qx,
            qz: file.qz,
            qy: file.qy,
        })
    }
}

/// Orthogonalizer stand-in that keeps the detector-frame grid.
///
/// Until a linearization backend is plugged in, the object keeps its grid and
/// only the physical voxel sizes are derived from the geometry.
#[derive(Debug, Default)]
pub struct DetectorGridOrthogonalizer;

impl Orthogonalizer for DetectorGridOrthogonalizer {
    fn orthogonalize(
        &self,
        data: &ComplexVolume,
        setup: &Setup,
    ) -> Result<(ComplexVolume, [f64; 3])> {
        let (nz, ny, nx) = data.dim();
        let sizes = setup.voxel_sizes_detector([nz, ny, nx])?;
        Ok((data.clone(), sizes))
    }
}

/// Writer producing one `S<scan>_result.json` file per scan.
#[derive(Debug, Clone)]
pub struct JsonWriter {
    pub dir: PathBuf,
}

impl OutputWriter for JsonWriter {
    fn write(&mut self, output: ScanOutput) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            PostError::OutputError(format!(
                "failed to create output directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let (nz, ny, nx) = output.modulus.dim();
        let flat = |a: &Array3<f64>| a.iter().cloned().collect::<Vec<f64>>();
        let document = json!({
            "scan": output.scan,
            "shape": [nz, ny, nx],
            "voxel_sizes_nm": output.voxel_sizes_nm,
            "modulus": flat(&output.modulus),
            "phase": flat(&output.phase),
            "strain": flat(&output.strain),
            "support": output.support.as_ref().map(flat),
            "metadata": output.metadata,
        });

        let path = self.dir.join(format!("S{}_result.json", output.scan));
        let content = serde_json::to_string(&document).map_err(|e| {
            PostError::OutputError(format!("failed to serialize results: {}", e))
        })?;
        fs::write(&path, content).map_err(|e| {
            PostError::OutputError(format!(
                "failed to write results to '{}': {}",
                path.display(),
                e
            ))
        })?;
        tracing::info!(scan = output.scan, path = %path.display(), "results written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn qspace_extents() {
        let qspace = QSpace {
            qx: vec![1.0, 1.5, 2.0],
            qz: vec![-0.5, 0.5],
            qy: vec![0.0, 0.25],
        };
        let extents = qspace.extents().unwrap();
        assert_relative_eq!(extents[0], 1.0);
        assert_relative_eq!(extents[1], 1.0);
        assert_relative_eq!(extents[2], 0.25);
    }

    #[test]
    fn qspace_rejects_degenerate_grid() {
        let qspace = QSpace {
            qx: vec![1.0],
            qz: vec![-0.5, 0.5],
            qy: vec![0.0, 0.25],
        };
        assert!(qspace.extents().is_err());
    }

    #[test]
    fn memory_loader_round_trip() {
        let mut loader = MemoryLoader::new();
        let candidate = Array3::zeros((2, 2, 2));
        loader.insert("/data/modes.h5", vec![candidate]);

        let loaded = loader.load(Path::new("/data/modes.h5")).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].dim(), (2, 2, 2));

        assert!(loader.load(Path::new("/data/missing.h5")).is_err());
    }

    #[test]
    fn json_loader_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("modes.json");
        std::fs::write(
            &path,
            r#"{"candidates": [{"shape": [1, 1, 2], "re": [1.0, 0.0], "im": [0.0, 2.0]}]}"#,
        )
        .unwrap();

        let candidates = JsonLoader.load(&path).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_relative_eq!(candidates[0][(0, 0, 0)].re, 1.0);
        assert_relative_eq!(candidates[0][(0, 0, 1)].im, 2.0);
    }

    #[test]
    fn json_loader_rejects_length_mismatch() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("modes.json");
        std::fs::write(
            &path,
            r#"{"candidates": [{"shape": [2, 2, 2], "re": [1.0], "im": [0.0]}]}"#,
        )
        .unwrap();
        assert!(JsonLoader.load(&path).is_err());
    }

    #[test]
    fn json_qspace_loader_reads_per_scan_file() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("qspace_S11.json"),
            r#"{"qx": [2.5, 2.6], "qz": [0.0, 0.1], "qy": [0.0, 0.2]}"#,
        )
        .unwrap();

        let loader = JsonQSpaceLoader {
            dir: temp.path().to_path_buf(),
        };
        let qspace = loader.load(11).unwrap();
        assert_eq!(qspace.qx, vec![2.5, 2.6]);
        assert!(loader.load(12).is_err());
    }

    #[test]
    fn json_writer_produces_result_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut writer = JsonWriter {
            dir: temp.path().join("out"),
        };
        writer
            .write(ScanOutput {
                scan: 11,
                modulus: Array3::from_elem((1, 1, 2), 1.0),
                phase: Array3::zeros((1, 1, 2)),
                strain: Array3::zeros((1, 1, 2)),
                support: Some(Array3::from_elem((1, 1, 2), 1.0)),
                voxel_sizes_nm: [5.0; 3],
                metadata: json!({"comment": ""}),
            })
            .unwrap();

        let content =
            std::fs::read_to_string(temp.path().join("out").join("S11_result.json")).unwrap();
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["scan"], 11);
        assert_eq!(parsed["shape"], json!([1, 1, 2]));
        assert_eq!(parsed["support"], json!([1.0, 1.0]));
    }

    #[test]
    fn memory_writer_collects_outputs() {
        let mut writer = MemoryWriter::new();
        writer
            .write(ScanOutput {
                scan: 7,
                modulus: Array3::zeros((1, 1, 1)),
                phase: Array3::zeros((1, 1, 1)),
                strain: Array3::zeros((1, 1, 1)),
                support: None,
                voxel_sizes_nm: [5.0; 3],
                metadata: serde_json::json!({}),
            })
            .unwrap();
        assert_eq!(writer.outputs.len(), 1);
        assert_eq!(writer.outputs[0].scan, 7);
    }
}
