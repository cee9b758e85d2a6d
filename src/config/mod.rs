//! Configuration model for bcdi-post.
//!
//! This module defines the Config struct that represents the YAML parameter
//! file driving the pipeline. It supports forward-compatible YAML parsing
//! (unknown keys are ignored), sensible defaults for optional keys, typed
//! closed-set parameters, and validation of the cross-key invariants.

mod model;
mod operations;
pub mod types;


// Re-export public API
pub use model::Config;
pub use types::{
    ApodizationWindow, AveragingSpace, Beamline, CenteringMethod, DataFrame, DirectSpaceCentering,
    FixVoxel, InterpolationMethod, MotorValue, OffsetMethod, OpticalPathMethod,
    ReciprocalSpaceCentering, RefAxis, RockingAngle, SaveFrame, SortMethod, StrainMethod,
    TickDirection,
};
