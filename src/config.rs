use crate::enums::{AngioMode, Compounding, ExecutionMode, TemporalInterpolation};
use crate::error::ReconstructionError;
use crate::partitioner::Bounds;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of a single reconstruction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionParams {
    pub interpolation: TemporalInterpolation,
    /// Largest tolerated time between two tracking samples around a frame.
    /// Frames inside a wider gap are dropped. `None` accepts any gap.
    pub max_tracking_gap_s: Option<f64>,
    /// Added to every tracking timestamp before resampling.
    pub temporal_calibration_s: f64,
    /// Shift the tracking stream so that its first sample coincides with the
    /// first frame. Applied after the temporal calibration.
    pub align_timestamps: bool,
    /// Isotropic output spacing. Defaults to the finest input pixel spacing.
    pub output_spacing_mm: Option<f64>,
    /// Fixed output bounds in reference space; computed from the sweep otherwise.
    pub explicit_bounds: Option<Bounds>,
    /// Extra space added around the computed sweep bounds.
    pub margin_mm: f64,
    /// Upper limit on the number of output voxels; the spacing is coarsened
    /// until the volume fits.
    pub max_output_voxels: Option<usize>,
    pub compounding: Compounding,
    /// Pixels are splatted into every voxel whose centre is within this
    /// distance. Zero writes the nearest voxel only.
    pub kernel_radius_mm: f64,
    /// Radius in voxels used to fill untouched voxels after merging. Zero
    /// disables hole filling.
    pub hole_fill_radius: usize,
    /// Shrink the probe sector mask by this percentage on every side.
    pub mask_reduce_percent: f64,
    pub angio: AngioMode,
    pub execution: ExecutionConfig,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        Self {
            interpolation: TemporalInterpolation::default(),
            max_tracking_gap_s: None,
            temporal_calibration_s: 0.0,
            align_timestamps: false,
            output_spacing_mm: None,
            explicit_bounds: None,
            margin_mm: 0.0,
            max_output_voxels: None,
            compounding: Compounding::default(),
            kernel_radius_mm: 0.0,
            hole_fill_radius: 0,
            mask_reduce_percent: 0.0,
            angio: AngioMode::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl ReconstructionParams {
    pub fn from_json_str(json: &str) -> Result<Self, ReconstructionError> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ReconstructionError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ReconstructionError> {
        let scalars = [
            ("temporal_calibration_s", self.temporal_calibration_s, false),
            ("margin_mm", self.margin_mm, true),
            ("kernel_radius_mm", self.kernel_radius_mm, true),
            ("mask_reduce_percent", self.mask_reduce_percent, true),
        ];
        for (name, value, must_be_non_negative) in scalars {
            if !value.is_finite() || (must_be_non_negative && value < 0.0) {
                return Err(ReconstructionError::invalid_input(format!(
                    "{name} must be a finite{} number, got {value}",
                    if must_be_non_negative { " non-negative" } else { "" }
                )));
            }
        }
        if let Some(gap) = self.max_tracking_gap_s {
            if !(gap.is_finite() && gap > 0.0) {
                return Err(ReconstructionError::invalid_input(format!(
                    "max_tracking_gap_s must be positive, got {gap}"
                )));
            }
        }
        if let Some(spacing) = self.output_spacing_mm {
            if !(spacing.is_finite() && spacing > 0.0) {
                return Err(ReconstructionError::invalid_input(format!(
                    "output_spacing_mm must be positive, got {spacing}"
                )));
            }
        }
        if let Some(bounds) = &self.explicit_bounds {
            bounds.validate()?;
        }
        if self.max_output_voxels == Some(0) {
            return Err(ReconstructionError::invalid_input(
                "max_output_voxels must be at least 1",
            ));
        }
        if self.execution.max_threads == 0 || self.execution.cores == Some(0) {
            return Err(ReconstructionError::invalid_input(
                "thread and core counts must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Default memory budget for a run: 2 GiB.
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 2 << 30;

/// How the reconstruction cores are scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Upper bound on concurrently running cores.
    pub max_threads: usize,
    /// Number of sub-volumes. Defaults to `max_threads`.
    pub cores: Option<usize>,
    /// Memory available for core working buffers and merging. `None`
    /// (`null` in JSON) means unlimited.
    pub memory_budget_bytes: Option<u64>,
    pub mode: ExecutionMode,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            cores: None,
            memory_budget_bytes: Some(DEFAULT_MEMORY_BUDGET_BYTES),
            mode: ExecutionMode::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn core_count(&self) -> usize {
        self.cores.unwrap_or(self.max_threads).max(1)
    }
}
