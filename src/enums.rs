use serde::{Deserialize, Serialize};

/// Axis used when cutting a 2D slice out of a reconstructed volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// How tracking samples are mapped onto frame timestamps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalInterpolation {
    /// Use the tracking sample nearest in time, earlier sample on ties.
    ClosestPoint,
    /// SLERP/lerp between the two bracketing tracking samples.
    #[default]
    Linear,
}

/// How overlapping pixel contributions are combined into a voxel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compounding {
    /// The pixel closest to the voxel center wins; earliest frame wins ties.
    #[default]
    Nearest,
    /// Mean of all contributions.
    Average,
    /// Brightest contribution.
    Maximum,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Parallel when the memory budget allows it, serial otherwise.
    #[default]
    Auto,
    Serial,
    Parallel,
}

/// Handling of colour flow (angio) data in RGB acquisitions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AngioMode {
    /// Never produce an angio stream; colour frames are converted to luma.
    Off,
    /// Produce an angio stream when coloured pixels are present.
    #[default]
    Auto,
    /// Always produce an angio stream for RGB input.
    Force,
}
