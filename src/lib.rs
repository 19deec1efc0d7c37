//! # Ultrasound reconstruction library
//!
//! This crate turns a freehand ultrasound sweep, a sequence of tracked 2D
//! frames, into a regular 3D voxel volume.
//!
//! A run goes through the following stages:
//!  - Preprocessing: every frame gets a pose by resampling the tracking
//!    stream at the frame timestamp (closest sample or SLERP/linear
//!    interpolation). Frames outside the tracking range or inside a tracking
//!    gap are dropped with a warning. The probe sector and an optional
//!    external mask are applied and colour flow frames are split into a
//!    B-mode and an angio stream.
//!  - Partitioning: the output grid is fitted around the sweep and split
//!    into disjoint slabs along the z axis, one per reconstruction core.
//!  - Reconstruction: each core back-projects all frames into its slab.
//!    Cores run in parallel on a rayon pool if their buffers fit into the
//!    memory budget, otherwise one after the other.
//!  - Merging: slabs are copied into the output volume, optionally followed
//!    by hole filling. Voxels no frame reached keep the background value 0.
//!
//! Runs can be cancelled at any time. Completion is reported exactly once
//! through a [`ReconstructionObserver`] and the run handle.
//!
//! # Examples
//!
//! ## Reconstructing a synthetic sweep
//!
//! ```no_run
//! # use us_reconstruction::{CancelToken, ReconstructionExecutor, ReconstructionParams};
//! # use us_reconstruction::enums::Orientation;
//! # use us_reconstruction::synthetic::{SweepConfig, linear_sweep};
//! let raw = linear_sweep(&SweepConfig::default());
//! let output = ReconstructionExecutor::default()
//!     .run_blocking(&raw, &ReconstructionParams::default(), CancelToken::new())
//!     .expect("should have reconstructed the sweep");
//! let image = output
//!     .bmode
//!     .get_image_from_axis(output.bmode.dim().0 / 2, Orientation::Axial)
//!     .expect("should have returned image at center of volume");
//! image.save("result.png");
//! ```

pub mod config;
pub mod enums;
pub mod error;
pub mod executor;
pub mod input;
mod interpolator;
pub mod partitioner;
pub mod preprocessor;
pub mod probe;
pub mod reconstruction_core;
pub mod resampler;
pub mod synthetic;
pub mod transform;
pub mod volume;

pub use config::{ExecutionConfig, ReconstructionParams};
pub use error::{CoreError, ReconstructionError, TrackingGapWarning};
pub use executor::{
    CancelToken, NoopObserver, ReconstructionExecutor, ReconstructionHandle,
    ReconstructionObserver, ReconstructionOutcome, ReconstructionOutput, ReconstructionSession,
    TracingObserver,
};
pub use input::{Frame, RawInputData};
pub use interpolator::Interpolator;
pub use probe::{ProbeDefinition, ProbeSector};
pub use transform::{RigidTransform, TimestampedTransform};
pub use volume::OutputVolume;
