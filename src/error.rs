use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconstructionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reconstruction core {core} failed ({failed_cores} core(s) failed in total): {reason}")]
    CoreExecution {
        core: usize,
        failed_cores: usize,
        reason: String,
    },

    #[error("Reconstruction cancelled")]
    Cancelled,

    #[error("A reconstruction is already running")]
    Busy,

    #[error("Reconstruction thread terminated without a result")]
    Disconnected,

    #[error("Could not build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Could not allocate {bytes} bytes for the output volume")]
    Allocation { bytes: u64 },

    #[error("Output volume shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Could not spawn reconstruction thread: {0}")]
    Spawn(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameters: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Could not write image: {0}")]
    Image(#[from] image::ImageError),
}

impl ReconstructionError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Failure reported by a single reconstruction core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    #[error("cancelled")]
    Cancelled,

    #[error("could not allocate {bytes} bytes for the sub-volume")]
    Allocation { bytes: usize },

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("core already executed")]
    AlreadyExecuted,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackingGapReason {
    /// Frame timestamp lies before the first or after the last tracking sample.
    OutsideTrackingRange,
    /// The bracketing tracking samples are further apart than the allowed gap.
    GapTooLarge { gap: f64 },
}

/// A frame left out of the reconstruction because its pose is unreliable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingGapWarning {
    pub frame_index: usize,
    pub timestamp: f64,
    pub reason: TrackingGapReason,
}

impl std::fmt::Display for TrackingGapWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            TrackingGapReason::OutsideTrackingRange => write!(
                f,
                "frame {} at {:.3}s is outside the tracking range",
                self.frame_index, self.timestamp
            ),
            TrackingGapReason::GapTooLarge { gap } => write!(
                f,
                "frame {} at {:.3}s falls in a {:.3}s tracking gap",
                self.frame_index, self.timestamp, gap
            ),
        }
    }
}
