//! Turns a raw acquisition into the read-only data shared by all cores.

use crate::config::ReconstructionParams;
use crate::enums::AngioMode;
use crate::error::{ReconstructionError, TrackingGapWarning};
use crate::input::{Frame, FramePixels, RawInputData};
use crate::partitioner::VolumeRequest;
use crate::probe::ProbeDefinition;
use crate::resampler::PoseResampler;
use crate::transform::{RigidTransform, TimestampedTransform};

use image::{GrayImage, Luma, RgbImage, imageops};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Channel spread below which an RGB pixel still counts as grey.
const GRAY_TOLERANCE: u8 = 4;

/// Minimum number of tracked frames needed to span a volume.
pub const MIN_VALID_FRAMES: usize = 2;

/// A masked greyscale frame with its pose in reference space.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    /// Position in the original acquisition.
    pub index: usize,
    pub timestamp: f64,
    pub image: GrayImage,
    /// Image plane (mm) to output reference space.
    pub frame_to_reference: RigidTransform,
    /// False when the frame has no reliable pose; it is then skipped.
    pub valid: bool,
}

/// One stream of frames ready for reconstruction. Immutable once built and
/// shared read-only between the cores.
#[derive(Debug, Clone)]
pub struct ProcessedInputData {
    pub name: String,
    pub frames: Vec<ProcessedFrame>,
    pub probe: ProbeDefinition,
    /// 255 where pixels may contribute, 0 elsewhere.
    pub mask: GrayImage,
    pub volume: VolumeRequest,
}

impl ProcessedInputData {
    pub fn valid_frames(&self) -> impl Iterator<Item = &ProcessedFrame> {
        self.frames.iter().filter(|f| f.valid)
    }

    pub fn valid_frame_count(&self) -> usize {
        self.valid_frames().count()
    }

    /// Frame dimensions (width, height).
    pub fn frame_size(&self) -> (u32, u32) {
        self.mask.dimensions()
    }
}

/// Result of preprocessing: the B-mode stream, the optional angio stream
/// sharing the same poses, and the frames dropped for bad tracking.
#[derive(Debug, Clone)]
pub struct PreprocessedInput {
    pub bmode: Arc<ProcessedInputData>,
    pub angio: Option<Arc<ProcessedInputData>>,
    pub warnings: Vec<TrackingGapWarning>,
}

pub struct InputPreprocessor;

impl InputPreprocessor {
    /// Validate and condition a raw acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::InvalidInput`] if the frames disagree in
    /// size (with each other, the probe or the mask), timestamps are not
    /// finite, or fewer than [`MIN_VALID_FRAMES`] frames have valid tracking.
    pub fn process(
        raw: &RawInputData,
        params: &ReconstructionParams,
    ) -> Result<PreprocessedInput, ReconstructionError> {
        params.validate()?;
        raw.probe.validate()?;
        Self::validate_frames(raw)?;

        let tracking = Self::condition_tracking(raw, params)?;
        let frame_timestamps: Vec<f64> = raw.frames.iter().map(|f| f.timestamp).collect();
        let resampled = PoseResampler::new(params.interpolation, params.max_tracking_gap_s)
            .resample(&tracking, &frame_timestamps);

        for warning in &resampled.warnings {
            debug!("{warning}");
        }
        let valid = resampled.valid_count();
        if valid < MIN_VALID_FRAMES {
            return Err(ReconstructionError::invalid_input(format!(
                "only {valid} of {} frames have valid tracking, at least {MIN_VALID_FRAMES} required",
                raw.frames.len()
            )));
        }
        if !resampled.warnings.is_empty() {
            warn!(
                "{} of {} frames dropped due to missing tracking",
                resampled.warnings.len(),
                raw.frames.len()
            );
        }

        let mask = Self::build_mask(raw, params);
        let poses: Vec<(RigidTransform, bool)> = resampled
            .poses
            .iter()
            .map(|pose| {
                (
                    raw.reference_transform * pose.transform * raw.probe.calibration,
                    pose.valid,
                )
            })
            .collect();

        let angio_requested = Self::wants_angio(raw, &mask, params.angio);
        let converted: Vec<(GrayImage, Option<GrayImage>)> = raw
            .frames
            .par_iter()
            .map(|frame| Self::convert_frame(frame, &mask, angio_requested))
            .collect();

        let volume = VolumeRequest::from_params(params);
        let (bmode_frames, angio_frames): (Vec<_>, Vec<_>) = converted
            .into_iter()
            .zip(raw.frames.iter())
            .zip(poses)
            .enumerate()
            .map(|(index, (((bmode, angio), frame), (frame_to_reference, valid)))| {
                let make = |image| ProcessedFrame {
                    index,
                    timestamp: frame.timestamp,
                    image,
                    frame_to_reference,
                    valid,
                };
                (make(bmode), angio.map(make))
            })
            .unzip();

        let angio = if angio_requested {
            Some(Arc::new(ProcessedInputData {
                name: format!("{}_angio", raw.name),
                frames: angio_frames.into_iter().flatten().collect(),
                probe: raw.probe.clone(),
                mask: mask.clone(),
                volume: volume.clone(),
            }))
        } else {
            None
        };

        info!(
            "Preprocessed '{}': {} frames, {} with valid tracking{}",
            raw.name,
            raw.frames.len(),
            valid,
            if angio.is_some() { ", angio stream separated" } else { "" }
        );

        Ok(PreprocessedInput {
            bmode: Arc::new(ProcessedInputData {
                name: raw.name.clone(),
                frames: bmode_frames,
                probe: raw.probe.clone(),
                mask,
                volume,
            }),
            angio,
            warnings: resampled.warnings,
        })
    }

    fn validate_frames(raw: &RawInputData) -> Result<(), ReconstructionError> {
        let Some(first) = raw.frames.first() else {
            return Err(ReconstructionError::invalid_input("no frames in acquisition"));
        };
        let first_dim = first.pixels.dimensions();
        if let Some((index, frame)) = raw
            .frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.pixels.dimensions() != first_dim)
        {
            return Err(ReconstructionError::invalid_input(format!(
                "inconsistent frame dimensions: frame 0 is {:?}, frame {index} is {:?}",
                first_dim,
                frame.pixels.dimensions()
            )));
        }
        if first_dim != raw.probe.size {
            return Err(ReconstructionError::invalid_input(format!(
                "frame size {:?} does not match probe size {:?}",
                first_dim, raw.probe.size
            )));
        }
        if let Some(mask) = &raw.mask {
            if mask.dimensions() != first_dim {
                return Err(ReconstructionError::invalid_input(format!(
                    "mask size {:?} does not match frame size {:?}",
                    mask.dimensions(),
                    first_dim
                )));
            }
        }
        if raw.frames.iter().any(|f| !f.timestamp.is_finite()) {
            return Err(ReconstructionError::invalid_input("frame timestamps must be finite"));
        }
        Ok(())
    }

    /// Apply temporal calibration and alignment, and sort by time.
    fn condition_tracking(
        raw: &RawInputData,
        params: &ReconstructionParams,
    ) -> Result<Vec<TimestampedTransform>, ReconstructionError> {
        if raw.tracking.iter().any(|s| !s.timestamp.is_finite()) {
            return Err(ReconstructionError::invalid_input(
                "tracking timestamps must be finite",
            ));
        }

        let mut tracking = raw.tracking.clone();
        tracking.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let mut shift = params.temporal_calibration_s;
        if params.align_timestamps {
            let first_frame = raw
                .frames
                .iter()
                .map(|f| f.timestamp)
                .min_by(f64::total_cmp);
            if let (Some(first_frame), Some(first_sample)) = (first_frame, tracking.first()) {
                shift = first_frame - first_sample.timestamp;
            }
        }
        if shift != 0.0 {
            debug!("Shifting tracking timestamps by {shift:.4}s");
            for sample in &mut tracking {
                sample.timestamp += shift;
            }
        }
        Ok(tracking)
    }

    fn build_mask(raw: &RawInputData, params: &ReconstructionParams) -> GrayImage {
        let mut mask = raw.probe.sector_mask(params.mask_reduce_percent);
        if let Some(external) = &raw.mask {
            for (m, e) in mask.pixels_mut().zip(external.pixels()) {
                if e.0[0] == 0 {
                    *m = Luma([0]);
                }
            }
        }
        mask
    }

    #[inline]
    fn is_colored(rgb: [u8; 3]) -> bool {
        let max = rgb.iter().max().copied().unwrap_or(0);
        let min = rgb.iter().min().copied().unwrap_or(0);
        max - min > GRAY_TOLERANCE
    }

    fn wants_angio(raw: &RawInputData, mask: &GrayImage, mode: AngioMode) -> bool {
        let has_rgb = raw
            .frames
            .iter()
            .any(|f| matches!(f.pixels, FramePixels::Rgb(_)));
        match mode {
            AngioMode::Off => false,
            AngioMode::Force => has_rgb,
            AngioMode::Auto => raw.frames.par_iter().any(|frame| match &frame.pixels {
                FramePixels::Gray(_) => false,
                FramePixels::Rgb(image) => Self::has_colored_pixels(image, mask),
            }),
        }
    }

    fn has_colored_pixels(image: &RgbImage, mask: &GrayImage) -> bool {
        image
            .pixels()
            .zip(mask.pixels())
            .any(|(p, m)| m.0[0] > 0 && Self::is_colored(p.0))
    }

    /// Masked B-mode image, plus the masked angio image when requested.
    fn convert_frame(
        frame: &Frame,
        mask: &GrayImage,
        angio: bool,
    ) -> (GrayImage, Option<GrayImage>) {
        let (bmode, angio) = match &frame.pixels {
            FramePixels::Gray(image) => {
                let angio = angio.then(|| GrayImage::new(image.width(), image.height()));
                (image.clone(), angio)
            }
            FramePixels::Rgb(image) => {
                let bmode = imageops::grayscale(image);
                let angio = angio.then(|| {
                    GrayImage::from_fn(image.width(), image.height(), |x, y| {
                        if Self::is_colored(image.get_pixel(x, y).0) {
                            *bmode.get_pixel(x, y)
                        } else {
                            Luma([0])
                        }
                    })
                });
                (bmode, angio)
            }
        };
        (apply_mask(bmode, mask), angio.map(|a| apply_mask(a, mask)))
    }
}

fn apply_mask(mut image: GrayImage, mask: &GrayImage) -> GrayImage {
    for (p, m) in image.pixels_mut().zip(mask.pixels()) {
        if m.0[0] == 0 {
            *p = Luma([0]);
        }
    }
    image
}
