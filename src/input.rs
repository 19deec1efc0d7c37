//! Decoded acquisition bundle as handed over by the recording/file layer.

use crate::probe::ProbeDefinition;
use crate::transform::{RigidTransform, TimestampedTransform};

use image::{GrayImage, RgbImage};

#[derive(Debug, Clone)]
pub enum FramePixels {
    Gray(GrayImage),
    /// B-mode with colour flow overlay.
    Rgb(RgbImage),
}

impl FramePixels {
    /// (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            FramePixels::Gray(image) => image.dimensions(),
            FramePixels::Rgb(image) => image.dimensions(),
        }
    }
}

/// One 2D ultrasound image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Seconds since epoch.
    pub timestamp: f64,
    pub pixels: FramePixels,
}

impl Frame {
    pub fn gray(timestamp: f64, image: GrayImage) -> Self {
        Self {
            timestamp,
            pixels: FramePixels::Gray(image),
        }
    }

    pub fn rgb(timestamp: f64, image: RgbImage) -> Self {
        Self {
            timestamp,
            pixels: FramePixels::Rgb(image),
        }
    }
}

/// Everything needed for one reconstruction run, in memory.
#[derive(Debug, Clone)]
pub struct RawInputData {
    pub name: String,
    pub frames: Vec<Frame>,
    /// Tracked sensor poses in patient reference space.
    pub tracking: Vec<TimestampedTransform>,
    pub probe: ProbeDefinition,
    /// Patient reference to output reference transform.
    pub reference_transform: RigidTransform,
    /// Optional acquisition mask; ANDed with the probe sector.
    pub mask: Option<GrayImage>,
}

impl RawInputData {
    pub fn new(
        name: impl Into<String>,
        frames: Vec<Frame>,
        tracking: Vec<TimestampedTransform>,
        probe: ProbeDefinition,
    ) -> Self {
        Self {
            name: name.into(),
            frames,
            tracking,
            probe,
            reference_transform: RigidTransform::identity(),
            mask: None,
        }
    }

    pub fn with_reference_transform(mut self, transform: RigidTransform) -> Self {
        self.reference_transform = transform;
        self
    }

    pub fn with_mask(mut self, mask: GrayImage) -> Self {
        self.mask = Some(mask);
        self
    }
}
