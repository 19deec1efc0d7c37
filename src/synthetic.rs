//! Deterministic synthetic sweeps for the demo binary and tests.

use crate::input::{Frame, RawInputData};
use crate::probe::ProbeDefinition;
use crate::transform::{RigidTransform, TimestampedTransform};

use image::{GrayImage, Luma};
use nalgebra::Vector3;

#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub frame_count: usize,
    /// (width, height) in pixels.
    pub frame_size: (u32, u32),
    pub pixel_spacing_mm: f64,
    /// Probe advance along z between two frames.
    pub step_mm: f64,
    pub frame_interval_s: f64,
    /// Probe tilt around the x axis added per frame.
    pub tilt_per_frame_rad: f64,
    pub start_time_s: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            frame_count: 20,
            frame_size: (32, 24),
            pixel_spacing_mm: 0.5,
            step_mm: 0.5,
            frame_interval_s: 0.05,
            tilt_per_frame_rad: 0.0,
            start_time_s: 100.0,
        }
    }
}

/// Pixel value of the synthetic echo pattern; never the background value.
pub fn pattern_value(frame: usize, col: u32, row: u32) -> u8 {
    40 + ((col as usize * 7 + row as usize * 5 + frame * 3) % 200) as u8
}

fn pose_at(config: &SweepConfig, position: f64) -> RigidTransform {
    RigidTransform::from_axis_angle(
        Vector3::x(),
        config.tilt_per_frame_rad * position,
        Vector3::new(0.0, 0.0, config.step_mm * position),
    )
}

/// A straight freehand sweep along z. Tracking is sampled at every frame
/// time and half an interval before the first and after the last frame, so
/// every frame gets a valid pose.
pub fn linear_sweep(config: &SweepConfig) -> RawInputData {
    let (width, height) = config.frame_size;
    let frames = (0..config.frame_count)
        .map(|i| {
            let timestamp = config.start_time_s + i as f64 * config.frame_interval_s;
            let image = GrayImage::from_fn(width, height, |col, row| Luma([pattern_value(i, col, row)]));
            Frame::gray(timestamp, image)
        })
        .collect();

    let last = config.frame_count.saturating_sub(1) as f64;
    let tracking = std::iter::once(-0.5)
        .chain((0..config.frame_count).map(|i| i as f64))
        .chain(std::iter::once(last + 0.5))
        .map(|position| {
            TimestampedTransform::new(
                config.start_time_s + position * config.frame_interval_s,
                pose_at(config, position),
            )
        })
        .collect();

    let probe = ProbeDefinition::new(config.frame_size, (config.pixel_spacing_mm, config.pixel_spacing_mm));
    RawInputData::new("synthetic sweep", frames, tracking, probe)
}
