use crate::error::ReconstructionError;
use crate::transform::RigidTransform;

use image::{GrayImage, Luma};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Shape of the region in the image that actually holds echo data.
///
/// Distances are in millimetres from the probe origin, measured along the
/// image rows (depth) and columns (lateral).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProbeSector {
    /// Every pixel is valid.
    Full,
    Linear {
        width_mm: f64,
        depth_start_mm: f64,
        depth_end_mm: f64,
    },
    /// Curvilinear/phased array fan centred on the origin.
    Sector {
        opening_angle_rad: f64,
        depth_start_mm: f64,
        depth_end_mm: f64,
    },
}

/// Calibrated geometry of the ultrasound probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDefinition {
    /// Image size in pixels (width, height).
    pub size: (u32, u32),
    /// Pixel spacing in mm (x, y).
    pub spacing: (f64, f64),
    /// Pixel position of the probe origin (transducer centre or fan apex).
    pub origin: (f64, f64),
    pub sector: ProbeSector,
    /// Image plane to tracked sensor transform.
    pub calibration: RigidTransform,
}

impl ProbeDefinition {
    pub fn new(size: (u32, u32), spacing: (f64, f64)) -> Self {
        Self {
            size,
            spacing,
            origin: (0.0, 0.0),
            sector: ProbeSector::Full,
            calibration: RigidTransform::identity(),
        }
    }

    pub fn with_origin(mut self, origin: (f64, f64)) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_sector(mut self, sector: ProbeSector) -> Self {
        self.sector = sector;
        self
    }

    pub fn with_calibration(mut self, calibration: RigidTransform) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn validate(&self) -> Result<(), ReconstructionError> {
        let (width, height) = self.size;
        if width == 0 || height == 0 {
            return Err(ReconstructionError::invalid_input("probe image size is empty"));
        }
        let (sx, sy) = self.spacing;
        if !(sx.is_finite() && sy.is_finite() && sx > 0.0 && sy > 0.0) {
            return Err(ReconstructionError::invalid_input(format!(
                "probe pixel spacing must be positive, got ({sx}, {sy})"
            )));
        }
        let depth_range = match self.sector {
            ProbeSector::Full => None,
            ProbeSector::Linear {
                depth_start_mm,
                depth_end_mm,
                ..
            }
            | ProbeSector::Sector {
                depth_start_mm,
                depth_end_mm,
                ..
            } => Some((depth_start_mm, depth_end_mm)),
        };
        if let Some((start, end)) = depth_range {
            if !(start.is_finite() && end.is_finite() && start < end) {
                return Err(ReconstructionError::invalid_input(format!(
                    "probe depth range [{start}, {end}] is empty"
                )));
            }
        }
        Ok(())
    }

    /// Position of a pixel in the image plane, in mm.
    #[inline]
    pub fn pixel_to_image(&self, col: f64, row: f64) -> Point3<f64> {
        Point3::new(col * self.spacing.0, row * self.spacing.1, 0.0)
    }

    /// The sector shrunk by `percent` of its extent on every side.
    pub fn reduced_sector(&self, percent: f64) -> ProbeSector {
        let f = (percent / 100.0).clamp(0.0, 0.49);
        match self.sector {
            ProbeSector::Full => ProbeSector::Full,
            ProbeSector::Linear {
                width_mm,
                depth_start_mm,
                depth_end_mm,
            } => {
                let inset = (depth_end_mm - depth_start_mm) * f;
                ProbeSector::Linear {
                    width_mm: width_mm * (1.0 - 2.0 * f),
                    depth_start_mm: depth_start_mm + inset,
                    depth_end_mm: depth_end_mm - inset,
                }
            }
            ProbeSector::Sector {
                opening_angle_rad,
                depth_start_mm,
                depth_end_mm,
            } => {
                let inset = (depth_end_mm - depth_start_mm) * f;
                ProbeSector::Sector {
                    opening_angle_rad: opening_angle_rad * (1.0 - 2.0 * f),
                    depth_start_mm: depth_start_mm + inset,
                    depth_end_mm: depth_end_mm - inset,
                }
            }
        }
    }

    /// Mask of the pixels holding echo data: 255 inside, 0 outside.
    pub fn sector_mask(&self, reduce_percent: f64) -> GrayImage {
        let (width, height) = self.size;
        let sector = self.reduced_sector(reduce_percent);
        let f = (reduce_percent / 100.0).clamp(0.0, 0.49);
        // A full frame is reduced by cropping the border instead.
        let (border_x, border_y) = (width as f64 * f, height as f64 * f);

        GrayImage::from_fn(width, height, |x, y| {
            let inside = match sector {
                ProbeSector::Full => {
                    let (x, y) = (x as f64, y as f64);
                    x >= border_x
                        && y >= border_y
                        && x <= width as f64 - 1.0 - border_x
                        && y <= height as f64 - 1.0 - border_y
                }
                _ => self.sector_contains(&sector, x as f64, y as f64),
            };
            Luma([if inside { 255 } else { 0 }])
        })
    }

    fn sector_contains(&self, sector: &ProbeSector, col: f64, row: f64) -> bool {
        let dx = (col - self.origin.0) * self.spacing.0;
        let dy = (row - self.origin.1) * self.spacing.1;
        match *sector {
            ProbeSector::Full => true,
            ProbeSector::Linear {
                width_mm,
                depth_start_mm,
                depth_end_mm,
            } => dx.abs() <= width_mm / 2.0 && dy >= depth_start_mm && dy <= depth_end_mm,
            ProbeSector::Sector {
                opening_angle_rad,
                depth_start_mm,
                depth_end_mm,
            } => {
                let radius = dx.hypot(dy);
                let angle = dx.atan2(dy);
                radius >= depth_start_mm
                    && radius <= depth_end_mm
                    && angle.abs() <= opening_angle_rad / 2.0
            }
        }
    }
}
