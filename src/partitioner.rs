//! Output volume geometry and its split into independent sub-volumes.

use crate::config::ReconstructionParams;
use crate::error::ReconstructionError;
use crate::interpolator::Interpolator;
use crate::preprocessor::{ProcessedFrame, ProcessedInputData};
use crate::probe::ProbeDefinition;

use image::GrayImage;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

/// Slack when converting an extent into a voxel count, so extents that are
/// an exact multiple of the spacing do not gain an extra slice.
const EXTENT_EPS: f64 = 1e-6;

/// Largest voxel count an `Array3` can hold.
const MAX_GRID_VOXELS: f64 = isize::MAX as f64;

/// Axis aligned box in reference space (mm), `[x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Bounds {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    pub fn enclosing(points: impl IntoIterator<Item = Point3<f64>>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| {
            let p = [p.x, p.y, p.z];
            Some(match acc {
                None => Bounds::new(p, p),
                Some(b) => Bounds::new(
                    std::array::from_fn(|i| b.min[i].min(p[i])),
                    std::array::from_fn(|i| b.max[i].max(p[i])),
                ),
            })
        })
    }

    pub fn expanded(&self, margin: f64) -> Self {
        Self::new(self.min.map(|v| v - margin), self.max.map(|v| v + margin))
    }

    pub fn extent(&self) -> [f64; 3] {
        std::array::from_fn(|i| self.max[i] - self.min[i])
    }

    pub fn validate(&self) -> Result<(), ReconstructionError> {
        let ok = (0..3).all(|i| {
            self.min[i].is_finite() && self.max[i].is_finite() && self.min[i] <= self.max[i]
        });
        if ok {
            Ok(())
        } else {
            Err(ReconstructionError::invalid_input(format!(
                "invalid bounds {:?} .. {:?}",
                self.min, self.max
            )))
        }
    }
}

/// Output volume settings requested by the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VolumeRequest {
    pub spacing_mm: Option<f64>,
    pub bounds: Option<Bounds>,
    pub margin_mm: f64,
    pub max_voxels: Option<usize>,
}

impl VolumeRequest {
    pub fn from_params(params: &ReconstructionParams) -> Self {
        Self {
            spacing_mm: params.output_spacing_mm,
            bounds: params.explicit_bounds,
            margin_mm: params.margin_mm,
            max_voxels: params.max_output_voxels,
        }
    }
}

/// Regular grid in reference space. Voxel `(z, y, x)` has its centre at
/// `origin + spacing * (x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    /// (depth, height, width) i.e. (z, y, x)
    pub dim: (usize, usize, usize),
    /// Isotropic voxel spacing in mm.
    pub spacing: f64,
    pub origin: Point3<f64>,
}

impl VolumeGeometry {
    pub fn voxel_count(&self) -> usize {
        self.dim.0.saturating_mul(self.dim.1).saturating_mul(self.dim.2)
    }

    pub fn voxel_center(&self, z: usize, y: usize, x: usize) -> Point3<f64> {
        self.origin + Vector3::new(x as f64, y as f64, z as f64) * self.spacing
    }

    /// Continuous voxel coordinates `(x, y, z)` of a reference space point.
    #[inline]
    pub fn world_to_voxel(&self, p: &Point3<f64>) -> Vector3<f64> {
        (p - self.origin) / self.spacing
    }

    pub fn bounds(&self) -> Bounds {
        let far = self.voxel_center(
            self.dim.0.saturating_sub(1),
            self.dim.1.saturating_sub(1),
            self.dim.2.saturating_sub(1),
        );
        Bounds::new(
            [self.origin.x, self.origin.y, self.origin.z],
            [far.x, far.y, far.z],
        )
    }
}

/// A contiguous slab of z slices owned by exactly one core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRegion {
    pub index: usize,
    pub slices: Range<usize>,
}

impl SubRegion {
    pub fn depth(&self) -> usize {
        self.slices.len()
    }

    pub fn voxel_count(&self, geometry: &VolumeGeometry) -> usize {
        self.depth()
            .saturating_mul(geometry.dim.1)
            .saturating_mul(geometry.dim.2)
    }

    pub fn contains_slice(&self, z: usize) -> bool {
        self.slices.contains(&z)
    }
}

pub struct OutputVolumePartitioner;

impl OutputVolumePartitioner {
    /// Geometry enclosing the footprint of every valid frame.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::InvalidInput`] if no spacing can be
    /// derived, the mask excludes every pixel, or no frame is valid.
    pub fn compute_geometry(input: &ProcessedInputData) -> Result<VolumeGeometry, ReconstructionError> {
        let request = &input.volume;
        let spacing = match request.spacing_mm {
            Some(spacing) => spacing,
            None => Interpolator::get_isotropic_spacing(&[input.probe.spacing]).ok_or_else(|| {
                ReconstructionError::invalid_input("cannot derive output spacing from probe")
            })?,
        };

        let bounds = match request.bounds {
            Some(bounds) => bounds,
            None => {
                let corners = mask_corners(&input.mask).ok_or_else(|| {
                    ReconstructionError::invalid_input("probe mask excludes every pixel")
                })?;
                let sweep = Bounds::enclosing(
                    input
                        .valid_frames()
                        .flat_map(|frame| footprint(frame, &input.probe, &corners)),
                )
                .ok_or_else(|| ReconstructionError::invalid_input("no valid frames"))?;
                sweep.expanded(request.margin_mm)
            }
        };
        bounds.validate()?;

        let geometry = Self::fit(bounds, spacing, request.max_voxels)?;
        debug!(
            "Output volume {:?} voxels at {:.3}mm, origin {:?}",
            geometry.dim, geometry.spacing, geometry.origin
        );
        Ok(geometry)
    }

    /// Grid covering `bounds`, coarsened until it has at most `max_voxels`.
    ///
    /// Voxel counts are evaluated in `f64`, so bounds far too large for the
    /// spacing are still coarsened, or rejected when no cap is given.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::InvalidInput`] if the grid has more
    /// voxels than can be addressed.
    pub fn fit(
        bounds: Bounds,
        spacing: f64,
        max_voxels: Option<usize>,
    ) -> Result<VolumeGeometry, ReconstructionError> {
        let extent = bounds.extent();
        let origin = Point3::from(bounds.min);
        let mut spacing = spacing;
        loop {
            let counts = extent.map(|e| ((e / spacing) - EXTENT_EPS).ceil().max(0.0) + 1.0);
            let total: f64 = counts.iter().product();
            match max_voxels {
                Some(max) if total > max as f64 => {
                    spacing *= (total / max as f64).cbrt().max(1.01);
                }
                _ if total > MAX_GRID_VOXELS => {
                    return Err(ReconstructionError::invalid_input(format!(
                        "output grid of {counts:?} voxels at {spacing}mm is too large"
                    )));
                }
                _ => {
                    let [nx, ny, nz] = counts.map(|n| n as usize);
                    return Ok(VolumeGeometry {
                        dim: (nz, ny, nx),
                        spacing,
                        origin,
                    });
                }
            }
        }
    }

    /// Split the volume into at most `num_cores` slabs along z.
    ///
    /// The slabs are disjoint, cover every slice, are never empty and are
    /// returned in slice order. Earlier slabs get the extra slice when the
    /// depth does not divide evenly.
    pub fn partition(geometry: &VolumeGeometry, num_cores: usize) -> Vec<SubRegion> {
        let depth = geometry.dim.0;
        let cores = num_cores.clamp(1, depth.max(1));
        let base = depth / cores;
        let extra = depth % cores;

        let mut start = 0;
        (0..cores)
            .map(|index| {
                let len = base + usize::from(index < extra);
                let region = SubRegion {
                    index,
                    slices: start..start + len,
                };
                start += len;
                region
            })
            .collect()
    }
}

/// Pixel corners `(col, row)` of the bounding box of the mask.
pub(crate) fn mask_corners(mask: &GrayImage) -> Option<[(f64, f64); 4]> {
    let mut bbox: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in mask.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        bbox = Some(match bbox {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bbox.map(|(x0, y0, x1, y1)| {
        let (x0, y0, x1, y1) = (x0 as f64, y0 as f64, x1 as f64, y1 as f64);
        [(x0, y0), (x1, y0), (x0, y1), (x1, y1)]
    })
}

/// The masked frame corners in reference space.
pub(crate) fn footprint(
    frame: &ProcessedFrame,
    probe: &ProbeDefinition,
    corners: &[(f64, f64); 4],
) -> [Point3<f64>; 4] {
    corners.map(|(col, row)| {
        frame
            .frame_to_reference
            .transform_point(&probe.pixel_to_image(col, row))
    })
}
