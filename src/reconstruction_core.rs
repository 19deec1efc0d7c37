//! Per sub-volume worker: back-projects every valid frame into its slab.

use crate::enums::Compounding;
use crate::error::CoreError;
use crate::executor::StopSignal;
use crate::partitioner::{SubRegion, VolumeGeometry, footprint, mask_corners};
use crate::preprocessor::{ProcessedFrame, ProcessedInputData};
use crate::volume::{self, BACKGROUND};

use nalgebra::Vector3;
use ndarray::Array3;
use std::sync::Arc;
use tracing::debug;

pub type CoreId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreState {
    Idle,
    Running,
    Completed,
    Failed(CoreError),
}

/// Voxels of one slab, ready to be placed into the output volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelBuffer {
    pub region: SubRegion,
    /// (depth, height, width) of the slab.
    pub values: Array3<u8>,
    pub coverage: Array3<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreSettings {
    pub compounding: Compounding,
    /// Zero writes each pixel into its nearest voxel only.
    pub kernel_radius_mm: f64,
}

impl CoreSettings {
    /// Working memory per voxel: accumulator plus output value and coverage.
    pub fn bytes_per_voxel(&self) -> u64 {
        let accumulator = match self.compounding {
            Compounding::Nearest => 1 + 4,
            Compounding::Average => 4 + 4,
            Compounding::Maximum => 1 + 1,
        };
        accumulator + 2
    }
}

pub struct ReconstructionCore {
    id: CoreId,
    region: SubRegion,
    geometry: VolumeGeometry,
    input: Arc<ProcessedInputData>,
    settings: CoreSettings,
    state: CoreState,
}

impl ReconstructionCore {
    pub fn new(
        id: CoreId,
        region: SubRegion,
        geometry: VolumeGeometry,
        input: Arc<ProcessedInputData>,
        settings: CoreSettings,
    ) -> Self {
        Self {
            id,
            region,
            geometry,
            input,
            settings,
            state: CoreState::Idle,
        }
    }

    pub fn id(&self) -> CoreId {
        self.id
    }

    pub fn region(&self) -> &SubRegion {
        &self.region
    }

    pub fn state(&self) -> &CoreState {
        &self.state
    }

    pub fn input(&self) -> &Arc<ProcessedInputData> {
        &self.input
    }

    pub fn estimated_memory(&self) -> u64 {
        (self.region.voxel_count(&self.geometry) as u64).saturating_mul(self.settings.bytes_per_voxel())
    }

    /// Reconstruct the slab. `on_frame_done` is called once per valid frame.
    ///
    /// `stop` is polled before every frame; a raised signal ends the run with
    /// [`CoreError::Cancelled`]. A core runs at most once.
    pub fn run(
        &mut self,
        stop: &StopSignal,
        on_frame_done: &(dyn Fn() + Sync),
    ) -> Result<VoxelBuffer, CoreError> {
        if self.state != CoreState::Idle {
            return Err(CoreError::AlreadyExecuted);
        }
        self.state = CoreState::Running;
        let result = self.reconstruct(stop, on_frame_done);
        self.state = match &result {
            Ok(_) => CoreState::Completed,
            Err(e) => CoreState::Failed(e.clone()),
        };
        result
    }

    fn reconstruct(
        &self,
        stop: &StopSignal,
        on_frame_done: &(dyn Fn() + Sync),
    ) -> Result<VoxelBuffer, CoreError> {
        if stop.should_stop() {
            return Err(CoreError::Cancelled);
        }

        let shape = (self.region.depth(), self.geometry.dim.1, self.geometry.dim.2);
        let mut accumulator = Accumulator::new(self.settings.compounding, shape.0 * shape.1 * shape.2)?;
        let corners = mask_corners(&self.input.mask);
        let reach = self.settings.kernel_radius_mm / self.geometry.spacing;

        let mut contributing = 0usize;
        for frame in self.input.valid_frames() {
            if stop.should_stop() {
                return Err(CoreError::Cancelled);
            }
            let intersects = corners.is_some_and(|corners| self.frame_reaches_slab(frame, &corners, reach));
            if intersects {
                self.splat_frame(frame, reach, &mut accumulator);
                contributing += 1;
            }
            on_frame_done();
        }

        debug!(
            "Core {} (slices {:?}): {} contributing frames",
            self.id, self.region.slices, contributing
        );
        accumulator.finish(self.region.clone(), shape)
    }

    /// Conservative test whether any pixel of the frame can land in the slab.
    fn frame_reaches_slab(&self, frame: &ProcessedFrame, corners: &[(f64, f64); 4], reach: f64) -> bool {
        let (z_min, z_max) = footprint(frame, &self.input.probe, corners)
            .iter()
            .map(|p| self.geometry.world_to_voxel(p).z)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), z| (lo.min(z), hi.max(z)));
        let first = self.region.slices.start as f64;
        let last = self.region.slices.end as f64 - 1.0;
        z_max + reach + 0.5 >= first && z_min - reach - 0.5 <= last
    }

    fn splat_frame(&self, frame: &ProcessedFrame, reach: f64, accumulator: &mut Accumulator) {
        let probe = &self.input.probe;
        let to_voxel = |col: f64, row: f64| {
            self.geometry
                .world_to_voxel(&frame.frame_to_reference.transform_point(&probe.pixel_to_image(col, row)))
        };
        let base = to_voxel(0.0, 0.0);
        let d_col = to_voxel(1.0, 0.0) - base;
        let d_row = to_voxel(0.0, 1.0) - base;

        let (width, height) = frame.image.dimensions();
        let pixels = frame.image.as_raw();
        let mask = self.input.mask.as_raw();

        for row in 0..height as usize {
            let row_start = base + d_row * row as f64;
            for col in 0..width as usize {
                let i = row * width as usize + col;
                if mask[i] == 0 {
                    continue;
                }
                let point = row_start + d_col * col as f64;
                if reach > 0.0 {
                    self.splat_kernel(&point, pixels[i], reach, accumulator);
                } else {
                    self.splat_nearest(&point, pixels[i], accumulator);
                }
            }
        }
    }

    /// Local index of a voxel inside the slab, if it belongs to it.
    #[inline]
    fn local_index(&self, x: i64, y: i64, z: i64) -> Option<usize> {
        let (_, ny, nx) = self.geometry.dim;
        let slices = &self.region.slices;
        if x < 0 || y < 0 || z < slices.start as i64 || x >= nx as i64 || y >= ny as i64 || z >= slices.end as i64 {
            return None;
        }
        let z_local = z as usize - slices.start;
        Some((z_local * ny + y as usize) * nx + x as usize)
    }

    #[inline]
    fn splat_nearest(&self, point: &Vector3<f64>, value: u8, accumulator: &mut Accumulator) {
        let voxel = point.map(f64::round);
        if let Some(index) = self.local_index(voxel.x as i64, voxel.y as i64, voxel.z as i64) {
            let distance = (point - voxel).norm() * self.geometry.spacing;
            accumulator.add(index, value, distance as f32);
        }
    }

    fn splat_kernel(&self, point: &Vector3<f64>, value: u8, reach: f64, accumulator: &mut Accumulator) {
        let lo = point.map(|c| (c - reach).ceil() as i64);
        let hi = point.map(|c| (c + reach).floor() as i64);
        let z_lo = lo.z.max(self.region.slices.start as i64);
        let z_hi = hi.z.min(self.region.slices.end as i64 - 1);
        for z in z_lo..=z_hi {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    let Some(index) = self.local_index(x, y, z) else {
                        continue;
                    };
                    let offset = point - Vector3::new(x as f64, y as f64, z as f64);
                    let distance = offset.norm();
                    if distance <= reach {
                        accumulator.add(index, value, (distance * self.geometry.spacing) as f32);
                    }
                }
            }
        }
    }
}

/// Compounding state for every voxel of a slab.
enum Accumulator {
    /// Closest contribution so far. Updates need a strictly smaller
    /// distance, so with frames visited in index order the earliest frame
    /// keeps a tied voxel.
    Nearest { value: Vec<u8>, distance: Vec<f32> },
    Average { sum: Vec<u32>, count: Vec<u32> },
    Maximum { value: Vec<u8>, covered: Vec<bool> },
}

impl Accumulator {
    fn new(compounding: Compounding, len: usize) -> Result<Self, CoreError> {
        Ok(match compounding {
            Compounding::Nearest => Accumulator::Nearest {
                value: try_filled(len, BACKGROUND)?,
                distance: try_filled(len, f32::INFINITY)?,
            },
            Compounding::Average => Accumulator::Average {
                sum: try_filled(len, 0)?,
                count: try_filled(len, 0)?,
            },
            Compounding::Maximum => Accumulator::Maximum {
                value: try_filled(len, BACKGROUND)?,
                covered: try_filled(len, false)?,
            },
        })
    }

    #[inline]
    fn add(&mut self, index: usize, pixel: u8, distance_mm: f32) {
        match self {
            Accumulator::Nearest { value, distance } => {
                if distance_mm < distance[index] {
                    distance[index] = distance_mm;
                    value[index] = pixel;
                }
            }
            Accumulator::Average { sum, count } => {
                sum[index] += u32::from(pixel);
                count[index] += 1;
            }
            Accumulator::Maximum { value, covered } => {
                if !covered[index] || pixel > value[index] {
                    value[index] = pixel;
                }
                covered[index] = true;
            }
        }
    }

    fn finish(self, region: SubRegion, shape: (usize, usize, usize)) -> Result<VoxelBuffer, CoreError> {
        let (values, coverage): (Vec<u8>, Vec<bool>) = match self {
            Accumulator::Nearest { value, distance } => {
                let coverage = distance.iter().map(|d| d.is_finite()).collect();
                (value, coverage)
            }
            Accumulator::Average { sum, count } => sum
                .iter()
                .zip(&count)
                .map(|(&s, &c)| {
                    if c == 0 {
                        (BACKGROUND, false)
                    } else {
                        (((s + c / 2) / c) as u8, true)
                    }
                })
                .unzip(),
            Accumulator::Maximum { value, covered } => (value, covered),
        };

        let values = Array3::from_shape_vec(shape, values).map_err(|e| CoreError::Internal(e.to_string()))?;
        let coverage = Array3::from_shape_vec(shape, coverage).map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(VoxelBuffer {
            region,
            values,
            coverage,
        })
    }
}

fn try_filled<T: Clone>(len: usize, elem: T) -> Result<Vec<T>, CoreError> {
    volume::try_filled(len, elem).map_err(|_| CoreError::Allocation {
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })
}
