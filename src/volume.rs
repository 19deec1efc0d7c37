use crate::enums::Orientation;
use crate::error::ReconstructionError;
use crate::partitioner::VolumeGeometry;
use crate::reconstruction_core::VoxelBuffer;

use image::{GrayImage, ImageBuffer};
use nalgebra::Point3;
use ndarray::{Array3, ArrayView2, Zip, s};
use rayon::prelude::*;
use std::collections::TryReserveError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Background value of voxels no frame reached.
pub const BACKGROUND: u8 = 0;

/// Memory per output voxel: value plus coverage flag.
pub const BYTES_PER_VOXEL: u64 = 2;

/// `vec![elem; len]` that reports allocation failure instead of aborting.
pub(crate) fn try_filled<T: Clone>(len: usize, elem: T) -> Result<Vec<T>, TryReserveError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, elem);
    Ok(v)
}

/// Reconstructed scalar volume.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputVolume {
    /// (depth, height, width) i.e. (z, y, x)
    pub data: Array3<u8>,
    /// True for voxels that received at least one pixel.
    pub coverage: Array3<bool>,
    pub spacing: f64,
    pub origin: Point3<f64>,
}

impl OutputVolume {
    /// Background volume for `geometry`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::Allocation`] if the voxel buffers do not
    /// fit into memory.
    pub fn new(geometry: &VolumeGeometry) -> Result<Self, ReconstructionError> {
        let len = geometry.voxel_count();
        let allocation_error = |_| ReconstructionError::Allocation {
            bytes: (len as u64).saturating_mul(BYTES_PER_VOXEL),
        };
        let data = try_filled(len, BACKGROUND).map_err(allocation_error)?;
        let coverage = try_filled(len, false).map_err(allocation_error)?;
        Ok(Self {
            data: Array3::from_shape_vec(geometry.dim, data)?,
            coverage: Array3::from_shape_vec(geometry.dim, coverage)?,
            spacing: geometry.spacing,
            origin: geometry.origin,
        })
    }

    pub fn geometry(&self) -> VolumeGeometry {
        VolumeGeometry {
            dim: self.data.dim(),
            spacing: self.spacing,
            origin: self.origin,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    pub fn covered_voxels(&self) -> usize {
        self.coverage.iter().filter(|&&c| c).count()
    }

    /// Copy a core's slab into place. Slabs never overlap, so this is a plain
    /// assignment.
    pub fn place(&mut self, buffer: &VoxelBuffer) {
        let slices = buffer.region.slices.clone();
        self.data
            .slice_mut(s![slices.clone(), .., ..])
            .assign(&buffer.values);
        self.coverage
            .slice_mut(s![slices, .., ..])
            .assign(&buffer.coverage);
    }

    /// Give every uncovered voxel the rounded mean of the covered voxels in
    /// the surrounding cube of the given radius. Voxels with no covered
    /// neighbour keep the background value. Returns the number of voxels
    /// filled.
    pub fn fill_holes(&mut self, radius: usize) -> usize {
        if radius == 0 {
            return 0;
        }
        let (nz, ny, nx) = self.dim();
        let filled_count = AtomicUsize::new(0);
        let source = &self.data;
        let coverage = &self.coverage;
        let mut filled = source.clone();

        Zip::indexed(&mut filled)
            .and(coverage)
            .par_for_each(|(z, y, x), value, &covered| {
                if covered {
                    return;
                }
                let mut sum = 0u32;
                let mut count = 0u32;
                for zz in z.saturating_sub(radius)..(z + radius + 1).min(nz) {
                    for yy in y.saturating_sub(radius)..(y + radius + 1).min(ny) {
                        for xx in x.saturating_sub(radius)..(x + radius + 1).min(nx) {
                            if coverage[[zz, yy, xx]] {
                                sum += u32::from(source[[zz, yy, xx]]);
                                count += 1;
                            }
                        }
                    }
                }
                if count > 0 {
                    *value = ((sum + count / 2) / count) as u8;
                    filled_count.fetch_add(1, Ordering::Relaxed);
                }
            });

        self.data = filled;
        filled_count.into_inner()
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, u8>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data().slice(s![index, .., ..]),
            Orientation::Coronal => self.data().slice(s![.., index, ..]),
            Orientation::Sagittal => self.data().slice(s![.., .., index]),
        };
        Some(slice_result)
    }

    /// Slice as an 8-bit image, e.g. for a quick look at the result.
    pub fn get_image_from_axis(&self, index: usize, orientation: Orientation) -> Option<GrayImage> {
        let slice = self.get_slice_from_axis(index, &orientation)?;
        Self::slice_to_image(&slice)
    }

    fn slice_to_image(slice: &ArrayView2<'_, u8>) -> Option<GrayImage> {
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice.into_par_iter().copied().collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}
