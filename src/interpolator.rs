use crate::transform::RigidTransform;

use nalgebra::UnitQuaternion;

/// Largest deviation from unit length tolerated before the interpolated
/// rotation is renormalized.
const UNIT_NORM_DRIFT: f64 = 1e-12;

pub struct Interpolator;

impl Interpolator {
    /// Interpolate between two rigid transforms.
    ///
    /// Orientation follows the shortest arc between the two rotations
    /// (SLERP), translation is interpolated linearly. `t` is clamped to
    /// `[0, 1]`; the end points return `a` and `b` unchanged.
    pub fn interpolate(a: &RigidTransform, b: &RigidTransform, t: f64) -> RigidTransform {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        if t == 0.0 {
            return *a;
        }
        if t == 1.0 {
            return *b;
        }

        let qa = a.rotation();
        let qb = b.rotation();
        // try_slerp already flips to the shorter arc; it only gives up when
        // the two orientations are numerically indistinguishable.
        let rotation = qa
            .try_slerp(&qb, t, f64::EPSILON)
            .unwrap_or_else(|| qa.nlerp(&qb, t));
        let rotation = Self::renormalize(rotation);

        let translation = a.translation().lerp(&b.translation(), t);
        RigidTransform::new(rotation, translation)
    }

    #[inline]
    fn renormalize(q: UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        if (q.as_ref().norm() - 1.0).abs() > UNIT_NORM_DRIFT {
            UnitQuaternion::new_normalize(q.into_inner())
        } else {
            q
        }
    }

    /// Isotropic voxel spacing matching the finest of the given pixel
    /// spacings, so no input axis is undersampled.
    pub(crate) fn get_isotropic_spacing(spacings: &[(f64, f64)]) -> Option<f64> {
        spacings
            .iter()
            .flat_map(|&(x_spacing, y_spacing)| [x_spacing, y_spacing])
            .filter(|s| s.is_finite() && *s > 0.0)
            .min_by(f64::total_cmp)
    }
}
