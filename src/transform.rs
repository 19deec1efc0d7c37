use crate::error::ReconstructionError;

use nalgebra::{
    Isometry3, Matrix3, Matrix4, Point3, Rotation3, Translation3, UnitQuaternion, Vector3,
};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// Accepted deviation from orthonormality for matrices handed in by callers.
pub const RIGID_TOLERANCE: f64 = 1e-4;

/// A rigid 3D transform (rotation followed by translation).
///
/// Stored as a unit quaternion plus translation so the rotation part stays
/// orthonormal under composition and interpolation. The homogeneous 4x4 form
/// is available through [`RigidTransform::to_matrix`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform(Isometry3<f64>);

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self(Isometry3::identity())
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self(Isometry3::from_parts(Translation3::from(translation), rotation))
    }

    pub fn from_isometry(isometry: Isometry3<f64>) -> Self {
        Self(isometry)
    }

    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self::new(UnitQuaternion::identity(), Vector3::new(x, y, z))
    }

    /// Rotation about `axis` by `angle` radians, then translation.
    pub fn from_axis_angle(axis: Vector3<f64>, angle: f64, translation: Vector3<f64>) -> Self {
        Self::new(UnitQuaternion::from_scaled_axis(axis.normalize() * angle), translation)
    }

    /// Build from a homogeneous matrix.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::InvalidInput`] if the last row is not
    /// `[0 0 0 1]`, or the upper-left 3x3 block is not a proper rotation
    /// (orthonormal with determinant +1) within [`RIGID_TOLERANCE`].
    pub fn from_matrix(m: &Matrix4<f64>) -> Result<Self, ReconstructionError> {
        let bottom = m.fixed_view::<1, 4>(3, 0);
        let expected_bottom = [0.0, 0.0, 0.0, 1.0];
        if bottom
            .iter()
            .zip(expected_bottom)
            .any(|(v, e)| (v - e).abs() > RIGID_TOLERANCE)
        {
            return Err(ReconstructionError::invalid_input(
                "transform matrix is not homogeneous",
            ));
        }

        let r: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        if !is_rotation_matrix(&r, RIGID_TOLERANCE) {
            return Err(ReconstructionError::invalid_input(
                "transform matrix has a non-rigid rotation part",
            ));
        }

        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
        let translation = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
        Ok(Self::new(rotation, translation))
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        self.0.to_homogeneous()
    }

    pub fn isometry(&self) -> &Isometry3<f64> {
        &self.0
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.0.rotation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.0.rotation.to_rotation_matrix().into_inner()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.0.translation.vector
    }

    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }

    /// `self * other`: applies `other` first, then `self`.
    pub fn compose(&self, other: &RigidTransform) -> Self {
        Self(self.0 * other.0)
    }

    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.0.transform_point(p)
    }

    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.0.transform_vector(v)
    }

    pub fn is_orthonormal(&self, tolerance: f64) -> bool {
        is_rotation_matrix(&self.rotation_matrix(), tolerance)
    }

    /// Element-wise comparison of the homogeneous matrices.
    pub fn approx_eq(&self, other: &RigidTransform, tolerance: f64) -> bool {
        (self.to_matrix() - other.to_matrix()).abs().max() <= tolerance
    }
}

impl Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> RigidTransform {
        self.compose(&rhs)
    }
}

fn is_rotation_matrix(r: &Matrix3<f64>, tolerance: f64) -> bool {
    let gram = r.transpose() * r;
    (gram - Matrix3::identity()).abs().max() <= tolerance && (r.determinant() - 1.0).abs() <= tolerance
}

/// A pose measurement from the tracking system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestampedTransform {
    /// Seconds since epoch.
    pub timestamp: f64,
    pub transform: RigidTransform,
}

impl TimestampedTransform {
    pub fn new(timestamp: f64, transform: RigidTransform) -> Self {
        Self {
            timestamp,
            transform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_3;

    fn sample() -> RigidTransform {
        RigidTransform::from_axis_angle(
            Vector3::new(1.0, 2.0, 0.5),
            FRAC_PI_3,
            Vector3::new(10.0, -4.0, 2.5),
        )
    }

    #[test]
    fn matrix_round_trip() {
        let t = sample();
        let back = RigidTransform::from_matrix(&t.to_matrix()).unwrap();
        assert!(t.approx_eq(&back, 1e-12));
    }

    #[test]
    fn rejects_scaled_rotation() {
        let mut m = sample().to_matrix();
        m[(0, 0)] *= 1.5;
        assert!(matches!(
            RigidTransform::from_matrix(&m),
            Err(ReconstructionError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_reflection() {
        let mut m = Matrix4::identity();
        m[(2, 2)] = -1.0;
        assert!(RigidTransform::from_matrix(&m).is_err());
    }

    #[test]
    fn rejects_projective_row() {
        let mut m = Matrix4::identity();
        m[(3, 0)] = 0.2;
        assert!(RigidTransform::from_matrix(&m).is_err());
    }

    #[test]
    fn inverse_round_trips_to_identity() {
        let t = sample();
        assert!((t * t.inverse()).approx_eq(&RigidTransform::identity(), 1e-12));
        assert!((t.inverse() * t).approx_eq(&RigidTransform::identity(), 1e-12));
    }

    #[test]
    fn composition_is_associative() {
        let a = sample();
        let b = RigidTransform::from_axis_angle(Vector3::z(), 0.3, Vector3::new(1.0, 0.0, 0.0));
        let c = RigidTransform::from_translation(0.0, 5.0, -1.0);
        assert!(((a * b) * c).approx_eq(&(a * (b * c)), 1e-12));
    }

    #[test]
    fn compose_applies_right_operand_first() {
        let shift = RigidTransform::from_translation(1.0, 0.0, 0.0);
        let turn = RigidTransform::from_axis_angle(
            Vector3::z(),
            std::f64::consts::FRAC_PI_2,
            Vector3::zeros(),
        );
        let p = (turn * shift).transform_point(&Point3::origin());
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn rotation_is_orthonormal() {
        assert!(sample().is_orthonormal(1e-12));
    }
}
