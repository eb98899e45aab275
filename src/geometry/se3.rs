//! Rigid-body transform (SE3) used for object poses.
//!
//! An [`SE3`] maps points from the object-local frame into the camera
//! frame: `p_cam = R * p_obj + t`. Rotation is stored as a unit
//! quaternion, translation in the solver's native unit (centimeters).

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// A rigid-body transform: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    /// Rotation component as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
    /// Translation component.
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a rotation matrix and translation vector.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rotation = UnitQuaternion::from_rotation_matrix(
            &nalgebra::Rotation3::from_matrix_unchecked(rotation),
        );
        Self {
            rotation,
            translation,
        }
    }

    /// Build from an axis-angle rotation vector and translation vector.
    pub fn from_axis_angle(omega: &Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_scaled_axis(*omega),
            translation,
        }
    }

    /// Transform a point: `p' = R * p + t`.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Compose two transforms: `(self * other)(p) = self(other(p))`.
    pub fn compose(&self, other: &SE3) -> SE3 {
        SE3 {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// The inverse transform.
    pub fn inverse(&self) -> SE3 {
        let rot_inv = self.rotation.inverse();
        SE3 {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Rotation as an axis-angle vector (logarithm of the quaternion).
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }
}
