//! Pinhole camera model with Brown-Conrady radial-tangential distortion.
//!
//! The pose solver works in undistorted pixel coordinates; observed
//! keypoints are undistorted once before the solve and solved poses are
//! re-projected with distortion applied so overlays line up with the
//! raw image.

use nalgebra::{Vector2, Vector3};
use serde::Deserialize;

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in x (pixels).
    pub fx: f64,
    /// Focal length in y (pixels).
    pub fy: f64,
    /// Principal point x (pixels).
    pub cx: f64,
    /// Principal point y (pixels).
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Returns `true` when all parameters are finite and the focal
    /// lengths are usable. A near-singular camera matrix fails here.
    pub fn is_valid(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx.abs() > 1e-9
            && self.fy.abs() > 1e-9
    }

    /// Convert pixel coordinates to normalized pinhole coordinates.
    pub fn pixel_to_normalized(&self, pixel: Vector2<f64>) -> Vector2<f64> {
        Vector2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }

    /// Convert normalized pinhole coordinates to pixel coordinates.
    pub fn normalized_to_pixel(&self, normalized: Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * normalized.x + self.cx,
            self.fy * normalized.y + self.cy,
        )
    }
}

/// Brown-Conrady radial-tangential distortion coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Distortion {
    /// Radial coefficient k1.
    #[serde(default)]
    pub k1: f64,
    /// Radial coefficient k2.
    #[serde(default)]
    pub k2: f64,
    /// Tangential coefficient p1.
    #[serde(default)]
    pub p1: f64,
    /// Tangential coefficient p2.
    #[serde(default)]
    pub p2: f64,
    /// Radial coefficient k3.
    #[serde(default)]
    pub k3: f64,
}

impl Distortion {
    /// Build from the `[k1, k2, p1, p2, k3]` coefficient layout used by
    /// calibration files. Missing trailing coefficients default to zero.
    pub fn from_coeffs(coeffs: &[f64]) -> Self {
        let get = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Self {
            k1: get(0),
            k2: get(1),
            p1: get(2),
            p2: get(3),
            k3: get(4),
        }
    }

    /// Returns `true` when all coefficients are zero.
    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0 && self.k3 == 0.0
    }

    /// Apply distortion to normalized pinhole coordinates.
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let r2 = n.x * n.x + n.y * n.y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * n.x * n.y + self.p2 * (r2 + 2.0 * n.x * n.x);
        let y_tan = self.p1 * (r2 + 2.0 * n.y * n.y) + 2.0 * self.p2 * n.x * n.y;
        Vector2::new(n.x * radial + x_tan, n.y * radial + y_tan)
    }

    /// Invert distortion by fixed-point iteration.
    pub fn undistort(&self, distorted: Vector2<f64>) -> Vector2<f64> {
        // 10 iterations are plenty for the mild distortion of calibrated
        // RGB cameras; the loop exits early once the update stalls.
        let mut n = distorted;
        for _ in 0..10 {
            let d = self.distort(n);
            let next = n + (distorted - d);
            if (next - n).norm() < 1e-12 {
                return next;
            }
            n = next;
        }
        n
    }
}

/// Complete camera model: intrinsics plus distortion.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CameraModel {
    /// Pinhole intrinsics.
    pub intrinsics: CameraIntrinsics,
    /// Distortion coefficients (all-zero for a rectified stream).
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraModel {
    /// Build an undistorted pinhole model.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            intrinsics: CameraIntrinsics { fx, fy, cx, cy },
            distortion: Distortion::default(),
        }
    }

    /// Project a camera-frame point to (distorted) pixel coordinates.
    ///
    /// Returns `None` for points at or behind the image plane.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Vector2<f64>> {
        if p_cam.z <= 1e-9 {
            return None;
        }
        let n = Vector2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        let d = self.distortion.distort(n);
        Some(self.intrinsics.normalized_to_pixel(d))
    }

    /// Project without applying distortion (undistorted pixel frame).
    pub fn project_pinhole(&self, p_cam: &Vector3<f64>) -> Option<Vector2<f64>> {
        if p_cam.z <= 1e-9 {
            return None;
        }
        let n = Vector2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        Some(self.intrinsics.normalized_to_pixel(n))
    }

    /// Map a raw (distorted) pixel observation into the undistorted
    /// pixel frame the solver works in.
    pub fn undistort_pixel(&self, pixel: Vector2<f64>) -> Vector2<f64> {
        if self.distortion.is_zero() {
            return pixel;
        }
        let n = self.intrinsics.pixel_to_normalized(pixel);
        let u = self.distortion.undistort(n);
        self.intrinsics.normalized_to_pixel(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_camera() -> CameraModel {
        CameraModel {
            intrinsics: CameraIntrinsics {
                fx: 500.0,
                fy: 500.0,
                cx: 320.0,
                cy: 240.0,
            },
            distortion: Distortion::from_coeffs(&[-0.1, 0.02, 0.001, -0.0005, 0.0]),
        }
    }

    #[test]
    fn test_pinhole_projection_of_centered_point() {
        let cam = CameraModel::pinhole(500.0, 500.0, 320.0, 240.0);
        let p = cam.project(&Vector3::new(0.0, 0.0, 50.0)).unwrap();
        assert_relative_eq!(p, Vector2::new(320.0, 240.0), epsilon = 1e-12);
    }

    #[test]
    fn test_point_behind_camera_does_not_project() {
        let cam = CameraModel::pinhole(500.0, 500.0, 320.0, 240.0);
        assert!(cam.project(&Vector3::new(1.0, 1.0, -10.0)).is_none());
        assert!(cam.project(&Vector3::new(1.0, 1.0, 0.0)).is_none());
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let cam = test_camera();
        let n = Vector2::new(0.21, -0.13);
        let back = cam.distortion.undistort(cam.distortion.distort(n));
        assert_relative_eq!(back, n, epsilon = 1e-9);
    }

    #[test]
    fn test_undistort_pixel_matches_pinhole_projection() {
        let cam = test_camera();
        let p_cam = Vector3::new(4.0, -3.0, 60.0);
        let distorted = cam.project(&p_cam).unwrap();
        let undistorted = cam.undistort_pixel(distorted);
        let pinhole = cam.project_pinhole(&p_cam).unwrap();
        assert_relative_eq!(undistorted, pinhole, epsilon = 1e-6);
    }

    #[test]
    fn test_degenerate_intrinsics_rejected() {
        let bad = CameraIntrinsics {
            fx: 0.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        };
        assert!(!bad.is_valid());
        let nan = CameraIntrinsics {
            fx: f64::NAN,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        };
        assert!(!nan.is_valid());
    }
}
