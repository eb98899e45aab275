//! Perspective-n-Point solve: recover a 6-DoF object pose from 2D-3D
//! correspondences.
//!
//! The solve runs in two stages:
//!
//! 1. A scaled-orthographic initialization (POSIT-style iteration) that
//!    needs no starting guess. It requires at least 4 correspondences
//!    spanning 3 dimensions; collinear or coplanar-only point sets are
//!    reported as [`PnpOutcome::Insufficient`].
//! 2. Levenberg-Marquardt refinement of the 6 pose parameters
//!    (axis-angle rotation + translation) minimizing pixel reprojection
//!    error over all correspondences, equally weighted. There is no
//!    inlier/outlier rejection loop.
//!
//! Observed points are undistorted once up front; the solve itself works
//! in the undistorted pixel frame. `projected_points` re-projects all 9
//! model points with distortion applied so overlays match the raw image.
//!
//! Translation is expressed in the model's unit (centimeters). Unit
//! conversion for publishing happens at the node boundary, never here.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{
    DMatrix, Dyn, Matrix2x3, Matrix3, OMatrix, OVector, U6, UnitQuaternion, Vector2, Vector3,
    Vector6,
};

use crate::detection::{Cuboid3d, NUM_KEYPOINT_CHANNELS, ObjectInstance};
use crate::geometry::camera::CameraModel;
use crate::geometry::se3::SE3;
use crate::geometry::so3::{right_jacobian_so3, skew};

/// Minimum correspondences for a stable perspective solve.
pub const MIN_CORRESPONDENCES: usize = 4;

/// Relative singular-value threshold below which the model point set is
/// treated as rank-deficient (collinear or coplanar only).
const RANK_EPSILON: f64 = 1e-9;

/// Maximum POSIT iterations; zero-noise inputs converge in a handful.
const POSIT_MAX_ITERATIONS: usize = 50;

/// POSIT convergence threshold on the depth-correction update.
const POSIT_EPSILON: f64 = 1e-10;

/// Residual magnitude (pixels) substituted when a point falls behind
/// the camera during refinement.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e3;

/// A solved object pose plus its re-projection for overlay drawing.
#[derive(Debug, Clone)]
pub struct PoseResult {
    /// Object-frame origin in the camera frame, in centimeters.
    pub translation: Vector3<f64>,
    /// Object orientation in the camera frame.
    pub rotation: UnitQuaternion<f64>,
    /// All 9 model points projected through the solved pose and the
    /// full (distorting) camera model. `None` for points behind the
    /// camera. Presentation data only; large deviations here do not
    /// invalidate the pose.
    pub projected_points: [Option<Vector2<f64>>; NUM_KEYPOINT_CHANNELS],
    /// Mean reprojection error over the used correspondences, in
    /// undistorted pixels.
    pub mean_reprojection_error: f64,
}

/// Outcome of a PnP solve. `Insufficient` is a normal per-object
/// outcome, not an error: too few points or degenerate geometry.
#[derive(Debug, Clone)]
pub enum PnpOutcome {
    Pose(PoseResult),
    Insufficient,
}

impl PnpOutcome {
    pub fn pose(self) -> Option<PoseResult> {
        match self {
            PnpOutcome::Pose(p) => Some(p),
            PnpOutcome::Insufficient => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, PnpOutcome::Insufficient)
    }
}

/// Solve for the pose of one assembled instance.
///
/// `instance` points must be in image pixel coordinates. The model and
/// camera are the process-wide read-only inputs.
pub fn solve(instance: &ObjectInstance, cuboid: &Cuboid3d, camera: &CameraModel) -> PnpOutcome {
    if !camera.intrinsics.is_valid() {
        return PnpOutcome::Insufficient;
    }

    // Correspondences from the non-absent slots only
    let mut model_points = Vec::new();
    let mut observed = Vec::new();
    for (slot, observation) in instance.points.iter().enumerate() {
        if let Some(pixel) = observation {
            model_points.push(cuboid.points()[slot]);
            observed.push(camera.undistort_pixel(*pixel));
        }
    }
    if model_points.len() < MIN_CORRESPONDENCES {
        // A lone centroid could in principle seed a dimension-based
        // reduced solve; this implementation reports Insufficient
        // instead (see DESIGN.md).
        return PnpOutcome::Insufficient;
    }

    let Some(seed) = posit_estimate(&model_points, &observed, camera) else {
        return PnpOutcome::Insufficient;
    };

    let pose = refine_pose(seed, &model_points, &observed, camera);

    // Reject nonsense: all used points must sit in front of the camera
    // with finite parameters.
    if !pose.translation.iter().all(|v| v.is_finite()) {
        return PnpOutcome::Insufficient;
    }
    if model_points
        .iter()
        .any(|m| pose.transform_point(m).z <= 0.0)
    {
        return PnpOutcome::Insufficient;
    }

    let mean_reprojection_error = mean_reprojection_error(&pose, &model_points, &observed, camera);

    let mut projected_points = [None; NUM_KEYPOINT_CHANNELS];
    for (slot, model_point) in cuboid.points().iter().enumerate() {
        let p_cam = pose.transform_point(model_point);
        projected_points[slot] = camera.project(&p_cam);
    }

    PnpOutcome::Pose(PoseResult {
        translation: pose.translation,
        rotation: pose.rotation,
        projected_points,
        mean_reprojection_error,
    })
}

/// Scaled-orthographic pose initialization (DeMenthon-style POSIT).
///
/// Works on normalized image coordinates and needs the model points to
/// span 3 dimensions relative to the first point. Returns `None` on
/// rank-deficient geometry or divergence.
fn posit_estimate(
    model_points: &[Vector3<f64>],
    observed: &[Vector2<f64>],
    camera: &CameraModel,
) -> Option<SE3> {
    let n = model_points.len();
    let reference = model_points[0];

    // Object matrix: model points relative to the reference point
    let mut a = DMatrix::<f64>::zeros(n - 1, 3);
    for i in 1..n {
        let d = model_points[i] - reference;
        a[(i - 1, 0)] = d.x;
        a[(i - 1, 1)] = d.y;
        a[(i - 1, 2)] = d.z;
    }

    let svd = a.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    if max_sv <= 0.0 || svd.singular_values.min() < RANK_EPSILON * max_sv {
        // Collinear or coplanar-only: no stable perspective solve
        return None;
    }
    let pseudo_inverse = svd.pseudo_inverse(RANK_EPSILON * max_sv).ok()?;

    // Normalized image coordinates (undistorted)
    let normalized: Vec<Vector2<f64>> = observed
        .iter()
        .map(|p| camera.intrinsics.pixel_to_normalized(*p))
        .collect();
    let reference_image = normalized[0];

    let mut depth_corrections = vec![0.0f64; n];
    let mut rotation = Matrix3::identity();
    let mut z0 = 0.0f64;

    for _ in 0..POSIT_MAX_ITERATIONS {
        let mut xs = OVector::<f64, Dyn>::zeros(n - 1);
        let mut ys = OVector::<f64, Dyn>::zeros(n - 1);
        for i in 1..n {
            let w = 1.0 + depth_corrections[i];
            xs[i - 1] = normalized[i].x * w - reference_image.x;
            ys[i - 1] = normalized[i].y * w - reference_image.y;
        }

        let i_vec = &pseudo_inverse * xs;
        let j_vec = &pseudo_inverse * ys;
        let i_vec = Vector3::new(i_vec[0], i_vec[1], i_vec[2]);
        let j_vec = Vector3::new(j_vec[0], j_vec[1], j_vec[2]);

        let s1 = i_vec.norm();
        let s2 = j_vec.norm();
        if s1 < 1e-12 || s2 < 1e-12 {
            return None;
        }
        let scale = (s1 * s2).sqrt();
        z0 = 1.0 / scale;
        if !z0.is_finite() || z0 <= 0.0 {
            return None;
        }

        // Orthonormalize the first two rows, derive the third
        let row_x = i_vec / s1;
        let row_z = row_x.cross(&(j_vec / s2));
        let row_z_norm = row_z.norm();
        if row_z_norm < 1e-12 {
            return None;
        }
        let row_z = row_z / row_z_norm;
        let row_y = row_z.cross(&row_x);

        rotation = Matrix3::from_rows(&[
            row_x.transpose(),
            row_y.transpose(),
            row_z.transpose(),
        ]);

        let mut max_update = 0.0f64;
        for i in 1..n {
            let next = (model_points[i] - reference).dot(&row_z) / z0;
            max_update = max_update.max((next - depth_corrections[i]).abs());
            depth_corrections[i] = next;
        }
        if max_update < POSIT_EPSILON {
            break;
        }
    }

    // Pose of the reference point, then shift to the model origin
    let reference_camera = Vector3::new(reference_image.x * z0, reference_image.y * z0, z0);
    let translation = reference_camera - rotation * reference;
    Some(SE3::from_rt(rotation, translation))
}

/// Reprojection problem for the LM refinement: 6 parameters
/// (axis-angle rotation, then translation), 2 residuals per
/// correspondence in undistorted pixel space.
struct ReprojectionProblem<'a> {
    camera: &'a CameraModel,
    model_points: &'a [Vector3<f64>],
    observed: &'a [Vector2<f64>],
    params: Vector6<f64>,
    pose: SE3,
}

impl<'a> ReprojectionProblem<'a> {
    fn new(
        seed: &SE3,
        camera: &'a CameraModel,
        model_points: &'a [Vector3<f64>],
        observed: &'a [Vector2<f64>],
    ) -> Self {
        let mut params = Vector6::zeros();
        params.fixed_rows_mut::<3>(0).copy_from(&seed.rotation_vector());
        params.fixed_rows_mut::<3>(3).copy_from(&seed.translation);
        Self {
            camera,
            model_points,
            observed,
            params,
            pose: *seed,
        }
    }

    fn omega(&self) -> Vector3<f64> {
        self.params.fixed_rows::<3>(0).into_owned()
    }

    /// Jacobian of one projected point w.r.t. the camera-frame point.
    fn projection_jacobian(&self, p_cam: &Vector3<f64>) -> Option<Matrix2x3<f64>> {
        let z = p_cam.z;
        if z <= 1e-9 {
            return None;
        }
        let fx = self.camera.intrinsics.fx;
        let fy = self.camera.intrinsics.fy;
        let invz = 1.0 / z;
        let invz2 = invz * invz;
        Some(Matrix2x3::new(
            fx * invz, 0.0, -fx * p_cam.x * invz2,
            0.0, fy * invz, -fy * p_cam.y * invz2,
        ))
    }
}

impl LeastSquaresProblem<f64, Dyn, U6> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U6>;
    type ParameterStorage = Owned<f64, U6>;

    fn set_params(&mut self, params: &Vector6<f64>) {
        self.params = *params;
        let omega = params.fixed_rows::<3>(0).into_owned();
        let translation = params.fixed_rows::<3>(3).into_owned();
        self.pose = SE3::from_axis_angle(&omega, translation);
    }

    fn params(&self) -> Vector6<f64> {
        self.params
    }

    fn residuals(&self) -> Option<OVector<f64, Dyn>> {
        let mut r = OVector::<f64, Dyn>::zeros(self.observed.len() * 2);
        for (i, (model_point, observed)) in
            self.model_points.iter().zip(self.observed.iter()).enumerate()
        {
            let p_cam = self.pose.transform_point(model_point);
            match self.camera.project_pinhole(&p_cam) {
                Some(projected) => {
                    r[2 * i] = observed.x - projected.x;
                    r[2 * i + 1] = observed.y - projected.y;
                }
                None => {
                    // Behind the camera: constant large residual
                    r[2 * i] = BEHIND_CAMERA_RESIDUAL;
                    r[2 * i + 1] = BEHIND_CAMERA_RESIDUAL;
                }
            }
        }
        Some(r)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U6>> {
        let omega = self.omega();
        let rot = self.pose.rotation.to_rotation_matrix().into_inner();
        let jr = right_jacobian_so3(&omega);

        let mut jac = OMatrix::<f64, Dyn, U6>::zeros(self.observed.len() * 2);
        for (i, model_point) in self.model_points.iter().enumerate() {
            let p_cam = self.pose.transform_point(model_point);
            let Some(dproj) = self.projection_jacobian(&p_cam) else {
                continue; // rows stay zero for behind-camera points
            };

            // residual = observed - projection, so:
            //   dr/dω = dπ/dp · R [m]× Jr(ω)
            //   dr/dt = -dπ/dp
            let j_omega = dproj * rot * skew(model_point) * jr;
            let j_trans = -dproj;

            for row in 0..2 {
                for col in 0..3 {
                    jac[(2 * i + row, col)] = j_omega[(row, col)];
                    jac[(2 * i + row, col + 3)] = j_trans[(row, col)];
                }
            }
        }
        Some(jac)
    }
}

/// LM refinement of the seed pose. Falls back to the seed when the
/// optimizer produces non-finite parameters.
fn refine_pose(
    seed: SE3,
    model_points: &[Vector3<f64>],
    observed: &[Vector2<f64>],
    camera: &CameraModel,
) -> SE3 {
    let problem = ReprojectionProblem::new(&seed, camera, model_points, observed);
    let (refined, _report) = LevenbergMarquardt::new().minimize(problem);

    if refined.params.iter().all(|v| v.is_finite()) {
        refined.pose
    } else {
        seed
    }
}

/// Mean pixel reprojection error in the undistorted frame.
fn mean_reprojection_error(
    pose: &SE3,
    model_points: &[Vector3<f64>],
    observed: &[Vector2<f64>],
    camera: &CameraModel,
) -> f64 {
    let mut total = 0.0;
    for (model_point, obs) in model_points.iter().zip(observed.iter()) {
        let p_cam = pose.transform_point(model_point);
        match camera.project_pinhole(&p_cam) {
            Some(projected) => total += (obs - projected).norm(),
            None => total += BEHIND_CAMERA_RESIDUAL,
        }
    }
    total / model_points.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraModel {
        CameraModel::pinhole(500.0, 500.0, 320.0, 240.0)
    }

    /// Project the cuboid through a known pose and keep `keep` slots.
    fn synthetic_instance(
        cuboid: &Cuboid3d,
        pose: &SE3,
        camera: &CameraModel,
        keep: &[usize],
    ) -> ObjectInstance {
        let mut points = [None; NUM_KEYPOINT_CHANNELS];
        for &slot in keep {
            let p_cam = pose.transform_point(&cuboid.points()[slot]);
            points[slot] = camera.project(&p_cam);
        }
        ObjectInstance {
            points,
            centroid_confidence: 1.0,
        }
    }

    fn assert_pose_close(result: &PoseResult, expected: &SE3) {
        assert_relative_eq!(result.translation, expected.translation, epsilon = 1e-3);
        assert!(result.rotation.angle_to(&expected.rotation) < 1e-3);
    }

    #[test]
    fn test_fewer_than_four_points_is_insufficient() {
        let cuboid = Cuboid3d::from_dimensions(10.0, 10.0, 10.0);
        let pose = SE3::from_axis_angle(&Vector3::zeros(), Vector3::new(0.0, 0.0, 60.0));
        let instance = synthetic_instance(&cuboid, &pose, &camera(), &[0, 3, 8]);
        assert!(solve(&instance, &cuboid, &camera()).is_insufficient());
    }

    #[test]
    fn test_recovers_identity_rotation_pose() {
        let cuboid = Cuboid3d::from_dimensions(9.0, 6.0, 12.0);
        let pose = SE3::from_axis_angle(&Vector3::zeros(), Vector3::new(0.0, 0.0, 50.0));
        let keep: Vec<usize> = (0..NUM_KEYPOINT_CHANNELS).collect();
        let instance = synthetic_instance(&cuboid, &pose, &camera(), &keep);

        let result = solve(&instance, &cuboid, &camera()).pose().unwrap();
        assert_pose_close(&result, &pose);
        assert!(result.mean_reprojection_error < 1e-3);
    }

    #[test]
    fn test_recovers_general_pose() {
        let cuboid = Cuboid3d::from_dimensions(8.0, 11.0, 5.0);
        let pose = SE3::from_axis_angle(
            &Vector3::new(0.3, -0.4, 0.2),
            Vector3::new(6.0, -4.0, 80.0),
        );
        let keep: Vec<usize> = (0..NUM_KEYPOINT_CHANNELS).collect();
        let instance = synthetic_instance(&cuboid, &pose, &camera(), &keep);

        let result = solve(&instance, &cuboid, &camera()).pose().unwrap();
        assert_pose_close(&result, &pose);
    }

    #[test]
    fn test_recovers_pose_from_five_corner_subset() {
        // Four front corners plus one rear corner: spans 3 dimensions
        let cuboid = Cuboid3d::from_dimensions(10.0, 10.0, 10.0);
        let pose = SE3::from_axis_angle(
            &Vector3::new(-0.1, 0.25, 0.05),
            Vector3::new(2.0, 3.0, 70.0),
        );
        let instance = synthetic_instance(&cuboid, &pose, &camera(), &[0, 1, 2, 3, 4]);

        let result = solve(&instance, &cuboid, &camera()).pose().unwrap();
        assert_pose_close(&result, &pose);
    }

    #[test]
    fn test_coplanar_only_points_are_insufficient() {
        // The four front-face corners are coplanar
        let cuboid = Cuboid3d::from_dimensions(10.0, 10.0, 10.0);
        let pose = SE3::from_axis_angle(&Vector3::zeros(), Vector3::new(0.0, 0.0, 60.0));
        let instance = synthetic_instance(&cuboid, &pose, &camera(), &[0, 1, 2, 3]);
        assert!(solve(&instance, &cuboid, &camera()).is_insufficient());
    }

    #[test]
    fn test_degenerate_camera_is_insufficient() {
        let cuboid = Cuboid3d::from_dimensions(10.0, 10.0, 10.0);
        let pose = SE3::from_axis_angle(&Vector3::zeros(), Vector3::new(0.0, 0.0, 60.0));
        let keep: Vec<usize> = (0..NUM_KEYPOINT_CHANNELS).collect();
        let instance = synthetic_instance(&cuboid, &pose, &camera(), &keep);

        let broken = CameraModel::pinhole(0.0, 500.0, 320.0, 240.0);
        assert!(solve(&instance, &cuboid, &broken).is_insufficient());
    }

    #[test]
    fn test_projected_points_roundtrip_through_camera() {
        let cuboid = Cuboid3d::from_dimensions(9.0, 6.0, 12.0);
        let cam = CameraModel {
            distortion: crate::geometry::camera::Distortion::from_coeffs(&[-0.05, 0.01, 0.0, 0.0, 0.0]),
            ..camera()
        };
        let pose = SE3::from_axis_angle(
            &Vector3::new(0.1, 0.2, -0.1),
            Vector3::new(1.0, -2.0, 55.0),
        );
        let keep: Vec<usize> = (0..NUM_KEYPOINT_CHANNELS).collect();
        let instance = synthetic_instance(&cuboid, &pose, &cam, &keep);

        let result = solve(&instance, &cuboid, &cam).pose().unwrap();
        let solved = SE3 {
            rotation: result.rotation,
            translation: result.translation,
        };
        for (slot, model_point) in cuboid.points().iter().enumerate() {
            let expected = cam.project(&solved.transform_point(model_point));
            match (result.projected_points[slot], expected) {
                (Some(got), Some(want)) => assert_relative_eq!(got, want, epsilon = 1e-12),
                (None, None) => {}
                _ => panic!("projected point presence mismatch in slot {slot}"),
            }
        }
    }

    #[test]
    fn test_solve_with_distortion_recovers_pose() {
        let cam = CameraModel {
            distortion: crate::geometry::camera::Distortion::from_coeffs(&[-0.1, 0.02, 0.001, -0.001, 0.0]),
            ..camera()
        };
        let cuboid = Cuboid3d::from_dimensions(10.0, 7.0, 4.0);
        let pose = SE3::from_axis_angle(
            &Vector3::new(0.2, 0.1, 0.3),
            Vector3::new(-3.0, 2.0, 65.0),
        );
        let keep: Vec<usize> = (0..NUM_KEYPOINT_CHANNELS).collect();
        let instance = synthetic_instance(&cuboid, &pose, &cam, &keep);

        let result = solve(&instance, &cuboid, &cam).pose().unwrap();
        assert_relative_eq!(result.translation, pose.translation, epsilon = 1e-2);
        assert!(result.rotation.angle_to(&pose.rotation) < 1e-2);
    }
}
