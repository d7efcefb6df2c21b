//! Rigid transforms as 4×4 homogeneous matrices.
//!
//! Twists are ordered `[translation; rotation]` throughout the workspace, the
//! same ordering the point-to-plane Jacobian `(n, p × n)` uses.

use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3, Vector6};

/// Homogeneous SE(3) transform. The top-left 3×3 block is a rotation.
pub type RigidTransform = Matrix4<f64>;

pub fn from_rotation_translation(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> RigidTransform {
    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    m
}

pub fn rotation(transform: &RigidTransform) -> Matrix3<f64> {
    transform.fixed_view::<3, 3>(0, 0).into_owned()
}

pub fn translation(transform: &RigidTransform) -> Vector3<f64> {
    transform.fixed_view::<3, 1>(0, 3).into_owned()
}

/// Closed-form inverse (Rᵀ, −Rᵀt); exact for rigid inputs.
pub fn inverse_rigid(transform: &RigidTransform) -> RigidTransform {
    let r_inv = rotation(transform).transpose();
    let t_inv = -r_inv * translation(transform);
    from_rotation_translation(&r_inv, &t_inv)
}

/// Orthonormal rotation block with det = +1 and a `[0 0 0 1]` bottom row.
pub fn is_rigid(transform: &RigidTransform, tolerance: f64) -> bool {
    let r = rotation(transform);
    let orthonormal = (r.transpose() * r - Matrix3::identity()).abs().max() < tolerance;
    let proper = (r.determinant() - 1.0).abs() < tolerance;
    let bottom = transform.fixed_view::<1, 4>(3, 0);
    let homogeneous = bottom[0].abs() < tolerance
        && bottom[1].abs() < tolerance
        && bottom[2].abs() < tolerance
        && (bottom[3] - 1.0).abs() < tolerance;
    orthonormal && proper && homogeneous
}

/// Angle of the rotation block in radians, in [0, π].
pub fn rotation_angle(transform: &RigidTransform) -> f64 {
    let cos = ((rotation(transform).trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    cos.acos()
}

pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Exponential map from se(3) to SE(3), twist = `[v; ω]`.
pub fn exp_se3(delta: &Vector6<f64>) -> RigidTransform {
    let v = Vector3::new(delta[0], delta[1], delta[2]);
    let omega = Vector3::new(delta[3], delta[4], delta[5]);
    let theta = omega.norm();

    if theta < 1e-12 {
        return from_rotation_translation(&(Matrix3::identity() + skew(&omega)), &v);
    }

    let k = skew(&(omega / theta));
    let k_sq = k * k;
    let rotation = Matrix3::identity() + k * theta.sin() + k_sq * (1.0 - theta.cos());
    let left_jacobian = Matrix3::identity()
        + k * ((1.0 - theta.cos()) / theta)
        + k_sq * ((theta - theta.sin()) / theta);

    // Re-orthonormalize so repeated composition stays on SO(3).
    let rotation = Rotation3::from_matrix(&rotation).into_inner();
    from_rotation_translation(&rotation, &(left_jacobian * v))
}

/// Rotation block projected onto SO(3); cleans up accumulated drift.
pub fn orthonormalize(transform: &RigidTransform) -> RigidTransform {
    let r = Rotation3::from_matrix(&rotation(transform)).into_inner();
    from_rotation_translation(&r, &translation(transform))
}

/// Rotation vector (unit axis times angle) of a rotation matrix.
///
/// Stable near the identity, where `acos` of the trace loses half the digits,
/// and near π, where the skew part vanishes.
pub fn log_rotation(r: &Matrix3<f64>) -> Vector3<f64> {
    let v = Vector3::new(r[(2, 1)] - r[(1, 2)], r[(0, 2)] - r[(2, 0)], r[(1, 0)] - r[(0, 1)]);
    let two_sin = v.norm();
    let cos = (r.trace() - 1.0) * 0.5;
    let theta = (0.5 * two_sin).atan2(cos);

    if theta < 1e-8 {
        return v * 0.5;
    }
    if std::f64::consts::PI - theta > 1e-6 {
        return v * (theta / two_sin);
    }

    // Near π: R ≈ 2aaᵀ − I, read the axis off the largest diagonal entry.
    let i = r.diagonal().imax();
    let a_i = ((r[(i, i)] + 1.0) * 0.5).max(0.0).sqrt();
    let mut axis = Vector3::zeros();
    for j in 0..3 {
        axis[j] = if j == i {
            a_i
        } else {
            (r[(i, j)] + r[(j, i)]) / (4.0 * a_i)
        };
    }
    let axis = axis.normalize();
    if axis.dot(&v) < 0.0 {
        -axis * theta
    } else {
        axis * theta
    }
}
