//! Transformation estimation from correspondences
//!
//! Closed-form point-to-point alignment (Kabsch, no scale) and the linearized
//! point-to-plane solve used by ICP.

use crate::correspondence::Correspondence;
use cloudreg_core::{exp_se3, from_rotation_translation, RigidTransform, RobustLoss};
use nalgebra::{Matrix3, Matrix4, Matrix6, Point3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Relative singular value below which the cross-covariance counts as rank deficient.
const RANK_TOLERANCE: f64 = 1e-9;

/// Estimation strategy used by ICP.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransformationEstimation {
    PointToPoint,
    /// Requires target normals. An optional robust kernel reweights residuals.
    PointToPlane { kernel: Option<RobustLoss> },
}

impl Default for TransformationEstimation {
    fn default() -> Self {
        TransformationEstimation::PointToPoint
    }
}

/// Rigid transform minimizing Σ‖R·s + t − q‖² over the given pairs.
///
/// Returns `None` for fewer than three pairs or when the points are
/// coincident or colinear (cross-covariance rank below 2).
pub fn estimate_rigid_transform(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    correspondences: &[Correspondence],
) -> Option<RigidTransform> {
    if correspondences.len() < 3 {
        return None;
    }

    // Compute centroids
    let n = correspondences.len() as f64;
    let mut source_centroid = Vector3::zeros();
    let mut target_centroid = Vector3::zeros();
    for c in correspondences {
        source_centroid += source[c.source].coords;
        target_centroid += target[c.target].coords;
    }
    source_centroid /= n;
    target_centroid /= n;

    // Compute covariance matrix
    let mut covariance = Matrix3::<f64>::zeros();
    let mut spread = 0.0;
    for c in correspondences {
        let src = source[c.source].coords - source_centroid;
        let tgt = target[c.target].coords - target_centroid;
        covariance += tgt * src.transpose();
        spread += src.norm_squared().max(tgt.norm_squared());
    }

    // SVD to find rotation
    let svd = covariance.svd(true, true);
    let u = svd.u?;
    let vt = svd.v_t?;
    let sv = svd.singular_values;

    let scale = spread.max(f64::MIN_POSITIVE);
    let rank = sv.iter().filter(|&&s| s > RANK_TOLERANCE * scale).count();
    if rank < 2 {
        return None;
    }

    // Ensure proper rotation (det = 1): flip the axis of the smallest singular value
    let mut rotation = u * vt;
    if rotation.determinant() < 0.0 {
        let weakest = sv.imin();
        let mut u_corrected = u;
        u_corrected.set_column(weakest, &(u.column(weakest) * -1.0));
        rotation = u_corrected * vt;
    }

    let translation = target_centroid - rotation * source_centroid;
    Some(from_rotation_translation(&rotation, &translation))
}

/// One Gauss-Newton step of point-to-plane ICP.
///
/// Minimizes Σ w·((p + ω×p + t − q)·n)² with Jacobian `[n, p × n]` and returns
/// `exp([t; ω])`. The 6×6 system is solved in the least-squares sense so
/// degenerate geometry (planes, lines) yields the minimum-norm update.
pub fn estimate_point_to_plane(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    target_normals: &[Vector3<f64>],
    correspondences: &[Correspondence],
    kernel: Option<&RobustLoss>,
) -> Option<RigidTransform> {
    if correspondences.is_empty() {
        return None;
    }

    let mut jtj = Matrix6::<f64>::zeros();
    let mut jtr = Vector6::<f64>::zeros();
    for c in correspondences {
        let p = source[c.source];
        let q = target[c.target];
        let n = target_normals[c.target];
        let residual = (p - q).dot(&n);
        let cross = p.coords.cross(&n);
        let jacobian = Vector6::new(n.x, n.y, n.z, cross.x, cross.y, cross.z);
        let w = kernel.map_or(1.0, |k| k.weight(residual));

        jtj += jacobian * jacobian.transpose() * w;
        jtr += jacobian * (residual * w);
    }

    let svd = jtj.svd(true, true);
    let eps = svd.singular_values.max() * 1e-12;
    let delta = svd.solve(&(-jtr), eps).ok()?;
    if delta.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(exp_se3(&delta))
}

/// Identity, used as the fallback increment when an estimate is degenerate.
pub(crate) fn identity() -> RigidTransform {
    Matrix4::identity()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudreg_core::{rotation, translation};
    use nalgebra::Rotation3;

    fn pairs(n: usize) -> Vec<Correspondence> {
        (0..n).map(|i| Correspondence::new(i, i)).collect()
    }

    #[test]
    fn test_kabsch_recovers_known_transform() {
        let source = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(0.5, 0.3, 1.0),
        ];
        let r = Rotation3::from_euler_angles(0.2, -0.4, 1.1);
        let t = Vector3::new(0.3, -2.0, 0.7);
        let target: Vec<_> = source.iter().map(|p| r * p + t).collect();

        let est = estimate_rigid_transform(&source, &target, &pairs(4)).unwrap();
        assert!((rotation(&est) - r.matrix()).abs().max() < 1e-9);
        assert!((translation(&est) - t).norm() < 1e-9);
    }

    #[test]
    fn test_kabsch_planar_points_no_reflection() {
        let source = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let r = Rotation3::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
        let target: Vec<_> = source.iter().map(|p| r * p).collect();
        let est = estimate_rigid_transform(&source, &target, &pairs(3)).unwrap();
        assert!((rotation(&est).determinant() - 1.0).abs() < 1e-9);
        assert!((rotation(&est) - r.matrix()).abs().max() < 1e-9);
    }

    #[test]
    fn test_kabsch_rejects_degenerate_samples() {
        let colinear = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ];
        assert!(estimate_rigid_transform(&colinear, &colinear, &pairs(3)).is_none());

        let coincident = vec![Point3::new(1.0, 1.0, 1.0); 3];
        assert!(estimate_rigid_transform(&coincident, &coincident, &pairs(3)).is_none());
        assert!(estimate_rigid_transform(&colinear, &colinear, &pairs(2)).is_none());
    }

    #[test]
    fn test_point_to_plane_recovers_offset_along_normal() {
        let mut source = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                source.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        let target: Vec<_> = source.iter().map(|p| p + Vector3::new(0.0, 0.0, 0.25)).collect();
        let normals = vec![Vector3::z(); target.len()];

        let step =
            estimate_point_to_plane(&source, &target, &normals, &pairs(25), None).unwrap();
        assert!((translation(&step).z - 0.25).abs() < 1e-9);
        assert!(translation(&step).xy().norm() < 1e-9);
    }
}
