use crate::correspondence::{
    find_geometric_correspondences, find_geometric_correspondences_with_index,
    GeometricCorrespondence,
};
use crate::result::{RegistrationResult, TerminationReason};
use cloudreg_core::{PointCloud, Result, RigidTransform};
use cloudreg_spatial::KdTree;
use nalgebra::{Matrix6, RowVector6};

/// Fitness over source points and RMSE over the matched pairs.
pub(crate) fn score_geometric(
    source_len: usize,
    correspondences: Vec<GeometricCorrespondence>,
    transformation: RigidTransform,
) -> RegistrationResult {
    let count = correspondences.len();
    let error: f64 = correspondences.iter().map(|c| c.distance * c.distance).sum();
    let (fitness, inlier_rmse) = if count == 0 || source_len == 0 {
        (0.0, 0.0)
    } else {
        (
            count as f64 / source_len as f64,
            (error / count as f64).sqrt(),
        )
    };
    RegistrationResult {
        transformation,
        fitness,
        inlier_rmse,
        correspondence_set: correspondences.iter().map(|c| c.pair()).collect(),
        iterations: 0,
        termination: TerminationReason::Converged,
    }
}

pub(crate) fn evaluate_with_index(
    source: &PointCloud,
    target_tree: &KdTree<3>,
    max_correspondence_distance: f64,
    transformation: &RigidTransform,
) -> Result<RegistrationResult> {
    let corr = find_geometric_correspondences_with_index(
        &source.points,
        target_tree,
        transformation,
        max_correspondence_distance,
    )?;
    Ok(score_geometric(source.len(), corr, *transformation))
}

/// Evaluate registration
///
/// Fitness is the fraction of source points with a target point within
/// `max_correspondence_distance` after applying `transformation`; RMSE is
/// taken over those pairs.
pub fn evaluate_registration(
    source: &PointCloud,
    target: &PointCloud,
    max_correspondence_distance: f64,
    transformation: &RigidTransform,
) -> Result<RegistrationResult> {
    source.ensure_non_empty("Source")?;
    target.ensure_non_empty("Target")?;
    let tree = KdTree::from_points(&target.points);
    evaluate_with_index(source, &tree, max_correspondence_distance, transformation)
}

/// Compute information matrix from registration
///
/// Σ GᵀG over nearest-point pairs, where each target point `(x, y, z)`
/// contributes the rows `[I | -[q]×]` in `[translation; rotation]` order.
/// `information[(0, 0)]` therefore equals the number of correspondences.
pub fn get_information_matrix_from_point_clouds(
    source: &PointCloud,
    target: &PointCloud,
    max_correspondence_distance: f64,
    transformation: &RigidTransform,
) -> Result<Matrix6<f64>> {
    source.ensure_non_empty("Source")?;
    target.ensure_non_empty("Target")?;
    let corr = find_geometric_correspondences(
        &source.points,
        &target.points,
        transformation,
        max_correspondence_distance,
    )?;

    let mut information = Matrix6::<f64>::zeros();
    for c in &corr {
        let q = target.points[c.target];
        let (x, y, z) = (q.x, q.y, q.z);
        let rows = [
            RowVector6::new(1.0, 0.0, 0.0, 0.0, z, -y),
            RowVector6::new(0.0, 1.0, 0.0, -z, 0.0, x),
            RowVector6::new(0.0, 0.0, 1.0, y, -x, 0.0),
        ];
        for g in &rows {
            information += g.transpose() * g;
        }
    }
    Ok(information)
}
