//! Iterative Closest Point
//!
//! Alternates nearest-point correspondence search with a pose update, either
//! closed-form point-to-point or linearized point-to-plane, until fitness and
//! RMSE stop changing.

use crate::correspondence::Correspondence;
use crate::estimation::{
    estimate_point_to_plane, estimate_rigid_transform, identity, TransformationEstimation,
};
use crate::evaluation::evaluate_with_index;
use crate::result::{RegistrationResult, TerminationReason};
use cloudreg_core::{orthonormalize, Error, PointCloud, Result, RigidTransform};
use cloudreg_spatial::KdTree;
use serde::{Deserialize, Serialize};

/// Convergence criteria for ICP
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConvergenceCriteria {
    /// Stop when |Δfitness| falls below this...
    pub relative_fitness: f64,
    /// ...and |ΔRMSE| falls below this.
    pub relative_rmse: f64,
    pub max_iteration: usize,
}

impl Default for IcpConvergenceCriteria {
    fn default() -> Self {
        Self {
            relative_fitness: 1e-6,
            relative_rmse: 1e-6,
            max_iteration: 30,
        }
    }
}

impl IcpConvergenceCriteria {
    pub fn with_max_iteration(mut self, max_iteration: usize) -> Self {
        self.max_iteration = max_iteration;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpOptions {
    pub estimation: TransformationEstimation,
    pub criteria: IcpConvergenceCriteria,
}

impl IcpOptions {
    pub fn point_to_point() -> Self {
        Self {
            estimation: TransformationEstimation::PointToPoint,
            criteria: IcpConvergenceCriteria::default(),
        }
    }

    pub fn point_to_plane() -> Self {
        Self {
            estimation: TransformationEstimation::PointToPlane { kernel: None },
            criteria: IcpConvergenceCriteria::default(),
        }
    }

    pub fn with_criteria(mut self, criteria: IcpConvergenceCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_estimation(mut self, estimation: TransformationEstimation) -> Self {
        self.estimation = estimation;
        self
    }
}

fn compute_increment(
    estimation: &TransformationEstimation,
    moved: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
) -> RigidTransform {
    let step = match estimation {
        TransformationEstimation::PointToPoint => {
            estimate_rigid_transform(&moved.points, &target.points, correspondences)
        }
        TransformationEstimation::PointToPlane { kernel } => match &target.normals {
            Some(normals) => estimate_point_to_plane(
                &moved.points,
                &target.points,
                normals,
                correspondences,
                kernel.as_ref(),
            ),
            None => None,
        },
    };
    step.unwrap_or_else(|| {
        tracing::warn!(
            correspondences = correspondences.len(),
            "degenerate ICP update, using identity increment"
        );
        identity()
    })
}

/// ICP registration
///
/// Registers `source` onto `target` starting from `init`. Fitness is the
/// fraction of source points with a target point within
/// `max_correspondence_distance`; `termination` tells whether the relative
/// fitness/RMSE tolerances were met or the iteration budget ran out.
///
/// # Errors
///
/// * `InvalidInput` - empty clouds or a non-positive distance
/// * `MissingPrerequisite` - point-to-plane without target normals
pub fn registration_icp(
    source: &PointCloud,
    target: &PointCloud,
    max_correspondence_distance: f64,
    init: &RigidTransform,
    options: &IcpOptions,
) -> Result<RegistrationResult> {
    source.ensure_non_empty("Source")?;
    target.ensure_non_empty("Target")?;
    if matches!(
        options.estimation,
        TransformationEstimation::PointToPlane { .. }
    ) && !target.has_normals()
    {
        return Err(Error::MissingPrerequisite(
            "Point-to-plane ICP requires target normals".to_string(),
        ));
    }

    let tree = KdTree::from_points(&target.points);
    let mut transformation = *init;
    let mut moved = source.transformed(init);
    let mut result = evaluate_with_index(source, &tree, max_correspondence_distance, init)?;
    let mut termination = TerminationReason::MaxIterationsReached;
    let mut iterations = 0;

    for itr in 0..options.criteria.max_iteration {
        iterations = itr + 1;
        let update =
            compute_increment(&options.estimation, &moved, target, &result.correspondence_set);
        transformation = orthonormalize(&(update * transformation));
        moved.transform(&update);

        let backup = result;
        result = evaluate_with_index(source, &tree, max_correspondence_distance, &transformation)?;
        tracing::trace!(
            iteration = itr,
            fitness = result.fitness,
            rmse = result.inlier_rmse,
            "ICP iteration"
        );

        if (backup.fitness - result.fitness).abs() < options.criteria.relative_fitness
            && (backup.inlier_rmse - result.inlier_rmse).abs() < options.criteria.relative_rmse
        {
            termination = TerminationReason::Converged;
            break;
        }
    }

    result.iterations = iterations;
    result.termination = termination;
    tracing::debug!(
        iterations,
        fitness = result.fitness,
        rmse = result.inlier_rmse,
        converged = result.converged(),
        "ICP finished"
    );
    Ok(result)
}

/// One coarse-to-fine ICP stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IcpStage {
    pub max_correspondence_distance: f64,
    pub criteria: IcpConvergenceCriteria,
}

/// Multi-scale ICP
///
/// Runs ICP once per stage, feeding each stage's transformation into the
/// next. The returned iteration count sums all stages; the termination
/// reason is the last stage's.
pub fn registration_multi_scale_icp(
    source: &PointCloud,
    target: &PointCloud,
    stages: &[IcpStage],
    init: &RigidTransform,
    estimation: TransformationEstimation,
) -> Result<RegistrationResult> {
    if stages.is_empty() {
        return Err(Error::InvalidInput(
            "Multi-scale ICP needs at least one stage".to_string(),
        ));
    }

    let mut transformation = *init;
    let mut total_iterations = 0;
    let mut last = None;
    for stage in stages {
        let options = IcpOptions {
            estimation,
            criteria: stage.criteria,
        };
        let result = registration_icp(
            source,
            target,
            stage.max_correspondence_distance,
            &transformation,
            &options,
        )?;
        transformation = result.transformation;
        total_iterations += result.iterations;
        last = Some(result);
    }

    let mut result = last.unwrap_or_default();
    result.iterations = total_iterations;
    Ok(result)
}
