use crate::correspondence::Correspondence;
pub use cloudreg_core::TerminationReason;
use cloudreg_core::RigidTransform;
use nalgebra::Matrix4;

/// Registration result
///
/// Contains the estimated rigid transformation and quality metrics.
///
/// # Fields
///
/// * `transformation` - 4×4 SE(3) matrix mapping source into target
/// * `fitness` - Inlier ratio in [0, 1]
/// * `inlier_rmse` - Root mean square distance over inlier correspondences
/// * `correspondence_set` - Inlier correspondences under the final transformation
/// * `iterations` - Iterations (or RANSAC trials) performed
/// * `termination` - Whether a tolerance was met or the budget exhausted
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationResult {
    pub transformation: RigidTransform,
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub correspondence_set: Vec<Correspondence>,
    pub iterations: usize,
    pub termination: TerminationReason,
}

impl RegistrationResult {
    /// Identity transform with zero fitness.
    pub fn identity() -> Self {
        Self {
            transformation: Matrix4::identity(),
            fitness: 0.0,
            inlier_rmse: 0.0,
            correspondence_set: Vec::new(),
            iterations: 0,
            termination: TerminationReason::MaxIterationsReached,
        }
    }

    /// Higher fitness wins, ties go to the lower RMSE.
    pub fn is_better_than(&self, other: &RegistrationResult) -> bool {
        self.fitness > other.fitness
            || (self.fitness == other.fitness && self.inlier_rmse < other.inlier_rmse)
    }

    pub fn converged(&self) -> bool {
        self.termination == TerminationReason::Converged
    }
}

impl Default for RegistrationResult {
    fn default() -> Self {
        Self::identity()
    }
}
