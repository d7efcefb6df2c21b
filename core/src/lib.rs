//! Shared types for the cloudreg registration engine
//!
//! - [`PointCloud`]: points with optional normals and colors
//! - [`RigidTransform`]: 4×4 homogeneous SE(3) matrices and helpers
//! - [`RobustLoss`]: robust kernels and the Geman-McClure line process
//! - [`Error`] / [`Result`]: the workspace error taxonomy

pub mod error;
pub mod geometry;
pub mod point_cloud;
pub mod robust_loss;
pub mod termination;

pub use error::{Error, Result};
pub use geometry::{
    exp_se3, from_rotation_translation, inverse_rigid, is_rigid, log_rotation, orthonormalize,
    rotation, rotation_angle, skew, translation, RigidTransform,
};
pub use point_cloud::PointCloud;
pub use robust_loss::{line_process_energy, line_process_weight, RobustLoss};
pub use termination::TerminationReason;
