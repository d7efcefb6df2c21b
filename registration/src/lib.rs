//! Point cloud registration algorithms
//!
//! This crate provides rigid 3D point cloud registration:
//! - Correspondence search (feature matching, nearest point)
//! - Closed-form alignment (Kabsch) and point-to-plane linearization
//! - RANSAC and FGR (Fast Global Registration) on feature matches
//! - ICP (Iterative Closest Point), single and multi-scale
//! - Evaluation and information matrices for pose graph edges

pub mod correspondence;
pub mod estimation;
pub mod evaluation;
pub mod fgr;
pub mod global;
pub mod icp;
pub mod ransac;
pub mod result;

pub use correspondence::{
    check_correspondences, find_feature_correspondences, find_geometric_correspondences,
    find_geometric_correspondences_with_index, Correspondence, GeometricCorrespondence,
};
pub use estimation::{estimate_point_to_plane, estimate_rigid_transform, TransformationEstimation};
pub use evaluation::{evaluate_registration, get_information_matrix_from_point_clouds};
pub use fgr::{
    registration_fgr_based_on_correspondence, registration_fgr_based_on_feature_matching,
    FgrOptions,
};
pub use global::GlobalMethod;
pub use icp::{
    registration_icp, registration_multi_scale_icp, IcpConvergenceCriteria, IcpOptions, IcpStage,
};
pub use ransac::{
    registration_ransac_based_on_correspondence, registration_ransac_based_on_feature_matching,
    CorrespondenceChecker, RansacOptions,
};
pub use result::{RegistrationResult, TerminationReason};

pub use cloudreg_core::{Error, Result, RobustLoss};
