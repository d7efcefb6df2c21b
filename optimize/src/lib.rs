//! Pose graph optimization for multiway registration
//!
//! - [`PoseGraph`]: node/edge arena addressed by index
//! - [`PoseGraphBuilder`]: odometry chain plus loop closures
//! - [`global_optimization`]: Levenberg-Marquardt with line-process pruning

pub mod builder;
pub mod global_optimization;
pub mod pose_graph;

pub use builder::PoseGraphBuilder;
pub use global_optimization::{
    global_optimization, GlobalOptimizationConvergenceCriteria, GlobalOptimizationOption,
    GlobalOptimizationResult,
};
pub use pose_graph::{PoseGraph, PoseGraphEdge, PoseGraphNode};
