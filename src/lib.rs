//! Pairwise and multiway point cloud registration
//!
//! Re-exports the workspace crates and adds the end-to-end fragment
//! pipeline:
//!
//! - [`core`]: point clouds, rigid transforms, errors
//! - [`spatial`]: k-d tree and voxel grid
//! - [`point_cloud`]: downsampling, normals, FPFH
//! - [`registration`]: RANSAC, FGR, ICP
//! - [`optimize`]: pose graph and global optimization
//!
//! ```ignore
//! use cloudreg::{register_fragments, PipelineConfig};
//!
//! let config = PipelineConfig::for_voxel_size(0.02);
//! let result = register_fragments(&fragments, &config)?;
//! let merged = cloudreg::combine_fragments(&fragments, &result.poses, Some(0.02))?;
//! ```

pub use cloudreg_core as core;
pub use cloudreg_optimize as optimize;
pub use cloudreg_point_cloud as point_cloud;
pub use cloudreg_registration as registration;
pub use cloudreg_spatial as spatial;

pub mod config;
pub mod pipeline;
pub mod runtime;

pub use cloudreg_core::{Error, PointCloud, Result, RigidTransform};
pub use config::PipelineConfig;
pub use pipeline::{
    combine_fragments, preprocess, register_fragments, register_pair, MultiwayResult,
    PairwiseRegistration, PreparedFragment,
};
pub use runtime::{resolve_thread_count, run_with_threads, THREADS_ENV_VAR};
