//! Spatial indexing for point clouds
//!
//! - [`KdTree`]: k-NN, radius and hybrid queries over a fixed point set
//! - [`KdTreeSearchParam`]: neighborhood definition used by normals and features
//! - [`VoxelGrid`]: sparse voxelization used by downsampling

pub mod kdtree;
pub mod search_param;
pub mod voxel;

pub use kdtree::{to_array, KdTree, Neighbor};
pub use search_param::KdTreeSearchParam;
pub use voxel::{Voxel, VoxelGrid, VoxelKey};
