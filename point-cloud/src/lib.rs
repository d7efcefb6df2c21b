//! Point cloud preprocessing for registration
//!
//! - `downsample`: voxel grid downsampling
//! - `normals`: PCA normal estimation and orientation helpers
//! - `fpfh`: Fast Point Feature Histogram descriptors
//!
//! # Usage
//!
//! ```ignore
//! use cloudreg_point_cloud::{compute_fpfh_feature, estimate_normals, voxel_down_sample};
//! use cloudreg_spatial::KdTreeSearchParam;
//!
//! let mut down = voxel_down_sample(&cloud, 0.05)?;
//! estimate_normals(&mut down, &KdTreeSearchParam::hybrid(0.1, 30))?;
//! let fpfh = compute_fpfh_feature(&down, &KdTreeSearchParam::hybrid(0.25, 100))?;
//! ```

pub mod downsample;
pub mod feature;
pub mod fpfh;
pub mod normals;

pub use downsample::voxel_down_sample;
pub use feature::Feature;
pub use fpfh::{compute_fpfh_feature, compute_pair_features, FPFH_DIMENSION};
pub use normals::{
    estimate_normals, estimate_normals_with_viewpoint, orient_normals_to_align_with_direction,
    orient_normals_towards_camera_location, NormalEstimationReport,
};
