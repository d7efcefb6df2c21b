//! Pipeline configuration
//!
//! Every stage option in one serde struct. Missing JSON fields take their
//! defaults, which correspond to a 5 cm voxel size.

use cloudreg_core::{Error, Result};
use cloudreg_optimize::{GlobalOptimizationConvergenceCriteria, GlobalOptimizationOption};
use cloudreg_registration::{GlobalMethod, IcpConvergenceCriteria};
use cloudreg_spatial::KdTreeSearchParam;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub voxel_size: f64,
    /// Normal search radius, in voxels.
    pub normal_radius_factor: f64,
    pub normal_max_nn: usize,
    /// FPFH search radius, in voxels.
    pub feature_radius_factor: f64,
    pub feature_max_nn: usize,
    pub global: GlobalMethod,
    /// Coarse and fine ICP correspondence distances, in voxels.
    pub icp_coarse_factor: f64,
    pub icp_fine_factor: f64,
    pub icp_criteria: IcpConvergenceCriteria,
    /// Loop closures whose refined fitness falls below this are not added.
    pub min_loop_closure_fitness: f64,
    pub optimization: GlobalOptimizationOption,
    pub optimization_criteria: GlobalOptimizationConvergenceCriteria,
    /// Worker threads for one run; unset falls back to `CLOUDREG_CPU_THREADS`,
    /// then to the global rayon pool.
    pub num_threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_voxel_size(0.05)
    }
}

impl PipelineConfig {
    /// Defaults with every distance scaled to `voxel_size`.
    pub fn for_voxel_size(voxel_size: f64) -> Self {
        let fine = 1.5 * voxel_size;
        Self {
            voxel_size,
            normal_radius_factor: 2.0,
            normal_max_nn: 30,
            feature_radius_factor: 5.0,
            feature_max_nn: 100,
            global: GlobalMethod::default().with_max_correspondence_distance(fine),
            icp_coarse_factor: 15.0,
            icp_fine_factor: 1.5,
            icp_criteria: IcpConvergenceCriteria::default(),
            min_loop_closure_fitness: 0.3,
            optimization: GlobalOptimizationOption::default()
                .with_max_correspondence_distance(fine),
            optimization_criteria: GlobalOptimizationConvergenceCriteria::default(),
            num_threads: None,
        }
    }

    pub fn with_global(mut self, global: GlobalMethod) -> Self {
        self.global = global;
        self
    }

    pub fn with_min_loop_closure_fitness(mut self, fitness: f64) -> Self {
        self.min_loop_closure_fitness = fitness;
        self
    }

    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    pub fn normal_search(&self) -> KdTreeSearchParam {
        KdTreeSearchParam::hybrid(self.normal_radius_factor * self.voxel_size, self.normal_max_nn)
    }

    pub fn feature_search(&self) -> KdTreeSearchParam {
        KdTreeSearchParam::hybrid(self.feature_radius_factor * self.voxel_size, self.feature_max_nn)
    }

    pub fn icp_coarse_distance(&self) -> f64 {
        self.icp_coarse_factor * self.voxel_size
    }

    pub fn icp_fine_distance(&self) -> f64 {
        self.icp_fine_factor * self.voxel_size
    }

    /// Parse JSON and validate the result.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize pipeline config: {e}")))
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("voxel_size", self.voxel_size),
            ("normal_radius_factor", self.normal_radius_factor),
            ("feature_radius_factor", self.feature_radius_factor),
            ("icp_coarse_factor", self.icp_coarse_factor),
            ("icp_fine_factor", self.icp_fine_factor),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.normal_max_nn == 0 || self.feature_max_nn == 0 {
            return Err(Error::Config(
                "normal_max_nn and feature_max_nn must be at least 1".to_string(),
            ));
        }
        if self.num_threads == Some(0) {
            return Err(Error::Config("num_threads must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_loop_closure_fitness) {
            return Err(Error::Config(format!(
                "min_loop_closure_fitness must lie in [0, 1], got {}",
                self.min_loop_closure_fitness
            )));
        }

        let as_config = |e: Error| Error::Config(e.to_string());
        self.global.validate().map_err(as_config)?;
        self.optimization.validate().map_err(as_config)?;
        self.optimization_criteria.validate().map_err(as_config)?;
        Ok(())
    }
}
