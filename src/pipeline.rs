//! Multiway registration of point cloud fragments
//!
//! Preprocess every fragment, register every pair (global then coarse-to-fine
//! point-to-plane ICP), build a pose graph from the pairwise results and
//! optimize it. Fragment `0` anchors the world frame by default.

use crate::config::PipelineConfig;
use crate::runtime::run_with_threads;
use cloudreg_core::{Error, PointCloud, Result, RigidTransform};
use cloudreg_optimize::{global_optimization, GlobalOptimizationResult, PoseGraph, PoseGraphBuilder};
use cloudreg_point_cloud::{compute_fpfh_feature, estimate_normals, voxel_down_sample, Feature};
use cloudreg_registration::{
    get_information_matrix_from_point_clouds, registration_multi_scale_icp, IcpStage,
    RegistrationResult, TransformationEstimation,
};
use nalgebra::Matrix6;
use rayon::prelude::*;

/// A downsampled fragment with normals and FPFH descriptors.
#[derive(Debug, Clone)]
pub struct PreparedFragment {
    pub cloud: PointCloud,
    pub feature: Feature,
}

/// Downsample, estimate normals and compute FPFH features.
pub fn preprocess(cloud: &PointCloud, config: &PipelineConfig) -> Result<PreparedFragment> {
    let mut down = voxel_down_sample(cloud, config.voxel_size)?;
    let report = estimate_normals(&mut down, &config.normal_search())?;
    let feature = compute_fpfh_feature(&down, &config.feature_search())?;
    tracing::debug!(
        input = cloud.len(),
        downsampled = down.len(),
        low_confidence_normals = report.low_confidence.len(),
        "preprocessed fragment"
    );
    Ok(PreparedFragment {
        cloud: down,
        feature,
    })
}

/// Outcome of registering fragment `source` onto fragment `target`.
#[derive(Debug, Clone)]
pub struct PairwiseRegistration {
    pub source: usize,
    pub target: usize,
    /// Feature-based initial alignment.
    pub global: RegistrationResult,
    /// ICP refinement; its transformation becomes the pose graph edge.
    pub refined: RegistrationResult,
    pub information: Matrix6<f64>,
}

impl PairwiseRegistration {
    pub fn is_odometry(&self) -> bool {
        self.target == self.source + 1
    }
}

/// Global registration followed by coarse and fine point-to-plane ICP.
pub fn register_pair(
    source: &PreparedFragment,
    target: &PreparedFragment,
    config: &PipelineConfig,
) -> Result<(RegistrationResult, RegistrationResult, Matrix6<f64>)> {
    let global = config
        .global
        .register(&source.cloud, &target.cloud, &source.feature, &target.feature)?;

    let stages = [
        IcpStage {
            max_correspondence_distance: config.icp_coarse_distance(),
            criteria: config.icp_criteria,
        },
        IcpStage {
            max_correspondence_distance: config.icp_fine_distance(),
            criteria: config.icp_criteria,
        },
    ];
    let refined = registration_multi_scale_icp(
        &source.cloud,
        &target.cloud,
        &stages,
        &global.transformation,
        TransformationEstimation::PointToPlane { kernel: None },
    )?;
    let information = get_information_matrix_from_point_clouds(
        &source.cloud,
        &target.cloud,
        config.icp_fine_distance(),
        &refined.transformation,
    )?;
    Ok((global, refined, information))
}

#[derive(Debug, Clone)]
pub struct MultiwayResult {
    /// Fragment-to-world pose of every input fragment.
    pub poses: Vec<RigidTransform>,
    /// Optimized graph; pruned loop closures are gone.
    pub pose_graph: PoseGraph,
    /// Every registered pair, including loop closures that were skipped.
    pub pairwise: Vec<PairwiseRegistration>,
    pub optimization: GlobalOptimizationResult,
}

/// Register `fragments` into one consistent frame.
///
/// Pairs are registered in parallel, on a dedicated pool when
/// `config.num_threads` (or `CLOUDREG_CPU_THREADS`) is set. Odometry edges
/// are always added; loop closures only when their refined fitness reaches
/// `config.min_loop_closure_fitness`.
///
/// # Errors
///
/// * `Config` - invalid configuration or thread count
/// * `InvalidInput` - no fragments, or an empty fragment
pub fn register_fragments(
    fragments: &[PointCloud],
    config: &PipelineConfig,
) -> Result<MultiwayResult> {
    config.validate()?;
    if fragments.is_empty() {
        return Err(Error::InvalidInput("No fragments to register".to_string()));
    }
    run_with_threads(config.num_threads, || register_all(fragments, config))?
}

fn register_all(fragments: &[PointCloud], config: &PipelineConfig) -> Result<MultiwayResult> {
    let prepared = fragments
        .par_iter()
        .map(|f| preprocess(f, config))
        .collect::<Result<Vec<_>>>()?;

    let n = prepared.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|s| (s + 1..n).map(move |t| (s, t)))
        .collect();
    let pairwise = pairs
        .par_iter()
        .map(|&(s, t)| {
            let (global, refined, information) = register_pair(&prepared[s], &prepared[t], config)?;
            tracing::debug!(
                source = s,
                target = t,
                global_fitness = global.fitness,
                fitness = refined.fitness,
                rmse = refined.inlier_rmse,
                "registered pair"
            );
            Ok(PairwiseRegistration {
                source: s,
                target: t,
                global,
                refined,
                information,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    // Pairs are ordered by source, so each odometry edge sees a seeded source node.
    let mut builder = PoseGraphBuilder::new(n);
    for pair in &pairwise {
        if !pair.is_odometry() && pair.refined.fitness < config.min_loop_closure_fitness {
            tracing::debug!(
                source = pair.source,
                target = pair.target,
                fitness = pair.refined.fitness,
                "skipping weak loop closure"
            );
            continue;
        }
        builder.add_pairwise(
            pair.source,
            pair.target,
            pair.refined.transformation,
            pair.information,
        )?;
    }

    let mut pose_graph = builder.build();
    let optimization = global_optimization(
        &mut pose_graph,
        &config.optimization,
        &config.optimization_criteria,
    )?;
    tracing::info!(
        fragments = n,
        edges = pose_graph.edge_count(),
        pruned = optimization.pruned_edges.len(),
        "multiway registration finished"
    );

    Ok(MultiwayResult {
        poses: pose_graph.poses(),
        pose_graph,
        pairwise,
        optimization,
    })
}

/// Transform every fragment into the world frame and merge them.
///
/// With a `voxel_size` the merged cloud is downsampled once more.
pub fn combine_fragments(
    fragments: &[PointCloud],
    poses: &[RigidTransform],
    voxel_size: Option<f64>,
) -> Result<PointCloud> {
    if fragments.len() != poses.len() {
        return Err(Error::InvalidInput(format!(
            "{} fragments but {} poses",
            fragments.len(),
            poses.len()
        )));
    }

    let mut combined = PointCloud::default();
    for (fragment, pose) in fragments.iter().zip(poses) {
        combined.extend(&fragment.transformed(pose));
    }
    match voxel_size {
        Some(size) => voxel_down_sample(&combined, size),
        None => Ok(combined),
    }
}
