//! Correspondence search
//!
//! Descriptor matching (global registration) and nearest-point search under a
//! transform (local registration). Both are per-point parallel over a shared
//! read-only k-d tree.

use cloudreg_core::{Error, Result, RigidTransform};
use cloudreg_point_cloud::Feature;
use cloudreg_spatial::{to_array, KdTree};
use nalgebra::Point3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Hypothesized match between `source` and `target` point indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Correspondence {
    pub source: usize,
    pub target: usize,
}

impl Correspondence {
    pub fn new(source: usize, target: usize) -> Self {
        Self { source, target }
    }
}

impl From<(usize, usize)> for Correspondence {
    fn from((source, target): (usize, usize)) -> Self {
        Self { source, target }
    }
}

/// Nearest-point match with its Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometricCorrespondence {
    pub source: usize,
    pub target: usize,
    pub distance: f64,
}

impl GeometricCorrespondence {
    pub fn pair(&self) -> Correspondence {
        Correspondence::new(self.source, self.target)
    }
}

/// Fails with `InvalidInput` if any index is out of range.
pub fn check_correspondences(
    correspondences: &[Correspondence],
    source_len: usize,
    target_len: usize,
) -> Result<()> {
    match correspondences
        .iter()
        .find(|c| c.source >= source_len || c.target >= target_len)
    {
        Some(c) => Err(Error::InvalidInput(format!(
            "Correspondence ({}, {}) out of range for clouds of size {} and {}",
            c.source, c.target, source_len, target_len
        ))),
        None => Ok(()),
    }
}

/// Match every source descriptor to its nearest target descriptor.
///
/// With `mutual_filter` only symmetric nearest neighbors survive: `(i, j)` is
/// kept iff `j` is nearest to `i` and `i` is nearest to `j`.
pub fn find_feature_correspondences<const D: usize>(
    source: &Feature<D>,
    target: &Feature<D>,
    mutual_filter: bool,
) -> Result<Vec<Correspondence>> {
    if source.is_empty() || target.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Feature matching needs non-empty features, got {} source and {} target",
            source.len(),
            target.len()
        )));
    }

    let target_tree = KdTree::new(target.data.clone());
    let forward: Vec<Correspondence> = source
        .data
        .par_iter()
        .enumerate()
        .map(|(i, f)| {
            target_tree
                .nearest(f)
                .map(|hit| Correspondence::new(i, hit.index))
        })
        .collect::<Result<_>>()?;

    if !mutual_filter {
        return Ok(forward);
    }

    let source_tree = KdTree::new(source.data.clone());
    let keep: Vec<bool> = forward
        .par_iter()
        .map(|c| {
            source_tree
                .nearest(&target.data[c.target])
                .map(|hit| hit.index == c.source)
        })
        .collect::<Result<_>>()?;

    let mutual: Vec<Correspondence> = forward
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect();
    tracing::debug!(
        source = source.len(),
        mutual = mutual.len(),
        "mutual feature correspondences"
    );
    Ok(mutual)
}

/// Nearest target point of every transformed source point within `max_distance`.
pub fn find_geometric_correspondences(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    transformation: &RigidTransform,
    max_distance: f64,
) -> Result<Vec<GeometricCorrespondence>> {
    let tree = KdTree::from_points(target);
    find_geometric_correspondences_with_index(source, &tree, transformation, max_distance)
}

/// Same as [`find_geometric_correspondences`], reusing a tree built over the target.
pub fn find_geometric_correspondences_with_index(
    source: &[Point3<f64>],
    target_tree: &KdTree<3>,
    transformation: &RigidTransform,
    max_distance: f64,
) -> Result<Vec<GeometricCorrespondence>> {
    if !(max_distance.is_finite() && max_distance > 0.0) {
        return Err(Error::InvalidInput(format!(
            "Max correspondence distance must be positive, got {max_distance}"
        )));
    }
    if target_tree.is_empty() {
        return Err(Error::InvalidInput("Target point cloud is empty".to_string()));
    }

    let hits: Vec<Option<GeometricCorrespondence>> = source
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let q = transformation.transform_point(p);
            let hit = target_tree.search_hybrid(&to_array(&q), max_distance, 1)?;
            Ok(hit.first().map(|n| GeometricCorrespondence {
                source: i,
                target: n.index,
                distance: n.distance(),
            }))
        })
        .collect::<Result<_>>()?;

    Ok(hits.into_iter().flatten().collect())
}
