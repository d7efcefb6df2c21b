//! Normal estimation and orientation
//!
//! Normals come from PCA over each point's neighborhood: the eigenvector of
//! the smallest covariance eigenvalue. Eigen-decompositions run in parallel;
//! the sign pass is sequential so results do not depend on thread count.

use cloudreg_core::{Error, PointCloud, Result};
use cloudreg_spatial::{KdTree, KdTreeSearchParam};
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;

/// Minimum neighborhood size (the point itself included) for a plane fit.
pub const MIN_NEIGHBORS_FOR_NORMAL: usize = 3;

/// Outcome of [`estimate_normals`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalEstimationReport {
    /// Points whose neighborhood was too small; their normal is `+Z`.
    pub low_confidence: Vec<usize>,
}

impl NormalEstimationReport {
    pub fn is_confident(&self, index: usize) -> bool {
        self.low_confidence.binary_search(&index).is_err()
    }
}

struct LocalFit {
    normal: Vector3<f64>,
    neighbors: Vec<usize>,
    confident: bool,
}

/// Estimate normals with the viewpoint at the origin.
pub fn estimate_normals(
    pc: &mut PointCloud,
    param: &KdTreeSearchParam,
) -> Result<NormalEstimationReport> {
    estimate_normals_with_viewpoint(pc, param, &Point3::origin())
}

/// Estimate unit normals for every point and store them in `pc.normals`.
///
/// Orientation: if the cloud already carried normals, each new normal is
/// flipped to agree with the old one. Otherwise points are visited in index
/// order and each normal takes the majority sign of its already oriented
/// neighbors, or faces `viewpoint` when none (or a tie) exists.
pub fn estimate_normals_with_viewpoint(
    pc: &mut PointCloud,
    param: &KdTreeSearchParam,
    viewpoint: &Point3<f64>,
) -> Result<NormalEstimationReport> {
    pc.ensure_non_empty("Normal estimation")?;
    param.validate()?;

    let tree = KdTree::from_points(&pc.points);
    let fits: Vec<LocalFit> = pc
        .points
        .par_iter()
        .map(|p| {
            let neighbors: Vec<usize> = tree
                .search_point(p, param)?
                .into_iter()
                .map(|n| n.index)
                .collect();
            Ok(fit_plane(&pc.points, neighbors))
        })
        .collect::<Result<_>>()?;

    let previous = pc.normals.take().filter(|n| n.len() == pc.points.len());
    let mut normals: Vec<Vector3<f64>> = fits.iter().map(|f| f.normal).collect();
    let mut low_confidence = Vec::new();
    let mut oriented = vec![false; normals.len()];

    for (i, fit) in fits.iter().enumerate() {
        if !fit.confident {
            low_confidence.push(i);
            continue;
        }
        let flip = match &previous {
            Some(old) => normals[i].dot(&old[i]) < 0.0,
            None => {
                let (mut agree, mut disagree) = (0usize, 0usize);
                for &j in &fit.neighbors {
                    if j != i && oriented[j] {
                        if normals[i].dot(&normals[j]) >= 0.0 {
                            agree += 1;
                        } else {
                            disagree += 1;
                        }
                    }
                }
                if agree != disagree {
                    disagree > agree
                } else {
                    normals[i].dot(&(viewpoint - pc.points[i])) < 0.0
                }
            }
        };
        if flip {
            normals[i] = -normals[i];
        }
        oriented[i] = true;
    }

    if !low_confidence.is_empty() {
        tracing::warn!(
            count = low_confidence.len(),
            total = pc.len(),
            "normals defaulted to +Z for under-populated neighborhoods"
        );
    }
    tracing::debug!(points = pc.len(), "estimated normals");

    pc.normals = Some(normals);
    Ok(NormalEstimationReport { low_confidence })
}

fn fit_plane(points: &[Point3<f64>], neighbors: Vec<usize>) -> LocalFit {
    if neighbors.len() < MIN_NEIGHBORS_FOR_NORMAL {
        return LocalFit {
            normal: Vector3::z(),
            neighbors,
            confident: false,
        };
    }

    let mut centroid = Vector3::zeros();
    for &j in &neighbors {
        centroid += points[j].coords;
    }
    centroid /= neighbors.len() as f64;

    let mut cov = Matrix3::zeros();
    for &j in &neighbors {
        let d = points[j].coords - centroid;
        cov += d * d.transpose();
    }
    cov /= neighbors.len() as f64;

    let eigen = SymmetricEigen::new(cov);
    let min_idx = eigen.eigenvalues.imin();
    let normal = eigen.eigenvectors.column(min_idx).into_owned();
    let norm = normal.norm();

    LocalFit {
        normal: if norm > 0.0 { normal / norm } else { Vector3::z() },
        neighbors,
        confident: true,
    }
}

fn require_normals(pc: &mut PointCloud) -> Result<&mut Vec<Vector3<f64>>> {
    pc.validate()?;
    pc.normals
        .as_mut()
        .ok_or_else(|| Error::MissingPrerequisite("Point cloud has no normals".to_string()))
}

/// Flip normals so each one points at `camera`.
pub fn orient_normals_towards_camera_location(
    pc: &mut PointCloud,
    camera: &Point3<f64>,
) -> Result<()> {
    let points = pc.points.clone();
    let normals = require_normals(pc)?;
    for (n, p) in normals.iter_mut().zip(&points) {
        let to_camera = camera - p;
        if n.norm_squared() == 0.0 {
            *n = to_camera.try_normalize(0.0).unwrap_or_else(Vector3::z);
        } else if n.dot(&to_camera) < 0.0 {
            *n = -*n;
        }
    }
    Ok(())
}

/// Flip normals so each one has a non-negative component along `direction`.
pub fn orient_normals_to_align_with_direction(
    pc: &mut PointCloud,
    direction: &Vector3<f64>,
) -> Result<()> {
    let normals = require_normals(pc)?;
    for n in normals.iter_mut() {
        if n.norm_squared() == 0.0 {
            *n = direction.try_normalize(0.0).unwrap_or_else(Vector3::z);
        } else if n.dot(direction) < 0.0 {
            *n = -*n;
        }
    }
    Ok(())
}
