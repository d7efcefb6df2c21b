//! Fast Point Feature Histograms
//!
//! Each point gets a 33-bin descriptor: three 11-bin histograms over the
//! angular pair features of the Darboux frame. The simplified histogram
//! (SPFH) of a point only sees its direct neighbors; FPFH adds the
//! inverse-squared-distance weighted SPFH of every neighbor.

use crate::feature::Feature;
use cloudreg_core::{Error, PointCloud, Result};
use cloudreg_spatial::{KdTree, KdTreeSearchParam, Neighbor};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::f64::consts::PI;

pub const FPFH_DIMENSION: usize = 33;
const BINS: usize = 11;
const UNIT_NORMAL_TOLERANCE: f64 = 1e-3;

/// Pair features `(f0, f1, f2, distance)` between two oriented points.
///
/// `f0` is the in-plane angle of the second normal, `f1` and `f2` are
/// cosines in [-1, 1]. The point whose normal makes the smaller angle with
/// the connecting line acts as the source. Coincident points and normals
/// parallel to the connecting line yield zeros.
pub fn compute_pair_features(
    p1: &Point3<f64>,
    n1: &Vector3<f64>,
    p2: &Point3<f64>,
    n2: &Vector3<f64>,
) -> [f64; 4] {
    let mut dp2p1 = p2 - p1;
    let dist = dp2p1.norm();
    if dist == 0.0 {
        return [0.0; 4];
    }

    let angle1 = n1.dot(&dp2p1) / dist;
    let angle2 = n2.dot(&dp2p1) / dist;
    let (n1c, n2c, f2) = if angle1.abs().acos() > angle2.abs().acos() {
        dp2p1 = -dp2p1;
        (n2, n1, -angle2)
    } else {
        (n1, n2, angle1)
    };

    let v = dp2p1.cross(n1c);
    let v_norm = v.norm();
    if v_norm == 0.0 {
        return [0.0; 4];
    }
    let v = v / v_norm;
    let w = n1c.cross(&v);

    let f1 = v.dot(n2c);
    let f0 = w.dot(n2c).atan2(n1c.dot(n2c));
    [f0, f1, f2, dist]
}

fn bin_angle(f0: f64) -> usize {
    ((BINS as f64 * (f0 + PI) / (2.0 * PI)).floor().max(0.0) as usize).min(BINS - 1)
}

fn bin_cosine(f: f64) -> usize {
    ((BINS as f64 * (f + 1.0) * 0.5).floor().max(0.0) as usize).min(BINS - 1)
}

fn spfh(
    i: usize,
    points: &[Point3<f64>],
    normals: &[Vector3<f64>],
    neighbors: &[Neighbor],
) -> [f64; FPFH_DIMENSION] {
    let mut hist = [0.0; FPFH_DIMENSION];
    let others = neighbors.iter().filter(|n| n.index != i).count();
    if others == 0 {
        return hist;
    }
    let incr = 100.0 / others as f64;
    for nb in neighbors.iter().filter(|n| n.index != i) {
        let j = nb.index;
        let pf = compute_pair_features(&points[i], &normals[i], &points[j], &normals[j]);
        hist[bin_angle(pf[0])] += incr;
        hist[BINS + bin_cosine(pf[1])] += incr;
        hist[2 * BINS + bin_cosine(pf[2])] += incr;
    }
    hist
}

/// Validate that normals exist and are unit length.
pub(crate) fn checked_normals(pc: &PointCloud) -> Result<&[Vector3<f64>]> {
    pc.validate()?;
    let normals = pc.normals.as_deref().ok_or_else(|| {
        Error::MissingPrerequisite("FPFH requires normals; estimate them first".to_string())
    })?;
    if let Some((i, n)) = normals
        .iter()
        .enumerate()
        .find(|(_, n)| (n.norm() - 1.0).abs() > UNIT_NORMAL_TOLERANCE)
    {
        return Err(Error::InvalidInput(format!(
            "Normal {} has length {:.6}, expected unit length",
            i,
            n.norm()
        )));
    }
    Ok(normals)
}

/// Compute FPFH descriptors for every point of `pc`.
pub fn compute_fpfh_feature(
    pc: &PointCloud,
    param: &KdTreeSearchParam,
) -> Result<Feature<FPFH_DIMENSION>> {
    param.validate()?;
    pc.ensure_non_empty("FPFH input")?;
    let normals = checked_normals(pc)?;

    let tree = KdTree::from_points(&pc.points);
    let neighborhoods: Vec<Vec<Neighbor>> = pc
        .points
        .par_iter()
        .map(|p| tree.search_point(p, param))
        .collect::<Result<_>>()?;

    // 1. Simplified histograms
    let spfh: Vec<[f64; FPFH_DIMENSION]> = (0..pc.len())
        .into_par_iter()
        .map(|i| spfh(i, &pc.points, normals, &neighborhoods[i]))
        .collect();

    // 2. Weighted neighbor sum, each 11-bin block normalized to 100, plus own SPFH
    let fpfh: Vec<[f64; FPFH_DIMENSION]> = (0..pc.len())
        .into_par_iter()
        .map(|i| {
            let mut hist = [0.0; FPFH_DIMENSION];
            let mut block_sums = [0.0; 3];
            for nb in neighborhoods[i].iter().filter(|n| n.index != i) {
                if nb.distance_squared == 0.0 {
                    continue;
                }
                for (k, h) in hist.iter_mut().enumerate() {
                    let val = spfh[nb.index][k] / nb.distance_squared;
                    block_sums[k / BINS] += val;
                    *h += val;
                }
            }
            for (k, h) in hist.iter_mut().enumerate() {
                if block_sums[k / BINS] != 0.0 {
                    *h *= 100.0 / block_sums[k / BINS];
                }
                *h += spfh[i][k];
            }
            hist
        })
        .collect();

    tracing::debug!(points = pc.len(), "computed FPFH features");
    Ok(Feature::new(fpfh))
}
