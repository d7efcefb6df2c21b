//! Fast Global Registration
//!
//! Optimizes a rigid transform over the full correspondence set with a
//! Geman-McClure line process. The scale `μ` starts loose and is annealed
//! towards the squared inlier distance (graduated non-convexity), so early
//! iterations see a convex-ish objective and later ones ignore outliers.

use crate::correspondence::{check_correspondences, find_feature_correspondences, Correspondence};
use crate::ransac::check_feature_len;
use crate::result::{RegistrationResult, TerminationReason};
use cloudreg_core::{
    exp_se3, from_rotation_translation, line_process_weight, rotation, skew, translation, Error,
    PointCloud, Result, RigidTransform,
};
use cloudreg_point_cloud::Feature;
use nalgebra::{Matrix3, Matrix4, Matrix6, Point3, Vector3, Vector6};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Options for Fast Global Registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FgrOptions {
    /// Final line-process scale, and the inlier threshold for scoring.
    pub maximum_correspondence_distance: f64,
    /// `μ` is divided by this factor every `anneal_interval` iterations.
    pub division_factor: f64,
    pub anneal_interval: usize,
    /// Skip the unit-scale normalization of both clouds.
    pub use_absolute_scale: bool,
    pub decrease_mu: bool,
    pub iteration_number: usize,
    /// Edge-length similarity required by the tuple test.
    pub tuple_scale: f64,
    pub maximum_tuple_count: usize,
    pub tuple_test: bool,
    /// Stop once the update norm falls below this and `μ` reached its floor.
    pub convergence_tolerance: f64,
    pub seed: Option<u64>,
}

impl Default for FgrOptions {
    fn default() -> Self {
        Self {
            maximum_correspondence_distance: 0.025,
            division_factor: 1.4,
            anneal_interval: 4,
            use_absolute_scale: false,
            decrease_mu: true,
            iteration_number: 64,
            tuple_scale: 0.95,
            maximum_tuple_count: 1000,
            tuple_test: true,
            convergence_tolerance: 1e-6,
            seed: None,
        }
    }
}

impl FgrOptions {
    pub fn with_maximum_correspondence_distance(mut self, distance: f64) -> Self {
        self.maximum_correspondence_distance = distance;
        self
    }

    pub fn with_iteration_number(mut self, iterations: usize) -> Self {
        self.iteration_number = iterations;
        self
    }

    pub fn with_tuple_test(mut self, enabled: bool) -> Self {
        self.tuple_test = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.maximum_correspondence_distance.is_finite()
            && self.maximum_correspondence_distance > 0.0)
        {
            return Err(Error::InvalidInput(format!(
                "FGR maximum_correspondence_distance must be positive, got {}",
                self.maximum_correspondence_distance
            )));
        }
        if !(self.division_factor > 1.0) {
            return Err(Error::InvalidInput(format!(
                "FGR division_factor must exceed 1, got {}",
                self.division_factor
            )));
        }
        if !(self.tuple_scale > 0.0 && self.tuple_scale <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "FGR tuple_scale must lie in (0, 1], got {}",
                self.tuple_scale
            )));
        }
        Ok(())
    }
}

/// Means of both clouds and the shared scale that maps them into a unit ball.
struct Normalization {
    source_mean: Vector3<f64>,
    target_mean: Vector3<f64>,
    scale: f64,
}

impl Normalization {
    fn new(source: &PointCloud, target: &PointCloud, use_absolute_scale: bool) -> Self {
        let mean = |pc: &PointCloud| {
            pc.points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / pc.len() as f64
        };
        let source_mean = mean(source);
        let target_mean = mean(target);
        let radius = |pc: &PointCloud, m: &Vector3<f64>| {
            pc.points
                .iter()
                .map(|p| (p.coords - m).norm())
                .fold(0.0, f64::max)
        };
        let max_radius = radius(source, &source_mean).max(radius(target, &target_mean));
        let scale = if use_absolute_scale || max_radius == 0.0 {
            1.0
        } else {
            max_radius
        };
        Self {
            source_mean,
            target_mean,
            scale,
        }
    }

    fn source(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from((p.coords - self.source_mean) / self.scale)
    }

    fn target(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from((p.coords - self.target_mean) / self.scale)
    }

    /// Map a transform between normalized clouds back to original coordinates.
    fn denormalize(&self, normalized: &RigidTransform) -> RigidTransform {
        let r = rotation(normalized);
        let t = -r * self.source_mean + translation(normalized) * self.scale + self.target_mean;
        from_rotation_translation(&r, &t)
    }
}

/// Keep triples of correspondences whose pairwise edge lengths agree within `tuple_scale`.
fn tuple_test(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    options: &FgrOptions,
) -> Vec<Correspondence> {
    let n = correspondences.len();
    if n < 3 {
        return correspondences.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(options.seed.unwrap_or_else(rand::random));
    let scale = options.tuple_scale;
    let mut kept = Vec::new();
    let mut tuples = 0;

    for _ in 0..n * 100 {
        if tuples >= options.maximum_tuple_count {
            break;
        }
        let picks = [rng.gen_range(0..n), rng.gen_range(0..n), rng.gen_range(0..n)];
        let c = picks.map(|k| correspondences[k]);
        let consistent = (0..3).all(|a| {
            let b = (a + 1) % 3;
            let ls = (source.points[c[a].source] - source.points[c[b].source]).norm();
            let lt = (target.points[c[a].target] - target.points[c[b].target]).norm();
            ls * scale < lt && lt < ls / scale
        });
        if consistent {
            kept.extend_from_slice(&c);
            tuples += 1;
        }
    }
    tracing::debug!(
        input = n,
        tuples,
        "FGR tuple test"
    );
    kept
}

/// Fast Global Registration on a given correspondence set.
///
/// Fitness and RMSE are computed afterwards over `correspondences` with
/// `maximum_correspondence_distance` as inlier threshold, comparable to RANSAC.
pub fn registration_fgr_based_on_correspondence(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    options: &FgrOptions,
) -> Result<RegistrationResult> {
    options.validate()?;
    source.ensure_non_empty("Source")?;
    target.ensure_non_empty("Target")?;
    check_correspondences(correspondences, source.len(), target.len())?;

    if correspondences.len() < 3 {
        tracing::warn!(
            correspondences = correspondences.len(),
            "too few correspondences for FGR, returning identity"
        );
        return Ok(RegistrationResult::identity());
    }

    let norm = Normalization::new(source, target, options.use_absolute_scale);
    let src: Vec<Point3<f64>> = correspondences
        .iter()
        .map(|c| norm.source(&source.points[c.source]))
        .collect();
    let tgt: Vec<Point3<f64>> = correspondences
        .iter()
        .map(|c| norm.target(&target.points[c.target]))
        .collect();

    let mu_floor = (options.maximum_correspondence_distance / norm.scale).powi(2);
    let mut mu = mu_floor.max(1.0);
    let mut transformation = Matrix4::identity();
    let mut termination = TerminationReason::MaxIterationsReached;
    let mut iterations = 0;

    for itr in 0..options.iteration_number {
        iterations = itr + 1;
        let mut jtj = Matrix6::<f64>::zeros();
        let mut jtr = Vector6::<f64>::zeros();
        let mut energy = 0.0;

        for (p, q) in src.iter().zip(&tgt) {
            let moved = transformation.transform_point(p);
            let r = moved - q;
            let l = line_process_weight(mu, r.norm_squared());
            let mut jacobian = nalgebra::Matrix3x6::<f64>::zeros();
            jacobian.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
            jacobian
                .fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&(-skew(&moved.coords)));
            jtj += jacobian.transpose() * jacobian * l;
            jtr += jacobian.transpose() * r * l;
            energy += l * r.norm_squared() + mu * (l.sqrt() - 1.0).powi(2);
        }

        let delta = match jtj.cholesky() {
            Some(chol) => -chol.solve(&jtr),
            None => {
                tracing::warn!(iteration = itr, "singular FGR system, skipping update");
                Vector6::zeros()
            }
        };
        transformation = exp_se3(&delta) * transformation;
        tracing::trace!(iteration = itr, mu, energy, step = delta.norm(), "FGR iteration");

        let at_floor = !options.decrease_mu || mu <= mu_floor;
        if at_floor && delta.norm() < options.convergence_tolerance {
            termination = TerminationReason::Converged;
            break;
        }
        if options.decrease_mu && (itr + 1) % options.anneal_interval.max(1) == 0 {
            mu = (mu / options.division_factor).max(mu_floor);
        }
    }

    let transformation = norm.denormalize(&transformation);
    let max_d2 = options.maximum_correspondence_distance.powi(2);
    let mut inliers = Vec::new();
    let mut error = 0.0;
    for c in correspondences {
        let d2 = (transformation.transform_point(&source.points[c.source])
            - target.points[c.target])
            .norm_squared();
        if d2 <= max_d2 {
            inliers.push(*c);
            error += d2;
        }
    }
    let (fitness, inlier_rmse) = if inliers.is_empty() {
        (0.0, 0.0)
    } else {
        (
            inliers.len() as f64 / correspondences.len() as f64,
            (error / inliers.len() as f64).sqrt(),
        )
    };

    tracing::debug!(iterations, fitness, rmse = inlier_rmse, "FGR finished");
    Ok(RegistrationResult {
        transformation,
        fitness,
        inlier_rmse,
        correspondence_set: inliers,
        iterations,
        termination,
    })
}

/// Mutually matched features, filtered by the tuple test, then FGR.
pub fn registration_fgr_based_on_feature_matching<const D: usize>(
    source: &PointCloud,
    target: &PointCloud,
    source_feature: &Feature<D>,
    target_feature: &Feature<D>,
    options: &FgrOptions,
) -> Result<RegistrationResult> {
    options.validate()?;
    check_feature_len(source, source_feature, "Source")?;
    check_feature_len(target, target_feature, "Target")?;

    let mutual = find_feature_correspondences(source_feature, target_feature, true)?;
    let used = if options.tuple_test {
        tuple_test(source, target, &mutual, options)
    } else {
        mutual.clone()
    };

    let mut result = registration_fgr_based_on_correspondence(source, target, &used, options)?;
    // Score over the cross-checked matches rather than the duplicated tuple set.
    if !mutual.is_empty() {
        let max_d2 = options.maximum_correspondence_distance.powi(2);
        let mut inliers = Vec::new();
        let mut error = 0.0;
        for c in &mutual {
            let d2 = (result.transformation.transform_point(&source.points[c.source])
                - target.points[c.target])
                .norm_squared();
            if d2 <= max_d2 {
                inliers.push(*c);
                error += d2;
            }
        }
        result.fitness = inliers.len() as f64 / mutual.len() as f64;
        result.inlier_rmse = if inliers.is_empty() {
            0.0
        } else {
            (error / inliers.len() as f64).sqrt()
        };
        result.correspondence_set = inliers;
    }
    Ok(result)
}
