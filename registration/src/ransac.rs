//! RANSAC-based global registration
//!
//! Hypothesize-and-verify over a correspondence set: sample `ransac_n` pairs,
//! prune with cheap geometric checkers, estimate a rigid transform in closed
//! form, then score it against every correspondence. Trials run in parallel
//! batches; each trial draws from its own RNG seeded by `(seed, trial)`, so a
//! seeded run is reproducible regardless of thread count.

use crate::correspondence::{check_correspondences, find_feature_correspondences, Correspondence};
use crate::estimation::estimate_rigid_transform;
use crate::result::{RegistrationResult, TerminationReason};
use cloudreg_core::{rotation, Error, PointCloud, Result, RigidTransform};
use cloudreg_point_cloud::Feature;
use nalgebra::Matrix4;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Cheap test that rejects a sampled hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CorrespondenceChecker {
    /// Pairwise distances within the sample must agree between the two clouds:
    /// `min(d_s, d_t) >= (1 - tolerance) * max(d_s, d_t)`.
    EdgeLength { tolerance: f64 },
    /// Every transformed sample point lies within `threshold` of its match.
    Distance { threshold: f64 },
    /// Transformed source normals lie within `angle_threshold` radians of target normals.
    Normal { angle_threshold: f64 },
}

impl CorrespondenceChecker {
    /// Checkers that can run before a transform is estimated.
    pub fn requires_transformation(&self) -> bool {
        !matches!(self, CorrespondenceChecker::EdgeLength { .. })
    }

    pub fn check(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        sample: &[Correspondence],
        transformation: &RigidTransform,
    ) -> bool {
        match *self {
            CorrespondenceChecker::EdgeLength { tolerance } => {
                edge_lengths_consistent(source, target, sample, tolerance)
            }
            CorrespondenceChecker::Distance { threshold } => sample.iter().all(|c| {
                let p = transformation.transform_point(&source.points[c.source]);
                (p - target.points[c.target]).norm() <= threshold
            }),
            CorrespondenceChecker::Normal { angle_threshold } => {
                let (Some(sn), Some(tn)) = (&source.normals, &target.normals) else {
                    return true;
                };
                let r = rotation(transformation);
                let cos_threshold = angle_threshold.cos();
                sample
                    .iter()
                    .all(|c| (r * sn[c.source]).dot(&tn[c.target]) >= cos_threshold)
            }
        }
    }
}

fn edge_lengths_consistent(
    source: &PointCloud,
    target: &PointCloud,
    sample: &[Correspondence],
    tolerance: f64,
) -> bool {
    let similarity = 1.0 - tolerance;
    for (a, ca) in sample.iter().enumerate() {
        for cb in &sample[a + 1..] {
            let ds = (source.points[ca.source] - source.points[cb.source]).norm();
            let dt = (target.points[ca.target] - target.points[cb.target]).norm();
            if ds.min(dt) < similarity * ds.max(dt) {
                return false;
            }
        }
    }
    true
}

/// Options for RANSAC global registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    /// Inlier threshold when scoring a hypothesis.
    pub max_correspondence_distance: f64,
    /// Sample size, at least 3.
    pub ransac_n: usize,
    pub max_iterations: usize,
    /// Target probability of having drawn an all-inlier sample.
    pub confidence: f64,
    /// Tolerance of the built-in edge-length check; 1.0 disables it.
    pub edge_length_tolerance: f64,
    /// Additional checkers applied to every sample.
    pub checkers: Vec<CorrespondenceChecker>,
    pub seed: Option<u64>,
    /// Trials evaluated in parallel between early-exit checks.
    pub batch_size: usize,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_correspondence_distance: 0.075,
            ransac_n: 3,
            max_iterations: 100_000,
            confidence: 0.999,
            edge_length_tolerance: 0.1,
            checkers: Vec::new(),
            seed: None,
            batch_size: 256,
        }
    }
}

impl RansacOptions {
    pub fn with_max_correspondence_distance(mut self, distance: f64) -> Self {
        self.max_correspondence_distance = distance;
        self
    }

    pub fn with_ransac_n(mut self, n: usize) -> Self {
        self.ransac_n = n;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_edge_length_tolerance(mut self, tolerance: f64) -> Self {
        self.edge_length_tolerance = tolerance;
        self
    }

    pub fn with_checker(mut self, checker: CorrespondenceChecker) -> Self {
        self.checkers.push(checker);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_correspondence_distance.is_finite() && self.max_correspondence_distance > 0.0)
        {
            return Err(Error::InvalidInput(format!(
                "RANSAC max_correspondence_distance must be positive, got {}",
                self.max_correspondence_distance
            )));
        }
        if self.ransac_n < 3 {
            return Err(Error::InvalidInput(format!(
                "ransac_n must be at least 3, got {}",
                self.ransac_n
            )));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(Error::InvalidInput(format!(
                "RANSAC confidence must lie in (0, 1), got {}",
                self.confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.edge_length_tolerance) {
            return Err(Error::InvalidInput(format!(
                "Edge length tolerance must lie in [0, 1], got {}",
                self.edge_length_tolerance
            )));
        }
        Ok(())
    }
}

/// Trials needed to draw one all-inlier sample with probability `confidence`.
fn required_iterations(fitness: f64, ransac_n: usize, confidence: f64) -> f64 {
    if fitness <= 0.0 {
        return f64::INFINITY;
    }
    if fitness >= 1.0 {
        return 0.0;
    }
    let denom = (1.0 - fitness.powi(ransac_n as i32)).ln();
    if denom == 0.0 {
        // fitness^n underflows relative to 1
        return f64::INFINITY;
    }
    (1.0 - confidence).ln() / denom
}

fn trial_rng(seed: u64, trial: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (trial as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Score `transformation` over the correspondence set: inliers lie within `max_distance`.
fn score_correspondences(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    max_distance: f64,
    transformation: &RigidTransform,
) -> RegistrationResult {
    let mut inliers = Vec::new();
    let mut error = 0.0;
    for c in correspondences {
        let p = transformation.transform_point(&source.points[c.source]);
        let d2 = (p - target.points[c.target]).norm_squared();
        if d2 <= max_distance * max_distance {
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
    RegistrationResult {
        transformation: *transformation,
        fitness,
        inlier_rmse,
        correspondence_set: inliers,
        iterations: 0,
        termination: TerminationReason::Converged,
    }
}

fn run_trial(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    options: &RansacOptions,
    rng: &mut StdRng,
) -> Option<RegistrationResult> {
    let sample: Vec<Correspondence> =
        rand::seq::index::sample(rng, correspondences.len(), options.ransac_n)
            .into_iter()
            .map(|k| correspondences[k])
            .collect();

    let identity = Matrix4::identity();
    if !edge_lengths_consistent(source, target, &sample, options.edge_length_tolerance) {
        return None;
    }
    if options
        .checkers
        .iter()
        .filter(|c| !c.requires_transformation())
        .any(|c| !c.check(source, target, &sample, &identity))
    {
        return None;
    }

    let transformation = estimate_rigid_transform(&source.points, &target.points, &sample)?;
    if options
        .checkers
        .iter()
        .filter(|c| c.requires_transformation())
        .any(|c| !c.check(source, target, &sample, &transformation))
    {
        return None;
    }

    Some(score_correspondences(
        source,
        target,
        correspondences,
        options.max_correspondence_distance,
        &transformation,
    ))
}

/// RANSAC over a given correspondence set.
///
/// Fitness is the inlier fraction of `correspondences`. Ties in fitness go
/// to the lower RMSE. When no sample ever passes the checkers the result is
/// the identity with fitness 0.
pub fn registration_ransac_based_on_correspondence(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    options: &RansacOptions,
) -> Result<RegistrationResult> {
    options.validate()?;
    source.ensure_non_empty("Source")?;
    target.ensure_non_empty("Target")?;
    check_correspondences(correspondences, source.len(), target.len())?;

    if correspondences.len() < options.ransac_n {
        tracing::warn!(
            correspondences = correspondences.len(),
            ransac_n = options.ransac_n,
            "too few correspondences for RANSAC, returning identity"
        );
        return Ok(RegistrationResult::identity());
    }

    let seed = options.seed.unwrap_or_else(rand::random);
    let batch_size = options.batch_size.max(1);
    let mut best: Option<(usize, RegistrationResult)> = None;
    let mut iterations = 0;
    let mut termination = TerminationReason::MaxIterationsReached;

    while iterations < options.max_iterations {
        let end = (iterations + batch_size).min(options.max_iterations);
        let batch_best = (iterations..end)
            .into_par_iter()
            .filter_map(|trial| {
                let mut rng = trial_rng(seed, trial);
                run_trial(source, target, correspondences, options, &mut rng)
                    .map(|result| (trial, result))
            })
            .reduce_with(|a, b| if prefer(&b, &a) { b } else { a });
        iterations = end;

        if let Some(candidate) = batch_best {
            if best.as_ref().map_or(true, |current| prefer(&candidate, current)) {
                best = Some(candidate);
            }
        }

        if let Some((_, current)) = &best {
            let needed = required_iterations(current.fitness, options.ransac_n, options.confidence);
            tracing::trace!(
                iterations,
                fitness = current.fitness,
                rmse = current.inlier_rmse,
                needed,
                "RANSAC batch"
            );
            if iterations as f64 >= needed {
                termination = TerminationReason::Converged;
                break;
            }
        }
    }

    let Some((_, mut best)) = best else {
        tracing::warn!(iterations, "no RANSAC sample passed the checkers, returning identity");
        let mut result = RegistrationResult::identity();
        result.iterations = iterations;
        return Ok(result);
    };

    // Refit on every inlier; keep it only if it scores at least as well.
    if let Some(refined) =
        estimate_rigid_transform(&source.points, &target.points, &best.correspondence_set)
    {
        let rescored = score_correspondences(
            source,
            target,
            correspondences,
            options.max_correspondence_distance,
            &refined,
        );
        if !best.is_better_than(&rescored) {
            best = rescored;
        }
    }

    best.iterations = iterations;
    best.termination = termination;
    tracing::debug!(
        iterations,
        fitness = best.fitness,
        rmse = best.inlier_rmse,
        "RANSAC finished"
    );
    Ok(best)
}

/// Better result first, then the earlier trial, so the outcome is independent of scheduling.
fn prefer(a: &(usize, RegistrationResult), b: &(usize, RegistrationResult)) -> bool {
    a.1.is_better_than(&b.1) || (!b.1.is_better_than(&a.1) && a.0 < b.0)
}

/// Match features (optionally mutually) and run RANSAC on the matches.
///
/// If the mutual filter leaves fewer than `3 * ransac_n` pairs, the
/// unfiltered matches are used instead.
pub fn registration_ransac_based_on_feature_matching<const D: usize>(
    source: &PointCloud,
    target: &PointCloud,
    source_feature: &Feature<D>,
    target_feature: &Feature<D>,
    mutual_filter: bool,
    options: &RansacOptions,
) -> Result<RegistrationResult> {
    check_feature_len(source, source_feature, "Source")?;
    check_feature_len(target, target_feature, "Target")?;

    let mut correspondences = find_feature_correspondences(source_feature, target_feature, false)?;
    if mutual_filter {
        let mutual = find_feature_correspondences(source_feature, target_feature, true)?;
        if mutual.len() >= 3 * options.ransac_n {
            correspondences = mutual;
        } else {
            tracing::warn!(
                mutual = mutual.len(),
                "too few mutual correspondences, falling back to one-way matches"
            );
        }
    }
    registration_ransac_based_on_correspondence(source, target, &correspondences, options)
}

pub(crate) fn check_feature_len<const D: usize>(
    cloud: &PointCloud,
    feature: &Feature<D>,
    what: &str,
) -> Result<()> {
    if cloud.len() != feature.len() {
        return Err(Error::InvalidInput(format!(
            "{} feature count {} does not match point count {}",
            what,
            feature.len(),
            cloud.len()
        )));
    }
    Ok(())
}
