//! Robust global pose graph optimization
//!
//! Levenberg-Marquardt over all node poses except the reference node, with
//! uncertain edges weighted by a Geman-McClure line process. After each pass
//! uncertain edges whose weight fell below `edge_prune_threshold` are removed
//! and the graph is optimized again.
//!
//! Poses are perturbed on the right, `X ← X · exp(δ)`, with twists ordered
//! `[translation; rotation]`. For an edge with error `E = T⁻¹ X_t⁻¹ X_s` this
//! gives the Jacobians `J_s = I` and `J_t = −Ad(X_s⁻¹ X_t)`.

use crate::pose_graph::PoseGraph;
use cloudreg_core::{
    exp_se3, inverse_rigid, line_process_energy, line_process_weight, log_rotation, orthonormalize,
    rotation, skew, translation, Error, Result, RigidTransform, TerminationReason,
};
use nalgebra::{DMatrix, DVector, Matrix6, Vector6};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOptimizationOption {
    /// Inlier distance used when the edges were registered; scales `μ`.
    pub max_correspondence_distance: f64,
    /// Uncertain edges with a final line-process weight below this are pruned.
    pub edge_prune_threshold: f64,
    /// Multiplier on `μ`; larger values trust loop closures more.
    pub preference_loop_closure: f64,
    /// Node whose pose is held fixed.
    pub reference_node: usize,
}

impl Default for GlobalOptimizationOption {
    fn default() -> Self {
        Self {
            max_correspondence_distance: 0.075,
            edge_prune_threshold: 0.25,
            preference_loop_closure: 1.0,
            reference_node: 0,
        }
    }
}

impl GlobalOptimizationOption {
    pub fn with_max_correspondence_distance(mut self, distance: f64) -> Self {
        self.max_correspondence_distance = distance;
        self
    }

    pub fn with_edge_prune_threshold(mut self, threshold: f64) -> Self {
        self.edge_prune_threshold = threshold;
        self
    }

    pub fn with_preference_loop_closure(mut self, preference: f64) -> Self {
        self.preference_loop_closure = preference;
        self
    }

    pub fn with_reference_node(mut self, node: usize) -> Self {
        self.reference_node = node;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_correspondence_distance.is_finite() && self.max_correspondence_distance > 0.0)
        {
            return Err(Error::InvalidInput(format!(
                "max_correspondence_distance must be positive, got {}",
                self.max_correspondence_distance
            )));
        }
        if !(0.0..=1.0).contains(&self.edge_prune_threshold) {
            return Err(Error::InvalidInput(format!(
                "edge_prune_threshold must lie in [0, 1], got {}",
                self.edge_prune_threshold
            )));
        }
        if !(self.preference_loop_closure.is_finite() && self.preference_loop_closure > 0.0) {
            return Err(Error::InvalidInput(format!(
                "preference_loop_closure must be positive, got {}",
                self.preference_loop_closure
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOptimizationConvergenceCriteria {
    pub max_iteration: usize,
    /// Stop when `|δ| < ε (|x| + ε)`.
    pub min_relative_increment: f64,
    /// Stop when an accepted step lowers the residual by less than this fraction.
    pub min_relative_residual_increment: f64,
    /// Stop when the largest gradient entry falls below this.
    pub min_right_term: f64,
    /// Initial damping relative to the largest diagonal entry of `JᵀΛJ`.
    pub initial_lambda: f64,
    /// Prune-and-reoptimize rounds after the first pass.
    pub max_pruning_passes: usize,
}

impl Default for GlobalOptimizationConvergenceCriteria {
    fn default() -> Self {
        Self {
            max_iteration: 100,
            min_relative_increment: 1e-6,
            min_relative_residual_increment: 1e-6,
            min_right_term: 1e-6,
            initial_lambda: 1e-4,
            max_pruning_passes: 5,
        }
    }
}

impl GlobalOptimizationConvergenceCriteria {
    pub fn with_max_iteration(mut self, max_iteration: usize) -> Self {
        self.max_iteration = max_iteration;
        self
    }

    pub fn with_max_pruning_passes(mut self, passes: usize) -> Self {
        self.max_pruning_passes = passes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.initial_lambda.is_finite() && self.initial_lambda > 0.0) {
            return Err(Error::InvalidInput(format!(
                "initial_lambda must be positive, got {}",
                self.initial_lambda
            )));
        }
        for (name, value) in [
            ("min_relative_increment", self.min_relative_increment),
            ("min_relative_residual_increment", self.min_relative_residual_increment),
            ("min_right_term", self.min_right_term),
        ] {
            if !(value >= 0.0) {
                return Err(Error::InvalidInput(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of [`global_optimization`].
///
/// * `iterations` - LM iterations summed over all passes
/// * `termination` - How the last pass stopped
/// * `initial_residual` - Robust residual before optimizing
/// * `residuals` - Robust residual at the end of every pass
/// * `pruned_edges` - Removed edges, numbered as in the input graph
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalOptimizationResult {
    pub iterations: usize,
    pub termination: TerminationReason,
    pub initial_residual: f64,
    pub residuals: Vec<f64>,
    pub pruned_edges: Vec<usize>,
}

impl GlobalOptimizationResult {
    pub fn final_residual(&self) -> f64 {
        self.residuals.last().copied().unwrap_or(self.initial_residual)
    }
}

struct PassOutcome {
    iterations: usize,
    termination: TerminationReason,
    residual: f64,
}

/// Optimize `graph` in place.
///
/// Certain edges contribute `eᵀΛe`, uncertain ones `μr / (μ + r)` with
/// `μ = preference · max_correspondence_distance² · mean(Λ₀₀)`. `μ` is fixed
/// for the whole run, so removing an edge never raises the residual and each
/// pass ends at or below the previous one. Edge `confidence` fields hold the
/// final line-process weights; pruned edges are removed from `graph`.
///
/// # Errors
///
/// `InvalidInput` for an empty graph, an out-of-range reference node,
/// invalid edges, or invalid options.
pub fn global_optimization(
    graph: &mut PoseGraph,
    option: &GlobalOptimizationOption,
    criteria: &GlobalOptimizationConvergenceCriteria,
) -> Result<GlobalOptimizationResult> {
    option.validate()?;
    criteria.validate()?;
    if graph.nodes.is_empty() {
        return Err(Error::InvalidInput("Pose graph has no nodes".to_string()));
    }
    if option.reference_node >= graph.node_count() {
        return Err(Error::InvalidInput(format!(
            "Reference node {} outside 0..{}",
            option.reference_node,
            graph.node_count()
        )));
    }
    graph.validate()?;

    let mu = line_process_mu(graph, option);
    let initial_residual = robust_residual(graph, mu);
    let mut original_ids: Vec<usize> = (0..graph.edge_count()).collect();
    let mut pruned_edges = Vec::new();
    let mut residuals = Vec::new();
    let mut iterations = 0;
    let mut termination = TerminationReason::Converged;

    tracing::debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        mu,
        residual = initial_residual,
        "global optimization start"
    );

    for pass in 0..=criteria.max_pruning_passes {
        let outcome = levenberg_marquardt(graph, option.reference_node, mu, criteria);
        iterations += outcome.iterations;
        termination = outcome.termination;
        residuals.push(outcome.residual);
        update_confidence(graph, mu);

        if pass == criteria.max_pruning_passes {
            break;
        }
        let prune: Vec<usize> = graph
            .edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.uncertain && e.confidence < option.edge_prune_threshold)
            .map(|(i, _)| i)
            .collect();
        if prune.is_empty() {
            break;
        }

        tracing::debug!(
            pass,
            pruned = prune.len(),
            residual = outcome.residual,
            "pruning inconsistent loop closures"
        );
        pruned_edges.extend(prune.iter().map(|&i| original_ids[i]));
        graph.remove_edges(&prune);
        let mut index = 0;
        original_ids.retain(|_| {
            let keep = !prune.contains(&index);
            index += 1;
            keep
        });
    }

    pruned_edges.sort_unstable();
    tracing::debug!(
        iterations,
        passes = residuals.len(),
        pruned = pruned_edges.len(),
        residual = residuals.last().copied().unwrap_or(initial_residual),
        "global optimization finished"
    );
    Ok(GlobalOptimizationResult {
        iterations,
        termination,
        initial_residual,
        residuals,
        pruned_edges,
    })
}

fn line_process_mu(graph: &PoseGraph, option: &GlobalOptimizationOption) -> f64 {
    let base = option.preference_loop_closure * option.max_correspondence_distance.powi(2);
    if graph.edges.is_empty() {
        return base;
    }
    let mean = graph
        .edges
        .iter()
        .map(|e| e.information[(0, 0)])
        .sum::<f64>()
        / graph.edge_count() as f64;
    if mean > 0.0 {
        base * mean
    } else {
        base
    }
}

fn robust_residual(graph: &PoseGraph, mu: f64) -> f64 {
    graph
        .edges
        .iter()
        .map(|edge| {
            let r = graph.edge_residual(edge);
            if edge.uncertain {
                line_process_energy(mu, r)
            } else {
                r
            }
        })
        .sum()
}

fn update_confidence(graph: &mut PoseGraph, mu: f64) {
    let weights: Vec<f64> = graph
        .edges
        .iter()
        .map(|edge| {
            if edge.uncertain {
                line_process_weight(mu, graph.edge_residual(edge))
            } else {
                1.0
            }
        })
        .collect();
    for (edge, w) in graph.edges.iter_mut().zip(weights) {
        edge.confidence = w;
    }
}

/// Adjoint of an SE(3) element for twists ordered `[translation; rotation]`.
fn adjoint(transform: &RigidTransform) -> Matrix6<f64> {
    let r = rotation(transform);
    let t = translation(transform);
    let mut ad = Matrix6::zeros();
    ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    ad.fixed_view_mut::<3, 3>(0, 3).copy_from(&(skew(&t) * r));
    ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&r);
    ad
}

/// Column block of every node in the reduced system; `None` for the reference.
fn free_index(node_count: usize, reference: usize) -> Vec<Option<usize>> {
    let mut next = 0;
    (0..node_count)
        .map(|i| {
            if i == reference {
                None
            } else {
                next += 1;
                Some(next - 1)
            }
        })
        .collect()
}

/// Normal equations `H = Σ JᵀwΛJ`, `g = Σ JᵀwΛe` and the robust residual.
fn linearize(
    graph: &PoseGraph,
    index: &[Option<usize>],
    dim: usize,
    mu: f64,
) -> (DMatrix<f64>, DVector<f64>, f64) {
    let mut h = DMatrix::<f64>::zeros(dim, dim);
    let mut g = DVector::<f64>::zeros(dim);
    let mut residual = 0.0;

    for edge in &graph.edges {
        let e = graph.edge_error(edge);
        let r = e.dot(&(edge.information * e));
        let w = if edge.uncertain {
            residual += line_process_energy(mu, r);
            line_process_weight(mu, r)
        } else {
            residual += r;
            1.0
        };
        let weighted = edge.information * w;

        let pose_s = &graph.nodes[edge.source_node_id].pose;
        let pose_t = &graph.nodes[edge.target_node_id].pose;
        let blocks = [
            (edge.source_node_id, Matrix6::identity()),
            (edge.target_node_id, -adjoint(&(inverse_rigid(pose_s) * pose_t))),
        ];

        for (node_a, j_a) in &blocks {
            let Some(a) = index[*node_a] else { continue };
            let jt_w = j_a.transpose() * weighted;
            g.fixed_rows_mut::<6>(6 * a).add_assign(jt_w * e);
            for (node_b, j_b) in &blocks {
                let Some(b) = index[*node_b] else { continue };
                h.fixed_view_mut::<6, 6>(6 * a, 6 * b)
                    .add_assign(jt_w * j_b);
            }
        }
    }
    (h, g, residual)
}

fn apply_update(graph: &mut PoseGraph, index: &[Option<usize>], delta: &DVector<f64>) {
    for (node, slot) in graph.nodes.iter_mut().zip(index) {
        if let Some(a) = slot {
            let twist: Vector6<f64> = delta.fixed_rows::<6>(6 * a).into_owned();
            node.pose = orthonormalize(&(node.pose * exp_se3(&twist)));
        }
    }
}

/// Norm of the stacked `[translation; scaled axis]` of all free poses.
fn state_norm(graph: &PoseGraph, index: &[Option<usize>]) -> f64 {
    graph
        .nodes
        .iter()
        .zip(index)
        .filter(|(_, slot)| slot.is_some())
        .map(|(node, _)| {
            let w = log_rotation(&rotation(&node.pose));
            translation(&node.pose).norm_squared() + w.norm_squared()
        })
        .sum::<f64>()
        .sqrt()
}

fn levenberg_marquardt(
    graph: &mut PoseGraph,
    reference: usize,
    mu: f64,
    criteria: &GlobalOptimizationConvergenceCriteria,
) -> PassOutcome {
    let index = free_index(graph.node_count(), reference);
    let dim = 6 * (graph.node_count() - 1);
    let (mut h, mut g, mut residual) = linearize(graph, &index, dim, mu);

    if dim == 0 || g.amax() < criteria.min_right_term {
        return PassOutcome {
            iterations: 0,
            termination: TerminationReason::Converged,
            residual,
        };
    }

    let max_diagonal = h.diagonal().max();
    let mut lambda = if max_diagonal > 0.0 {
        criteria.initial_lambda * max_diagonal
    } else {
        criteria.initial_lambda
    };
    let mut nu = 2.0;
    let mut termination = TerminationReason::MaxIterationsReached;
    let mut iterations = 0;

    for itr in 0..criteria.max_iteration {
        iterations = itr + 1;
        let mut damped = h.clone();
        for i in 0..dim {
            damped[(i, i)] += lambda;
        }
        let Some(chol) = damped.cholesky() else {
            tracing::warn!(iteration = itr, lambda, "singular damped system, raising lambda");
            lambda *= nu;
            nu *= 2.0;
            continue;
        };
        let delta = -chol.solve(&g);

        let eps = criteria.min_relative_increment;
        if delta.norm() < eps * (state_norm(graph, &index) + eps) {
            termination = TerminationReason::Converged;
            break;
        }

        let backup = graph.poses();
        apply_update(graph, &index, &delta);
        let candidate = robust_residual(graph, mu);
        let predicted = delta.dot(&(&delta * lambda - &g));
        let rho = if predicted > 0.0 {
            (residual - candidate) / predicted
        } else {
            -1.0
        };

        if candidate < residual && rho > 0.0 {
            let relative = (residual - candidate) / residual;
            lambda *= (1.0_f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
            nu = 2.0;
            let relinearized = linearize(graph, &index, dim, mu);
            h = relinearized.0;
            g = relinearized.1;
            residual = relinearized.2;
            tracing::trace!(iteration = itr, residual, lambda, rho, "LM step accepted");

            if relative < criteria.min_relative_residual_increment
                || g.amax() < criteria.min_right_term
            {
                termination = TerminationReason::Converged;
                break;
            }
        } else {
            for (node, pose) in graph.nodes.iter_mut().zip(backup) {
                node.pose = pose;
            }
            lambda *= nu;
            nu *= 2.0;
            tracing::trace!(iteration = itr, candidate, lambda, "LM step rejected");
        }
    }

    PassOutcome {
        iterations,
        termination,
        residual,
    }
}
