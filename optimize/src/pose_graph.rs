//! Pose graph arena
//!
//! Nodes and edges live in plain vectors and refer to each other by index,
//! so the optimizer can update poses and drop edges without borrowing
//! trouble.

use cloudreg_core::{
    inverse_rigid, log_rotation, rotation, translation, Error, Result, RigidTransform,
};
use nalgebra::{Matrix4, Matrix6, Vector6};
use serde::{Deserialize, Serialize};

/// Pose of one fragment: maps fragment coordinates into the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseGraphNode {
    pub pose: RigidTransform,
}

impl PoseGraphNode {
    pub fn new(pose: RigidTransform) -> Self {
        Self { pose }
    }
}

impl Default for PoseGraphNode {
    fn default() -> Self {
        Self::new(Matrix4::identity())
    }
}

/// Relative measurement between two fragments.
///
/// `transformation` maps source-fragment coordinates into the target
/// fragment, so a consistent edge satisfies
/// `transformation ≈ pose_t⁻¹ · pose_s`. Uncertain edges (loop closures)
/// are down-weighted by their line-process `confidence` and may be pruned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseGraphEdge {
    pub source_node_id: usize,
    pub target_node_id: usize,
    pub transformation: RigidTransform,
    /// 6×6 information matrix, ordered `[translation; rotation]`.
    pub information: Matrix6<f64>,
    pub uncertain: bool,
    /// Line-process weight from the last optimization, 1 for certain edges.
    pub confidence: f64,
}

impl PoseGraphEdge {
    pub fn new(
        source_node_id: usize,
        target_node_id: usize,
        transformation: RigidTransform,
        information: Matrix6<f64>,
        uncertain: bool,
    ) -> Self {
        Self {
            source_node_id,
            target_node_id,
            transformation,
            information,
            uncertain,
            confidence: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseGraph {
    pub nodes: Vec<PoseGraphNode>,
    pub edges: Vec<PoseGraphEdge>,
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its index.
    pub fn add_node(&mut self, pose: RigidTransform) -> usize {
        self.nodes.push(PoseGraphNode::new(pose));
        self.nodes.len() - 1
    }

    /// Append an edge and return its index.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for self-edges or node ids outside the arena.
    pub fn add_edge(&mut self, edge: PoseGraphEdge) -> Result<usize> {
        self.check_edge(&edge)?;
        self.edges.push(edge);
        Ok(self.edges.len() - 1)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn poses(&self) -> Vec<RigidTransform> {
        self.nodes.iter().map(|n| n.pose).collect()
    }

    /// Re-check every edge; the fields are public and may have been edited.
    pub fn validate(&self) -> Result<()> {
        self.edges.iter().try_for_each(|e| self.check_edge(e))
    }

    fn check_edge(&self, edge: &PoseGraphEdge) -> Result<()> {
        if edge.source_node_id == edge.target_node_id {
            return Err(Error::InvalidInput(format!(
                "Self-edge on node {}",
                edge.source_node_id
            )));
        }
        let n = self.nodes.len();
        if edge.source_node_id >= n || edge.target_node_id >= n {
            return Err(Error::InvalidInput(format!(
                "Edge {} -> {} references a node outside 0..{}",
                edge.source_node_id, edge.target_node_id, n
            )));
        }
        Ok(())
    }

    /// Error twist `[translation; scaled axis]` of `T⁻¹ · pose_t⁻¹ · pose_s`.
    ///
    /// Zero when the edge agrees with the current node poses.
    pub fn edge_error(&self, edge: &PoseGraphEdge) -> Vector6<f64> {
        let pose_s = &self.nodes[edge.source_node_id].pose;
        let pose_t = &self.nodes[edge.target_node_id].pose;
        let e = inverse_rigid(&edge.transformation) * inverse_rigid(pose_t) * pose_s;
        let t = translation(&e);
        let w = log_rotation(&rotation(&e));
        Vector6::new(t.x, t.y, t.z, w.x, w.y, w.z)
    }

    /// Squared Mahalanobis residual `eᵀ Λ e` of one edge.
    pub fn edge_residual(&self, edge: &PoseGraphEdge) -> f64 {
        let e = self.edge_error(edge);
        e.dot(&(edge.information * e))
    }

    /// Keep only the edges whose index is not listed in `indices`.
    pub(crate) fn remove_edges(&mut self, indices: &[usize]) {
        let mut index = 0;
        self.edges.retain(|_| {
            let keep = !indices.contains(&index);
            index += 1;
            keep
        });
    }
}
