use crate::pose_graph::{PoseGraph, PoseGraphEdge};
use cloudreg_core::{inverse_rigid, Error, Result, RigidTransform};
use nalgebra::{Matrix4, Matrix6};

/// Incremental pose graph construction for a sequence of fragments.
///
/// One node per fragment, all starting at the identity. Odometry edges
/// (consecutive fragments) chain the node poses; loop closures only add
/// uncertain edges. Add odometry in acquisition order so every node is
/// seeded from an already seeded predecessor.
#[derive(Debug, Clone)]
pub struct PoseGraphBuilder {
    graph: PoseGraph,
}

impl PoseGraphBuilder {
    pub fn new(fragment_count: usize) -> Self {
        let mut graph = PoseGraph::new();
        for _ in 0..fragment_count {
            graph.add_node(Matrix4::identity());
        }
        Self { graph }
    }

    pub fn fragment_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Sequential edge `s -> s + 1`; seeds `pose_t = pose_s · T⁻¹`.
    pub fn add_odometry(
        &mut self,
        source: usize,
        target: usize,
        transformation: RigidTransform,
        information: Matrix6<f64>,
    ) -> Result<usize> {
        if target != source + 1 {
            return Err(Error::InvalidInput(format!(
                "Odometry edge must join consecutive fragments, got {} -> {}",
                source, target
            )));
        }
        let index = self.graph.add_edge(PoseGraphEdge::new(
            source,
            target,
            transformation,
            information,
            false,
        ))?;
        let seeded = self.graph.nodes[source].pose * inverse_rigid(&transformation);
        self.graph.nodes[target].pose = seeded;
        Ok(index)
    }

    /// Non-sequential edge, marked uncertain; leaves node poses alone.
    pub fn add_loop_closure(
        &mut self,
        source: usize,
        target: usize,
        transformation: RigidTransform,
        information: Matrix6<f64>,
    ) -> Result<usize> {
        self.graph.add_edge(PoseGraphEdge::new(
            source,
            target,
            transformation,
            information,
            true,
        ))
    }

    /// Odometry when `target == source + 1`, loop closure otherwise.
    pub fn add_pairwise(
        &mut self,
        source: usize,
        target: usize,
        transformation: RigidTransform,
        information: Matrix6<f64>,
    ) -> Result<usize> {
        if target == source + 1 {
            self.add_odometry(source, target, transformation, information)
        } else {
            self.add_loop_closure(source, target, transformation, information)
        }
    }

    pub fn graph(&self) -> &PoseGraph {
        &self.graph
    }

    pub fn build(self) -> PoseGraph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudreg_core::from_rotation_translation;
    use nalgebra::{Rotation3, Vector3};

    fn step() -> RigidTransform {
        from_rotation_translation(
            Rotation3::from_euler_angles(0.0, 0.1, 0.2).matrix(),
            &Vector3::new(0.5, 0.1, 0.0),
        )
    }

    #[test]
    fn test_odometry_seeds_next_pose() {
        let mut builder = PoseGraphBuilder::new(3);
        builder.add_odometry(0, 1, step(), Matrix6::identity()).unwrap();
        builder.add_odometry(1, 2, step(), Matrix6::identity()).unwrap();
        let graph = builder.build();

        let expected = inverse_rigid(&step()) * inverse_rigid(&step());
        assert!((graph.nodes[2].pose - expected).abs().max() < 1e-12);
        assert!(graph.edges.iter().all(|e| !e.uncertain));
        for edge in &graph.edges {
            assert!(graph.edge_residual(edge) < 1e-20);
        }
    }

    #[test]
    fn test_pairwise_dispatch() {
        let mut builder = PoseGraphBuilder::new(4);
        builder.add_pairwise(0, 1, step(), Matrix6::identity()).unwrap();
        builder.add_pairwise(0, 3, step(), Matrix6::identity()).unwrap();
        let graph = builder.graph();
        assert!(!graph.edges[0].uncertain);
        assert!(graph.edges[1].uncertain);
        // Loop closures do not move nodes.
        assert_eq!(graph.nodes[3].pose, Matrix4::identity());
    }

    #[test]
    fn test_odometry_requires_consecutive_fragments() {
        let mut builder = PoseGraphBuilder::new(4);
        let err = builder.add_odometry(0, 2, step(), Matrix6::identity());
        assert!(matches!(err, Err(Error::InvalidInput(_))));
        let err = builder.add_odometry(3, 4, step(), Matrix6::identity());
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }
}
