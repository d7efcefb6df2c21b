use cloudreg_core::{exp_se3, from_rotation_translation, inverse_rigid, Error, RigidTransform};
use cloudreg_optimize::{
    global_optimization, GlobalOptimizationConvergenceCriteria, GlobalOptimizationOption,
    PoseGraph, PoseGraphBuilder,
};
use nalgebra::{Matrix6, Rotation3, Vector3, Vector6};

fn step(i: usize) -> RigidTransform {
    let a = i as f64;
    from_rotation_translation(
        Rotation3::from_euler_angles(0.05 * a, -0.1, 0.2 + 0.03 * a).matrix(),
        &Vector3::new(1.0, 0.2 * a, -0.1),
    )
}

/// Builder graph for a chain of `n` fragments with exact odometry.
fn chain(n: usize, information: Matrix6<f64>) -> PoseGraphBuilder {
    let mut builder = PoseGraphBuilder::new(n);
    for i in 0..n - 1 {
        builder.add_odometry(i, i + 1, step(i), information).unwrap();
    }
    builder
}

fn chained_poses(n: usize) -> Vec<RigidTransform> {
    let mut poses = vec![RigidTransform::identity()];
    for i in 0..n - 1 {
        let next = poses[i] * inverse_rigid(&step(i));
        poses.push(next);
    }
    poses
}

fn max_pose_error(graph: &PoseGraph, expected: &[RigidTransform]) -> f64 {
    graph
        .nodes
        .iter()
        .zip(expected)
        .map(|(node, e)| (node.pose - e).abs().max())
        .fold(0.0, f64::max)
}

#[test]
fn test_odometry_chain_reproduces_chained_poses() {
    let mut graph = chain(6, Matrix6::identity()).build();
    let result = global_optimization(
        &mut graph,
        &GlobalOptimizationOption::default(),
        &GlobalOptimizationConvergenceCriteria::default(),
    )
    .unwrap();

    assert!(max_pose_error(&graph, &chained_poses(6)) < 1e-9);
    assert_eq!(result.iterations, 0);
    assert!(result.pruned_edges.is_empty());
    assert!(result.final_residual() < 1e-12);
}

#[test]
fn test_perturbed_chain_is_restored() {
    let mut graph = chain(5, Matrix6::identity()).build();
    for (k, node) in graph.nodes.iter_mut().enumerate().skip(1) {
        let s = k as f64;
        let noise = Vector6::new(0.05, -0.03 * s, 0.02, 0.01 * s, -0.02, 0.03);
        node.pose = node.pose * exp_se3(&noise);
    }

    let result = global_optimization(
        &mut graph,
        &GlobalOptimizationOption::default(),
        &GlobalOptimizationConvergenceCriteria::default(),
    )
    .unwrap();
    assert!(max_pose_error(&graph, &chained_poses(5)) < 1e-4);
    assert!(result.final_residual() < result.initial_residual);
}

#[test]
fn test_inconsistent_loop_closure_is_pruned() {
    let information = Matrix6::identity() * 100.0;
    let mut builder = chain(4, information);
    let truth = chained_poses(4);

    let consistent = inverse_rigid(&truth[3]) * truth[0];
    builder.add_loop_closure(0, 3, consistent, information).unwrap();

    let bogus_offset = from_rotation_translation(
        Rotation3::from_euler_angles(0.0, 0.0, 0.8).matrix(),
        &Vector3::new(5.0, 0.0, 0.0),
    );
    let bogus = bogus_offset * inverse_rigid(&truth[2]) * truth[0];
    builder.add_loop_closure(0, 2, bogus, information).unwrap();

    let mut graph = builder.build();
    assert_eq!(graph.edge_count(), 5);
    let result = global_optimization(
        &mut graph,
        &GlobalOptimizationOption::default(),
        &GlobalOptimizationConvergenceCriteria::default(),
    )
    .unwrap();

    assert_eq!(result.pruned_edges, vec![4]);
    assert_eq!(graph.edge_count(), 4);
    let kept = &graph.edges[3];
    assert!(kept.uncertain);
    assert_eq!((kept.source_node_id, kept.target_node_id), (0, 3));
    assert!(kept.confidence > 0.99);
    assert!(max_pose_error(&graph, &truth) < 1e-6);

    // Pruning never raises the residual.
    assert!(result.residuals.len() >= 2);
    for pair in result.residuals.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-12);
    }
    assert!(result.residuals[0] <= result.initial_residual + 1e-12);
}

#[test]
fn test_zero_threshold_keeps_every_edge() {
    let information = Matrix6::identity() * 10.0;
    let mut builder = chain(3, information);
    let bogus = from_rotation_translation(
        Rotation3::identity().matrix(),
        &Vector3::new(3.0, 3.0, 0.0),
    );
    builder.add_loop_closure(0, 2, bogus, information).unwrap();
    let mut graph = builder.build();

    let result = global_optimization(
        &mut graph,
        &GlobalOptimizationOption::default().with_edge_prune_threshold(0.0),
        &GlobalOptimizationConvergenceCriteria::default(),
    )
    .unwrap();
    assert!(result.pruned_edges.is_empty());
    assert_eq!(graph.edge_count(), 3);
    assert_eq!(result.residuals.len(), 1);
}

#[test]
fn test_reference_node_stays_fixed() {
    let mut graph = chain(4, Matrix6::identity()).build();
    let reference_pose = graph.nodes[2].pose;
    for node in graph.nodes.iter_mut() {
        node.pose = node.pose * exp_se3(&Vector6::new(0.01, 0.0, -0.02, 0.0, 0.01, 0.0));
    }
    graph.nodes[2].pose = reference_pose;

    global_optimization(
        &mut graph,
        &GlobalOptimizationOption::default().with_reference_node(2),
        &GlobalOptimizationConvergenceCriteria::default(),
    )
    .unwrap();
    assert_eq!(graph.nodes[2].pose, reference_pose);
    assert!(max_pose_error(&graph, &chained_poses(4)) < 1e-4);
}

#[test]
fn test_invalid_graphs_are_rejected() {
    let option = GlobalOptimizationOption::default();
    let criteria = GlobalOptimizationConvergenceCriteria::default();

    let mut empty = PoseGraph::new();
    let err = global_optimization(&mut empty, &option, &criteria).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let mut graph = chain(3, Matrix6::identity()).build();
    let err =
        global_optimization(&mut graph, &option.with_reference_node(3), &criteria).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    // Edges edited through the public fields are re-checked.
    graph.edges[0].target_node_id = graph.edges[0].source_node_id;
    let err = global_optimization(&mut graph, &option, &criteria).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn test_options_from_partial_json() {
    let option: GlobalOptimizationOption =
        serde_json::from_str(r#"{ "edge_prune_threshold": 0.5 }"#).unwrap();
    assert!((option.edge_prune_threshold - 0.5).abs() < 1e-12);
    assert!((option.max_correspondence_distance - 0.075).abs() < 1e-12);
    assert_eq!(option.reference_node, 0);

    let criteria: GlobalOptimizationConvergenceCriteria =
        serde_json::from_str(r#"{ "max_iteration": 7 }"#).unwrap();
    assert_eq!(criteria.max_iteration, 7);
    assert_eq!(criteria.max_pruning_passes, 5);
}
