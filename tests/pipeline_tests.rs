use cloudreg::registration::{GlobalMethod, RansacOptions};
use cloudreg::{
    combine_fragments, preprocess, register_fragments, Error, PipelineConfig, PointCloud,
    RigidTransform,
};
use nalgebra::{Matrix4, Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bumpy height field well above the origin so every copy orients its
/// normals towards the same side.
fn scene(n: usize) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(17);
    let points = (0..n)
        .map(|_| {
            let x: f64 = rng.gen_range(0.0..1.0);
            let y: f64 = rng.gen_range(0.0..1.0);
            let z = 3.0 + 0.15 * (4.0 * x).sin() * (3.0 * y).cos() + 0.1 * x * x;
            Point3::new(x, y, z)
        })
        .collect();
    PointCloud::new(points)
}

fn shifts() -> Vec<Vector3<f64>> {
    vec![
        Vector3::zeros(),
        Vector3::new(0.3, -0.2, 0.1),
        Vector3::new(-0.4, 0.5, 0.2),
    ]
}

fn translation_matrix(t: &Vector3<f64>) -> RigidTransform {
    Matrix4::new_translation(t)
}

fn fragments() -> Vec<PointCloud> {
    let base = scene(2000);
    shifts()
        .iter()
        .map(|t| base.transformed(&translation_matrix(t)))
        .collect()
}

fn config() -> PipelineConfig {
    let config = PipelineConfig::for_voxel_size(0.05);
    let global = GlobalMethod::Ransac(RansacOptions::default().with_seed(99))
        .with_max_correspondence_distance(0.075);
    config.with_global(global)
}

#[test]
fn test_preprocess_produces_normals_and_features() {
    let prepared = preprocess(&scene(2000), &config()).unwrap();
    assert!(prepared.cloud.len() < 2000);
    assert!(prepared.cloud.has_normals());
    assert_eq!(prepared.feature.len(), prepared.cloud.len());
}

fn assert_poses_recovered(poses: &[RigidTransform]) {
    let t = shifts();
    assert_eq!(poses.len(), t.len());
    for (k, pose) in poses.iter().enumerate() {
        let expected = translation_matrix(&(t[0] - t[k]));
        assert!(
            (pose - expected).abs().max() < 1e-6,
            "fragment {} pose off by {}",
            k,
            (pose - expected).abs().max()
        );
    }
}

#[test]
fn test_translated_fragments_are_aligned() {
    let fragments = fragments();
    let result = register_fragments(&fragments, &config()).unwrap();

    assert_eq!(result.poses.len(), 3);
    assert_eq!(result.pairwise.len(), 3);
    assert!(result.optimization.pruned_edges.is_empty());
    assert_eq!(result.pose_graph.edge_count(), 3);

    assert_poses_recovered(&result.poses);
    for pair in &result.pairwise {
        assert!(pair.refined.fitness > 0.99);
        assert!(pair.information[(0, 0)] > 0.0);
    }
    assert!(result.pairwise.iter().filter(|p| p.is_odometry()).count() == 2);
}

#[test]
fn test_dedicated_thread_pool_run() {
    let result = register_fragments(&fragments(), &config().with_num_threads(2)).unwrap();
    assert_poses_recovered(&result.poses);
}

#[test]
fn test_combine_fragments_overlays_points() {
    let fragments = fragments();
    let t = shifts();
    let poses: Vec<RigidTransform> = t.iter().map(|s| translation_matrix(&(t[0] - s))).collect();

    let merged = combine_fragments(&fragments, &poses, None).unwrap();
    assert_eq!(merged.len(), 3 * fragments[0].len());
    let n = fragments[0].len();
    for i in (0..n).step_by(97) {
        for k in 1..3 {
            assert!((merged.points[k * n + i] - merged.points[i]).norm() < 1e-9);
        }
    }

    let down = combine_fragments(&fragments, &poses, Some(0.05)).unwrap();
    assert!(down.len() < merged.len());
    assert!(!down.is_empty());

    let err = combine_fragments(&fragments, &poses[..2], None).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn test_single_fragment_stays_at_origin() {
    let result = register_fragments(&[scene(500)], &config()).unwrap();
    assert_eq!(result.poses, vec![Matrix4::identity()]);
    assert!(result.pairwise.is_empty());
}

#[test]
fn test_pipeline_rejects_bad_input() {
    let err = register_fragments(&[], &config()).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let mut bad = config();
    bad.voxel_size = 0.0;
    let err = register_fragments(&fragments(), &bad).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let err = register_fragments(&fragments(), &config().with_num_threads(0)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
