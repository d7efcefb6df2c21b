use cloudreg_core::{
    from_rotation_translation, inverse_rigid, Error, PointCloud, RigidTransform, RobustLoss,
};
use cloudreg_point_cloud::{compute_fpfh_feature, estimate_normals, Feature};
use cloudreg_registration::{
    find_feature_correspondences, registration_fgr_based_on_correspondence,
    registration_fgr_based_on_feature_matching, registration_icp, registration_multi_scale_icp,
    registration_ransac_based_on_correspondence, registration_ransac_based_on_feature_matching,
    Correspondence, FgrOptions, GlobalMethod, IcpConvergenceCriteria, IcpOptions, IcpStage,
    RansacOptions, TerminationReason, TransformationEstimation,
};
use cloudreg_spatial::KdTreeSearchParam;
use nalgebra::{Matrix4, Point3, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn bumpy_surface(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let points = (0..n)
        .map(|_| {
            let x: f64 = rng.gen_range(0.0..1.0);
            let y: f64 = rng.gen_range(0.0..1.0);
            Point3::new(x, y, 0.3 * (3.0 * x).sin() * (2.0 * y).cos() + 0.1 * x * y)
        })
        .collect();
    PointCloud::new(points)
}

fn rigid(roll: f64, pitch: f64, yaw: f64, t: Vector3<f64>) -> RigidTransform {
    from_rotation_translation(Rotation3::from_euler_angles(roll, pitch, yaw).matrix(), &t)
}

fn max_abs_diff(a: &RigidTransform, b: &RigidTransform) -> f64 {
    (a - b).abs().max()
}

#[test]
fn test_ransac_grid_rotated_ninety_degrees() {
    let mut points = Vec::new();
    for i in 0..10 {
        for j in 0..10 {
            points.push(Point3::new(i as f64, j as f64, 0.0));
        }
    }
    let source = PointCloud::new(points);
    let truth = rigid(0.0, 0.0, std::f64::consts::FRAC_PI_2, Vector3::zeros());
    let target = source.transformed(&truth);
    let correspondences: Vec<Correspondence> =
        (0..100).map(|i| Correspondence::new(i, i)).collect();

    let options = RansacOptions::default()
        .with_max_correspondence_distance(0.1)
        .with_ransac_n(3)
        .with_seed(42);
    let result =
        registration_ransac_based_on_correspondence(&source, &target, &correspondences, &options)
            .unwrap();

    assert!((result.fitness - 1.0).abs() < 1e-12);
    assert!(max_abs_diff(&result.transformation, &truth) < 1e-3);
    assert_eq!(result.correspondence_set.len(), 100);
    assert_eq!(result.termination, TerminationReason::Converged);
}

#[test]
fn test_ransac_is_reproducible_with_seed() {
    let source = bumpy_surface(200, 3);
    let truth = rigid(0.1, 0.2, -0.3, Vector3::new(0.2, 0.0, -0.1));
    let target = source.transformed(&truth);
    let mut rng = StdRng::seed_from_u64(9);
    // Half of the matches are wrong.
    let correspondences: Vec<Correspondence> = (0..200)
        .map(|i| {
            let j = if i % 2 == 0 { i } else { rng.gen_range(0..200) };
            Correspondence::new(i, j)
        })
        .collect();

    let options = RansacOptions::default()
        .with_max_correspondence_distance(0.01)
        .with_seed(7);
    let a = registration_ransac_based_on_correspondence(&source, &target, &correspondences, &options)
        .unwrap();
    let b = registration_ransac_based_on_correspondence(&source, &target, &correspondences, &options)
        .unwrap();
    assert_eq!(a.transformation, b.transformation);
    assert_eq!(a.iterations, b.iterations);
    assert!(a.fitness >= 0.5 - 1e-12);
    assert!(max_abs_diff(&a.transformation, &truth) < 1e-6);
}

fn features_for(cloud: &mut PointCloud) -> Feature {
    estimate_normals(cloud, &KdTreeSearchParam::knn(15)).unwrap();
    compute_fpfh_feature(cloud, &KdTreeSearchParam::hybrid(0.25, 100)).unwrap()
}

#[test]
fn test_ransac_identical_copies() {
    let mut source = bumpy_surface(300, 11);
    let feature = features_for(&mut source);
    let target = source.clone();

    let options = RansacOptions::default()
        .with_max_correspondence_distance(0.05)
        .with_seed(1);
    let result = registration_ransac_based_on_feature_matching(
        &source, &target, &feature, &feature, true, &options,
    )
    .unwrap();
    assert!(result.fitness >= 0.99);
    assert!(result.inlier_rmse < 1e-9);
    assert!(max_abs_diff(&result.transformation, &Matrix4::identity()) < 1e-6);
}

#[test]
fn test_fgr_identical_copies() {
    let mut source = bumpy_surface(300, 12);
    let feature = features_for(&mut source);
    let target = source.clone();

    let options = FgrOptions::default()
        .with_maximum_correspondence_distance(0.05)
        .with_seed(5);
    let result =
        registration_fgr_based_on_feature_matching(&source, &target, &feature, &feature, &options)
            .unwrap();
    assert!(result.fitness >= 0.99);
    assert!(result.inlier_rmse < 1e-9);

    let via_method = GlobalMethod::Fgr(options)
        .register(&source, &target, &feature, &feature)
        .unwrap();
    assert!(via_method.fitness >= 0.99);
}

#[test]
fn test_fgr_recovers_known_motion_from_exact_matches() {
    let source = bumpy_surface(150, 21);
    let truth = rigid(0.4, -0.1, 0.6, Vector3::new(0.3, 0.2, -0.2));
    let target = source.transformed(&truth);
    let correspondences: Vec<Correspondence> =
        (0..150).map(|i| Correspondence::new(i, i)).collect();

    let result = registration_fgr_based_on_correspondence(
        &source,
        &target,
        &correspondences,
        &FgrOptions::default().with_iteration_number(128),
    )
    .unwrap();
    assert!((result.fitness - 1.0).abs() < 1e-12);
    assert!(max_abs_diff(&result.transformation, &truth) < 1e-4);
}

#[test]
fn test_icp_from_ground_truth_converges_immediately() {
    let mut source = bumpy_surface(400, 4);
    estimate_normals(&mut source, &KdTreeSearchParam::knn(10)).unwrap();
    let truth = rigid(0.05, 0.1, -0.2, Vector3::new(0.1, -0.05, 0.02));
    let target = source.transformed(&truth);

    for options in [IcpOptions::point_to_point(), IcpOptions::point_to_plane()] {
        let initial = cloudreg_registration::evaluate_registration(&source, &target, 0.05, &truth)
            .unwrap();
        let result = registration_icp(&source, &target, 0.05, &truth, &options).unwrap();
        assert!(result.iterations <= 2, "took {} iterations", result.iterations);
        assert!(result.converged());
        assert!(result.inlier_rmse <= initial.inlier_rmse + 1e-9);
        assert!((result.fitness - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_icp_refines_small_misalignment() {
    let source = bumpy_surface(500, 8);
    let truth = rigid(0.02, -0.01, 0.03, Vector3::new(0.01, 0.01, -0.005));
    let mut target = source.transformed(&truth);
    estimate_normals(&mut target, &KdTreeSearchParam::knn(10)).unwrap();

    let criteria = IcpConvergenceCriteria::default().with_max_iteration(100);
    let point_to_plane = registration_icp(
        &source,
        &target,
        0.2,
        &Matrix4::identity(),
        &IcpOptions::point_to_plane().with_criteria(criteria),
    )
    .unwrap();
    assert!(max_abs_diff(&point_to_plane.transformation, &truth) < 1e-3);
    assert!(point_to_plane.fitness > 0.99);

    let stages = [
        IcpStage {
            max_correspondence_distance: 0.2,
            criteria,
        },
        IcpStage {
            max_correspondence_distance: 0.05,
            criteria,
        },
    ];
    let multi = registration_multi_scale_icp(
        &source,
        &target,
        &stages,
        &Matrix4::identity(),
        TransformationEstimation::PointToPoint,
    )
    .unwrap();
    assert!(max_abs_diff(&multi.transformation, &truth) < 1e-3);
}

#[test]
fn test_robust_kernel_ignores_points_off_the_surface() {
    let surface = bumpy_surface(500, 21);
    let mut target = surface.clone();
    estimate_normals(&mut target, &KdTreeSearchParam::knn(10)).unwrap();
    let truth = rigid(0.02, -0.01, 0.03, Vector3::new(0.01, 0.01, -0.005));

    // Every fifth point gets a twin hovering above the surface.
    let mut points = surface.points.clone();
    points.extend(
        surface
            .points
            .iter()
            .step_by(5)
            .map(|p| p + Vector3::new(0.0, 0.0, 0.12)),
    );
    let source = PointCloud::new(points).transformed(&inverse_rigid(&truth));

    let criteria = IcpConvergenceCriteria::default().with_max_iteration(100);
    let run = |kernel| {
        registration_icp(
            &source,
            &target,
            0.2,
            &Matrix4::identity(),
            &IcpOptions::point_to_plane()
                .with_estimation(TransformationEstimation::PointToPlane { kernel })
                .with_criteria(criteria),
        )
        .unwrap()
    };

    let robust = run(Some(RobustLoss::Tukey { mu: 0.06 }));
    assert!(
        max_abs_diff(&robust.transformation, &truth) < 1e-3,
        "robust ICP off by {}",
        max_abs_diff(&robust.transformation, &truth)
    );

    let plain = run(None);
    assert!(max_abs_diff(&plain.transformation, &truth) > 2e-3);
}

#[test]
fn test_icp_reports_budget_exhaustion() {
    let source = bumpy_surface(300, 5);
    let truth = rigid(0.2, -0.1, 0.3, Vector3::new(0.1, 0.1, 0.0));
    let target = source.transformed(&truth);
    let options =
        IcpOptions::point_to_point().with_criteria(IcpConvergenceCriteria::default().with_max_iteration(1));
    let result = registration_icp(&source, &target, 0.5, &Matrix4::identity(), &options).unwrap();
    assert_eq!(result.iterations, 1);
    assert_eq!(result.termination, TerminationReason::MaxIterationsReached);
}

#[test]
fn test_point_to_plane_requires_target_normals() {
    let source = bumpy_surface(50, 1);
    let target = source.clone();
    let err = registration_icp(
        &source,
        &target,
        0.1,
        &Matrix4::identity(),
        &IcpOptions::point_to_plane(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::MissingPrerequisite(_)));
}

#[test]
fn test_empty_source_is_invalid_input() {
    let target = bumpy_surface(10, 1);
    let err = registration_icp(
        &PointCloud::default(),
        &target,
        0.1,
        &Matrix4::identity(),
        &IcpOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

fn random_feature(n: usize, seed: u64) -> Feature<4> {
    let mut rng = StdRng::seed_from_u64(seed);
    Feature::new(
        (0..n)
            .map(|_| {
                [
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                ]
            })
            .collect(),
    )
}

fn brute_nearest(query: &[f64; 4], set: &Feature<4>) -> usize {
    let dist = |f: &[f64; 4]| -> f64 { f.iter().zip(query).map(|(a, b)| (a - b) * (a - b)).sum() };
    let mut best = 0;
    for (i, f) in set.data.iter().enumerate() {
        if dist(f) < dist(&set.data[best]) {
            best = i;
        }
    }
    best
}

#[test]
fn test_mutual_filter_matches_brute_force() {
    for seed in 0..5 {
        let source = random_feature(40, seed);
        let target = random_feature(35, seed + 100);

        let mutual = find_feature_correspondences(&source, &target, true).unwrap();
        for c in &mutual {
            assert_eq!(brute_nearest(&source.data[c.source], &target), c.target);
            assert_eq!(brute_nearest(&target.data[c.target], &source), c.source);
        }

        // Every symmetric pair found by brute force is present.
        let expected: Vec<Correspondence> = (0..source.len())
            .filter_map(|i| {
                let j = brute_nearest(&source.data[i], &target);
                (brute_nearest(&target.data[j], &source) == i).then(|| Correspondence::new(i, j))
            })
            .collect();
        assert_eq!(mutual, expected);

        let one_way = find_feature_correspondences(&source, &target, false).unwrap();
        assert_eq!(one_way.len(), source.len());
        assert!(mutual.len() <= one_way.len());
    }
}

#[test]
fn test_out_of_range_correspondence_is_invalid_input() {
    let pc = bumpy_surface(10, 2);
    let bad = vec![Correspondence::new(0, 0), Correspondence::new(1, 99), Correspondence::new(2, 2)];
    let err = registration_ransac_based_on_correspondence(&pc, &pc, &bad, &RansacOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn test_global_method_serde_round_trip() {
    let method = GlobalMethod::Ransac(RansacOptions::default().with_seed(3));
    let json = serde_json::to_string(&method).unwrap();
    assert!(json.contains("\"method\":\"ransac\""));
    let back: GlobalMethod = serde_json::from_str(&json).unwrap();
    assert_eq!(back, method);
}
