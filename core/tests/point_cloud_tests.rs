use cloudreg_core::{Error, PointCloud};
use nalgebra::{Point3, Vector3};

#[test]
fn test_point_cloud_result_handling() {
    let points = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)];
    let cloud = PointCloud::new(points);

    // 1. Valid colors
    let colors = vec![Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
    let cloud_with_colors = cloud.clone().with_colors(colors);
    assert!(cloud_with_colors.is_ok());

    // 2. Invalid colors (count mismatch)
    let bad_colors = vec![Point3::new(1.0, 0.0, 0.0)];
    let cloud_bad_colors = cloud.clone().with_colors(bad_colors);
    assert!(cloud_bad_colors.is_err());
    assert!(cloud_bad_colors
        .unwrap_err()
        .to_string()
        .contains("Color count"));

    // 3. Valid normals
    let normals = vec![Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, 1.0)];
    let cloud_with_normals = cloud.clone().with_normals(normals);
    assert!(cloud_with_normals.is_ok());
    assert!(cloud_with_normals.unwrap().has_normals());

    // 4. Invalid normals (count mismatch)
    let bad_normals = vec![Vector3::new(0.0, 0.0, 1.0)];
    let cloud_bad_normals = cloud.with_normals(bad_normals);
    assert!(cloud_bad_normals.is_err());
    assert!(cloud_bad_normals
        .unwrap_err()
        .to_string()
        .contains("Normal count"));
}

#[test]
fn test_empty_cloud_is_invalid_input() {
    let cloud = PointCloud::default();
    match cloud.ensure_non_empty("source") {
        Err(Error::InvalidInput(msg)) => assert!(msg.contains("source")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_validate_catches_manual_mismatch() {
    let mut cloud = PointCloud::new(vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);
    cloud.normals = Some(vec![Vector3::z()]);
    assert!(matches!(cloud.validate(), Err(Error::InvalidInput(_))));
}

#[test]
fn test_centroid() {
    let cloud = PointCloud::new(vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(2.0, 0.0, 0.0),
        Point3::new(0.0, 4.0, 0.0),
        Point3::new(2.0, 4.0, 8.0),
    ]);
    let c = cloud.centroid().unwrap();
    assert!((c - Point3::new(1.0, 2.0, 2.0)).norm() < 1e-12);
    assert!(PointCloud::default().centroid().is_none());
}
