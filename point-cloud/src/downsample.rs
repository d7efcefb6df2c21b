use cloudreg_core::{PointCloud, Result};
use cloudreg_spatial::VoxelGrid;
use nalgebra::Vector3;

/// Downsample a point cloud with a voxel grid.
///
/// Returns one point per occupied voxel (the centroid), ordered by voxel key.
/// Normals are averaged and renormalized, colors averaged.
pub fn voxel_down_sample(pc: &PointCloud, voxel_size: f64) -> Result<PointCloud> {
    pc.validate()?;
    let grid = VoxelGrid::from_points(&pc.points, voxel_size)?;

    let mut points = Vec::with_capacity(grid.len());
    let mut normals = pc.normals.as_ref().map(|_| Vec::with_capacity(grid.len()));
    let mut colors = pc.colors.as_ref().map(|_| Vec::with_capacity(grid.len()));

    for (_, voxel) in grid.voxels() {
        let Some(centroid) = voxel.centroid(&pc.points) else {
            continue;
        };
        points.push(centroid);

        if let (Some(out), Some(src)) = (&mut normals, &pc.normals) {
            let mut n = voxel
                .indices
                .iter()
                .fold(Vector3::zeros(), |acc, &i| acc + src[i]);
            if n.norm_squared() > 1e-12 {
                n.normalize_mut();
            }
            out.push(n);
        }
        if let (Some(out), Some(src)) = (&mut colors, &pc.colors) {
            out.extend(voxel.centroid(src));
        }
    }

    tracing::debug!(
        input = pc.len(),
        output = points.len(),
        voxel_size,
        "voxel downsampling"
    );

    Ok(PointCloud {
        points,
        normals,
        colors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_voxel_down_sample() {
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                points.push(Point3::new(i as f64 * 0.01, j as f64 * 0.01, 0.0));
            }
        }
        let pc = PointCloud::new(points);

        // 0.2 covers the whole 0.09 x 0.09 patch.
        let down = voxel_down_sample(&pc, 0.2).unwrap();
        assert_eq!(down.len(), 1);
        assert!((down.points[0] - Point3::new(0.045, 0.045, 0.0)).norm() < 1e-12);

        // Grid origin sits half a voxel below the minimum: cells split at 0.025, 0.075.
        let down = voxel_down_sample(&pc, 0.05).unwrap();
        assert_eq!(down.len(), 9);
    }

    #[test]
    fn test_rejects_non_positive_voxel() {
        let pc = PointCloud::new(vec![Point3::origin()]);
        assert!(voxel_down_sample(&pc, 0.0).is_err());
        assert!(voxel_down_sample(&pc, -0.5).is_err());
    }

    #[test]
    fn test_normals_are_renormalized() {
        let pc = PointCloud::new(vec![Point3::origin(), Point3::new(0.01, 0.0, 0.0)])
            .with_normals(vec![Vector3::x(), Vector3::y()])
            .unwrap();
        let down = voxel_down_sample(&pc, 1.0).unwrap();
        let n = down.normals.unwrap()[0];
        assert!((n.norm() - 1.0).abs() < 1e-12);
        assert!((n.x - n.y).abs() < 1e-12);
    }

    #[test]
    fn test_colors_are_averaged() {
        let pc = PointCloud::new(vec![
            Point3::origin(),
            Point3::new(0.01, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
        ])
        .with_colors(vec![
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 1.0, 0.0),
        ])
        .unwrap();
        let down = voxel_down_sample(&pc, 1.0).unwrap();
        let colors = down.colors.unwrap();
        assert_eq!(colors.len(), 2);
        assert!((colors[0] - Point3::new(0.5, 0.0, 0.5)).norm() < 1e-12);
        assert!((colors[1] - Point3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
    }
}
