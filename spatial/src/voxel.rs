//! Sparse voxel grid keyed by integer cell coordinates

use cloudreg_core::{Error, Result};
use nalgebra::{Point3, Vector3};
use std::collections::BTreeMap;

pub type VoxelKey = [i64; 3];

/// Indices of the points that fell into one cell.
#[derive(Debug, Clone, Default)]
pub struct Voxel {
    pub indices: Vec<usize>,
}

impl Voxel {
    /// Mean of `values` over this cell's indices. Works for positions and colors alike.
    pub fn centroid(&self, points: &[Point3<f64>]) -> Option<Point3<f64>> {
        if self.indices.is_empty() {
            return None;
        }
        let sum = self
            .indices
            .iter()
            .fold(Vector3::zeros(), |acc, &i| acc + points[i].coords);
        Some(Point3::from(sum / self.indices.len() as f64))
    }
}

/// Voxel grid anchored at `origin`. Iteration is in ascending key order.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    pub origin: Point3<f64>,
    pub voxel_size: f64,
    pub grid: BTreeMap<VoxelKey, Voxel>,
}

impl VoxelGrid {
    pub fn new(origin: Point3<f64>, voxel_size: f64) -> Result<Self> {
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Err(Error::InvalidInput(format!(
                "Voxel size must be positive, got {voxel_size}"
            )));
        }
        Ok(Self {
            origin,
            voxel_size,
            grid: BTreeMap::new(),
        })
    }

    /// Grid anchored half a voxel below the bounding box minimum, filled with `points`.
    pub fn from_points(points: &[Point3<f64>], voxel_size: f64) -> Result<Self> {
        let min = points.iter().fold(
            Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            |acc, p| Point3::new(acc.x.min(p.x), acc.y.min(p.y), acc.z.min(p.z)),
        );
        let origin = if points.is_empty() {
            Point3::origin()
        } else {
            min - Vector3::repeat(voxel_size * 0.5)
        };
        let mut grid = Self::new(origin, voxel_size)?;
        for (index, point) in points.iter().enumerate() {
            grid.insert(point, index);
        }
        Ok(grid)
    }

    pub fn insert(&mut self, point: &Point3<f64>, index: usize) {
        let key = self.point_to_voxel(point);
        self.grid.entry(key).or_default().indices.push(index);
    }

    pub fn point_to_voxel(&self, point: &Point3<f64>) -> VoxelKey {
        let rel = (point - self.origin) / self.voxel_size;
        [
            rel.x.floor() as i64,
            rel.y.floor() as i64,
            rel.z.floor() as i64,
        ]
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    pub fn voxels(&self) -> impl Iterator<Item = (&VoxelKey, &Voxel)> {
        self.grid.iter()
    }

}
