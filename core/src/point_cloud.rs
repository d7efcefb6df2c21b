use crate::geometry::RigidTransform;
use crate::{Error, Result};
use nalgebra::{Point3, Vector3};

/// Ordered 3D points with optional per-point normals and colors.
///
/// When present, `normals` and `colors` are parallel to `points`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Point3<f64>>,
    pub normals: Option<Vec<Vector3<f64>>>,
    pub colors: Option<Vec<Point3<f64>>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self {
            points,
            normals: None,
            colors: None,
        }
    }

    pub fn with_colors(mut self, colors: Vec<Point3<f64>>) -> Result<Self> {
        if colors.len() == self.points.len() {
            self.colors = Some(colors);
            Ok(self)
        } else {
            Err(Error::InvalidInput(format!(
                "Color count {} does not match point count {}",
                colors.len(),
                self.points.len()
            )))
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<f64>>) -> Result<Self> {
        if normals.len() == self.points.len() {
            self.normals = Some(normals);
            Ok(self)
        } else {
            Err(Error::InvalidInput(format!(
                "Normal count {} does not match point count {}",
                normals.len(),
                self.points.len()
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.as_ref().map_or(false, |n| !n.is_empty())
    }

    pub fn has_colors(&self) -> bool {
        self.colors.as_ref().map_or(false, |c| !c.is_empty())
    }

    /// Check that the parallel arrays agree with the point count.
    pub fn validate(&self) -> Result<()> {
        if let Some(normals) = &self.normals {
            if normals.len() != self.points.len() {
                return Err(Error::InvalidInput(format!(
                    "Normal count {} does not match point count {}",
                    normals.len(),
                    self.points.len()
                )));
            }
        }
        if let Some(colors) = &self.colors {
            if colors.len() != self.points.len() {
                return Err(Error::InvalidInput(format!(
                    "Color count {} does not match point count {}",
                    colors.len(),
                    self.points.len()
                )));
            }
        }
        Ok(())
    }

    /// Fails with `InvalidInput` when the cloud is empty or inconsistent.
    pub fn ensure_non_empty(&self, what: &str) -> Result<()> {
        if self.points.is_empty() {
            return Err(Error::InvalidInput(format!("{what} point cloud is empty")));
        }
        self.validate()
    }

    /// Apply a rigid transform in place. Normals are rotated, colors untouched.
    pub fn transform(&mut self, transformation: &RigidTransform) {
        let rotation = transformation.fixed_view::<3, 3>(0, 0).into_owned();
        for p in &mut self.points {
            *p = transformation.transform_point(p);
        }
        if let Some(normals) = &mut self.normals {
            for n in normals.iter_mut() {
                *n = rotation * *n;
            }
        }
    }

    /// Transformed copy of this cloud.
    pub fn transformed(&self, transformation: &RigidTransform) -> Self {
        let mut copy = self.clone();
        copy.transform(transformation);
        copy
    }

    pub fn select_by_index(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.points.len()) {
            return Err(Error::InvalidInput(format!(
                "Index {} out of range for point cloud of size {}",
                bad,
                self.points.len()
            )));
        }
        Ok(Self {
            points: indices.iter().map(|&i| self.points[i]).collect(),
            normals: self
                .normals
                .as_ref()
                .map(|n| indices.iter().map(|&i| n[i]).collect()),
            colors: self
                .colors
                .as_ref()
                .map(|c| indices.iter().map(|&i| c[i]).collect()),
        })
    }

    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords);
        Some(Point3::from(sum / self.points.len() as f64))
    }

    /// Append another cloud. Normals/colors survive only if both sides carry them.
    pub fn extend(&mut self, other: &PointCloud) {
        self.normals = match (self.normals.take(), &other.normals) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend_from_slice(theirs);
                Some(mine)
            }
            (None, Some(theirs)) if self.points.is_empty() => Some(theirs.clone()),
            _ => None,
        };
        self.colors = match (self.colors.take(), &other.colors) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend_from_slice(theirs);
                Some(mine)
            }
            (None, Some(theirs)) if self.points.is_empty() => Some(theirs.clone()),
            _ => None,
        };
        self.points.extend_from_slice(&other.points);
    }
}
