use cloudreg_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Neighborhood definition shared by normal estimation and feature extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KdTreeSearchParam {
    Knn { k: usize },
    Radius { radius: f64 },
    /// Up to `max_nn` nearest neighbors within `radius`.
    Hybrid { radius: f64, max_nn: usize },
}

impl KdTreeSearchParam {
    pub fn knn(k: usize) -> Self {
        KdTreeSearchParam::Knn { k }
    }

    pub fn radius(radius: f64) -> Self {
        KdTreeSearchParam::Radius { radius }
    }

    pub fn hybrid(radius: f64, max_nn: usize) -> Self {
        KdTreeSearchParam::Hybrid { radius, max_nn }
    }

    pub fn validate(&self) -> Result<()> {
        let (radius, count) = match *self {
            KdTreeSearchParam::Knn { k } => (None, Some(k)),
            KdTreeSearchParam::Radius { radius } => (Some(radius), None),
            KdTreeSearchParam::Hybrid { radius, max_nn } => (Some(radius), Some(max_nn)),
        };
        if let Some(r) = radius {
            if !(r.is_finite() && r > 0.0) {
                return Err(Error::InvalidInput(format!(
                    "Search radius must be positive, got {r}"
                )));
            }
        }
        if count == Some(0) {
            return Err(Error::InvalidInput(
                "Neighbor count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for KdTreeSearchParam {
    fn default() -> Self {
        KdTreeSearchParam::Knn { k: 30 }
    }
}
