use crate::fgr::{registration_fgr_based_on_feature_matching, FgrOptions};
use crate::ransac::{registration_ransac_based_on_feature_matching, RansacOptions};
use crate::result::RegistrationResult;
use cloudreg_core::{PointCloud, Result};
use cloudreg_point_cloud::Feature;
use serde::{Deserialize, Serialize};

/// Feature-based global registration strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum GlobalMethod {
    /// RANSAC over mutually filtered feature matches.
    Ransac(RansacOptions),
    Fgr(FgrOptions),
}

impl Default for GlobalMethod {
    fn default() -> Self {
        GlobalMethod::Ransac(RansacOptions::default())
    }
}

impl GlobalMethod {
    pub fn name(&self) -> &'static str {
        match self {
            GlobalMethod::Ransac(_) => "ransac",
            GlobalMethod::Fgr(_) => "fgr",
        }
    }

    pub fn max_correspondence_distance(&self) -> f64 {
        match self {
            GlobalMethod::Ransac(o) => o.max_correspondence_distance,
            GlobalMethod::Fgr(o) => o.maximum_correspondence_distance,
        }
    }

    /// Set the inlier distance of whichever method is selected.
    pub fn with_max_correspondence_distance(mut self, distance: f64) -> Self {
        match &mut self {
            GlobalMethod::Ransac(o) => o.max_correspondence_distance = distance,
            GlobalMethod::Fgr(o) => o.maximum_correspondence_distance = distance,
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            GlobalMethod::Ransac(o) => o.validate(),
            GlobalMethod::Fgr(o) => o.validate(),
        }
    }

    pub fn register<const D: usize>(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        source_feature: &Feature<D>,
        target_feature: &Feature<D>,
    ) -> Result<RegistrationResult> {
        match self {
            GlobalMethod::Ransac(options) => registration_ransac_based_on_feature_matching(
                source,
                target,
                source_feature,
                target_feature,
                true,
                options,
            ),
            GlobalMethod::Fgr(options) => registration_fgr_based_on_feature_matching(
                source,
                target,
                source_feature,
                target_feature,
                options,
            ),
        }
    }
}
