//! Robust loss functions for outlier-aware least squares
//!
//! Used as optional kernels by point-to-plane ICP (iteratively reweighted
//! least squares). The Geman-McClure line process shared by Fast Global
//! Registration and pose graph optimization lives here as well.

use serde::{Deserialize, Serialize};

/// Kernel applied to point-to-plane residuals during reweighted ICP.
///
/// The parameter of each variant is the residual scale (in metres) at which
/// the kernel starts discounting a correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RobustLoss {
    GemanMcClure { mu: f64 },
    Welsch { mu: f64 },
    Huber { mu: f64 },
    /// Hard cut at `c`.
    TruncatedLeastSquares { c: f64 },
    Cauchy { mu: f64 },
    /// Tukey biweight, zero weight beyond `mu`.
    Tukey { mu: f64 },
}

impl RobustLoss {
    /// IRLS weight `ρ'(r) / r`, scaled so a zero residual weighs 1.
    pub fn weight(&self, residual: f64) -> f64 {
        let r = residual.abs();
        if r < 1e-12 {
            return 1.0;
        }
        let r2 = r * r;
        match *self {
            RobustLoss::GemanMcClure { mu } => (mu / (mu + r2)).powi(2),
            RobustLoss::Welsch { mu } => (-r2 / mu).exp(),
            RobustLoss::Huber { mu } => (mu / r).min(1.0),
            RobustLoss::TruncatedLeastSquares { c } => f64::from(u8::from(r < c)),
            RobustLoss::Cauchy { mu } => 1.0 / (1.0 + r2 / (mu * mu)),
            RobustLoss::Tukey { mu } if r <= mu => (1.0 - r2 / (mu * mu)).powi(2),
            RobustLoss::Tukey { .. } => 0.0,
        }
    }
}

/// Geman-McClure line process `l = (μ / (μ + r²))²`.
///
/// `l` is the closed-form minimizer of `l·r² + μ(√l − 1)²`, so plugging it
/// back yields the Geman-McClure energy `μ·r² / (μ + r²)`.
#[inline]
pub fn line_process_weight(mu: f64, residual_sq: f64) -> f64 {
    let t = mu / (mu + residual_sq);
    t * t
}

/// Energy of one residual under the optimal line process.
#[inline]
pub fn line_process_energy(mu: f64, residual_sq: f64) -> f64 {
    mu * residual_sq / (mu + residual_sq)
}
