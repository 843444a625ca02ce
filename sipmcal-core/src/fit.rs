//! Per-sensor fit results.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Reduced chi-square reported for fits that did not converge.
pub const CHI2_NOT_CONVERGED: f64 = -1.0;

/// Spectrum model a parameter vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SpectrumKind {
    /// `[x0, pe, s0, s1, n_0, .., n_{k-1}]`
    MultiGaussian,
    /// `[N, x0, pe, mu, s0, s1]`
    PoissonGauss,
}

impl SpectrumKind {
    /// Short identifier used in logs and file names.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::MultiGaussian => "multi-gauss",
            Self::PoissonGauss => "poisson-gauss",
        }
    }
}

impl fmt::Display for SpectrumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a fit stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FitStatus {
    /// Relative cost reduction fell below `ftol`.
    CostTolerance,
    /// Step size fell below `xtol`.
    StepTolerance,
    /// Projected gradient fell below `gtol`.
    GradientTolerance,
    /// Residuals vanished.
    ZeroResidual,
    /// Iteration budget exhausted.
    MaxIterations,
    /// Damping grew without finding a better point.
    DampingOverflow,
    /// The model produced NaN or infinite residuals at the starting point.
    NonFiniteResidual,
    /// At least one parameter has `lower > upper`.
    InfeasibleBounds,
    /// Fewer samples than parameters.
    InsufficientData,
    /// The sensor has no histogram.
    NoData,
}

impl FitStatus {
    /// Returns true for the stopping reasons that count as convergence.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::CostTolerance | Self::StepTolerance | Self::GradientTolerance | Self::ZeroResidual
        )
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::CostTolerance => "cost tolerance reached",
            Self::StepTolerance => "step tolerance reached",
            Self::GradientTolerance => "gradient tolerance reached",
            Self::ZeroResidual => "zero residual",
            Self::MaxIterations => "maximum iterations reached",
            Self::DampingOverflow => "damping overflow",
            Self::NonFiniteResidual => "non-finite residual",
            Self::InfeasibleBounds => "infeasible bounds",
            Self::InsufficientData => "fewer samples than parameters",
            Self::NoData => "no histogram data",
        };
        f.write_str(text)
    }
}

/// Outcome of fitting one sensor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitResult {
    /// Sensor index.
    pub index: usize,
    /// Fitted (or last) parameter vector.
    pub parameters: Vec<f64>,
    /// Whether the optimizer reported success.
    pub converged: bool,
    /// Reduced chi-square, [`CHI2_NOT_CONVERGED`] when not converged.
    pub chi2: f64,
    /// Stopping reason.
    pub status: FitStatus,
    /// Iterations used.
    pub iterations: usize,
}

impl FitResult {
    /// Result for a sensor that has no histogram.
    #[must_use]
    pub fn no_data(index: usize, parameters: Vec<f64>) -> Self {
        Self {
            index,
            parameters,
            converged: false,
            chi2: CHI2_NOT_CONVERGED,
            status: FitStatus::NoData,
            iterations: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(FitStatus::CostTolerance.is_success());
        assert!(FitStatus::ZeroResidual.is_success());
        assert!(!FitStatus::MaxIterations.is_success());
        assert!(!FitStatus::InfeasibleBounds.is_success());
        assert!(!FitStatus::NoData.is_success());
    }

    #[test]
    fn test_no_data_result() {
        let result = FitResult::no_data(12, vec![1.0, 2.0]);
        assert!(!result.converged);
        assert!((result.chi2 - CHI2_NOT_CONVERGED).abs() < f64::EPSILON);
        assert_eq!(result.status, FitStatus::NoData);
        assert_eq!(result.parameters, vec![1.0, 2.0]);
    }
}
