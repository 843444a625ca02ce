//! Charge-spectrum models.
//!
//! Both models describe a SiPM charge histogram as a comb of Gaussian
//! photoelectron peaks at `x0 + i·pe` whose variance grows linearly with
//! the peak number, `s0² + i·s1²`.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use sipmcal_core::{FitError, SpectrumKind};
use statrs::function::factorial::factorial;
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A parametric spectrum `f(params, x)`.
pub trait SpectrumModel: Send + Sync {
    /// Model name.
    fn name(&self) -> &'static str;

    /// Parameter layout of the model.
    fn kind(&self) -> SpectrumKind;

    /// Number of parameters.
    fn n_params(&self) -> usize;

    /// Writes the prediction at each `xs[j]` into `out[j]`.
    ///
    /// Callers guarantee `params.len() == self.n_params()` and
    /// `out.len() == xs.len()`.
    fn predict_into(&self, params: &[f64], xs: &[f64], out: &mut [f64]);

    /// Evaluates the model on `xs`.
    ///
    /// # Errors
    /// Returns [`FitError::ParameterCount`] for a parameter vector of the wrong length.
    fn evaluate(&self, params: &[f64], xs: &[f64]) -> Result<Vec<f64>, FitError> {
        if params.len() != self.n_params() {
            return Err(FitError::ParameterCount {
                expected: self.n_params(),
                found: params.len(),
            });
        }
        let mut out = vec![0.0; xs.len()];
        self.predict_into(params, xs, &mut out);
        Ok(out)
    }
}

/// Normalized Gaussian density.
#[inline]
fn gaussian(x: f64, mean: f64, variance: f64) -> f64 {
    let d = x - mean;
    (-d * d / (2.0 * variance)).exp() / (2.0 * PI * variance).sqrt()
}

/// Sum of periodically spaced Gaussian peaks with free populations.
///
/// Parameters: `[x0, pe, s0, s1, n_0, .., n_{peaks-1}]` where `n_i` is the
/// number of events in peak `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MultiGaussian {
    peaks: usize,
}

impl MultiGaussian {
    /// Creates a model with `peaks` Gaussian peaks.
    #[must_use]
    pub fn new(peaks: usize) -> Self {
        Self { peaks }
    }

    /// Number of peaks.
    #[must_use]
    pub fn peaks(&self) -> usize {
        self.peaks
    }
}

impl Default for MultiGaussian {
    fn default() -> Self {
        Self::new(5)
    }
}

impl SpectrumModel for MultiGaussian {
    fn name(&self) -> &'static str {
        "MultiGaussian"
    }

    fn kind(&self) -> SpectrumKind {
        SpectrumKind::MultiGaussian
    }

    fn n_params(&self) -> usize {
        4 + self.peaks
    }

    fn predict_into(&self, params: &[f64], xs: &[f64], out: &mut [f64]) {
        debug_assert_eq!(params.len(), self.n_params());
        out.fill(0.0);
        let (x0, pe, s0, s1) = (params[0], params[1], params[2], params[3]);
        for (i, &population) in params[4..].iter().enumerate() {
            let k = i as f64;
            let mean = x0 + k * pe;
            let variance = s0 * s0 + k * s1 * s1;
            for (y, &x) in out.iter_mut().zip(xs) {
                *y += population * gaussian(x, mean, variance);
            }
        }
    }
}

/// Poisson-weighted sum of Gaussian peaks.
///
/// Parameters: `[N, x0, pe, mu, s0, s1]`. The number of photoelectrons is
/// Poisson(`mu`) distributed and peak `i` carries `N·e^{-mu}·mu^i/i!` events.
/// The sum is truncated after `peaks` terms, which must cover the range of
/// `mu` being fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoissonGauss {
    peaks: usize,
}

impl PoissonGauss {
    /// Creates a model summing `peaks` Poisson terms.
    #[must_use]
    pub fn new(peaks: usize) -> Self {
        Self { peaks }
    }

    /// Number of Poisson terms.
    #[must_use]
    pub fn peaks(&self) -> usize {
        self.peaks
    }
}

impl Default for PoissonGauss {
    fn default() -> Self {
        Self::new(7)
    }
}

impl SpectrumModel for PoissonGauss {
    fn name(&self) -> &'static str {
        "PoissonGauss"
    }

    fn kind(&self) -> SpectrumKind {
        SpectrumKind::PoissonGauss
    }

    fn n_params(&self) -> usize {
        6
    }

    fn predict_into(&self, params: &[f64], xs: &[f64], out: &mut [f64]) {
        debug_assert_eq!(params.len(), self.n_params());
        out.fill(0.0);
        let (norm, x0, pe, mu, s0, s1) = (
            params[0], params[1], params[2], params[3], params[4], params[5],
        );
        for i in 0..self.peaks {
            let k = i as f64;
            // powi(0) is 1 even for mu == 0
            let weight = mu.powi(i as i32) / factorial(i as u64);
            let mean = x0 + k * pe;
            let variance = s0 * s0 + k * s1 * s1;
            for (y, &x) in out.iter_mut().zip(xs) {
                *y += weight * gaussian(x, mean, variance);
            }
        }
        let scale = norm * (-mu).exp();
        for y in out.iter_mut() {
            *y *= scale;
        }
    }
}

/// Either spectrum model, selected at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Model {
    /// See [`MultiGaussian`].
    MultiGaussian(MultiGaussian),
    /// See [`PoissonGauss`].
    PoissonGauss(PoissonGauss),
}

impl From<MultiGaussian> for Model {
    fn from(model: MultiGaussian) -> Self {
        Self::MultiGaussian(model)
    }
}

impl From<PoissonGauss> for Model {
    fn from(model: PoissonGauss) -> Self {
        Self::PoissonGauss(model)
    }
}

impl Model {
    /// Number of peaks or Poisson terms.
    #[must_use]
    pub fn peaks(&self) -> usize {
        match self {
            Self::MultiGaussian(m) => m.peaks(),
            Self::PoissonGauss(m) => m.peaks(),
        }
    }
}

impl SpectrumModel for Model {
    fn name(&self) -> &'static str {
        match self {
            Self::MultiGaussian(m) => m.name(),
            Self::PoissonGauss(m) => m.name(),
        }
    }

    fn kind(&self) -> SpectrumKind {
        match self {
            Self::MultiGaussian(m) => m.kind(),
            Self::PoissonGauss(m) => m.kind(),
        }
    }

    fn n_params(&self) -> usize {
        match self {
            Self::MultiGaussian(m) => m.n_params(),
            Self::PoissonGauss(m) => m.n_params(),
        }
    }

    fn predict_into(&self, params: &[f64], xs: &[f64], out: &mut [f64]) {
        match self {
            Self::MultiGaussian(m) => m.predict_into(params, xs, out),
            Self::PoissonGauss(m) => m.predict_into(params, xs, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn axis(lo: i32, hi: i32) -> Vec<f64> {
        (lo..=hi).map(f64::from).collect()
    }

    #[test]
    fn test_multi_gaussian_zero_populations() {
        let model = MultiGaussian::new(4);
        let ps = [0.5, 15.0, 2.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let ys = model.evaluate(&ps, &axis(-20, 80)).unwrap();
        assert!(ys.iter().all(|&y| y == 0.0));
    }

    #[test]
    fn test_multi_gaussian_peak_height() {
        let model = MultiGaussian::new(2);
        let ps = [0.0, 15.0, 2.0, 1.0, 100.0, 50.0];
        let ys = model.evaluate(&ps, &[0.0, 15.0]).unwrap();
        // Peak 1 has variance 4 + 1 = 5; the neighbour's tail is negligible.
        assert_relative_eq!(ys[0], 100.0 / (2.0 * PI * 4.0).sqrt(), max_relative = 1e-6);
        assert_relative_eq!(ys[1], 50.0 / (2.0 * PI * 5.0).sqrt(), max_relative = 1e-6);
    }

    #[test]
    fn test_multi_gaussian_area_is_total_population() {
        let model = MultiGaussian::new(3);
        let ps = [0.0, 15.0, 2.0, 1.5, 700.0, 200.0, 100.0];
        let area: f64 = model.evaluate(&ps, &axis(-30, 100)).unwrap().iter().sum();
        assert_relative_eq!(area, 1000.0, max_relative = 1e-9);
    }

    #[test]
    fn test_poisson_gauss_area_approaches_scale() {
        let model = PoissonGauss::new(30);
        let ps = [25_000.0, 0.0, 15.0, 2.0, 2.0, 1.0];
        let area: f64 = model.evaluate(&ps, &axis(-50, 1000)).unwrap().iter().sum();
        assert_relative_eq!(area, 25_000.0, max_relative = 1e-6);
    }

    #[test]
    fn test_poisson_gauss_truncation_loses_area() {
        let ps = [10_000.0, 0.0, 15.0, 3.0, 2.0, 1.0];
        let xs = axis(-50, 1000);
        let short: f64 = PoissonGauss::new(2).evaluate(&ps, &xs).unwrap().iter().sum();
        let long: f64 = PoissonGauss::new(30).evaluate(&ps, &xs).unwrap().iter().sum();
        assert!(short < long);
        // Only the 0 and 1 photoelectron terms survive: e^-3 (1 + 3)
        assert_relative_eq!(short, 10_000.0 * (-3.0_f64).exp() * 4.0, max_relative = 1e-6);
    }

    #[test]
    fn test_poisson_gauss_zero_mean_is_pedestal_only() {
        let model = PoissonGauss::default();
        let ps = [1000.0, 0.0, 20.0, 0.0, 3.0, 2.0];
        let ys = model.evaluate(&ps, &[0.0, 20.0]).unwrap();
        assert_relative_eq!(ys[0], 1000.0 / (2.0 * PI * 9.0).sqrt(), max_relative = 1e-9);
        assert!(ys[1] < 1e-6);
        assert!(ys.iter().all(|y| y.is_finite()));
    }

    #[test]
    fn test_parameter_count_checked() {
        let err = PoissonGauss::default().evaluate(&[1.0; 5], &[0.0]).unwrap_err();
        assert_eq!(
            err,
            FitError::ParameterCount {
                expected: 6,
                found: 5
            }
        );
        assert_eq!(Model::from(MultiGaussian::new(3)).n_params(), 7);
        assert_eq!(Model::from(PoissonGauss::default()).kind(), SpectrumKind::PoissonGauss);
    }
}
