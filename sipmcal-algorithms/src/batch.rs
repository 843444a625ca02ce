//! Batch fitting of many sensors with a shared model, bounds and window.

use crate::fitter::{BoundedFitter, Bounds, FitterConfig};
use crate::models::{Model, MultiGaussian, PoissonGauss, SpectrumModel};
use rayon::prelude::*;
use sipmcal_core::{FitError, FitResult, HistogramStore, Result, ResultTable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default fit window, `[-20, 120)`.
pub const DEFAULT_WINDOW: (f64, f64) = (-20.0, 120.0);

/// Model, starting point, bounds and x-window shared by every sensor of a batch.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitSpec {
    /// Spectrum model.
    pub model: Model,
    /// Starting parameters.
    pub initial: Vec<f64>,
    /// Parameter box.
    pub bounds: Bounds,
    /// Half-open x-range `[x0, x1)` of the bins that are fitted.
    pub window: (f64, f64),
}

impl FitSpec {
    /// Creates a [`FitSpec`] over the default window.
    ///
    /// # Errors
    /// Returns an error when `initial` or `bounds` do not match the model.
    pub fn new(
        model: impl Into<Model>,
        initial: Vec<f64>,
        bounds: Bounds,
    ) -> std::result::Result<Self, FitError> {
        let spec = Self {
            model: model.into(),
            initial,
            bounds,
            window: DEFAULT_WINDOW,
        };
        spec.check()?;
        Ok(spec)
    }

    fn check(&self) -> std::result::Result<(), FitError> {
        if self.model.peaks() == 0 {
            return Err(FitError::Config(format!(
                "{} needs at least one peak",
                self.model.name()
            )));
        }
        let n = self.model.n_params();
        if self.initial.len() != n {
            return Err(FitError::ParameterCount {
                expected: n,
                found: self.initial.len(),
            });
        }
        if self.bounds.len() != n {
            return Err(FitError::BoundsLength {
                expected: n,
                found: self.bounds.len(),
            });
        }
        Ok(())
    }

    /// Poisson-Gauss preset with 7 terms.
    #[must_use]
    pub fn poisson_gauss() -> Self {
        Self {
            model: PoissonGauss::default().into(),
            initial: vec![35_000.0, 0.0, 22.0, 1.0, 7.0, 7.0],
            bounds: Bounds::from_limits(
                vec![0.0, -10.0, 10.0, 0.0, 2.0, 2.0],
                vec![200_000.0, 10.0, 40.0, 2.0, 15.0, 15.0],
            ),
            window: DEFAULT_WINDOW,
        }
    }

    /// Multi-Gaussian preset with `peaks` free populations.
    #[must_use]
    pub fn multi_gaussian(peaks: usize) -> Self {
        let with_peaks = |head: [f64; 4], fill: f64| {
            let mut v = head.to_vec();
            v.resize(4 + peaks, fill);
            v
        };
        Self {
            model: MultiGaussian::new(peaks).into(),
            initial: with_peaks([0.0, 15.0, 2.0, 2.0], 10_000.0),
            bounds: Bounds::from_limits(
                with_peaks([-6.0, 12.0, 1.0, 1.0], 0.0),
                with_peaks([6.0, 40.0, 5.0, 5.0], 35_000.0),
            ),
            window: DEFAULT_WINDOW,
        }
    }

    /// Restrict fits to bins with `x0 <= x < x1`.
    #[must_use]
    pub fn with_window(mut self, x0: f64, x1: f64) -> Self {
        self.window = (x0, x1);
        self
    }

    /// Replace the starting point.
    #[must_use]
    pub fn with_initial(mut self, initial: Vec<f64>) -> Self {
        self.initial = initial;
        self
    }
}

/// Fits every requested sensor, in parallel.
///
/// `indexes` defaults to all sensors with data. The output holds exactly one
/// result per requested index, in request order. Sensors without data get a
/// [`FitResult::no_data`] result; fits that do not converge are logged and
/// returned as such.
///
/// # Errors
/// Returns an error for an invalid window, configuration or [`FitSpec`], before any
/// sensor is fitted.
pub fn fit_batch(
    store: &HistogramStore,
    indexes: Option<&[usize]>,
    spec: &FitSpec,
    config: &FitterConfig,
) -> Result<Vec<FitResult>> {
    config.validate()?;
    spec.check()?;
    let (lo, hi) = store.range_bounds(spec.window.0, spec.window.1)?;
    let xs = &store.xbins()[lo..hi];

    let requested = match indexes {
        Some(indexes) => indexes.to_vec(),
        None => store.indexes(),
    };
    log::info!(
        "fitting {} sensors with {} over {} bins",
        requested.len(),
        spec.model.name(),
        xs.len()
    );

    let fitter = BoundedFitter::new(config.clone());
    let results = requested
        .par_iter()
        .map(|&index| -> Result<FitResult> {
            let Some(values) = store.values(index) else {
                log::warn!("sensor {index}: no data");
                return Ok(FitResult::no_data(index, spec.initial.clone()));
            };
            let outcome =
                fitter.fit(&spec.model, &spec.initial, &spec.bounds, xs, &values[lo..hi])?;
            if outcome.converged {
                log::debug!(
                    "sensor {index}: chi2 {:.3} after {} iterations",
                    outcome.chi2,
                    outcome.iterations
                );
            } else {
                log::warn!("sensor {index}: fit did not converge ({})", outcome.status);
            }
            Ok(outcome.into_result(index))
        })
        .collect::<Result<Vec<_>>>()?;

    let converged = results.iter().filter(|r| r.converged).count();
    log::info!("{converged}/{} fits converged", results.len());
    Ok(results)
}

/// Runs [`fit_batch`] and tabulates the calibration constants.
///
/// # Errors
/// Propagates [`fit_batch`] errors.
pub fn fit_table(
    store: &HistogramStore,
    indexes: Option<&[usize]>,
    spec: &FitSpec,
    config: &FitterConfig,
) -> Result<ResultTable> {
    let results = fit_batch(store, indexes, spec, config)?;
    ResultTable::from_fit_results(spec.model.kind(), &results)
}
