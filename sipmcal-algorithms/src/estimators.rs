//! Closed-form estimators of the calibration constants.
//!
//! These are non-iterative (apart from the 1-D gain search) and serve as
//! seeds and sanity checks for the full spectrum fits. Invalid estimates
//! are reported as out-of-domain sentinels, undefined ones as NaN.
#![allow(clippy::missing_errors_doc)]

use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::brent::BrentOpt;
use rayon::prelude::*;
use sipmcal_core::{Error, HistogramStore, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Zero-peak yield when `p0 > 1`.
pub const PES_INVALID: f64 = -0.1;
/// Zero-peak yield when the axis has no bin at `x >= 0`.
pub const PES_NO_PEDESTAL: f64 = -1.0;
/// LED yield when the visible fraction reaches 1.
pub const LED_PES_INVALID: f64 = -1.0;
/// A bin center closer to zero than this counts as centered on zero.
pub const ZERO_BIN_TOLERANCE: f64 = 1e-6;

/// Bounded search for the photoelectron period.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GainSearch {
    /// Smallest period considered.
    pub lower: f64,
    /// Largest period considered.
    pub upper: f64,
    /// Iteration budget of the Brent minimizer.
    pub max_iters: u64,
    /// Absolute tolerance on the period.
    pub tolerance: f64,
}

impl Default for GainSearch {
    fn default() -> Self {
        Self {
            lower: 12.0,
            upper: 30.0,
            max_iters: 500,
            tolerance: 1e-5,
        }
    }
}

impl GainSearch {
    /// Set the period search range.
    #[must_use]
    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Set the iteration budget.
    #[must_use]
    pub fn with_max_iters(mut self, iters: u64) -> Self {
        self.max_iters = iters;
        self
    }
}

/// Quick estimates for one sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QuickEstimate {
    /// Sensor index.
    pub index: usize,
    /// See [`noise`].
    pub noise: f64,
    /// See [`pes_zero_peak`].
    pub pes_zero_peak: f64,
    /// See [`pes_mean`].
    pub pes_mean: f64,
    /// See [`gain`].
    pub gain: f64,
}

/// RMS of the charge below zero, `sqrt(Σ x²y / Σ y)` over `x < 0`.
///
/// NaN when the negative region is empty.
#[must_use]
pub fn noise(xs: &[f64], ys: &[f64]) -> f64 {
    let (sum_x2y, sum_y) = xs
        .iter()
        .zip(ys)
        .take_while(|(&x, _)| x < 0.0)
        .fold((0.0, 0.0), |(sxy, sy), (&x, &y)| (sxy + x * x * y, sy + y));
    if sum_y == 0.0 {
        return f64::NAN;
    }
    (sum_x2y / sum_y).sqrt()
}

/// Probability of zero photoelectrons from the pedestal population.
///
/// The pedestal is assumed symmetric around zero, so the counts below zero
/// are doubled. The first bin at `x >= 0` is added once when it is centered
/// on zero and twice otherwise. Returns `None` when no bin lies at `x >= 0`.
#[must_use]
pub fn zero_peak_probability(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let ibin0 = xs.iter().position(|&x| x >= 0.0)?;
    let below: f64 = ys[..ibin0].iter().sum();
    let weight = if xs[ibin0].abs() < ZERO_BIN_TOLERANCE {
        1.0
    } else {
        2.0
    };
    let n = 2.0 * below + weight * ys[ibin0];
    let total: f64 = ys.iter().sum();
    Some(n / total)
}

/// Mean photoelectrons `-ln p0` from the zero-peak probability.
///
/// Returns [`PES_INVALID`] when `p0 > 1` and [`PES_NO_PEDESTAL`] when the
/// histogram has no bin at `x >= 0`.
#[must_use]
pub fn pes_zero_peak(xs: &[f64], ys: &[f64]) -> f64 {
    match zero_peak_probability(xs, ys) {
        None => PES_NO_PEDESTAL,
        Some(p0) if p0 > 1.0 => PES_INVALID,
        Some(p0) => -p0.ln(),
    }
}

/// Count-weighted mean charge. Equals the mean photoelectrons only for
/// zero pedestal and unit gain.
#[must_use]
pub fn pes_mean(xs: &[f64], ys: &[f64]) -> f64 {
    let (sum_xy, sum_y) = xs
        .iter()
        .zip(ys)
        .fold((0.0, 0.0), |(sxy, sy), (&x, &y)| (sxy + x * y, sy + y));
    sum_xy / sum_y
}

/// Count-weighted RMS distance between each bin and its nearest multiple
/// of `period`, over bins from the first positive multiple on.
///
/// Returns `f64::MAX` when no bin folds onto a positive multiple or those
/// bins are empty.
#[must_use]
pub fn period_rms(xs: &[f64], ys: &[f64], period: f64) -> f64 {
    let fold = |x: f64| (x / period).round() * period;
    let Some(start) = xs.iter().position(|&x| fold(x) > 0.0) else {
        return f64::MAX;
    };
    let (sum_d2y, sum_y) = xs[start..]
        .iter()
        .zip(&ys[start..])
        .fold((0.0, 0.0), |(sdy, sy), (&x, &y)| {
            let d = fold(x) - x;
            (sdy + d * d * y, sy + y)
        });
    if sum_y > 0.0 {
        (sum_d2y / sum_y).sqrt()
    } else {
        f64::MAX
    }
}

struct PeriodCost<'a> {
    xs: &'a [f64],
    ys: &'a [f64],
}

impl CostFunction for PeriodCost<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, period: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(period_rms(self.xs, self.ys, *period))
    }
}

/// Period minimizing [`period_rms`] within the search bounds.
///
/// Returns 0.0 when the minimizer does not converge.
#[must_use]
pub fn gain(xs: &[f64], ys: &[f64], search: &GainSearch) -> f64 {
    if search.lower.is_nan() || search.upper.is_nan() || search.lower >= search.upper || search.lower <= 0.0 {
        log::warn!(
            "gain search range [{}, {}] is not a positive interval",
            search.lower,
            search.upper
        );
        return 0.0;
    }

    let solver =
        BrentOpt::new(search.lower, search.upper).set_tolerance(f64::EPSILON.sqrt(), search.tolerance);
    let result = Executor::new(PeriodCost { xs, ys }, solver)
        .configure(|state| state.max_iters(search.max_iters))
        .run();

    let result = match result {
        Ok(result) => result,
        Err(err) => {
            log::warn!("gain search failed: {err}");
            return 0.0;
        }
    };

    let state = result.state();
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    match state.get_best_param() {
        Some(&period) if converged => period,
        _ => 0.0,
    }
}

/// Dark-current contribution removed from an LED histogram.
///
/// The dark histogram is scaled so that its population at `x <= 0` matches
/// the LED one, then subtracted. Without dark counts at `x <= 0` the scale
/// is undefined and the signal holds non-finite values.
#[must_use]
pub fn led_signal(xs: &[f64], dark: &[f64], led: &[f64]) -> Vec<f64> {
    let ibin0 = xs.iter().position(|&x| x > 0.0).unwrap_or(xs.len());
    let led_pedestal: f64 = led[..ibin0].iter().sum();
    let dark_pedestal: f64 = dark[..ibin0].iter().sum();
    let fraction = led_pedestal / dark_pedestal;
    led.iter()
        .zip(dark)
        .map(|(&l, &d)| l - fraction * d)
        .collect()
}

/// Mean photoelectrons `-ln(1 - fvis)` from the visible LED fraction.
///
/// Returns [`LED_PES_INVALID`] when `fvis >= 1` or `fvis` is not finite.
#[must_use]
pub fn led_pes(signal: &[f64], led: &[f64]) -> f64 {
    let visible = signal.iter().sum::<f64>() / led.iter().sum::<f64>();
    if !visible.is_finite() || visible >= 1.0 {
        return LED_PES_INVALID;
    }
    -(1.0 - visible).ln()
}

/// Resolves the requested sensors, defaulting to every sensor with data.
fn rows<'a>(store: &'a HistogramStore, indexes: Option<&[usize]>) -> Result<Vec<(usize, &'a [f64])>> {
    match indexes {
        Some(indexes) => indexes
            .iter()
            .map(|&index| store.try_values(index).map(|ys| (index, ys)))
            .collect(),
        None => Ok(store.iter().collect()),
    }
}

/// Noise of each sensor.
pub fn estimate_noise(store: &HistogramStore, indexes: Option<&[usize]>) -> Result<Vec<f64>> {
    let xs = store.xbins();
    Ok(rows(store, indexes)?
        .into_iter()
        .map(|(_, ys)| noise(xs, ys))
        .collect())
}

/// Zero-peak photoelectron yield of each sensor.
pub fn estimate_pes(store: &HistogramStore, indexes: Option<&[usize]>) -> Result<Vec<f64>> {
    let xs = store.xbins();
    Ok(rows(store, indexes)?
        .into_iter()
        .map(|(index, ys)| {
            let pes = pes_zero_peak(xs, ys);
            if pes < 0.0 {
                log::warn!("sensor {index}: no valid zero-peak estimate ({pes})");
            }
            pes
        })
        .collect())
}

/// Mean-charge photoelectron yield of each sensor.
pub fn estimate_pes_mean(store: &HistogramStore, indexes: Option<&[usize]>) -> Result<Vec<f64>> {
    let xs = store.xbins();
    Ok(rows(store, indexes)?
        .into_iter()
        .map(|(_, ys)| pes_mean(xs, ys))
        .collect())
}

/// Gain of each sensor, searched in parallel.
pub fn estimate_gain(
    store: &HistogramStore,
    indexes: Option<&[usize]>,
    search: &GainSearch,
) -> Result<Vec<f64>> {
    let xs = store.xbins();
    Ok(rows(store, indexes)?
        .par_iter()
        .map(|&(index, ys)| {
            let g = gain(xs, ys, search);
            if g == 0.0 {
                log::warn!("sensor {index}: gain search did not converge");
            }
            g
        })
        .collect())
}

/// All quick estimates of each sensor.
pub fn quick_estimates(
    store: &HistogramStore,
    indexes: Option<&[usize]>,
    search: &GainSearch,
) -> Result<Vec<QuickEstimate>> {
    let xs = store.xbins();
    let estimates: Vec<QuickEstimate> = rows(store, indexes)?
        .par_iter()
        .map(|&(index, ys)| QuickEstimate {
            index,
            noise: noise(xs, ys),
            pes_zero_peak: pes_zero_peak(xs, ys),
            pes_mean: pes_mean(xs, ys),
            gain: gain(xs, ys, search),
        })
        .collect();
    log::info!("quick estimates for {} sensors", estimates.len());
    Ok(estimates)
}

fn check_same_axis(dark: &HistogramStore, led: &HistogramStore) -> Result<()> {
    if dark.xbins() != led.xbins() {
        return Err(Error::AxisMismatch {
            left: dark.nbins(),
            right: led.nbins(),
        });
    }
    Ok(())
}

/// Background-subtracted LED signal of each sensor.
///
/// Sensors default to those with LED data; each must also have dark data.
pub fn estimate_led_signal(
    dark: &HistogramStore,
    led: &HistogramStore,
    indexes: Option<&[usize]>,
) -> Result<Vec<Vec<f64>>> {
    check_same_axis(dark, led)?;
    let xs = led.xbins();
    rows(led, indexes)?
        .into_iter()
        .map(|(index, led_ys)| Ok(led_signal(xs, dark.try_values(index)?, led_ys)))
        .collect()
}

/// LED photoelectron yield of each sensor.
pub fn estimate_led_pes(
    dark: &HistogramStore,
    led: &HistogramStore,
    indexes: Option<&[usize]>,
) -> Result<Vec<f64>> {
    check_same_axis(dark, led)?;
    let xs = led.xbins();
    rows(led, indexes)?
        .into_iter()
        .map(|(index, led_ys)| {
            let signal = led_signal(xs, dark.try_values(index)?, led_ys);
            let pes = led_pes(&signal, led_ys);
            if pes < 0.0 {
                log::warn!("sensor {index}: visible LED fraction out of range");
            }
            Ok(pes)
        })
        .collect()
}
