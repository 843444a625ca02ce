//! Bounded weighted nonlinear least squares.
//!
//! Minimizes `Σ r_j²` with `r_j = (y_j - f(p, x_j)) / (1 + sqrt(y_j))`, an
//! approximate Poisson weighting that stays finite for empty bins, subject
//! to `lower <= p <= upper`.
//!
//! The solver is Levenberg-Marquardt with Marquardt (diagonal) damping:
//! 1. Forward-difference Jacobian, with steps kept inside the box
//! 2. Parameters sitting on a bound whose gradient points outward are
//!    frozen for the step
//! 3. Trial points are projected back into the box
//! 4. Accepted steps lower the damping, rejected steps raise it
#![allow(
    clippy::cast_precision_loss,
    clippy::many_single_char_names,
    clippy::missing_errors_doc,
    clippy::similar_names
)]

use crate::models::SpectrumModel;
use nalgebra::{DMatrix, DVector};
use sipmcal_core::{FitError, FitResult, FitStatus, CHI2_NOT_CONVERGED};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Floor for the diagonal used to scale the damping term.
const DIAG_FLOOR: f64 = 1e-12;
/// Lower limit for the damping parameter.
const MIN_LAMBDA: f64 = 1e-15;

/// Configuration for the bounded fitter.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitterConfig {
    /// Maximum number of accepted or attempted iterations.
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit has converged.
    pub ftol: f64,
    /// Relative step size below which the fit has converged.
    pub xtol: f64,
    /// Projected gradient norm below which the fit has converged.
    pub gtol: f64,
    /// Initial damping parameter.
    pub initial_lambda: f64,
    /// Factor to increase damping after a rejected step.
    pub lambda_up: f64,
    /// Factor to decrease damping after an accepted step.
    pub lambda_down: f64,
    /// Damping above which the fit gives up.
    pub max_lambda: f64,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e16,
        }
    }
}

impl FitterConfig {
    /// Set the iteration budget.
    #[must_use]
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Set the cost, step and gradient tolerances.
    #[must_use]
    pub fn with_tolerances(mut self, ftol: f64, xtol: f64, gtol: f64) -> Self {
        self.ftol = ftol;
        self.xtol = xtol;
        self.gtol = gtol;
        self
    }

    /// Set the initial damping parameter.
    #[must_use]
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), FitError> {
        let positive = [
            ("initial_lambda", self.initial_lambda),
            ("lambda_up", self.lambda_up - 1.0),
            ("lambda_down", self.lambda_down),
            ("max_lambda", self.max_lambda),
        ];
        for (name, value) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(FitError::Config(format!("{name} out of range")));
            }
        }
        if self.lambda_down >= 1.0 {
            return Err(FitError::Config("lambda_down must be below 1".into()));
        }
        if self.ftol < 0.0 || self.xtol < 0.0 || self.gtol < 0.0 {
            return Err(FitError::Config("tolerances must be non-negative".into()));
        }
        Ok(())
    }
}

/// Per-parameter box constraints.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    /// Creates bounds from lower and upper limits.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, FitError> {
        if lower.len() != upper.len() {
            return Err(FitError::BoundsLength {
                expected: lower.len(),
                found: upper.len(),
            });
        }
        Ok(Self { lower, upper })
    }

    /// Bounds from limits known to have matching lengths.
    pub(crate) fn from_limits(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        debug_assert_eq!(lower.len(), upper.len());
        Self { lower, upper }
    }

    /// Bounds that do not restrict any of `n` parameters.
    #[must_use]
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    /// Lower limits.
    #[must_use]
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// Upper limits.
    #[must_use]
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Number of constrained parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Returns true if every parameter has `lower <= upper`.
    #[must_use]
    pub fn is_feasible(&self) -> bool {
        self.lower.iter().zip(&self.upper).all(|(lo, hi)| lo <= hi)
    }

    /// Projects `params` into the box.
    ///
    /// Parameters whose limits are crossed or NaN are left untouched.
    pub(crate) fn clamp(&self, params: &mut [f64]) {
        for ((p, &lo), &hi) in params.iter_mut().zip(&self.lower).zip(&self.upper) {
            if lo <= hi {
                *p = p.clamp(lo, hi);
            }
        }
    }
}

/// Result of a single bounded fit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitOutcome {
    /// Final parameter vector.
    pub parameters: Vec<f64>,
    /// Whether the fit converged.
    pub converged: bool,
    /// Reduced chi-square, -1 when not converged.
    pub chi2: f64,
    /// Sum of squared weighted residuals at `parameters`.
    pub cost: f64,
    /// Stopping reason.
    pub status: FitStatus,
    /// Iterations used.
    pub iterations: usize,
}

impl FitOutcome {
    fn stopped(parameters: Vec<f64>, status: FitStatus) -> Self {
        Self {
            parameters,
            converged: false,
            chi2: CHI2_NOT_CONVERGED,
            cost: f64::NAN,
            status,
            iterations: 0,
        }
    }

    /// Attaches a sensor index.
    #[must_use]
    pub fn into_result(self, index: usize) -> FitResult {
        FitResult {
            index,
            parameters: self.parameters,
            converged: self.converged,
            chi2: self.chi2,
            status: self.status,
            iterations: self.iterations,
        }
    }
}

/// Weighted residuals of one histogram against a model.
struct Residuals<'a, M: ?Sized> {
    model: &'a M,
    xs: &'a [f64],
    ys: &'a [f64],
    weights: Vec<f64>,
}

impl<'a, M: SpectrumModel + ?Sized> Residuals<'a, M> {
    fn new(model: &'a M, xs: &'a [f64], ys: &'a [f64]) -> Self {
        let weights = ys.iter().map(|&y| 1.0 / (1.0 + y.max(0.0).sqrt())).collect();
        Self {
            model,
            xs,
            ys,
            weights,
        }
    }

    fn eval(&self, params: &[f64], out: &mut [f64]) {
        self.model.predict_into(params, self.xs, out);
        for ((r, &y), &w) in out.iter_mut().zip(self.ys).zip(&self.weights) {
            *r = (y - *r) * w;
        }
    }

    fn eval_vector(&self, params: &[f64]) -> DVector<f64> {
        let mut r = DVector::zeros(self.xs.len());
        self.eval(params, r.as_mut_slice());
        r
    }

    /// Forward-difference Jacobian of the residuals at `params`.
    fn jacobian(&self, params: &[f64], r0: &DVector<f64>, bounds: &Bounds) -> DMatrix<f64> {
        let m = self.xs.len();
        let mut jac = DMatrix::zeros(m, params.len());
        let mut shifted = params.to_vec();
        let mut column = vec![0.0; m];
        let sqrt_eps = f64::EPSILON.sqrt();

        for k in 0..params.len() {
            let (lo, hi) = (bounds.lower[k], bounds.upper[k]);
            let p = params[k];
            let mut h = sqrt_eps * p.abs().max(1.0);
            if p + h > hi {
                // Step backwards, or into whichever side has more room
                h = if p - h >= lo {
                    -h
                } else if hi - p >= p - lo {
                    hi - p
                } else {
                    lo - p
                };
            }
            if h == 0.0 {
                continue;
            }

            shifted[k] = p + h;
            self.eval(&shifted, &mut column);
            shifted[k] = p;

            for (j, value) in jac.column_mut(k).iter_mut().enumerate() {
                *value = (column[j] - r0[j]) / h;
            }
        }
        jac
    }
}

/// Levenberg-Marquardt fitter with box constraints.
#[derive(Debug, Clone, Default)]
pub struct BoundedFitter {
    config: FitterConfig,
}

impl BoundedFitter {
    /// Create with custom configuration.
    #[must_use]
    pub fn new(config: FitterConfig) -> Self {
        Self { config }
    }

    /// Get current configuration.
    #[must_use]
    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    /// Fits `model` to `(xs, ys)` starting from `initial`.
    ///
    /// Infeasible bounds, too few samples and a non-finite starting cost are
    /// reported through the outcome's status rather than as errors. An
    /// initial guess outside the bounds is clamped into them.
    ///
    /// # Errors
    /// Returns an error when the parameter, bound or data lengths disagree,
    /// or the configuration is invalid.
    #[allow(clippy::too_many_lines)]
    pub fn fit<M: SpectrumModel + ?Sized>(
        &self,
        model: &M,
        initial: &[f64],
        bounds: &Bounds,
        xs: &[f64],
        ys: &[f64],
    ) -> Result<FitOutcome, FitError> {
        let n = model.n_params();
        if initial.len() != n {
            return Err(FitError::ParameterCount {
                expected: n,
                found: initial.len(),
            });
        }
        if bounds.len() != n {
            return Err(FitError::BoundsLength {
                expected: n,
                found: bounds.len(),
            });
        }
        if xs.len() != ys.len() {
            return Err(FitError::DataLength {
                xs: xs.len(),
                ys: ys.len(),
            });
        }
        self.config.validate()?;

        if !bounds.is_feasible() {
            return Ok(FitOutcome::stopped(initial.to_vec(), FitStatus::InfeasibleBounds));
        }
        let m = xs.len();
        if m <= n {
            return Ok(FitOutcome::stopped(initial.to_vec(), FitStatus::InsufficientData));
        }

        let cfg = &self.config;
        let problem = Residuals::new(model, xs, ys);
        let mut params = initial.to_vec();
        bounds.clamp(&mut params);

        let mut r = problem.eval_vector(&params);
        let mut cost = r.norm_squared();
        if !cost.is_finite() {
            let mut outcome = FitOutcome::stopped(params, FitStatus::NonFiniteResidual);
            outcome.cost = cost;
            return Ok(outcome);
        }

        let mut lambda = cfg.initial_lambda;
        let mut status = FitStatus::MaxIterations;
        let mut iterations = 0;

        'outer: while iterations < cfg.max_iterations {
            iterations += 1;
            if cost == 0.0 {
                status = FitStatus::ZeroResidual;
                break;
            }

            let jac = problem.jacobian(&params, &r, bounds);
            let jtj = jac.tr_mul(&jac);
            let grad = jac.tr_mul(&r);

            // Freeze parameters held against a bound by the gradient
            let free: Vec<usize> = (0..n)
                .filter(|&k| {
                    let (lo, hi) = (bounds.lower[k], bounds.upper[k]);
                    let blocked_low = params[k] <= lo && grad[k] > 0.0;
                    let blocked_high = params[k] >= hi && grad[k] < 0.0;
                    lo < hi && !blocked_low && !blocked_high
                })
                .collect();
            let projected_grad = free.iter().map(|&k| grad[k].abs()).fold(0.0, f64::max);
            if free.is_empty() || projected_grad <= cfg.gtol {
                status = FitStatus::GradientTolerance;
                break;
            }

            loop {
                let Some(delta) = solve_damped(&jtj, &grad, &free, lambda) else {
                    lambda *= cfg.lambda_up;
                    if lambda > cfg.max_lambda {
                        status = FitStatus::DampingOverflow;
                        break 'outer;
                    }
                    continue;
                };

                let mut trial = params.clone();
                for (a, &k) in free.iter().enumerate() {
                    trial[k] += delta[a];
                }
                bounds.clamp(&mut trial);

                let step = DVector::from_iterator(
                    n,
                    trial.iter().zip(&params).map(|(t, p)| t - p),
                );
                let step_norm = step.norm();
                let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
                let small_step = step_norm <= cfg.xtol * (cfg.xtol + param_norm);

                let r_trial = problem.eval_vector(&trial);
                let cost_trial = r_trial.norm_squared();

                if cost_trial.is_finite() && cost_trial < cost {
                    let actual = cost - cost_trial;
                    let predicted = -(2.0 * step.dot(&grad) + step.dot(&(&jtj * &step)));
                    let ratio = if predicted > 0.0 { actual / predicted } else { 0.0 };

                    log::trace!(
                        "{} iteration {iterations}: cost {cost:.6e} -> {cost_trial:.6e}, lambda {lambda:.1e}",
                        model.name()
                    );

                    let previous = cost;
                    params = trial;
                    r = r_trial;
                    cost = cost_trial;
                    lambda = (lambda * cfg.lambda_down).max(MIN_LAMBDA);

                    if actual <= cfg.ftol * previous && ratio > 0.25 {
                        status = FitStatus::CostTolerance;
                        break 'outer;
                    }
                    if small_step {
                        status = FitStatus::StepTolerance;
                        break 'outer;
                    }
                    continue 'outer;
                }

                // No improvement possible at this resolution
                if small_step {
                    status = FitStatus::StepTolerance;
                    break 'outer;
                }
                lambda *= cfg.lambda_up;
                if lambda > cfg.max_lambda {
                    status = FitStatus::DampingOverflow;
                    break 'outer;
                }
            }
        }

        let converged = status.is_success();
        let chi2 = if converged {
            cost / (m - n) as f64
        } else {
            CHI2_NOT_CONVERGED
        };

        Ok(FitOutcome {
            parameters: params,
            converged,
            chi2,
            cost,
            status,
            iterations,
        })
    }
}

/// Solves `(JᵀJ + λ·diag(JᵀJ)) δ = -Jᵀr` restricted to the free parameters.
fn solve_damped(
    jtj: &DMatrix<f64>,
    grad: &DVector<f64>,
    free: &[usize],
    lambda: f64,
) -> Option<DVector<f64>> {
    let nf = free.len();
    let mut lhs = DMatrix::zeros(nf, nf);
    let mut rhs = DVector::zeros(nf);
    for (a, &ka) in free.iter().enumerate() {
        rhs[a] = -grad[ka];
        for (b, &kb) in free.iter().enumerate() {
            lhs[(a, b)] = jtj[(ka, kb)];
        }
        lhs[(a, a)] += lambda * jtj[(ka, ka)].max(DIAG_FLOOR);
    }

    let delta = match lhs.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => lhs.lu().solve(&rhs)?,
    };
    delta.iter().all(|d| d.is_finite()).then_some(delta)
}
