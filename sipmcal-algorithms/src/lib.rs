//! sipmcal-algorithms: Spectrum fitting for SiPM calibration.
//!
//! This crate provides:
//! - **Quick estimators** - noise, photoelectron yield and gain without a fit
//! - **Spectrum models** - multi-Gaussian and Poisson-Gauss charge spectra
//! - **Bounded fitter** - Levenberg-Marquardt with box constraints
//! - **Batch fitting** - parallel per-sensor fits with preset specs
//!
#![warn(missing_docs)]

mod batch;
pub mod estimators;
mod fitter;
mod models;

pub use batch::{fit_batch, fit_table, FitSpec, DEFAULT_WINDOW};
pub use estimators::{
    estimate_gain, estimate_led_pes, estimate_led_signal, estimate_noise, estimate_pes,
    estimate_pes_mean, quick_estimates, GainSearch, QuickEstimate,
};
pub use fitter::{BoundedFitter, Bounds, FitOutcome, FitterConfig};
pub use models::{Model, MultiGaussian, PoissonGauss, SpectrumModel};

// Re-export core result types
pub use sipmcal_core::{FitResult, FitStatus, SpectrumKind};
