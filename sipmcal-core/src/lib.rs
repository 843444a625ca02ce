//! sipmcal-core: Core types for SiPM charge-spectrum calibration.
//!
//! This crate provides the per-sensor histogram store, the sensor ID
//! layout, fit results, and the calibration result table.
//!

pub mod error;
pub mod fit;
pub mod histogram;
pub mod sensor;
pub mod table;

pub use error::{Error, FitError, Result};
pub use fit::{FitResult, FitStatus, SpectrumKind, CHI2_NOT_CONVERGED};
pub use histogram::HistogramStore;
pub use sensor::SensorLayout;
pub use table::{CalibrationRow, Column, ResultTable};
