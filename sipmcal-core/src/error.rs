//! Error types for sipmcal-core.

use thiserror::Error;

/// Result type alias for sipmcal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for calibration data handling.
#[derive(Error, Debug)]
pub enum Error {
    /// The shared x-axis has no bins.
    #[error("histogram axis is empty")]
    EmptyAxis,

    /// The shared x-axis is not strictly increasing or holds a non-finite value.
    #[error("histogram axis is not strictly increasing and finite at bin {0}")]
    InvalidAxis(usize),

    /// A sensor row does not have one count per bin.
    #[error("row for sensor {index} has {found} bins, expected {expected}")]
    RowLengthMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    /// Sensor index outside the configured capacity.
    #[error("sensor index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: usize, capacity: usize },

    /// The same sensor index was supplied twice.
    #[error("duplicate row for sensor index {0}")]
    DuplicateIndex(usize),

    /// Negative or non-finite histogram count.
    #[error("invalid count {value} for sensor {index} at bin {bin}")]
    InvalidCount { index: usize, bin: usize, value: f64 },

    /// Two stores that must share bin centers do not.
    #[error("histogram axes differ ({left} vs {right} bins)")]
    AxisMismatch { left: usize, right: usize },

    /// No histogram was loaded for the requested sensor.
    #[error("no histogram data for sensor index {0}")]
    MissingSensor(usize),

    /// Lower edge above upper edge.
    #[error("invalid x-range [{x0}, {x1})")]
    InvalidRange { x0: f64, x1: f64 },

    /// Sensor ID that does not map onto the board layout.
    #[error("invalid sensor ID {0}")]
    InvalidSensorId(u32),

    /// Parallel inputs of different lengths.
    #[error("length mismatch: {0}")]
    LengthMismatch(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Fitting error.
    #[error("fit error: {0}")]
    Fit(#[from] FitError),
}

/// Errors raised before a fit starts.
///
/// A fit that runs and fails to converge is not an error; it is reported
/// through [`crate::FitStatus`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Parameter vector does not match the model.
    #[error("model expects {expected} parameters, got {found}")]
    ParameterCount { expected: usize, found: usize },

    /// Bound vectors do not match the parameter vector.
    #[error("bounds have length {found}, expected {expected}")]
    BoundsLength { expected: usize, found: usize },

    /// x and y arrays differ in length.
    #[error("x/y length mismatch: {xs} vs {ys}")]
    DataLength { xs: usize, ys: usize },

    /// Invalid fitter configuration.
    #[error("invalid fit configuration: {0}")]
    Config(String),
}
