//! Calibration constants assembled from per-sensor fits.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::error::{Error, Result};
use crate::fit::{FitResult, SpectrumKind};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One sensor's calibration constants.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationRow {
    /// Sensor index.
    pub index: usize,
    /// Reduced chi-square (-1 when the fit failed).
    pub chi2: f64,
    /// Whether the fit converged.
    pub converged: bool,
    /// Total number of events described by the fit.
    pub total: f64,
    /// Zero-photoelectron peak position.
    pub pedestal: f64,
    /// Spacing between photoelectron peaks.
    pub gain: f64,
    /// Mean number of photoelectrons.
    pub pes: f64,
    /// Pedestal width.
    pub noise: f64,
    /// Width growth per photoelectron.
    pub noise_pe: f64,
}

/// Numeric column selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Chi2,
    Total,
    Pedestal,
    Gain,
    Pes,
    Noise,
    NoisePe,
}

impl CalibrationRow {
    /// Value of one column.
    #[must_use]
    pub fn get(&self, column: Column) -> f64 {
        match column {
            Column::Chi2 => self.chi2,
            Column::Total => self.total,
            Column::Pedestal => self.pedestal,
            Column::Gain => self.gain,
            Column::Pes => self.pes,
            Column::Noise => self.noise,
            Column::NoisePe => self.noise_pe,
        }
    }

    fn from_multi_gaussian(index: usize, chi2: f64, converged: bool, ps: &[f64]) -> Result<Self> {
        if ps.len() < 5 {
            return Err(Error::LengthMismatch(format!(
                "multi-gaussian parameters for sensor {index} need at least 5 values, got {}",
                ps.len()
            )));
        }
        let total: f64 = ps[4..].iter().sum();
        Ok(Self {
            index,
            chi2,
            converged,
            total,
            pedestal: ps[0],
            gain: ps[1],
            pes: -(ps[4] / total).ln(),
            noise: ps[2],
            noise_pe: ps[3],
        })
    }

    fn from_poisson_gauss(index: usize, chi2: f64, converged: bool, ps: &[f64]) -> Result<Self> {
        if ps.len() != 6 {
            return Err(Error::LengthMismatch(format!(
                "poisson-gauss parameters for sensor {index} need 6 values, got {}",
                ps.len()
            )));
        }
        Ok(Self {
            index,
            chi2,
            converged,
            total: ps[0],
            pedestal: ps[1],
            gain: ps[2],
            pes: ps[3],
            noise: ps[4],
            noise_pe: ps[5],
        })
    }
}

/// Table of calibration constants, one row per fitted sensor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResultTable {
    kind: SpectrumKind,
    rows: Vec<CalibrationRow>,
}

impl ResultTable {
    /// Builds a table from parallel arrays of a multi-Gaussian batch.
    ///
    /// The photoelectron yield is `-ln(n_0 / Σ n_i)`. A row counts as
    /// converged when its chi2 is not the -1 sentinel.
    ///
    /// # Errors
    /// Fails when the arrays differ in length or a parameter vector is too short.
    pub fn from_multi_gaussian(indexes: &[usize], chi2: &[f64], params: &[Vec<f64>]) -> Result<Self> {
        Self::from_arrays(SpectrumKind::MultiGaussian, indexes, chi2, params)
    }

    /// Builds a table from parallel arrays of a Poisson-Gauss batch.
    ///
    /// # Errors
    /// Fails when the arrays differ in length or a parameter vector is not 6 long.
    pub fn from_poisson_gauss(indexes: &[usize], chi2: &[f64], params: &[Vec<f64>]) -> Result<Self> {
        Self::from_arrays(SpectrumKind::PoissonGauss, indexes, chi2, params)
    }

    /// Builds a table from batch fit results.
    ///
    /// # Errors
    /// Fails when a parameter vector does not fit the model layout.
    pub fn from_fit_results(kind: SpectrumKind, results: &[FitResult]) -> Result<Self> {
        let rows = results
            .iter()
            .map(|r| make_row(kind, r.index, r.chi2, r.converged, &r.parameters))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { kind, rows })
    }

    fn from_arrays(
        kind: SpectrumKind,
        indexes: &[usize],
        chi2: &[f64],
        params: &[Vec<f64>],
    ) -> Result<Self> {
        if indexes.len() != chi2.len() || indexes.len() != params.len() {
            return Err(Error::LengthMismatch(format!(
                "{} indexes, {} chi2 values, {} parameter vectors",
                indexes.len(),
                chi2.len(),
                params.len()
            )));
        }
        let rows = indexes
            .iter()
            .zip(chi2)
            .zip(params)
            .map(|((&index, &c), ps)| make_row(kind, index, c, c >= 0.0, ps))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { kind, rows })
    }

    /// Model the table was built from.
    #[must_use]
    pub fn kind(&self) -> SpectrumKind {
        self.kind
    }

    /// All rows in batch order.
    #[must_use]
    pub fn rows(&self) -> &[CalibrationRow] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row of one sensor.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CalibrationRow> {
        self.rows.iter().find(|row| row.index == index)
    }

    /// Rows whose fit converged.
    pub fn converged(&self) -> impl Iterator<Item = &CalibrationRow> {
        self.rows.iter().filter(|row| row.converged)
    }

    /// One column across all rows.
    #[must_use]
    pub fn column(&self, column: Column) -> Vec<f64> {
        self.rows.iter().map(|row| row.get(column)).collect()
    }

    /// Values at the `fraction` and `1 - fraction` quantiles of a column.
    ///
    /// NaN entries are ignored. Returns `None` when no value is left.
    #[must_use]
    pub fn percentile_range(&self, column: Column, fraction: f64) -> Option<(f64, f64)> {
        let mut values: Vec<f64> = self
            .rows
            .iter()
            .map(|row| row.get(column))
            .filter(|v| !v.is_nan())
            .collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let fraction = fraction.clamp(0.0, 1.0);
        let n = values.len() as f64;
        let last = values.len() - 1;
        let lo = ((fraction * n) as usize).min(last);
        let hi = (((1.0 - fraction) * n) as usize).min(last);
        Some((values[lo], values[hi]))
    }
}

fn make_row(
    kind: SpectrumKind,
    index: usize,
    chi2: f64,
    converged: bool,
    params: &[f64],
) -> Result<CalibrationRow> {
    match kind {
        SpectrumKind::MultiGaussian => CalibrationRow::from_multi_gaussian(index, chi2, converged, params),
        SpectrumKind::PoissonGauss => CalibrationRow::from_poisson_gauss(index, chi2, converged, params),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::FitStatus;
    use approx::assert_relative_eq;

    #[test]
    fn test_multi_gaussian_derived_columns() {
        let params = vec![
            vec![0.1, 15.0, 2.0, 1.5, 6000.0, 3000.0, 1000.0],
            vec![-0.2, 16.0, 2.5, 1.0, 5000.0, 5000.0, 0.0],
        ];
        let table = ResultTable::from_multi_gaussian(&[4, 9], &[1.2, -1.0], &params).unwrap();

        assert_eq!(table.len(), 2);
        let row = table.get(4).unwrap();
        assert_relative_eq!(row.total, 10_000.0);
        assert_relative_eq!(row.pes, -(0.6_f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(row.pedestal, 0.1);
        assert_relative_eq!(row.gain, 15.0);
        assert_relative_eq!(row.noise, 2.0);
        assert_relative_eq!(row.noise_pe, 1.5);
        assert!(row.converged);

        let row = table.get(9).unwrap();
        assert_relative_eq!(row.pes, std::f64::consts::LN_2, epsilon = 1e-12);
        assert!(!row.converged);
        assert_eq!(table.converged().count(), 1);
    }

    #[test]
    fn test_poisson_gauss_reads_mu() {
        let params = vec![vec![35_000.0, 0.5, 21.0, 1.3, 6.0, 4.0]];
        let table = ResultTable::from_poisson_gauss(&[100], &[0.9], &params).unwrap();
        let row = &table.rows()[0];
        assert_eq!(row.index, 100);
        assert_relative_eq!(row.total, 35_000.0);
        assert_relative_eq!(row.pedestal, 0.5);
        assert_relative_eq!(row.gain, 21.0);
        assert_relative_eq!(row.pes, 1.3);
        assert_relative_eq!(row.noise, 6.0);
        assert_relative_eq!(row.noise_pe, 4.0);
    }

    #[test]
    fn test_array_length_mismatch() {
        let result = ResultTable::from_poisson_gauss(&[1, 2], &[0.5], &[vec![0.0; 6]]);
        assert!(matches!(result, Err(Error::LengthMismatch(_))));

        let result = ResultTable::from_multi_gaussian(&[1], &[0.5], &[vec![0.0; 4]]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_fit_results_keeps_status() {
        let results = vec![
            FitResult {
                index: 3,
                parameters: vec![1000.0, 0.0, 20.0, 0.8, 5.0, 3.0],
                converged: true,
                chi2: 1.1,
                status: FitStatus::CostTolerance,
                iterations: 12,
            },
            FitResult::no_data(5, vec![35_000.0, 0.0, 22.0, 1.0, 7.0, 7.0]),
        ];
        let table = ResultTable::from_fit_results(SpectrumKind::PoissonGauss, &results).unwrap();
        assert_eq!(table.kind(), SpectrumKind::PoissonGauss);
        assert!(table.get(3).unwrap().converged);
        assert!(!table.get(5).unwrap().converged);
        assert_relative_eq!(table.get(5).unwrap().chi2, -1.0);
    }

    #[test]
    fn test_percentile_range() {
        let params: Vec<Vec<f64>> = (0..100)
            .map(|i| vec![1.0, 1.0, f64::from(i), 1.0, 1.0, 1.0])
            .collect();
        let indexes: Vec<usize> = (0..100).collect();
        let chi2 = vec![1.0; 100];
        let table = ResultTable::from_poisson_gauss(&indexes, &chi2, &params).unwrap();

        let (lo, hi) = table.percentile_range(Column::Gain, 0.01).unwrap();
        assert_relative_eq!(lo, 1.0);
        assert_relative_eq!(hi, 99.0);

        let (lo, hi) = table.percentile_range(Column::Gain, 0.0).unwrap();
        assert_relative_eq!(lo, 0.0);
        assert_relative_eq!(hi, 99.0);

        let empty = ResultTable::from_poisson_gauss(&[], &[], &[]).unwrap();
        assert!(empty.percentile_range(Column::Gain, 0.1).is_none());
    }
}
