//! Per-sensor charge histograms sharing one x-axis.
//!
//! A `HistogramStore` holds the bin centers once and a sparse map from
//! sensor index to its row of counts. Sensors without a row have no data;
//! they are never represented by zero-filled placeholder rows.

use crate::error::{Error, Result};
use crate::sensor::SensorLayout;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Charge histograms of a calibration run, keyed by sensor index.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistogramStore {
    xbins: Vec<f64>,
    rows: BTreeMap<usize, Vec<f64>>,
    capacity: usize,
}

impl HistogramStore {
    /// Builds a store from `(index, counts)` rows.
    ///
    /// # Errors
    /// Fails on an empty or non-increasing axis, a row whose length differs
    /// from the axis, an index `>= capacity`, a repeated index, or a
    /// negative / non-finite count.
    pub fn from_rows<I>(xbins: Vec<f64>, rows: I, capacity: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, Vec<f64>)>,
    {
        validate_axis(&xbins)?;

        let mut map = BTreeMap::new();
        for (index, counts) in rows {
            if index >= capacity {
                return Err(Error::IndexOutOfRange { index, capacity });
            }
            if counts.len() != xbins.len() {
                return Err(Error::RowLengthMismatch {
                    index,
                    expected: xbins.len(),
                    found: counts.len(),
                });
            }
            if let Some((bin, &value)) = counts
                .iter()
                .enumerate()
                .find(|(_, v)| !v.is_finite() || **v < 0.0)
            {
                return Err(Error::InvalidCount { index, bin, value });
            }
            if map.insert(index, counts).is_some() {
                return Err(Error::DuplicateIndex(index));
            }
        }

        log::debug!(
            "histogram store: {} bins, {} sensors with data",
            xbins.len(),
            map.len()
        );

        Ok(Self {
            xbins,
            rows: map,
            capacity,
        })
    }

    /// Builds a store from parallel `indexes` / `values` arrays.
    ///
    /// # Errors
    /// Fails when the two arrays differ in length, or for any reason
    /// listed in [`HistogramStore::from_rows`].
    pub fn from_parallel(
        xbins: Vec<f64>,
        indexes: &[usize],
        values: Vec<Vec<f64>>,
        capacity: usize,
    ) -> Result<Self> {
        if indexes.len() != values.len() {
            return Err(Error::LengthMismatch(format!(
                "{} indexes but {} histogram rows",
                indexes.len(),
                values.len()
            )));
        }
        Self::from_rows(xbins, indexes.iter().copied().zip(values), capacity)
    }

    /// Builds a store sized for the given board layout.
    ///
    /// # Errors
    /// See [`HistogramStore::from_rows`].
    pub fn with_layout<I>(xbins: Vec<f64>, rows: I, layout: &SensorLayout) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, Vec<f64>)>,
    {
        Self::from_rows(xbins, rows, layout.capacity())
    }

    /// Bin centers shared by all sensors.
    #[must_use]
    pub fn xbins(&self) -> &[f64] {
        &self.xbins
    }

    /// Number of bins per histogram.
    #[must_use]
    pub fn nbins(&self) -> usize {
        self.xbins.len()
    }

    /// Number of sensor slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of sensors with data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no sensor has data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Indices of the sensors with data, ascending.
    #[must_use]
    pub fn indexes(&self) -> Vec<usize> {
        self.rows.keys().copied().collect()
    }

    /// Returns true if the sensor has data.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.rows.contains_key(&index)
    }

    /// Counts of one sensor, `None` when it has no data.
    #[must_use]
    pub fn values(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(&index).map(Vec::as_slice)
    }

    /// Counts of one sensor, failing when it has no data.
    ///
    /// # Errors
    /// Returns [`Error::MissingSensor`] for sensors without data.
    pub fn try_values(&self, index: usize) -> Result<&[f64]> {
        self.values(index).ok_or(Error::MissingSensor(index))
    }

    /// Iterates over `(index, counts)` in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f64])> {
        self.rows.iter().map(|(&i, v)| (i, v.as_slice()))
    }

    /// Returns the bins with `x0 <= x < x1` and the matching counts.
    ///
    /// The range is clamped to the axis, so a window wider than the
    /// histogram returns everything.
    ///
    /// # Errors
    /// Fails when `x0 > x1` or the sensor has no data.
    pub fn values_in_range(&self, index: usize, x0: f64, x1: f64) -> Result<(&[f64], &[f64])> {
        let (i0, i1) = self.range_bounds(x0, x1)?;
        let ys = self.try_values(index)?;
        Ok((&self.xbins[i0..i1], &ys[i0..i1]))
    }

    /// Bin index range `[i0, i1)` covering `x0 <= x < x1`.
    ///
    /// # Errors
    /// Fails when `x0 > x1` or either edge is NaN.
    pub fn range_bounds(&self, x0: f64, x1: f64) -> Result<(usize, usize)> {
        if x0.is_nan() || x1.is_nan() || x0 > x1 {
            return Err(Error::InvalidRange { x0, x1 });
        }
        let i0 = self.xbins.partition_point(|&x| x < x0);
        let i1 = self.xbins.partition_point(|&x| x < x1);
        Ok((i0, i1))
    }
}

fn validate_axis(xbins: &[f64]) -> Result<()> {
    if xbins.is_empty() {
        return Err(Error::EmptyAxis);
    }
    if let Some(bin) = xbins.iter().position(|x| !x.is_finite()) {
        return Err(Error::InvalidAxis(bin));
    }
    if let Some(pair) = xbins.windows(2).position(|w| w[1] <= w[0]) {
        return Err(Error::InvalidAxis(pair + 1));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp, clippy::cast_precision_loss)]
    use super::*;

    fn axis() -> Vec<f64> {
        (-5..=10).map(f64::from).collect()
    }

    fn store() -> HistogramStore {
        let x = axis();
        let row_a: Vec<f64> = (0..x.len()).map(|i| i as f64).collect();
        let row_b = vec![1.0; x.len()];
        HistogramStore::from_rows(x, vec![(7, row_a), (3, row_b)], 16).unwrap()
    }

    #[test]
    fn test_rows_match_axis_length() {
        let store = store();
        for index in store.indexes() {
            assert_eq!(store.values(index).unwrap().len(), store.nbins());
        }
        assert_eq!(store.indexes(), vec![3, 7]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_absent_sensor_has_no_data() {
        let store = store();
        assert!(store.values(0).is_none());
        assert!(!store.contains(0));
        assert!(matches!(store.try_values(0), Err(Error::MissingSensor(0))));
    }

    #[test]
    fn test_row_length_mismatch_is_fatal() {
        let err = HistogramStore::from_rows(axis(), vec![(1, vec![0.0; 3])], 16).unwrap_err();
        assert!(matches!(
            err,
            Error::RowLengthMismatch {
                index: 1,
                expected: 16,
                found: 3
            }
        ));
    }

    #[test]
    fn test_index_out_of_range_is_fatal() {
        let err = HistogramStore::from_rows(axis(), vec![(16, vec![0.0; 16])], 16).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 16, .. }));
    }

    #[test]
    fn test_duplicate_and_negative_rows_rejected() {
        let dup = HistogramStore::from_rows(
            axis(),
            vec![(2, vec![0.0; 16]), (2, vec![1.0; 16])],
            16,
        );
        assert!(matches!(dup, Err(Error::DuplicateIndex(2))));

        let mut row = vec![0.0; 16];
        row[4] = -1.0;
        let neg = HistogramStore::from_rows(axis(), vec![(2, row)], 16);
        assert!(matches!(neg, Err(Error::InvalidCount { bin: 4, .. })));
    }

    #[test]
    fn test_axis_must_increase() {
        assert!(matches!(
            HistogramStore::from_rows(vec![], Vec::new(), 4),
            Err(Error::EmptyAxis)
        ));
        assert!(matches!(
            HistogramStore::from_rows(vec![0.0, 1.0, 1.0], Vec::new(), 4),
            Err(Error::InvalidAxis(2))
        ));
    }

    #[test]
    fn test_from_parallel_length_mismatch() {
        let result = HistogramStore::from_parallel(axis(), &[0, 1], vec![vec![0.0; 16]], 16);
        assert!(matches!(result, Err(Error::LengthMismatch(_))));
    }

    #[test]
    fn test_values_in_range() {
        let store = store();
        let (xs, ys) = store.values_in_range(7, -2.0, 3.0).unwrap();
        assert_eq!(xs, &[-2.0, -1.0, 0.0, 1.0, 2.0]);
        assert_eq!(ys, &[3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(xs.iter().all(|&x| (-2.0..=3.0).contains(&x)));
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_values_in_range_clamps_to_axis() {
        let store = store();
        let (xs, ys) = store.values_in_range(3, -20.0, 120.0).unwrap();
        assert_eq!(xs.len(), 16);
        assert_eq!(ys.len(), 16);

        let (xs, _) = store.values_in_range(3, 50.0, 60.0).unwrap();
        assert!(xs.is_empty());
    }

    #[test]
    fn test_values_in_range_between_bins() {
        let store = store();
        let (xs, _) = store.values_in_range(3, -1.5, 1.5).unwrap();
        assert_eq!(xs, &[-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_invalid_range() {
        let store = store();
        assert!(matches!(
            store.values_in_range(3, 2.0, 1.0),
            Err(Error::InvalidRange { .. })
        ));
        assert!(store.values_in_range(0, 0.0, 1.0).is_err());
    }
}
