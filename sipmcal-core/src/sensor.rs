//! Sensor ID ↔ index mapping for the tracking-plane board layout.
//!
//! Sensor IDs encode the board number in the thousands and the in-board
//! position in the remainder (board 1 sensor 5 is `1005`). The calibration
//! code works exclusively with dense zero-based indices.

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Board geometry used to translate sensor IDs into indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorLayout {
    /// Number of boards.
    pub boards: usize,
    /// Sensors on each board.
    pub sensors_per_board: usize,
    /// ID stride between consecutive boards.
    pub id_unit: u32,
}

impl Default for SensorLayout {
    fn default() -> Self {
        Self {
            boards: 28,
            sensors_per_board: 64,
            id_unit: 1000,
        }
    }
}

impl SensorLayout {
    /// Set the number of boards.
    #[must_use]
    pub fn with_boards(mut self, boards: usize) -> Self {
        self.boards = boards;
        self
    }

    /// Set the number of sensors per board.
    #[must_use]
    pub fn with_sensors_per_board(mut self, sensors: usize) -> Self {
        self.sensors_per_board = sensors;
        self
    }

    /// Total number of sensor slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.boards.saturating_mul(self.sensors_per_board)
    }

    /// Converts a sensor ID into its index.
    ///
    /// IDs below `id_unit` are taken to be indices already.
    ///
    /// # Errors
    /// Returns an error when `id_unit` is zero, the in-board position exceeds
    /// the board size or the resulting index lies outside the layout.
    pub fn index_of(&self, sensor_id: u32) -> Result<usize> {
        if self.id_unit == 0 {
            return Err(Error::ConfigError("id_unit must be positive".to_string()));
        }
        let index = if sensor_id < self.id_unit {
            sensor_id as usize
        } else {
            let board = (sensor_id / self.id_unit) as usize;
            let position = (sensor_id % self.id_unit) as usize;
            if position >= self.sensors_per_board {
                return Err(Error::InvalidSensorId(sensor_id));
            }
            (board - 1)
                .checked_mul(self.sensors_per_board)
                .and_then(|offset| offset.checked_add(position))
                .ok_or_else(|| Error::ConfigError(format!("index overflow for sensor {sensor_id}")))?
        };
        if index >= self.capacity() {
            return Err(Error::IndexOutOfRange {
                index,
                capacity: self.capacity(),
            });
        }
        Ok(index)
    }

    /// Converts an index back into the sensor ID.
    ///
    /// # Errors
    /// Returns an error when the index is outside the layout or its ID does
    /// not fit in a `u32`.
    pub fn sensor_id_of(&self, index: usize) -> Result<u32> {
        if index >= self.capacity() || self.sensors_per_board == 0 {
            return Err(Error::IndexOutOfRange {
                index,
                capacity: self.capacity(),
            });
        }
        let board = u32::try_from(index / self.sensors_per_board + 1)
            .map_err(|_| Error::ConfigError(format!("board number overflow for index {index}")))?;
        let position = u32::try_from(index % self.sensors_per_board)
            .map_err(|_| Error::ConfigError(format!("board position overflow for index {index}")))?;
        self.id_unit
            .checked_mul(board)
            .and_then(|id| id.checked_add(position))
            .ok_or_else(|| Error::ConfigError(format!("sensor ID overflow for index {index}")))
    }
}
