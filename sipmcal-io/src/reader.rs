//! Histogram table readers.
//!
//! The table is whitespace-separated text. The first data row holds the bin
//! centers after a leading column that is ignored; every further row holds a
//! sensor ID followed by one count per bin. Lines starting with `#` and blank
//! lines are skipped.

use crate::{Error, Result};
use memmap2::Mmap;
use sipmcal_core::{HistogramStore, SensorLayout};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Parses a histogram table into a store sized by `layout`.
///
/// # Errors
/// Returns an error for unreadable input, unparsable numbers, rows whose
/// length differs from the axis, invalid or repeated sensor IDs, and
/// histogram data rejected by [`HistogramStore`]. Parse errors carry the
/// 1-based line number.
pub fn read_histogram_table<R: BufRead>(reader: R, layout: &SensorLayout) -> Result<HistogramStore> {
    let mut xbins: Option<Vec<f64>> = None;
    let mut rows = Vec::new();
    let mut seen = HashSet::new();

    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let values = parse_numbers(trimmed, line_no)?;

        let Some(axis) = &xbins else {
            if values.len() < 2 {
                return Err(Error::parse(line_no, "axis row has no bins"));
            }
            xbins = Some(values[1..].to_vec());
            continue;
        };

        let sensor_id = parse_sensor_id(values[0], line_no)?;
        let index = layout
            .index_of(sensor_id)
            .map_err(|err| Error::parse(line_no, err.to_string()))?;
        let counts = &values[1..];
        if counts.len() != axis.len() {
            return Err(Error::parse(
                line_no,
                format!("expected {} counts, found {}", axis.len(), counts.len()),
            ));
        }
        if !seen.insert(index) {
            return Err(Error::parse(
                line_no,
                format!("sensor {sensor_id} (index {index}) appears twice"),
            ));
        }
        rows.push((index, counts.to_vec()));
    }

    let xbins = xbins.ok_or_else(|| Error::InvalidFormat("no axis row".into()))?;
    let store = HistogramStore::with_layout(xbins, rows, layout)?;
    log::info!(
        "loaded {} sensors with {} bins each",
        store.len(),
        store.nbins()
    );
    Ok(store)
}

fn parse_numbers(line: &str, line_no: usize) -> Result<Vec<f64>> {
    line.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| Error::parse(line_no, format!("invalid number '{token}'")))
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_sensor_id(value: f64, line_no: usize) -> Result<u32> {
    if value.fract() != 0.0 || value < 0.0 || value > f64::from(u32::MAX) {
        return Err(Error::parse(
            line_no,
            format!("sensor ID {value} is not a non-negative integer"),
        ));
    }
    Ok(value as u32)
}

/// A memory-mapped histogram table.
///
/// Uses memmap2 to read the table without copying it into memory first.
pub struct HistogramFileReader {
    mmap: Mmap,
    path: PathBuf,
    layout: SensorLayout,
}

impl HistogramFileReader {
    /// Opens a table for memory-mapped reading with the default layout.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
            layout: SensorLayout::default(),
        })
    }

    /// Sets the board layout used to map sensor IDs.
    #[must_use]
    pub fn with_layout(mut self, layout: SensorLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Parses the mapped table.
    ///
    /// # Errors
    /// See [`read_histogram_table`].
    pub fn read(&self) -> Result<HistogramStore> {
        log::debug!("parsing {}", self.path.display());
        read_histogram_table(&self.mmap[..], &self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
# sensor  bins
0     -1.0   0.0   1.0
1000   1     5     2
1005   0     7     1

1063   3     3     3
";

    #[test]
    fn test_read_table() {
        let store = read_histogram_table(TABLE.as_bytes(), &SensorLayout::default()).unwrap();
        assert_eq!(store.xbins(), &[-1.0, 0.0, 1.0]);
        assert_eq!(store.indexes(), vec![0, 5, 63]);
        assert_eq!(store.values(5), Some(&[0.0, 7.0, 1.0][..]));
        assert_eq!(store.capacity(), 28 * 64);
    }

    #[test]
    fn test_row_length_mismatch_reports_line() {
        let table = "0 0 1 2\n1001 1 2\n";
        let err = read_histogram_table(table.as_bytes(), &SensorLayout::default()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn test_invalid_tokens() {
        let layout = SensorLayout::default();
        let err = read_histogram_table("0 0 1\n1000 1 abc\n".as_bytes(), &layout).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));

        let err = read_histogram_table("0 0 1\n1000.5 1 1\n".as_bytes(), &layout).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));

        // In-board position past the board size
        let err = read_histogram_table("0 0 1\n1064 1 1\n".as_bytes(), &layout).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
    }

    #[test]
    fn test_duplicate_sensor() {
        let table = "0 0 1\n1000 1 1\n# comment\n0 2 2\n";
        let err = read_histogram_table(table.as_bytes(), &SensorLayout::default()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 4, .. }), "{err}");
    }

    #[test]
    fn test_missing_axis() {
        let err = read_histogram_table("# only a comment\n".as_bytes(), &SensorLayout::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_negative_count_rejected_by_store() {
        let err = read_histogram_table("0 0 1\n1000 1 -1\n".as_bytes(), &SensorLayout::default())
            .unwrap_err();
        assert!(matches!(err, Error::CoreError(_)));
    }
}
