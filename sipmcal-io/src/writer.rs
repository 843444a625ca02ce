//! Writers for calibration results.

use crate::Result;
use sipmcal_algorithms::QuickEstimate;
use sipmcal_core::ResultTable;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// CSV header of a result table.
pub const RESULT_CSV_HEADER: &str = "index,chi2,converged,total,pedestal,gain,pes,noise,noise_pe";
/// CSV header of a quick-estimate table.
pub const ESTIMATE_CSV_HEADER: &str = "index,noise,pes_zero_peak,pes_mean,gain";

/// Writer for calibration tables.
///
/// Writes result tables as CSV or JSON and quick estimates as CSV.
pub struct ResultTableWriter<W: Write = BufWriter<File>> {
    writer: W,
}

impl ResultTableWriter {
    /// Creates a new file writer.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }
}

impl<W: Write> ResultTableWriter<W> {
    /// Wraps an existing writer, e.g. stdout.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one row per sensor as CSV.
    pub fn write_csv(&mut self, table: &ResultTable) -> Result<()> {
        writeln!(self.writer, "{RESULT_CSV_HEADER}")?;

        for row in table.rows() {
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{},{}",
                row.index,
                row.chi2,
                row.converged,
                row.total,
                row.pedestal,
                row.gain,
                row.pes,
                row.noise,
                row.noise_pe
            )?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes the whole table, including its model kind, as JSON.
    pub fn write_json(&mut self, table: &ResultTable) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, table)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Writes quick estimates as CSV.
    pub fn write_estimates_csv(&mut self, estimates: &[QuickEstimate]) -> Result<()> {
        writeln!(self.writer, "{ESTIMATE_CSV_HEADER}")?;

        for e in estimates {
            writeln!(
                self.writer,
                "{},{},{},{},{}",
                e.index, e.noise, e.pes_zero_peak, e.pes_mean, e.gain
            )?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the underlying writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipmcal_core::SpectrumKind;
    use tempfile::NamedTempFile;

    fn table() -> ResultTable {
        ResultTable::from_poisson_gauss(
            &[3, 7],
            &[1.25, -1.0],
            &[
                vec![30000.0, 0.5, 21.0, 1.5, 6.0, 4.0],
                vec![35000.0, 0.0, 22.0, 1.0, 7.0, 7.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_write_csv() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = ResultTableWriter::create(file.path()).unwrap();

        writer.write_csv(&table()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RESULT_CSV_HEADER);
        assert_eq!(lines[1], "3,1.25,true,30000,0.5,21,1.5,6,4");
        assert_eq!(lines[2], "7,-1,false,35000,0,22,1,7,7");
    }

    #[test]
    fn test_write_json() {
        let mut writer = ResultTableWriter::new(Vec::new());
        writer.write_json(&table()).unwrap();

        let json = String::from_utf8(writer.into_inner()).unwrap();
        let parsed: ResultTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), SpectrumKind::PoissonGauss);
        assert_eq!(parsed, table());
    }

    #[test]
    fn test_write_estimates_csv() {
        let mut writer = ResultTableWriter::new(Vec::new());
        let estimates = [QuickEstimate {
            index: 4,
            noise: 2.0,
            pes_zero_peak: 0.5,
            pes_mean: 8.0,
            gain: 16.5,
        }];
        writer.write_estimates_csv(&estimates).unwrap();

        let content = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(content, format!("{ESTIMATE_CSV_HEADER}\n4,2,0.5,8,16.5\n"));
    }
}
