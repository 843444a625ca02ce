//! sipmcal-io: Histogram table loading and result writing for sipmcal.
//!
//! Histogram tables are read through memory-mapped files via memmap2;
//! results are written as CSV or JSON.
//!

mod error;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use reader::{read_histogram_table, HistogramFileReader};
pub use writer::{ResultTableWriter, ESTIMATE_CSV_HEADER, RESULT_CSV_HEADER};
