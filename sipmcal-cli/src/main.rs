//! sipmcal CLI
//!
//! Loads SiPM charge histograms, computes quick estimates and fits the
//! calibration constants of every sensor.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use log::LevelFilter;
use sipmcal_algorithms::{
    estimate_led_pes, fit_table, quick_estimates, FitSpec, FitterConfig, GainSearch, PoissonGauss,
};
use sipmcal_core::{Column, HistogramStore, SensorLayout};
use sipmcal_io::{HistogramFileReader, ResultTableWriter};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    SipmcalIo(#[from] sipmcal_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] sipmcal_core::Error),
}

/// Spectrum model selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    /// Poisson-weighted Gaussian peaks: [N, x0, pe, mu, s0, s1]
    PoissonGauss,
    /// Gaussian peaks with free populations: [x0, pe, s0, s1, n0, n1, ...]
    MultiGauss,
}

/// Calibration constants from SiPM charge spectra.
#[derive(Parser)]
#[command(name = "sipmcal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Board layout used to map sensor IDs onto indices.
#[derive(Args, Debug, Clone, Copy)]
struct LayoutArgs {
    /// Number of sensor boards
    #[arg(long, default_value = "28")]
    boards: usize,

    /// Sensors on each board
    #[arg(long, default_value = "64")]
    sensors_per_board: usize,
}

impl LayoutArgs {
    fn layout(self) -> SensorLayout {
        SensorLayout::default()
            .with_boards(self.boards)
            .with_sensors_per_board(self.sensors_per_board)
    }
}

/// Sensor selection; everything with data when empty.
#[derive(Args, Debug, Clone)]
struct SelectionArgs {
    /// Sensor indices to process (comma-separated)
    #[arg(long = "index", value_delimiter = ',')]
    indexes: Vec<usize>,

    /// Sensor IDs to process (comma-separated, e.g. 1005,2010)
    #[arg(long = "sensor", value_delimiter = ',')]
    sensors: Vec<u32>,
}

impl SelectionArgs {
    fn resolve(&self, layout: &SensorLayout) -> Result<Option<Vec<usize>>> {
        if self.indexes.is_empty() && self.sensors.is_empty() {
            return Ok(None);
        }
        let mut indexes = self.indexes.clone();
        for &id in &self.sensors {
            indexes.push(layout.index_of(id)?);
        }
        Ok(Some(indexes))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a histogram table
    Info {
        /// Input histogram table
        input: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,
    },

    /// Compute quick estimates (noise, photoelectrons, gain) per sensor
    Estimate {
        /// Input histogram table
        input: PathBuf,

        /// Smallest gain considered by the period search
        #[arg(long, default_value = "12.0")]
        gain_min: f64,

        /// Largest gain considered by the period search
        #[arg(long, default_value = "30.0")]
        gain_max: f64,

        /// Output CSV file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        layout: LayoutArgs,
    },

    /// Fit a spectrum model to every sensor
    Fit {
        /// Input histogram table
        input: PathBuf,

        /// Output file path (.csv or .json)
        #[arg(short, long)]
        output: PathBuf,

        /// Spectrum model to fit
        #[arg(short, long, value_enum, default_value = "poisson-gauss")]
        model: ModelArg,

        /// Number of peaks (multi-gauss) or Poisson terms (poisson-gauss)
        #[arg(long)]
        peaks: Option<usize>,

        /// Lower edge of the fit window
        #[arg(long, default_value = "-20.0", allow_negative_numbers = true)]
        x_min: f64,

        /// Upper edge of the fit window (exclusive)
        #[arg(long, default_value = "120.0", allow_negative_numbers = true)]
        x_max: f64,

        /// Iteration budget per fit
        #[arg(long, default_value = "200")]
        max_iterations: usize,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        layout: LayoutArgs,
    },

    /// Estimate photoelectrons from a dark/LED histogram pair
    Led {
        /// Dark-run histogram table
        #[arg(long)]
        dark: PathBuf,

        /// LED-run histogram table
        #[arg(long)]
        led: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        layout: LayoutArgs,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn load(path: &Path, layout: &SensorLayout) -> Result<HistogramStore> {
    let reader = HistogramFileReader::open(path)?.with_layout(*layout);
    Ok(reader.read()?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Info { input, layout } => {
            let reader = HistogramFileReader::open(&input)?.with_layout(layout.layout());
            let file_size = reader.len();
            let store = reader.read()?;

            println!("File: {}", input.display());
            println!(
                "Size: {} bytes ({:.2} MB)",
                file_size,
                file_size as f64 / 1_000_000.0
            );
            println!("Sensors: {} of {}", store.len(), store.capacity());
            println!("Bins: {}", store.nbins());

            let xs = store.xbins();
            if let (Some(first), Some(last)) = (xs.first(), xs.last()) {
                println!("X range: {} - {}", first, last);
            }
            let indexes = store.indexes();
            if let (Some(first), Some(last)) = (indexes.first(), indexes.last()) {
                println!("Index range: {} - {}", first, last);
            }
        }

        Commands::Estimate {
            input,
            gain_min,
            gain_max,
            output,
            selection,
            layout,
        } => {
            let layout = layout.layout();
            let store = load(&input, &layout)?;
            let indexes = selection.resolve(&layout)?;
            let search = GainSearch::default().with_bounds(gain_min, gain_max);

            let start = Instant::now();
            let estimates = quick_estimates(&store, indexes.as_deref(), &search)?;
            log::info!(
                "estimated {} sensors in {:.2}s",
                estimates.len(),
                start.elapsed().as_secs_f64()
            );

            match output {
                Some(path) => ResultTableWriter::create(path)?.write_estimates_csv(&estimates)?,
                None => ResultTableWriter::new(io::stdout().lock()).write_estimates_csv(&estimates)?,
            }
        }

        Commands::Fit {
            input,
            output,
            model,
            peaks,
            x_min,
            x_max,
            max_iterations,
            selection,
            layout,
        } => {
            let layout = layout.layout();
            let store = load(&input, &layout)?;
            let indexes = selection.resolve(&layout)?;

            let spec = match model {
                ModelArg::PoissonGauss => {
                    let mut spec = FitSpec::poisson_gauss();
                    if let Some(peaks) = peaks {
                        spec.model = PoissonGauss::new(peaks).into();
                    }
                    spec
                }
                ModelArg::MultiGauss => FitSpec::multi_gaussian(peaks.unwrap_or(5)),
            }
            .with_window(x_min, x_max);
            let config = FitterConfig::default().with_max_iterations(max_iterations);

            let start = Instant::now();
            let table = fit_table(&store, indexes.as_deref(), &spec, &config)?;
            let elapsed = start.elapsed();

            let mut writer = ResultTableWriter::create(&output)?;
            let output_format = output
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or_else(|| "csv".to_string(), |ext| ext.to_lowercase());
            match output_format.as_str() {
                "json" => writer.write_json(&table)?,
                "csv" => writer.write_csv(&table)?,
                other => {
                    log::warn!("Unknown extension '{}', defaulting to CSV", other);
                    writer.write_csv(&table)?;
                }
            }

            println!(
                "Fitted {} sensors in {:.2}s ({} converged)",
                table.len(),
                elapsed.as_secs_f64(),
                table.converged().count()
            );
            for (column, name) in [(Column::Gain, "Gain"), (Column::Pes, "Pes")] {
                if let Some((lo, hi)) = table.percentile_range(column, 0.05) {
                    println!("{} 5-95%: {:.3} - {:.3}", name, lo, hi);
                }
            }
            println!("Wrote {}", output.display());
        }

        Commands::Led {
            dark,
            led,
            selection,
            layout,
        } => {
            let layout = layout.layout();
            let dark = load(&dark, &layout)?;
            let led = load(&led, &layout)?;
            let indexes = match selection.resolve(&layout)? {
                Some(indexes) => indexes,
                None => led.indexes(),
            };

            let pes = estimate_led_pes(&dark, &led, Some(&indexes))?;
            let mut out = io::stdout().lock();
            writeln!(out, "index,pes")?;
            for (index, value) in indexes.iter().zip(&pes) {
                writeln!(out, "{},{}", index, value)?;
            }
        }
    }

    Ok(())
}
