use sipmcal_algorithms::{fit_table, FitSpec, FitterConfig, MultiGaussian, SpectrumModel};
use sipmcal_core::SensorLayout;
use sipmcal_io::{HistogramFileReader, ResultTableWriter, RESULT_CSV_HEADER};
use std::fmt::Write as _;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_table(file: &mut NamedTempFile) {
    let xs: Vec<f64> = (-2..=30).map(f64::from).collect();
    let mut text = String::from("# charge histograms\n0");
    for x in &xs {
        write!(text, " {x}").unwrap();
    }
    text.push('\n');

    let model = MultiGaussian::new(2);
    for (sensor_id, pe) in [(1000, 15.0), (1001, 16.0), (2003, 15.5)] {
        let ys = model
            .evaluate(&[0.0, pe, 1.5, 1.0, 6000.0, 4000.0], &xs)
            .unwrap();
        write!(text, "{sensor_id}").unwrap();
        for y in ys {
            write!(text, " {}", y.round()).unwrap();
        }
        text.push('\n');
    }
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
}

#[test]
fn test_load_fit_and_write() {
    let mut input = NamedTempFile::new().unwrap();
    write_table(&mut input);

    let reader = HistogramFileReader::open(input.path())
        .unwrap()
        .with_layout(SensorLayout::default().with_boards(4));
    assert!(!reader.is_empty());
    let store = reader.read().unwrap();
    assert_eq!(store.indexes(), vec![0, 1, 67]);
    assert_eq!(store.capacity(), 256);

    let table = fit_table(
        &store,
        None,
        &FitSpec::multi_gaussian(2),
        &FitterConfig::default(),
    )
    .unwrap();
    let gain = table.get(67).unwrap().gain;
    assert!((gain - 15.5).abs() < 0.5, "gain {gain}");

    let output = NamedTempFile::new().unwrap();
    let mut writer = ResultTableWriter::create(output.path()).unwrap();
    writer.write_csv(&table).unwrap();

    let content = std::fs::read_to_string(output.path()).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some(RESULT_CSV_HEADER));
    let indexes: Vec<&str> = lines
        .map(|line| line.split(',').next().unwrap())
        .collect();
    assert_eq!(indexes, vec!["0", "1", "67"]);
}

#[test]
fn test_layout_too_small_is_an_error() {
    let mut input = NamedTempFile::new().unwrap();
    write_table(&mut input);

    let reader = HistogramFileReader::open(input.path())
        .unwrap()
        .with_layout(SensorLayout::default().with_boards(1));
    assert!(reader.read().is_err());
}
