use super::Dataset;
use crate::error::{Error, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use ndarray::{Array1, Array2};
use std::{fs::File, io::BufReader, io::Read, path::Path};

pub const NUM_FEATURES: usize = 784;
pub const NUM_CLASSES: usize = 10;
const LINE_SIZE: usize = NUM_FEATURES + 1;
const GREYSCALE_SIZE: f64 = 255f64;

/// Parse a record in the dataset. Return the pixels and the label
/// Records are stored in the format: <label>,<pixel0x0>,<pixel0x1>,...
/// The dataset is taken from here https://pjreddie.com/projects/mnist-in-csv/
fn parse_dataset_line(record: &StringRecord) -> std::result::Result<(Vec<f64>, usize), String> {
    if record.len() != LINE_SIZE {
        return Err(format!(
            "expected {} fields, found {}",
            LINE_SIZE,
            record.len()
        ));
    }

    let label: usize = record[0]
        .parse()
        .map_err(|_| format!("label `{}` is not an integer", &record[0]))?;
    if label >= NUM_CLASSES {
        return Err(format!("label {} is outside 0..{}", label, NUM_CLASSES));
    }

    let mut pixels = Vec::with_capacity(NUM_FEATURES);
    for (idx, field) in record.iter().skip(1).enumerate() {
        let value: f64 = field
            .parse()
            .map_err(|_| format!("pixel {} `{}` is not a number", idx, field))?;
        if !(0f64..=GREYSCALE_SIZE).contains(&value) {
            return Err(format!("pixel {} value {} is outside 0..=255", idx, value));
        }
        // we divide by 255 to normalize
        pixels.push(value / GREYSCALE_SIZE);
    }

    Ok((pixels, label))
}

fn record_error(err: csv::Error) -> Error {
    let line = err.position().map(|p| p.line()).unwrap_or(0);

    if matches!(err.kind(), csv::ErrorKind::Utf8 { .. }) {
        Error::Format {
            line,
            message: "row is not valid UTF-8".to_string(),
        }
    } else {
        Error::Csv(err)
    }
}

/// Parse every row from `reader` into a dataset
pub fn parse_reader<R: Read>(reader: R) -> Result<Dataset> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let mut data = Vec::new();
    let mut target = Vec::new();

    for record in reader.records() {
        let record = record.map_err(record_error)?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let (pixels, label) =
            parse_dataset_line(&record).map_err(|message| Error::Format { line, message })?;

        data.extend(pixels);
        target.push(label);
    }

    let data = Array2::from_shape_vec((target.len(), NUM_FEATURES), data)
        .map_err(|e| Error::Shape(e.to_string()))?;

    Dataset::new(data, Array1::from(target))
}

/// Load the dataset stored at `path`
pub fn parse_dataset(path: impl AsRef<Path>) -> Result<Dataset> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let dataset = parse_reader(BufReader::new(file))?;

    tracing::debug!("loaded {} samples from {}", dataset.len(), path.display());

    Ok(dataset)
}
