use chrono::{DateTime, NaiveDate};
use polars::prelude::*;
use rayon::prelude::*;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::domain::TVError;
use crate::value::{Row, Value};

// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    CSV,
    PARQUET,
    ARROW,
    JSON,
}

#[derive(Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub file_size: u64,
    pub file_type: FileType,
}

pub fn detect_file_type(path: &Path) -> Result<FileType, TVError> {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
        .as_deref()
    {
        Some("CSV") => Ok(FileType::CSV),
        Some("PARQUET") | Some("PQ") => Ok(FileType::PARQUET),
        Some("ARROW") | Some("IPC") | Some("FEATHER") => Ok(FileType::ARROW),
        Some("JSON") => Ok(FileType::JSON),
        _ => Err(TVError::UnknownFileType),
    }
}

pub fn get_file_info(path: PathBuf) -> Result<FileInfo, TVError> {
    let metadata = fs::metadata(&path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => TVError::FileNotFound,
        ErrorKind::PermissionDenied => TVError::PermissionDenied,
        _ => TVError::IoError(e),
    })?;
    if !metadata.is_file() {
        return Err(TVError::LoadingFailed("Not a file!".into()));
    }

    let file_type = detect_file_type(&path)?;
    Ok(FileInfo {
        path,
        file_size: metadata.len(),
        file_type,
    })
}

/// Load a table file into a [`Dataset`] named after the file.
pub fn load_dataset(path: PathBuf) -> Result<Dataset, TVError> {
    let file_info = get_file_info(path)?;
    let start_time = Instant::now();

    let (columns, rows) = match file_info.file_type {
        FileType::CSV => load_frame(load_csv(&file_info.path)?)?,
        FileType::PARQUET => load_frame(load_parquet(&file_info.path)?)?,
        FileType::ARROW => load_frame(load_arrow(&file_info.path)?)?,
        FileType::JSON => load_json_rows(&fs::read_to_string(&file_info.path)?)?,
    };

    info!(
        "Loaded {} rows x {} columns ({} bytes) from {:?} in {}ms",
        rows.len(),
        columns.len(),
        file_info.file_size,
        file_info.path,
        start_time.elapsed().as_millis()
    );

    let name = file_info
        .path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("???")
        .to_string();
    Ok(Dataset::new(name, columns, rows))
}

fn load_csv(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyCsvReader::new(PlPath::Local(path.into()))
        .with_has_header(true)
        .with_try_parse_dates(true)
        .finish()
}

fn load_parquet(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_parquet(PlPath::Local(path.into()), ScanArgsParquet::default())
}

fn load_arrow(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_ipc(
        PlPath::Local(path.into()),
        polars::io::ipc::IpcScanOptions,
        UnifiedScanArgs::default(),
    )
}

/// Collect a frame and turn it into rows. Each column is converted on its own thread.
fn load_frame(frame: LazyFrame) -> Result<(Vec<String>, Vec<Row>), TVError> {
    let df = frame.collect()?;
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();

    let columns: Result<Vec<Vec<Value>>, PolarsError> = names
        .par_iter()
        .map(|name| load_column(&df, name))
        .collect();
    let columns = columns?;

    let mut rows: Vec<Row> = vec![Row::new(); df.height()];
    for (name, values) in names.iter().zip(columns) {
        for (row, value) in rows.iter_mut().zip(values) {
            row.insert(name.clone(), value);
        }
    }
    Ok((names, rows))
}

fn load_column(df: &DataFrame, name: &str) -> Result<Vec<Value>, PolarsError> {
    let column = df.column(name)?;
    debug!("Loading column {name} of type {}", column.dtype());
    let mut values = Vec::with_capacity(column.len());
    for idx in 0..column.len() {
        values.push(cell_value(&column.get(idx)?));
    }
    Ok(values)
}

/// Convert one polars cell, falling back to its display string for types without a
/// counterpart.
pub fn cell_value(av: &AnyValue) -> Value {
    any_value_to_value(av).unwrap_or_else(|e| {
        warn!("{e}, keeping it as text");
        Value::String(av.to_string())
    })
}

fn any_value_to_value(av: &AnyValue) -> Result<Value, TVError> {
    let value = match av {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(v) => Value::Number(*v as f64),
        AnyValue::Int16(v) => Value::Number(*v as f64),
        AnyValue::Int32(v) => Value::Number(*v as f64),
        AnyValue::Int64(v) => Value::Number(*v as f64),
        AnyValue::UInt8(v) => Value::Number(*v as f64),
        AnyValue::UInt16(v) => Value::Number(*v as f64),
        AnyValue::UInt32(v) => Value::Number(*v as f64),
        AnyValue::UInt64(v) => Value::Number(*v as f64),
        AnyValue::Float32(v) => Value::Number(*v as f64),
        AnyValue::Float64(v) => Value::Number(*v),
        AnyValue::Date(days) => NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
            .map(Value::from)
            .ok_or_else(|| TVError::LoadingFailed(format!("date out of range: {days}")))?,
        AnyValue::Datetime(v, unit, _) => {
            let dt = match unit {
                TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(*v)),
                TimeUnit::Microseconds => DateTime::from_timestamp_micros(*v),
                TimeUnit::Milliseconds => DateTime::from_timestamp_millis(*v),
            };
            dt.map(|d| Value::Date(d.naive_utc())).ok_or_else(|| {
                TVError::LoadingFailed(format!("datetime out of range: {v}"))
            })?
        }
        AnyValue::List(series) => {
            let mut items = Vec::with_capacity(series.len());
            for idx in 0..series.len() {
                items.push(cell_value(&series.get(idx)?));
            }
            Value::Sequence(items)
        }
        other => {
            return Err(TVError::LoadingFailed(format!(
                "unsupported cell type {}",
                other.dtype()
            )));
        }
    };
    Ok(value)
}

/// Rows from a JSON array of objects. Columns are listed in first-seen order.
pub fn load_json_rows(text: &str) -> Result<(Vec<String>, Vec<Row>), TVError> {
    let serde_json::Value::Array(items) = serde_json::from_str(text)? else {
        return Err(TVError::LoadingFailed(
            "expected a JSON array of row objects".into(),
        ));
    };

    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let serde_json::Value::Object(fields) = item else {
            return Err(TVError::LoadingFailed(format!(
                "row {idx} is not an object"
            )));
        };
        // Column order comes from the source objects, rows themselves are keyed maps
        for key in fields.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        let row: Row = fields
            .into_iter()
            .map(|(key, value)| (key, Value::from(value)))
            .collect();
        rows.push(row);
    }
    Ok((columns, rows))
}
