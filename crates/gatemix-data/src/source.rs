//! Restartable record sources.
//!
//! A [`RecordSource`] hands out cursors that always start from the first
//! record, which lets an infinite packer rewind by simply opening a new one.

use arrow::array::{Array as ArrowArray, LargeStringArray, StringArray};
use arrow::record_batch::RecordBatch;
use gatemix_core::{GatemixError, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// A record with named fields.
pub type Record = serde_json::Map<String, Value>;

/// A forward cursor over a source's records.
pub type RecordCursor<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// A sequence of records that can be read from the beginning any number of
/// times.
pub trait RecordSource {
    /// Open a cursor positioned at the first record.
    fn open(&self) -> Result<RecordCursor<'_>>;
}

/// Borrow the string value of `field`.
pub fn text_field<'a>(record: &'a Record, field: &str) -> Result<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatemixError::MissingField {
            field: field.to_string(),
        })
}

/// Build a record with a single text field.
pub fn text_record(field: &str, text: impl Into<String>) -> Record {
    let mut record = Record::new();
    record.insert(field.to_string(), Value::String(text.into()));
    record
}

impl RecordSource for [Record] {
    fn open(&self) -> Result<RecordCursor<'_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}

impl RecordSource for Vec<Record> {
    fn open(&self) -> Result<RecordCursor<'_>> {
        self.as_slice().open()
    }
}

/// JSON-lines file, reopened on every pass.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    /// Create a source over a JSONL file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for JsonlSource {
    fn open(&self) -> Result<RecordCursor<'_>> {
        let file = File::open(&self.path).map_err(|e| {
            GatemixError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open {}: {}", self.path.display(), e),
            ))
        })?;
        let path = self.path.display().to_string();

        let cursor = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(move |(line_num, line)| {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(GatemixError::Io(e))),
                };
                if line.trim().is_empty() {
                    return None;
                }
                Some(parse_record(&line).map_err(|e| {
                    GatemixError::Serialization(format!("{} line {}: {}", path, line_num + 1, e))
                }))
            });
        Ok(Box::new(cursor))
    }
}

fn parse_record(line: &str) -> std::result::Result<Record, String> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

/// Parquet file whose string columns become record fields.
///
/// Null cells are left out of the record.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    path: PathBuf,
}

impl ParquetSource {
    /// Create a source over a Parquet file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for ParquetSource {
    fn open(&self) -> Result<RecordCursor<'_>> {
        let file = File::open(&self.path).map_err(|e| {
            GatemixError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open Parquet file {}: {}", self.path.display(), e),
            ))
        })?;

        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .and_then(|builder| builder.build())
            .map_err(|e| {
                GatemixError::Serialization(format!("Failed to create Parquet reader: {e}"))
            })?;

        let cursor = reader.flat_map(|batch| match batch {
            Ok(batch) => batch_to_records(&batch).into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(GatemixError::Serialization(format!(
                "Failed to read Parquet batch: {e}"
            )))],
        });
        Ok(Box::new(cursor))
    }
}

/// A `Utf8` or `LargeUtf8` column.
#[derive(Clone, Copy)]
enum TextColumn<'a> {
    Utf8(&'a StringArray),
    LargeUtf8(&'a LargeStringArray),
}

impl<'a> TextColumn<'a> {
    fn from_array(array: &'a dyn ArrowArray) -> Option<Self> {
        let any = array.as_any();
        if let Some(array) = any.downcast_ref::<StringArray>() {
            return Some(Self::Utf8(array));
        }
        any.downcast_ref::<LargeStringArray>().map(Self::LargeUtf8)
    }

    fn value(&self, row: usize) -> Option<&'a str> {
        match *self {
            Self::Utf8(array) => (!array.is_null(row)).then(|| array.value(row)),
            Self::LargeUtf8(array) => (!array.is_null(row)).then(|| array.value(row)),
        }
    }
}

fn batch_to_records(batch: &RecordBatch) -> Vec<Record> {
    let schema = batch.schema();
    let columns: Vec<(&str, TextColumn<'_>)> = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .filter_map(|(field, column)| {
            TextColumn::from_array(column.as_ref()).map(|text| (field.name().as_str(), text))
        })
        .collect();

    (0..batch.num_rows())
        .map(|row| {
            let mut record = Record::new();
            for (name, column) in &columns {
                if let Some(text) = column.value(row) {
                    record.insert(name.to_string(), Value::String(text.to_string()));
                }
            }
            record
        })
        .collect()
}
