use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use rust_xlsxwriter::{Format, Workbook, XlsxError};

use super::model::{Table, Value};
use crate::error::OutputError;

/// Delimiter used for delimited output.
pub const CSV_DELIMITER: u8 = b';';
/// Rows per worksheet, header included.
const XLSX_MAX_ROWS: usize = 1_048_576;
const XLSX_DATE_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Output format, chosen by the destination's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Spreadsheet,
    Parquet,
    /// Anything else.
    Delimited,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> OutputFormat {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" => OutputFormat::Spreadsheet,
            "parquet" | "pq" => OutputFormat::Parquet,
            _ => OutputFormat::Delimited,
        }
    }
}

/// Check that `path` can be opened for writing before spending time on output.
pub fn probe_writable(path: &Path) -> Result<(), OutputError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map(drop)
        .map_err(|source| OutputError::Locked {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `table` in the format implied by `path`.
pub fn write_table(table: &Table, path: &Path) -> Result<OutputFormat, OutputError> {
    let format = OutputFormat::from_path(path);
    match format {
        OutputFormat::Spreadsheet => write_xlsx(table, path)?,
        OutputFormat::Parquet => write_parquet(table, path)?,
        OutputFormat::Delimited => write_csv(table, path)?,
    }
    Ok(format)
}

// ---------------------------------------------------------------------------
// Delimited text
// ---------------------------------------------------------------------------

/// `;`-delimited, UTF-16LE with a byte-order mark so spreadsheet programs
/// open non-ASCII text correctly. Nulls are empty fields.
pub fn write_csv(table: &Table, path: &Path) -> Result<(), OutputError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .from_writer(Vec::new());
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(Value::to_string))?;
    }
    let utf8 = writer.into_inner().map_err(|e| e.into_error())?;
    let text = String::from_utf8(utf8)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut bytes = Vec::with_capacity(2 + text.len() * 2);
    bytes.extend_from_slice(&[0xFF, 0xFE]);
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    std::fs::write(path, bytes).map_err(|source| OutputError::Locked {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Spreadsheet
// ---------------------------------------------------------------------------

/// One worksheet, header row first. Tables too tall for a worksheet fail with
/// [`OutputError::Spreadsheet`] before anything is written.
pub fn write_xlsx(table: &Table, path: &Path) -> Result<(), OutputError> {
    if table.len() + 1 > XLSX_MAX_ROWS {
        return Err(XlsxError::RowColumnLimitError.into());
    }

    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format(XLSX_DATE_FORMAT);
    let worksheet = workbook.add_worksheet();

    for (col, name) in table.columns().iter().enumerate() {
        let col = u16::try_from(col).map_err(|_| XlsxError::RowColumnLimitError)?;
        worksheet.write_string(0, col, name)?;
    }
    for (row_idx, row) in table.rows().iter().enumerate() {
        let xl_row = (row_idx + 1) as u32;
        for (col, value) in row.iter().enumerate() {
            let col = col as u16;
            match value {
                Value::Null => {}
                Value::String(s) => {
                    worksheet.write_string(xl_row, col, s)?;
                }
                Value::Integer(i) => {
                    worksheet.write_number(xl_row, col, *i as f64)?;
                }
                Value::Float(f) if f.is_finite() => {
                    worksheet.write_number(xl_row, col, *f)?;
                }
                Value::Float(_) => {}
                Value::Bool(b) => {
                    worksheet.write_boolean(xl_row, col, *b)?;
                }
                Value::Date(d) => {
                    worksheet.write_datetime_with_format(xl_row, col, d, &date_format)?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

/// Arrow type chosen for an output column from the values it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrowKind {
    Int64,
    Float64,
    Boolean,
    Timestamp,
    Utf8,
}

impl ArrowKind {
    fn of_column(table: &Table, idx: usize) -> ArrowKind {
        let mut values = table.column(idx).filter(|v| !v.is_null()).peekable();
        if values.peek().is_none() {
            return ArrowKind::Utf8;
        }
        let values: Vec<&Value> = values.collect();
        if values.iter().all(|v| matches!(v, Value::Integer(_))) {
            ArrowKind::Int64
        } else if values.iter().all(|v| v.as_f64().is_some()) {
            ArrowKind::Float64
        } else if values.iter().all(|v| matches!(v, Value::Bool(_))) {
            ArrowKind::Boolean
        } else if values.iter().all(|v| matches!(v, Value::Date(_))) {
            ArrowKind::Timestamp
        } else {
            ArrowKind::Utf8
        }
    }

    fn data_type(self) -> DataType {
        match self {
            ArrowKind::Int64 => DataType::Int64,
            ArrowKind::Float64 => DataType::Float64,
            ArrowKind::Boolean => DataType::Boolean,
            ArrowKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            ArrowKind::Utf8 => DataType::Utf8,
        }
    }

    fn build(self, table: &Table, idx: usize) -> ArrayRef {
        let cells = table.column(idx);
        match self {
            ArrowKind::Int64 => Arc::new(Int64Array::from(
                cells
                    .map(|v| match v {
                        Value::Integer(i) => Some(*i),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            ArrowKind::Float64 => Arc::new(Float64Array::from(
                cells.map(Value::as_f64).collect::<Vec<_>>(),
            )),
            ArrowKind::Boolean => Arc::new(BooleanArray::from(
                cells
                    .map(|v| match v {
                        Value::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            ArrowKind::Timestamp => Arc::new(TimestampMicrosecondArray::from(
                cells
                    .map(|v| match v {
                        Value::Date(d) => Some(d.and_utc().timestamp_micros()),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            ArrowKind::Utf8 => Arc::new(StringArray::from(
                cells
                    .map(|v| (!v.is_null()).then(|| v.to_string()))
                    .collect::<Vec<Option<String>>>(),
            )),
        }
    }
}

/// Single record batch; column types inferred per column.
pub fn write_parquet(table: &Table, path: &Path) -> Result<(), OutputError> {
    let kinds: Vec<ArrowKind> = (0..table.columns().len())
        .map(|idx| ArrowKind::of_column(table, idx))
        .collect();
    let schema = Arc::new(Schema::new(
        table
            .columns()
            .iter()
            .zip(&kinds)
            .map(|(name, kind)| Field::new(name, kind.data_type(), true))
            .collect::<Vec<_>>(),
    ));

    let file = std::fs::File::create(path).map_err(|source| OutputError::Locked {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;
    if !kinds.is_empty() {
        let arrays: Vec<ArrayRef> = kinds
            .iter()
            .enumerate()
            .map(|(idx, kind)| kind.build(table, idx))
            .collect();
        let batch = RecordBatch::try_new(schema, arrays)?;
        writer.write(&batch)?;
    }
    writer.close()?;
    Ok(())
}
