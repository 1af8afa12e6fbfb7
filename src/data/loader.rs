use std::path::Path;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Float64Type, Int64Type, TimeUnit, TimestampMicrosecondType,
};
use calamine::{Data, Reader};
use encoding_rs::Encoding;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::dates;
use super::encoding;
use super::model::{Table, Value};
use super::schema::{ColumnType, TableLayout};
use crate::error::LoadError;

/// Cell texts read as missing values.
const NA_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "null", "NULL", "None", "#N/A", "#NA", "<NA>",
];

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];
const SNIFF_LINES: usize = 20;

/// Input formats recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Delimited,
    Spreadsheet,
    Parquet,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<SourceKind> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(SourceKind::Delimited),
            "xlsx" | "xlsm" | "xls" | "ods" => Some(SourceKind::Spreadsheet),
            "parquet" | "pq" => Some(SourceKind::Parquet),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load one input file, typed by `layout` and restricted to its column selection.
/// Dispatch by extension; `Ok(None)` means the extension is not supported.
///
/// Supported formats:
/// * `.csv`                          – delimiter sniffed, encoding detected
/// * `.xlsx` / `.xlsm` / `.xls` / `.ods` – first worksheet, first row is the header
/// * `.parquet` / `.pq`              – Arrow-typed columns
pub fn load_file(path: &Path, layout: &TableLayout) -> Result<Option<Table>> {
    let name = display_name(path);
    let Some(kind) = SourceKind::from_path(path) else {
        log::info!("{name} will not be processed because it isn't a csv, spreadsheet or parquet file");
        return Ok(None);
    };

    // Spreadsheets and parquet carry their own text encoding.
    let raw = match kind {
        SourceKind::Delimited => {
            let bytes = std::fs::read(path).with_context(|| format!("reading {name}"))?;
            let encoding = encoding::detect_encoding(&bytes);
            log::debug!("{name}: detected encoding {}", encoding.name());
            read_delimited(&bytes, encoding, &name)?
        }
        SourceKind::Spreadsheet => read_spreadsheet(path)?,
        SourceKind::Parquet => read_parquet(path)?,
    };

    apply_layout(raw, layout, &name).map(Some)
}

/// File name used in log lines.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// Schema application
// ---------------------------------------------------------------------------

/// Restrict `raw` to the selected columns, coerce declared types, infer the
/// rest, and parse date columns.
pub fn apply_layout(raw: Table, layout: &TableLayout, name: &str) -> Result<Table> {
    let present: Vec<String> = layout
        .selection
        .iter()
        .filter(|c| raw.column_index(c).is_some())
        .cloned()
        .collect();
    if present.len() != layout.selection.len() {
        let missing: Vec<&String> = layout
            .selection
            .iter()
            .filter(|c| !present.contains(c))
            .collect();
        log::warn!("{name} hasn't such columns {missing:?}");
    }

    let mut table = raw.select(&present);
    for idx in 0..table.columns().len() {
        let column = table.columns()[idx].clone();
        if layout.date_columns.contains(&column) {
            let order = dates::parse_date_column(&mut table, idx)
                .with_context(|| format!("{name}: parsing date column {column:?}"))?;
            log::debug!("{name}: column {column:?} parsed as {order:?}");
            continue;
        }
        match layout.schema.get(&column) {
            Some(&ty) => coerce_column(&mut table, idx, ty)
                .with_context(|| format!("{name}: applying declared type {ty}"))?,
            None => infer_column(&mut table, idx),
        }
    }
    Ok(table)
}

fn coerce_column(table: &mut Table, idx: usize, ty: ColumnType) -> Result<(), LoadError> {
    let column = table.columns()[idx].clone();
    table.try_map_column(idx, |row, cell| {
        coerce(&cell, ty).ok_or_else(|| LoadError::Coerce {
            column: column.clone(),
            row,
            value: cell.to_string(),
            expected: ty.name(),
        })
    })
}

/// Convert one cell to `ty`; `None` if it cannot be represented.
pub fn coerce(cell: &Value, ty: ColumnType) -> Option<Value> {
    if cell.is_null() {
        return Some(Value::Null);
    }
    match ty {
        ColumnType::Integer => match cell {
            Value::Integer(i) => Some(Value::Integer(*i)),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(Value::Integer(*f as i64)),
            Value::String(s) => s.trim().parse().ok().map(Value::Integer),
            _ => None,
        },
        ColumnType::Float => match cell {
            Value::String(s) => s.trim().parse().ok().map(Value::Float),
            other => other.as_f64().map(Value::Float),
        },
        ColumnType::Bool => match cell {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Integer(0) => Some(Value::Bool(false)),
            Value::Integer(1) => Some(Value::Bool(true)),
            Value::String(s) => parse_bool(s, true).map(Value::Bool),
            _ => None,
        },
        ColumnType::Text => match cell {
            Value::String(s) => Some(Value::String(s.clone())),
            other => Some(Value::String(other.to_string())),
        },
    }
}

/// `true`/`false` in any case; with `numeric`, also `1`/`0`.
pub fn parse_bool(s: &str, numeric: bool) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") || (numeric && s == "1") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") || (numeric && s == "0") {
        Some(false)
    } else {
        None
    }
}

/// Type an undeclared column: integer, else float, else boolean, else text.
/// Columns holding dates (spreadsheet / parquet) stay dates.
fn infer_column(table: &mut Table, idx: usize) {
    let non_null: Vec<&Value> = table.column(idx).filter(|v| !v.is_null()).collect();
    if non_null.is_empty() || non_null.iter().all(|v| matches!(v, Value::Date(_))) {
        return;
    }

    let fits = |ty: ColumnType| non_null.iter().all(|v| coerce(v, ty).is_some());
    let ty = if fits(ColumnType::Integer) {
        ColumnType::Integer
    } else if fits(ColumnType::Float) {
        ColumnType::Float
    } else if non_null.iter().all(|v| match v {
        Value::Bool(_) => true,
        Value::String(s) => parse_bool(s, false).is_some(),
        _ => false,
    }) {
        ColumnType::Bool
    } else {
        ColumnType::Text
    };

    let cells: Vec<Value> = table
        .column(idx)
        .map(|v| coerce(v, ty).unwrap_or(Value::Null))
        .collect();
    table.set_column(idx, cells);
}

fn cell_from_text(s: &str) -> Value {
    if NA_TOKENS.contains(&s.trim()) {
        Value::Null
    } else {
        Value::String(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Delimited text loader
// ---------------------------------------------------------------------------

/// Header row with column names, delimiter sniffed from the first lines.
/// Every cell is read as text (or `Null`); typing happens in [`apply_layout`].
fn read_delimited(bytes: &[u8], encoding: &'static Encoding, name: &str) -> Result<Table> {
    let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
    if had_errors {
        log::warn!("{name}: some bytes are not valid {}, replaced with U+FFFD", encoding.name());
    }
    let delimiter = sniff_delimiter(&text);
    log::debug!("{name}: delimiter {:?}", delimiter as char);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut table = Table::new(headers.clone());
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let row = (0..headers.len())
            .map(|i| record.get(i).map(cell_from_text).unwrap_or(Value::Null))
            .collect();
        table.push_row(row);
    }
    Ok(table)
}

/// Pick the delimiter that splits the first lines into a consistent, non-zero
/// number of fields. Falls back to the most frequent candidate, then `,`.
pub fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();

    let mut best: Option<(bool, usize, u8)> = None;
    for candidate in DELIMITER_CANDIDATES {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| count_unquoted(line, candidate))
            .collect();
        let Some(&first) = counts.first() else {
            continue;
        };
        if first == 0 {
            continue;
        }
        let consistent = counts.iter().all(|&c| c == first);
        let score = (consistent, first);
        let better = match best {
            Some((c, n, _)) => score > (c, n),
            None => true,
        };
        if better {
            best = Some((consistent, first, candidate));
        }
    }
    best.map(|(_, _, d)| d).unwrap_or(b',')
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

// ---------------------------------------------------------------------------
// Spreadsheet loader
// ---------------------------------------------------------------------------

/// First worksheet; first row is the header. Cells keep their spreadsheet type.
fn read_spreadsheet(path: &Path) -> Result<Table> {
    let mut workbook = calamine::open_workbook_auto(path).context("opening workbook")?;
    let range = workbook
        .worksheet_range_at(0)
        .context("workbook has no worksheets")?
        .context("reading first worksheet")?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Table::default());
    };
    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell {
            Data::Empty => format!("Unnamed: {i}"),
            other => other.to_string(),
        })
        .collect();

    let mut table = Table::new(headers);
    for row in rows {
        table.push_row(row.iter().map(spreadsheet_cell).collect());
    }
    Ok(table)
}

fn spreadsheet_cell(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::Integer(*i),
        Data::Float(f) => Value::Float(*f),
        Data::String(s) => cell_from_text(s),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(Value::Date)
            .unwrap_or(Value::Float(dt.as_f64())),
        Data::DateTimeIso(s) => dates::parse_datetime_any(s)
            .map(Value::Date)
            .unwrap_or_else(|| Value::String(s.clone())),
        Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(_) | Data::Empty => Value::Null,
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load every record batch of a Parquet file. Works with files written by
/// Pandas (`df.to_parquet()`), Polars, or this tool's own writer.
fn read_parquet(path: &Path) -> Result<Table> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let headers: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut table = Table::new(headers);
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let columns: Vec<Vec<Value>> = batch
            .columns()
            .iter()
            .map(arrow_column_values)
            .collect::<Result<_>>()?;

        for row in 0..batch.num_rows() {
            table.push_row(columns.iter().map(|col| col[row].clone()).collect());
        }
    }
    Ok(table)
}

/// Convert a whole Arrow column to cells.
fn arrow_column_values(col: &ArrayRef) -> Result<Vec<Value>> {
    fn cells(col: &dyn Array, f: impl Fn(usize) -> Value) -> Vec<Value> {
        (0..col.len())
            .map(|i| if col.is_null(i) { Value::Null } else { f(i) })
            .collect()
    }

    let values = match col.data_type() {
        DataType::Utf8 => {
            let arr = col.as_string::<i32>();
            cells(arr, |i| cell_from_text(arr.value(i)))
        }
        DataType::LargeUtf8 => {
            let arr = col.as_string::<i64>();
            cells(arr, |i| cell_from_text(arr.value(i)))
        }
        DataType::Boolean => {
            let arr = col.as_boolean();
            cells(arr, |i| Value::Bool(arr.value(i)))
        }
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => {
            let cast = arrow::compute::cast(col, &DataType::Int64).context("casting to Int64")?;
            let arr = cast.as_primitive::<Int64Type>();
            cells(arr, |i| Value::Integer(arr.value(i)))
        }
        DataType::UInt64 | DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let cast =
                arrow::compute::cast(col, &DataType::Float64).context("casting to Float64")?;
            let arr = cast.as_primitive::<Float64Type>();
            cells(arr, |i| Value::Float(arr.value(i)))
        }
        DataType::Date32 => {
            let arr = col.as_primitive::<Date32Type>();
            cells(arr, |i| arr.value_as_datetime(i).map(Value::Date).unwrap_or(Value::Null))
        }
        DataType::Date64 => {
            let arr = col.as_primitive::<Date64Type>();
            cells(arr, |i| arr.value_as_datetime(i).map(Value::Date).unwrap_or(Value::Null))
        }
        DataType::Timestamp(_, _) => {
            let cast = arrow::compute::cast(col, &DataType::Timestamp(TimeUnit::Microsecond, None))
                .context("casting timestamp column")?;
            let arr = cast.as_primitive::<TimestampMicrosecondType>();
            cells(arr, |i| arr.value_as_datetime(i).map(Value::Date).unwrap_or(Value::Null))
        }
        other => match arrow::compute::cast(col, &DataType::Utf8) {
            Ok(cast) => {
                let arr = cast.as_string::<i32>();
                cells(arr, |i| Value::String(arr.value(i).to_string()))
            }
            Err(_) => {
                log::warn!("unsupported parquet column type {other:?}, read as nulls");
                vec![Value::Null; col.len()]
            }
        },
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::ColumnSchema;

    fn layout(schema: &[(&str, ColumnType)], dates: &[&str], selection: &[&str]) -> TableLayout {
        TableLayout {
            schema: schema
                .iter()
                .map(|(c, t)| (c.to_string(), *t))
                .collect::<ColumnSchema>(),
            date_columns: dates.iter().map(|s| s.to_string()).collect(),
            selection: selection.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn sniffs_semicolons_and_tabs() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3\n"), b';');
        assert_eq!(sniff_delimiter("a\tb\n1\t2\n"), b'\t');
        assert_eq!(sniff_delimiter("a,b\n\"1,5\",2\n"), b',');
        assert_eq!(sniff_delimiter("single\n"), b',');
    }

    #[test]
    fn quoted_delimiters_do_not_count() {
        // The comma only appears inside quotes, so it is not consistent.
        assert_eq!(sniff_delimiter("name;note\nA;\"x, y\"\nB;z\n"), b';');
    }

    #[test]
    fn delimited_text_is_typed_and_projected() {
        let text = "id;name;score;extra\n1;Ann;2.5;x\n2;Bob;NA;y\n";
        let raw = read_delimited(text.as_bytes(), encoding_rs::UTF_8, "t.csv").unwrap();
        let table = apply_layout(
            raw,
            &layout(&[("id", ColumnType::Integer)], &[], &["name", "id", "score", "missing"]),
            "t.csv",
        )
        .unwrap();

        assert_eq!(table.columns(), &["name".to_string(), "id".to_string(), "score".to_string()][..]);
        assert_eq!(
            table.rows()[0],
            vec![Value::String("Ann".into()), Value::Integer(1), Value::Float(2.5)]
        );
        assert_eq!(table.rows()[1][2], Value::Null);
    }

    #[test]
    fn legacy_encoded_csv_is_decoded() {
        let bytes = b"name,city\nJ\xFCrgen,K\xF6ln\n";
        let raw = read_delimited(bytes, encoding_rs::WINDOWS_1252, "t.csv").unwrap();
        assert_eq!(raw.rows()[0][0], Value::String("Jürgen".into()));
        assert_eq!(raw.rows()[0][1], Value::String("Köln".into()));
    }

    #[test]
    fn declared_type_violation_fails_the_file() {
        let raw = read_delimited(b"age\n12\ntwelve\n", encoding_rs::UTF_8, "t.csv").unwrap();
        let err = apply_layout(raw, &layout(&[("age", ColumnType::Integer)], &[], &["age"]), "t.csv")
            .unwrap_err();
        let root = err.root_cause().to_string();
        assert!(root.contains("twelve"), "{root}");
    }

    #[test]
    fn inference_prefers_integer_then_float_then_text() {
        let raw = read_delimited(b"a,b,c,d\n1,1,x,true\n2,2.5,3,False\n", encoding_rs::UTF_8, "t.csv")
            .unwrap();
        let table = apply_layout(raw, &layout(&[], &[], &["a", "b", "c", "d"]), "t.csv").unwrap();
        assert_eq!(
            table.rows()[1],
            vec![
                Value::Integer(2),
                Value::Float(2.5),
                Value::String("3".into()),
                Value::Bool(false)
            ]
        );
    }

    #[test]
    fn unsupported_extension_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        let loaded = load_file(&path, &layout(&[], &[], &["a"])).unwrap();
        assert!(loaded.is_none());
    }
}
