//! Error types shared across the filter pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while reading the type-declaration file.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("reading schema file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line without the `column:type` separator.
    #[error("schema line {line_no} is not `column:type`: {line:?}")]
    Malformed { line_no: usize, line: String },

    #[error("schema line {line_no}: unknown type {token:?} for column {column:?}")]
    UnknownType {
        line_no: usize,
        column: String,
        token: String,
    },
}

/// Failure while assembling the run configuration from the input directory.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while compiling or applying a column's predicates.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A plain value could not be converted to the column's type.
    #[error("column {column:?}: cannot use {value:?} as {expected}")]
    Coerce {
        column: String,
        value: String,
        expected: &'static str,
    },

    /// A date comparison whose operand is not a calendar date (e.g. `>31.02.2020`).
    #[error("column {column:?}: {line:?} is not a valid date comparison")]
    InvalidDate { column: String, line: String },

    /// Comparison and plain lines mixed under the `reject` policy.
    #[error("column {column:?} mixes comparison lines with plain values {plain:?}")]
    MixedLines { column: String, plain: Vec<String> },
}

/// Typed failures raised while turning cells into declared types.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("column {column:?}, row {row}: cannot read {value:?} as {expected}")]
    Coerce {
        column: String,
        row: usize,
        value: String,
        expected: &'static str,
    },

    /// Neither month-first nor day-first ordering parsed the column.
    #[error("column {column:?}: {value:?} is not a date in month-first or day-first order")]
    DateParse { column: String, value: String },
}

/// Failure of the batch as a whole.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// A single file's result is larger than the configured hand-back budget.
    #[error(
        "{path}: filtered result has {cells} cells, over the limit of {limit}; \
         use a narrower filter or fewer files"
    )]
    Transport {
        path: PathBuf,
        cells: usize,
        limit: usize,
    },

    /// A file failed while `fail_fast` is set.
    #[error("{path}: {message}")]
    FileFailed { path: PathBuf, message: String },
}

/// Failure while writing the consolidated result.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The destination cannot be opened for writing (locked, read-only, a directory...).
    #[error("cannot write to {path}: {source}")]
    Locked {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("spreadsheet write failed: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet write failed: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("building arrow batch failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
