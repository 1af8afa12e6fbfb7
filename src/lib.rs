//! Batch filter for delimited, spreadsheet, and parquet files.
//!
//! Per-column predicates are read from plain-text files in an input
//! directory, applied to every selected file on a worker pool, and the
//! filtered rows are concatenated into one result.

pub mod app;
pub mod batch;
pub mod config;
pub mod data;
pub mod error;
pub mod ui;
