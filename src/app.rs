use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::batch::{self, FileReport};
use crate::config::{EngineOptions, FilterConfig};
use crate::data::model::Table;
use crate::data::writer::{self, OutputFormat};
use crate::error::{BatchError, OutputError};

// ---------------------------------------------------------------------------
// Operator – the person (or script) driving a run
// ---------------------------------------------------------------------------

/// Which destinations the operator may choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRequest {
    /// Spreadsheet, parquet, or delimited.
    Any,
    /// Delimited text only, after a spreadsheet write failed.
    DelimitedOnly,
}

/// Something the operator should be told.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NoInputs,
    ConfigFailed { message: String },
    TransportFailed { message: String },
    BatchFailed { message: String },
    FilesFailed { files: Vec<(PathBuf, String)> },
    EmptyResult,
    ChooseOutput { rows: usize },
    DestinationLocked { path: PathBuf, message: String },
    SpreadsheetFallback { message: String },
    WriteFailed { path: PathBuf, message: String },
    Saved { path: PathBuf, rows: usize },
    Discarded,
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Notice::NoInputs => "No files",
            Notice::ConfigFailed { .. } => "Filter files error",
            Notice::TransportFailed { .. } => "Memory Error",
            Notice::BatchFailed { .. } => "Processing error",
            Notice::FilesFailed { .. } => "Some files failed",
            Notice::EmptyResult => "Empty result",
            Notice::ChooseOutput { .. } => "Completed",
            Notice::DestinationLocked { .. } => "Permission Error",
            Notice::SpreadsheetFallback { .. } => "Memory Error",
            Notice::WriteFailed { .. } => "Write Error",
            Notice::Saved { .. } => "Completed",
            Notice::Discarded => "Not saved",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::ConfigFailed { .. }
                | Notice::TransportFailed { .. }
                | Notice::BatchFailed { .. }
                | Notice::FilesFailed { .. }
                | Notice::DestinationLocked { .. }
                | Notice::SpreadsheetFallback { .. }
                | Notice::WriteFailed { .. }
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NoInputs => write!(f, "No files were selected, nothing to do."),
            Notice::ConfigFailed { message } => {
                write!(f, "The filter files could not be read: {message}")
            }
            Notice::TransportFailed { message } => write!(
                f,
                "{message}. Your filter retrieved too much data; try another filter or fewer files."
            ),
            Notice::BatchFailed { message } => write!(f, "Processing stopped: {message}"),
            Notice::FilesFailed { files } => {
                writeln!(f, "{} file(s) could not be processed:", files.len())?;
                for (path, error) in files {
                    writeln!(f, "{}: {error}", path.display())?;
                }
                Ok(())
            }
            Notice::EmptyResult => {
                write!(f, "Your result is empty. No data in your files for used filters.")
            }
            Notice::ChooseOutput { rows } => write!(
                f,
                "Your result has {rows} rows. Please select the file where to save it."
            ),
            Notice::DestinationLocked { path, message } => write!(
                f,
                "{} cannot be written ({message}). Please close the file or choose another one.",
                path.display()
            ),
            Notice::SpreadsheetFallback { message } => write!(
                f,
                "Saving as a spreadsheet failed ({message}). Please choose a CSV file instead."
            ),
            Notice::WriteFailed { path, message } => {
                write!(f, "Writing {} failed: {message}", path.display())
            }
            Notice::Saved { path, rows } => {
                write!(f, "Saved {rows} rows to {}. Enjoy your data!", path.display())
            }
            Notice::Discarded => write!(f, "The result was not saved."),
        }
    }
}

/// File selection, save destination, and notifications, kept out of the core
/// so runs can be driven by dialogs, the command line, or tests.
pub trait Operator {
    /// Files to process; empty means "nothing selected".
    fn pick_inputs(&mut self) -> Vec<PathBuf>;

    /// Destination for the result; `None` when the operator cancels.
    fn choose_output(&mut self, request: OutputRequest) -> Option<PathBuf>;

    /// Asked after a cancelled save. `true` ends the run without saving.
    fn confirm_discard(&mut self) -> bool;

    fn notify(&mut self, notice: &Notice);
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Inputs of one run that do not come from the operator.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub input_dir: PathBuf,
    pub options: EngineOptions,
    /// Write a JSON report of per-file outcomes here.
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    NoInputs,
    Empty,
    Discarded,
    Saved { path: PathBuf, rows: usize },
}

#[derive(Serialize)]
struct RunReport<'a> {
    input_dir: &'a Path,
    options: &'a EngineOptions,
    result_rows: usize,
    result_columns: &'a [String],
    files: &'a [FileReport],
}

/// Pick inputs → load filters → filter in parallel → save.
pub fn run(request: &RunRequest, operator: &mut dyn Operator) -> Result<RunOutcome> {
    let files = operator.pick_inputs();
    if files.is_empty() {
        operator.notify(&Notice::NoInputs);
        return Ok(RunOutcome::NoInputs);
    }

    let config = match FilterConfig::load(&request.input_dir, request.options.clone()) {
        Ok(config) => config,
        Err(e) => {
            operator.notify(&Notice::ConfigFailed {
                message: e.to_string(),
            });
            return Err(e).context("loading filter configuration");
        }
    };

    let result = match batch::run_batch(&files, &config) {
        Ok(result) => result,
        Err(e) => {
            let message = e.to_string();
            let notice = match e {
                BatchError::Transport { .. } => Notice::TransportFailed { message },
                _ => Notice::BatchFailed { message },
            };
            operator.notify(&notice);
            return Err(e).context("running batch");
        }
    };

    if let Some(path) = &request.report {
        let report = RunReport {
            input_dir: &request.input_dir,
            options: &config.options,
            result_rows: result.table.len(),
            result_columns: result.table.columns(),
            files: &result.files,
        };
        let json = serde_json::to_string_pretty(&report).context("serializing run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing run report {}", path.display()))?;
    }

    let failed: Vec<(PathBuf, String)> = result
        .failed()
        .filter_map(|f| match &f.status {
            batch::FileStatus::Failed { error } => Some((f.path.clone(), error.clone())),
            _ => None,
        })
        .collect();
    if !failed.is_empty() {
        operator.notify(&Notice::FilesFailed { files: failed });
    }

    if result.table.is_empty() {
        operator.notify(&Notice::EmptyResult);
        return Ok(RunOutcome::Empty);
    }

    log::info!("Your result file has: {} rows", result.table.len());
    operator.notify(&Notice::ChooseOutput {
        rows: result.table.len(),
    });
    save(&result.table, operator)
}

/// Ask for destinations until the table is written or the operator gives up.
/// A spreadsheet failure switches to asking for a delimited file.
pub fn save(table: &Table, operator: &mut dyn Operator) -> Result<RunOutcome> {
    let mut request = OutputRequest::Any;
    loop {
        let Some(path) = operator.choose_output(request) else {
            if operator.confirm_discard() {
                operator.notify(&Notice::Discarded);
                return Ok(RunOutcome::Discarded);
            }
            continue;
        };

        if let Err(e) = writer::probe_writable(&path) {
            log::warn!("{e}");
            operator.notify(&Notice::DestinationLocked {
                message: source_message(&e),
                path,
            });
            continue;
        }

        let written = match request {
            OutputRequest::Any => writer::write_table(table, &path).map(drop),
            OutputRequest::DelimitedOnly => writer::write_csv(table, &path),
        };
        match written {
            Ok(()) => {
                let rows = table.len();
                log::info!("saved {rows} rows to {}", path.display());
                operator.notify(&Notice::Saved {
                    path: path.clone(),
                    rows,
                });
                return Ok(RunOutcome::Saved { path, rows });
            }
            Err(e @ OutputError::Spreadsheet(_))
                if OutputFormat::from_path(&path) == OutputFormat::Spreadsheet =>
            {
                log::error!("{e}");
                operator.notify(&Notice::SpreadsheetFallback {
                    message: e.to_string(),
                });
                request = OutputRequest::DelimitedOnly;
            }
            Err(e) => {
                log::error!("{e}");
                operator.notify(&Notice::WriteFailed {
                    path,
                    message: e.to_string(),
                });
            }
        }
    }
}

fn source_message(e: &OutputError) -> String {
    match e {
        OutputError::Locked { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}
