//! Fan the read → filter pipeline out over a worker pool and merge the results.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::FilterConfig;
use crate::data::filter;
use crate::data::loader::{self, display_name};
use crate::data::model::Table;
use crate::error::BatchError;

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Filtered { rows_read: usize, rows_kept: usize },
    /// Not a supported format.
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Merged result of a batch plus one report per input file, in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub table: Table,
    pub files: Vec<FileReport>,
}

impl BatchResult {
    pub fn failed(&self) -> impl Iterator<Item = &FileReport> + '_ {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Failed { .. }))
    }
}

/// Per-file result handed back from a worker.
struct FileOutcome {
    report: FileReport,
    table: Option<Table>,
}

/// Read and filter every file in parallel, then concatenate in submission order.
///
/// Failed files are reported and the rest of the batch is kept, unless
/// `fail_fast` is set. A file whose result exceeds `max_result_cells` always
/// abandons the batch with [`BatchError::Transport`].
pub fn run_batch(files: &[PathBuf], config: &FilterConfig) -> Result<BatchResult, BatchError> {
    let workers = config.worker_count();
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    log::info!("processing {} files with {workers} workers", files.len());

    let outcomes: Vec<FileOutcome> = pool.install(|| {
        files
            .par_iter()
            .map(|path| process_file(path, config))
            .collect::<Result<_, BatchError>>()
    })?;

    let mut reports = Vec::with_capacity(outcomes.len());
    let mut tables = Vec::new();
    for outcome in outcomes {
        reports.push(outcome.report);
        tables.extend(outcome.table);
    }
    let table = Table::concat(tables);
    log::info!("result has {} rows", table.len());

    Ok(BatchResult {
        table,
        files: reports,
    })
}

/// Run one file inside a worker. Errors and panics become a `Failed` report;
/// only batch-fatal conditions are returned as `Err`.
fn process_file(path: &Path, config: &FilterConfig) -> Result<FileOutcome, BatchError> {
    let name = display_name(path);
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| filter_file(path, config)))
        .unwrap_or_else(|panic| Err(anyhow::anyhow!("worker panicked: {}", panic_message(&*panic))));

    let (status, table) = match result {
        Ok(Some((rows_read, table))) => {
            let cells = table.cell_count();
            if cells > config.options.max_result_cells {
                return Err(BatchError::Transport {
                    path: path.to_path_buf(),
                    cells,
                    limit: config.options.max_result_cells,
                });
            }
            log::info!("{name} is done!");
            let status = FileStatus::Filtered {
                rows_read,
                rows_kept: table.len(),
            };
            (status, Some(table))
        }
        Ok(None) => {
            let reason = "unsupported file type".to_string();
            (FileStatus::Skipped { reason }, None)
        }
        Err(e) => {
            let message = format!("{e:#}");
            log::error!("{name}: {message}");
            if config.options.fail_fast {
                return Err(BatchError::FileFailed {
                    path: path.to_path_buf(),
                    message,
                });
            }
            (FileStatus::Failed { error: message }, None)
        }
    };

    Ok(FileOutcome {
        report: FileReport {
            path: path.to_path_buf(),
            status,
        },
        table,
    })
}

/// Load and filter one file. `None` for unsupported formats; otherwise the
/// number of rows read and the filtered table.
pub fn filter_file(path: &Path, config: &FilterConfig) -> Result<Option<(usize, Table)>> {
    let Some(table) = loader::load_file(path, &config.layout)? else {
        return Ok(None);
    };
    let rows_read = table.len();
    let filtered = filter::apply_filters(table, &config.filters, config.options.mixed_lines)
        .with_context(|| format!("filtering {}", display_name(path)))?;
    log::debug!("{}: kept {} of {rows_read} rows", display_name(path), filtered.len());
    Ok(Some((rows_read, filtered)))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::data::model::Value;
    use crate::data::schema::{ColumnType, TableLayout};

    fn config(options: EngineOptions) -> FilterConfig {
        FilterConfig {
            layout: TableLayout {
                schema: [("n".to_string(), ColumnType::Integer)].into_iter().collect(),
                date_columns: Vec::new(),
                selection: vec!["n".to_string()],
            },
            filters: [("n".to_string(), vec![">=2".to_string()])].into_iter().collect(),
            options,
        }
    }

    #[test]
    fn keeps_submission_order_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let broken = dir.path().join("b.csv");
        let second = dir.path().join("c.csv");
        std::fs::write(&first, "n\n1\n2\n3\n").unwrap();
        std::fs::write(&broken, "n\nnot-a-number\n").unwrap();
        std::fs::write(&second, "n\n5\n0\n").unwrap();

        let files = vec![first, broken.clone(), second];
        let result = run_batch(&files, &config(EngineOptions::default())).unwrap();

        let values: Vec<&Value> = result.table.column(0).collect();
        assert_eq!(values, vec![&Value::Integer(2), &Value::Integer(3), &Value::Integer(5)]);
        let failed: Vec<&FileReport> = result.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].path, broken);
        assert_eq!(
            result.files[0].status,
            FileStatus::Filtered {
                rows_read: 3,
                rows_kept: 2
            }
        );
    }

    #[test]
    fn fail_fast_aborts_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("b.csv");
        std::fs::write(&broken, "n\nnot-a-number\n").unwrap();

        let options = EngineOptions {
            fail_fast: true,
            ..EngineOptions::default()
        };
        let err = run_batch(&[broken], &config(options)).unwrap_err();
        assert!(matches!(err, BatchError::FileFailed { .. }));
    }

    #[test]
    fn oversized_result_is_a_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big.csv");
        std::fs::write(&big, "n\n2\n3\n4\n5\n").unwrap();

        let options = EngineOptions {
            max_result_cells: 3,
            ..EngineOptions::default()
        };
        let err = run_batch(&[big], &config(options)).unwrap_err();
        assert!(matches!(err, BatchError::Transport { cells: 4, limit: 3, .. }));
    }
}
