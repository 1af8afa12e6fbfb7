//! Immutable per-run configuration, built once from the input directory and
//! shared by every worker.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::data::filter::MixedLinePolicy;
use crate::data::filter_spec::{self, FilterSpec};
use crate::data::schema::{self, TableLayout};
use crate::error::ConfigError;

/// Type declarations, `column:type` per line.
pub const SCHEMA_FILE: &str = "dtypes.txt";
/// Columns kept in the output, one per line.
pub const COLUMNS_FILE: &str = "columns.txt";
/// Default input directory, relative to the working directory.
pub const DEFAULT_INPUT_DIR: &str = "input";
/// Default per-file result budget (rows × columns).
pub const DEFAULT_MAX_RESULT_CELLS: usize = 50_000_000;

/// Knobs that do not come from the input directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineOptions {
    /// Worker threads; `None` means one per available core.
    pub workers: Option<usize>,
    pub mixed_lines: MixedLinePolicy,
    /// A single file's filtered result above this many cells aborts the batch.
    pub max_result_cells: usize,
    /// Abort the batch on the first failed file instead of reporting it.
    pub fail_fast: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: None,
            mixed_lines: MixedLinePolicy::default(),
            max_result_cells: DEFAULT_MAX_RESULT_CELLS,
            fail_fast: false,
        }
    }
}

/// Everything a worker needs to read and filter one file.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub layout: TableLayout,
    pub filters: FilterSpec,
    pub options: EngineOptions,
}

impl FilterConfig {
    /// Read `dtypes.txt`, `columns.txt` and every other `*.txt` in `input_dir`.
    pub fn load(input_dir: &Path, options: EngineOptions) -> Result<Self, ConfigError> {
        let (schema, date_columns) = schema::load_schema(&input_dir.join(SCHEMA_FILE))?;

        let columns_path = input_dir.join(COLUMNS_FILE);
        let selection = schema::load_columns(&columns_path).map_err(io_err(&columns_path))?;

        let files = filter_spec::filter_files(input_dir, &[SCHEMA_FILE, COLUMNS_FILE])
            .map_err(io_err(input_dir))?;
        let filters = filter_spec::load_filter_spec(&files).map_err(io_err(input_dir))?;

        let config = FilterConfig {
            layout: TableLayout {
                schema,
                date_columns,
                selection,
            },
            filters,
            options,
        };
        config.warn_about_unknown_filter_columns();
        log::info!(
            "loaded {} declared columns, {} date columns, {} selected, {} filter files",
            config.layout.schema.len(),
            config.layout.date_columns.len(),
            config.layout.selection.len(),
            config.filters.len()
        );
        Ok(config)
    }

    /// Size of the worker pool.
    pub fn worker_count(&self) -> usize {
        self.options
            .workers
            .filter(|&n| n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    fn warn_about_unknown_filter_columns(&self) {
        for column in self.filters.keys() {
            let declared = self.layout.schema.contains_key(column)
                || self.layout.date_columns.contains(column);
            if !declared {
                log::warn!("filter column {column:?} is not declared in {SCHEMA_FILE}, its type is inferred per file");
            }
            if !self.layout.selection.contains(column) {
                log::warn!("filter column {column:?} is not listed in {COLUMNS_FILE}, its filter will be skipped");
            }
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError {
    let path: PathBuf = path.to_path_buf();
    move |source| ConfigError::Io { path, source }
}
