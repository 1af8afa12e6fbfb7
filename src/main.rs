use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use advanced_filter::app::{self, Operator, RunOutcome, RunRequest};
use advanced_filter::config::{EngineOptions, DEFAULT_INPUT_DIR, DEFAULT_MAX_RESULT_CELLS};
use advanced_filter::data::filter::MixedLinePolicy;
use advanced_filter::ui::{ConsoleOperator, DialogOperator};

/// Filter CSV, spreadsheet, and parquet files with per-column filter files.
///
/// The input directory holds `dtypes.txt` (column:type), `columns.txt`
/// (columns to keep), and one `<column>.txt` per filtered column.
#[derive(Parser, Debug)]
#[command(name = "advanced-filter", version, about, long_about = None)]
struct Cli {
    /// Files to filter. Without files, a file picker is shown.
    files: Vec<PathBuf>,

    /// Directory holding dtypes.txt, columns.txt and the filter files
    #[arg(long, default_value = DEFAULT_INPUT_DIR)]
    input_dir: PathBuf,

    /// Where to save the result (.xlsx, .parquet, anything else is ;-delimited text)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Worker threads (default: one per core)
    #[arg(short, long)]
    workers: Option<usize>,

    /// What to do with plain lines mixed into a comparison filter file
    #[arg(long, value_enum, default_value_t = MixedLines::Drop)]
    mixed_lines: MixedLines,

    /// A single file's result above this many cells aborts the batch
    #[arg(long, default_value_t = DEFAULT_MAX_RESULT_CELLS)]
    max_result_cells: usize,

    /// Abort on the first file that fails instead of reporting it
    #[arg(long)]
    fail_fast: bool,

    /// Write a JSON report of per-file outcomes
    #[arg(long)]
    report: Option<PathBuf>,

    /// Never show dialogs; notices go to the log
    #[arg(long)]
    headless: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MixedLines {
    /// Ignore plain lines and keep the comparisons
    Drop,
    /// Fail the file
    Reject,
}

impl From<MixedLines> for MixedLinePolicy {
    fn from(value: MixedLines) -> Self {
        match value {
            MixedLines::Drop => MixedLinePolicy::DropPlain,
            MixedLines::Reject => MixedLinePolicy::Reject,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let request = RunRequest {
        input_dir: cli.input_dir,
        options: EngineOptions {
            workers: cli.workers,
            mixed_lines: cli.mixed_lines.into(),
            max_result_cells: cli.max_result_cells,
            fail_fast: cli.fail_fast,
        },
        report: cli.report,
    };

    let mut operator: Box<dyn Operator> = if cli.headless {
        Box::new(ConsoleOperator::new(cli.files, cli.output))
    } else {
        Box::new(DialogOperator::new(cli.files, cli.output))
    };

    match app::run(&request, operator.as_mut()) {
        Ok(RunOutcome::Saved { .. } | RunOutcome::Empty | RunOutcome::Discarded) => {
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::NoInputs) => {
            log::warn!("no input files");
            ExitCode::from(2)
        }
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
