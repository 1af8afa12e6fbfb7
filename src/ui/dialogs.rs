use std::path::PathBuf;

use rfd::{FileDialog, MessageButtons, MessageDialog, MessageDialogResult, MessageLevel};

use crate::app::{Notice, Operator, OutputRequest};

/// Native file pickers and message boxes.
///
/// Inputs or a destination given up front (e.g. on the command line) are
/// used once instead of showing the corresponding dialog.
#[derive(Debug, Default)]
pub struct DialogOperator {
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
}

impl DialogOperator {
    pub fn new(inputs: Vec<PathBuf>, output: Option<PathBuf>) -> Self {
        Self { inputs, output }
    }
}

impl Operator for DialogOperator {
    fn pick_inputs(&mut self) -> Vec<PathBuf> {
        if !self.inputs.is_empty() {
            return std::mem::take(&mut self.inputs);
        }
        FileDialog::new()
            .set_title("Select files to filter")
            .add_filter("Supported files", &["csv", "xlsx", "xlsm", "xls", "ods", "parquet", "pq"])
            .add_filter("CSV", &["csv"])
            .add_filter("Excel Workbook", &["xlsx", "xlsm", "xls", "ods"])
            .add_filter("Parquet", &["parquet", "pq"])
            .pick_files()
            .unwrap_or_default()
    }

    fn choose_output(&mut self, request: OutputRequest) -> Option<PathBuf> {
        if request == OutputRequest::Any {
            if let Some(path) = self.output.take() {
                return Some(path);
            }
        }
        let dialog = FileDialog::new().set_title("Save filtering result");
        let dialog = match request {
            OutputRequest::Any => dialog
                .add_filter("Excel Workbook", &["xlsx"])
                .add_filter("CSV file (; for delimiter)", &["csv"])
                .add_filter("Parquet", &["parquet"])
                .set_file_name("result.xlsx"),
            OutputRequest::DelimitedOnly => dialog
                .add_filter("CSV file (; for delimiter)", &["csv"])
                .set_file_name("result.csv"),
        };
        dialog.save_file()
    }

    fn confirm_discard(&mut self) -> bool {
        let answer = MessageDialog::new()
            .set_level(MessageLevel::Warning)
            .set_title("Not saving")
            .set_description("Do you really not want to save the result of this query?")
            .set_buttons(MessageButtons::YesNo)
            .show();
        matches!(answer, MessageDialogResult::Yes)
    }

    fn notify(&mut self, notice: &Notice) {
        let level = if notice.is_error() {
            MessageLevel::Error
        } else {
            MessageLevel::Info
        };
        MessageDialog::new()
            .set_level(level)
            .set_title(notice.title())
            .set_description(notice.to_string())
            .set_buttons(MessageButtons::Ok)
            .show();
    }
}
