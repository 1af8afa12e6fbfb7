use std::path::PathBuf;

use crate::app::{Notice, Operator, OutputRequest};

/// Non-interactive operator: inputs and destination come from arguments,
/// notices go to the log, and a run without a usable destination ends
/// without saving.
#[derive(Debug, Default)]
pub struct ConsoleOperator {
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    fallback: Option<PathBuf>,
}

impl ConsoleOperator {
    pub fn new(inputs: Vec<PathBuf>, output: Option<PathBuf>) -> Self {
        let fallback = output.as_ref().map(|p| p.with_extension("csv"));
        Self {
            inputs,
            output,
            fallback,
        }
    }
}

impl Operator for ConsoleOperator {
    fn pick_inputs(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.inputs)
    }

    fn choose_output(&mut self, request: OutputRequest) -> Option<PathBuf> {
        match request {
            OutputRequest::Any => self.output.take(),
            OutputRequest::DelimitedOnly => self.fallback.take(),
        }
    }

    fn confirm_discard(&mut self) -> bool {
        true
    }

    fn notify(&mut self, notice: &Notice) {
        match notice {
            Notice::Discarded => log::warn!("{}", notice),
            n if n.is_error() => log::error!("{}: {}", n.title(), n),
            n => log::info!("{}", n),
        }
    }
}
