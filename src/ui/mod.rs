//! Ways of driving a run: native dialogs or the command line.

pub mod console;
pub mod dialogs;

pub use console::ConsoleOperator;
pub use dialogs::DialogOperator;
