//! CLI subcommand implementations.

pub mod diagnostics;
pub mod history;
pub mod run;
pub mod sample;
pub mod set;
pub mod status;
pub mod util;
