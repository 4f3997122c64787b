//! Heatshare CLI library.
//!
//! Wires the allocation engine to a `SQLite` store, a JSON state file and a
//! periodic scheduler.

mod cli;
pub mod commands;
mod config;
pub mod scheduler;
pub mod site;
pub mod states;

pub use cli::{Cli, Commands, SetCommand, Toggle};
pub use config::Config;
