use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hs_cli::commands::{diagnostics, history, run, sample, set, status, util};
use hs_cli::{Cli, Commands, Config};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so `status --json` stays machine-readable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut stdout = std::io::stdout().lock();
    match &cli.command {
        Some(Commands::Sample) => {
            let config = load_config(cli.config.as_deref())?;
            sample::run(&mut stdout, &config)?;
        }
        Some(Commands::Run) => {
            let config = load_config(cli.config.as_deref())?;
            run::run(&config)?;
        }
        Some(Commands::Status { json }) => {
            let config = load_config(cli.config.as_deref())?;
            let db = util::open_database(&config)?;
            status::run(&mut stdout, &config, db, *json)?;
        }
        Some(Commands::Diagnostics) => {
            let config = load_config(cli.config.as_deref())?;
            let db = util::open_database(&config)?;
            diagnostics::run(&mut stdout, &config, db)?;
        }
        Some(Commands::Set { setting }) => {
            let config = load_config(cli.config.as_deref())?;
            let mut db = util::open_database(&config)?;
            set::run(&mut stdout, &config, &mut db, setting)?;
        }
        Some(Commands::History { limit }) => {
            let config = load_config(cli.config.as_deref())?;
            let db = util::open_database(&config)?;
            history::run(&mut stdout, &db, *limit)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
