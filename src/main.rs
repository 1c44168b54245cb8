use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use switchback::cli::args::Args;
use switchback::cli::commands::handle_command;
use switchback::constants::{CLI_MSG_ERROR, LOG_FILTER_ENV};
use switchback::{config, logger};

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_dir = config::resolve_config_dir(args.config_dir.as_ref())?;
    let config = match config::load_config(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{CLI_MSG_ERROR}{e}");
            std::process::exit(1);
        }
    };

    logger::configure(&config.log_level, config.max_log_entries);

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(logger::tracing_directive(&config.log_level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    handle_command(args.command, &config_dir, &config)
}
