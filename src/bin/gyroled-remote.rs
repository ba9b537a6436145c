use std::process::ExitCode;
use clap::Parser;
use log::{error, info};
use gyroled_remote::cli::types::Cli;
use gyroled_remote::error::{AppRunError, ConfigError};
use gyroled_remote::{init_logging, run};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    info!(concat!("gyroled remote ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            ExitCode::FAILURE
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            ExitCode::FAILURE
        },
        Ok(_) => ExitCode::SUCCESS,
    }
}
