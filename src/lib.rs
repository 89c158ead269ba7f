use std::env;
use clap::Parser;
use crate::gui::application::run_application;
use crate::error::AppRunError;

pub mod config;
pub mod device;
pub mod error;
pub mod gui;

/// Command line options. The window carries all the real controls; these
/// only preselect the connection settings.
#[derive(Debug, Parser)]
#[command(name = "korad-control", version)]
pub struct Cli {
    /// Serial port to preselect instead of the remembered one
    #[arg(long)]
    pub port: Option<String>,

    /// Baud rate to use instead of the remembered one
    #[arg(long)]
    pub baud: Option<u32>,

    /// Log at debug level
    #[arg(long, short)]
    pub verbose: bool,
}

pub fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub fn run(cli: Cli) -> Result<(), AppRunError> {
    run_application(cli)?;
    Ok(())
}
