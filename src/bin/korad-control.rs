use clap::Parser;
use log::info;
use msgbox::IconType;
use korad_control::{init_logging, run, Cli};
use korad_control::error::{error_msgbox, AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    info!(concat!("Korad Control ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            msgbox::create(
                concat!("Korad Control ", env!("CARGO_PKG_VERSION")),
                "This application has already been started",
                IconType::Error,
            ).expect("Could not create msgbox");
            Ok(())
        },
        Err(err) => {
            error_msgbox("Unexpected error", &err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
