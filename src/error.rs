use std::io;
use thiserror::Error;
use msgbox::IconType;
use std::fmt::Display;
use std::str::Utf8Error;
use iced;
use serde_json;
use serialport;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (iced): {source}")]
    Iced { #[from] source: iced::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },
}

/// Everything that can go wrong talking to the power supply.
///
/// Three families: connection problems (`Connection`, `Unresponsive`,
/// `Disconnected`, `NotConnected`), set-points outside the device limits
/// (`Range`), and malformed or missing replies (`Protocol`). None of these
/// are fatal; the GUI shows them inline and the user retries.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to open serial port: {source}")]
    Connection { #[from] source: serialport::Error },

    #[error("The device did not answer the identification query")]
    Unresponsive,

    #[error("The serial connection was lost: {source}")]
    Disconnected { source: io::Error },

    #[error("There is no open connection to the device")]
    NotConnected,

    #[error("{quantity} set-point {value} is outside the device range 0 to {max}")]
    Range { quantity: &'static str, value: f64, max: f64 },

    #[error("Malformed or missing reply from the device: {reason}")]
    Protocol { reason: String },
}

impl DeviceError {
    /// True for errors that mean the connection itself is gone, as opposed
    /// to a single exchange failing. The GUI drops the session for these.
    pub fn is_disconnection(&self) -> bool {
        matches!(
            self,
            DeviceError::Connection { .. }
                | DeviceError::Disconnected { .. }
                | DeviceError::NotConnected
        )
    }
}

pub fn error_msgbox<T: Display>(message: &'static str, error: &T) {
    let message = format!("{}: {}", message, error);
    eprintln!("{}", &message);
    if let Err(err) = msgbox::create(concat!("Korad Control ", env!("CARGO_PKG_VERSION")), &message, IconType::Error) {
        eprintln!("Failed to create msgbox: {:?}", err);
    }
}
