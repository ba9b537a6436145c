use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::device::types::ConnectionStatus;

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
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Device did not become ready in time (last status: {status})")]
    ConnectTimeout { status: ConnectionStatus },

    #[error("Failed to print state: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("The bluetooth radio is off or not authorized")]
    TransportUnavailable,

    #[error("Device discovery failed: {what}")]
    DiscoveryFailure { what: String },

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Command not sent, connection is {status}")]
    WriteRejected { status: ConnectionStatus },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("The connection was lost during the operation")]
    DisconnectedMidOperation,

    #[error("The engine has been closed")]
    EngineClosed,
}

/// Reason a notification payload could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not valid utf-8")]
    InvalidUtf8,

    #[error("payload has no ':' delimiter")]
    MissingDelimiter,

    #[error("unrecognized prefix {prefix:?}")]
    UnknownPrefix { prefix: String },

    #[error("empty shader name after {prefix:?}")]
    EmptyName { prefix: String },

    #[error("invalid integer {value:?}")]
    InvalidInteger { value: String },

    #[error("invalid boolean {value:?}")]
    InvalidBool { value: String },

    #[error("invalid number {value:?}")]
    InvalidFloat { value: String },

    #[error("expected 4 servo speeds, got {count}")]
    WrongServoCount { count: usize },

    #[error("servo speed {value} is outside [-1.0, 1.0]")]
    SpeedOutOfRange { value: String },
}
