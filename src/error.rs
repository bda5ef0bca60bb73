use std::any::Any;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::device::types::SessionPhase;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Invalid frame layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Invalid config: {reason}")]
    Invalid { reason: String },
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

    #[error("Failed to start application (controller): {source}")]
    ControllerError { #[from] source: ControllerError },

    #[error("Failed to start application (logging): {source}")]
    LoggingError { #[from] source: fern::InitError },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapters available")]
    NoAdapters,

    #[error("The resolved address does not belong to a known adapter")]
    UnknownAddress,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Device error: {0}")]
    Other(String),
}

impl DeviceError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DeviceError::Btle { source: btleplug::Error::PermissionDenied })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame has {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("No peripheral advertising the requested name was found")]
    NotFound,

    #[error("Scanning did not finish in time")]
    Timeout,

    #[error("Scanning failed: {source}")]
    Transport { #[from] source: DeviceError },
}

/// Everything that can go wrong inside a session. All variants except
/// `StopRequested` are recovered locally by a state transition.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Scan timed out")]
    ScanTimeout,

    #[error("Scan failed: {source}")]
    ScanTransport { source: DeviceError },

    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Connect failed: {source}")]
    Connect { source: DeviceError },

    #[error("Subscribe failed: {reason}")]
    Subscribe { reason: String },

    #[error("Dropped frame: {source}")]
    Decode { #[from] source: DecodeError },

    #[error("Peripheral disconnected while {phase}")]
    UnexpectedDisconnect { phase: SessionPhase },

    #[error("Stop requested")]
    StopRequested,
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Failed to spawn the bluetooth thread: {source}")]
    Spawn { #[from] source: io::Error },

    #[error("Invalid config: {source}")]
    Config { #[from] source: ConfigError },
}

/// Text of a panic payload, as returned by `JoinHandle::join` or `JoinError::into_panic`.
pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let message = error
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| error.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("(payload is not a string)");

    format!("panicked: {}", message)
}
