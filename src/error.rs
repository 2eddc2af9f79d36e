//! # Error Types Module
//!
//! Centralized error handling for bluelist.
//!
//! ## Error Types
//! - `SessionError`: Failures surfaced by the discovery session controller
//! - `PlatformError`: Failures reported by the Bluetooth backend
//! - `ConfigError`: Configuration file I/O and parsing errors
//!
//! ## Recovery
//! Only `SessionError::AdapterUnavailable` is fatal. Everything else aborts
//! the current operation and is shown to the user as a transient notice;
//! nothing is retried automatically.

use crate::permissions::Permission;
use std::fmt;

/// Errors produced by the discovery session controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The host exposes no Bluetooth adapter at all
    AdapterUnavailable,
    /// A permission needed by the current operation is not granted
    PermissionDenied(Permission),
    /// The name of a discovered device could not be read
    DeviceNameUnreadable { address: String },
    /// The backend rejected a request
    Platform(PlatformError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AdapterUnavailable => {
                write!(f, "Bluetooth is not supported on this device")
            }
            SessionError::PermissionDenied(Permission::Bluetooth) => {
                write!(f, "Bluetooth permission not granted")
            }
            SessionError::PermissionDenied(permission) => {
                write!(f, "{} permission not granted", permission.label())
            }
            SessionError::DeviceNameUnreadable { address } => {
                write!(f, "Cannot read the name of device {}", address)
            }
            SessionError::Platform(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Platform(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PlatformError> for SessionError {
    fn from(e: PlatformError) -> Self {
        SessionError::Platform(e)
    }
}

/// Errors reported by the Bluetooth backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Failed to create the backend runtime
    RuntimeCreation(String),
    /// Bluetooth manager initialization failed
    ManagerInit(String),
    /// The backend thread has gone away
    Disconnected,
    /// The backend cannot perform this operation on this host
    Unsupported(&'static str),
    /// An operation was attempted and failed
    OperationFailed { operation: &'static str, reason: String },
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::RuntimeCreation(msg) => {
                write!(f, "Failed to create async runtime: {}", msg)
            }
            PlatformError::ManagerInit(msg) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", msg)
            }
            PlatformError::Disconnected => {
                write!(f, "Bluetooth backend is no longer running")
            }
            PlatformError::Unsupported(operation) => {
                write!(f, "{} is not supported on this system", operation)
            }
            PlatformError::OperationFailed { operation, reason } => {
                write!(f, "{} failed: {}", operation, reason)
            }
        }
    }
}

impl std::error::Error for PlatformError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}
