//! Error objects for the stradus crate
use libc::{EACCES, EBADMSG, EINVAL, EIO, ENODEV, ENOENT, ETIMEDOUT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error type for the stradus crate
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Errors accessing the USB device.  Aborts the in-flight command, but
    /// leaves the connection usable for the next one
    #[error("USB error while attempting to communicate with the laser: {0}")]
    Usb(SerializableUsbError),

    /// A USB read or write exceeded its transport timeout.  While polling
    /// this is treated as "no data yet"
    #[error("Laser USB operation timed out after {dur:?}")]
    Timeout { dur: Duration },

    /// DeviceAccess holds a variety of errors relating to opening the laser
    #[error("{kind}")]
    DeviceAccess { kind: DeviceAccessKind },

    /// The laser answered, but not in a form which can be trusted
    #[error("Laser communication error: {kind}")]
    Communication { kind: CommunicationKind },

    /// Invalid arguments passed to the stradus library
    #[error("stradus library called with invalid arguments: {message}")]
    Args { message: String },
}

/// Used to differentiate between different types of problems accessing the
/// laser
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum DeviceAccessKind {
    #[error("The connection to the laser is not open")]
    NoDevice,

    #[error("USB device {vid:04x}/{pid:04x} not found on bus {bus:03} address {address:03} - is it connected?")]
    NotFound {
        vid: u16,
        pid: u16,
        bus: u8,
        address: u8,
    },

    #[error("Hit USB permissions error while attempting to access the laser.  You may need to add a udev rule in /etc/udev/rules.d/.")]
    Permission,

    #[error("Failed to connect to USB device {vid:04x}/{pid:04x} on bus {bus:03} address {address:03} after {attempts} attempt(s)")]
    ConnectionFailed {
        vid: u16,
        pid: u16,
        bus: u8,
        address: u8,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum CommunicationKind {
    /// The response did not echo the expected tokens, even after a retry
    #[error("Response to {command} could not be verified")]
    VerificationFailed { command: String },

    /// A data line of the response was not of the form key=value
    #[error("Malformed response line {line:?}")]
    MalformedResponse { line: String },
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum SerializableUsbError {
    #[error("{message}")]
    UsbError { message: String },
}

impl Error {
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Usb { .. } => EIO,
            Error::Timeout { .. } => ETIMEDOUT,
            Error::DeviceAccess { kind } => match kind {
                DeviceAccessKind::NoDevice => ENODEV,
                DeviceAccessKind::NotFound { .. } => ENOENT,
                DeviceAccessKind::Permission => EACCES,
                DeviceAccessKind::ConnectionFailed { .. } => ENODEV,
            },
            Error::Communication { .. } => EBADMSG,
            Error::Args { .. } => EINVAL,
        }
    }

    /// Whether this is a transport timeout, which the polling loops treat as
    /// "no data yet" rather than a failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Used for errors which must remain internal to the stradus crate
/// This is not "pub use"d by lib.rs
#[derive(Debug, Error)]
pub enum InternalError {
    /// A bus scan line carried a bus or address field which didn't parse.
    /// The record is dropped and the scan continues
    #[error("Unable to parse {field} from USB listing line {line:?}")]
    DiscoveryParse { field: &'static str, line: String },
}

// Map rusb::Error to Error.  Timeouts are mapped by the caller, as only it
// knows the duration which elapsed
impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Access => Error::DeviceAccess {
                kind: DeviceAccessKind::Permission,
            },
            err => Self::Usb(SerializableUsbError::UsbError {
                message: err.to_string(),
            }),
        }
    }
}

// Map CommunicationKind to Error
impl From<CommunicationKind> for Error {
    fn from(kind: CommunicationKind) -> Self {
        Self::Communication { kind }
    }
}

// Map DeviceAccessKind to Error
impl From<DeviceAccessKind> for Error {
    fn from(kind: DeviceAccessKind) -> Self {
        Self::DeviceAccess { kind }
    }
}
