//! Error types for the Futura coordinator
//!
//! Every failure the coordinator can surface is a [`FuturaError`]. Transport
//! level variants ([`FuturaError::is_transport_fault`]) tear the session down
//! so the next call reconnects from scratch; the others are raised before any
//! I/O happens or describe a whole poll cycle.

use thiserror::Error;

use crate::constants::exception_name;

/// Result alias used throughout the crate
pub type FuturaResult<T> = Result<T, FuturaError>;

/// Errors raised by the session, the reader and the coordinator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FuturaError {
    /// TCP connect failed or the peer closed the socket
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Connect or request exceeded its bound
    #[error("timeout: {message} (after {timeout_ms} ms)")]
    Timeout { message: String, timeout_ms: u64 },

    /// Socket read/write failed mid-exchange
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Malformed or mismatched reply
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Exception response reported by the device
    #[error("device exception {code:#04x} ({}) on function {function:#04x}", exception_name(*.code))]
    Exception { function: u8, code: u8 },

    /// Request rejected locally, nothing was sent
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// Command input outside its documented range
    #[error("{field} = {value} is out of range [{min}, {max}]")]
    Range {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    /// A poll cycle failed part-way; nothing from it was published
    #[error("poll cycle aborted at {segment}: {source}")]
    CycleAborted {
        segment: String,
        source: Box<FuturaError>,
    },

    /// A field was requested outside every window read in the cycle
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Invalid or unloadable configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl FuturaError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            message: message.into(),
            timeout_ms,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception { function, code }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn range<V, B>(field: &'static str, value: V, min: B, max: B) -> Self
    where
        V: std::fmt::Display,
        B: std::fmt::Display,
    {
        Self::Range {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    pub fn cycle_aborted(segment: impl Into<String>, source: FuturaError) -> Self {
        Self::CycleAborted {
            segment: segment.into(),
            source: Box::new(source),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error leaves the connection in an unknown state.
    ///
    /// The session drops its socket for every such error.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::Io { .. }
                | Self::Protocol { .. }
                | Self::Exception { .. }
        )
    }

    /// Whether the error was raised before any I/O took place.
    pub fn is_rejected_locally(&self) -> bool {
        matches!(
            self,
            Self::InvalidData { .. } | Self::Range { .. } | Self::Configuration { .. }
        )
    }

    /// The innermost error, looking through [`FuturaError::CycleAborted`].
    pub fn root_cause(&self) -> &FuturaError {
        match self {
            Self::CycleAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for FuturaError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::connection(err.to_string()),
            _ => Self::io(err.to_string()),
        }
    }
}

impl From<figment::Error> for FuturaError {
    fn from(err: figment::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_fault_classification() {
        assert!(FuturaError::connection("refused").is_transport_fault());
        assert!(FuturaError::timeout("read", 5000).is_transport_fault());
        assert!(FuturaError::protocol("short frame").is_transport_fault());
        assert!(FuturaError::exception(0x04, 0x02).is_transport_fault());

        assert!(!FuturaError::range("night_hours", 11, 0, 10).is_transport_fault());
        assert!(!FuturaError::invalid_data("zero quantity").is_transport_fault());
    }

    #[test]
    fn test_exception_display() {
        let err = FuturaError::exception(0x03, 0x02);
        let text = err.to_string();
        assert!(text.contains("0x02"));
        assert!(text.contains("illegal data address"));
    }

    #[test]
    fn test_range_display() {
        let err = FuturaError::range("temperature_setpoint", 30.5, 15.0, 28.0);
        assert_eq!(
            err.to_string(),
            "temperature_setpoint = 30.5 is out of range [15, 28]"
        );
        assert!(err.is_rejected_locally());
    }

    #[test]
    fn test_root_cause() {
        let inner = FuturaError::timeout("holding read", 5000);
        let err = FuturaError::cycle_aborted("holding[0..18]", inner.clone());
        assert_eq!(err.root_cause(), &inner);
        assert!(!err.is_transport_fault());
    }

    #[test]
    fn test_io_error_mapping() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            FuturaError::from(refused),
            FuturaError::Connection { .. }
        ));

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(FuturaError::from(eof), FuturaError::Connection { .. }));

        let other = std::io::Error::other("boom");
        assert!(matches!(FuturaError::from(other), FuturaError::Io { .. }));
    }
}
