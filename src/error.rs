//! # Error Types
//!
//! Custom error types for the USBL relay using `thiserror`.

use thiserror::Error;

/// Failures opening or reading a position source (serial device or replay file)
#[derive(Debug, Error)]
pub enum SourceError {
    /// The device or replay file could not be opened
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The byte stream did not match NMEA framing
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

/// Failures connecting to or sending through an outbound endpoint
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The address could not be parsed or resolved
    #[error("invalid address: {0}")]
    AddressInvalid(String),

    /// The peer refused the connection or the socket failed
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Connecting exceeded the allowed time
    #[error("connection timed out: {0}")]
    Timeout(String),

    /// The endpoint has dropped and can no longer accept messages
    #[error("endpoint is not connected")]
    NotConnected,
}

/// Aggregate error reported by `connect`
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The supplied configuration is malformed or empty
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A position source failed to start
    #[error(transparent)]
    Source(#[from] SourceError),

    /// An outbound endpoint failed to connect
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Errors reported by `sync_location`
#[derive(Debug, Error)]
pub enum SyncError {
    /// No valid GPS fix has been received yet (or there is no session)
    #[error("no GPS fix received yet")]
    NotConnected,

    /// The most recent GPS fix is older than the configured threshold
    #[error("last GPS fix is stale ({age_ms} ms old, threshold {threshold_ms} ms)")]
    StaleFix { age_ms: u64, threshold_ms: u64 },
}

/// Main error type for the USBL relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration file errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection lifecycle errors
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Location re-synchronization errors
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Position source errors
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Outbound endpoint errors
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// An attribute key outside dev_gps/dev_usbl/addr_mav/addr_echo
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    /// The controller session is shutting down and dropped the request
    #[error("controller is shutting down")]
    Closed,
}

/// Result type alias for the USBL relay
pub type Result<T> = std::result::Result<T, RelayError>;
