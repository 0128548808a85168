//! Error types for the streaming service

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum Error {
    /// Raw configuration input that failed local validation; never reaches I/O.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A required capability is not granted; no resources were touched.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Bind error: {0}")]
    Bind(#[from] BindError),

    #[error("Capture device error: {0}")]
    DeviceInit(#[from] DeviceInitError),

    /// A read or write failed mid-stream.
    #[error("Stream I/O error: {0}")]
    StreamIo(io::Error),

    /// Cooperative stop; flows into cleanup, never surfaced as a failure.
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Listener creation failures
#[derive(Error, Debug)]
pub enum BindError {
    #[error("No usable IPv4 address on this host")]
    NoIpv4Address,

    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
}

/// Capture device construction failures
#[derive(Error, Debug)]
pub enum DeviceInitError {
    #[error("No capture device available")]
    NoDevice,

    #[error("Capture config not supported: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to open capture stream: {0}")]
    OpenStream(String),

    #[error("Capture stream not ready: {0}")]
    NotReady(String),
}

/// Result type alias for the service
pub type Result<T> = std::result::Result<T, Error>;
