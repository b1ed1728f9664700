//! Error types for peachyusb.

use thiserror::Error;

/// Main error type for all queue, writer and device operations.
#[derive(Debug, Error)]
pub enum PeachyError {
    /// The device could not be opened, or a writer was started without one.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(#[source] TransportError),

    /// A single transfer failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Queue capacity must be at least one slot.
    #[error("Invalid queue capacity: {0}")]
    InvalidCapacity(usize),

    /// Payload does not fit in a single packet.
    #[error("Payload of {len} bytes exceeds packet maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Queue was closed while (or before) waiting on it.
    #[error("Queue closed")]
    QueueClosed,

    /// Timed wait on the queue expired.
    #[error("Timed out waiting on queue")]
    Timeout,

    /// The writer thread could not be spawned.
    #[error("Failed to spawn writer thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O error while loading configuration or touching the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration error.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// The blocking task backing an async send did not complete.
    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Errors reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transfer did not complete within its timeout.
    #[error("Transfer timed out")]
    Timeout,

    /// No matching device was found.
    #[error("Device not found")]
    NotFound,

    /// The transport was already released.
    #[error("Transport released")]
    Released,

    /// Endpoint address does not match the transfer direction.
    #[error("Invalid endpoint 0x{0:02x}")]
    InvalidEndpoint(u8),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other device-specific failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Map an I/O error, folding timeout kinds into [`TransportError::Timeout`].
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                Self::NotFound
            }
            _ => Self::Io(err),
        }
    }
}

/// Result type alias using PeachyError.
pub type Result<T> = std::result::Result<T, PeachyError>;
