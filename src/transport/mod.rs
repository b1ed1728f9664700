//! Transport module - the device channel the writer drains into.
//!
//! Provides:
//! - [`Transport`] - blocking send/receive against fixed bulk endpoints
//! - [`TransportOpener`] - acquires a live transport for a [`Device`](crate::Device)
//! - [`MemoryTransport`] - in-process device double
//! - [`SocketTransport`] - Unix datagram channel (Unix only)
//!
//! Discovery and interface claiming happen inside an opener; the queue and
//! writer only ever see an already-open transport.

mod memory;
#[cfg(unix)]
mod socket;

use std::sync::Arc;
use std::time::Duration;

use crate::config::DeviceConfig;
use crate::error::TransportError;
use crate::protocol::Endpoint;

pub use memory::{MemoryTransport, SentPacket};
#[cfg(unix)]
pub use socket::{SocketOpener, SocketTransport};

/// A blocking, timeout-bounded device channel.
///
/// Implementations must be callable from the writer thread and from reader
/// threads at the same time. A single call never retries internally. A zero
/// `timeout` waits without bound.
pub trait Transport: Send + Sync {
    /// Send `data` out of `endpoint`, returning the number of bytes transferred.
    fn send(&self, endpoint: Endpoint, data: &[u8], timeout: Duration)
        -> Result<usize, TransportError>;

    /// Read up to `buf.len()` bytes from `endpoint`.
    fn receive(
        &self,
        endpoint: Endpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Give up the interface and device context.
    ///
    /// Called exactly once: by the writer thread on its way out, or by
    /// [`WriterWorker::start`](crate::WriterWorker::start) when that thread
    /// cannot be spawned. Calls blocked in `receive` must return once the
    /// transport is released.
    fn release(&self);
}

/// Opens the transport a device is created with.
pub trait TransportOpener {
    fn open(&self, config: &DeviceConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

impl<F> TransportOpener for F
where
    F: Fn(&DeviceConfig) -> Result<Arc<dyn Transport>, TransportError>,
{
    fn open(&self, config: &DeviceConfig) -> Result<Arc<dyn Transport>, TransportError> {
        self(config)
    }
}
