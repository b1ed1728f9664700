//! Unix datagram device channel.
//!
//! Each datagram is one bulk packet, so packet boundaries survive the trip
//! the same way they do on a bulk endpoint. The peer socket plays the
//! device.
//!
//! # Example
//!
//! ```ignore
//! use peachyusb::transport::SocketOpener;
//! use peachyusb::{Device, DeviceConfig};
//!
//! let opener = SocketOpener::new("/tmp/peachy-host.sock", "/tmp/peachy-device.sock");
//! let device = Device::open(DeviceConfig::default(), &opener)?;
//! ```

use std::net::Shutdown;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Transport, TransportOpener};
use crate::config::DeviceConfig;
use crate::error::TransportError;
use crate::protocol::Endpoint;

/// Unix datagram [`Transport`].
pub struct SocketTransport {
    socket: UnixDatagram,
    /// Bound socket file, removed on release.
    local_path: Option<PathBuf>,
    released: AtomicBool,
}

impl SocketTransport {
    /// Bind `local` and connect to the device socket at `peer`.
    ///
    /// Removes any stale socket file at `local` before binding.
    pub fn connect(local: impl AsRef<Path>, peer: impl AsRef<Path>) -> std::io::Result<Self> {
        let local = local.as_ref();
        if local.exists() {
            std::fs::remove_file(local)?;
        }

        let socket = UnixDatagram::bind(local)?;
        if let Err(e) = socket.connect(peer) {
            let _ = std::fs::remove_file(local);
            return Err(e);
        }

        Ok(Self {
            socket,
            local_path: Some(local.to_path_buf()),
            released: AtomicBool::new(false),
        })
    }

    /// Wrap an already connected socket.
    pub fn from_datagram(socket: UnixDatagram) -> Self {
        Self {
            socket,
            local_path: None,
            released: AtomicBool::new(false),
        }
    }

    /// Create a transport plus the device end of an unnamed socket pair.
    pub fn pair() -> std::io::Result<(Self, UnixDatagram)> {
        let (host, device) = UnixDatagram::pair()?;
        Ok((Self::from_datagram(host), device))
    }

    fn check_live(&self) -> Result<(), TransportError> {
        if self.released.load(Ordering::Acquire) {
            return Err(TransportError::Released);
        }
        Ok(())
    }

    fn remove_socket_file(&self) {
        if let Some(path) = &self.local_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A zero timeout means wait forever, as with bulk transfers.
fn socket_timeout(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

impl Transport for SocketTransport {
    fn send(
        &self,
        endpoint: Endpoint,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        if endpoint.is_in() {
            return Err(TransportError::InvalidEndpoint(endpoint.address()));
        }
        self.check_live()?;

        self.socket
            .set_write_timeout(socket_timeout(timeout))
            .map_err(TransportError::from_io)?;
        self.socket.send(data).map_err(TransportError::from_io)
    }

    fn receive(
        &self,
        endpoint: Endpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        if endpoint.is_out() {
            return Err(TransportError::InvalidEndpoint(endpoint.address()));
        }
        self.check_live()?;

        self.socket
            .set_read_timeout(socket_timeout(timeout))
            .map_err(TransportError::from_io)?;
        self.socket.recv(buf).map_err(TransportError::from_io)
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.socket.shutdown(Shutdown::Both);
        self.remove_socket_file();
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.remove_socket_file();
    }
}

/// Opens a [`SocketTransport`] between two filesystem socket paths.
#[derive(Debug, Clone)]
pub struct SocketOpener {
    local: PathBuf,
    peer: PathBuf,
}

impl SocketOpener {
    pub fn new(local: impl Into<PathBuf>, peer: impl Into<PathBuf>) -> Self {
        Self {
            local: local.into(),
            peer: peer.into(),
        }
    }
}

impl TransportOpener for SocketOpener {
    fn open(&self, _config: &DeviceConfig) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = SocketTransport::connect(&self.local, &self.peer)
            .map_err(TransportError::from_io)?;
        Ok(Arc::new(transport))
    }
}
