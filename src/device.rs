//! Device handle and producer handles.
//!
//! A [`Device`] bundles the outbound queue, the transport it was opened
//! with, and the writer thread draining one into the other. It is an owned
//! value: several devices can coexist, and dropping one shuts it down.
//!
//! Inbound data is pulled with [`Device::read`], or pushed to a callback by
//! an optional reader thread installed with [`Device::set_read_callback`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use peachyusb::transport::MemoryTransport;
//! use peachyusb::{Device, DeviceConfig};
//!
//! let transport = Arc::new(MemoryTransport::new());
//! transport.push_inbound(&b"ready"[..]);
//!
//! let device = Device::open(DeviceConfig::with_capacity(16), &transport.opener()).unwrap();
//!
//! let mut buf = [0u8; 64];
//! let n = device.read(&mut buf);
//! assert_eq!(&buf[..n], b"ready");
//!
//! device.write(b"layer 1").unwrap();
//! device.shutdown();
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::DeviceConfig;
use crate::error::{PeachyError, Result};
use crate::queue::OutboundQueue;
use crate::reader::ReaderWorker;
use crate::transport::{Transport, TransportOpener};
use crate::writer::{WriterState, WriterStats, WriterWorker};

/// An open (or detached) PeachyUSB device.
pub struct Device {
    config: DeviceConfig,
    queue: Arc<OutboundQueue>,
    transport: Option<Arc<dyn Transport>>,
    writer: Option<WriterWorker>,
    reader: Option<ReaderWorker>,
}

impl Device {
    /// Open the transport and start the writer thread.
    ///
    /// Fails with `InvalidCapacity` for a zero-slot queue and with
    /// `TransportUnavailable` when the opener cannot produce a transport.
    /// In both cases no thread is started.
    pub fn open<O>(config: DeviceConfig, opener: &O) -> Result<Self>
    where
        O: TransportOpener + ?Sized,
    {
        config.validate()?;
        let queue = Arc::new(OutboundQueue::new(config.queue_capacity)?);

        let transport = opener
            .open(&config)
            .map_err(PeachyError::TransportUnavailable)?;

        let writer = WriterWorker::start(
            Arc::clone(&queue),
            Some(Arc::clone(&transport)),
            config.writer_config(),
        )?;

        tracing::debug!(
            vendor_id = config.vendor_id,
            product_id = config.product_id,
            capacity = config.queue_capacity,
            "device opened"
        );

        Ok(Self {
            config,
            queue,
            transport: Some(transport),
            writer: Some(writer),
            reader: None,
        })
    }

    /// Like [`Device::open`], but an unavailable transport yields a detached
    /// device instead of an error.
    ///
    /// Writes to a detached device are dropped and reads return 0.
    pub fn open_or_detached<O>(config: DeviceConfig, opener: &O) -> Result<Self>
    where
        O: TransportOpener + ?Sized,
    {
        match Self::open(config.clone(), opener) {
            Err(PeachyError::TransportUnavailable(e)) => {
                tracing::warn!("device unavailable, continuing detached: {}", e);
                Self::detached(config)
            }
            other => other,
        }
    }

    /// A device with no transport and no writer thread.
    pub fn detached(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let queue = Arc::new(OutboundQueue::new(config.queue_capacity)?);

        Ok(Self {
            config,
            queue,
            transport: None,
            writer: None,
            reader: None,
        })
    }

    /// Queue one packet for the writer, blocking while the queue is full.
    ///
    /// On a detached device the payload is silently dropped.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        if self.transport.is_none() {
            tracing::trace!(len = payload.len(), "no transport, dropping write");
            return Ok(());
        }
        self.queue.enqueue(payload)
    }

    /// Read directly from the transport's IN endpoint.
    ///
    /// Returns the number of bytes read. A failed transfer and a detached
    /// device both read as 0 bytes. Data beyond `buf.len()` is discarded.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let Some(transport) = &self.transport else {
            return 0;
        };

        match transport.receive(
            self.config.in_endpoint(),
            buf,
            self.config.read_timeout_duration(),
        ) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("read failed: {}", e);
                0
            }
        }
    }

    /// Deliver every inbound packet to `callback` from a reader thread.
    ///
    /// The first call starts the thread, later calls swap the callback. The
    /// thread receives from the IN endpoint with the configured read
    /// timeout and stops at shutdown. While it runs, [`Device::read`]
    /// competes with it for inbound packets. On a detached device the
    /// callback is never called.
    pub fn set_read_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let Some(transport) = &self.transport else {
            tracing::trace!("no transport, ignoring read callback");
            return Ok(());
        };

        if let Some(reader) = &self.reader {
            reader.replace_callback(Box::new(callback));
            return Ok(());
        }

        let reader = ReaderWorker::start(
            Arc::clone(transport),
            self.config.in_endpoint(),
            self.config.read_timeout_duration(),
            Box::new(callback),
        )?;
        self.reader = Some(reader);
        Ok(())
    }

    /// A cloneable producer handle feeding this device's queue.
    pub fn sender(&self) -> PacketSender {
        PacketSender {
            queue: Arc::clone(&self.queue),
            connected: self.transport.is_some(),
        }
    }

    /// Stop the writer, wait for it, and release the device.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(reader) = &self.reader {
            reader.request_stop();
        }
        // Releasing the transport wakes a reader blocked in receive
        if let Some(mut writer) = self.writer.take() {
            writer.stop();
            tracing::debug!("device shut down");
        }
        self.queue.close();
        if let Some(mut reader) = self.reader.take() {
            reader.stop();
        }
        self.transport = None;
    }

    /// True when a transport was opened.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// True while a read callback's thread is running.
    #[inline]
    pub fn is_reading(&self) -> bool {
        self.reader.as_ref().is_some_and(ReaderWorker::is_running)
    }

    pub fn writer_state(&self) -> WriterState {
        self.writer
            .as_ref()
            .map_or(WriterState::Idle, WriterWorker::state)
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer
            .as_ref()
            .map(WriterWorker::stats)
            .unwrap_or_default()
    }

    /// Packets waiting for the writer.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("connected", &self.is_connected())
            .field("writer_state", &self.writer_state())
            .field("reading", &self.is_reading())
            .field("queue", &self.queue)
            .finish()
    }
}

/// Handle for queueing packets from any thread or task.
///
/// This is cheaply cloneable. Senders from a detached device drop every
/// packet, matching [`Device::write`].
#[derive(Clone)]
pub struct PacketSender {
    queue: Arc<OutboundQueue>,
    connected: bool,
}

impl PacketSender {
    /// Queue a packet, blocking while the queue is full.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.queue.enqueue(payload)
    }

    /// Queue a packet, giving up with `Timeout` if no slot frees in time.
    pub fn send_timeout(&self, payload: &[u8], timeout: Duration) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.queue.enqueue_timeout(payload, timeout)
    }

    /// Queue a packet from async code.
    ///
    /// The blocking enqueue runs on tokio's blocking pool, so a full queue
    /// never stalls the runtime's worker threads.
    pub async fn send_async(&self, payload: Bytes) -> Result<()> {
        if !self.connected {
            return Ok(());
        }

        let queue = Arc::clone(&self.queue);
        tokio::task::spawn_blocking(move || queue.enqueue(&payload)).await?
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.queue.is_full()
    }

    /// Get current pending packet count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::protocol::{PRODUCT_ID, VENDOR_ID};
    use crate::transport::MemoryTransport;
    use std::sync::mpsc;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn unavailable(_: &DeviceConfig) -> std::result::Result<Arc<dyn Transport>, TransportError> {
        Err(TransportError::NotFound)
    }

    fn open_memory(config: DeviceConfig) -> (Device, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let device = Device::open(config, &transport.opener()).unwrap();
        (device, transport)
    }

    #[test]
    fn test_open_starts_writer() {
        let (device, transport) = open_memory(DeviceConfig::with_capacity(4));
        assert!(device.is_connected());
        assert_eq!(device.writer_state(), WriterState::Running);

        device.write(b"abc").unwrap();
        assert!(transport.wait_for_sent(1, WAIT));
        assert_eq!(transport.sent()[0].data, Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_open_zero_capacity() {
        let transport = Arc::new(MemoryTransport::new());
        let result = Device::open(DeviceConfig::with_capacity(0), &transport.opener());
        assert!(matches!(result, Err(PeachyError::InvalidCapacity(0))));
    }

    #[test]
    fn test_open_unavailable() {
        let result = Device::open(DeviceConfig::default(), &unavailable);
        assert!(matches!(
            result,
            Err(PeachyError::TransportUnavailable(TransportError::NotFound))
        ));
    }

    #[test]
    fn test_detached_device_is_noop() {
        let device = Device::open_or_detached(DeviceConfig::with_capacity(1), &unavailable).unwrap();
        assert!(!device.is_connected());
        assert_eq!(device.writer_state(), WriterState::Idle);

        // Would block on a one-slot queue if anything were queued
        for _ in 0..3 {
            device.write(b"dropped").unwrap();
        }
        assert_eq!(device.queued(), 0);

        let mut buf = [0xAAu8; 8];
        assert_eq!(device.read(&mut buf), 0);
        assert_eq!(buf, [0xAA; 8]);
        assert_eq!(device.writer_stats(), WriterStats::default());
    }

    #[test]
    fn test_open_or_detached_keeps_other_errors() {
        let result = Device::open_or_detached(DeviceConfig::with_capacity(0), &unavailable);
        assert!(matches!(result, Err(PeachyError::InvalidCapacity(0))));
    }

    #[test]
    fn test_read_passthrough() {
        let (device, transport) = open_memory(DeviceConfig::default());
        transport.push_inbound(&b"status:ok"[..]);

        let mut buf = [0u8; 64];
        let n = device.read(&mut buf);
        assert_eq!(&buf[..n], b"status:ok");
    }

    #[test]
    fn test_read_timeout_returns_zero() {
        let config = DeviceConfig::default().read_timeout(Duration::from_millis(10));
        let (device, _transport) = open_memory(config);

        let mut buf = [0u8; 8];
        assert_eq!(device.read(&mut buf), 0);
    }

    #[test]
    fn test_read_zero_timeout_waits_for_data() {
        let config = DeviceConfig::default().read_timeout(Duration::ZERO);
        let (device, transport) = open_memory(config);

        let pusher = {
            let transport = transport.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                transport.push_inbound(&b"late"[..]);
            })
        };

        let mut buf = [0u8; 8];
        let n = device.read(&mut buf);
        assert_eq!(&buf[..n], b"late");
        pusher.join().unwrap();
    }

    #[test]
    fn test_read_huge_timeout() {
        let config = DeviceConfig::default().read_timeout(Duration::MAX);
        let (device, transport) = open_memory(config);
        transport.push_inbound(&b"ok"[..]);

        let mut buf = [0u8; 8];
        let n = device.read(&mut buf);
        assert_eq!(&buf[..n], b"ok");
    }

    #[test]
    fn test_send_timeout_huge_duration() {
        let (device, transport) = open_memory(DeviceConfig::with_capacity(1));
        device.sender().send_timeout(b"max", Duration::MAX).unwrap();
        assert!(transport.wait_for_sent(1, WAIT));
    }

    #[test]
    fn test_opener_sees_device_identity() {
        let transport = Arc::new(MemoryTransport::new());
        let opener =
            |config: &DeviceConfig| -> std::result::Result<Arc<dyn Transport>, TransportError> {
                if (config.vendor_id, config.product_id) != (VENDOR_ID, PRODUCT_ID) {
                    return Err(TransportError::NotFound);
                }
                Ok(transport.clone() as Arc<dyn Transport>)
            };

        assert!(Device::open(DeviceConfig::default(), &opener).is_ok());

        let other = DeviceConfig {
            vendor_id: 0x1234,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            Device::open(other, &opener),
            Err(PeachyError::TransportUnavailable(TransportError::NotFound))
        ));
    }

    #[test]
    fn test_read_callback_receives_inbound() {
        let (mut device, transport) = open_memory(DeviceConfig::default());
        let (tx, rx) = mpsc::channel();
        device
            .set_read_callback(move |data| {
                let _ = tx.send(data.to_vec());
            })
            .unwrap();
        assert!(device.is_reading());

        transport.push_inbound(&b"layer done"[..]);
        transport.push_inbound(&b"idle"[..]);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), b"layer done");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), b"idle");

        device.shutdown();
        assert_eq!(transport.release_count(), 1);
    }

    #[test]
    fn test_read_callback_unbounded_timeout_shuts_down() {
        let config = DeviceConfig::default().read_timeout(Duration::ZERO);
        let (mut device, transport) = open_memory(config);
        device.set_read_callback(|_| {}).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        device.shutdown();
        assert!(start.elapsed() < WAIT);
        assert_eq!(transport.release_count(), 1);
    }

    #[test]
    fn test_read_callback_detached_is_noop() {
        let mut device = Device::detached(DeviceConfig::default()).unwrap();
        device.set_read_callback(|_| panic!("no data on a detached device")).unwrap();
        assert!(!device.is_reading());
    }

    #[test]
    fn test_shutdown_releases_once() {
        let (device, transport) = open_memory(DeviceConfig::default());
        device.write(b"last").unwrap();
        device.shutdown();

        assert_eq!(transport.sent_payloads(), vec![&b"last"[..]]);
        assert_eq!(transport.release_count(), 1);
    }

    #[test]
    fn test_drop_shuts_down() {
        let (device, transport) = open_memory(DeviceConfig::default());
        let sender = device.sender();
        drop(device);

        assert_eq!(transport.release_count(), 1);
        assert!(matches!(sender.send(b"late"), Err(PeachyError::QueueClosed)));
    }

    #[test]
    fn test_shutdown_idle_device_is_bounded() {
        let (device, transport) = open_memory(DeviceConfig::default());
        std::thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        device.shutdown();
        assert!(start.elapsed() < WAIT);
        assert!(transport.is_released());
    }

    #[test]
    fn test_sender_backpressure() {
        let (device, transport) = open_memory(DeviceConfig::with_capacity(1));
        transport.set_send_delay(Duration::from_millis(200));
        let sender = device.sender();
        assert!(sender.is_connected());

        // One in flight, one queued
        sender.send(b"a").unwrap();
        sender.send(b"b").unwrap();
        assert!(sender.is_backpressure_active());
        assert_eq!(sender.pending_count(), 1);

        let result = sender.send_timeout(b"c", Duration::from_millis(10));
        assert!(matches!(result, Err(PeachyError::Timeout)));
    }

    #[test]
    fn test_detached_sender_drops() {
        let device = Device::detached(DeviceConfig::with_capacity(1)).unwrap();
        let sender = device.sender();
        assert!(!sender.is_connected());
        sender.send(b"x").unwrap();
        sender.send_timeout(b"y", Duration::ZERO).unwrap();
        assert_eq!(sender.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_async() {
        let (device, transport) = open_memory(DeviceConfig::with_capacity(2));
        let sender = device.sender();

        for i in 0u8..5 {
            sender.send_async(Bytes::from(vec![i; 2])).await.unwrap();
        }
        assert!(transport.wait_for_sent(5, WAIT));
        assert_eq!(transport.sent_payloads()[4], Bytes::from_static(&[4, 4]));
    }

    #[tokio::test]
    async fn test_send_async_oversized() {
        let (device, _transport) = open_memory(DeviceConfig::default());
        let result = device.sender().send_async(Bytes::from(vec![0u8; 65])).await;
        assert!(matches!(result, Err(PeachyError::PayloadTooLarge { .. })));
    }
}
