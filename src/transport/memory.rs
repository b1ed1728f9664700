//! In-process transport that records what the writer sends.
//!
//! Useful as a virtual device: inbound packets are injected with
//! [`MemoryTransport::push_inbound`], outbound packets are captured in send
//! order, and send failures can be scripted.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use peachyusb::{Device, DeviceConfig};
//! use peachyusb::transport::MemoryTransport;
//!
//! let transport = Arc::new(MemoryTransport::new());
//! let device = Device::open(DeviceConfig::default(), &transport.opener()).unwrap();
//!
//! device.write(b"ping").unwrap();
//! device.shutdown();
//!
//! assert_eq!(transport.sent_payloads(), vec![&b"ping"[..]]);
//! assert_eq!(transport.release_count(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use super::{Transport, TransportOpener};
use crate::config::DeviceConfig;
use crate::error::TransportError;
use crate::protocol::Endpoint;

/// A packet captured by [`MemoryTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub endpoint: Endpoint,
    pub data: Bytes,
}

#[derive(Default)]
struct State {
    sent: Vec<SentPacket>,
    inbound: VecDeque<Bytes>,
    fail_sends: usize,
    send_delay: Duration,
    released: bool,
}

/// In-memory [`Transport`].
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
    /// Signalled when inbound data arrives or the transport is released.
    inbound_ready: Condvar,
    /// Signalled after every recorded send.
    sent_changed: Condvar,
    releases: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// An opener that hands out this transport.
    pub fn opener(self: &Arc<Self>) -> impl TransportOpener {
        let transport = Arc::clone(self);
        move |_: &DeviceConfig| -> Result<Arc<dyn Transport>, TransportError> {
            let shared: Arc<dyn Transport> = transport.clone();
            Ok(shared)
        }
    }

    /// Queue a packet for the next `receive` call.
    pub fn push_inbound(&self, data: impl Into<Bytes>) {
        self.state.lock().inbound.push_back(data.into());
        self.inbound_ready.notify_one();
    }

    /// Fail the next `count` sends with an injected error.
    pub fn fail_next_sends(&self, count: usize) {
        self.state.lock().fail_sends = count;
    }

    /// Make every send take at least `delay`, like a slow device.
    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = delay;
    }

    /// Every packet sent so far, in order.
    pub fn sent(&self) -> Vec<SentPacket> {
        self.state.lock().sent.clone()
    }

    /// Payloads of every packet sent so far, in order.
    pub fn sent_payloads(&self) -> Vec<Bytes> {
        self.state.lock().sent.iter().map(|p| p.data.clone()).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// Block until at least `count` packets were sent or `timeout` passes.
    ///
    /// Returns whether the count was reached.
    pub fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.sent.len() < count {
            match deadline {
                Some(deadline) => {
                    if self.sent_changed.wait_until(&mut state, deadline).timed_out() {
                        return state.sent.len() >= count;
                    }
                }
                None => self.sent_changed.wait(&mut state),
            }
        }
        true
    }

    /// How many times `release` was called.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}

/// Deadline for one transfer. Zero waits without bound, as with bulk
/// transfers, and so does a timeout past the end of the clock.
fn transfer_deadline(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        return None;
    }
    Instant::now().checked_add(timeout)
}

impl Transport for MemoryTransport {
    fn send(
        &self,
        endpoint: Endpoint,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        if endpoint.is_in() {
            return Err(TransportError::InvalidEndpoint(endpoint.address()));
        }

        let delay = {
            let mut state = self.state.lock();
            if state.released {
                return Err(TransportError::Released);
            }
            if state.fail_sends > 0 {
                state.fail_sends -= 1;
                return Err(TransportError::Other("injected send failure".to_string()));
            }
            state.send_delay
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.state.lock().sent.push(SentPacket {
            endpoint,
            data: Bytes::copy_from_slice(data),
        });
        self.sent_changed.notify_all();
        Ok(data.len())
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

        let deadline = transfer_deadline(timeout);
        let mut state = self.state.lock();
        loop {
            if state.released {
                return Err(TransportError::Released);
            }
            if let Some(data) = state.inbound.pop_front() {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                return Ok(n);
            }
            match deadline {
                Some(deadline) => {
                    if self.inbound_ready.wait_until(&mut state, deadline).timed_out()
                        && state.inbound.is_empty()
                        && !state.released
                    {
                        return Err(TransportError::Timeout);
                    }
                }
                None => self.inbound_ready.wait(&mut state),
            }
        }
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::AcqRel);
        self.state.lock().released = true;
        self.inbound_ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[test]
    fn test_send_records_packets() {
        let transport = MemoryTransport::new();
        assert_eq!(transport.send(Endpoint::BULK_OUT, b"abc", TIMEOUT).unwrap(), 3);
        transport.send(Endpoint::BULK_OUT, b"de", TIMEOUT).unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].endpoint, Endpoint::BULK_OUT);
        assert_eq!(sent[0].data, Bytes::from_static(b"abc"));
        assert_eq!(transport.sent_payloads()[1], Bytes::from_static(b"de"));
    }

    #[test]
    fn test_send_rejects_in_endpoint() {
        let transport = MemoryTransport::new();
        let result = transport.send(Endpoint::BULK_IN, b"x", TIMEOUT);
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(0x83))));
    }

    #[test]
    fn test_injected_failures() {
        let transport = MemoryTransport::new();
        transport.fail_next_sends(2);

        assert!(transport.send(Endpoint::BULK_OUT, b"1", TIMEOUT).is_err());
        assert!(transport.send(Endpoint::BULK_OUT, b"2", TIMEOUT).is_err());
        assert!(transport.send(Endpoint::BULK_OUT, b"3", TIMEOUT).is_ok());
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_receive_pending_data() {
        let transport = MemoryTransport::new();
        transport.push_inbound(&b"status"[..]);

        let mut buf = [0u8; 16];
        let n = transport.receive(Endpoint::BULK_IN, &mut buf, TIMEOUT).unwrap();
        assert_eq!(&buf[..n], b"status");
    }

    #[test]
    fn test_receive_truncates() {
        let transport = MemoryTransport::new();
        transport.push_inbound(vec![7u8; 32]);

        let mut buf = [0u8; 4];
        assert_eq!(transport.receive(Endpoint::BULK_IN, &mut buf, TIMEOUT).unwrap(), 4);
    }

    #[test]
    fn test_receive_times_out() {
        let transport = MemoryTransport::new();
        let mut buf = [0u8; 4];
        let result = transport.receive(Endpoint::BULK_IN, &mut buf, TIMEOUT);
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    #[test]
    fn test_receive_zero_timeout_waits_for_data() {
        let transport = Arc::new(MemoryTransport::new());

        let pusher = {
            let transport = transport.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                transport.push_inbound(&b"late"[..]);
            })
        };

        let mut buf = [0u8; 8];
        let n = transport
            .receive(Endpoint::BULK_IN, &mut buf, Duration::ZERO)
            .unwrap();
        assert_eq!(&buf[..n], b"late");
        pusher.join().unwrap();
    }

    #[test]
    fn test_receive_zero_timeout_wakes_on_release() {
        let transport = Arc::new(MemoryTransport::new());

        let reader = {
            let transport = transport.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 8];
                transport.receive(Endpoint::BULK_IN, &mut buf, Duration::ZERO)
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        transport.release();
        assert!(matches!(reader.join().unwrap(), Err(TransportError::Released)));
    }

    #[test]
    fn test_receive_huge_timeout() {
        let transport = MemoryTransport::new();
        transport.push_inbound(&b"now"[..]);

        let mut buf = [0u8; 8];
        let n = transport
            .receive(Endpoint::BULK_IN, &mut buf, Duration::MAX)
            .unwrap();
        assert_eq!(&buf[..n], b"now");
        assert!(transport.wait_for_sent(0, Duration::MAX));
    }

    #[test]
    fn test_release_blocks_further_io() {
        let transport = MemoryTransport::new();
        transport.release();

        assert!(transport.is_released());
        assert_eq!(transport.release_count(), 1);
        assert!(matches!(
            transport.send(Endpoint::BULK_OUT, b"x", TIMEOUT),
            Err(TransportError::Released)
        ));
    }

    #[test]
    fn test_wait_for_sent() {
        let transport = Arc::new(MemoryTransport::new());
        assert!(!transport.wait_for_sent(1, Duration::from_millis(10)));

        let sender = {
            let transport = transport.clone();
            std::thread::spawn(move || {
                transport.send(Endpoint::BULK_OUT, b"late", TIMEOUT).unwrap();
            })
        };

        assert!(transport.wait_for_sent(1, Duration::from_secs(5)));
        sender.join().unwrap();
    }

    #[test]
    fn test_opener_shares_transport() {
        let transport = Arc::new(MemoryTransport::new());
        let opened = transport.opener().open(&DeviceConfig::default()).unwrap();
        opened.send(Endpoint::BULK_OUT, b"shared", TIMEOUT).unwrap();
        assert_eq!(transport.sent_count(), 1);
    }
}
