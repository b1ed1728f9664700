//! Dedicated writer thread that drains the outbound queue into the transport.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► OutboundQueue ─► Writer Thread ─► Transport::send
//! Caller N ─┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start──► Running ──request_stop──► Draining ──loop exits──► Stopped
//! ```
//!
//! A worker is only ever started with a live transport. Stopping closes the
//! queue, which wakes a writer parked on an empty queue, so `stop()` always
//! returns. When the thread exits, on any path including a panic, it closes
//! the queue and releases the transport exactly once.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{PeachyError, Result, TransportError};
use crate::protocol::{Endpoint, DEFAULT_TRANSFER_TIMEOUT, MAX_PAYLOAD};
use crate::queue::OutboundQueue;
use crate::transport::Transport;

/// Name given to the writer OS thread.
pub const WRITER_THREAD_NAME: &str = "peachyusb-writer";

/// Configuration for the writer thread.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Endpoint every packet is sent to.
    pub endpoint: Endpoint,
    /// Timeout for a single send.
    pub send_timeout: Duration,
    /// Deliver packets still queued when stop is requested.
    pub drain_on_stop: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::BULK_OUT,
            send_timeout: DEFAULT_TRANSFER_TIMEOUT,
            drain_on_stop: true,
        }
    }
}

/// Observable writer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriterState {
    /// No thread was started.
    Idle = 0,
    Running = 1,
    /// Stop requested, loop still finishing.
    Draining = 2,
    /// Thread finished and the transport was released.
    Stopped = 3,
}

impl WriterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Snapshot of writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// Sends that failed; the writer moved on to the next packet.
    pub send_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

/// State shared between the worker handle and its thread.
#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WriterState::Idle as u8),
            stop: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    #[inline]
    fn state(&self) -> WriterState {
        WriterState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: WriterState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Handle to the writer thread.
///
/// Dropping the handle stops and joins the thread.
pub struct WriterWorker {
    queue: Arc<OutboundQueue>,
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl WriterWorker {
    /// Start the writer thread.
    ///
    /// Fails with `TransportUnavailable` when `transport` is `None`; in that
    /// case no thread is spawned. If the thread cannot be spawned the
    /// transport is released before `Spawn` is returned.
    pub fn start(
        queue: Arc<OutboundQueue>,
        transport: Option<Arc<dyn Transport>>,
        config: WriterConfig,
    ) -> Result<Self> {
        let transport = transport
            .ok_or(PeachyError::TransportUnavailable(TransportError::NotFound))?;

        let shared = Arc::new(Shared::new());
        shared.set_state(WriterState::Running);

        let thread_queue = Arc::clone(&queue);
        let thread_shared = Arc::clone(&shared);
        let thread_transport = Arc::clone(&transport);
        let join = std::thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || writer_loop(thread_queue, thread_transport, thread_shared, config))
            .map_err(|e| spawn_failed(transport.as_ref(), &shared, e))?;

        tracing::debug!(capacity = queue.capacity(), "writer started");

        Ok(Self {
            queue,
            shared,
            join: Some(join),
        })
    }

    /// Ask the writer to stop without waiting for it.
    ///
    /// Closes the queue so a writer parked on an empty queue wakes up.
    pub fn request_stop(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.shared.state.compare_exchange(
            WriterState::Running as u8,
            WriterState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.queue.close();
    }

    /// Stop the writer and wait for its thread to exit.
    ///
    /// Calling this again is a no-op.
    pub fn stop(&mut self) {
        self.request_stop();

        let Some(join) = self.join.take() else {
            return;
        };
        if join.join().is_err() {
            tracing::error!("writer thread panicked");
        }
        tracing::debug!(stats = ?self.stats(), "writer stopped");
    }

    #[inline]
    pub fn state(&self) -> WriterState {
        self.shared.state()
    }

    /// True until the writer thread has finished.
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self.state(), WriterState::Running | WriterState::Draining)
    }

    pub fn stats(&self) -> WriterStats {
        let counters = &self.shared.counters;
        WriterStats {
            packets_sent: counters.packets_sent.load(Ordering::Acquire),
            bytes_sent: counters.bytes_sent.load(Ordering::Acquire),
            send_errors: counters.send_errors.load(Ordering::Acquire),
        }
    }
}

impl Drop for WriterWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// No thread owns the transport, so release it here.
fn spawn_failed(transport: &dyn Transport, shared: &Shared, e: std::io::Error) -> PeachyError {
    tracing::error!("failed to spawn writer thread: {}", e);
    transport.release();
    shared.set_state(WriterState::Idle);
    PeachyError::Spawn(e)
}

/// Closes the queue, releases the transport and marks the writer stopped
/// when the thread exits, whether the loop returned or unwound.
///
/// After an unwind nothing drains the queue again, so it is closed here and
/// parked producers get `QueueClosed`.
struct ReleaseGuard {
    queue: Arc<OutboundQueue>,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("writer thread unwinding, closing queue");
        }
        self.queue.close();
        self.transport.release();
        self.shared.set_state(WriterState::Stopped);
    }
}

/// Main writer loop - dequeues one packet at a time and sends it.
fn writer_loop(
    queue: Arc<OutboundQueue>,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    config: WriterConfig,
) {
    let guard = ReleaseGuard {
        queue,
        transport,
        shared,
    };
    let queue = &guard.queue;
    let mut buf = [0u8; MAX_PAYLOAD];

    loop {
        if guard.shared.stop_requested() && (!config.drain_on_stop || queue.is_empty()) {
            break;
        }

        let len = match queue.dequeue(&mut buf) {
            Ok(len) => len,
            // Closed and drained
            Err(_) => break,
        };

        let counters = &guard.shared.counters;
        match guard
            .transport
            .send(config.endpoint, &buf[..len], config.send_timeout)
        {
            Ok(transferred) => {
                counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                counters
                    .bytes_sent
                    .fetch_add(transferred as u64, Ordering::Relaxed);
            }
            Err(e) => {
                counters.send_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(endpoint = ?config.endpoint, len, "send failed: {}", e);
            }
        }
    }

    let left = queue.len();
    if left > 0 {
        tracing::debug!(discarded = left, "writer exiting with packets still queued");
    }
}
