//! Optional reader thread that pushes inbound packets to a callback.
//!
//! ```text
//! Transport::receive ─► Reader Thread ─► callback(&[u8])
//! ```
//!
//! The reader never releases the transport; that stays with the writer.
//! It exits when stop is requested or the transport reports `Released`,
//! so a device shuts it down by flagging it, letting the writer release
//! the transport, and then joining it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{PeachyError, Result, TransportError};
use crate::protocol::{Endpoint, MAX_PAYLOAD};
use crate::transport::Transport;

/// Name given to the reader OS thread.
pub const READER_THREAD_NAME: &str = "peachyusb-reader";

/// Pause after a failed receive before trying again.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Callback invoked with each inbound packet.
pub(crate) type ReadCallback = Box<dyn FnMut(&[u8]) + Send>;

struct Shared {
    stop: AtomicBool,
    callback: Mutex<ReadCallback>,
    packets_received: AtomicU64,
}

/// Handle to the reader thread.
pub(crate) struct ReaderWorker {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl ReaderWorker {
    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        endpoint: Endpoint,
        timeout: Duration,
        callback: ReadCallback,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            callback: Mutex::new(callback),
            packets_received: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let join = std::thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || reader_loop(transport, endpoint, timeout, thread_shared))
            .map_err(PeachyError::Spawn)?;

        tracing::debug!(endpoint = ?endpoint, "reader started");

        Ok(Self {
            shared,
            join: Some(join),
        })
    }

    /// Swap the callback used for subsequent packets.
    pub(crate) fn replace_callback(&self, callback: ReadCallback) {
        *self.shared.callback.lock() = callback;
    }

    /// Flag the reader to exit after its current receive returns.
    pub(crate) fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    /// Flag the reader and wait for it.
    ///
    /// Returns once the in-flight receive ends, so callers release the
    /// transport or rely on the receive timeout before joining.
    pub(crate) fn stop(&mut self) {
        self.request_stop();

        let Some(join) = self.join.take() else {
            return;
        };
        if join.join().is_err() {
            tracing::error!("reader thread panicked");
        }
        tracing::debug!(packets = self.packets_received(), "reader stopped");
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    #[inline]
    pub(crate) fn packets_received(&self) -> u64 {
        self.shared.packets_received.load(Ordering::Acquire)
    }
}

impl Drop for ReaderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reader_loop(
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    timeout: Duration,
    shared: Arc<Shared>,
) {
    let mut buf = [0u8; MAX_PAYLOAD];

    while !shared.stop.load(Ordering::Acquire) {
        match transport.receive(endpoint, &mut buf, timeout) {
            // A shut down socket also reads as zero bytes
            Ok(0) => {}
            Ok(n) => {
                shared.packets_received.fetch_add(1, Ordering::Relaxed);
                let mut callback = shared.callback.lock();
                (*callback)(&buf[..n]);
            }
            Err(TransportError::Timeout) => {}
            Err(TransportError::Released) => break,
            Err(e) => {
                tracing::warn!(endpoint = ?endpoint, "receive failed: {}", e);
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}
