//! # peachyusb
//!
//! Host-side driver core for the PeachyUSB bulk device.
//!
//! Callers hand small packets (at most 64 bytes) to a bounded queue and
//! return immediately unless the queue is full. A single dedicated writer
//! thread drains the queue into the device one blocking transfer at a time.
//!
//! ## Architecture
//!
//! - **Queue** ([`OutboundQueue`]): fixed-capacity FIFO, producers block when
//!   full, never drops or overwrites
//! - **Writer** ([`WriterWorker`]): one OS thread per device, send errors are
//!   logged and skipped, stop always wakes it
//! - **Transport** ([`transport::Transport`]): the device channel, opened
//!   before the writer starts and released by it on shutdown
//! - **Device** ([`Device`]): owns all three; reads pass straight through,
//!   or go to a callback on an optional reader thread
//!
//! ## Example
//!
//! ```no_run
//! use peachyusb::transport::SocketOpener;
//! use peachyusb::{Device, DeviceConfig};
//!
//! fn main() -> peachyusb::Result<()> {
//!     let config = DeviceConfig::from_json_file("peachy.json")?;
//!     let opener = SocketOpener::new("/tmp/peachy-host.sock", "/tmp/peachy-device.sock");
//!     let device = Device::open(config, &opener)?;
//!
//!     device.write(&[0x01, 0x02, 0x03])?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = device.read(&mut buf);
//!     println!("read {n} bytes");
//!
//!     device.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod transport;
pub mod writer;

mod device;
mod reader;

pub use config::DeviceConfig;
pub use device::{Device, PacketSender};
pub use error::{PeachyError, Result, TransportError};
pub use protocol::{Packet, MAX_PAYLOAD};
pub use queue::OutboundQueue;
pub use writer::{WriterConfig, WriterState, WriterStats, WriterWorker};
