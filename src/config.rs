//! Device configuration.
//!
//! Every field has a default matching the PeachyUSB hardware, so a JSON
//! file only needs the values it changes:
//!
//! ```
//! use peachyusb::DeviceConfig;
//!
//! let config = DeviceConfig::from_json_str(r#"{ "queue_capacity": 8 }"#).unwrap();
//! assert_eq!(config.queue_capacity, 8);
//! assert_eq!(config.out_endpoint, 0x02);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PeachyError, Result};
use crate::protocol::{Endpoint, DEFAULT_TRANSFER_TIMEOUT, INTERFACE, PRODUCT_ID, VENDOR_ID};
use crate::writer::WriterConfig;

/// Default number of packet slots in the outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Configuration for a [`Device`](crate::Device).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Outbound queue slots (must be at least 1).
    pub queue_capacity: usize,
    /// USB vendor id a hardware opener matches during discovery.
    pub vendor_id: u16,
    /// USB product id a hardware opener matches during discovery.
    pub product_id: u16,
    /// Interface a hardware opener claims. Openers that do not talk to USB,
    /// such as [`SocketOpener`](crate::transport::SocketOpener), ignore the
    /// identity fields.
    pub interface: u8,
    /// Bulk endpoint the writer sends to.
    pub out_endpoint: u8,
    /// Bulk endpoint reads come from.
    pub in_endpoint: u8,
    /// Per-transfer timeout for writer sends, in milliseconds (0 = unbounded).
    pub write_timeout_ms: u64,
    /// Per-transfer timeout for reads, in milliseconds (0 = unbounded).
    pub read_timeout_ms: u64,
    /// Deliver packets still queued at shutdown before stopping.
    pub drain_on_stop: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            interface: INTERFACE,
            out_endpoint: Endpoint::BULK_OUT.address(),
            in_endpoint: Endpoint::BULK_IN.address(),
            write_timeout_ms: millis(DEFAULT_TRANSFER_TIMEOUT),
            read_timeout_ms: millis(DEFAULT_TRANSFER_TIMEOUT),
            drain_on_stop: true,
        }
    }
}

impl DeviceConfig {
    /// Default configuration with a specific queue capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue_capacity: capacity,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the per-transfer write timeout. Values past `u64::MAX`
    /// milliseconds saturate.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = millis(timeout);
        self
    }

    /// Set the per-transfer read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = millis(timeout);
        self
    }

    /// Choose whether shutdown delivers queued packets first.
    pub fn drain_on_stop(mut self, drain: bool) -> Self {
        self.drain_on_stop = drain;
        self
    }

    /// Reject values no device can be created with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(PeachyError::InvalidCapacity(self.queue_capacity));
        }
        Ok(())
    }

    #[inline]
    pub fn write_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    #[inline]
    pub fn read_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[inline]
    pub fn out_endpoint(&self) -> Endpoint {
        Endpoint::new(self.out_endpoint)
    }

    #[inline]
    pub fn in_endpoint(&self) -> Endpoint {
        Endpoint::new(self.in_endpoint)
    }

    /// Writer settings derived from this configuration.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            endpoint: self.out_endpoint(),
            send_timeout: self.write_timeout_duration(),
            drain_on_stop: self.drain_on_stop,
        }
    }
}

#[inline]
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
