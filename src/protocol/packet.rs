//! Fixed-size packet, the unit moved through the outbound queue.
//!
//! ```text
//! ┌──────────────────────────────┬────────┐
//! │ data: [u8; 64]               │ len    │
//! │ only data[..len] is defined  │ ≤ 64   │
//! └──────────────────────────────┴────────┘
//! ```

use std::fmt;

use crate::error::{PeachyError, Result};

/// Maximum payload carried by one packet (one full-speed bulk packet).
pub const MAX_PAYLOAD: usize = 64;

/// A bounded payload with an authoritative length.
///
/// Bytes past `len` in the backing buffer carry no meaning and are never
/// exposed.
#[derive(Clone, Copy)]
pub struct Packet {
    data: [u8; MAX_PAYLOAD],
    len: usize,
}

impl Packet {
    /// An empty packet, used to initialize queue slots.
    pub const EMPTY: Packet = Packet {
        data: [0; MAX_PAYLOAD],
        len: 0,
    };

    /// Copy `payload` into a new packet.
    ///
    /// Returns `PayloadTooLarge` if the payload exceeds [`MAX_PAYLOAD`].
    pub fn new(payload: &[u8]) -> Result<Self> {
        check_len(payload.len())?;
        let mut packet = Self::EMPTY;
        packet.overwrite(payload);
        Ok(packet)
    }

    /// Overwrite this packet's contents in place.
    ///
    /// Callers validate the length first with [`check_len`].
    pub(crate) fn overwrite(&mut self, payload: &[u8]) {
        assert!(payload.len() <= MAX_PAYLOAD, "packet overflow");
        self.data[..payload.len()].copy_from_slice(payload);
        self.len = payload.len();
    }

    /// Copy as much of the payload as fits into `buf`.
    ///
    /// Returns the number of bytes copied. Excess bytes are dropped silently.
    #[inline]
    pub fn copy_to(&self, buf: &mut [u8]) -> usize {
        let n = self.len.min(buf.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        n
    }

    /// Declared payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The defined payload bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Reject lengths that cannot fit in a packet.
#[inline]
pub(crate) fn check_len(len: usize) -> Result<()> {
    if len > MAX_PAYLOAD {
        return Err(PeachyError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }
    Ok(())
}

impl Default for Packet {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Packet {}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len)
            .field("data", &self.as_bytes())
            .finish()
    }
}
