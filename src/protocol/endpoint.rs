//! Bulk endpoint addressing and PeachyUSB device identity.
//!
//! Endpoint addresses follow the USB convention: bit 7 set means the
//! endpoint is an IN (device-to-host) endpoint.

use std::fmt;
use std::time::Duration;

/// PeachyUSB vendor ID.
pub const VENDOR_ID: u16 = 0x16d0;

/// PeachyUSB product ID.
pub const PRODUCT_ID: u16 = 0x0af3;

/// Interface claimed for bulk transfers.
pub const INTERFACE: u8 = 0;

/// Default timeout for a single bulk transfer.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_millis(2000);

/// Direction bit of an endpoint address.
const DIRECTION_IN: u8 = 0x80;

/// Bulk endpoint address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(u8);

impl Endpoint {
    /// Host-to-device bulk endpoint used by the writer.
    pub const BULK_OUT: Endpoint = Endpoint(0x02);

    /// Device-to-host bulk endpoint used by reads.
    pub const BULK_IN: Endpoint = Endpoint(0x83);

    #[inline]
    pub const fn new(address: u8) -> Self {
        Self(address)
    }

    #[inline]
    pub const fn address(self) -> u8 {
        self.0
    }

    /// True for device-to-host endpoints.
    #[inline]
    pub const fn is_in(self) -> bool {
        self.0 & DIRECTION_IN != 0
    }

    #[inline]
    pub const fn is_out(self) -> bool {
        !self.is_in()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint(0x{:02x})", self.0)
    }
}

impl From<u8> for Endpoint {
    fn from(address: u8) -> Self {
        Self(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_direction() {
        assert!(Endpoint::BULK_OUT.is_out());
        assert!(!Endpoint::BULK_OUT.is_in());
        assert!(Endpoint::BULK_IN.is_in());
        assert_eq!(Endpoint::BULK_IN.address(), 0x83);
    }

    #[test]
    fn test_endpoint_debug() {
        assert_eq!(format!("{:?}", Endpoint::BULK_OUT), "Endpoint(0x02)");
    }
}
