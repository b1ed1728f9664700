//! Protocol module - packet representation and endpoint addressing.
//!
//! The only in-process protocol is the packet boundary: a payload of at
//! most [`MAX_PAYLOAD`] bytes plus an explicit length. Transfer semantics
//! beyond that belong to the [`Transport`](crate::transport::Transport).

mod endpoint;
mod packet;

pub use endpoint::{
    Endpoint, DEFAULT_TRANSFER_TIMEOUT, INTERFACE, PRODUCT_ID, VENDOR_ID,
};
pub use packet::{Packet, MAX_PAYLOAD};

pub(crate) use packet::check_len;
