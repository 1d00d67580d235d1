//! Transport adapter contract (C12): the boundary between a connection's
//! `Framer`/`Connection` pair and whatever actually carries bytes —
//! stream sockets, datagram transports, or an in-process channel.
//!
//! `spec.md` §1/§4.12 names the concrete wire drivers for CoAP, L2CAP,
//! and UART out of scope; only the trait boundary and the two
//! teacher-stack-native implementations below (`stream`, `memory`) are
//! built here.

pub mod memory;
pub mod stream;

use async_trait::async_trait;

use crate::error::Result;

/// A transport's control surface, independent of how it frames or
/// delivers bytes. `send` takes one already-framed outgoing message
/// (produced by [`crate::wire::codec::encode_msg`]); incoming frames are
/// delivered to a [`crate::server::Connection`] by whatever drives this
/// adapter (see `stream::serve`).
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn send(&self, frame: Vec<u8>) -> Result<()>;

    /// Maximum payload this transport can carry in one delivery, if
    /// bounded (e.g. an L2CAP MTU or a CoAP block size). `None` for
    /// transports with no such ceiling beyond `Config::max_message_size`.
    fn get_mtu(&self) -> Option<u32>;
}
