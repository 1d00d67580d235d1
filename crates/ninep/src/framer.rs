//! Extracts complete 9P messages from a byte stream, independent of how
//! the underlying transport chunked its deliveries.
//!
//! A stream transport (TCP, UART) feeds bytes in arbitrary-sized chunks
//! through [`Framer::push`]; a datagram-style transport (CoAP, L2CAP)
//! that already delivers one complete message per call can skip the
//! framer and hand its payload straight to [`crate::wire::codec::decode_msg`].

use bytes::BytesMut;
use log::trace;

use crate::error::{Error, Result};

const SIZE_FIELD_LEN: usize = 4;

#[derive(Debug, PartialEq, Eq)]
enum State {
    WaitSize,
    WaitBody { size: u32 },
}

/// A two-state framer: `WaitSize` accumulates the 4-byte length prefix,
/// `WaitBody` accumulates until that many bytes (including the prefix)
/// have arrived.
#[derive(Debug)]
pub struct Framer {
    state: State,
    buf: BytesMut,
    max_message_size: u32,
}

impl Framer {
    pub fn new(max_message_size: u32) -> Self {
        Framer {
            state: State::WaitSize,
            buf: BytesMut::new(),
            max_message_size,
        }
    }

    /// Feed newly arrived bytes in. Returns every complete message frame
    /// (including its 4-byte size prefix) that became available, in
    /// order, alongside the outcome of framing the rest of the chunk. A
    /// size violation resets to `WaitSize` and discards the partial
    /// buffer, but any frames already extracted earlier in this same call
    /// are still returned — they decoded cleanly and must still reach the
    /// caller, per the component contract ("exactly once each").
    pub fn push(&mut self, chunk: &[u8]) -> (Vec<Vec<u8>>, Result<()>) {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                State::WaitSize => {
                    if self.buf.len() < SIZE_FIELD_LEN {
                        break;
                    }
                    let size = u32::from_le_bytes(self.buf[..SIZE_FIELD_LEN].try_into().unwrap());
                    if size < crate::wire::MIN_MESSAGE_SIZE || size > self.max_message_size {
                        trace!("framer: size violation ({size}), resetting");
                        self.buf.clear();
                        self.state = State::WaitSize;
                        return (frames, Err(Error::MalformedMessage));
                    }
                    self.state = State::WaitBody { size };
                }
                State::WaitBody { size } => {
                    if (self.buf.len() as u32) < size {
                        break;
                    }
                    let frame = self.buf.split_to(size as usize).to_vec();
                    frames.push(frame);
                    self.state = State::WaitSize;
                }
            }
        }

        (frames, Ok(()))
    }
}
