//! Stream-discipline transport adapter: drives a [`crate::server::Connection`]
//! over any `AsyncRead + AsyncWrite` byte stream (TCP, Unix domain
//! sockets, or an in-memory `tokio::io::duplex` pair in tests).
//!
//! Grounded on `rs9p::srv::srv_async_tcp`/`srv_async_unix`, which spawn
//! one task per accepted connection and drive it with a length-delimited
//! frame codec; this adapter performs the same accept-then-serve role but
//! frames with the explicit [`crate::framer::Framer`] state machine
//! instead, since a 9P frame's own 4-byte size prefix already gives the
//! framer everything a generic length-delimited codec would add.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::backend::Node;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::framer::Framer;
use crate::server::Connection;

use super::TransportAdapter;

/// A transport handle over a split stream's write half, used by callers
/// that need the `TransportAdapter` surface (e.g. to push an
/// out-of-band message). `serve` below is the usual entry point and
/// owns this internally.
pub struct StreamTransport {
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl TransportAdapter for StreamTransport {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.out_tx.send(frame).map_err(|_| Error::TransportClosed)
    }

    fn get_mtu(&self) -> Option<u32> {
        None
    }
}

/// Drives one connection to completion: reads bytes from `stream`,
/// frames them, dispatches each message against `root`, and writes
/// replies back, until the stream is closed or a framing violation
/// occurs. Returns once the connection has fully shut down.
pub async fn serve<S>(stream: S, root: Node, config: Config) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let max_message_size = config.max_message_size;
    let conn = Connection::new(root, config, out_tx.clone());
    let _transport = StreamTransport { out_tx };

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                warn!("stream transport write failed: {e}");
                break;
            }
        }
    });

    let mut framer = Framer::new(max_message_size);
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("stream transport read failed: {e}");
                break;
            }
        };
        let (frames, result) = framer.push(&buf[..n]);
        for frame in frames {
            if let Err(e) = conn.on_message(&frame) {
                debug!("dropping malformed frame: {e}");
            }
        }
        if let Err(e) = result {
            warn!("framing violation, closing connection: {e}");
            break;
        }
    }

    drop(conn);
    writer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memfs::MemFs;
    use crate::wire::codec::{decode_msg, encode_msg};
    use crate::wire::fcall::{FCall, Msg};
    use crate::wire::{P92000, NOTAG};
    use tokio::io::{duplex, AsyncReadExt as _, AsyncWriteExt as _};

    #[tokio::test]
    async fn version_roundtrip_over_duplex_stream() {
        let (client, server) = duplex(4096);
        let root = MemFs::new().root();
        let config = Config::default();
        tokio::spawn(serve(server, root, config));

        let (mut client_rx, mut client_tx) = tokio::io::split(client);

        let req = Msg { tag: NOTAG, body: FCall::TVersion { msize: 8192, version: P92000.to_owned() } };
        client_tx.write_all(&encode_msg(&req).unwrap()).await.unwrap();

        let mut size_buf = [0u8; 4];
        client_rx.read_exact(&mut size_buf).await.unwrap();
        let total = u32::from_le_bytes(size_buf) as usize;
        let mut rest = vec![0u8; total - 4];
        client_rx.read_exact(&mut rest).await.unwrap();

        let mut full = size_buf.to_vec();
        full.extend(rest);
        let reply = decode_msg(&full[4..]).unwrap();
        assert!(matches!(reply.body, FCall::RVersion { msize: 8192, .. }));
    }
}
