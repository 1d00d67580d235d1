//! In-process transport adapters: no real socket, just `tokio::sync::mpsc`
//! channels. Used by integration tests and by [`crate::namespace`] to
//! drive a backend without a transport.
//!
//! `MemoryTransport` models a datagram transport that already delivers
//! one complete message per send (CoAP, a single L2CAP PDU): unlike
//! `transport::stream`, there is no `Framer` on the receive side because
//! there is nothing to reassemble. `CreditTransport` layers an L2CAP-style
//! credit-based flow-control discipline on top: each `send` consumes one
//! credit, and the peer must periodically replenish credits or sends
//! block. Neither models a concrete wire protocol; per `spec.md` §1/§4.12
//! the actual CoAP/L2CAP/UART drivers stay out of scope.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use crate::error::{Error, Result};

use super::TransportAdapter;

/// One end of an in-process datagram pipe. `send` hands a complete frame
/// to the peer's receiver in one atomic step.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    mtu: Option<u32>,
}

impl MemoryTransport {
    /// Builds a connected pair: the returned receiver gets exactly what
    /// is passed to `send`, one item per call.
    pub fn pair(mtu: Option<u32>) -> (MemoryTransport, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemoryTransport { tx, mtu }, rx)
    }
}

#[async_trait]
impl TransportAdapter for MemoryTransport {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        if let Some(mtu) = self.mtu {
            if frame.len() as u32 > mtu {
                return Err(Error::MessageTooLarge);
            }
        }
        self.tx.send(frame).map_err(|_| Error::TransportClosed)
    }

    fn get_mtu(&self) -> Option<u32> {
        self.mtu
    }
}

/// A `MemoryTransport` gated by a credit window: `send` blocks until a
/// credit is available and consumes it; `grant_credits` replenishes the
/// window, the way an L2CAP peer periodically sends `LE Flow Control
/// Credit` updates.
pub struct CreditTransport {
    inner: MemoryTransport,
    credits: Arc<Semaphore>,
}

impl CreditTransport {
    pub fn pair(mtu: Option<u32>, initial_credits: usize) -> (CreditTransport, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (inner, rx) = MemoryTransport::pair(mtu);
        (CreditTransport { inner, credits: Arc::new(Semaphore::new(initial_credits)) }, rx)
    }

    pub fn grant_credits(&self, n: usize) {
        self.credits.add_permits(n);
    }

    pub fn available_credits(&self) -> usize {
        self.credits.available_permits()
    }
}

#[async_trait]
impl TransportAdapter for CreditTransport {
    async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }

    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        let permit = self
            .credits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::TransportClosed)?;
        permit.forget();
        self.inner.send(frame).await
    }

    fn get_mtu(&self) -> Option<u32> {
        self.inner.get_mtu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn datagram_framing() {
        let (transport, mut rx) = MemoryTransport::pair(Some(16));
        transport.send(b"one".to_vec()).await.unwrap();
        transport.send(b"two".to_vec()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"one");
        assert_eq!(rx.recv().await.unwrap(), b"two");

        let oversized = vec![0u8; 32];
        assert!(matches!(transport.send(oversized).await, Err(Error::MessageTooLarge)));
    }

    #[tokio::test]
    async fn credit_window() {
        let (transport, mut rx) = CreditTransport::pair(None, 1);
        transport.send(b"first".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"first");
        assert_eq!(transport.available_credits(), 0);

        let transport = Arc::new(transport);
        let blocked = transport.clone();
        let handle = tokio::spawn(async move { blocked.send(b"second".to_vec()).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        transport.grant_credits(1);
        handle.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"second");
    }
}
