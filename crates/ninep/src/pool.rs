//! Session pool (C11): bounds the number of concurrent connections a
//! server instance accepts, per `spec.md` §4.11.
//!
//! Grounded on `rs9p::srv::srv_async_tcp`/`srv_async_unix`'s
//! accept-loop-plus-`tokio::spawn` pattern, made explicit as a
//! fixed-size slot array instead of an unbounded per-accept spawn so
//! `max_sessions` is actually enforceable rather than advisory.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Free,
    Allocated,
    Connected,
    Disconnecting,
}

/// A fixed-capacity pool of session slots. `alloc` reserves a slot before
/// a connection is accepted (so a burst of accepts can't overrun
/// capacity), `connected` marks it live, and `free` releases it once the
/// connection ends.
pub struct SessionPool {
    slots: Mutex<Vec<SlotState>>,
    capacity: usize,
}

impl SessionPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(SessionPool { slots: Mutex::new(vec![SlotState::Free; capacity]), capacity })
    }

    /// Reserves a free slot, returning its index, or `None` if the pool
    /// is at capacity.
    pub async fn alloc(&self) -> Option<usize> {
        let mut slots = self.slots.lock().await;
        let idx = slots.iter().position(|s| *s == SlotState::Free)?;
        slots[idx] = SlotState::Allocated;
        Some(idx)
    }

    pub async fn connected(&self, idx: usize) {
        self.slots.lock().await[idx] = SlotState::Connected;
        info!("session {idx} connected");
    }

    pub async fn disconnecting(&self, idx: usize) {
        self.slots.lock().await[idx] = SlotState::Disconnecting;
    }

    pub async fn free(&self, idx: usize) {
        self.slots.lock().await[idx] = SlotState::Free;
    }

    pub async fn in_use(&self) -> usize {
        self.slots.lock().await.iter().filter(|s| **s != SlotState::Free).count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Runs `accept` in a loop, allocating a pool slot per iteration and
/// spawning `serve` on whatever `accept` hands back once one becomes
/// available. `accept` is expected to block until a new transport-level
/// connection arrives (e.g. `TcpListener::accept`) and yield the accepted
/// stream. When the pool is full, logs and waits for a slot rather than
/// unboundedly spawning — the generalization of `srv_async_tcp`'s bare
/// `tokio::spawn` per accept that `spec.md` §4.11 asks for.
pub async fn run_accept_loop<S, A, F, Fut>(
    pool: Arc<SessionPool>,
    mut accept: A,
    mut serve: F,
) where
    A: FnMut() -> futures::future::BoxFuture<'static, std::io::Result<S>> + Send,
    F: FnMut(usize, S) -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    loop {
        let idx = loop {
            match pool.alloc().await {
                Some(idx) => break idx,
                None => {
                    warn!("session pool at capacity, waiting for a free slot");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        };
        let stream = match accept().await {
            Ok(stream) => stream,
            Err(e) => {
                pool.free(idx).await;
                warn!("accept failed: {e}");
                continue;
            }
        };
        pool.connected(idx).await;
        let fut = serve(idx, stream);
        let pool = pool.clone();
        tokio::spawn(async move {
            fut.await;
            pool.disconnecting(idx).await;
            pool.free(idx).await;
        });
    }
}
