//! Per-connection tag and fid tables (C2).
//!
//! Grounded on the fid bookkeeping in `rs9p`'s `srv::dispatch_once`
//! (`HashMap<u32, FId<T>>` behind a lock), generalized into explicit,
//! capacity-bounded tables per `spec.md` §4.2: `insert`/`get`/`remove` for
//! fids, `alloc`/`take_cancel`/`complete` for tags, with exhaustion
//! reported rather than growing unbounded.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::backend::Node;
use crate::error::{Error, Result};
use crate::wire::OpenMode;

/// A fid's server-side binding: the node it denotes, its open state (if
/// any), and the connection-scoped username that created it.
#[derive(Clone)]
pub struct FidEntry {
    pub node: Node,
    pub open_mode: Option<OpenMode>,
    pub uname: String,
}

/// Client-chosen, connection-scoped fid numbers mapped to their binding.
/// Fid numbers are sparse and arbitrary, so this is a map, not an array.
pub struct FidTable {
    entries: RwLock<HashMap<u32, FidEntry>>,
    max_fids: usize,
}

impl FidTable {
    pub fn new(max_fids: usize) -> Self {
        FidTable {
            entries: RwLock::new(HashMap::new()),
            max_fids,
        }
    }

    /// Binds `fid` to `entry`. Fails with `FidInUse` if occupied unless
    /// `allow_replace` (used for the "rebind same fid" walk case).
    pub async fn insert(&self, fid: u32, entry: FidEntry, allow_replace: bool) -> Result<()> {
        let mut map = self.entries.write().await;
        if !allow_replace && map.contains_key(&fid) {
            return Err(Error::FidInUse);
        }
        if !map.contains_key(&fid) && map.len() >= self.max_fids {
            return Err(Error::NoSpace);
        }
        map.insert(fid, entry);
        Ok(())
    }

    pub async fn get(&self, fid: u32) -> Result<FidEntry> {
        self.entries
            .read()
            .await
            .get(&fid)
            .cloned()
            .ok_or(Error::UnknownFid)
    }

    pub async fn remove(&self, fid: u32) -> Option<FidEntry> {
        self.entries.write().await.remove(&fid)
    }

    /// Discards every fid. Called on a fresh `Tversion` per I4: all
    /// prior fids on the connection become invalid.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

}

/// A tag in flight: its cancellation handle, wired up to the dispatch
/// task's `tokio::select!` against the backend operation future.
pub struct TagEntry {
    pub cancel: tokio::sync::oneshot::Sender<()>,
}

/// Per-connection table of in-flight request tags, bounding concurrent
/// outstanding requests and providing the handle `Tflush` cancels.
pub struct TagTable {
    entries: RwLock<HashMap<u16, TagEntry>>,
    max_tags: usize,
}

impl TagTable {
    pub fn new(max_tags: usize) -> Self {
        TagTable {
            entries: RwLock::new(HashMap::new()),
            max_tags,
        }
    }

    /// Registers `tag` as in flight. Fails if the tag is already in use
    /// (I3: a tag is unique among in-flight requests) or the table is full.
    pub async fn alloc(&self, tag: u16, cancel: tokio::sync::oneshot::Sender<()>) -> Result<()> {
        let mut map = self.entries.write().await;
        if map.contains_key(&tag) {
            return Err(Error::ProtocolViolation);
        }
        if map.len() >= self.max_tags {
            return Err(Error::NoSpace);
        }
        map.insert(tag, TagEntry { cancel });
        Ok(())
    }

    /// Removes and returns the cancel handle for `tag`, if any is
    /// in-flight — used to implement `Tflush`.
    pub async fn take_cancel(&self, tag: u16) -> Option<tokio::sync::oneshot::Sender<()>> {
        self.entries.write().await.remove(&tag).map(|e| e.cancel)
    }

    /// Atomically claims completion of `tag`: removes it and reports
    /// whether it was still present. Used by the dispatch loop to decide
    /// whether it or a racing `Tflush` won the right to reply — see
    /// `server::Connection::dispatch`.
    pub async fn complete(&self, tag: u16) -> bool {
        self.entries.write().await.remove(&tag).is_some()
    }

    pub async fn is_in_flight(&self, tag: u16) -> bool {
        self.entries.read().await.contains_key(&tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memfs::MemFs;

    fn root_entry() -> FidEntry {
        let fs = MemFs::new();
        FidEntry {
            node: fs.root(),
            open_mode: None,
            uname: "u".into(),
        }
    }

    #[tokio::test]
    async fn fid_alloc_and_lookup() {
        let table = FidTable::new(4);
        table.insert(0, root_entry(), false).await.unwrap();
        assert!(table.get(0).await.is_ok());
        assert!(matches!(table.get(1).await, Err(Error::UnknownFid)));
    }

    #[tokio::test]
    async fn fid_in_use_rejected() {
        let table = FidTable::new(4);
        table.insert(0, root_entry(), false).await.unwrap();
        assert!(matches!(
            table.insert(0, root_entry(), false).await,
            Err(Error::FidInUse)
        ));
        table.insert(0, root_entry(), true).await.unwrap();
    }

    #[tokio::test]
    async fn fid_table_exhaustion() {
        let table = FidTable::new(1);
        table.insert(0, root_entry(), false).await.unwrap();
        assert!(matches!(
            table.insert(1, root_entry(), false).await,
            Err(Error::NoSpace)
        ));
    }

    #[tokio::test]
    async fn clear_discards_all_fids() {
        let table = FidTable::new(4);
        table.insert(0, root_entry(), false).await.unwrap();
        table.clear().await;
        assert!(matches!(table.get(0).await, Err(Error::UnknownFid)));
    }

    #[tokio::test]
    async fn tag_uniqueness_enforced() {
        let table = TagTable::new(4);
        let (tx1, _rx1) = tokio::sync::oneshot::channel();
        let (tx2, _rx2) = tokio::sync::oneshot::channel();
        table.alloc(1, tx1).await.unwrap();
        assert!(matches!(
            table.alloc(1, tx2).await,
            Err(Error::ProtocolViolation)
        ));
    }

    #[tokio::test]
    async fn flush_takes_cancel_handle() {
        let table = TagTable::new(4);
        let (tx, rx) = tokio::sync::oneshot::channel();
        table.alloc(1, tx).await.unwrap();
        let cancel = table.take_cancel(1).await.unwrap();
        cancel.send(()).unwrap();
        assert!(rx.await.is_ok());
        assert!(!table.is_in_flight(1).await);
    }
}
