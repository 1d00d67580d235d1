//! The filesystem capability interface (C4) and its composable
//! implementations (C5–C9).
//!
//! Collapses `spec.md`'s separate "backend" and "node" concepts into one
//! object-safe [`NodeOps`] trait implemented per concrete node, so that
//! every [`Node`] already knows how to serve itself — resolving the
//! open question about attaching owner identity at creation (see
//! `DESIGN.md`, "RESOLVED OPEN QUESTION 2"): union and service-registry
//! delegation is direct trait-object dispatch, never a "try every
//! backend" probe.

pub mod dynfs;
pub mod memfs;
pub mod passthrough;
pub mod srv_registry;
pub mod union;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::wire::{OpenMode, Qid, StatRecord};

/// Operations a backend exposes to the server, per `spec.md` §4.4. Every
/// method is scoped to the node it's called on; `walk`/`create` produce
/// new `Node`s, `clunk` signals navigation ownership has ended (the
/// server never frees a node itself).
#[async_trait]
pub trait NodeOps: Send + Sync {
    fn qid(&self) -> Qid;

    fn name(&self) -> String;

    /// 9P mode bits (DMDIR et al. plus the rwx triads).
    fn mode(&self) -> u32;

    /// Looks up a single path component among this node's children.
    async fn walk(&self, name: &str) -> Result<Node>;

    /// Validates access for the given mode; backends that buffer writes
    /// (passthrough) open their underlying handle here.
    async fn open(&self, mode: OpenMode) -> Result<()>;

    /// For a directory node, returns consecutive encoded stat records
    /// per the directory-read semantics in `spec.md` §4.4: each read is
    /// a pure function of `offset`, snapshotting the child list for the
    /// duration of this single call (see DESIGN.md, resolved open
    /// question 1).
    async fn read(&self, offset: u64, count: u32) -> Result<Vec<u8>>;

    async fn write(&self, offset: u64, data: &[u8], uname: &str) -> Result<u32>;

    async fn stat(&self) -> Result<StatRecord>;

    /// Applies a `Twstat`; sentinel "don't touch" fields (see
    /// `wire::dont_touch`) are left unchanged.
    async fn wstat(&self, stat: &StatRecord) -> Result<()>;

    async fn create(
        &self,
        name: &str,
        perm: u32,
        mode: OpenMode,
        uname: &str,
    ) -> Result<Node>;

    async fn remove(&self) -> Result<()>;

    /// Best-effort; never fails from the protocol's perspective (the
    /// fid is released by the server regardless of the outcome here).
    async fn clunk(&self) -> Result<()>;
}

/// A reference-counted handle to a backend-owned node. Cloning a `Node`
/// is cheap (an `Arc` bump) and is how the server hands the same node to
/// multiple fids (e.g. a zero-component `Twalk` fid clone).
#[derive(Clone)]
pub struct Node(pub Arc<dyn NodeOps>);

impl Node {
    pub fn new(ops: impl NodeOps + 'static) -> Self {
        Node(Arc::new(ops))
    }
}

impl std::ops::Deref for Node {
    type Target = dyn NodeOps;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("qid", &self.qid()).field("name", &self.name()).finish()
    }
}
