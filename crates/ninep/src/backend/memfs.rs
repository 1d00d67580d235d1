//! In-memory tree backend (C5): the reference implementation used for
//! tests and ephemeral scratch data.
//!
//! Grounded on the fid/node bookkeeping style of `rs9p`'s server loop,
//! generalized to own its own tree rather than a host directory. Qid
//! paths are drawn from a monotonically increasing counter shared by
//! the whole backend, per `spec.md` §4.5. All state lives behind one
//! `std::sync::Mutex` per node — operations never block on real I/O, so
//! a plain (non-async) mutex held only for the duration of each call is
//! sufficient, avoiding lock guards that would otherwise need to span
//! `.await` points.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::wire::{dont_touch, DMode, OpenMode, Qid, QidType, StatRecord};

use super::{Node, NodeOps};

struct Inner {
    name: String,
    mode: u32,
    qid: Qid,
    uid: String,
    gid: String,
    data: Vec<u8>,
    children: Vec<Arc<MemNode>>,
    parent: Option<Arc<MemNode>>,
}

impl Inner {
    fn is_dir(&self) -> bool {
        self.mode & DMode::DIR.bits() != 0
    }
}

/// A single in-memory node: a name, mode, qid, an optional byte buffer
/// (files), and a child list (directories). Keeps its own parent link
/// (an `Arc<MemNode>`, not the generic [`Node`]) so `remove` can detach
/// itself without the server needing to pass a parent reference through
/// the capability interface. `self_ref` is the node's own weak handle to
/// itself, captured at construction via `Arc::new_cyclic` so `create`
/// can hand a real `Arc<MemNode>` parent link to new children.
pub struct MemNode {
    inner: Mutex<Inner>,
    next_path: Arc<AtomicU64>,
    self_ref: Weak<MemNode>,
}

impl MemNode {
    fn new_raw(
        next_path: &Arc<AtomicU64>,
        name: &str,
        is_dir: bool,
        perm: u32,
        uid: &str,
        parent: Option<Arc<MemNode>>,
    ) -> Arc<MemNode> {
        let path = next_path.fetch_add(1, Ordering::Relaxed);
        let typ = if is_dir { QidType::DIR } else { QidType::FILE };
        let mode = (perm & 0x1ff) | if is_dir { DMode::DIR.bits() } else { 0 };
        Arc::new_cyclic(|self_ref| MemNode {
            inner: Mutex::new(Inner {
                name: name.to_owned(),
                mode,
                qid: Qid { typ, version: 0, path },
                uid: uid.to_owned(),
                gid: uid.to_owned(),
                data: Vec::new(),
                children: Vec::new(),
                parent,
            }),
            next_path: next_path.clone(),
            self_ref: self_ref.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NodeOps for MemNode {
    fn qid(&self) -> Qid {
        self.lock().qid
    }

    fn name(&self) -> String {
        self.lock().name.clone()
    }

    fn mode(&self) -> u32 {
        self.lock().mode
    }

    async fn walk(&self, name: &str) -> Result<Node> {
        let inner = self.lock();
        if !inner.is_dir() {
            return Err(Error::NotDir);
        }
        inner
            .children
            .iter()
            .find(|c| c.name() == name)
            .map(|c| Node(c.clone()))
            .ok_or(Error::NoEntry)
    }

    async fn open(&self, _mode: OpenMode) -> Result<()> {
        Ok(())
    }

    async fn read(&self, offset: u64, count: u32) -> Result<Vec<u8>> {
        let (is_dir, children, data) = {
            let inner = self.lock();
            (inner.is_dir(), inner.children.clone(), inner.data.clone())
        };
        if is_dir {
            return read_dir_snapshot(&children, offset, count).await;
        }
        let start = offset.min(data.len() as u64) as usize;
        let end = (start + count as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn write(&self, offset: u64, data: &[u8], _uname: &str) -> Result<u32> {
        let mut inner = self.lock();
        if inner.is_dir() {
            return Err(Error::IsDir);
        }
        let end = offset as usize + data.len();
        if inner.data.len() < end {
            inner.data.resize(end, 0);
        }
        inner.data[offset as usize..end].copy_from_slice(data);
        inner.qid.version += 1;
        Ok(data.len() as u32)
    }

    async fn stat(&self) -> Result<StatRecord> {
        let inner = self.lock();
        Ok(StatRecord {
            typ: 0,
            dev: 0,
            qid: inner.qid,
            mode: inner.mode,
            atime: 0,
            mtime: 0,
            length: inner.data.len() as u64,
            name: inner.name.clone(),
            uid: inner.uid.clone(),
            gid: inner.gid.clone(),
            muid: inner.uid.clone(),
        })
    }

    async fn wstat(&self, stat: &StatRecord) -> Result<()> {
        let mut inner = self.lock();
        if !stat.name.is_empty() {
            inner.name = stat.name.clone();
        }
        if stat.mode != dont_touch::U32 {
            inner.mode = (inner.mode & !0x1ff) | (stat.mode & 0x1ff);
        }
        if stat.length != dont_touch::U64 {
            inner.data.resize(stat.length as usize, 0);
        }
        Ok(())
    }

    async fn create(&self, name: &str, perm: u32, mode: OpenMode, uname: &str) -> Result<Node> {
        let mut inner = self.lock();
        if !inner.is_dir() {
            return Err(Error::NotDir);
        }
        if inner.children.iter().any(|c| c.name() == name) {
            return Err(Error::Exists);
        }
        let is_dir = perm & DMode::DIR.bits() != 0;
        let _ = mode;
        drop(inner);
        let parent = self.self_ref.upgrade();
        let child = MemNode::new_raw(&self.next_path, name, is_dir, perm, uname, parent);
        self.lock().children.push(child.clone());
        Ok(Node(child))
    }

    async fn remove(&self) -> Result<()> {
        {
            let inner = self.lock();
            if inner.is_dir() && !inner.children.is_empty() {
                return Err(Error::NotEmpty);
            }
        }
        let parent = self.lock().parent.clone();
        if let Some(parent) = parent {
            let mut pinner = parent.lock();
            let my_path = self.qid().path;
            let before = pinner.children.len();
            pinner.children.retain(|c| c.qid().path != my_path);
            if pinner.children.len() == before {
                return Err(Error::NoEntry);
            }
        }
        Ok(())
    }

    async fn clunk(&self) -> Result<()> {
        Ok(())
    }
}

async fn read_dir_snapshot(children: &[Arc<MemNode>], offset: u64, count: u32) -> Result<Vec<u8>> {
    use crate::wire::codec::Encodable;

    let mut snapshot = Vec::with_capacity(children.len());
    for c in children {
        snapshot.push(NodeOps::stat(c.as_ref()).await?);
    }

    let mut skip = offset;
    let mut out = Vec::new();
    let mut remaining = count as usize;
    for stat in &snapshot {
        let mut encoded = Vec::new();
        stat.encode(&mut encoded).map_err(Error::Io)?;
        if skip > 0 {
            if (skip as usize) >= encoded.len() {
                skip -= encoded.len() as u64;
                continue;
            }
            return Err(Error::BadOffset);
        }
        if encoded.len() > remaining {
            break;
        }
        remaining -= encoded.len();
        out.extend(encoded);
    }
    Ok(out)
}

/// An in-memory backend: owns a long-lived root directory node.
pub struct MemFs {
    root: Arc<MemNode>,
}

impl MemFs {
    pub fn new() -> Self {
        let next_path = Arc::new(AtomicU64::new(1));
        MemFs {
            root: MemNode::new_raw(&next_path, "", true, 0o755, "none", None),
        }
    }

    pub fn root(&self) -> Node {
        Node(self.root.clone())
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::OpenSubMode;

    fn read_mode() -> OpenMode {
        OpenMode { submode: OpenSubMode::Read, truncate: false, rclose: false }
    }

    #[tokio::test]
    async fn create_walk_read_write() {
        let fs = MemFs::new();
        let root = fs.root();
        let file = root.create("hello", 0o644, read_mode(), "u").await.unwrap();
        file.write(0, b"world", "u").await.unwrap();

        let found = root.walk("hello").await.unwrap();
        let data = found.read(0, 1024).await.unwrap();
        assert_eq!(data, b"world");
    }

    #[tokio::test]
    async fn walk_missing_entry_errors() {
        let fs = MemFs::new();
        assert!(matches!(fs.root().walk("nope").await, Err(Error::NoEntry)));
    }

    #[tokio::test]
    async fn directory_read_paginates_without_splitting_records() {
        let fs = MemFs::new();
        let root = fs.root();
        for name in ["a", "b", "c"] {
            root.create(name, 0o644, read_mode(), "u").await.unwrap();
        }
        let all = root.read(0, 4096).await.unwrap();
        let mut cursor = std::io::Cursor::new(&all[..]);
        let mut names = Vec::new();
        while (cursor.position() as usize) < all.len() {
            let stat: StatRecord = {
                use crate::wire::codec::Decodable;
                Decodable::decode(&mut cursor).unwrap()
            };
            names.push(stat.name);
        }
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn create_duplicate_name_rejected() {
        let fs = MemFs::new();
        let root = fs.root();
        root.create("dup", 0o644, read_mode(), "u").await.unwrap();
        assert!(matches!(
            root.create("dup", 0o644, read_mode(), "u").await,
            Err(Error::Exists)
        ));
    }

    #[tokio::test]
    async fn remove_detaches_from_parent() {
        let fs = MemFs::new();
        let root = fs.root();
        let child = root.create("gone", 0o644, read_mode(), "u").await.unwrap();
        child.remove().await.unwrap();
        assert!(matches!(root.walk("gone").await, Err(Error::NoEntry)));
    }

    #[tokio::test]
    async fn remove_rejects_nonempty_directory() {
        let fs = MemFs::new();
        let root = fs.root();
        let mut dir_perm = DMode::DIR.bits();
        dir_perm |= 0o755;
        let dir = root.create("full", dir_perm, read_mode(), "u").await.unwrap();
        dir.create("inside", 0o644, read_mode(), "u").await.unwrap();

        assert!(matches!(dir.remove().await, Err(Error::NotEmpty)));
        assert!(root.walk("full").await.is_ok());
    }

    #[tokio::test]
    async fn remove_allows_empty_directory() {
        let fs = MemFs::new();
        let root = fs.root();
        let mut dir_perm = DMode::DIR.bits();
        dir_perm |= 0o755;
        let dir = root.create("empty", dir_perm, read_mode(), "u").await.unwrap();

        dir.remove().await.unwrap();
        assert!(matches!(root.walk("empty").await, Err(Error::NoEntry)));
    }

    /// Scenario E: a directory read whose `count` is smaller than the
    /// combined size of all records must stop before splitting a record,
    /// returning fewer than all of them rather than a partial one.
    #[tokio::test]
    async fn directory_read_splits_across_calls_without_splitting_a_record() {
        let fs = MemFs::new();
        let root = fs.root();
        // Names chosen so each record's encoded size differs, exercising
        // the boundary check with unequal record lengths.
        for name in ["a", "bb", "ccc"] {
            root.create(name, 0o644, read_mode(), "u").await.unwrap();
        }

        let full = root.read(0, 4096).await.unwrap();
        assert!(full.len() > 0);

        // A count smaller than the total forces `read_dir_snapshot` to
        // stop partway rather than emit a partial record.
        let count = (full.len() - 1) as u32;
        let first = root.read(0, count).await.unwrap();
        assert!(first.len() < full.len());
        assert!(first.len() <= count as usize);

        let rest = root.read(first.len() as u64, 4096).await.unwrap();
        let mut combined = first.clone();
        combined.extend(rest);
        assert_eq!(combined, full);

        let mut cursor = std::io::Cursor::new(&combined[..]);
        let mut names = Vec::new();
        while (cursor.position() as usize) < combined.len() {
            let stat: StatRecord = {
                use crate::wire::codec::Decodable;
                Decodable::decode(&mut cursor).unwrap()
            };
            names.push(stat.name);
        }
        assert_eq!(names, vec!["a", "bb", "ccc"]);
    }
}
