//! Union multiplexer backend (C8): composes other backends by
//! mount-point prefix behind one directory hierarchy.
//!
//! Because every [`Node`] is already a self-describing `Arc<dyn
//! NodeOps>` (see `backend::mod`'s resolved open question on owner
//! identity), a union only ever needs to intercept operations on its
//! *own* synthetic root: once a walk crosses into a mounted backend, the
//! returned node is that backend's own, and every later operation on it
//! dispatches straight there with no union-side bookkeeping at all. This
//! is a deliberate simplification of `spec.md` §4.8's "auxiliary table
//! mapping node pointer to mount" — unnecessary once ownership travels
//! with the node.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::wire::{DMode, OpenMode, Qid, QidType, StatRecord};

use super::{Node, NodeOps};

struct Mount {
    /// Empty string denotes the root mount: a backend whose own root is
    /// overlaid directly onto the union's root, rather than appearing as
    /// a named subdirectory.
    prefix: String,
    root: Node,
}

/// A union of backends, addressed through one synthetic root directory.
pub struct Union {
    mounts: RwLock<Vec<Mount>>,
    next_path: std::sync::atomic::AtomicU64,
}

impl Union {
    pub fn new() -> Self {
        Union { mounts: RwLock::new(Vec::new()), next_path: std::sync::atomic::AtomicU64::new(1) }
    }

    /// Mounts `backend_root` at `prefix`. An empty prefix makes this the
    /// root mount, whose own directory entries are overlaid on `/`.
    pub async fn mount(&self, prefix: impl Into<String>, backend_root: Node) {
        let prefix = prefix.into();
        let mut mounts = self.mounts.write().await;
        mounts.retain(|m| m.prefix != prefix);
        mounts.push(Mount { prefix, root: backend_root });
    }

    pub async fn unmount(&self, prefix: &str) {
        self.mounts.write().await.retain(|m| m.prefix != prefix);
    }

    pub fn root(self: &Arc<Self>) -> Node {
        Node(Arc::new(UnionRoot { union: self.clone() }))
    }
}

impl Default for Union {
    fn default() -> Self {
        Self::new()
    }
}

struct UnionRoot {
    union: Arc<Union>,
}

#[async_trait]
impl NodeOps for UnionRoot {
    fn qid(&self) -> Qid {
        Qid { typ: QidType::DIR, version: 0, path: 0 }
    }

    fn name(&self) -> String {
        String::new()
    }

    fn mode(&self) -> u32 {
        DMode::DIR.bits() | 0o755
    }

    async fn walk(&self, name: &str) -> Result<Node> {
        let mounts = self.union.mounts.read().await;
        if let Some(m) = mounts.iter().find(|m| m.prefix == name) {
            return Ok(m.root.clone());
        }
        if let Some(root_mount) = mounts.iter().find(|m| m.prefix.is_empty()) {
            return root_mount.root.walk(name).await;
        }
        Err(Error::NoEntry)
    }

    async fn open(&self, _mode: OpenMode) -> Result<()> {
        Ok(())
    }

    async fn read(&self, offset: u64, count: u32) -> Result<Vec<u8>> {
        use crate::wire::codec::Encodable;

        let mounts = self.union.mounts.read().await;
        let mut stats = Vec::new();

        if let Some(root_mount) = mounts.iter().find(|m| m.prefix.is_empty()) {
            let raw = root_mount.root.read(0, u32::MAX).await?;
            let mut cursor = std::io::Cursor::new(raw);
            while (cursor.position() as usize) < cursor.get_ref().len() {
                use crate::wire::codec::Decodable;
                stats.push(StatRecord::decode(&mut cursor).map_err(Error::Io)?);
            }
        }
        for m in mounts.iter().filter(|m| !m.prefix.is_empty()) {
            if stats.iter().any(|s| s.name == m.prefix) {
                continue;
            }
            stats.push(StatRecord {
                typ: 0,
                dev: 0,
                qid: Qid {
                    typ: QidType::DIR,
                    version: 0,
                    path: self.union.next_path.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                },
                mode: DMode::DIR.bits() | 0o555,
                atime: 0,
                mtime: 0,
                length: 0,
                name: m.prefix.clone(),
                uid: "none".into(),
                gid: "none".into(),
                muid: "none".into(),
            });
        }
        drop(mounts);

        let mut skip = offset;
        let mut out = Vec::new();
        let mut remaining = count as usize;
        for stat in &stats {
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

    async fn write(&self, _offset: u64, _data: &[u8], _uname: &str) -> Result<u32> {
        Err(Error::IsDir)
    }

    async fn stat(&self) -> Result<StatRecord> {
        Ok(StatRecord {
            typ: 0,
            dev: 0,
            qid: self.qid(),
            mode: self.mode(),
            atime: 0,
            mtime: 0,
            length: 0,
            name: String::new(),
            uid: "none".into(),
            gid: "none".into(),
            muid: "none".into(),
        })
    }

    async fn wstat(&self, _stat: &StatRecord) -> Result<()> {
        Err(Error::NotPermitted)
    }

    async fn create(&self, name: &str, perm: u32, mode: OpenMode, uname: &str) -> Result<Node> {
        let mounts = self.union.mounts.read().await;
        match mounts.iter().find(|m| m.prefix.is_empty()) {
            Some(root_mount) => root_mount.root.create(name, perm, mode, uname).await,
            None => Err(Error::NotPermitted),
        }
    }

    async fn remove(&self) -> Result<()> {
        Err(Error::NotPermitted)
    }

    async fn clunk(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memfs::MemFs;
    use crate::wire::OpenSubMode;

    fn read_mode() -> OpenMode {
        OpenMode { submode: OpenSubMode::Read, truncate: false, rclose: false }
    }

    #[tokio::test]
    async fn root_listing_combines_root_mount_and_named_mounts() {
        let union = Arc::new(Union::new());
        let data_fs = MemFs::new();
        data_fs.root().create("x", 0o644, read_mode(), "u").await.unwrap();
        union.mount("", data_fs.root()).await;

        let ctl_fs = MemFs::new();
        union.mount("ctl", ctl_fs.root()).await;

        let root = union.root();
        let listing = root.read(0, 4096).await.unwrap();
        let mut cursor = std::io::Cursor::new(&listing[..]);
        let mut names = Vec::new();
        while (cursor.position() as usize) < listing.len() {
            use crate::wire::codec::Decodable;
            let stat: StatRecord = Decodable::decode(&mut cursor).unwrap();
            names.push(stat.name);
        }
        assert!(names.contains(&"x".to_string()));
        assert!(names.contains(&"ctl".to_string()));
    }

    #[tokio::test]
    async fn walk_into_named_mount_reaches_child_backend_directly() {
        let union = Arc::new(Union::new());
        let ctl_fs = MemFs::new();
        ctl_fs.root().create("status", 0o644, read_mode(), "u").await.unwrap();
        union.mount("ctl", ctl_fs.root()).await;

        let root = union.root();
        let ctl = root.walk("ctl").await.unwrap();
        let status = ctl.walk("status").await.unwrap();
        assert_eq!(status.name(), "status");
    }

    #[tokio::test]
    async fn walk_falls_through_to_root_mount() {
        let union = Arc::new(Union::new());
        let data_fs = MemFs::new();
        data_fs.root().create("x", 0o644, read_mode(), "u").await.unwrap();
        union.mount("", data_fs.root()).await;

        let root = union.root();
        let found = root.walk("x").await.unwrap();
        assert_eq!(found.name(), "x");
    }
}
