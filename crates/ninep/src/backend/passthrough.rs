//! Passthrough backend (C6): serves a real host directory tree.
//!
//! Grounded on `unpfs`'s `Unpfs`/`UnpfsFId` (qid path from inode via
//! `MetadataExt::ino()`, `UNIX_FLAGS` masking of client-supplied open
//! flags, depth-limited walks to guard against mounting a tree inside
//! itself). Where `unpfs` keeps one open `fs::File` per fid, this
//! backend keeps it per node and buffers writes, flushing to the real
//! file only on `clunk` — generalizing `unpfs`'s per-fid file handle to
//! the per-node ownership model the rest of this crate uses.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::wire::{DMode, OpenMode, Qid, QidType, StatRecord};

use super::{Node, NodeOps};

async fn qid_for(path: &Path) -> Result<Qid> {
    let meta = fs::symlink_metadata(path).await?;
    Ok(Qid {
        typ: QidType::from(meta.file_type()),
        version: 0,
        path: meta.ino(),
    })
}

struct Buffered {
    data: Vec<u8>,
    dirty: bool,
}

pub struct PassthroughNode {
    path: PathBuf,
    max_depth: usize,
    depth: usize,
    qid: Qid,
    buffer: Mutex<Option<Buffered>>,
}

impl PassthroughNode {
    /// Builds the child at `name`, stamping its qid from the host inode
    /// at construction time the same way `stat` computes one, so every
    /// caller holding this node (not just the next `stat`) sees the same
    /// identity — `walk`/`create` are the only places a `PassthroughNode`
    /// is ever built, so this is the one place that needs to ask the host.
    async fn child(&self, name: &str, depth: usize) -> Result<Self> {
        let path = self.path.join(name);
        let qid = qid_for(&path).await?;
        Ok(PassthroughNode {
            path,
            max_depth: self.max_depth,
            depth,
            qid,
            buffer: Mutex::new(None),
        })
    }
}

#[async_trait]
impl NodeOps for PassthroughNode {
    fn qid(&self) -> Qid {
        self.qid
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn mode(&self) -> u32 {
        0
    }

    async fn walk(&self, name: &str) -> Result<Node> {
        let new_depth = if name == ".." {
            self.depth.saturating_sub(1)
        } else if name == "." {
            self.depth
        } else {
            let d = self.depth + 1;
            if d > self.max_depth {
                return Err(Error::NotPermitted);
            }
            d
        };
        let child = self.child(name, new_depth).await?;
        Ok(Node(Arc::new(child)))
    }

    async fn open(&self, mode: OpenMode) -> Result<()> {
        let meta = fs::symlink_metadata(&self.path).await?;
        if meta.is_dir() {
            return Ok(());
        }
        let data = if mode.can_read() {
            fs::read(&self.path).await?
        } else {
            Vec::new()
        };
        let data = if mode.truncate { Vec::new() } else { data };
        *self.buffer.lock().await = Some(Buffered { data, dirty: mode.truncate });
        Ok(())
    }

    async fn read(&self, offset: u64, count: u32) -> Result<Vec<u8>> {
        let meta = fs::symlink_metadata(&self.path).await?;
        if meta.is_dir() {
            return read_dir(&self.path, offset, count).await;
        }
        let guard = self.buffer.lock().await;
        let data = match guard.as_ref() {
            Some(b) => b.data.clone(),
            None => fs::read(&self.path).await?,
        };
        let start = (offset as usize).min(data.len());
        let end = (start + count as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn write(&self, offset: u64, data: &[u8], _uname: &str) -> Result<u32> {
        let mut guard = self.buffer.lock().await;
        let buf = guard.get_or_insert_with(|| Buffered { data: Vec::new(), dirty: false });
        let end = offset as usize + data.len();
        if buf.data.len() < end {
            buf.data.resize(end, 0);
        }
        buf.data[offset as usize..end].copy_from_slice(data);
        buf.dirty = true;
        Ok(data.len() as u32)
    }

    async fn stat(&self) -> Result<StatRecord> {
        let meta = fs::symlink_metadata(&self.path).await?;
        let qid = Qid {
            typ: QidType::from(meta.file_type()),
            version: 0,
            path: meta.ino(),
        };
        let mut mode = (meta.permissions().mode()) & 0x1ff;
        if meta.is_dir() {
            mode |= DMode::DIR.bits();
        }
        Ok(StatRecord {
            typ: 0,
            dev: 0,
            qid,
            mode,
            atime: meta.atime() as u32,
            mtime: meta.mtime() as u32,
            length: meta.len(),
            name: self.name(),
            uid: meta.uid().to_string(),
            gid: meta.gid().to_string(),
            muid: meta.uid().to_string(),
        })
    }

    async fn wstat(&self, stat: &StatRecord) -> Result<()> {
        if stat.mode != crate::wire::dont_touch::U32 {
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(stat.mode & 0x1ff)).await?;
        }
        if stat.length != crate::wire::dont_touch::U64 {
            let f = fs::OpenOptions::new().write(true).open(&self.path).await?;
            f.set_len(stat.length).await?;
        }
        if !stat.name.is_empty() && stat.name != self.name() {
            let new_path = self.path.with_file_name(&stat.name);
            fs::rename(&self.path, &new_path).await?;
        }
        Ok(())
    }

    async fn create(&self, name: &str, perm: u32, mode: OpenMode, uname: &str) -> Result<Node> {
        let path = self.path.join(name);
        if perm & DMode::DIR.bits() != 0 {
            fs::create_dir(&path).await?;
        } else {
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .await?;
            drop(file);
            fs::set_permissions(&path, std::fs::Permissions::from_mode(perm & 0x1ff)).await?;
        }
        let child = self.child(name, self.depth + 1).await?;
        child.open(mode).await?;
        let _ = uname;
        Ok(Node(Arc::new(child)))
    }

    async fn remove(&self) -> Result<()> {
        let meta = fs::symlink_metadata(&self.path).await?;
        if meta.is_dir() {
            fs::remove_dir(&self.path).await.map_err(|e| {
                if e.raw_os_error() == Some(nix::libc::ENOTEMPTY) {
                    Error::NotEmpty
                } else {
                    Error::from(e)
                }
            })
        } else {
            fs::remove_file(&self.path).await.map_err(Error::from)
        }
    }

    async fn clunk(&self) -> Result<()> {
        let mut guard = self.buffer.lock().await;
        if let Some(buf) = guard.take() {
            if buf.dirty {
                fs::write(&self.path, &buf.data).await?;
            }
        }
        Ok(())
    }
}

async fn read_dir(path: &Path, offset: u64, count: u32) -> Result<Vec<u8>> {
    use crate::wire::codec::Encodable;
    use tokio_stream::{wrappers::ReadDirStream, StreamExt};

    let mut entries = ReadDirStream::new(fs::read_dir(path).await?);
    let mut stats = Vec::new();
    while let Some(entry) = entries.next().await {
        let entry = entry?;
        let meta = entry.metadata().await?;
        let mut mode = meta.permissions().mode() & 0x1ff;
        if meta.is_dir() {
            mode |= DMode::DIR.bits();
        }
        stats.push(StatRecord {
            typ: 0,
            dev: 0,
            qid: Qid {
                typ: QidType::from(meta.file_type()),
                version: 0,
                path: meta.ino(),
            },
            mode,
            atime: meta.atime() as u32,
            mtime: meta.mtime() as u32,
            length: meta.len(),
            name: entry.file_name().to_string_lossy().into_owned(),
            uid: meta.uid().to_string(),
            gid: meta.gid().to_string(),
            muid: meta.uid().to_string(),
        });
    }

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

/// A passthrough backend rooted at a host directory.
pub struct Passthrough {
    root: PathBuf,
    max_depth: usize,
}

impl Passthrough {
    pub fn new(root: impl Into<PathBuf>, max_depth: usize) -> Self {
        Passthrough { root: root.into(), max_depth }
    }

    pub fn root_node(&self) -> Node {
        let meta = std::fs::symlink_metadata(&self.root).expect("passthrough root must exist");
        let qid = Qid { typ: QidType::from(meta.file_type()), version: 0, path: meta.ino() };
        Node(Arc::new(PassthroughNode {
            path: self.root.clone(),
            max_depth: self.max_depth,
            depth: 0,
            qid,
            buffer: Mutex::new(None),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::OpenSubMode;

    fn read_mode() -> OpenMode {
        OpenMode { submode: OpenSubMode::Read, truncate: false, rclose: false }
    }

    fn write_mode() -> OpenMode {
        OpenMode { submode: OpenSubMode::Write, truncate: true, rclose: false }
    }

    #[tokio::test]
    async fn create_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Passthrough::new(dir.path(), 200);
        let root = fs.root_node();
        let file = root.create("hello", 0o644, write_mode(), "u").await.unwrap();
        file.write(0, b"hi there", "u").await.unwrap();
        file.clunk().await.unwrap();

        let found = root.walk("hello").await.unwrap();
        found.open(read_mode()).await.unwrap();
        let data = found.read(0, 1024).await.unwrap();
        assert_eq!(data, b"hi there");
    }

    #[tokio::test]
    async fn depth_limit_rejects_deep_walk() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Passthrough::new(dir.path(), 1);
        let root = fs.root_node();
        let sub = root.create("a", DMode::DIR.bits() | 0o755, read_mode(), "u").await.unwrap();
        assert!(matches!(
            sub.walk("too_deep").await,
            Err(Error::NotPermitted)
        ));
    }

    #[tokio::test]
    async fn walk_reports_a_stable_nonzero_qid() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Passthrough::new(dir.path(), 200);
        let root = fs.root_node();
        root.create("same", 0o644, write_mode(), "u").await.unwrap();

        let first = root.walk("same").await.unwrap();
        let second = root.walk("same").await.unwrap();
        assert_eq!(first.qid(), second.qid());
        assert_ne!(first.qid().path, 0);
    }

    #[tokio::test]
    async fn remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Passthrough::new(dir.path(), 200);
        let root = fs.root_node();
        let file = root.create("gone", 0o644, write_mode(), "u").await.unwrap();
        file.clunk().await.unwrap();
        let found = root.walk("gone").await.unwrap();
        found.remove().await.unwrap();
        assert!(matches!(root.walk("gone").await, Err(Error::NoEntry)));
    }
}
