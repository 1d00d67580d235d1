//! Per-task namespace facade (C13): a local, non-wire mount table giving
//! in-process callers path-based access to composed backends without
//! going through a server connection at all — the local analogue of a
//! `Tattach` plus a chain of `Twalk`s.
//!
//! Grounded on `backend::union`'s mount-by-prefix design, generalized
//! into something a caller can fork: [`Namespace::fork`] snapshots the
//! current mount table into a new, independent one, so a forked
//! namespace's later `mount`/`unmount` calls never affect its parent —
//! copy-on-write by clone, not by mutation tracking. `bind` (rebinding an
//! existing mount to another location in the same namespace) is left
//! unimplemented; nothing in this crate's scope needs it yet.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::Node;
use crate::error::{Error, Result};

/// A mount table entry: `prefix` is empty for the root mount, otherwise
/// a single path component or `/`-separated sequence the entry is
/// rooted at.
#[derive(Clone)]
struct Mount {
    prefix: String,
    root: Node,
}

/// A local mount table. Cheap to clone (shares the same table until a
/// `fork`), cheap to fork (one `Vec` clone of the current mounts).
#[derive(Clone)]
pub struct Namespace {
    table: Arc<RwLock<Vec<Mount>>>,
}

impl Namespace {
    /// A namespace with a single root mount.
    pub fn new(root: Node) -> Self {
        Namespace { table: Arc::new(RwLock::new(vec![Mount { prefix: String::new(), root }])) }
    }

    /// Snapshots the current mounts into a new, independent namespace.
    /// Later `mount`/`unmount` calls on either side are invisible to the
    /// other.
    pub async fn fork(&self) -> Namespace {
        let mounts = self.table.read().await.clone();
        Namespace { table: Arc::new(RwLock::new(mounts)) }
    }

    /// Mounts `root` at `prefix`, replacing any existing mount at the
    /// same prefix. Mounts are matched longest-prefix-first, so a
    /// deeper mount shadows a shallower one covering the same path.
    pub async fn mount(&self, prefix: impl Into<String>, root: Node) {
        let prefix = prefix.into();
        let mut table = self.table.write().await;
        table.retain(|m| m.prefix != prefix);
        table.push(Mount { prefix, root });
        table.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
    }

    pub async fn unmount(&self, prefix: &str) {
        self.table.write().await.retain(|m| m.prefix != prefix);
    }

    /// Resolves a `/`-separated path by longest-prefix mount match, then
    /// walks any remaining components against that mount's root.
    pub async fn resolve(&self, path: &str) -> Result<Node> {
        let path = path.trim_start_matches('/');
        let table = self.table.read().await;
        let mount = table
            .iter()
            .find(|m| m.prefix.is_empty() || path == m.prefix || path.starts_with(&format!("{}/", m.prefix)))
            .ok_or(Error::NoEntry)?;

        let rest = path.strip_prefix(mount.prefix.as_str()).unwrap_or(path).trim_start_matches('/');
        let mut node = mount.root.clone();
        if !rest.is_empty() {
            for component in rest.split('/') {
                node = node.walk(component).await?;
            }
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memfs::MemFs;
    use crate::wire::OpenSubMode;

    fn read_mode() -> crate::wire::OpenMode {
        crate::wire::OpenMode { submode: OpenSubMode::Read, truncate: false, rclose: false }
    }

    #[tokio::test]
    async fn resolve_walks_into_root_mount() {
        let fs = MemFs::new();
        fs.root().create("a", 0o644, read_mode(), "u").await.unwrap();
        let ns = Namespace::new(fs.root());
        let found = ns.resolve("a").await.unwrap();
        assert_eq!(found.name(), "a");
    }

    #[tokio::test]
    async fn mounted_prefix_shadows_root() {
        let root_fs = MemFs::new();
        let mounted_fs = MemFs::new();
        mounted_fs.root().create("status", 0o644, read_mode(), "u").await.unwrap();

        let ns = Namespace::new(root_fs.root());
        ns.mount("ctl", mounted_fs.root()).await;

        let found = ns.resolve("ctl/status").await.unwrap();
        assert_eq!(found.name(), "status");
    }

    #[tokio::test]
    async fn fork_is_isolated_from_parent() {
        let fs = MemFs::new();
        let ns = Namespace::new(fs.root());
        let child = ns.fork().await;

        let other_fs = MemFs::new();
        child.mount("extra", other_fs.root()).await;

        assert!(ns.resolve("extra").await.is_err());
        assert!(child.resolve("extra").await.is_ok());
    }

    #[tokio::test]
    async fn unmount_removes_entry() {
        let fs = MemFs::new();
        let ns = Namespace::new(fs.root());
        let extra = MemFs::new();
        ns.mount("extra", extra.root()).await;
        ns.unmount("extra").await;
        assert!(matches!(ns.resolve("extra").await, Err(Error::NoEntry)));
    }
}
