//! Dynamic-file registry backend (C7): status files, counters, and
//! upload sinks backed by callbacks instead of stored bytes.
//!
//! Grounded on the capability-interface split of `rs9p`'s `Filesystem`
//! trait (one callback per operation) but flattened into a single flat
//! table of `(path, producer, consumer)` triples per `spec.md` §4.7,
//! since a dynamic file has no real tree structure of its own — only a
//! registered path and the callbacks that serve it. Callbacks return
//! boxed futures (`futures::future::BoxFuture`) rather than being
//! `async fn` themselves, since trait objects can't yet hold async
//! closures directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::wire::{DMode, OpenMode, Qid, QidType, StatRecord};

use super::{Node, NodeOps};

pub type Producer = Arc<dyn Fn(u64, u32) -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync>;
pub type Consumer = Arc<dyn Fn(Vec<u8>, u64) -> BoxFuture<'static, Result<u32>> + Send + Sync>;
pub type CloseHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Entry {
    producer: Option<Producer>,
    consumer: Option<Consumer>,
    on_close: Option<CloseHook>,
    path: u64,
}

/// A flat registry of dynamic files, exposed as a synthesized directory
/// tree by splitting registered paths on `/`.
pub struct DynFs {
    entries: RwLock<HashMap<String, Entry>>,
    next_path: AtomicU64,
}

impl DynFs {
    pub fn new() -> Self {
        DynFs { entries: RwLock::new(HashMap::new()), next_path: AtomicU64::new(1) }
    }

    /// Registers a dynamic file at `path` (no leading slash, `/`-separated
    /// components). Re-registering an existing path replaces it.
    pub async fn register(
        &self,
        path: impl Into<String>,
        producer: Option<Producer>,
        consumer: Option<Consumer>,
        on_close: Option<CloseHook>,
    ) {
        let path_id = self.next_path.fetch_add(1, Ordering::Relaxed);
        self.entries.write().await.insert(
            path.into(),
            Entry { producer, consumer, on_close, path: path_id },
        );
    }

    pub fn root(self: &Arc<Self>) -> Node {
        Node(Arc::new(DynNode { registry: self.clone(), path: String::new() }))
    }
}

impl Default for DynFs {
    fn default() -> Self {
        Self::new()
    }
}

/// A node addressing either an exact registered file, or a synthesized
/// directory standing in for a shared path prefix.
pub struct DynNode {
    registry: Arc<DynFs>,
    path: String,
}

impl DynNode {
    fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_owned()
        } else {
            format!("{}/{}", self.path, name)
        }
    }

    async fn is_directory(&self) -> bool {
        if self.path.is_empty() {
            return true;
        }
        let entries = self.registry.entries.read().await;
        if entries.contains_key(&self.path) {
            return false;
        }
        let prefix = format!("{}/", self.path);
        entries.keys().any(|k| k.starts_with(&prefix))
    }
}

#[async_trait]
impl NodeOps for DynNode {
    fn qid(&self) -> Qid {
        // Computed from the path string; exact registration-id lookups
        // happen in `stat`, which is what fids and directory reads use.
        Qid { typ: QidType::FILE, version: 0, path: path_hash(&self.path) }
    }

    fn name(&self) -> String {
        self.path.rsplit('/').next().unwrap_or("").to_owned()
    }

    fn mode(&self) -> u32 {
        0o444
    }

    async fn walk(&self, name: &str) -> Result<Node> {
        let child_path = self.child_path(name);
        let entries = self.registry.entries.read().await;
        if entries.contains_key(&child_path) {
            return Ok(Node(Arc::new(DynNode { registry: self.registry.clone(), path: child_path })));
        }
        let prefix = format!("{}/", child_path);
        if entries.keys().any(|k| k.starts_with(&prefix)) {
            return Ok(Node(Arc::new(DynNode { registry: self.registry.clone(), path: child_path })));
        }
        Err(Error::NoEntry)
    }

    async fn open(&self, _mode: OpenMode) -> Result<()> {
        Ok(())
    }

    async fn read(&self, offset: u64, count: u32) -> Result<Vec<u8>> {
        if self.is_directory().await {
            return read_dir_snapshot(self.registry.clone(), &self.path, offset, count).await;
        }
        let producer = {
            let entries = self.registry.entries.read().await;
            entries.get(&self.path).and_then(|e| e.producer.clone())
        };
        match producer {
            Some(p) => p(offset, count).await,
            None => Err(Error::NotPermitted),
        }
    }

    async fn write(&self, offset: u64, data: &[u8], _uname: &str) -> Result<u32> {
        let consumer = {
            let entries = self.registry.entries.read().await;
            entries.get(&self.path).and_then(|e| e.consumer.clone())
        };
        match consumer {
            Some(c) => c(data.to_vec(), offset).await,
            None => Err(Error::NotPermitted),
        }
    }

    async fn stat(&self) -> Result<StatRecord> {
        let is_dir = self.is_directory().await;
        let qid_path = {
            let entries = self.registry.entries.read().await;
            entries.get(&self.path).map(|e| e.path).unwrap_or_else(|| path_hash(&self.path))
        };
        let typ = if is_dir { QidType::DIR } else { QidType::FILE };
        let mode = if is_dir { DMode::DIR.bits() | 0o555 } else { 0o444 };
        Ok(StatRecord {
            typ: 0,
            dev: 0,
            qid: Qid { typ, version: 0, path: qid_path },
            mode,
            atime: 0,
            mtime: 0,
            length: 0,
            name: self.name(),
            uid: "none".into(),
            gid: "none".into(),
            muid: "none".into(),
        })
    }

    async fn wstat(&self, _stat: &StatRecord) -> Result<()> {
        Err(Error::NotPermitted)
    }

    async fn create(&self, _name: &str, _perm: u32, _mode: OpenMode, _uname: &str) -> Result<Node> {
        Err(Error::NotPermitted)
    }

    async fn remove(&self) -> Result<()> {
        Err(Error::NotPermitted)
    }

    async fn clunk(&self) -> Result<()> {
        let hook = {
            let entries = self.registry.entries.read().await;
            entries.get(&self.path).and_then(|e| e.on_close.clone())
        };
        if let Some(hook) = hook {
            hook().await;
        }
        Ok(())
    }
}

fn path_hash(path: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut h = DefaultHasher::new();
    path.hash(&mut h);
    h.finish()
}

async fn read_dir_snapshot(
    registry: Arc<DynFs>,
    prefix: &str,
    offset: u64,
    count: u32,
) -> Result<Vec<u8>> {
    use crate::wire::codec::Encodable;

    let full_prefix = if prefix.is_empty() { String::new() } else { format!("{prefix}/") };
    let mut names = std::collections::BTreeSet::new();
    {
        let entries = registry.entries.read().await;
        for key in entries.keys() {
            let Some(rest) = key.strip_prefix(&full_prefix) else { continue };
            if rest.is_empty() {
                continue;
            }
            let first = rest.split('/').next().unwrap();
            names.insert(first.to_owned());
        }
    }

    let mut skip = offset;
    let mut out = Vec::new();
    let mut remaining = count as usize;
    for name in names {
        let child_path = if prefix.is_empty() { name.clone() } else { format!("{prefix}/{name}") };
        let node = DynNode { registry: registry.clone(), path: child_path };
        let stat = NodeOps::stat(&node).await?;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn producer_of(text: &'static str) -> Producer {
        Arc::new(move |offset, count| {
            Box::pin(async move {
                let bytes = text.as_bytes();
                let start = (offset as usize).min(bytes.len());
                let end = (start + count as usize).min(bytes.len());
                Ok(bytes[start..end].to_vec())
            })
        })
    }

    #[tokio::test]
    async fn read_calls_producer() {
        let fs = Arc::new(DynFs::new());
        fs.register("status", Some(producer_of("ok")), None, None).await;
        let root = fs.root();
        let node = root.walk("status").await.unwrap();
        let data = node.read(0, 16).await.unwrap();
        assert_eq!(data, b"ok");
    }

    #[tokio::test]
    async fn nested_path_synthesizes_directory() {
        let fs = Arc::new(DynFs::new());
        fs.register("ctl/status", Some(producer_of("up")), None, None).await;
        let root = fs.root();
        let ctl = root.walk("ctl").await.unwrap();
        let status = ctl.walk("status").await.unwrap();
        assert_eq!(status.read(0, 16).await.unwrap(), b"up");
    }

    #[tokio::test]
    async fn write_without_consumer_is_rejected() {
        let fs = Arc::new(DynFs::new());
        fs.register("status", Some(producer_of("ok")), None, None).await;
        let root = fs.root();
        let node = root.walk("status").await.unwrap();
        assert!(matches!(node.write(0, b"x", "u").await, Err(Error::NotPermitted)));
    }
}
