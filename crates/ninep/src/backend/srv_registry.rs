//! Service registry backend (C9): a process-wide namespace of named
//! services, each either embedded (served in-process) or remote (a
//! connection descriptor pointing elsewhere).
//!
//! Grounded on the same node-owns-its-identity simplification as
//! [`super::union`]: walking into an embedded service returns that
//! service's own root node directly, so the "ask every backend, let it
//! say NOT_OWNED" probe in `spec.md` §4.9 is only needed at the registry
//! root itself, never for operations already inside a service's tree.
//! [`crate::error::NOT_OWNED`] remains as the sentinel other composable
//! backends (unions nested under a service) can use for the same purpose.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::wire::{DMode, OpenMode, Qid, QidType, StatRecord};

use super::{Node, NodeOps};

/// How a registered service is reached.
pub enum ServiceBackend {
    /// Served in this process; walking into it reaches this root directly.
    Local(Node),
    /// Served by another process or host; the registry exposes a
    /// descriptor file instead of a directory tree.
    Remote { transport: String, address: String },
}

pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceBackend>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        ServiceRegistry { services: RwLock::new(HashMap::new()) }
    }

    pub async fn post(&self, name: impl Into<String>, backend: ServiceBackend) {
        self.services.write().await.insert(name.into(), backend);
    }

    pub async fn remove(&self, name: &str) -> Option<()> {
        self.services.write().await.remove(name).map(|_| ())
    }

    pub async fn lookup(&self, name: &str) -> Option<Node> {
        match self.services.read().await.get(name) {
            Some(ServiceBackend::Local(node)) => Some(node.clone()),
            _ => None,
        }
    }

    pub async fn foreach(&self, mut f: impl FnMut(&str)) {
        for name in self.services.read().await.keys() {
            f(name);
        }
    }

    pub fn root(self: &Arc<Self>) -> Node {
        Node(Arc::new(RegistryRoot { registry: self.clone() }))
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<Arc<ServiceRegistry>> = OnceLock::new();

/// The process-wide registry, created on first access.
pub fn global() -> &'static Arc<ServiceRegistry> {
    GLOBAL.get_or_init(|| Arc::new(ServiceRegistry::new()))
}

struct RegistryRoot {
    registry: Arc<ServiceRegistry>,
}

fn descriptor_bytes(transport: &str, address: &str) -> Vec<u8> {
    format!("{transport} {address}\n").into_bytes()
}

#[async_trait]
impl NodeOps for RegistryRoot {
    fn qid(&self) -> Qid {
        Qid { typ: QidType::DIR, version: 0, path: 0 }
    }

    fn name(&self) -> String {
        String::new()
    }

    fn mode(&self) -> u32 {
        DMode::DIR.bits() | 0o555
    }

    async fn walk(&self, name: &str) -> Result<Node> {
        let services = self.registry.services.read().await;
        match services.get(name) {
            Some(ServiceBackend::Local(node)) => Ok(node.clone()),
            Some(ServiceBackend::Remote { transport, address }) => {
                Ok(Node(Arc::new(Descriptor { name: name.to_owned(), transport: transport.clone(), address: address.clone() })))
            }
            None => Err(Error::NoEntry),
        }
    }

    async fn open(&self, _mode: OpenMode) -> Result<()> {
        Ok(())
    }

    async fn read(&self, offset: u64, count: u32) -> Result<Vec<u8>> {
        use crate::wire::codec::Encodable;

        let services = self.registry.services.read().await;
        let mut names: Vec<&String> = services.keys().collect();
        names.sort();

        let mut stats = Vec::new();
        for name in names {
            let is_local = matches!(services.get(name), Some(ServiceBackend::Local(_)));
            stats.push(StatRecord {
                typ: 0,
                dev: 0,
                qid: Qid { typ: if is_local { QidType::DIR } else { QidType::FILE }, version: 0, path: 0 },
                mode: if is_local { DMode::DIR.bits() | 0o555 } else { 0o444 },
                atime: 0,
                mtime: 0,
                length: 0,
                name: name.clone(),
                uid: "none".into(),
                gid: "none".into(),
                muid: "none".into(),
            });
        }
        drop(services);

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

    async fn create(&self, _name: &str, _perm: u32, _mode: OpenMode, _uname: &str) -> Result<Node> {
        Err(Error::NotPermitted)
    }

    async fn remove(&self) -> Result<()> {
        Err(Error::NotPermitted)
    }

    async fn clunk(&self) -> Result<()> {
        Ok(())
    }
}

/// The synthetic read-only file representing a remote service's
/// connection descriptor.
struct Descriptor {
    name: String,
    transport: String,
    address: String,
}

#[async_trait]
impl NodeOps for Descriptor {
    fn qid(&self) -> Qid {
        Qid { typ: QidType::FILE, version: 0, path: 0 }
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn mode(&self) -> u32 {
        0o444
    }

    async fn walk(&self, _name: &str) -> Result<Node> {
        Err(Error::NotDir)
    }

    async fn open(&self, _mode: OpenMode) -> Result<()> {
        Ok(())
    }

    async fn read(&self, offset: u64, count: u32) -> Result<Vec<u8>> {
        let bytes = descriptor_bytes(&self.transport, &self.address);
        let start = (offset as usize).min(bytes.len());
        let end = (start + count as usize).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    async fn write(&self, _offset: u64, _data: &[u8], _uname: &str) -> Result<u32> {
        Err(Error::NotPermitted)
    }

    async fn stat(&self) -> Result<StatRecord> {
        let bytes = descriptor_bytes(&self.transport, &self.address);
        Ok(StatRecord {
            typ: 0,
            dev: 0,
            qid: self.qid(),
            mode: self.mode(),
            atime: 0,
            mtime: 0,
            length: bytes.len() as u64,
            name: self.name.clone(),
            uid: "none".into(),
            gid: "none".into(),
            muid: "none".into(),
        })
    }

    async fn wstat(&self, _stat: &StatRecord) -> Result<()> {
        Err(Error::NotPermitted)
    }

    async fn create(&self, _name: &str, _perm: u32, _mode: OpenMode, _uname: &str) -> Result<Node> {
        Err(Error::NotDir)
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

    #[tokio::test]
    async fn walk_to_local_service_reaches_its_root() {
        let registry = Arc::new(ServiceRegistry::new());
        let fs = MemFs::new();
        registry.post("data", ServiceBackend::Local(fs.root())).await;

        let root = registry.root();
        let data = root.walk("data").await.unwrap();
        assert_eq!(data.mode() & DMode::DIR.bits(), DMode::DIR.bits());
    }

    #[tokio::test]
    async fn remote_service_exposes_descriptor() {
        let registry = Arc::new(ServiceRegistry::new());
        registry
            .post("far", ServiceBackend::Remote { transport: "tcp".into(), address: "10.0.0.1:564".into() })
            .await;

        let root = registry.root();
        let far = root.walk("far").await.unwrap();
        let data = far.read(0, 1024).await.unwrap();
        assert_eq!(String::from_utf8(data).unwrap(), "tcp 10.0.0.1:564\n");
    }

    #[tokio::test]
    async fn unknown_service_is_no_entry() {
        let registry = Arc::new(ServiceRegistry::new());
        let root = registry.root();
        assert!(matches!(root.walk("nope").await, Err(Error::NoEntry)));
    }
}
