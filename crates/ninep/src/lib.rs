//! A 9P2000 file-service runtime: wire codec, tag/fid bookkeeping,
//! framing, a composable filesystem capability interface with five
//! backends, a per-connection server, a bounded session pool, a
//! transport adapter contract with two in-scope implementations, and a
//! local namespace facade.

pub mod backend;
pub mod config;
pub mod error;
pub mod framer;
pub mod namespace;
pub mod pool;
pub mod server;
pub mod tables;
pub mod transport;
pub mod wire;

pub use backend::{Node, NodeOps};
pub use config::Config;
pub use error::{Error, Result};
pub use server::Connection;
