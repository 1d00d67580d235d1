//! A multi-backend 9P2000 server: exports a host directory, a scratch
//! in-memory tree, a small status file, and the process-wide service
//! registry, all composed under one union root — the example consumer of
//! `ninep` the way `unpfs` was the example consumer of its teacher.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::net::{TcpListener, UnixListener};

use ninep::backend::dynfs::DynFs;
use ninep::backend::memfs::MemFs;
use ninep::backend::passthrough::Passthrough;
use ninep::backend::srv_registry;
use ninep::backend::union::Union;
use ninep::pool::SessionPool;
use ninep::{Config, Node};

/// A CLI-configurable 9P2000 file server.
#[derive(Parser, Debug)]
#[command(name = "ninepd", about = "A multi-backend 9P2000 file server")]
struct Cli {
    /// Host directory exported read/write under `/export`.
    #[arg(long, default_value = "/tmp/ninepd-export")]
    export_root: PathBuf,

    /// Maximum passthrough walk depth below `export_root`.
    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// TCP address to listen on.
    #[arg(long, default_value = "127.0.0.1:5640")]
    tcp: String,

    /// Optional Unix domain socket path to also listen on.
    #[arg(long)]
    unix: Option<PathBuf>,

    #[arg(long, default_value_t = 8192)]
    max_message_size: u32,

    #[arg(long, default_value_t = 1024)]
    max_fids: usize,

    #[arg(long, default_value_t = 128)]
    max_tags: usize,

    #[arg(long, default_value_t = 64)]
    max_sessions: usize,
}

fn config_from_cli(cli: &Cli) -> Config {
    Config {
        max_message_size: cli.max_message_size,
        max_fids: cli.max_fids,
        max_tags: cli.max_tags,
        max_sessions: cli.max_sessions,
        ..Config::default()
    }
}

fn status_producer() -> ninep::backend::dynfs::Producer {
    Arc::new(|offset, count| {
        Box::pin(async move {
            let bytes = b"ok\n";
            let start = (offset as usize).min(bytes.len());
            let end = (start + count as usize).min(bytes.len());
            Ok(bytes[start..end].to_vec())
        })
    })
}

async fn build_root(cli: &Cli) -> Node {
    let union = Arc::new(Union::new());

    let scratch = MemFs::new();
    union.mount("", scratch.root()).await;

    std::fs::create_dir_all(&cli.export_root).ok();
    let export = Passthrough::new(cli.export_root.clone(), cli.max_depth);
    union.mount("export", export.root_node()).await;

    let status = Arc::new(DynFs::new());
    status.register("status", Some(status_producer()), None, None).await;
    union.mount("ctl", status.root()).await;

    union.mount("srv", srv_registry::global().root()).await;

    union.root()
}

async fn serve_tcp(addr: String, root: Node, config: Config, pool: Arc<SessionPool>) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on tcp://{addr}");
    loop {
        let idx = match pool.alloc().await {
            Some(idx) => idx,
            None => {
                warn!("session pool at capacity ({}), waiting for a free slot", pool.capacity());
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("accepted tcp connection from {peer}");
                pool.connected(idx).await;
                let root = root.clone();
                let config = config.clone();
                let pool = pool.clone();
                tokio::spawn(async move {
                    if let Err(e) = ninep::transport::stream::serve(stream, root, config).await {
                        error!("connection error: {e}");
                    }
                    pool.disconnecting(idx).await;
                    pool.free(idx).await;
                });
            }
            Err(e) => {
                error!("tcp accept failed: {e}");
                pool.free(idx).await;
            }
        }
    }
}

async fn serve_unix(path: PathBuf, root: Node, config: Config, pool: Arc<SessionPool>) -> std::io::Result<()> {
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    info!("listening on unix://{}", path.display());
    loop {
        let idx = match pool.alloc().await {
            Some(idx) => idx,
            None => {
                warn!("session pool at capacity ({}), waiting for a free slot", pool.capacity());
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        match listener.accept().await {
            Ok((stream, _)) => {
                info!("accepted unix connection");
                pool.connected(idx).await;
                let root = root.clone();
                let config = config.clone();
                let pool = pool.clone();
                tokio::spawn(async move {
                    if let Err(e) = ninep::transport::stream::serve(stream, root, config).await {
                        error!("connection error: {e}");
                    }
                    pool.disconnecting(idx).await;
                    pool.free(idx).await;
                });
            }
            Err(e) => {
                error!("unix accept failed: {e}");
                pool.free(idx).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let root = build_root(&cli).await;
    let config = config_from_cli(&cli);
    let pool = SessionPool::new(cli.max_sessions);

    let tcp = serve_tcp(cli.tcp.clone(), root.clone(), config.clone(), pool.clone());

    match cli.unix.clone() {
        Some(path) => {
            let unix = serve_unix(path, root, config, pool);
            let (tcp_result, unix_result) = tokio::join!(tcp, unix);
            tcp_result?;
            unix_result?;
            Ok(())
        }
        None => tcp.await,
    }
}
