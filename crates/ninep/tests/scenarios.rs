//! End-to-end protocol scenarios driving a full `Connection` over an
//! in-memory duplex byte pipe via `transport::stream::serve`, exercising
//! the wire codec, framer, tables, and backends together rather than in
//! isolation.

use ninep::backend::memfs::MemFs;
use ninep::transport::stream::serve;
use ninep::wire::codec::{decode_msg, encode_msg};
use ninep::wire::fcall::{FCall, Msg};
use ninep::wire::{NOFID, NOTAG, P92000};
use ninep::Config;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

struct Client {
    read_half: tokio::io::ReadHalf<DuplexStream>,
    write_half: tokio::io::WriteHalf<DuplexStream>,
}

impl Client {
    async fn roundtrip(&mut self, tag: u16, body: FCall) -> FCall {
        let frame = encode_msg(&Msg { tag, body }).unwrap();
        self.write_half.write_all(&frame).await.unwrap();

        let mut size_buf = [0u8; 4];
        self.read_half.read_exact(&mut size_buf).await.unwrap();
        let total = u32::from_le_bytes(size_buf) as usize;
        let mut rest = vec![0u8; total - 4];
        self.read_half.read_exact(&mut rest).await.unwrap();

        let mut full = size_buf.to_vec();
        full.extend(rest);
        decode_msg(&full[4..]).unwrap().body
    }

    async fn send(&mut self, tag: u16, body: FCall) {
        let frame = encode_msg(&Msg { tag, body }).unwrap();
        self.write_half.write_all(&frame).await.unwrap();
    }

    async fn recv(&mut self) -> Msg {
        let mut size_buf = [0u8; 4];
        self.read_half.read_exact(&mut size_buf).await.unwrap();
        let total = u32::from_le_bytes(size_buf) as usize;
        let mut rest = vec![0u8; total - 4];
        self.read_half.read_exact(&mut rest).await.unwrap();
        let mut full = size_buf.to_vec();
        full.extend(rest);
        decode_msg(&full[4..]).unwrap()
    }
}

async fn connected_client() -> Client {
    let (client, server) = duplex(8192);
    let root = MemFs::new().root();
    tokio::spawn(serve(server, root, Config::default()));
    let (read_half, write_half) = tokio::io::split(client);
    let mut client = Client { read_half, write_half };

    let reply = client
        .roundtrip(NOTAG, FCall::TVersion { msize: 8192, version: P92000.to_owned() })
        .await;
    assert!(matches!(reply, FCall::RVersion { .. }));
    client
}

/// Scenario A: version, attach, walk, create, write, read, clunk — the
/// full life cycle of a file a client creates and reads back.
#[tokio::test]
async fn scenario_create_write_read_clunk() {
    let mut client = connected_client().await;

    let reply = client
        .roundtrip(1, FCall::TAttach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() })
        .await;
    assert!(matches!(reply, FCall::RAttach { .. }));

    let reply = client
        .roundtrip(2, FCall::TCreate { fid: 0, name: "greeting".into(), perm: 0o644, mode: 1 })
        .await;
    assert!(matches!(reply, FCall::RCreate { .. }));

    let reply = client.roundtrip(3, FCall::TWrite { fid: 0, offset: 0, data: b"hello there".to_vec() }).await;
    assert!(matches!(reply, FCall::RWrite { count: 11 }));

    let reply = client.roundtrip(4, FCall::TClunk { fid: 0 }).await;
    assert!(matches!(reply, FCall::RClunk));

    let reply = client
        .roundtrip(5, FCall::TWalk { fid: 0, newfid: 1, wnames: vec!["greeting".into()] })
        .await;
    assert!(matches!(reply, FCall::RWalk { ref wqids } if wqids.len() == 1));

    let reply = client.roundtrip(6, FCall::TOpen { fid: 1, mode: 0 }).await;
    assert!(matches!(reply, FCall::ROpen { .. }));

    let reply = client.roundtrip(7, FCall::TRead { fid: 1, offset: 0, count: 64 }).await;
    match reply {
        FCall::RRead { data } => assert_eq!(data, b"hello there"),
        other => panic!("unexpected reply {:?}", other),
    }
}

/// Scenario B: a multi-component walk that fails partway through returns
/// the qids collected so far and does not bind `newfid`.
#[tokio::test]
async fn scenario_partial_walk_failure() {
    let mut client = connected_client().await;
    client
        .roundtrip(1, FCall::TAttach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() })
        .await;
    client
        .roundtrip(2, FCall::TCreate {
            fid: 0,
            name: "dir".into(),
            perm: ninep::wire::DMode::DIR.bits() | 0o755,
            mode: 0,
        })
        .await;
    client.roundtrip(3, FCall::TClunk { fid: 0 }).await;
    client
        .roundtrip(4, FCall::TAttach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() })
        .await;

    let reply = client
        .roundtrip(5, FCall::TWalk { fid: 0, newfid: 9, wnames: vec!["dir".into(), "missing".into()] })
        .await;
    match reply {
        FCall::RWalk { wqids } => assert_eq!(wqids.len(), 1),
        other => panic!("unexpected reply {:?}", other),
    }

    // newfid 9 was never bound: referencing it fails.
    let reply = client.roundtrip(6, FCall::TStat { fid: 9 }).await;
    assert!(matches!(reply, FCall::RError { .. }));
}

/// Scenario C: removing a fid releases both its name and its identity —
/// a later reference to the same fid is unknown.
#[tokio::test]
async fn scenario_remove_then_stale_reference() {
    let mut client = connected_client().await;
    client
        .roundtrip(1, FCall::TAttach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() })
        .await;
    client
        .roundtrip(2, FCall::TCreate { fid: 0, name: "doomed".into(), perm: 0o644, mode: 1 })
        .await;
    let reply = client.roundtrip(3, FCall::TRemove { fid: 0 }).await;
    assert!(matches!(reply, FCall::RRemove));

    let reply = client.roundtrip(4, FCall::TStat { fid: 0 }).await;
    assert!(matches!(reply, FCall::RError { .. }));
}

/// Scenario D: wstat renames a file within its parent.
#[tokio::test]
async fn scenario_wstat_rename() {
    let mut client = connected_client().await;
    client
        .roundtrip(1, FCall::TAttach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() })
        .await;
    client
        .roundtrip(2, FCall::TCreate { fid: 0, name: "old".into(), perm: 0o644, mode: 1 })
        .await;
    client.roundtrip(3, FCall::TClunk { fid: 0 }).await;
    client
        .roundtrip(4, FCall::TAttach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() })
        .await;
    client
        .roundtrip(5, FCall::TWalk { fid: 0, newfid: 2, wnames: vec!["old".into()] })
        .await;

    let mut stat = ninep::wire::StatRecord::unchanged();
    stat.name = "new".into();
    let reply = client.roundtrip(6, FCall::TWstat { fid: 2, stat }).await;
    assert!(matches!(reply, FCall::RWstat));

    let reply = client.roundtrip(7, FCall::TWalk { fid: 0, newfid: 3, wnames: vec!["new".into()] }).await;
    assert!(matches!(reply, FCall::RWalk { ref wqids } if wqids.len() == 1));
    let reply = client.roundtrip(8, FCall::TWalk { fid: 0, newfid: 4, wnames: vec!["old".into()] }).await;
    assert!(matches!(reply, FCall::RError { .. }));
}

/// Scenario E: `Tflush` against an in-flight request suppresses that
/// request's reply, replacing it with `Rflush` on the flush's own tag.
#[tokio::test]
async fn scenario_flush_in_flight_request() {
    use ninep::backend::dynfs::DynFs;
    use std::sync::Arc;

    let fs = Arc::new(DynFs::new());
    let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
    let gate_rx = Arc::new(tokio::sync::Mutex::new(Some(gate_rx)));
    fs.register(
        "slow",
        Some(Arc::new(move |_offset: u64, _count: u32| {
            let gate_rx = gate_rx.clone();
            Box::pin(async move {
                if let Some(rx) = gate_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(Vec::new())
            })
        })),
        None,
        None,
    )
    .await;

    let (client_io, server_io) = duplex(8192);
    tokio::spawn(serve(server_io, fs.root(), Config::default()));
    let (read_half, write_half) = tokio::io::split(client_io);
    let mut client = Client { read_half, write_half };

    client
        .roundtrip(NOTAG, FCall::TVersion { msize: 8192, version: P92000.to_owned() })
        .await;
    client
        .roundtrip(1, FCall::TAttach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() })
        .await;
    client
        .roundtrip(2, FCall::TWalk { fid: 0, newfid: 1, wnames: vec!["slow".into()] })
        .await;
    client.roundtrip(3, FCall::TOpen { fid: 1, mode: 0 }).await;

    client.send(4, FCall::TRead { fid: 1, offset: 0, count: 16 }).await;
    tokio::task::yield_now().await;
    client.send(5, FCall::TFlush { oldtag: 4 }).await;

    let reply = client.recv().await;
    assert_eq!(reply.tag, 5);
    assert!(matches!(reply.body, FCall::RFlush));

    drop(gate_tx);
}

/// Invariant I4: `Tversion` discards every previously bound fid on the
/// connection.
#[tokio::test]
async fn version_resets_fid_table() {
    let mut client = connected_client().await;
    client
        .roundtrip(1, FCall::TAttach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() })
        .await;

    let reply = client
        .roundtrip(NOTAG, FCall::TVersion { msize: 8192, version: P92000.to_owned() })
        .await;
    assert!(matches!(reply, FCall::RVersion { .. }));

    let reply = client.roundtrip(2, FCall::TStat { fid: 0 }).await;
    assert!(matches!(reply, FCall::RError { .. }));
}
