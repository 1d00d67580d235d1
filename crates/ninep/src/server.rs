//! Per-connection server (C10): decodes frames, dispatches each request
//! to the bound [`crate::backend::NodeOps`], and writes the matching
//! reply frame back.
//!
//! Grounded on `rs9p`'s `srv::dispatch`/`dispatch_once` pair, generalized
//! from the 9P2000.L operation set to the classic 9P2000 one and given an
//! explicit `Tflush` rendezvous the teacher's loop never needed (its
//! clients always wait out their replies). Logging matches the teacher's
//! `"\t← {:?}"` / `"\t→ {:?}"` call sites.

use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, oneshot};

use crate::backend::Node;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::tables::{FidEntry, FidTable, TagTable};
use crate::wire::codec::{decode_msg, encode_msg};
use crate::wire::fcall::{FCall, Msg};
use crate::wire::{OpenMode, Qid, StatRecord, NOFID, NOTAG};

/// Negotiation state of one connection, per `spec.md` §4.10/I4.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ConnState {
    /// No `Tversion` has completed yet: every non-version request is
    /// rejected.
    Fresh,
    /// `Tversion` has negotiated this message size.
    Negotiated { msize: u32 },
}

/// One 9P2000 connection's server-side state: its fid/tag tables, attach
/// root, and negotiation state. Transport-agnostic — fed frames by
/// whichever `transport` adapter owns the socket.
pub struct Connection {
    root: Node,
    config: Config,
    fids: FidTable,
    tags: TagTable,
    state: tokio::sync::Mutex<ConnState>,
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Connection {
    /// Builds a connection bound to `root`, with outgoing frames
    /// delivered to `out_tx` (owned by the transport adapter driving this
    /// connection).
    pub fn new(root: Node, config: Config, out_tx: mpsc::UnboundedSender<Vec<u8>>) -> Arc<Self> {
        Arc::new(Connection {
            fids: FidTable::new(config.max_fids),
            tags: TagTable::new(config.max_tags),
            root,
            config,
            state: tokio::sync::Mutex::new(ConnState::Fresh),
            out_tx,
        })
    }

    async fn negotiated_msize(&self) -> Option<u32> {
        match &*self.state.lock().await {
            ConnState::Negotiated { msize } => Some(*msize),
            ConnState::Fresh => None,
        }
    }

    /// Feeds one complete wire frame (including its 4-byte size prefix,
    /// as produced by [`crate::framer::Framer::push`]) into the
    /// connection. Spawns a task per request so slow operations don't
    /// block other in-flight requests on the same connection (per
    /// `spec.md` §5); the task sends its own reply frame through `out_tx`.
    pub fn on_message(self: &Arc<Self>, frame: &[u8]) -> Result<()> {
        if frame.len() < 4 {
            return Err(Error::MalformedMessage);
        }
        let msg = decode_msg(&frame[4..])?;
        trace!("\t\u{2190} {:?}", msg);
        let conn = self.clone();
        tokio::spawn(async move {
            conn.dispatch(msg).await;
        });
        Ok(())
    }

    async fn dispatch(self: Arc<Self>, msg: Msg) {
        let tag = msg.tag;

        if let FCall::TVersion { msize, version } = &msg.body {
            self.handle_version(tag, *msize, version.clone()).await;
            return;
        }
        if let FCall::TFlush { oldtag } = &msg.body {
            self.handle_flush(tag, *oldtag).await;
            return;
        }

        if self.negotiated_msize().await.is_none() {
            self.send_error(tag, Error::ProtocolViolation);
            return;
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        if let Err(e) = self.tags.alloc(tag, cancel_tx).await {
            self.send_error(tag, e);
            return;
        }

        let body = msg.body;
        let conn = self.clone();
        let work = async move { conn.execute(body).await };
        tokio::pin!(work);
        tokio::pin!(cancel_rx);

        let outcome = tokio::select! {
            biased;
            _ = &mut cancel_rx => None,
            r = &mut work => Some(r),
        };

        // A concurrent Tflush may have already removed this tag between
        // `select!` resolving with a ready `work` and this claim step; in
        // that case the flush won the race and no reply is sent for
        // either request (the caller treats TFlush as having completed
        // the original one with no reply, per spec.md's Tflush semantics).
        if !self.tags.complete(tag).await {
            return;
        }

        match outcome {
            Some(Ok(reply)) => self.send_reply(tag, reply),
            Some(Err(e)) => self.send_error(tag, e),
            None => self.send_reply(tag, FCall::RFlush),
        }
    }

    async fn handle_version(self: &Arc<Self>, tag: u16, msize: u32, version: String) {
        if tag != NOTAG {
            warn!("Tversion with non-NOTAG tag {tag}");
        }
        self.fids.clear().await;
        let negotiated = msize.min(self.config.max_message_size);
        if version == self.config.protocol_version {
            *self.state.lock().await = ConnState::Negotiated { msize: negotiated };
            self.send_reply(
                tag,
                FCall::RVersion { msize: negotiated, version: self.config.protocol_version.clone() },
            );
        } else {
            *self.state.lock().await = ConnState::Fresh;
            self.send_reply(
                tag,
                FCall::RVersion { msize: negotiated, version: crate::wire::VERSION_UNKNOWN.to_owned() },
            );
        }
    }

    async fn handle_flush(&self, tag: u16, oldtag: u16) {
        if let Some(cancel) = self.tags.take_cancel(oldtag).await {
            let _ = cancel.send(());
        }
        self.send_reply(tag, FCall::RFlush);
    }

    async fn execute(&self, body: FCall) -> Result<FCall> {
        match body {
            FCall::TAttach { fid, afid, uname, aname } => self.do_attach(fid, afid, uname, aname).await,
            FCall::TWalk { fid, newfid, wnames } => self.do_walk(fid, newfid, wnames).await,
            FCall::TOpen { fid, mode } => self.do_open(fid, mode).await,
            FCall::TCreate { fid, name, perm, mode } => self.do_create(fid, name, perm, mode).await,
            FCall::TRead { fid, offset, count } => self.do_read(fid, offset, count).await,
            FCall::TWrite { fid, offset, data } => self.do_write(fid, offset, data).await,
            FCall::TClunk { fid } => self.do_clunk(fid).await,
            FCall::TRemove { fid } => self.do_remove(fid).await,
            FCall::TStat { fid } => self.do_stat(fid).await,
            FCall::TWstat { fid, stat } => self.do_wstat(fid, stat).await,
            FCall::TAuth { .. } => Err(Error::NotPermitted),
            other => {
                error!("unexpected request reached execute(): {:?}", other);
                Err(Error::ProtocolViolation)
            }
        }
    }

    async fn do_attach(&self, fid: u32, afid: u32, uname: String, aname: String) -> Result<FCall> {
        if afid != NOFID {
            return Err(Error::NotPermitted);
        }
        let _ = aname;
        let qid = self.root.qid();
        self.fids
            .insert(fid, FidEntry { node: self.root.clone(), open_mode: None, uname }, false)
            .await?;
        Ok(FCall::RAttach { qid })
    }

    async fn do_walk(&self, fid: u32, newfid: u32, wnames: Vec<String>) -> Result<FCall> {
        let entry = self.fids.get(fid).await?;

        if wnames.is_empty() {
            self.fids
                .insert(newfid, entry.clone(), newfid == fid)
                .await?;
            return Ok(FCall::RWalk { wqids: Vec::new() });
        }

        let mut node = entry.node.clone();
        let mut qids: Vec<Qid> = Vec::with_capacity(wnames.len());
        for name in &wnames {
            match node.walk(name).await {
                Ok(next) => {
                    qids.push(next.qid());
                    node = next;
                }
                Err(e) => {
                    if qids.is_empty() {
                        return Err(e);
                    }
                    return Ok(FCall::RWalk { wqids: qids });
                }
            }
        }

        self.fids
            .insert(
                newfid,
                FidEntry { node, open_mode: None, uname: entry.uname },
                newfid == fid,
            )
            .await?;
        Ok(FCall::RWalk { wqids: qids })
    }

    async fn do_open(&self, fid: u32, mode: u8) -> Result<FCall> {
        let entry = self.fids.get(fid).await?;
        if entry.open_mode.is_some() {
            return Err(Error::AlreadyOpen);
        }
        let open_mode = OpenMode::from_bits(mode)?;
        entry.node.open(open_mode).await?;
        let qid = entry.node.qid();
        self.fids
            .insert(fid, FidEntry { open_mode: Some(open_mode), ..entry }, true)
            .await?;
        Ok(FCall::ROpen { qid, iounit: 0 })
    }

    async fn do_create(&self, fid: u32, name: String, perm: u32, mode: u8) -> Result<FCall> {
        let entry = self.fids.get(fid).await?;
        let open_mode = OpenMode::from_bits(mode)?;
        let child = entry.node.create(&name, perm, open_mode, &entry.uname).await?;
        let qid = child.qid();
        self.fids
            .insert(fid, FidEntry { node: child, open_mode: Some(open_mode), uname: entry.uname }, true)
            .await?;
        Ok(FCall::RCreate { qid, iounit: 0 })
    }

    async fn do_read(&self, fid: u32, offset: u64, count: u32) -> Result<FCall> {
        let entry = self.fids.get(fid).await?;
        if entry.open_mode.map(|m| !m.can_read()).unwrap_or(true) {
            return Err(Error::NotPermitted);
        }
        let msize = self.negotiated_msize().await.unwrap_or(self.config.max_message_size);
        let cap = msize.saturating_sub(crate::wire::READ_REPLY_OVERHEAD);
        let data = entry.node.read(offset, count.min(cap)).await?;
        Ok(FCall::RRead { data })
    }

    async fn do_write(&self, fid: u32, offset: u64, data: Vec<u8>) -> Result<FCall> {
        let entry = self.fids.get(fid).await?;
        if entry.open_mode.map(|m| !m.can_write()).unwrap_or(true) {
            return Err(Error::NotPermitted);
        }
        let count = entry.node.write(offset, &data, &entry.uname).await?;
        Ok(FCall::RWrite { count })
    }

    async fn do_clunk(&self, fid: u32) -> Result<FCall> {
        let entry = self.fids.remove(fid).await.ok_or(Error::UnknownFid)?;
        let rclose = entry.open_mode.map(|m| m.rclose).unwrap_or(false);
        let _ = entry.node.clunk().await;
        if rclose {
            let _ = entry.node.remove().await;
        }
        Ok(FCall::RClunk)
    }

    async fn do_remove(&self, fid: u32) -> Result<FCall> {
        let entry = self.fids.remove(fid).await.ok_or(Error::UnknownFid)?;
        let result = entry.node.remove().await;
        let _ = entry.node.clunk().await;
        result.map(|_| FCall::RRemove)
    }

    async fn do_stat(&self, fid: u32) -> Result<FCall> {
        let entry = self.fids.get(fid).await?;
        let stat = entry.node.stat().await?;
        Ok(FCall::RStat { stat })
    }

    async fn do_wstat(&self, fid: u32, stat: StatRecord) -> Result<FCall> {
        let entry = self.fids.get(fid).await?;
        entry.node.wstat(&stat).await?;
        Ok(FCall::RWstat)
    }

    fn send_reply(&self, tag: u16, body: FCall) {
        let msg = Msg { tag, body };
        trace!("\t\u{2192} {:?}", msg);
        match encode_msg(&msg) {
            Ok(frame) => {
                if self.out_tx.send(frame).is_err() {
                    debug!("reply dropped, transport already closed");
                }
            }
            Err(e) => error!("failed to encode reply: {e}"),
        }
    }

    fn send_error(&self, tag: u16, err: Error) {
        if err.is_fatal() {
            warn!("connection-fatal error: {err}");
        }
        self.send_reply(tag, FCall::RError { ename: err.as_str().to_owned() });
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        info!("connection closed");
    }
}
