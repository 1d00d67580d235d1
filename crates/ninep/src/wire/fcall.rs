//! The classic 9P2000 request/reply variants and their type codes.

use enum_primitive::*;

use super::{Qid, StatRecord};

enum_from_primitive! {
    /// Wire type code. Even codes are requests (`T*`), odd codes are
    /// their matching replies (`R*`). `Terror` (106) is reserved and
    /// never appears on the wire.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum MsgType {
        TVersion = 100,
        RVersion,
        TAuth,
        RAuth,
        TAttach,
        RAttach,
        // TError = 106, reserved, never sent
        RError = 107,
        TFlush = 108,
        RFlush,
        TWalk,
        RWalk,
        TOpen,
        ROpen,
        TCreate,
        RCreate,
        TRead,
        RRead,
        TWrite,
        RWrite,
        TClunk,
        RClunk,
        TRemove,
        RRemove,
        TStat,
        RStat,
        TWstat,
        RWstat,
    }
}

impl MsgType {
    pub fn is_t(&self) -> bool {
        !self.is_r()
    }

    pub fn is_r(&self) -> bool {
        use MsgType::*;
        matches!(
            *self,
            RVersion | RAuth | RAttach | RError | RFlush | RWalk | ROpen | RCreate | RRead
                | RWrite | RClunk | RRemove | RStat | RWstat
        )
    }
}

/// A decoded 9P2000 request or reply body, with its fixed header
/// (size/type/tag) already stripped.
#[derive(Clone, Debug, PartialEq)]
pub enum FCall {
    TVersion { msize: u32, version: String },
    RVersion { msize: u32, version: String },

    TAuth { afid: u32, uname: String, aname: String },
    RAuth { aqid: Qid },

    TAttach { fid: u32, afid: u32, uname: String, aname: String },
    RAttach { qid: Qid },

    RError { ename: String },

    TFlush { oldtag: u16 },
    RFlush,

    TWalk { fid: u32, newfid: u32, wnames: Vec<String> },
    RWalk { wqids: Vec<Qid> },

    TOpen { fid: u32, mode: u8 },
    ROpen { qid: Qid, iounit: u32 },

    TCreate { fid: u32, name: String, perm: u32, mode: u8 },
    RCreate { qid: Qid, iounit: u32 },

    TRead { fid: u32, offset: u64, count: u32 },
    RRead { data: Vec<u8> },

    TWrite { fid: u32, offset: u64, data: Vec<u8> },
    RWrite { count: u32 },

    TClunk { fid: u32 },
    RClunk,

    TRemove { fid: u32 },
    RRemove,

    TStat { fid: u32 },
    RStat { stat: StatRecord },

    TWstat { fid: u32, stat: StatRecord },
    RWstat,
}

impl FCall {
    pub fn msg_type(&self) -> MsgType {
        use FCall::*;
        match self {
            TVersion { .. } => MsgType::TVersion,
            RVersion { .. } => MsgType::RVersion,
            TAuth { .. } => MsgType::TAuth,
            RAuth { .. } => MsgType::RAuth,
            TAttach { .. } => MsgType::TAttach,
            RAttach { .. } => MsgType::RAttach,
            RError { .. } => MsgType::RError,
            TFlush { .. } => MsgType::TFlush,
            RFlush => MsgType::RFlush,
            TWalk { .. } => MsgType::TWalk,
            RWalk { .. } => MsgType::RWalk,
            TOpen { .. } => MsgType::TOpen,
            ROpen { .. } => MsgType::ROpen,
            TCreate { .. } => MsgType::TCreate,
            RCreate { .. } => MsgType::RCreate,
            TRead { .. } => MsgType::TRead,
            RRead { .. } => MsgType::RRead,
            TWrite { .. } => MsgType::TWrite,
            RWrite { .. } => MsgType::RWrite,
            TClunk { .. } => MsgType::TClunk,
            RClunk => MsgType::RClunk,
            TRemove { .. } => MsgType::TRemove,
            RRemove => MsgType::RRemove,
            TStat { .. } => MsgType::TStat,
            RStat { .. } => MsgType::RStat,
            TWstat { .. } => MsgType::TWstat,
            RWstat => MsgType::RWstat,
        }
    }

    /// The fid this request addresses, if any (used by the server to
    /// resolve fid references before dispatch).
    pub fn fid(&self) -> Option<u32> {
        use FCall::*;
        match *self {
            TAuth { afid, .. } if afid != super::NOFID => Some(afid),
            TAttach { fid, .. } => Some(fid),
            TWalk { fid, .. } => Some(fid),
            TOpen { fid, .. } => Some(fid),
            TCreate { fid, .. } => Some(fid),
            TRead { fid, .. } => Some(fid),
            TWrite { fid, .. } => Some(fid),
            TClunk { fid } => Some(fid),
            TRemove { fid } => Some(fid),
            TStat { fid } => Some(fid),
            TWstat { fid, .. } => Some(fid),
            _ => None,
        }
    }
}

/// A request or reply with its header fields reattached.
#[derive(Clone, Debug, PartialEq)]
pub struct Msg {
    pub tag: u16,
    pub body: FCall,
}
