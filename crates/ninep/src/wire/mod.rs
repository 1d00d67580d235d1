//! Core 9P2000 wire types: qids, open-mode/directory-mode bits, and the
//! stat record. All multi-byte integers are little-endian throughout the
//! crate; see [`codec`] for the actual (de)serialization.

pub mod codec;
pub mod fcall;

use bitflags::bitflags;

/// 9P2000 version string advertised during `Tversion`.
pub const P92000: &str = "9P2000";

/// The version string `Rversion` carries back when the server does not
/// understand the client's proposed version.
pub const VERSION_UNKNOWN: &str = "unknown";

/// Special tag which `Tversion`/`Rversion` must use as `tag`.
pub const NOTAG: u16 = 0xFFFF;

/// Special value meaning "no fid", used as `Tattach`'s `afid` when no
/// authentication is required.
pub const NOFID: u32 = 0xFFFFFFFF;

/// Fixed overhead of an `Rread` reply: size[4] type[1] tag[2] count[4].
pub const READ_REPLY_OVERHEAD: u32 = 11;

/// Minimum legal message size: the header alone.
pub const MIN_MESSAGE_SIZE: u32 = 7;

bitflags! {
    /// Bits in [`Qid`]'s type byte.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct QidType: u8 {
        const DIR     = 0x80;
        const APPEND  = 0x40;
        const EXCL    = 0x20;
        const MOUNT   = 0x10;
        const AUTH    = 0x08;
        const TMP     = 0x04;
        const SYMLINK = 0x02;
        const FILE    = 0x00;
    }
}

impl From<std::fs::FileType> for QidType {
    fn from(typ: std::fs::FileType) -> Self {
        let mut t = QidType::FILE;
        if typ.is_dir() {
            t.insert(QidType::DIR);
        }
        if typ.is_symlink() {
            t.insert(QidType::SYMLINK);
        }
        t
    }
}

bitflags! {
    /// Mode bits mirrored in a [`StatRecord`]'s `mode` field. The low 9
    /// bits are the rwx permission triads; the high bits mirror [`QidType`].
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct DMode: u32 {
        const DIR    = 0x80000000;
        const APPEND = 0x40000000;
        const EXCL   = 0x20000000;
        const MOUNT  = 0x10000000;
        const AUTH   = 0x08000000;
        const TMP    = 0x04000000;
        const READ   = 0x4;
        const WRITE  = 0x2;
        const EXEC   = 0x1;
    }
}

/// The sub-mode half of an open/create mode byte: OREAD/OWRITE/ORDWR/OEXEC.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpenSubMode {
    Read,
    Write,
    ReadWrite,
    Exec,
}

impl TryFrom<u8> for OpenSubMode {
    type Error = crate::error::Error;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits & 0x03 {
            0 => Ok(OpenSubMode::Read),
            1 => Ok(OpenSubMode::Write),
            2 => Ok(OpenSubMode::ReadWrite),
            3 => Ok(OpenSubMode::Exec),
            _ => unreachable!(),
        }
    }
}

/// A fully decoded open/create mode byte: OREAD=0/OWRITE=1/ORDWR=2/OEXEC=3,
/// or-able with OTRUNC=0x10 and ORCLOSE=0x40.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpenMode {
    pub submode: OpenSubMode,
    pub truncate: bool,
    pub rclose: bool,
}

impl OpenMode {
    pub fn from_bits(bits: u8) -> Result<Self, crate::error::Error> {
        Ok(OpenMode {
            submode: OpenSubMode::try_from(bits)?,
            truncate: bits & 0x10 != 0,
            rclose: bits & 0x40 != 0,
        })
    }

    pub fn to_bits(self) -> u8 {
        let mut b = match self.submode {
            OpenSubMode::Read => 0,
            OpenSubMode::Write => 1,
            OpenSubMode::ReadWrite => 2,
            OpenSubMode::Exec => 3,
        };
        if self.truncate {
            b |= 0x10;
        }
        if self.rclose {
            b |= 0x40;
        }
        b
    }

    pub fn can_write(self) -> bool {
        matches!(self.submode, OpenSubMode::Write | OpenSubMode::ReadWrite)
    }

    pub fn can_read(self) -> bool {
        matches!(
            self.submode,
            OpenSubMode::Read | OpenSubMode::ReadWrite | OpenSubMode::Exec
        )
    }
}

/// A 13-byte persistent object identity: type bits, a version counter, and
/// a server-unique path. Two qids with equal (type, path) denote the same
/// object across its lifetime.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Qid {
    pub typ: QidType,
    pub version: u32,
    pub path: u64,
}

impl Qid {
    pub const ENCODED_SIZE: u16 = 13;
}

/// Sentinel integers meaning "leave this field unchanged" in a `Twstat`
/// body (see `spec.md` §4.10).
pub mod dont_touch {
    pub const U32: u32 = !0;
    pub const U64: u64 = !0;
}

/// Directory-entry metadata as carried by `Rstat`/`Twstat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatRecord {
    pub typ: u16,
    pub dev: u32,
    pub qid: Qid,
    pub mode: u32,
    pub atime: u32,
    pub mtime: u32,
    pub length: u64,
    pub name: String,
    pub uid: String,
    pub gid: String,
    pub muid: String,
}

impl StatRecord {
    /// The encoded size of this record's body, not counting the 2-byte
    /// length prefix that wraps it in `Rstat`/`Twstat`.
    pub fn encoded_len(&self) -> u16 {
        let fixed = 2 /*typ*/ + 4 /*dev*/ + Qid::ENCODED_SIZE + 4 /*mode*/
            + 4 /*atime*/ + 4 /*mtime*/ + 8 /*length*/
            + 4 * 2 /*four string length prefixes*/;
        fixed
            + self.name.len() as u16
            + self.uid.len() as u16
            + self.gid.len() as u16
            + self.muid.len() as u16
    }

    /// A stat record meaning "don't touch any field", for use in `Twstat`.
    pub fn unchanged() -> Self {
        StatRecord {
            typ: 0,
            dev: 0,
            qid: Qid {
                typ: QidType::empty(),
                version: dont_touch::U32,
                path: dont_touch::U64,
            },
            mode: dont_touch::U32,
            atime: dont_touch::U32,
            mtime: dont_touch::U32,
            length: dont_touch::U64,
            name: String::new(),
            uid: String::new(),
            gid: String::new(),
            muid: String::new(),
        }
    }
}
