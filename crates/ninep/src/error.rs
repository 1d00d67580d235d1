//! Error kinds and the classic 9P2000 error-string table.
//!
//! 9P2000 has no structured error code on the wire: `Rerror` carries a
//! human-readable string. The mapping below is drawn from the same
//! `net/9p/error.c` table any Plan 9 derived server uses.

use std::fmt;
use std::io;

/// Canonical 9P2000 error strings, one constant per distinct wire string.
pub mod string {
    pub const MALFORMED_MESSAGE: &str = "bogus wstat buffer";
    pub const PROTOCOL_VIOLATION: &str = "protocol botch";
    pub const UNKNOWN_FID: &str = "fid unknown or out of range";
    pub const FID_IN_USE: &str = "fid already in use";
    pub const UNKNOWN_TAG: &str = "unknown tag";
    pub const NOT_DIR: &str = "not a directory";
    pub const NOT_FILE: &str = "not a file";
    pub const IS_DIR: &str = "Is a directory";
    pub const NOT_PERMITTED: &str = "Operation not permitted";
    pub const NO_ENTRY: &str = "directory entry not found";
    pub const EXISTS: &str = "file already exists";
    pub const NO_SPACE: &str = "file system is full";
    pub const READ_ONLY: &str = "read only file system";
    pub const MESSAGE_TOO_LARGE: &str = "Message too long";
    pub const TRANSPORT_CLOSED: &str = "Cannot send after transport endpoint shutdown";
    pub const NOT_EMPTY: &str = "directory is not empty";
    pub const ALREADY_OPEN: &str = "file already open";
    pub const BAD_OFFSET: &str = "bad offset in directory read";
    pub const IO_ERROR: &str = "Input/output error";
}

/// An error kind as specified by the protocol's error handling design.
///
/// `Io` is not itself a protocol kind; it carries host I/O failures from
/// backends through to an `Rerror` string via [`Error::as_str`].
#[derive(Debug)]
pub enum Error {
    MalformedMessage,
    ProtocolViolation,
    UnknownFid,
    FidInUse,
    UnknownTag,
    NotDir,
    NotFile,
    IsDir,
    NotPermitted,
    NoEntry,
    Exists,
    NoSpace,
    ReadOnly,
    MessageTooLarge,
    TransportClosed,
    NotEmpty,
    BadOffset,
    AlreadyOpen,
    Io(io::Error),
}

impl Error {
    /// The string that goes on the wire in an `Rerror` body.
    pub fn as_str(&self) -> &str {
        use string::*;
        match self {
            Error::MalformedMessage => MALFORMED_MESSAGE,
            Error::ProtocolViolation => PROTOCOL_VIOLATION,
            Error::UnknownFid => UNKNOWN_FID,
            Error::FidInUse => FID_IN_USE,
            Error::UnknownTag => UNKNOWN_TAG,
            Error::NotDir => NOT_DIR,
            Error::NotFile => NOT_FILE,
            Error::IsDir => IS_DIR,
            Error::NotPermitted => NOT_PERMITTED,
            Error::NoEntry => NO_ENTRY,
            Error::Exists => EXISTS,
            Error::NoSpace => NO_SPACE,
            Error::ReadOnly => READ_ONLY,
            Error::MessageTooLarge => MESSAGE_TOO_LARGE,
            Error::TransportClosed => TRANSPORT_CLOSED,
            Error::NotEmpty => NOT_EMPTY,
            Error::BadOffset => BAD_OFFSET,
            Error::AlreadyOpen => ALREADY_OPEN,
            Error::Io(_) => IO_ERROR,
        }
    }

    /// Connection-fatal errors per the protocol's propagation policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ProtocolViolation | Error::TransportClosed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Error::NoEntry,
            io::ErrorKind::PermissionDenied => Error::NotPermitted,
            io::ErrorKind::AlreadyExists => Error::Exists,
            _ => Error::Io(e),
        }
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        match e {
            nix::Error::ENOENT => Error::NoEntry,
            nix::Error::EACCES | nix::Error::EPERM => Error::NotPermitted,
            nix::Error::EEXIST => Error::Exists,
            nix::Error::ENOTDIR => Error::NotDir,
            nix::Error::EISDIR => Error::IsDir,
            nix::Error::ENOTEMPTY => Error::NotEmpty,
            nix::Error::ENOSPC => Error::NoSpace,
            _ => Error::Io(io::Error::from(e)),
        }
    }
}

/// A sentinel used by composable backends (union, service registry) to
/// signal "I do not own this node" instead of a genuine failure.
pub const NOT_OWNED: Error = Error::NoEntry;

pub type Result<T> = std::result::Result<T, Error>;
