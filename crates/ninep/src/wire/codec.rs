//! Pure (stateless) encode/decode for 9P messages, bit-exact to
//! `spec.md` §6: little-endian integers, length-prefixed strings, no
//! terminators. Operates on caller-supplied readers/writers and never
//! allocates beyond what a decoded value itself needs.

use std::io::{Cursor, Read};
use std::mem;
use std::ops::{Shl, Shr};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;

use crate::error::{Error, Result};

use super::fcall::{FCall, MsgType, Msg};
use super::{Qid, QidType, StatRecord};

macro_rules! decode {
    ($decoder:expr) => {
        Decodable::decode(&mut $decoder)?
    };
}

fn read_exact_vec<R: Read + ?Sized>(r: &mut R, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0; size];
    r.read_exact(&mut buf[..])?;
    Ok(buf)
}

/// A serializing-specific result, to let `<<`/`>>` short-circuit on error
/// the way `?` would in ordinary code.
pub struct SResult<T>(std::io::Result<T>);

/// Wraps a writer, accumulating the number of bytes written so callers
/// can learn an encoded length without a second pass.
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    pub fn encode<T: Encodable>(&mut self, data: &T) -> std::io::Result<usize> {
        let n = data.encode(&mut self.writer)?;
        self.bytes += n;
        Ok(n)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut enc) => match enc.encode(rhs) {
                Ok(_) => SResult(Ok(enc)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// Wraps a reader with the matching `>>` decode overload.
pub struct Decoder<R> {
    reader: R,
}

impl<R: ReadBytesExt> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder { reader }
    }

    pub fn decode<T: Decodable>(&mut self) -> std::io::Result<T> {
        Decodable::decode(&mut self.reader)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for Decoder<R> {
    type Output = SResult<Decoder<R>>;
    fn shr(mut self, rhs: &'a mut T) -> Self::Output {
        match self.decode() {
            Ok(v) => {
                *rhs = v;
                SResult(Ok(self))
            }
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for SResult<Decoder<R>> {
    type Output = Self;
    fn shr(self, rhs: &'a mut T) -> Self::Output {
        match self.0 {
            Ok(mut dec) => match dec.decode() {
                Ok(v) => {
                    *rhs = v;
                    SResult(Ok(dec))
                }
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// A type that can be serialized to a little-endian byte stream.
pub trait Encodable {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize>;
}

/// A type that can be deserialized from a little-endian byte stream.
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        w.write_u8(*self).map(|_| mem::size_of::<Self>())
    }
}
impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
        r.read_u8()
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        w.write_u16::<LittleEndian>(*self).map(|_| mem::size_of::<Self>())
    }
}
impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        w.write_u32::<LittleEndian>(*self).map(|_| mem::size_of::<Self>())
    }
}
impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        w.write_u64::<LittleEndian>(*self).map(|_| mem::size_of::<Self>())
    }
}
impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        let mut n = (self.len() as u16).encode(w)?;
        w.write_all(self.as_bytes())?;
        n += self.len();
        Ok(n)
    }
}
impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let bytes = read_exact_vec(r, len as usize)?;
        String::from_utf8(bytes).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e)
        })
    }
}

impl Encodable for Vec<u8> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        let n = (self.len() as u32).encode(w)? + self.len();
        w.write_all(self)?;
        Ok(n)
    }
}
impl Decodable for Vec<u8> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
        let len: u32 = Decodable::decode(r)?;
        read_exact_vec(r, len as usize)
    }
}

/// 9P reuses the `[n] ... (n times)` u16-length-prefix convention for
/// lists of qids and of names. Unlike the teacher's blanket `Vec<T>`
/// impl, these are written out per-type: a single blanket impl would
/// collide with the u32-length-prefixed raw-bytes `Vec<u8>` impl above
/// under Rust's coherence rules.
macro_rules! impl_u16_prefixed_vec {
    ($t:ty) => {
        impl Encodable for Vec<$t> {
            fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
                match self
                    .iter()
                    .fold(Encoder::new(w) << &(self.len() as u16), |acc, item| acc << item)
                {
                    SResult(Ok(enc)) => Ok(enc.bytes_written()),
                    SResult(Err(e)) => Err(e),
                }
            }
        }
        impl Decodable for Vec<$t> {
            fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
                let len: u16 = Decodable::decode(r)?;
                let mut v = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    v.push(Decodable::decode(r)?);
                }
                Ok(v)
            }
        }
    };
}

impl_u16_prefixed_vec!(Qid);
impl_u16_prefixed_vec!(String);

impl Encodable for Qid {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        match Encoder::new(w) << &self.typ.bits() << &self.version << &self.path {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}
impl Decodable for Qid {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
        let typ: u8 = decode!(r);
        let version: u32 = decode!(r);
        let path: u64 = decode!(r);
        Ok(Qid {
            typ: QidType::from_bits_truncate(typ),
            version,
            path,
        })
    }
}

/// A stat record's own internal length prefix, followed by its fields.
/// `Rstat`/`Twstat` wrap this again with an outer count (see
/// `encode_outer_stat`/`decode_outer_stat` below) — the well-known
/// double length prefix of the classic protocol's stat encoding.
impl Encodable for StatRecord {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        let size = self.encoded_len();
        match Encoder::new(w)
            << &size
            << &self.typ
            << &self.dev
            << &self.qid
            << &self.mode
            << &self.atime
            << &self.mtime
            << &self.length
            << &self.name
            << &self.uid
            << &self.gid
            << &self.muid
        {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}
impl Decodable for StatRecord {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
        let _size: u16 = decode!(r);
        Ok(StatRecord {
            typ: decode!(r),
            dev: decode!(r),
            qid: decode!(r),
            mode: decode!(r),
            atime: decode!(r),
            mtime: decode!(r),
            length: decode!(r),
            name: decode!(r),
            uid: decode!(r),
            gid: decode!(r),
            muid: decode!(r),
        })
    }
}

fn encode_outer_stat<W: WriteBytesExt>(stat: &StatRecord, w: &mut W) -> std::io::Result<usize> {
    let mut buf = Vec::new();
    stat.encode(&mut buf)?;
    let n = (buf.len() as u16).encode(w)? + buf.len();
    w.write_all(&buf)?;
    Ok(n)
}

fn decode_outer_stat<R: ReadBytesExt>(r: &mut R) -> std::io::Result<StatRecord> {
    let _outer_len: u16 = decode!(r);
    Decodable::decode(r)
}

impl Encodable for Msg {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        use FCall::*;

        let typ = self.body.msg_type();
        let buf = Encoder::new(w) << &(typ as u8) << &self.tag;

        let buf = match &self.body {
            TVersion { msize, version } => buf << msize << version,
            RVersion { msize, version } => buf << msize << version,
            TAuth { afid, uname, aname } => buf << afid << uname << aname,
            RAuth { aqid } => buf << aqid,
            TAttach { fid, afid, uname, aname } => buf << fid << afid << uname << aname,
            RAttach { qid } => buf << qid,
            RError { ename } => buf << ename,
            TFlush { oldtag } => buf << oldtag,
            RFlush => buf,
            TWalk { fid, newfid, wnames } => buf << fid << newfid << wnames,
            RWalk { wqids } => buf << wqids,
            TOpen { fid, mode } => buf << fid << mode,
            ROpen { qid, iounit } => buf << qid << iounit,
            TCreate { fid, name, perm, mode } => buf << fid << name << perm << mode,
            RCreate { qid, iounit } => buf << qid << iounit,
            TRead { fid, offset, count } => buf << fid << offset << count,
            RRead { data } => buf << data,
            TWrite { fid, offset, data } => buf << fid << offset << data,
            RWrite { count } => buf << count,
            TClunk { fid } => buf << fid,
            RClunk => buf,
            TRemove { fid } => buf << fid,
            RRemove => buf,
            TStat { fid } => buf << fid,
            RStat { stat } => match buf {
                SResult(Ok(mut enc)) => match encode_outer_stat(stat, &mut enc.writer) {
                    Ok(n) => {
                        enc.bytes += n;
                        SResult(Ok(enc))
                    }
                    Err(e) => SResult(Err(e)),
                },
                e => e,
            },
            TWstat { fid, stat } => match buf << fid {
                SResult(Ok(mut enc)) => match encode_outer_stat(stat, &mut enc.writer) {
                    Ok(n) => {
                        enc.bytes += n;
                        SResult(Ok(enc))
                    }
                    Err(e) => SResult(Err(e)),
                },
                e => e,
            },
            RWstat => buf,
        };

        match buf {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

impl Decodable for Msg {
    fn decode<R: ReadBytesExt>(r: &mut R) -> std::io::Result<Self> {
        let typ: u8 = decode!(r);
        let tag: u16 = decode!(r);
        let msg_type = MsgType::from_u8(typ);

        let body = match msg_type {
            Some(MsgType::TVersion) => FCall::TVersion {
                msize: decode!(r),
                version: decode!(r),
            },
            Some(MsgType::RVersion) => FCall::RVersion {
                msize: decode!(r),
                version: decode!(r),
            },
            Some(MsgType::TAuth) => FCall::TAuth {
                afid: decode!(r),
                uname: decode!(r),
                aname: decode!(r),
            },
            Some(MsgType::RAuth) => FCall::RAuth { aqid: decode!(r) },
            Some(MsgType::TAttach) => FCall::TAttach {
                fid: decode!(r),
                afid: decode!(r),
                uname: decode!(r),
                aname: decode!(r),
            },
            Some(MsgType::RAttach) => FCall::RAttach { qid: decode!(r) },
            Some(MsgType::RError) => FCall::RError { ename: decode!(r) },
            Some(MsgType::TFlush) => FCall::TFlush { oldtag: decode!(r) },
            Some(MsgType::RFlush) => FCall::RFlush,
            Some(MsgType::TWalk) => FCall::TWalk {
                fid: decode!(r),
                newfid: decode!(r),
                wnames: decode!(r),
            },
            Some(MsgType::RWalk) => FCall::RWalk { wqids: decode!(r) },
            Some(MsgType::TOpen) => FCall::TOpen {
                fid: decode!(r),
                mode: decode!(r),
            },
            Some(MsgType::ROpen) => FCall::ROpen {
                qid: decode!(r),
                iounit: decode!(r),
            },
            Some(MsgType::TCreate) => FCall::TCreate {
                fid: decode!(r),
                name: decode!(r),
                perm: decode!(r),
                mode: decode!(r),
            },
            Some(MsgType::RCreate) => FCall::RCreate {
                qid: decode!(r),
                iounit: decode!(r),
            },
            Some(MsgType::TRead) => FCall::TRead {
                fid: decode!(r),
                offset: decode!(r),
                count: decode!(r),
            },
            Some(MsgType::RRead) => FCall::RRead { data: decode!(r) },
            Some(MsgType::TWrite) => FCall::TWrite {
                fid: decode!(r),
                offset: decode!(r),
                data: decode!(r),
            },
            Some(MsgType::RWrite) => FCall::RWrite { count: decode!(r) },
            Some(MsgType::TClunk) => FCall::TClunk { fid: decode!(r) },
            Some(MsgType::RClunk) => FCall::RClunk,
            Some(MsgType::TRemove) => FCall::TRemove { fid: decode!(r) },
            Some(MsgType::RRemove) => FCall::RRemove,
            Some(MsgType::TStat) => FCall::TStat { fid: decode!(r) },
            Some(MsgType::RStat) => FCall::RStat {
                stat: decode_outer_stat(r)?,
            },
            Some(MsgType::TWstat) => FCall::TWstat {
                fid: decode!(r),
                stat: decode_outer_stat(r)?,
            },
            Some(MsgType::RWstat) => FCall::RWstat,
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "unknown message type",
                ))
            }
        };

        Ok(Msg { tag, body })
    }
}

/// Decode one message from an in-memory frame (as produced by the
/// framer). `MalformedMessage` covers truncated bodies and string
/// lengths exceeding the remaining bytes.
pub fn decode_msg(frame: &[u8]) -> Result<Msg> {
    let mut cursor = Cursor::new(frame);
    Decodable::decode(&mut cursor).map_err(|_| Error::MalformedMessage)
}

/// Encode a message body, returning the complete wire frame including
/// the 4-byte size prefix written last, once the body's length is known.
pub fn encode_msg(msg: &Msg) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    msg.encode(&mut body).map_err(|_| Error::MalformedMessage)?;
    let mut frame = Vec::with_capacity(body.len() + 4);
    let total = (body.len() + 4) as u32;
    frame.extend_from_slice(&total.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::P92000;

    #[test]
    fn encode_decode_primitives() {
        let mut buf = Vec::new();
        42u32.encode(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let back: u32 = Decodable::decode(&mut cursor).unwrap();
        assert_eq!(back, 42);
    }

    #[test]
    fn qid_roundtrip() {
        let qid = Qid {
            typ: QidType::DIR,
            version: 7,
            path: 99,
        };
        let mut buf = Vec::new();
        qid.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), Qid::ENCODED_SIZE as usize);
        let mut cursor = Cursor::new(buf);
        let back: Qid = Decodable::decode(&mut cursor).unwrap();
        assert_eq!(back, qid);
    }

    #[test]
    fn version_message_roundtrip() {
        let msg = Msg {
            tag: super::super::NOTAG,
            body: FCall::TVersion {
                msize: 8192,
                version: P92000.to_owned(),
            },
        };
        let frame = encode_msg(&msg).unwrap();
        assert_eq!(frame.len(), 19);
        let decoded = decode_msg(&frame[4..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn stat_record_roundtrip() {
        let stat = StatRecord {
            typ: 0,
            dev: 0,
            qid: Qid { typ: QidType::FILE, version: 0, path: 2 },
            mode: 0o644,
            atime: 0,
            mtime: 0,
            length: 5,
            name: "hello".into(),
            uid: "u".into(),
            gid: "u".into(),
            muid: "u".into(),
        };
        let msg = Msg {
            tag: 4,
            body: FCall::RStat { stat: stat.clone() },
        };
        let frame = encode_msg(&msg).unwrap();
        let decoded = decode_msg(&frame[4..]).unwrap();
        match decoded.body {
            FCall::RStat { stat: got } => assert_eq!(got, stat),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn malformed_message_is_reported() {
        let err = decode_msg(&[0xff]).unwrap_err();
        matches!(err, Error::MalformedMessage);
    }
}
