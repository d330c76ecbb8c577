//! Frame header read/write helpers.
//!
//! ```text
//! [version: u8][type: u8][body_len: u48 BE]
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::WireError;

/// The only protocol version this codec speaks.
pub const PROTO_VERSION: u8 = 2;

/// Size of the frame header in bytes.
pub const PROTO_HEADER_BYTES: usize = 8;

/// Largest body accepted from the server (128 MiB). Anything bigger is
/// treated as a corrupt stream rather than allocated.
pub const MAX_FRAME_BYTES: u64 = 128 * 1024 * 1024;

/// Frame body kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtoType {
    /// Text info commands.
    Info = 1,
    /// Security / admin commands.
    Admin = 2,
    /// Record messages (AS_MSG).
    Message = 3,
    /// Compressed record messages.
    Compressed = 4,
}

impl ProtoType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ProtoType::Info),
            2 => Some(ProtoType::Admin),
            3 => Some(ProtoType::Message),
            4 => Some(ProtoType::Compressed),
            _ => None,
        }
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoHeader {
    /// Body kind.
    pub kind: ProtoType,
    /// Body length in bytes (excluding this header).
    pub size: u64,
}

impl ProtoHeader {
    /// Writes the 8-byte header.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        if self.size >= 1 << 48 {
            return Err(WireError::FrameTooLarge(self.size));
        }
        w.write_u8(PROTO_VERSION)?;
        w.write_u8(self.kind as u8)?;
        w.write_u48::<BigEndian>(self.size)?;
        Ok(())
    }

    /// Reads and validates an 8-byte header.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let version = r.read_u8()?;
        if version != PROTO_VERSION {
            return Err(WireError::Version(version));
        }
        let raw_kind = r.read_u8()?;
        let kind = ProtoType::from_u8(raw_kind)
            .ok_or_else(|| WireError::malformed(format!("unknown frame type {raw_kind}")))?;
        let size = r.read_u48::<BigEndian>()?;
        if size > MAX_FRAME_BYTES {
            return Err(WireError::FrameTooLarge(size));
        }
        Ok(Self { kind, size })
    }
}

/// Writes a full frame (header + body) with a single `write_all`.
pub fn write_frame<W: Write>(w: &mut W, kind: ProtoType, body: &[u8]) -> Result<(), WireError> {
    let mut buf = Vec::with_capacity(PROTO_HEADER_BYTES + body.len());
    ProtoHeader {
        kind,
        size: body.len() as u64,
    }
    .write_to(&mut buf)?;
    buf.extend_from_slice(body);
    w.write_all(&buf)?;
    w.flush()?;
    Ok(())
}

/// Reads one frame and returns its body.
///
/// Fails with [`WireError::UnexpectedType`] when the frame is not of the
/// `expected` kind; compressed replies are never requested, so they land
/// here too.
pub fn read_frame<R: Read>(r: &mut R, expected: ProtoType) -> Result<Vec<u8>, WireError> {
    let header = ProtoHeader::read_from(r)?;
    if header.kind != expected {
        return Err(WireError::UnexpectedType {
            expected: expected as u8,
            actual: header.kind as u8,
        });
    }
    let mut body = vec![0u8; header.size as usize];
    r.read_exact(&mut body)?;
    Ok(body)
}
