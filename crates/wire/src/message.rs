//! AS_MSG encoding and decoding, plus the two request builders Blockcheck
//! needs (filtered metadata scan, touch).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::filter::DeviceSizeFilter;
use crate::proto::{read_frame, write_frame, ProtoType};
use crate::WireError;

/// Size of the fixed message header.
pub const MSG_HEADER_BYTES: u8 = 22;

/// info1: read the record.
pub const INFO1_READ: u8 = 1;
/// info1: return every bin.
pub const INFO1_GET_ALL: u8 = 1 << 1;
/// info1: return metadata only, no bin data.
pub const INFO1_NOBINDATA: u8 = 1 << 5;
/// info2: write the record.
pub const INFO2_WRITE: u8 = 1;
/// info3: last message of a multi-record reply.
pub const INFO3_LAST: u8 = 1;

/// Operation code for "touch" (rewrite with a new expiration, same bins).
pub const OP_TOUCH: u8 = 11;

/// Field type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// Namespace name.
    Namespace = 0,
    /// Set name.
    Set = 1,
    /// User key (particle type byte + value).
    Key = 2,
    /// 20-byte RIPEMD-160 digest.
    Digest = 4,
    /// Scan/transaction id (u64).
    TransactionId = 7,
    /// Legacy scan options: priority/flags byte + percent byte.
    ScanOptions = 8,
    /// Server-side scan socket timeout (u32 ms).
    ScanTimeout = 9,
    /// Filter expression or predicate expression.
    Filter = 43,
}

/// Fixed 22-byte header of every message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgHeader {
    pub info1: u8,
    pub info2: u8,
    pub info3: u8,
    pub result_code: u8,
    pub generation: u32,
    /// Record expiration; on requests this is the TTL to apply.
    pub expiration: u32,
    /// Transaction timeout in milliseconds.
    pub timeout_ms: u32,
}

/// A single message field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Raw field type byte (see [`FieldType`]).
    pub kind: u8,
    pub data: Vec<u8>,
}

impl Field {
    /// Creates a field of a known type.
    pub fn new(kind: FieldType, data: Vec<u8>) -> Self {
        Self {
            kind: kind as u8,
            data,
        }
    }
}

/// A single bin operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub op: u8,
    pub particle_type: u8,
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

/// A decoded or to-be-encoded message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub header: MsgHeader,
    pub fields: Vec<Field>,
    pub ops: Vec<Op>,
}

impl Message {
    /// Returns the data of the first field of type `kind`.
    pub fn field(&self, kind: FieldType) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.kind == kind as u8)
            .map(|f| f.data.as_slice())
    }

    /// Serializes the message body (no frame header).
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(MSG_HEADER_BYTES as usize + 64);
        let h = &self.header;

        buf.write_u8(MSG_HEADER_BYTES)?;
        buf.write_u8(h.info1)?;
        buf.write_u8(h.info2)?;
        buf.write_u8(h.info3)?;
        buf.write_u8(0)?; // unused
        buf.write_u8(h.result_code)?;
        buf.write_u32::<BigEndian>(h.generation)?;
        buf.write_u32::<BigEndian>(h.expiration)?;
        buf.write_u32::<BigEndian>(h.timeout_ms)?;
        buf.write_u16::<BigEndian>(count_u16(self.fields.len(), "fields")?)?;
        buf.write_u16::<BigEndian>(count_u16(self.ops.len(), "ops")?)?;

        for f in &self.fields {
            buf.write_u32::<BigEndian>(f.data.len() as u32 + 1)?;
            buf.write_u8(f.kind)?;
            buf.extend_from_slice(&f.data);
        }

        for op in &self.ops {
            if op.name.len() > u8::MAX as usize {
                return Err(WireError::malformed("bin name longer than 255 bytes"));
            }
            let size = 4 + op.name.len() + op.value.len();
            buf.write_u32::<BigEndian>(size as u32)?;
            buf.write_u8(op.op)?;
            buf.write_u8(op.particle_type)?;
            buf.write_u8(0)?; // version
            buf.write_u8(op.name.len() as u8)?;
            buf.extend_from_slice(&op.name);
            buf.extend_from_slice(&op.value);
        }

        Ok(buf)
    }

    /// Decodes one message from the front of `input`, advancing it past the
    /// consumed bytes. A reply frame may carry several messages back to back.
    pub fn decode(input: &mut &[u8]) -> Result<Self, WireError> {
        let header_sz = input.read_u8()?;
        if header_sz != MSG_HEADER_BYTES {
            return Err(WireError::malformed(format!(
                "message header size {header_sz}, expected {MSG_HEADER_BYTES}"
            )));
        }
        let info1 = input.read_u8()?;
        let info2 = input.read_u8()?;
        let info3 = input.read_u8()?;
        let _unused = input.read_u8()?;
        let result_code = input.read_u8()?;
        let generation = input.read_u32::<BigEndian>()?;
        let expiration = input.read_u32::<BigEndian>()?;
        let timeout_ms = input.read_u32::<BigEndian>()?;
        let n_fields = input.read_u16::<BigEndian>()?;
        let n_ops = input.read_u16::<BigEndian>()?;

        let mut fields = Vec::with_capacity(n_fields as usize);
        for _ in 0..n_fields {
            let size = input.read_u32::<BigEndian>()? as usize;
            if size == 0 || size > input.len() {
                return Err(WireError::malformed(format!("field size {size} out of bounds")));
            }
            let kind = input.read_u8()?;
            let mut data = vec![0u8; size - 1];
            input.read_exact(&mut data)?;
            fields.push(Field { kind, data });
        }

        let mut ops = Vec::with_capacity(n_ops as usize);
        for _ in 0..n_ops {
            let size = input.read_u32::<BigEndian>()? as usize;
            if size < 4 || size > input.len() {
                return Err(WireError::malformed(format!("op size {size} out of bounds")));
            }
            let op = input.read_u8()?;
            let particle_type = input.read_u8()?;
            let _version = input.read_u8()?;
            let name_len = input.read_u8()? as usize;
            if 4 + name_len > size {
                return Err(WireError::malformed("bin name overruns operation"));
            }
            let mut name = vec![0u8; name_len];
            input.read_exact(&mut name)?;
            let mut value = vec![0u8; size - 4 - name_len];
            input.read_exact(&mut value)?;
            ops.push(Op {
                op,
                particle_type,
                name,
                value,
            });
        }

        Ok(Self {
            header: MsgHeader {
                info1,
                info2,
                info3,
                result_code,
                generation,
                expiration,
                timeout_ms,
            },
            fields,
            ops,
        })
    }
}

fn count_u16(n: usize, what: &str) -> Result<u16, WireError> {
    u16::try_from(n).map_err(|_| WireError::malformed(format!("too many {what}: {n}")))
}

/// Builds a legacy (pre-partition) scan request returning only metadata for
/// records that pass `filter`.
pub fn scan_request(
    namespace: &str,
    set: Option<&str>,
    task_id: u64,
    timeout_ms: u32,
    filter: Option<&DeviceSizeFilter>,
) -> Result<Message, WireError> {
    let mut fields = vec![Field::new(FieldType::Namespace, namespace.as_bytes().to_vec())];
    if let Some(set) = set.filter(|s| !s.is_empty()) {
        fields.push(Field::new(FieldType::Set, set.as_bytes().to_vec()));
    }
    fields.push(Field::new(FieldType::TransactionId, task_id.to_be_bytes().to_vec()));
    // default priority, no fail-on-cluster-change, 100 percent
    fields.push(Field::new(FieldType::ScanOptions, vec![0, 100]));
    fields.push(Field::new(FieldType::ScanTimeout, timeout_ms.to_be_bytes().to_vec()));
    if let Some(filter) = filter {
        fields.push(Field::new(FieldType::Filter, filter.encode()?));
    }

    Ok(Message {
        header: MsgHeader {
            info1: INFO1_READ | INFO1_NOBINDATA,
            timeout_ms,
            ..MsgHeader::default()
        },
        fields,
        ops: Vec::new(),
    })
}

/// Builds a touch request addressed by digest.
///
/// `ttl` of 0 tells the server to apply the namespace default TTL.
pub fn touch_request(
    namespace: &str,
    set: &str,
    digest: &[u8; 20],
    ttl: u32,
    timeout_ms: u32,
) -> Message {
    let mut fields = vec![Field::new(FieldType::Namespace, namespace.as_bytes().to_vec())];
    if !set.is_empty() {
        fields.push(Field::new(FieldType::Set, set.as_bytes().to_vec()));
    }
    fields.push(Field::new(FieldType::Digest, digest.to_vec()));

    Message {
        header: MsgHeader {
            info2: INFO2_WRITE,
            expiration: ttl,
            timeout_ms,
            ..MsgHeader::default()
        },
        fields,
        ops: vec![Op {
            op: OP_TOUCH,
            particle_type: 0,
            name: Vec::new(),
            value: Vec::new(),
        }],
    }
}

/// Sends a single-record request and returns the reply message.
pub fn read_message_reply<S: Read + Write>(
    stream: &mut S,
    request: &Message,
) -> Result<Message, WireError> {
    write_frame(stream, ProtoType::Message, &request.encode()?)?;
    let body = read_frame(stream, ProtoType::Message)?;
    Message::decode(&mut body.as_slice())
}
