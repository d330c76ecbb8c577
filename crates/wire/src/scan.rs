//! Streaming decoder for scan replies.
//!
//! A scan reply is a sequence of message frames, each holding one or more
//! record messages. The stream ends with a message flagged `INFO3_LAST`
//! (or carrying result code 2). Records are decoded lazily so a caller can
//! stop consuming at any point by dropping the reader.

use byteorder::{BigEndian, ReadBytesExt};
use std::fmt;
use std::io::Read;

use tracing::trace;

use crate::message::{FieldType, Message, INFO3_LAST};
use crate::proto::{read_frame, ProtoType};
use crate::{WireError, RESULT_KEY_NOT_FOUND, RESULT_OK};

/// Size of a record digest.
pub const DIGEST_BYTES: usize = 20;

const PARTICLE_INTEGER: u8 = 1;
const PARTICLE_STRING: u8 = 3;
const PARTICLE_BLOB: u8 = 4;

/// The user-supplied primary key, returned only when the record was written
/// with "send key".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserKey {
    Int(i64),
    Str(String),
    Blob(Vec<u8>),
}

impl UserKey {
    fn decode(data: &[u8]) -> Result<Self, WireError> {
        let (&particle, value) = data
            .split_first()
            .ok_or_else(|| WireError::malformed("empty key field"))?;
        match particle {
            PARTICLE_INTEGER => {
                let mut v = value;
                Ok(UserKey::Int(v.read_i64::<BigEndian>()?))
            }
            PARTICLE_STRING => Ok(UserKey::Str(String::from_utf8_lossy(value).into_owned())),
            PARTICLE_BLOB => Ok(UserKey::Blob(value.to_vec())),
            other => Err(WireError::malformed(format!(
                "unsupported key particle type {other}"
            ))),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserKey::Int(v) => write!(f, "{v}"),
            UserKey::Str(s) => f.write_str(s),
            UserKey::Blob(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Metadata of one record returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub namespace: String,
    pub set_name: String,
    pub user_key: Option<UserKey>,
    pub digest: [u8; DIGEST_BYTES],
    pub generation: u32,
    pub expiration: u32,
}

impl ScanRecord {
    fn from_message(msg: &Message) -> Result<Self, WireError> {
        let digest_bytes = msg
            .field(FieldType::Digest)
            .ok_or_else(|| WireError::malformed("scan record without digest"))?;
        let digest: [u8; DIGEST_BYTES] = digest_bytes
            .try_into()
            .map_err(|_| WireError::malformed(format!("digest of {} bytes", digest_bytes.len())))?;

        let text = |kind| {
            msg.field(kind)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default()
        };

        Ok(Self {
            namespace: text(FieldType::Namespace),
            set_name: text(FieldType::Set),
            user_key: msg.field(FieldType::Key).map(UserKey::decode).transpose()?,
            digest,
            generation: msg.header.generation,
            expiration: msg.header.expiration,
        })
    }
}

/// Pull-based reader over a scan reply stream.
pub struct ScanReader<R: Read> {
    rdr: R,
    /// Current frame body and read offset into it.
    body: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read> ScanReader<R> {
    /// Wraps a stream positioned right after the scan request was sent.
    pub fn new(rdr: R) -> Self {
        Self {
            rdr,
            body: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// Returns the next record, or `None` once the server signalled the end
    /// of the scan.
    ///
    /// A non-zero result code other than "not found" ends the stream with
    /// [`WireError::Server`].
    pub fn next_record(&mut self) -> Result<Option<ScanRecord>, WireError> {
        loop {
            if self.done {
                return Ok(None);
            }

            if self.pos >= self.body.len() {
                self.body = read_frame(&mut self.rdr, ProtoType::Message)?;
                self.pos = 0;
                trace!(bytes = self.body.len(), "scan frame");
                continue;
            }

            let mut rest = &self.body[self.pos..];
            let before = rest.len();
            let msg = Message::decode(&mut rest)?;
            self.pos += before - rest.len();

            match msg.header.result_code {
                RESULT_OK => {}
                RESULT_KEY_NOT_FOUND => {
                    self.done = true;
                    continue;
                }
                code => {
                    self.done = true;
                    return Err(WireError::Server(code));
                }
            }

            if msg.header.info3 & INFO3_LAST != 0 {
                self.done = true;
                continue;
            }

            return ScanRecord::from_message(&msg).map(Some);
        }
    }
}

impl<R: Read> Iterator for ScanReader<R> {
    type Item = Result<ScanRecord, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
