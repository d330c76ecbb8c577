//! # Wire - Aerospike client protocol codec
//!
//! Just enough of the cluster's binary protocol for Blockcheck: info
//! commands, admin login, metadata-only filtered scans and touches.
//! Everything here is pure encoding/decoding over `Read`/`Write`; sockets,
//! node discovery and error classification live in the `cluster` crate.
//!
//! ## Framing
//!
//! Every request and reply is one or more frames:
//!
//! ```text
//! [version=2: u8][type: u8][body_len: u48 BE][body ...]
//! ```
//!
//! | Type | Body                                                   |
//! |------|--------------------------------------------------------|
//! | 1    | info: `name\n...` request, `name\tvalue\n...` reply    |
//! | 2    | admin (login)                                          |
//! | 3    | message (AS_MSG): 22-byte header, fields, operations   |
//! | 4    | compressed message (never requested, rejected)         |
//!
//! ## Message body (AS_MSG)
//!
//! ```text
//! [header_sz=22][info1][info2][info3][unused][result_code]
//! [generation: u32][expiration: u32][timeout: u32][n_fields: u16][n_ops: u16]
//! n_fields x [size: u32][type: u8][data (size - 1)]
//! n_ops    x [size: u32][op: u8][particle: u8][version: u8][name_len: u8][name][value]
//! ```
//!
//! All integers are big-endian.

mod admin;
mod filter;
mod info;
mod message;
mod proto;
mod scan;

use std::io;

use thiserror::Error;

pub use admin::{
    hash_password, login_request, read_login_reply, AdminCommand, AdminField, PASSWORD_SALT,
};
pub use filter::{DeviceSizeFilter, FilterKind};
pub use info::{encode_info_request, parse_info_response, request_info};
pub use message::{
    read_message_reply, scan_request, touch_request, Field, FieldType, Message, MsgHeader, Op,
    INFO1_GET_ALL, INFO1_NOBINDATA, INFO1_READ, INFO2_WRITE, INFO3_LAST, MSG_HEADER_BYTES,
    OP_TOUCH,
};
pub use proto::{read_frame, write_frame, ProtoHeader, ProtoType, MAX_FRAME_BYTES, PROTO_VERSION};
pub use scan::{ScanReader, ScanRecord, UserKey, DIGEST_BYTES};

/// Result code the server uses for "no error".
pub const RESULT_OK: u8 = 0;
/// Result code that terminates a scan stream that found nothing more.
pub const RESULT_KEY_NOT_FOUND: u8 = 2;

/// Errors produced while encoding or decoding protocol frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// An underlying socket or buffer I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame carried a protocol version other than 2.
    #[error("unsupported protocol version {0}")]
    Version(u8),

    /// A frame of an unexpected type arrived.
    #[error("unexpected frame type {actual} (expected {expected})")]
    UnexpectedType {
        /// Type the reader asked for.
        expected: u8,
        /// Type found on the wire.
        actual: u8,
    },

    /// A frame announced a body larger than [`MAX_FRAME_BYTES`].
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(u64),

    /// A frame body could not be parsed.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The server answered with a non-zero result code.
    #[error("server returned result code {0}")]
    Server(u8),

    /// Filter expression serialization failed.
    #[error("filter encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Credential hashing failed.
    #[error("credential hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

impl WireError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        WireError::Malformed(msg.into())
    }
}
