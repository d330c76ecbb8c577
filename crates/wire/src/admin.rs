//! Admin (security) commands: only LOGIN is needed.
//!
//! ```text
//! [0][0][command: u8][field_count: u8][12 zero bytes]
//! field_count x [len: u32 BE (data + 1)][id: u8][data]
//! ```
//!
//! The reply uses the same layout; its result code sits in byte 1.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Read, Write};

use crate::proto::{read_frame, write_frame, ProtoType};
use crate::WireError;

/// Fixed bcrypt salt the protocol uses to hash passwords client-side.
pub const PASSWORD_SALT: [u8; 16] = [
    0xf4, 0x6b, 0x0b, 0xbe, 0xcf, 0xfe, 0x8d, 0x1b, 0x06, 0x67, 0xd8, 0x4f, 0x6d, 0xc1, 0xd8, 0xa9,
];

const BCRYPT_COST: u32 = 10;
const ADMIN_HEADER_BYTES: usize = 16;

/// Admin command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdminCommand {
    Login = 20,
}

/// Admin field identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdminField {
    User = 0,
    Credential = 3,
    ClearPassword = 4,
}

/// Hashes a password the way the server stores it (`$2a$10$...`).
pub fn hash_password(password: &str) -> Result<String, WireError> {
    let parts = bcrypt::hash_with_salt(password, BCRYPT_COST, PASSWORD_SALT)?;
    Ok(parts.format_for_version(bcrypt::Version::TwoA))
}

/// Builds a LOGIN body. `clear_password` is only sent for external auth.
pub fn login_request(
    user: &str,
    credential: &str,
    clear_password: Option<&str>,
) -> Result<Vec<u8>, WireError> {
    let mut fields: Vec<(AdminField, &[u8])> = vec![
        (AdminField::User, user.as_bytes()),
        (AdminField::Credential, credential.as_bytes()),
    ];
    if let Some(pw) = clear_password {
        fields.push((AdminField::ClearPassword, pw.as_bytes()));
    }

    let mut buf = Vec::with_capacity(ADMIN_HEADER_BYTES + 64);
    buf.write_u8(0)?;
    buf.write_u8(0)?;
    buf.write_u8(AdminCommand::Login as u8)?;
    buf.write_u8(fields.len() as u8)?;
    buf.extend_from_slice(&[0u8; ADMIN_HEADER_BYTES - 4]);

    for (id, data) in fields {
        buf.write_u32::<BigEndian>(data.len() as u32 + 1)?;
        buf.write_u8(id as u8)?;
        buf.extend_from_slice(data);
    }
    Ok(buf)
}

/// Sends a LOGIN body and returns the server's result code.
pub fn read_login_reply<S: Read + Write>(stream: &mut S, body: &[u8]) -> Result<u8, WireError> {
    write_frame(stream, ProtoType::Admin, body)?;
    let reply = read_frame(stream, ProtoType::Admin)?;
    if reply.len() < ADMIN_HEADER_BYTES {
        return Err(WireError::malformed(format!(
            "admin reply of {} bytes",
            reply.len()
        )));
    }
    Ok(reply[1])
}
