//! Info command encoding.
//!
//! Request body: each command followed by `\n`. Reply body: one line per
//! command, `name\tvalue\n`. Values are opaque here; the audit crate parses
//! the `key=value;...` lists some commands return.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::proto::{read_frame, write_frame, ProtoType};
use crate::WireError;

/// Builds the body of an info request.
#[must_use]
pub fn encode_info_request(commands: &[&str]) -> Vec<u8> {
    let mut body = Vec::with_capacity(commands.iter().map(|c| c.len() + 1).sum());
    for cmd in commands {
        body.extend_from_slice(cmd.as_bytes());
        body.push(b'\n');
    }
    body
}

/// Splits an info reply into command name -> value.
///
/// A line without a tab is a command that produced no value; it maps to
/// the empty string.
pub fn parse_info_response(body: &[u8]) -> Result<BTreeMap<String, String>, WireError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| WireError::malformed(format!("info reply is not utf-8: {e}")))?;

    let mut out = BTreeMap::new();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((name, value)) => out.insert(name.to_string(), value.to_string()),
            None => out.insert(line.to_string(), String::new()),
        };
    }
    Ok(out)
}

/// Sends one info request over `stream` and waits for the reply.
pub fn request_info<S: Read + Write>(
    stream: &mut S,
    commands: &[&str],
) -> Result<BTreeMap<String, String>, WireError> {
    write_frame(stream, ProtoType::Info, &encode_info_request(commands))?;
    let body = read_frame(stream, ProtoType::Info)?;
    parse_info_response(&body)
}
