//! The "device size at least N" scan filter in both of its wire encodings.
//!
//! ## Filter expression (servers 5.2+)
//!
//! MessagePack: `[GE, [DEVICE_SIZE], N]`
//!
//! ## Predicate expression (older servers)
//!
//! A postfix program of `[tag: u16][len: u32][payload]` items:
//!
//! ```text
//! REC_DEVICE_SIZE          (150, len 0)
//! INTEGER_VALUE N          (10,  len 8, i64 BE)
//! INTEGER_GREATEREQ        (203, len 0)
//! ```
//!
//! Both travel in the same message field; the server tells them apart by
//! its own version.

use byteorder::{BigEndian, WriteBytesExt};

use crate::WireError;

const EXP_GE: u8 = 4;
const EXP_DEVICE_SIZE: u8 = 65;

const PREDEXP_INTEGER_VALUE: u16 = 10;
const PREDEXP_REC_DEVICE_SIZE: u16 = 150;
const PREDEXP_INTEGER_GREATEREQ: u16 = 203;

/// Which filter mechanism the target node understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Generalized filter expressions.
    Expression,
    /// Legacy predicate expressions.
    PredExp,
}

impl FilterKind {
    /// Picks the encoding from the node's capability flag.
    #[must_use]
    pub fn from_capability(supports_expressions: bool) -> Self {
        if supports_expressions {
            FilterKind::Expression
        } else {
            FilterKind::PredExp
        }
    }
}

/// Server-side predicate `device_size >= threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSizeFilter {
    pub kind: FilterKind,
    /// Inclusive lower bound on the record's on-device size, in bytes.
    pub threshold: u64,
}

impl DeviceSizeFilter {
    pub fn new(kind: FilterKind, threshold: u64) -> Self {
        Self { kind, threshold }
    }

    /// Evaluates the predicate locally, as the server would.
    #[must_use]
    pub fn matches(&self, device_size: u64) -> bool {
        device_size >= self.threshold
    }

    /// Encodes the filter field payload.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let value = i64::try_from(self.threshold).unwrap_or(i64::MAX);
        match self.kind {
            FilterKind::Expression => Ok(rmp_serde::to_vec(&(
                EXP_GE,
                [EXP_DEVICE_SIZE],
                value,
            ))?),
            FilterKind::PredExp => {
                let mut buf = Vec::with_capacity(3 * 6 + 8);
                buf.write_u16::<BigEndian>(PREDEXP_REC_DEVICE_SIZE)?;
                buf.write_u32::<BigEndian>(0)?;
                buf.write_u16::<BigEndian>(PREDEXP_INTEGER_VALUE)?;
                buf.write_u32::<BigEndian>(8)?;
                buf.write_i64::<BigEndian>(value)?;
                buf.write_u16::<BigEndian>(PREDEXP_INTEGER_GREATEREQ)?;
                buf.write_u32::<BigEndian>(0)?;
                Ok(buf)
            }
        }
    }
}
