//! Record log codec using nom
//!
//! File format:
//! ```text
//! CACHET01
//! [version: u32]
//! ...records...
//! ```
//!
//! Record format (all integers little-endian):
//! ```text
//! [op: u8][key_len: u32][value_len: u32][key bytes][value bytes]
//! ```
//! A delete record carries an empty value.

use nom::{
    bytes::complete::{tag, take},
    error::{Error as NomError, ErrorKind},
    number::complete::{le_u32, le_u8},
    sequence::tuple,
    IResult,
};

use crate::error::{Result, StoreError};

/// Magic header for record log files
pub const LOG_MAGIC: &[u8] = b"CACHET01";

/// Current log format version
pub const LOG_VERSION: u32 = 1;

/// Header length in bytes
pub const HEADER_LEN: usize = LOG_MAGIC.len() + 4;

/// Fixed part of a record preceding the key bytes
pub const RECORD_PREFIX_LEN: usize = 1 + 4 + 4;

/// Record log header
#[derive(Debug, Clone, PartialEq)]
pub struct LogHeader {
    /// File format version
    pub version: u32,
}

/// Kind of mutation a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    /// Key now maps to the record's value
    Put,
    /// Key was deleted
    Delete,
}

impl RecordOp {
    fn to_byte(self) -> u8 {
        match self {
            RecordOp::Put => 1,
            RecordOp::Delete => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(RecordOp::Put),
            2 => Some(RecordOp::Delete),
            _ => None,
        }
    }
}

/// A record borrowed from the log buffer
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'a> {
    /// Mutation kind
    pub op: RecordOp,
    /// Raw key bytes
    pub key: &'a [u8],
    /// Raw value bytes (empty for deletes)
    pub value: &'a [u8],
}

impl Record<'_> {
    /// Encoded size of this record
    pub fn encoded_len(&self) -> usize {
        RECORD_PREFIX_LEN + self.key.len() + self.value.len()
    }
}

/// Parse the log header
pub fn parse_header(input: &[u8]) -> Result<LogHeader> {
    if input.len() < HEADER_LEN {
        return Err(StoreError::Parse("Input too short for header".to_string()));
    }

    let (_, (_, version)) = tuple((tag(LOG_MAGIC), le_u32))(input)
        .map_err(|_: nom::Err<NomError<&[u8]>>| StoreError::Parse("Invalid log magic header".to_string()))?;

    if version != LOG_VERSION {
        return Err(StoreError::Parse(format!("Unsupported log version {}", version)));
    }

    Ok(LogHeader { version })
}

/// Create a log header
pub fn create_header(version: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(LOG_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header
}

/// Parse one record.
///
/// An unknown op byte is a hard failure; a record cut short by the end of
/// input is a recoverable error (a torn tail write).
pub fn parse_record(input: &[u8]) -> IResult<&[u8], Record<'_>> {
    let (rest, (op, key_len, value_len)) = tuple((le_u8, le_u32, le_u32))(input)?;

    let op = match RecordOp::from_byte(op) {
        Some(op) => op,
        None => return Err(nom::Err::Failure(NomError::new(input, ErrorKind::Tag))),
    };

    let (rest, key) = take(key_len)(rest)?;
    let (rest, value) = take(value_len)(rest)?;

    Ok((rest, Record { op, key, value }))
}

/// Encode one record
pub fn encode_record(op: RecordOp, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_PREFIX_LEN + key.len() + value.len());
    buf.push(op.to_byte());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}
