//! MessagePack wire codec for task records.
//!
//! A task travels as a positional array of two fields: the function path
//! (a string) and the already-encoded argument payload (binary). The
//! payload itself is the array-mode MessagePack encoding of the arguments,
//! produced at task construction; an absent argument is carried as nil.
//!
//! Decoding tolerates records with more than two fields so the record can
//! grow append-only without breaking older consumers, and accepts payloads
//! carried as nil, bin, or str (different producer generations disagree on
//! the raw-bytes marker).

use std::io::{Cursor, Read};

use rmp::Marker;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while encoding or decoding task records and payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value could not be encoded.
    #[error("failed to encode value: {0}")]
    Encode(String),
    /// A value could not be decoded.
    #[error("failed to decode value: {0}")]
    Decode(String),
    /// The bytes decode, but not into the shape of a task record.
    #[error("invalid task record: {0}")]
    InvalidRecord(&'static str),
}

impl From<rmp_serde::encode::Error> for CodecError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CodecError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Encodes the wire record `[func_path, payload]`.
///
/// An empty payload is written as nil, matching producers that never
/// serialized an argument.
pub(crate) fn encode_record(func_path: &str, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(func_path.len() + payload.len() + 8);
    rmp::encode::write_array_len(&mut buf, 2).map_err(|e| CodecError::Encode(e.to_string()))?;
    rmp::encode::write_str(&mut buf, func_path).map_err(|e| CodecError::Encode(e.to_string()))?;
    if payload.is_empty() {
        rmp::encode::write_nil(&mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    } else {
        rmp::encode::write_bin(&mut buf, payload).map_err(|e| CodecError::Encode(e.to_string()))?;
    }
    Ok(buf)
}

/// Decodes a wire record into `(func_path, payload)`.
///
/// Fields beyond the first two belong to newer producers and are ignored.
pub(crate) fn decode_record(data: &[u8]) -> Result<(String, Vec<u8>), CodecError> {
    let mut cur = Cursor::new(data);
    let fields =
        rmp::decode::read_array_len(&mut cur).map_err(|e| CodecError::Decode(e.to_string()))?;
    if fields < 2 {
        return Err(CodecError::InvalidRecord("expected at least two fields"));
    }
    let func_path = read_string(&mut cur)?;
    let payload = read_payload(&mut cur, data)?;
    Ok((func_path, payload))
}

/// Encodes argument values in array mode.
///
/// Tuples and structs serialize as positional arrays under MessagePack,
/// which is exactly the wire form consumers decode by index.
pub(crate) fn encode_args<A: Serialize + ?Sized>(args: &A) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec(args)?)
}

/// Whether a payload starts with an array marker.
///
/// Single-argument payloads from older producers carry the bare value; the
/// current form wraps it in a one-element array. Consumers pick the decode
/// path by this leading byte.
pub(crate) fn is_array_payload(payload: &[u8]) -> bool {
    payload.first().is_some_and(|b| {
        matches!(
            Marker::from_u8(*b),
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32
        )
    })
}

fn read_string(cur: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    let len = rmp::decode::read_str_len(cur).map_err(|e| CodecError::Decode(e.to_string()))?;
    let mut buf = vec![0u8; len as usize];
    cur.read_exact(&mut buf)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    String::from_utf8(buf)
        .map_err(|_| CodecError::InvalidRecord("function path is not valid UTF-8"))
}

fn read_payload(cur: &mut Cursor<&[u8]>, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let pos = cur.position() as usize;
    let Some(&marker_byte) = data.get(pos) else {
        return Err(CodecError::InvalidRecord("record ends before the payload field"));
    };
    let len = match Marker::from_u8(marker_byte) {
        Marker::Null => {
            cur.set_position(pos as u64 + 1);
            return Ok(Vec::new());
        }
        Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
            rmp::decode::read_bin_len(cur).map_err(|e| CodecError::Decode(e.to_string()))?
        }
        Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
            rmp::decode::read_str_len(cur).map_err(|e| CodecError::Decode(e.to_string()))?
        }
        _ => return Err(CodecError::InvalidRecord("payload field is not binary")),
    };
    let mut buf = vec![0u8; len as usize];
    cur.read_exact(&mut buf)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(buf)
}
