// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Netstring encoding of string-list maps.
//!
//! ```text
//! 000;  <len>:<name>,  <len>:<len>:<value>,<len>:<value>,...,  ...
//! ```
//!
//! A three-digit message type (always `000`) and `;`, then for each entry
//! the name as a netstring followed by a netstring wrapping the concatenated
//! netstrings of its values. Lengths count bytes.

use std::collections::BTreeMap;

use thiserror::Error;

pub type DataMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("missing or malformed header")]
    BadHeader,

    #[error("unsupported message type {0}")]
    UnsupportedType(u16),

    #[error("malformed netstring at byte {0}")]
    Malformed(usize),

    #[error("netstring at byte {0} runs past the end of input")]
    Truncated(usize),

    #[error("invalid UTF-8 at byte {0}")]
    InvalidUtf8(usize),
}

pub fn encode(obj: &DataMap) -> String {
    let mut out = String::from("000;");
    for (name, values) in obj {
        out.push_str(&encode_string(name));
        let inner: String = values.iter().map(|v| encode_string(v)).collect();
        out.push_str(&encode_string(&inner));
    }
    out
}

fn encode_string(s: &str) -> String {
    format!("{}:{},", s.len(), s)
}

pub fn decode(text: &str) -> Result<DataMap, DataError> {
    let bytes = text.as_bytes();
    let header = bytes.get(..4).ok_or(DataError::BadHeader)?;
    if header[3] != b';' || !header[..3].iter().all(u8::is_ascii_digit) {
        return Err(DataError::BadHeader);
    }
    let kind = header[..3]
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    if kind != 0 {
        return Err(DataError::UnsupportedType(kind));
    }

    let mut map = DataMap::new();
    let mut pos = 4;
    while pos < bytes.len() {
        let (name, next) = next_string(bytes, pos)?;
        let (list, after) = next_string(bytes, next)?;
        let values = decode_list(list, next)?;
        map.insert(to_utf8(name, pos)?, values);
        pos = after;
    }
    Ok(map)
}

fn decode_list(list: &[u8], base: usize) -> Result<Vec<String>, DataError> {
    let mut values = Vec::new();
    let mut pos = 0;
    while pos < list.len() {
        let (value, next) =
            next_string(list, pos).map_err(|err| offset(err, base))?;
        values.push(to_utf8(value, base + pos)?);
        pos = next;
    }
    Ok(values)
}

/// Parse one netstring starting at `start`; returns its payload and the index
/// just past its trailing comma.
fn next_string(bytes: &[u8], start: usize) -> Result<(&[u8], usize), DataError> {
    let rest = bytes
        .get(start..)
        .filter(|rest| !rest.is_empty())
        .ok_or(DataError::Truncated(start))?;
    let colon = rest
        .iter()
        .position(|&b| b == b':')
        .ok_or(DataError::Malformed(start))?;
    let digits = &rest[..colon];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(DataError::Malformed(start));
    }
    let len: usize = std::str::from_utf8(digits)
        .ok()
        .and_then(|d| d.parse().ok())
        .ok_or(DataError::Malformed(start))?;

    let body_start = start + colon + 1;
    let body_end = body_start
        .checked_add(len)
        .ok_or(DataError::Malformed(start))?;
    let body = bytes
        .get(body_start..body_end)
        .ok_or(DataError::Truncated(start))?;
    match bytes.get(body_end) {
        Some(b',') => Ok((body, body_end + 1)),
        Some(_) => Err(DataError::Malformed(body_end)),
        None => Err(DataError::Truncated(start)),
    }
}

fn to_utf8(bytes: &[u8], at: usize) -> Result<String, DataError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| DataError::InvalidUtf8(at))
}

fn offset(err: DataError, base: usize) -> DataError {
    match err {
        DataError::Malformed(at) => DataError::Malformed(base + at),
        DataError::Truncated(at) => DataError::Truncated(base + at),
        DataError::InvalidUtf8(at) => DataError::InvalidUtf8(base + at),
        other => other,
    }
}
