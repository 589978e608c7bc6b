// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Frames
//!
//! Length-prefixed framing for multiplexed streams.
//!
//! ```text
//! +------+-----------+-------+-----------+=========+
//! | type | stream id | flags |  length   | payload |
//! |  u8  |    u32    |  u8   |    u32    |  bytes  |
//! +------+-----------+-------+-----------+=========+
//! ```
//!
//! All integers are big-endian. Flag `0x01` is FIN.
//!
//! | Type | Frame | Payload |
//! |------|-------|---------|
//! | 1 | `SYN_STREAM` | parent id (0 = none), headers |
//! | 2 | `DATA` | raw bytes |
//! | 3 | `RST_STREAM` | empty |
//! | 4 | `SEAL` | empty; no more sub-streams under this id |
//!
//! Headers are a `u32` count, then per header a length-prefixed name, a `u32`
//! value count and that many length-prefixed values.

use std::collections::BTreeMap;

use beam::BeamError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub type StreamId = u32;
pub type Headers = BTreeMap<String, Vec<String>>;

pub const HEADER_LEN: usize = 10;
const FLAG_FIN: u8 = 0x01;

const TYPE_SYN_STREAM: u8 = 1;
const TYPE_DATA: u8 = 2;
const TYPE_RST_STREAM: u8 = 3;
const TYPE_SEAL: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    SynStream {
        stream_id: StreamId,
        parent: Option<StreamId>,
        headers: Headers,
        fin: bool,
    },
    Data {
        stream_id: StreamId,
        data: Bytes,
        fin: bool,
    },
    Reset {
        stream_id: StreamId,
    },
    Seal {
        stream_id: StreamId,
    },
}

impl Frame {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::SynStream { stream_id, .. }
            | Frame::Data { stream_id, .. }
            | Frame::Reset { stream_id }
            | Frame::Seal { stream_id } => *stream_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds limit of {limit}")]
    TooLarge { len: usize, limit: usize },

    #[error("unknown frame type {0}")]
    UnknownType(u8),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("invalid UTF-8 in frame headers")]
    InvalidUtf8,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("stream {0} already finished")]
    StreamFinished(StreamId),
}

impl From<FrameError> for BeamError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => BeamError::from(io),
            FrameError::ConnectionClosed | FrameError::StreamFinished(_) => {
                BeamError::Transport(err.to_string())
            }
            other => BeamError::protocol(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let kind = src[0];
        if !(TYPE_SYN_STREAM..=TYPE_SEAL).contains(&kind) {
            return Err(FrameError::UnknownType(kind));
        }
        let len = u32::from_be_bytes([src[6], src[7], src[8], src[9]]) as usize;
        if len > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len,
                limit: self.max_frame_len,
            });
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let mut head = src.split_to(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        head.advance(1);
        let stream_id = head.get_u32();
        let fin = head.get_u8() & FLAG_FIN != 0;

        let frame = match kind {
            TYPE_SYN_STREAM => decode_syn(stream_id, payload, fin)?,
            TYPE_DATA => Frame::Data {
                stream_id,
                data: payload,
                fin,
            },
            TYPE_RST_STREAM => Frame::Reset { stream_id },
            _ => Frame::Seal { stream_id },
        };
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let (kind, stream_id, fin, payload) = match frame {
            Frame::SynStream {
                stream_id,
                parent,
                headers,
                fin,
            } => (TYPE_SYN_STREAM, stream_id, fin, encode_syn(parent, &headers)?),
            Frame::Data {
                stream_id,
                data,
                fin,
            } => (TYPE_DATA, stream_id, fin, data),
            Frame::Reset { stream_id } => (TYPE_RST_STREAM, stream_id, false, Bytes::new()),
            Frame::Seal { stream_id } => (TYPE_SEAL, stream_id, false, Bytes::new()),
        };
        if payload.len() > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len: payload.len(),
                limit: self.max_frame_len,
            });
        }

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u8(kind);
        dst.put_u32(stream_id);
        dst.put_u8(if fin { FLAG_FIN } else { 0 });
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

fn encode_syn(parent: Option<StreamId>, headers: &Headers) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::new();
    buf.put_u32(parent.unwrap_or(0));
    buf.put_u32(checked_len(headers.len())?);
    for (name, values) in headers {
        put_string(&mut buf, name)?;
        buf.put_u32(checked_len(values.len())?);
        for value in values {
            put_string(&mut buf, value)?;
        }
    }
    Ok(buf.freeze())
}

/// Encoded size of a `SYN_STREAM` payload carrying `headers`.
pub fn syn_payload_len(headers: &Headers) -> usize {
    headers.iter().fold(8, |len, (name, values)| {
        len + 8 + name.len() + values.iter().map(|v| 4 + v.len()).sum::<usize>()
    })
}

fn checked_len(len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::Malformed("length does not fit in u32"))
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), FrameError> {
    buf.put_u32(checked_len(s.len())?);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn decode_syn(stream_id: StreamId, mut payload: Bytes, fin: bool) -> Result<Frame, FrameError> {
    let parent = match take_u32(&mut payload)? {
        0 => None,
        id => Some(id),
    };
    let count = take_u32(&mut payload)?;
    let mut headers = Headers::new();
    for _ in 0..count {
        let name = take_string(&mut payload)?;
        let values = take_u32(&mut payload)?;
        let entry = headers.entry(name).or_default();
        for _ in 0..values {
            entry.push(take_string(&mut payload)?);
        }
    }
    if payload.has_remaining() {
        return Err(FrameError::Malformed("trailing bytes after headers"));
    }
    Ok(Frame::SynStream {
        stream_id,
        parent,
        headers,
        fin,
    })
}

fn take_u32(payload: &mut Bytes) -> Result<u32, FrameError> {
    if payload.remaining() < 4 {
        return Err(FrameError::Malformed("truncated header block"));
    }
    Ok(payload.get_u32())
}

fn take_string(payload: &mut Bytes) -> Result<String, FrameError> {
    let len = take_u32(payload)? as usize;
    if payload.remaining() < len {
        return Err(FrameError::Malformed("truncated header string"));
    }
    let raw = payload.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidUtf8)
}
