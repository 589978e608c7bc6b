// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Turns a message-oriented WebSocket into the byte stream a stream session
//! runs on. Only binary frames carry session bytes.

use std::fmt::Display;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

/// What the bridge does with one inbound WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Data(Bytes),
    Ping(Bytes),
    Close,
    Ignore,
}

/// The WebSocket message types the bridge can drive.
pub trait WsFrame: Sized + Send + 'static {
    fn binary(data: Bytes) -> Self;
    fn pong(data: Bytes) -> Self;
    fn into_event(self) -> WsEvent;
}

impl WsFrame for axum::extract::ws::Message {
    fn binary(data: Bytes) -> Self {
        Self::Binary(data)
    }

    fn pong(data: Bytes) -> Self {
        Self::Pong(data)
    }

    fn into_event(self) -> WsEvent {
        match self {
            Self::Binary(data) => WsEvent::Data(data),
            Self::Ping(data) => WsEvent::Ping(data),
            Self::Close(_) => WsEvent::Close,
            Self::Text(_) | Self::Pong(_) => WsEvent::Ignore,
        }
    }
}

impl WsFrame for tokio_tungstenite::tungstenite::Message {
    fn binary(data: Bytes) -> Self {
        Self::Binary(data)
    }

    fn pong(data: Bytes) -> Self {
        Self::Pong(data)
    }

    fn into_event(self) -> WsEvent {
        match self {
            Self::Binary(data) => WsEvent::Data(data),
            Self::Ping(data) => WsEvent::Ping(data),
            Self::Close(_) => WsEvent::Close,
            Self::Text(_) | Self::Pong(_) | Self::Frame(_) => WsEvent::Ignore,
        }
    }
}

/// Bridge `socket` onto an in-memory byte pipe of `buffer` bytes and return
/// the local end.
///
/// Writes to the returned stream go out as binary messages. Binary messages
/// from the peer are readable from it. A close from either side ends both.
pub fn bridge<S, M, E>(socket: S, buffer: usize) -> DuplexStream
where
    S: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Send + 'static,
    M: WsFrame,
    E: Display + Send + 'static,
{
    let buffer = buffer.max(1);
    let (local, remote) = tokio::io::duplex(buffer);
    let (read_half, mut write_half) = tokio::io::split(remote);
    let (mut sink, mut incoming) = socket.split();
    let mut outgoing = ReaderStream::with_capacity(read_half, buffer);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = incoming.next() => match frame {
                    Some(Ok(frame)) => match frame.into_event() {
                        WsEvent::Data(data) => {
                            if let Err(err) = write_half.write_all(&data).await {
                                debug!(error = %err, "session side of websocket went away");
                                break;
                            }
                        }
                        WsEvent::Ping(data) => {
                            if let Err(err) = sink.send(M::pong(data)).await {
                                debug!(error = %err, "failed to answer ping");
                                break;
                            }
                        }
                        WsEvent::Close => {
                            debug!("websocket closed by peer");
                            break;
                        }
                        WsEvent::Ignore => trace!("ignoring non-binary websocket message"),
                    },
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket receive error");
                        break;
                    }
                    None => break,
                },
                chunk = outgoing.next() => match chunk {
                    Some(Ok(data)) => {
                        if let Err(err) = sink.send(M::binary(data)).await {
                            debug!(error = %err, "websocket send failed");
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        debug!(error = %err, "session read failed");
                        break;
                    }
                    None => break,
                },
            }
        }

        if let Err(err) = write_half.shutdown().await {
            trace!(error = %err, "session pipe shutdown");
        }
        if let Err(err) = sink.close().await {
            trace!(error = %err, "websocket close");
        }
    });

    local
}
