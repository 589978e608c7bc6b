// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Stream Session
//!
//! Binds beam messages to multiplexed streams.
//!
//! ## Outbound
//!
//! Each message opens one stream carrying its verb and arguments as headers.
//! An attachment keeps the stream open and is spliced onto it; without one
//! the stream is opened finished. Replies arrive as sub-streams of the
//! message's stream:
//!
//! | `Ret` | Effect |
//! |-------|--------|
//! | `Pipe` | a [`StreamReceiver`] over the sub-streams is returned |
//! | `Sender(s)` | sub-streams are copied into `s` |
//! | `None` | sub-streams are drained and discarded |
//!
//! ## Inbound
//!
//! Each accepted stream becomes a message whose `Ret` is a [`StreamSender`]
//! opening sub-streams under it. Closing that sender seals the stream, which
//! ends the peer's reply receiver.

use std::sync::Arc;

use async_trait::async_trait;
use beam::{copy, BeamError, Message, Mode, NopSender, Receiver, Result, Ret, Sender};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::codec::{decode_headers, encode_headers};
use crate::config::SessionConfig;
use crate::connection::{allow_all, Connection, Role, Stream};
use crate::frame::StreamId;
use crate::listen::{Authenticator, PeerInfo};
use crate::tunnel::{splice, tunnel};

/// Send `msg` as a new stream under `parent` (top level when `None`).
pub async fn send_stream_message(
    conn: &Connection,
    parent: Option<StreamId>,
    msg: Message,
    config: &SessionConfig,
) -> Result<Option<Box<dyn Receiver>>> {
    let headers = encode_headers(&msg);
    let verb = msg.verb;
    let Message { att, ret, .. } = msg;

    let id = conn.reserve_stream_id()?;
    let replies = conn.accept_substreams(id)?;
    let stream = match conn.open_stream(id, parent, headers, att.is_none()) {
        Ok(stream) => stream,
        Err(err) => {
            conn.forget_substreams(id);
            return Err(err.into());
        }
    };
    trace!(stream_id = id, ?parent, %verb, "sent message");

    if let Some(att) = att {
        splice(stream, att, config.attachment_chunk);
    }

    let receiver = StreamReceiver::new(conn.clone(), id, replies, config.clone());
    let bridge_to: Arc<dyn Sender> = match ret {
        Ret::Pipe => return Ok(Some(Box::new(receiver))),
        Ret::None => Arc::new(NopSender),
        Ret::Sender(sender) => sender,
    };
    tokio::spawn(async move {
        if let Err(err) = copy(bridge_to, Arc::new(receiver)).await {
            debug!(stream_id = id, error = %err, "reply bridge ended with error");
        }
    });
    Ok(None)
}

/// Turn an accepted stream into a message. Malformed headers reset the stream
/// and surface as [`BeamError::Protocol`].
pub async fn create_stream_message(
    conn: &Connection,
    stream: Arc<Stream>,
    mode: Mode,
    config: &SessionConfig,
) -> Result<Message> {
    let (verb, args) = match decode_headers(stream.headers()) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(stream_id = stream.id(), error = %err, "rejecting malformed stream");
            stream.reset();
            return Err(err);
        }
    };

    let mut msg = Message::new(verb).with_args(args);
    if !stream.is_finished() {
        msg.att = Some(tunnel(stream.clone(), config.attachment_chunk)?);
    }

    let ret: Arc<dyn Sender> = Arc::new(StreamSender::new(conn.clone(), stream, config.clone()));
    if !mode.contains(Mode::RET) {
        if let Err(err) = ret.close().await {
            trace!(error = %err, "could not seal unused reply channel");
        }
    }
    msg.ret = Ret::Sender(ret);
    Ok(msg)
}

/// Replies to an inbound stream: each message opens a sub-stream of it.
pub struct StreamSender {
    conn: Connection,
    stream: Arc<Stream>,
    config: SessionConfig,
}

impl StreamSender {
    pub fn new(conn: Connection, stream: Arc<Stream>, config: SessionConfig) -> Self {
        Self {
            conn,
            stream,
            config,
        }
    }
}

#[async_trait]
impl Sender for StreamSender {
    async fn send(&self, msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        send_stream_message(&self.conn, Some(self.stream.id()), msg, &self.config).await
    }

    async fn close(&self) -> Result<()> {
        self.stream.seal()?;
        Ok(())
    }
}

/// Sub-streams the peer opens under one of our streams.
pub struct StreamReceiver {
    conn: Connection,
    parent: StreamId,
    streams: Mutex<UnboundedReceiver<Arc<Stream>>>,
    config: SessionConfig,
}

impl StreamReceiver {
    pub fn new(
        conn: Connection,
        parent: StreamId,
        streams: UnboundedReceiver<Arc<Stream>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            conn,
            parent,
            streams: Mutex::new(streams),
            config,
        }
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.conn.forget_substreams(self.parent);
    }
}

#[async_trait]
impl Receiver for StreamReceiver {
    async fn receive(&self, mode: Mode) -> Result<Message> {
        let stream = self.streams.lock().await.recv().await.ok_or(BeamError::Eof)?;
        create_stream_message(&self.conn, stream, mode, &self.config).await
    }
}

/// One connection seen as a beam endpoint: sending opens top-level streams,
/// receiving yields the peer's top-level streams.
pub struct StreamSession {
    conn: Connection,
    top: Mutex<UnboundedReceiver<Arc<Stream>>>,
    config: SessionConfig,
}

impl StreamSession {
    pub fn client<T>(io: T, config: SessionConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (conn, top) = Connection::new(io, Role::Client, &config, allow_all());
        Self::from_parts(conn, top, config)
    }

    /// Authenticate `peer` and serve the connection.
    pub fn server<T>(
        io: T,
        authenticator: &dyn Authenticator,
        peer: PeerInfo,
        config: SessionConfig,
    ) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let auth = authenticator.authenticate(&peer)?;
        let (conn, top) = Connection::new(io, Role::Server, &config, auth);
        debug!(peer = ?peer.peer_addr, "stream session established");
        Ok(Self::from_parts(conn, top, config))
    }

    pub(crate) fn from_parts(
        conn: Connection,
        top: UnboundedReceiver<Arc<Stream>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            conn,
            top: Mutex::new(top),
            config,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[async_trait]
impl Sender for StreamSession {
    async fn send(&self, msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        send_stream_message(&self.conn, None, msg, &self.config).await
    }

    async fn close(&self) -> Result<()> {
        self.conn.close();
        Ok(())
    }
}

#[async_trait]
impl Receiver for StreamSession {
    async fn receive(&self, mode: Mode) -> Result<Message> {
        let stream = self.top.lock().await.recv().await.ok_or(BeamError::Eof)?;
        create_stream_message(&self.conn, stream, mode, &self.config).await
    }
}
