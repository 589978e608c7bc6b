// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Connection
//!
//! Multiplexes streams over one byte connection.
//!
//! A connection owns two background tasks:
//!
//! - **writer**: drains an unbounded frame queue into the socket.
//! - **reader**: decodes frames and routes them without ever blocking on a
//!   consumer.
//!
//! ## Routing
//!
//! | Frame | Action |
//! |-------|--------|
//! | `SYN_STREAM` | auth check, then deliver to the channel registered for its parent (or the top-level channel); reset if nobody takes it |
//! | `DATA` | forward payload to the stream's data channel; FIN drops the channel |
//! | `SEAL` | drop the sub-stream channel registered for that id |
//! | `RST_STREAM` | drop both |
//!
//! When the reader exits every route is cleared, so all pending receivers see
//! end of stream.
//!
//! A queued frame the codec refuses to encode resets its stream only; the
//! connection stays up. Write I/O errors shut the connection down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::frame::{syn_payload_len, Frame, FrameCodec, FrameError, Headers, StreamId};

/// Per-stream admission check: headers of the new stream and its parent id.
pub type AuthHandler = Arc<dyn Fn(&Headers, Option<StreamId>) -> bool + Send + Sync>;

/// Admit every stream.
pub fn allow_all() -> AuthHandler {
    Arc::new(|_headers: &Headers, _parent: Option<StreamId>| true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens odd stream ids.
    Client,
    /// Opens even stream ids.
    Server,
}

#[derive(Default)]
struct Routes {
    data: HashMap<StreamId, UnboundedSender<Bytes>>,
    substreams: HashMap<StreamId, UnboundedSender<Arc<Stream>>>,
    top: Option<UnboundedSender<Arc<Stream>>>,
    closed: bool,
}

struct Inner {
    /// Next local stream id; 0 once the id space is used up.
    next_id: AtomicU32,
    max_frame_len: usize,
    outgoing: UnboundedSender<Frame>,
    routes: RwLock<Routes>,
    auth: AuthHandler,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Start the reader and writer tasks over `io`. Returns the connection and
    /// the channel of top-level streams opened by the peer.
    pub fn new<T>(
        io: T,
        role: Role,
        config: &SessionConfig,
        auth: AuthHandler,
    ) -> (Self, UnboundedReceiver<Arc<Stream>>)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_shutdown(io, role, config, auth, CancellationToken::new())
    }

    /// Like [`Connection::new`], torn down when `shutdown` is cancelled.
    pub fn with_shutdown<T>(
        io: T,
        role: Role,
        config: &SessionConfig,
        auth: AuthHandler,
        shutdown: CancellationToken,
    ) -> (Self, UnboundedReceiver<Arc<Stream>>)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (outgoing, queue) = mpsc::unbounded_channel();
        let (top_tx, top_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            next_id: AtomicU32::new(match role {
                Role::Client => 1,
                Role::Server => 2,
            }),
            max_frame_len: config.max_frame_len,
            outgoing,
            routes: RwLock::new(Routes {
                top: Some(top_tx),
                ..Routes::default()
            }),
            auth,
            shutdown,
        });

        let codec = FrameCodec::new(config.max_frame_len);
        tokio::spawn(write_loop(
            FramedWrite::new(write_half, codec.clone()),
            queue,
            inner.clone(),
        ));
        tokio::spawn(read_loop(inner.clone(), FramedRead::new(read_half, codec)));

        (Self { inner }, top_rx)
    }

    /// Allocate the next locally-opened stream id. Fails with
    /// [`FrameError::ConnectionClosed`] once every id of this side's parity
    /// has been handed out.
    pub fn reserve_stream_id(&self) -> Result<StreamId, FrameError> {
        self.inner
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                (id != 0).then(|| id.checked_add(2).unwrap_or(0))
            })
            .map_err(|_| {
                warn!("stream ids exhausted");
                FrameError::ConnectionClosed
            })
    }

    /// Register interest in streams the peer opens under `parent`.
    pub fn accept_substreams(
        &self,
        parent: StreamId,
    ) -> Result<UnboundedReceiver<Arc<Stream>>, FrameError> {
        let mut routes = self.inner.routes.write();
        if routes.closed {
            return Err(FrameError::ConnectionClosed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        routes.substreams.insert(parent, tx);
        Ok(rx)
    }

    pub fn forget_substreams(&self, parent: StreamId) {
        self.inner.routes.write().substreams.remove(&parent);
    }

    /// Open stream `id`. A stream opened without `fin` carries data in both
    /// directions until each side finishes it.
    pub fn open_stream(
        &self,
        id: StreamId,
        parent: Option<StreamId>,
        headers: Headers,
        fin: bool,
    ) -> Result<Arc<Stream>, FrameError> {
        let len = syn_payload_len(&headers);
        if len > self.inner.max_frame_len {
            return Err(FrameError::TooLarge {
                len,
                limit: self.inner.max_frame_len,
            });
        }

        let incoming = if fin {
            None
        } else {
            let mut routes = self.inner.routes.write();
            if routes.closed {
                return Err(FrameError::ConnectionClosed);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            routes.data.insert(id, tx);
            Some(rx)
        };

        let frame = Frame::SynStream {
            stream_id: id,
            parent,
            headers: headers.clone(),
            fin,
        };
        if let Err(err) = self.inner.send(frame) {
            self.inner.routes.write().data.remove(&id);
            return Err(err);
        }
        trace!(stream_id = id, ?parent, fin, "opened stream");
        Ok(Arc::new(Stream::new(self.clone(), id, parent, headers, fin, incoming)))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Flush queued frames and shut the connection down.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    fn send(&self, frame: Frame) -> Result<(), FrameError> {
        self.inner.send(frame)
    }

    fn drop_routes(&self, id: StreamId) {
        self.inner.drop_routes(id);
    }
}

impl Inner {
    fn send(&self, frame: Frame) -> Result<(), FrameError> {
        if self.shutdown.is_cancelled() {
            return Err(FrameError::ConnectionClosed);
        }
        self.outgoing
            .send(frame)
            .map_err(|_| FrameError::ConnectionClosed)
    }

    fn drop_routes(&self, id: StreamId) {
        let mut routes = self.routes.write();
        routes.data.remove(&id);
        routes.substreams.remove(&id);
    }

    fn reset(&self, stream_id: StreamId) {
        if let Err(err) = self.send(Frame::Reset { stream_id }) {
            trace!(stream_id, error = %err, "could not send reset");
        }
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) {
        match frame {
            Frame::SynStream {
                stream_id,
                parent,
                headers,
                fin,
            } => self.accept(stream_id, parent, headers, fin),
            Frame::Data {
                stream_id,
                data,
                fin,
            } => {
                let mut routes = self.routes.write();
                let consumer_gone = match routes.data.get(&stream_id) {
                    Some(tx) => !data.is_empty() && tx.send(data).is_err(),
                    None => {
                        trace!(stream_id, "data for unknown stream");
                        false
                    }
                };
                if consumer_gone {
                    trace!(stream_id, "data consumer gone");
                }
                if consumer_gone || fin {
                    routes.data.remove(&stream_id);
                }
            }
            Frame::Seal { stream_id } => {
                trace!(stream_id, "sealed");
                self.routes.write().substreams.remove(&stream_id);
            }
            Frame::Reset { stream_id } => {
                debug!(stream_id, "stream reset by peer");
                self.drop_routes(stream_id);
            }
        }
    }

    fn accept(
        self: &Arc<Self>,
        id: StreamId,
        parent: Option<StreamId>,
        headers: Headers,
        fin: bool,
    ) {
        if !(self.auth)(&headers, parent) {
            warn!(stream_id = id, ?parent, "stream rejected by auth handler");
            self.reset(id);
            return;
        }

        let (data_tx, incoming) = if fin {
            (None, None)
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        };
        let conn = Connection {
            inner: self.clone(),
        };
        let stream = Arc::new(Stream::new(conn, id, parent, headers, fin, incoming));

        let mut routes = self.routes.write();
        let target = parent
            .and_then(|p| routes.substreams.get(&p).cloned())
            .or_else(|| routes.top.clone());
        if let Some(tx) = data_tx {
            routes.data.insert(id, tx);
        }
        let delivered = match target {
            Some(tx) => tx.send(stream).is_ok(),
            None => false,
        };
        if !delivered {
            routes.data.remove(&id);
            drop(routes);
            debug!(stream_id = id, ?parent, "no receiver for stream; resetting");
            self.reset(id);
        }
    }

    fn teardown(&self) {
        let mut routes = self.routes.write();
        routes.closed = true;
        routes.data.clear();
        routes.substreams.clear();
        routes.top = None;
        drop(routes);
        self.shutdown.cancel();
    }
}

async fn read_loop<R>(inner: Arc<Inner>, mut frames: FramedRead<R, FrameCodec>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(frame)) => inner.dispatch(frame),
            Some(Err(err)) => {
                warn!(error = %err, "connection read failed");
                break;
            }
            None => {
                debug!("peer closed connection");
                break;
            }
        }
    }
    inner.teardown();
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut queue: UnboundedReceiver<Frame>,
    inner: Arc<Inner>,
) where
    W: AsyncWrite + Unpin,
{
    let shutdown = inner.shutdown.clone();
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let stream_id = frame.stream_id();
        match sink.send(frame).await {
            Ok(()) => {}
            Err(FrameError::Io(err)) => {
                warn!(error = %err, "connection write failed");
                shutdown.cancel();
                return;
            }
            Err(err) => {
                // The codec rejects before touching the buffer.
                warn!(stream_id, error = %err, "unencodable frame; resetting stream");
                inner.drop_routes(stream_id);
                if let Err(err) = sink.send(Frame::Reset { stream_id }).await {
                    warn!(error = %err, "connection write failed");
                    shutdown.cancel();
                    return;
                }
            }
        }
    }

    while let Ok(frame) = queue.try_recv() {
        if sink.feed(frame).await.is_err() {
            break;
        }
    }
    if let Err(err) = sink.close().await {
        trace!(error = %err, "closing connection writer");
    }
}

/// One multiplexed stream.
pub struct Stream {
    conn: Connection,
    id: StreamId,
    parent: Option<StreamId>,
    headers: Headers,
    remote_fin: bool,
    incoming: Mutex<Option<UnboundedReceiver<Bytes>>>,
    finished: AtomicBool,
    sealed: AtomicBool,
}

impl Stream {
    fn new(
        conn: Connection,
        id: StreamId,
        parent: Option<StreamId>,
        headers: Headers,
        remote_fin: bool,
        incoming: Option<UnboundedReceiver<Bytes>>,
    ) -> Self {
        Self {
            conn,
            id,
            parent,
            headers,
            remote_fin,
            incoming: Mutex::new(incoming),
            finished: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn parent(&self) -> Option<StreamId> {
        self.parent
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// True when the stream was opened with FIN: no data will follow.
    pub fn is_finished(&self) -> bool {
        self.remote_fin
    }

    /// Take the channel of inbound DATA payloads. Yields `None` afterwards.
    pub fn take_incoming(&self) -> Option<UnboundedReceiver<Bytes>> {
        self.incoming.lock().take()
    }

    pub fn send_data(&self, data: Bytes) -> Result<(), FrameError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(FrameError::StreamFinished(self.id));
        }
        self.conn.send(Frame::Data {
            stream_id: self.id,
            data,
            fin: false,
        })
    }

    /// Half-close the local data direction. Idempotent.
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.conn.send(Frame::Data {
            stream_id: self.id,
            data: Bytes::new(),
            fin: true,
        })
    }

    /// Announce that no more sub-streams will be opened under this stream.
    /// Idempotent.
    pub fn seal(&self) -> Result<(), FrameError> {
        if self.sealed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.conn.send(Frame::Seal { stream_id: self.id })
    }

    /// Abort the stream in both directions.
    pub fn reset(&self) {
        self.finished.store(true, Ordering::Release);
        self.sealed.store(true, Ordering::Release);
        self.conn.drop_routes(self.id);
        self.conn.inner.reset(self.id);
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("headers", &self.headers)
            .field("remote_fin", &self.remote_fin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(verb: &str) -> Headers {
        Headers::from([("Verb".to_string(), vec![verb.to_string()])])
    }

    type Side = (Connection, UnboundedReceiver<Arc<Stream>>);

    fn pair(server_auth: AuthHandler) -> (Side, Side) {
        pair_with(&SessionConfig::default(), server_auth)
    }

    fn pair_with(config: &SessionConfig, server_auth: AuthHandler) -> (Side, Side) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            Connection::new(a, Role::Client, config, allow_all()),
            Connection::new(b, Role::Server, config, server_auth),
        )
    }

    #[tokio::test]
    async fn test_stream_ids_follow_role_parity() {
        let ((client, _), (server, _)) = pair(allow_all());
        assert_eq!(client.reserve_stream_id().unwrap(), 1);
        assert_eq!(client.reserve_stream_id().unwrap(), 3);
        assert_eq!(server.reserve_stream_id().unwrap(), 2);
        assert_eq!(server.reserve_stream_id().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_top_level_and_sub_streams_are_routed() {
        let ((client, _), (server, mut server_top)) = pair(allow_all());

        let id = client.reserve_stream_id().unwrap();
        let mut replies = client.accept_substreams(id).unwrap();
        client.open_stream(id, None, headers("ls"), true).unwrap();

        let inbound = server_top.recv().await.unwrap();
        assert_eq!(inbound.id(), id);
        assert_eq!(inbound.headers()["Verb"], vec!["ls"]);
        assert!(inbound.is_finished());

        let reply_id = server.reserve_stream_id().unwrap();
        server
            .open_stream(reply_id, Some(id), headers("set"), true)
            .unwrap();
        let reply = replies.recv().await.unwrap();
        assert_eq!(reply.parent(), Some(id));

        inbound.seal().unwrap();
        assert!(replies.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_data_flows_until_fin() {
        let ((client, _), (_server, mut server_top)) = pair(allow_all());

        let id = client.reserve_stream_id().unwrap();
        let outbound = client.open_stream(id, None, headers("connect"), false).unwrap();
        outbound.send_data(Bytes::from_static(b"ping")).unwrap();
        outbound.finish().unwrap();
        assert!(outbound.send_data(Bytes::from_static(b"late")).is_err());

        let inbound = server_top.recv().await.unwrap();
        assert!(!inbound.is_finished());
        let mut data = inbound.take_incoming().unwrap();
        assert_eq!(&data.recv().await.unwrap()[..], b"ping");
        assert!(data.recv().await.is_none());
        assert!(inbound.take_incoming().is_none());
    }

    #[tokio::test]
    async fn test_rejected_stream_is_reset() {
        let deny_spawn: AuthHandler =
            Arc::new(|headers: &Headers, _parent: Option<StreamId>| {
                headers.get("Verb") != Some(&vec!["spawn".to_string()])
            });
        let ((client, _), (_server, mut server_top)) = pair(deny_spawn);

        let denied = client.reserve_stream_id().unwrap();
        let mut denied_replies = client.accept_substreams(denied).unwrap();
        client.open_stream(denied, None, headers("spawn"), true).unwrap();
        assert!(denied_replies.recv().await.is_none());

        let allowed = client.reserve_stream_id().unwrap();
        client.open_stream(allowed, None, headers("ls"), true).unwrap();
        assert_eq!(server_top.recv().await.unwrap().id(), allowed);
    }

    #[tokio::test]
    async fn test_peer_close_ends_every_route() {
        let ((client, mut client_top), (server, _)) = pair(allow_all());
        let id = client.reserve_stream_id().unwrap();
        let mut replies = client.accept_substreams(id).unwrap();

        server.close();
        assert!(replies.recv().await.is_none());
        assert!(client_top.recv().await.is_none());
        assert!(matches!(
            client.accept_substreams(id + 2),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_stream_ids_run_out_instead_of_wrapping() {
        let ((client, _), _server) = pair(allow_all());
        client.inner.next_id.store(u32::MAX - 2, Ordering::Relaxed);

        assert_eq!(client.reserve_stream_id().unwrap(), u32::MAX - 2);
        assert_eq!(client.reserve_stream_id().unwrap(), u32::MAX);
        assert!(matches!(
            client.reserve_stream_id(),
            Err(FrameError::ConnectionClosed)
        ));
        assert!(matches!(
            client.reserve_stream_id(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_headers_are_refused_before_queueing() {
        let config = SessionConfig {
            max_frame_len: 64,
            ..SessionConfig::default()
        };
        let ((client, _), _server) = pair_with(&config, allow_all());
        let id = client.reserve_stream_id().unwrap();

        let big = Headers::from([("Args".to_string(), vec!["x".repeat(128)])]);
        assert!(matches!(
            client.open_stream(id, None, big, false),
            Err(FrameError::TooLarge { limit: 64, .. })
        ));
        assert!(!client.inner.routes.read().data.contains_key(&id));
    }

    #[tokio::test]
    async fn test_unencodable_frame_resets_only_its_stream() {
        let config = SessionConfig {
            max_frame_len: 1024,
            ..SessionConfig::default()
        };
        let ((client, _), (_server, mut server_top)) = pair_with(&config, allow_all());

        let id = client.reserve_stream_id().unwrap();
        let outbound = client.open_stream(id, None, headers("connect"), false).unwrap();
        let mut local = outbound.take_incoming().unwrap();
        outbound.send_data(Bytes::from(vec![0u8; 4096])).unwrap();

        let inbound = server_top.recv().await.unwrap();
        let mut remote = inbound.take_incoming().unwrap();
        assert!(remote.recv().await.is_none());
        assert!(local.recv().await.is_none());

        let next = client.reserve_stream_id().unwrap();
        client.open_stream(next, None, headers("ls"), true).unwrap();
        assert_eq!(server_top.recv().await.unwrap().id(), next);
        assert!(!client.is_closed());
    }
}
