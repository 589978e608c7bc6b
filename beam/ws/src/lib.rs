// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Beam WebSocket Adapter
//!
//! Runs a stream session inside an upgraded WebSocket so beam services are
//! reachable wherever plain HTTP is.
//!
//! # Architecture
//!
//! - **Layer:** Transport
//! - **Purpose:** HTTP upgrade endpoint (axum) and client dialer
//!   (tokio-tungstenite) around the stream session binding

pub mod adapter;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::Extensions;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use beam::{copy, BeamError, Result, Sender};
use beam_http2::{Authenticator, PeerInfo, SessionConfig, StreamSession};
use tracing::{debug, info, warn};

pub use adapter::{bridge, WsEvent, WsFrame};

struct WsState {
    handler: Arc<dyn Sender>,
    authenticator: Arc<dyn Authenticator>,
    config: SessionConfig,
}

/// An axum router serving beam sessions on `/`.
///
/// Only `GET` upgrades are routed; any other method is answered `405` and a
/// failed handshake is answered by the upgrade extractor. Every message the
/// peer sends is copied into `handler`.
pub fn router(
    handler: Arc<dyn Sender>,
    authenticator: Arc<dyn Authenticator>,
    config: SessionConfig,
) -> Router {
    let state = Arc::new(WsState {
        handler,
        authenticator,
        config,
    });
    Router::new().route("/", get(upgrade)).with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
    extensions: Extensions,
) -> Response {
    let peer = PeerInfo {
        peer_addr: extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
    };

    ws.on_upgrade(move |socket| async move {
        let session = match serve(
            socket,
            state.authenticator.as_ref(),
            peer.clone(),
            state.config.clone(),
        ) {
            Ok(session) => Arc::new(session),
            Err(err) => {
                warn!(peer = ?peer.peer_addr, error = %err, "websocket session rejected");
                return;
            }
        };
        info!(peer = ?peer.peer_addr, "websocket session established");
        match copy(state.handler.clone(), session).await {
            Ok(count) => {
                debug!(peer = ?peer.peer_addr, messages = count, "websocket session ended")
            }
            Err(err) => {
                debug!(peer = ?peer.peer_addr, error = %err, "websocket session ended with error")
            }
        }
    })
}

/// Build a server session over an already upgraded socket.
pub fn serve(
    socket: WebSocket,
    authenticator: &dyn Authenticator,
    peer: PeerInfo,
    config: SessionConfig,
) -> Result<StreamSession> {
    let io = bridge(socket, config.websocket_buffer);
    StreamSession::server(io, authenticator, peer, config)
}

/// Dial `url` (`ws://` or `wss://`) and open a client session over it.
pub async fn connect(url: &str, config: SessionConfig) -> Result<StreamSession> {
    let (socket, response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|err| BeamError::Transport(err.to_string()))?;
    debug!(%url, status = %response.status(), "websocket connected");
    let io = bridge(socket, config.websocket_buffer);
    Ok(StreamSession::client(io, config))
}
