// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! TCP listener that merges every accepted connection into one receiver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beam::{BeamError, Message, Mode, Receiver, Result};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::connection::{allow_all, AuthHandler, Connection, Role, Stream};
use crate::session::create_stream_message;

/// What is known about a peer when it connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_addr: Option<SocketAddr>,
}

/// Decides, per connection, whether to accept it and how to vet its streams.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, peer: &PeerInfo) -> Result<AuthHandler>;
}

impl<F> Authenticator for F
where
    F: Fn(&PeerInfo) -> Result<AuthHandler> + Send + Sync,
{
    fn authenticate(&self, peer: &PeerInfo) -> Result<AuthHandler> {
        self(peer)
    }
}

/// Admits every connection and every stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthenticator;

impl Authenticator for NoAuthenticator {
    fn authenticate(&self, _peer: &PeerInfo) -> Result<AuthHandler> {
        Ok(allow_all())
    }
}

type Inbound = (Connection, Arc<Stream>);

const ACCEPT_RETRY_BASE_MS: u64 = 10;
const ACCEPT_RETRY_MAX_MS: u64 = 1000;

/// Delay before the next accept after `failures` consecutive errors.
fn accept_retry_delay(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(16);
    Duration::from_millis((ACCEPT_RETRY_BASE_MS << doublings).min(ACCEPT_RETRY_MAX_MS))
}

pub struct ListenSession {
    local_addr: SocketAddr,
    inbound: Mutex<UnboundedReceiver<Inbound>>,
    shutdown: CancellationToken,
    config: SessionConfig,
}

impl ListenSession {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        authenticator: Arc<dyn Authenticator>,
        config: SessionConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::new(listener, authenticator, config)
    }

    /// Serve an already bound listener.
    pub fn new(
        listener: TcpListener,
        authenticator: Arc<dyn Authenticator>,
        config: SessionConfig,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        info!(%local_addr, "listening for stream sessions");
        tokio::spawn(serve(
            listener,
            authenticator,
            config.clone(),
            tx,
            shutdown.clone(),
        ));

        Ok(Self {
            local_addr,
            inbound: Mutex::new(rx),
            shutdown,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and tear down every accepted connection.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ListenSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(
    listener: TcpListener,
    authenticator: Arc<dyn Authenticator>,
    config: SessionConfig,
    inbound: UnboundedSender<Inbound>,
    shutdown: CancellationToken,
) {
    let mut failures: u32 = 0;
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (socket, addr) = match accepted {
            Ok(accepted) => {
                failures = 0;
                accepted
            }
            Err(err) => {
                // Errors such as EMFILE persist; back off instead of spinning.
                failures = failures.saturating_add(1);
                let delay = accept_retry_delay(failures);
                warn!(error = %err, failures, ?delay, "accept failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
        };

        let peer = PeerInfo {
            peer_addr: Some(addr),
        };
        let auth = match authenticator.authenticate(&peer) {
            Ok(auth) => auth,
            Err(err) => {
                warn!(peer = %addr, error = %err, "connection rejected");
                continue;
            }
        };
        info!(peer = %addr, "accepted connection");

        let (conn, mut top) =
            Connection::with_shutdown(socket, Role::Server, &config, auth, shutdown.child_token());
        let inbound = inbound.clone();
        tokio::spawn(async move {
            while let Some(stream) = top.recv().await {
                if inbound.send((conn.clone(), stream)).is_err() {
                    conn.close();
                    break;
                }
            }
            debug!(peer = %addr, "connection closed");
        });
    }
    info!("listener stopped");
}

#[async_trait]
impl Receiver for ListenSession {
    async fn receive(&self, mode: Mode) -> Result<Message> {
        let (conn, stream) = self
            .inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(BeamError::Eof)?;
        create_stream_message(&conn, stream, mode, &self.config).await
    }
}
