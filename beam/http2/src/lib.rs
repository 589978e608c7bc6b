// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Beam HTTP2 Binding
//!
//! Carries beam messages over one multiplexed byte connection: one stream per
//! message, replies as sub-streams, attachments as the stream's data.
//!
//! # Architecture
//!
//! - **Layer:** Transport
//! - **Purpose:** Framing, stream routing, message encoding, sessions and the
//!   TCP listener

pub mod codec;
pub mod config;
pub mod connection;
pub mod frame;
pub mod listen;
pub mod session;
pub mod tunnel;

pub use config::SessionConfig;
pub use connection::{allow_all, AuthHandler, Connection, Role, Stream};
pub use frame::{Frame, FrameCodec, FrameError, Headers, StreamId};
pub use listen::{Authenticator, ListenSession, NoAuthenticator, PeerInfo};
pub use session::{
    create_stream_message, send_stream_message, StreamReceiver, StreamSender, StreamSession,
};
