// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy shared by every beam sender, receiver and transport.
//!
//! | Class | Variants | Surfaced as |
//! |-------|----------|-------------|
//! | Pipe closure | `ClosedPipe`, `Eof` | `Err` from `send`/`receive` |
//! | Transport fallback | `IncompatibleSender`, `IncompatibleReceiver` | control value for [`crate::copy`] |
//! | Application | `Handler`, `AlreadyRunning`, `NotFound`, ... | `Error` message on the caller's `Ret` |
//! | Protocol / transport | `Protocol`, `Transport`, `Io` | `Err` to the local caller only |
//!
//! `BeamError` is `Clone` because a closed pipe hands the same close reason to
//! every subsequent caller on either side.

use std::sync::Arc;

use thiserror::Error;

use crate::verb::Verb;

#[derive(Debug, Clone, Error)]
pub enum BeamError {
    #[error("read/write on closed pipe")]
    ClosedPipe,

    #[error("EOF")]
    Eof,

    #[error("incompatible sender")]
    IncompatibleSender,

    #[error("incompatible receiver")]
    IncompatibleReceiver,

    #[error("can't close {0}")]
    CannotClose(&'static str),

    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    #[error("task stopped")]
    TaskStopped,

    #[error("not found: {0}")]
    NotFound(String),

    /// An `Error` message received from the other end.
    #[error("{0}")]
    Remote(String),

    #[error("unexpected reply verb: {0}")]
    UnexpectedVerb(Verb),

    #[error("nesting depth {depth} exceeds limit of {limit}")]
    NestingTooDeep { depth: usize, limit: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Failure raised by a handler body.
    #[error("{0}")]
    Handler(String),

    #[error("handler worker pool closed")]
    PoolClosed,
}

impl BeamError {
    /// Build an application error from anything printable.
    pub fn handler(message: impl std::fmt::Display) -> Self {
        Self::Handler(message.to_string())
    }

    pub fn protocol(message: impl std::fmt::Display) -> Self {
        Self::Protocol(message.to_string())
    }

    /// True for the graceful end-of-stream signal.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

impl From<std::io::Error> for BeamError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

pub type Result<T, E = BeamError> = std::result::Result<T, E>;
