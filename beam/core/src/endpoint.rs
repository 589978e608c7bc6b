// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sender / Receiver
//!
//! The two capability traits every beam component implements. A value is a
//! sender if it can accept a [`Message`]; a receiver if it can yield one.
//! Local pipes, handlers, routers and network sessions are all interchangeable
//! behind these traits.
//!
//! `send_to` / `receive_from` are the direct-transfer hooks used by
//! [`crate::copy`]: an implementation that can move messages without the
//! generic loop overrides them, everything else answers
//! [`BeamError::IncompatibleSender`] / [`BeamError::IncompatibleReceiver`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BeamError, Result};
use crate::message::{Message, Mode};
use crate::pipe::{PipeReceiver, PipeSender};

#[async_trait]
pub trait Sender: Send + Sync + 'static {
    /// Deliver `msg`. Returns the reply stream when `msg.ret` was [`crate::Ret::Pipe`].
    async fn send(&self, msg: Message) -> Result<Option<Box<dyn Receiver>>>;

    async fn close(&self) -> Result<()>;

    /// Pull every message out of `src` directly.
    async fn receive_from(&self, _src: &Arc<dyn Receiver>) -> Result<usize> {
        Err(BeamError::IncompatibleReceiver)
    }

    fn as_pipe_sender(&self) -> Option<&PipeSender> {
        None
    }
}

#[async_trait]
pub trait Receiver: Send + Sync + 'static {
    async fn receive(&self, mode: Mode) -> Result<Message>;

    /// Push every message into `dst` directly.
    async fn send_to(&self, _dst: &Arc<dyn Sender>) -> Result<usize> {
        Err(BeamError::IncompatibleSender)
    }

    fn as_pipe_receiver(&self) -> Option<&PipeReceiver> {
        None
    }
}

/// Accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSender;

#[async_trait]
impl Sender for NopSender {
    async fn send(&self, msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        if msg.ret.is_pipe() {
            return Ok(Some(Box::new(NopReceiver)));
        }
        Ok(None)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Always at end of stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopReceiver;

#[async_trait]
impl Receiver for NopReceiver {
    async fn receive(&self, _mode: Mode) -> Result<Message> {
        Err(BeamError::Eof)
    }
}
