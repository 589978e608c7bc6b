// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Small stock senders used by routers, tests and tools.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::endpoint::{NopReceiver, Receiver, Sender};
use crate::error::Result;
use crate::handler::Handler;
use crate::message::Message;

/// Collects every message sent to it.
#[derive(Default)]
pub struct Buffer {
    messages: Mutex<Vec<Message>>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Drain the collected messages, oldest first.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock())
    }
}

#[async_trait]
impl Sender for Buffer {
    async fn send(&self, msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        let wants_reply = msg.ret.is_pipe();
        self.messages.lock().push(msg);
        if wants_reply {
            return Ok(Some(Box::new(NopReceiver)));
        }
        Ok(None)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Answers every message with the same reply. Attachments are not repeated.
#[derive(Clone)]
pub struct Repeater {
    handler: Handler,
}

impl Repeater {
    pub fn new(reply: Message) -> Self {
        let verb = reply.verb;
        let args = Arc::new(reply.args);
        let handler = Handler::new(move |msg: Message| {
            let args = args.clone();
            async move {
                msg.ret_sender()
                    .send(Message::new(verb).with_args(args.iter().cloned()))
                    .await?;
                Ok(())
            }
        });
        Self { handler }
    }
}

#[async_trait]
impl Sender for Repeater {
    async fn send(&self, msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        self.handler.send(msg).await
    }

    async fn close(&self) -> Result<()> {
        self.handler.close().await
    }
}

/// Fallback for verbs nobody registered.
pub fn not_implemented() -> Repeater {
    Repeater::new(Message::error("not implemented"))
}

/// Convenience for `Arc::new(not_implemented())` as a trait object.
pub(crate) fn not_implemented_sender() -> Arc<dyn Sender> {
    Arc::new(not_implemented())
}
