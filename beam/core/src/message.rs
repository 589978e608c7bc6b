// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Model
//!
//! A [`Message`] is the only unit of communication in beam: a [`Verb`], a
//! positional argument list, an optional attachment and a return channel.
//!
//! The return channel is a tagged [`Ret`] rather than a sentinel sender:
//!
//! - [`Ret::None`]: the caller expects no reply.
//! - [`Ret::Pipe`]: the sender must synthesize a reply pipe and hand its
//!   read end back from `send`.
//! - [`Ret::Sender`]: replies go to an existing sender.
//!
//! Every receiver normalizes `Ret::None` to a [`NopSender`] before the message
//! reaches a handler, so a received message always carries `Ret::Sender`.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use tokio::net::UnixStream;

use crate::endpoint::{NopSender, Sender};
use crate::verb::Verb;

/// Return channel of a message.
#[derive(Clone, Default)]
pub enum Ret {
    #[default]
    None,
    Pipe,
    Sender(Arc<dyn Sender>),
}

impl Ret {
    pub fn is_pipe(&self) -> bool {
        matches!(self, Ret::Pipe)
    }

    /// Resolve to a concrete sender, substituting a [`NopSender`] when there is none.
    pub fn sender(&self) -> Arc<dyn Sender> {
        match self {
            Ret::Sender(sender) => sender.clone(),
            Ret::None | Ret::Pipe => Arc::new(NopSender),
        }
    }
}

impl fmt::Debug for Ret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ret::None => f.write_str("None"),
            Ret::Pipe => f.write_str("Pipe"),
            Ret::Sender(_) => f.write_str("Sender(..)"),
        }
    }
}

/// Receive mode bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode(u8);

impl Mode {
    /// Close the received message's `Ret` before returning it.
    pub const NONE: Mode = Mode(0);
    /// Keep the received message's `Ret` open for replies.
    pub const RET: Mode = Mode(1);

    pub fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

pub struct Message {
    pub verb: Verb,
    pub args: Vec<String>,
    /// Duplex byte stream owned by whoever holds the message.
    pub att: Option<UnixStream>,
    pub ret: Ret,
}

impl Message {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            args: Vec::new(),
            att: None,
            ret: Ret::None,
        }
    }

    /// An `Error` message carrying one human-readable string.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Verb::Error).with_args([text.into()])
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ret(mut self, ret: Ret) -> Self {
        self.ret = ret;
        self
    }

    /// Shorthand for `with_ret(Ret::Sender(sender))`.
    pub fn with_ret_sender(self, sender: Arc<dyn Sender>) -> Self {
        self.with_ret(Ret::Sender(sender))
    }

    pub fn with_att(mut self, att: UnixStream) -> Self {
        self.att = Some(att);
        self
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// The reply channel, never absent.
    pub fn ret_sender(&self) -> Arc<dyn Sender> {
        self.ret.sender()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("verb", &self.verb)
            .field("args", &self.args)
            .field("att", &self.att.is_some())
            .field("ret", &self.ret)
            .finish()
    }
}
