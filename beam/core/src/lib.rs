// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Beam
//!
//! Message-passing substrate: typed messages with positional arguments, an
//! optional byte-stream attachment and a return channel, moved between
//! senders and receivers that may live in-process or across a connection.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Messages, pipes, handlers, routers, tasks and the copy
//!   primitive shared by every transport binding

pub mod copy;
pub mod data;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod message;
pub mod object;
pub mod pipe;
pub mod server;
pub mod task;
pub mod tree;
pub mod utils;
pub mod verb;

pub use copy::{copy, copy_with_limit, DEFAULT_MAX_COPY_DEPTH};
pub use data::{DataError, DataMap};
pub use endpoint::{NopReceiver, NopSender, Receiver, Sender};
pub use error::{BeamError, Result};
pub use handler::{Handler, DEFAULT_HANDLER_CONCURRENCY};
pub use message::{Message, Mode, Ret};
pub use object::Object;
pub use pipe::{pipe, PipeReceiver, PipeSender};
pub use server::Server;
pub use task::Task;
pub use tree::Tree;
pub use utils::{not_implemented, Buffer, Repeater};
pub use verb::Verb;
