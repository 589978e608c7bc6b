// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hierarchical namespace of named senders.
//!
//! A [`Tree`] answers `Attach` and `Ls` itself and forwards every other verb
//! through its embedded [`Server`].
//!
//! | Request | Reply |
//! |---------|-------|
//! | `Attach []` / `Attach [""]` | `Ack`, `Ret` = this tree |
//! | `Attach [name]` (bound) | `Ack`, `Ret` = the child |
//! | `Attach [name]` (unbound) | `Error ["not found: name"]` |
//! | `Ls` | `Set` of child names, sorted |

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::endpoint::{Receiver, Sender};
use crate::error::{BeamError, Result};
use crate::handler::Handler;
use crate::message::Message;
use crate::server::Server;
use crate::verb::Verb;

struct TreeInner {
    server: Server,
    children: RwLock<BTreeMap<String, Arc<dyn Sender>>>,
}

/// Cloning shares the same namespace.
#[derive(Clone)]
pub struct Tree {
    inner: Arc<TreeInner>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<TreeInner>| {
            let server = Server::new();
            server
                .on(Verb::Attach, Arc::new(attach_handler(weak.clone())))
                .on(Verb::Ls, Arc::new(ls_handler(weak.clone())));
            TreeInner {
                server,
                children: RwLock::new(BTreeMap::new()),
            }
        });
        Self { inner }
    }

    /// Register `sender` under `name`, replacing any previous binding.
    pub fn bind(&self, name: impl Into<String>, sender: Arc<dyn Sender>) -> &Self {
        self.inner.children.write().insert(name.into(), sender);
        self
    }

    /// Route an extra verb through the embedded server.
    pub fn on(&self, verb: Verb, sender: Arc<dyn Sender>) -> &Self {
        self.inner.server.on(verb, sender);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.children.read().keys().cloned().collect()
    }
}

fn upgrade(weak: &Weak<TreeInner>) -> Result<Arc<TreeInner>> {
    weak.upgrade()
        .ok_or_else(|| BeamError::handler("tree has been dropped"))
}

fn attach_handler(weak: Weak<TreeInner>) -> Handler {
    Handler::new(move |msg: Message| {
        let weak = weak.clone();
        async move {
            let inner = upgrade(&weak)?;
            let name = msg.arg(0).unwrap_or_default();
            let target: Arc<dyn Sender> = if name.is_empty() {
                Arc::new(Tree { inner })
            } else {
                let child = inner.children.read().get(name).cloned();
                child.ok_or_else(|| BeamError::NotFound(name.to_string()))?
            };
            msg.ret_sender()
                .send(Message::new(Verb::Ack).with_ret_sender(target))
                .await?;
            Ok(())
        }
    })
}

fn ls_handler(weak: Weak<TreeInner>) -> Handler {
    Handler::new(move |msg: Message| {
        let weak = weak.clone();
        async move {
            let names: Vec<String> = upgrade(&weak)?.children.read().keys().cloned().collect();
            msg.ret_sender()
                .send(Message::new(Verb::Set).with_args(names))
                .await?;
            Ok(())
        }
    })
}

#[async_trait]
impl Sender for Tree {
    async fn send(&self, msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        self.inner.server.send(msg).await
    }

    async fn close(&self) -> Result<()> {
        Err(BeamError::CannotClose("tree"))
    }
}
