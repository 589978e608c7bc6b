// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Verb router.
//!
//! A [`Server`] maps each [`Verb`] to at most one sender. Lookup order on
//! `send` is: the verb's sender, then the catch-all, then the stock
//! not-implemented sender.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::endpoint::{Receiver, Sender};
use crate::error::{BeamError, Result};
use crate::message::Message;
use crate::utils::not_implemented_sender;
use crate::verb::Verb;

#[derive(Default)]
struct Routes {
    by_verb: HashMap<Verb, Arc<dyn Sender>>,
    catchall: Option<Arc<dyn Sender>>,
}

/// Cloning shares the routing table.
#[derive(Clone)]
pub struct Server {
    routes: Arc<RwLock<Routes>>,
    fallback: Arc<dyn Sender>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(RwLock::new(Routes::default())),
            fallback: not_implemented_sender(),
        }
    }

    /// Route `verb` to `sender`, replacing any previous route.
    pub fn on(&self, verb: Verb, sender: Arc<dyn Sender>) -> &Self {
        self.routes.write().by_verb.insert(verb, sender);
        self
    }

    /// Route every verb without an explicit entry to `sender`.
    pub fn catchall(&self, sender: Arc<dyn Sender>) -> &Self {
        self.routes.write().catchall = Some(sender);
        self
    }

    fn route(&self, verb: Verb) -> Arc<dyn Sender> {
        let routes = self.routes.read();
        routes
            .by_verb
            .get(&verb)
            .or(routes.catchall.as_ref())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Sender for Server {
    async fn send(&self, msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        trace!(verb = %msg.verb, "dispatch");
        let target = self.route(msg.verb);
        target.send(msg).await
    }

    async fn close(&self) -> Result<()> {
        Err(BeamError::CannotClose("server"))
    }
}
