// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Copy
//!
//! Pumps every message from a [`Receiver`] into a [`Sender`], preserving the
//! reply topology: each forwarded message gets a fresh reply pipe, and a
//! nested copy relays whatever comes back on it into the original `Ret`.
//!
//! ## Order of attempts
//!
//! 1. `src.send_to(dst)`, then `dst.receive_from(src)` (direct transfer).
//! 2. The generic loop below, on `IncompatibleSender`/`IncompatibleReceiver`.
//!
//! ## Depth
//!
//! Replies to replies recurse. Each level adds one to the depth; a branch that
//! would exceed the limit fails with [`BeamError::NestingTooDeep`] and its
//! `Ret` is closed without a reply.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, trace, warn};

use crate::endpoint::{Receiver, Sender};
use crate::error::{BeamError, Result};
use crate::message::{Mode, Ret};

/// Reply-of-reply nesting allowed by [`copy`].
pub const DEFAULT_MAX_COPY_DEPTH: usize = 64;

/// Copy until `src` reports end of stream. Returns the number of messages
/// forwarded at the top level.
pub fn copy(dst: Arc<dyn Sender>, src: Arc<dyn Receiver>) -> BoxFuture<'static, Result<usize>> {
    copy_with_limit(dst, src, DEFAULT_MAX_COPY_DEPTH)
}

pub fn copy_with_limit(
    dst: Arc<dyn Sender>,
    src: Arc<dyn Receiver>,
    max_depth: usize,
) -> BoxFuture<'static, Result<usize>> {
    copy_at(dst, src, 0, max_depth)
}

fn copy_at(
    dst: Arc<dyn Sender>,
    src: Arc<dyn Receiver>,
    depth: usize,
    max_depth: usize,
) -> BoxFuture<'static, Result<usize>> {
    Box::pin(async move {
        match src.send_to(&dst).await {
            Err(BeamError::IncompatibleSender) => {}
            direct => return direct,
        }
        match dst.receive_from(&src).await {
            Err(BeamError::IncompatibleReceiver) => {}
            direct => return direct,
        }

        let mut forwarded = 0;
        let mut relays = Relays::new(depth);
        let outcome = loop {
            let mut msg = match src.receive(Mode::RET).await {
                Ok(msg) => msg,
                Err(BeamError::Eof) => break Ok(forwarded),
                Err(BeamError::Protocol(reason)) => {
                    warn!(%reason, depth, "skipping malformed inbound message");
                    continue;
                }
                Err(err) => break Err(err),
            };

            let verb = msg.verb;
            let ret = std::mem::replace(&mut msg.ret, Ret::Pipe).sender();
            let reply = match dst.send(msg).await {
                Ok(reply) => reply,
                Err(err) => {
                    close_quietly(&ret).await;
                    break Err(err);
                }
            };
            forwarded += 1;

            match reply {
                Some(reply) => {
                    relays.spawn(relay(ret, Arc::from(reply), depth + 1, max_depth));
                }
                None => {
                    trace!(%verb, "destination produced no reply stream");
                    close_quietly(&ret).await;
                }
            }
        };

        relays.drain().await;
        outcome
    })
}

/// Reply relays spawned by one copy loop. Finished relays are collected on
/// every spawn, so a long-lived loop only holds the ones still running.
struct Relays {
    set: JoinSet<Result<usize>>,
    depth: usize,
}

impl Relays {
    fn new(depth: usize) -> Self {
        Self {
            set: JoinSet::new(),
            depth,
        }
    }

    fn spawn<F>(&mut self, relay: F)
    where
        F: Future<Output = Result<usize>> + Send + 'static,
    {
        while let Some(joined) = self.set.try_join_next() {
            self.finished(joined);
        }
        self.set.spawn(relay);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.set.len()
    }

    async fn drain(mut self) {
        while let Some(joined) = self.set.join_next().await {
            self.finished(joined);
        }
    }

    fn finished(&self, joined: std::result::Result<Result<usize>, JoinError>) {
        let depth = self.depth;
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(error = %err, depth, "reply relay ended with error"),
            Err(err) => debug!(error = %err, depth, "reply relay task failed"),
        }
    }
}

async fn relay(
    ret: Arc<dyn Sender>,
    replies: Arc<dyn Receiver>,
    depth: usize,
    max_depth: usize,
) -> Result<usize> {
    let outcome = if depth > max_depth {
        warn!(depth, limit = max_depth, "reply nesting too deep; dropping branch");
        Err(BeamError::NestingTooDeep {
            depth,
            limit: max_depth,
        })
    } else {
        copy_at(ret.clone(), replies, depth, max_depth).await
    };
    close_quietly(&ret).await;
    outcome
}

async fn close_quietly(ret: &Arc<dyn Sender>) {
    if let Err(err) = ret.close().await {
        trace!(error = %err, "reply channel refused close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::NopReceiver;
    use crate::handler::Handler;
    use crate::message::Message;
    use crate::pipe::pipe;
    use crate::utils::{Buffer, Repeater};
    use crate::verb::Verb;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Receiver that replays a fixed script of results, then `Eof`.
    struct Scripted {
        script: Mutex<Vec<Result<Message>>>,
    }

    #[async_trait]
    impl Receiver for Scripted {
        async fn receive(&self, _mode: Mode) -> Result<Message> {
            let mut script = self.script.lock();
            if script.is_empty() {
                return Err(BeamError::Eof);
            }
            script.remove(0)
        }
    }

    #[tokio::test]
    async fn test_replies_are_relayed_to_the_original_ret() {
        let (src_r, src_w) = pipe();
        let dst: Arc<dyn Sender> = Arc::new(Repeater::new(
            Message::new(Verb::Set).with_args(["pong"]),
        ));
        let pump = tokio::spawn(copy(dst, Arc::new(src_r)));

        let reply = src_w
            .send(Message::new(Verb::Get).with_ret(Ret::Pipe))
            .await
            .unwrap()
            .expect("reply stream");
        let answer = reply.receive(Mode::NONE).await.unwrap();
        assert_eq!(answer.args, vec!["pong"]);
        assert!(reply.receive(Mode::NONE).await.unwrap_err().is_eof());

        drop(src_w);
        assert_eq!(pump.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_protocol_errors_are_skipped() {
        let src = Arc::new(Scripted {
            script: Mutex::new(vec![
                Ok(Message::new(Verb::Log).with_args(["a"])),
                Err(BeamError::protocol("bad header")),
                Ok(Message::new(Verb::Log).with_args(["b"])),
            ]),
        });
        let sink = Arc::new(Buffer::new());
        let count = copy(sink.clone(), src).await.unwrap();

        assert_eq!(count, 2);
        let args: Vec<_> = sink.take().into_iter().map(|m| m.args).collect();
        assert_eq!(args, vec![vec!["a"], vec!["b"]]);
    }

    #[tokio::test]
    async fn test_other_source_errors_abort() {
        let src = Arc::new(Scripted {
            script: Mutex::new(vec![
                Err(BeamError::Transport("reset by peer".into())),
                Ok(Message::new(Verb::Log)),
            ]),
        });
        let sink = Arc::new(Buffer::new());
        let err = copy(sink.clone(), src).await.unwrap_err();
        assert!(matches!(err, BeamError::Transport(_)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_nesting_beyond_limit_closes_ret_without_reply() {
        for (limit, expect_reply) in [(0, false), (1, true)] {
            let (src_r, src_w) = pipe();
            let dst: Arc<dyn Sender> = Arc::new(Repeater::new(Message::new(Verb::Ack)));
            let pump = tokio::spawn(copy_with_limit(dst, Arc::new(src_r), limit));

            let reply = src_w
                .send(Message::new(Verb::Start).with_ret(Ret::Pipe))
                .await
                .unwrap()
                .expect("reply stream");
            let first = reply.receive(Mode::NONE).await;
            assert_eq!(first.is_ok(), expect_reply, "limit {}", limit);

            drop(src_w);
            pump.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_source_copies_nothing() {
        let sink = Arc::new(Buffer::new());
        assert_eq!(copy(sink.clone(), Arc::new(NopReceiver)).await.unwrap(), 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_handler_errors_reach_the_caller_through_copy() {
        let (src_r, src_w) = pipe();
        let dst: Arc<dyn Sender> = Arc::new(Handler::new(|_msg: Message| async {
            Err(BeamError::AlreadyRunning)
        }));
        tokio::spawn(copy(dst, Arc::new(src_r)));

        let reply = src_w
            .send(Message::new(Verb::Start).with_ret(Ret::Pipe))
            .await
            .unwrap()
            .expect("reply stream");
        let answer = reply.receive(Mode::NONE).await.unwrap();
        assert_eq!(answer.verb, Verb::Error);
        assert_eq!(answer.arg(0), Some("already running"));
    }

    #[tokio::test]
    async fn test_finished_relays_are_collected_while_copying() {
        let mut relays = Relays::new(0);
        for _ in 0..100 {
            relays.spawn(async { Ok::<usize, BeamError>(1) });
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        relays.spawn(std::future::pending::<Result<usize>>());
        assert_eq!(relays.len(), 1);
    }

    #[tokio::test]
    async fn test_many_round_trips_through_one_copy() {
        let (src_r, src_w) = pipe();
        let dst: Arc<dyn Sender> = Arc::new(Repeater::new(Message::new(Verb::Ack)));
        let pump = tokio::spawn(copy(dst, Arc::new(src_r)));

        for _ in 0..200 {
            let reply = src_w
                .send(Message::new(Verb::Get).with_ret(Ret::Pipe))
                .await
                .unwrap()
                .expect("reply stream");
            assert_eq!(reply.receive(Mode::NONE).await.unwrap().verb, Verb::Ack);
            assert!(reply.receive(Mode::NONE).await.unwrap_err().is_eof());
        }

        drop(src_w);
        assert_eq!(pump.await.unwrap().unwrap(), 200);
    }
}
