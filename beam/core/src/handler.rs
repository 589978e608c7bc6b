// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Adapter turning an async function into a [`Sender`].
//!
//! Each delivered message runs on its own tokio task, bounded by a per-handler
//! semaphore. `send` waits for a permit, so a saturated handler pushes back on
//! its callers instead of spawning without limit.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::endpoint::{NopSender, Receiver, Sender};
use crate::error::{BeamError, Result};
use crate::message::{Message, Ret};
use crate::pipe::pipe;

/// In-flight invocations allowed per handler unless overridden.
pub const DEFAULT_HANDLER_CONCURRENCY: usize = 1024;

type HandlerFn = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct Handler {
    func: HandlerFn,
    permits: Arc<Semaphore>,
}

impl Handler {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_concurrency(DEFAULT_HANDLER_CONCURRENCY, func)
    }

    /// Same as [`Handler::new`] with an explicit in-flight limit (minimum 1).
    pub fn with_concurrency<F, Fut>(limit: usize, func: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            func: Arc::new(
                move |msg: Message| -> BoxFuture<'static, Result<()>> { Box::pin(func(msg)) },
            ),
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl Sender for Handler {
    async fn send(&self, mut msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        let (reply, ret): (Option<Box<dyn Receiver>>, Arc<dyn Sender>) =
            match std::mem::take(&mut msg.ret) {
                Ret::Pipe => {
                    let (reader, writer) = pipe();
                    (Some(Box::new(reader)), Arc::new(writer))
                }
                Ret::None => (None, Arc::new(NopSender)),
                Ret::Sender(sender) => (None, sender),
            };
        msg.ret = Ret::Sender(ret.clone());

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BeamError::PoolClosed)?;

        let func = self.func.clone();
        let verb = msg.verb;
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = func(msg).await {
                debug!(%verb, error = %err, "handler failed");
                if let Err(send_err) = ret.send(Message::error(err.to_string())).await {
                    trace!(%verb, error = %send_err, "caller gone before error reply");
                }
            }
            if let Err(err) = ret.close().await {
                trace!(%verb, error = %err, "reply channel refused close");
            }
        });

        Ok(reply)
    }

    async fn close(&self) -> Result<()> {
        Err(BeamError::CannotClose("handler"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Mode;
    use crate::verb::Verb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_reply_flows_back_through_ret_pipe() {
        let echo = Handler::new(|msg: Message| async move {
            msg.ret_sender()
                .send(Message::new(Verb::Set).with_args(msg.args.clone()))
                .await?;
            Ok(())
        });

        let reply = echo
            .send(Message::new(Verb::Get).with_args(["k"]).with_ret(Ret::Pipe))
            .await
            .unwrap()
            .expect("reply stream");
        let answer = reply.receive(Mode::NONE).await.unwrap();
        assert_eq!(answer.verb, Verb::Set);
        assert_eq!(answer.args, vec!["k"]);
        assert!(reply.receive(Mode::NONE).await.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn test_failure_becomes_an_error_message() {
        let failing = Handler::new(|_msg: Message| async { Err(BeamError::handler("disk full")) });

        let reply = failing
            .send(Message::new(Verb::Start).with_ret(Ret::Pipe))
            .await
            .unwrap()
            .expect("reply stream");
        let answer = reply.receive(Mode::NONE).await.unwrap();
        assert_eq!(answer.verb, Verb::Error);
        assert_eq!(answer.arg(0), Some("disk full"));
        assert!(reply.receive(Mode::NONE).await.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn test_missing_ret_runs_body_against_nop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let (done_r, done_w) = pipe();
        let done = Arc::new(done_w);
        let handler = Handler::new(move |msg: Message| {
            let seen = seen.clone();
            let done = done.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                msg.ret_sender().send(Message::new(Verb::Ack)).await?;
                done.send(Message::new(Verb::Log)).await?;
                Err(BeamError::handler("ignored"))
            }
        });

        assert!(handler.send(Message::new(Verb::Log)).await.unwrap().is_none());
        done_r.receive(Mode::NONE).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_unsupported() {
        let handler = Handler::new(|_msg: Message| async { Ok(()) });
        assert!(matches!(
            handler.close().await,
            Err(BeamError::CannotClose(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrency_limit_holds_back_extra_sends() {
        let (gate_r, gate_w) = pipe();
        let gate = Arc::new(gate_r);
        let handler = Handler::with_concurrency(1, move |_msg: Message| {
            let gate = gate.clone();
            async move {
                gate.receive(Mode::NONE).await?;
                Ok(())
            }
        });

        handler.send(Message::new(Verb::Log)).await.unwrap();
        assert_eq!(handler.available(), 0);

        let blocked = handler.clone();
        let second = tokio::spawn(async move {
            blocked.send(Message::new(Verb::Log)).await.map(|r| r.is_none())
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        gate_w.send(Message::new(Verb::Ack)).await.unwrap();
        assert!(second.await.unwrap().unwrap());
    }
}
