// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task
//!
//! Exposes a long-running worker as a beam object. The worker receives the
//! read end of an input pipe and the write end of an output pipe.
//!
//! | Verb | Effect |
//! |------|--------|
//! | `Attach` | `Ack` with `Ret` = input writer, then stream output to the caller |
//! | `Start` | spawn the worker (`Idle → Running`) |
//! | `Stop` | abort the worker (`Running → Stopped`, `Idle → Stopped`) |
//!
//! `Stopped` is terminal. Stopping drops the worker's pipe ends, so attached
//! output streams end and further input is refused.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::copy::copy;
use crate::endpoint::{Receiver, Sender};
use crate::error::{BeamError, Result};
use crate::handler::Handler;
use crate::message::Message;
use crate::pipe::{pipe, PipeReceiver, PipeSender};
use crate::server::Server;
use crate::verb::Verb;

type Worker = Box<dyn FnOnce(PipeReceiver, PipeSender) -> BoxFuture<'static, ()> + Send>;

enum TaskState {
    Idle {
        worker: Worker,
        input: PipeReceiver,
        output: PipeSender,
    },
    Running(AbortHandle),
    Stopped,
}

impl TaskState {
    fn name(&self) -> &'static str {
        match self {
            TaskState::Idle { .. } => "idle",
            TaskState::Running(_) => "running",
            TaskState::Stopped => "stopped",
        }
    }
}

struct TaskInner {
    state: Mutex<TaskState>,
    input: Arc<dyn Sender>,
    output: Arc<dyn Receiver>,
}

impl TaskInner {
    fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, TaskState::Stopped) {
            TaskState::Idle {
                worker,
                input,
                output,
            } => {
                let handle = tokio::spawn(worker(input, output));
                *state = TaskState::Running(handle.abort_handle());
                info!("task started");
                Ok(())
            }
            TaskState::Running(handle) => {
                *state = TaskState::Running(handle);
                Err(BeamError::AlreadyRunning)
            }
            TaskState::Stopped => Err(BeamError::TaskStopped),
        }
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, TaskState::Stopped) {
            TaskState::Running(handle) => {
                handle.abort();
                info!("task stopped");
                Ok(())
            }
            TaskState::Idle { .. } => {
                debug!("task stopped before it was started");
                Ok(())
            }
            TaskState::Stopped => Err(BeamError::NotRunning),
        }
    }
}

#[derive(Clone)]
pub struct Task {
    server: Server,
    inner: Arc<TaskInner>,
}

impl Task {
    pub fn new<F, Fut>(worker: F) -> Self
    where
        F: FnOnce(PipeReceiver, PipeSender) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (input_r, input_w) = pipe();
        let (output_r, output_w) = pipe();
        let worker: Worker = Box::new(
            move |input: PipeReceiver, output: PipeSender| -> BoxFuture<'static, ()> {
                Box::pin(worker(input, output))
            },
        );
        let inner = Arc::new(TaskInner {
            state: Mutex::new(TaskState::Idle {
                worker,
                input: input_r,
                output: output_w,
            }),
            input: Arc::new(input_w),
            output: Arc::new(output_r),
        });

        let server = Server::new();
        server
            .on(Verb::Attach, Arc::new(attach_handler(inner.clone())))
            .on(Verb::Start, Arc::new(start_handler(inner.clone())))
            .on(Verb::Stop, Arc::new(stop_handler(inner.clone())));
        Self { server, inner }
    }

    /// Current lifecycle state: `idle`, `running` or `stopped`.
    pub fn state(&self) -> &'static str {
        self.inner.state.lock().name()
    }
}

fn attach_handler(inner: Arc<TaskInner>) -> Handler {
    Handler::new(move |msg: Message| {
        let input = inner.input.clone();
        let output = inner.output.clone();
        async move {
            let ret = msg.ret_sender();
            ret.send(Message::new(Verb::Ack).with_ret_sender(input))
                .await?;
            copy(ret, output).await?;
            Ok(())
        }
    })
}

fn start_handler(inner: Arc<TaskInner>) -> Handler {
    Handler::new(move |msg: Message| {
        let started = inner.start();
        async move {
            started?;
            msg.ret_sender().send(Message::new(Verb::Ack)).await?;
            Ok(())
        }
    })
}

fn stop_handler(inner: Arc<TaskInner>) -> Handler {
    Handler::new(move |msg: Message| {
        let stopped = inner.stop();
        async move {
            stopped?;
            msg.ret_sender().send(Message::new(Verb::Ack)).await?;
            Ok(())
        }
    })
}

#[async_trait]
impl Sender for Task {
    async fn send(&self, msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        self.server.send(msg).await
    }

    async fn close(&self) -> Result<()> {
        Err(BeamError::CannotClose("task"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Mode, Ret};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_task(runs: Arc<AtomicUsize>) -> Task {
        Task::new(move |input, output| async move {
            runs.fetch_add(1, Ordering::SeqCst);
            while let Ok(msg) = input.receive(Mode::NONE).await {
                let echo = Message::new(msg.verb).with_args(msg.args);
                if output.send(echo).await.is_err() {
                    break;
                }
            }
        })
    }

    async fn call(task: &Task, verb: Verb) -> Message {
        let reply = task
            .send(Message::new(verb).with_ret(Ret::Pipe))
            .await
            .unwrap()
            .expect("reply stream");
        reply.receive(Mode::NONE).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_worker_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = echo_task(runs.clone());

        assert_eq!(call(&task, Verb::Start).await.verb, Verb::Ack);
        let again = call(&task, Verb::Start).await;
        assert_eq!(again.verb, Verb::Error);
        assert_eq!(again.arg(0), Some("already running"));

        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), "running");
    }

    #[tokio::test]
    async fn test_attach_streams_worker_output() {
        let task = echo_task(Arc::new(AtomicUsize::new(0)));
        call(&task, Verb::Start).await;

        let stream = task
            .send(Message::new(Verb::Attach).with_ret(Ret::Pipe))
            .await
            .unwrap()
            .expect("reply stream");
        let ack = stream.receive(Mode::RET).await.unwrap();
        assert_eq!(ack.verb, Verb::Ack);

        ack.ret_sender()
            .send(Message::new(Verb::Log).with_args(["hello"]))
            .await
            .unwrap();
        let echoed = stream.receive(Mode::NONE).await.unwrap();
        assert_eq!(echoed.verb, Verb::Log);
        assert_eq!(echoed.args, vec!["hello"]);

        assert_eq!(call(&task, Verb::Stop).await.verb, Verb::Ack);
        assert!(stream.receive(Mode::NONE).await.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let task = echo_task(Arc::new(AtomicUsize::new(0)));
        assert_eq!(call(&task, Verb::Stop).await.verb, Verb::Ack);
        assert_eq!(task.state(), "stopped");

        let again = call(&task, Verb::Stop).await;
        assert_eq!(again.arg(0), Some("not running"));
        let start = call(&task, Verb::Start).await;
        assert_eq!(start.arg(0), Some("task stopped"));
    }
}
