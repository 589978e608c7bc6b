// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Pipe
//!
//! A synchronous, unbuffered rendez-vous channel: [`PipeSender::send`] returns
//! only once a [`PipeReceiver`] has taken the message (or either side closed).
//!
//! ## Invariants
//!
//! - At most one unconsumed message sits in the slot. Writers are serialized
//!   by a writer-exclusion lock, readers by a reader-exclusion lock.
//! - Each side moves `Open → Closed(reason)` exactly once; later closes are
//!   ignored. Closing either side wakes both.
//! - Writer closed: readers drain nothing further and get the writer's reason
//!   (default [`BeamError::Eof`]); senders get [`BeamError::ClosedPipe`].
//! - Reader closed: senders get the reader's reason (default
//!   [`BeamError::ClosedPipe`]); a message left in the slot is dropped.
//! - Dropping an end closes it.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::trace;

use crate::endpoint::{Receiver, Sender};
use crate::error::{BeamError, Result};
use crate::message::{Message, Mode, Ret};

#[derive(Debug)]
enum Side {
    Open,
    Closed(BeamError),
}

impl Side {
    fn is_open(&self) -> bool {
        matches!(self, Side::Open)
    }

    fn close(&mut self, reason: BeamError) {
        if self.is_open() {
            *self = Side::Closed(reason);
        }
    }
}

struct PipeState {
    msg: Option<Message>,
    reader: Side,
    writer: Side,
}

struct Pipe {
    state: Mutex<PipeState>,
    rwait: Notify,
    wwait: Notify,
    writers: AsyncMutex<()>,
    readers: AsyncMutex<()>,
}

impl Pipe {
    fn new() -> Self {
        Self {
            state: Mutex::new(PipeState {
                msg: None,
                reader: Side::Open,
                writer: Side::Open,
            }),
            rwait: Notify::new(),
            wwait: Notify::new(),
            writers: AsyncMutex::new(()),
            readers: AsyncMutex::new(()),
        }
    }

    async fn psend(&self, msg: Message) -> Result<()> {
        let _writer = self.writers.lock().await;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Side::Closed(reason) = &state.reader {
                return Err(reason.clone());
            }
            if !state.writer.is_open() {
                return Err(BeamError::ClosedPipe);
            }
            state.msg = Some(msg);
        }
        self.rwait.notify_waiters();

        loop {
            let consumed = self.wwait.notified();
            {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                if state.msg.is_none() {
                    return Ok(());
                }
                if let Side::Closed(reason) = &state.reader {
                    state.msg = None;
                    return Err(reason.clone());
                }
                if !state.writer.is_open() {
                    state.msg = None;
                    return Err(BeamError::ClosedPipe);
                }
            }
            consumed.await;
        }
    }

    async fn preceive(&self) -> Result<Message> {
        let _reader = self.readers.lock().await;
        loop {
            let ready = self.rwait.notified();
            {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                if !state.reader.is_open() {
                    return Err(BeamError::ClosedPipe);
                }
                if let Some(msg) = state.msg.take() {
                    self.wwait.notify_waiters();
                    return Ok(msg);
                }
                if let Side::Closed(reason) = &state.writer {
                    return Err(reason.clone());
                }
            }
            ready.await;
        }
    }

    fn close_reader(&self, reason: BeamError) {
        self.state.lock().reader.close(reason);
        self.rwait.notify_waiters();
        self.wwait.notify_waiters();
    }

    fn close_writer(&self, reason: BeamError) {
        self.state.lock().writer.close(reason);
        self.rwait.notify_waiters();
        self.wwait.notify_waiters();
    }
}

/// Move raw messages from one pipe into another until the source ends.
async fn transfer(from: &Pipe, to: &Pipe) -> Result<usize> {
    let mut n = 0;
    loop {
        let msg = match from.preceive().await {
            Ok(msg) => msg,
            Err(BeamError::Eof) => return Ok(n),
            Err(err) => return Err(err),
        };
        to.psend(msg).await?;
        n += 1;
    }
}

/// Create a connected pipe pair.
pub fn pipe() -> (PipeReceiver, PipeSender) {
    let pipe = Arc::new(Pipe::new());
    (
        PipeReceiver { pipe: pipe.clone() },
        PipeSender { pipe },
    )
}

/// Write end of a [`pipe`].
pub struct PipeSender {
    pipe: Arc<Pipe>,
}

impl PipeSender {
    /// Close the write end, handing `reason` to readers instead of `Eof`.
    pub fn close_with(&self, reason: BeamError) {
        self.pipe.close_writer(reason);
    }
}

impl Drop for PipeSender {
    fn drop(&mut self) {
        self.pipe.close_writer(BeamError::Eof);
    }
}

#[async_trait]
impl Sender for PipeSender {
    async fn send(&self, mut msg: Message) -> Result<Option<Box<dyn Receiver>>> {
        let reply = if msg.ret.is_pipe() {
            let (reader, writer) = pipe();
            msg.ret = Ret::Sender(Arc::new(writer));
            Some(Box::new(reader) as Box<dyn Receiver>)
        } else {
            None
        };
        self.pipe.psend(msg).await?;
        Ok(reply)
    }

    async fn close(&self) -> Result<()> {
        self.pipe.close_writer(BeamError::Eof);
        Ok(())
    }

    async fn receive_from(&self, src: &Arc<dyn Receiver>) -> Result<usize> {
        match src.as_pipe_receiver() {
            Some(source) => transfer(&source.pipe, &self.pipe).await,
            None => Err(BeamError::IncompatibleReceiver),
        }
    }

    fn as_pipe_sender(&self) -> Option<&PipeSender> {
        Some(self)
    }
}

/// Read end of a [`pipe`].
pub struct PipeReceiver {
    pipe: Arc<Pipe>,
}

impl PipeReceiver {
    /// Close the read end, handing `reason` to writers instead of `ClosedPipe`.
    pub fn close_with(&self, reason: BeamError) {
        self.pipe.close_reader(reason);
    }

    pub fn close(&self) {
        self.pipe.close_reader(BeamError::ClosedPipe);
    }
}

impl Drop for PipeReceiver {
    fn drop(&mut self) {
        self.pipe.close_reader(BeamError::ClosedPipe);
    }
}

#[async_trait]
impl Receiver for PipeReceiver {
    async fn receive(&self, mode: Mode) -> Result<Message> {
        let mut msg = self.pipe.preceive().await?;
        let ret = msg.ret.sender();
        if !mode.contains(Mode::RET) {
            if let Err(err) = ret.close().await {
                trace!(error = %err, "reply channel refused close");
            }
        }
        msg.ret = Ret::Sender(ret);
        Ok(msg)
    }

    async fn send_to(&self, dst: &Arc<dyn Sender>) -> Result<usize> {
        match dst.as_pipe_sender() {
            Some(target) => transfer(&self.pipe, &target.pipe).await,
            None => Err(BeamError::IncompatibleSender),
        }
    }

    fn as_pipe_receiver(&self) -> Option<&PipeReceiver> {
        Some(self)
    }
}
