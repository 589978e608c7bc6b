// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Client-side convenience wrapper over any [`Sender`].
//!
//! Every request goes out with `Ret::Pipe`; the first reply decides the
//! outcome. An `Error` reply becomes [`BeamError::Remote`], a reply with any
//! other unexpected verb becomes [`BeamError::UnexpectedVerb`].

use std::sync::Arc;

use tokio::net::UnixStream;

use crate::endpoint::{Receiver, Sender};
use crate::error::{BeamError, Result};
use crate::message::{Message, Mode, Ret};
use crate::verb::Verb;

#[derive(Clone)]
pub struct Object {
    target: Arc<dyn Sender>,
}

impl Object {
    pub fn new(target: Arc<dyn Sender>) -> Self {
        Self { target }
    }

    pub fn sender(&self) -> Arc<dyn Sender> {
        self.target.clone()
    }

    async fn call(&self, msg: Message) -> Result<Box<dyn Receiver>> {
        let verb = msg.verb;
        self.target
            .send(msg.with_ret(Ret::Pipe))
            .await?
            .ok_or_else(|| BeamError::protocol(format!("no reply stream for {}", verb)))
    }

    async fn expect(reply: &dyn Receiver, mode: Mode, verb: Verb) -> Result<Message> {
        let msg = reply.receive(mode).await?;
        check_reply(msg, verb)
    }

    pub async fn ls(&self) -> Result<Vec<String>> {
        let reply = self.call(Message::new(Verb::Ls)).await?;
        Ok(Self::expect(reply.as_ref(), Mode::NONE, Verb::Set).await?.args)
    }

    /// Attach to child `name` (or to the target itself for `""`). Returns the
    /// reply stream, which keeps carrying whatever the child emits, and the
    /// attached object.
    pub async fn attach(&self, name: &str) -> Result<(Box<dyn Receiver>, Object)> {
        let reply = self
            .call(Message::new(Verb::Attach).with_args([name]))
            .await?;
        let ack = Self::expect(reply.as_ref(), Mode::RET, Verb::Ack).await?;
        Ok((reply, Object::new(ack.ret_sender())))
    }

    pub async fn start(&self) -> Result<()> {
        let reply = self.call(Message::new(Verb::Start)).await?;
        Self::expect(reply.as_ref(), Mode::NONE, Verb::Ack).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let reply = self.call(Message::new(Verb::Stop)).await?;
        Self::expect(reply.as_ref(), Mode::NONE, Verb::Ack).await?;
        Ok(())
    }

    pub async fn spawn<I, S>(&self, args: I) -> Result<Object>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reply = self.call(Message::new(Verb::Spawn).with_args(args)).await?;
        let ack = Self::expect(reply.as_ref(), Mode::RET, Verb::Ack).await?;
        Ok(Object::new(ack.ret_sender()))
    }

    pub async fn get(&self) -> Result<String> {
        let reply = self.call(Message::new(Verb::Get)).await?;
        let set = Self::expect(reply.as_ref(), Mode::NONE, Verb::Set).await?;
        set.args
            .into_iter()
            .next()
            .ok_or_else(|| BeamError::protocol("get reply carried no value"))
    }

    pub async fn set<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target.send(Message::new(Verb::Set).with_args(args)).await?;
        Ok(())
    }

    pub async fn log(&self, text: impl Into<String>) -> Result<()> {
        self.target
            .send(Message::new(Verb::Log).with_args([text.into()]))
            .await?;
        Ok(())
    }

    pub async fn error(&self, text: impl Into<String>) -> Result<()> {
        self.target.send(Message::error(text)).await?;
        Ok(())
    }

    /// Ask for a byte stream; the first reply must carry an attachment.
    pub async fn connect(&self) -> Result<UnixStream> {
        let reply = self.call(Message::new(Verb::Connect)).await?;
        let msg = reply.receive(Mode::NONE).await?;
        if msg.verb == Verb::Error {
            return Err(remote(msg));
        }
        msg.att
            .ok_or_else(|| BeamError::protocol(format!("{} reply carried no attachment", msg.verb)))
    }

    /// Subscribe; the returned stream carries every notification.
    pub async fn watch(&self) -> Result<Box<dyn Receiver>> {
        self.call(Message::new(Verb::Watch)).await
    }
}

fn remote(msg: Message) -> BeamError {
    BeamError::Remote(msg.args.into_iter().next().unwrap_or_default())
}

fn check_reply(msg: Message, expected: Verb) -> Result<Message> {
    match msg.verb {
        verb if verb == expected => Ok(msg),
        Verb::Error => Err(remote(msg)),
        other => Err(BeamError::UnexpectedVerb(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::tree::Tree;
    use crate::utils::{Buffer, Repeater};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn sample_tree() -> Tree {
        let tree = Tree::new();
        tree.bind(
            "config",
            Arc::new(Repeater::new(Message::new(Verb::Set).with_args(["debug=1"]))),
        )
        .bind("ack", Arc::new(Repeater::new(Message::new(Verb::Ack))));
        tree
    }

    #[tokio::test]
    async fn test_ls_and_attach() {
        let root = Object::new(Arc::new(sample_tree()));
        assert_eq!(root.ls().await.unwrap(), vec!["ack", "config"]);

        let (_stream, config) = root.attach("config").await.unwrap();
        assert_eq!(config.get().await.unwrap(), "debug=1");
    }

    #[tokio::test]
    async fn test_error_reply_becomes_remote_error() {
        let root = Object::new(Arc::new(sample_tree()));
        match root.attach("missing").await {
            Err(BeamError::Remote(text)) => assert_eq!(text, "not found: missing"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("attach should fail"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_reply_verb() {
        let root = Object::new(Arc::new(sample_tree()));
        let (_stream, ack) = root.attach("ack").await.unwrap();
        assert!(matches!(
            ack.get().await,
            Err(BeamError::UnexpectedVerb(Verb::Ack))
        ));
        ack.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_fire_and_forget_verbs() {
        let sink = Arc::new(Buffer::new());
        let obj = Object::new(sink.clone());
        obj.set(["k", "v"]).await.unwrap();
        obj.log("hello").await.unwrap();
        obj.error("oops").await.unwrap();

        let verbs: Vec<_> = sink.take().into_iter().map(|m| m.verb).collect();
        assert_eq!(verbs, vec![Verb::Set, Verb::Log, Verb::Error]);
    }

    #[tokio::test]
    async fn test_connect_returns_the_reply_attachment() {
        let dialer = Handler::new(|msg: Message| async move {
            let (local, mut remote) = UnixStream::pair()?;
            tokio::spawn(async move {
                let _ = remote.write_all(b"ready").await;
            });
            msg.ret_sender()
                .send(Message::new(Verb::Connect).with_att(local))
                .await?;
            Ok(())
        });

        let mut conn = Object::new(Arc::new(dialer)).connect().await.unwrap();
        let mut greeting = [0u8; 5];
        conn.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"ready");
    }
}
