// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Verbs
//!
//! The closed set of operations a beam [`Message`](crate::Message) can carry.
//!
//! The verb ↔ wire-name table lives in exactly one place, [`Verb::as_str`].
//! It is an exhaustive `match`, so adding a variant fails to compile until the
//! table is extended; parsing walks [`Verb::ALL`] through the same table, so
//! every transport shares one mapping.
//!
//! | Verb | Conventional reply |
//! |------|--------------------|
//! | `Ls` | `Set` listing child names |
//! | `Attach` | `Ack` whose `Ret` is the attached object |
//! | `Start` / `Stop` | `Ack` |
//! | `Get` | `Set` with the value |
//! | `Connect` | a message carrying an attachment |
//! | `Error` | none; `Args[0]` is the error text |

use std::fmt;
use std::str::FromStr;

use crate::error::BeamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    Ack,
    Attach,
    Connect,
    Error,
    File,
    Get,
    Log,
    Ls,
    Set,
    Spawn,
    Start,
    Stop,
    Watch,
}

impl Verb {
    /// Every verb, in declaration order.
    pub const ALL: [Verb; 13] = [
        Verb::Ack,
        Verb::Attach,
        Verb::Connect,
        Verb::Error,
        Verb::File,
        Verb::Get,
        Verb::Log,
        Verb::Ls,
        Verb::Set,
        Verb::Spawn,
        Verb::Start,
        Verb::Stop,
        Verb::Watch,
    ];

    /// Wire name of the verb.
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Ack => "ack",
            Verb::Attach => "attach",
            Verb::Connect => "connect",
            Verb::Error => "error",
            Verb::File => "file",
            Verb::Get => "get",
            Verb::Log => "log",
            Verb::Ls => "ls",
            Verb::Set => "set",
            Verb::Spawn => "spawn",
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Watch => "watch",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = BeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .iter()
            .copied()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| BeamError::protocol(format!("unknown verb: {}", s)))
    }
}
