// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Splices a stream's DATA frames onto a local Unix socket.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, trace};

use crate::connection::Stream;

/// Create a socket pair, splice one end onto `stream` and hand back the other.
pub fn tunnel(stream: Arc<Stream>, chunk: usize) -> io::Result<UnixStream> {
    let (local, remote) = UnixStream::pair()?;
    splice(stream, remote, chunk);
    Ok(local)
}

/// Pump bytes both ways between `socket` and `stream` on two tasks.
///
/// Socket EOF finishes the stream; stream FIN shuts down the socket's write
/// half.
pub fn splice(stream: Arc<Stream>, socket: UnixStream, chunk: usize) {
    let (mut reader, mut writer) = socket.into_split();
    let incoming = stream.take_incoming();
    let id = stream.id();

    tokio::spawn(async move {
        let mut buf = vec![0u8; chunk.max(1)];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(err) = stream.send_data(Bytes::copy_from_slice(&buf[..n])) {
                        debug!(stream_id = id, error = %err, "attachment upload stopped");
                        break;
                    }
                }
                Err(err) => {
                    debug!(stream_id = id, error = %err, "attachment read failed");
                    break;
                }
            }
        }
        if let Err(err) = stream.finish() {
            trace!(stream_id = id, error = %err, "could not finish stream");
        }
    });

    tokio::spawn(async move {
        if let Some(mut incoming) = incoming {
            while let Some(data) = incoming.recv().await {
                if let Err(err) = writer.write_all(&data).await {
                    debug!(stream_id = id, error = %err, "attachment write failed");
                    break;
                }
            }
        }
        if let Err(err) = writer.shutdown().await {
            trace!(stream_id = id, error = %err, "attachment shutdown");
        }
    });
}
