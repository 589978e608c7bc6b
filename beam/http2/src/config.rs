// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Session Configuration
//
// Tunables shared by stream sessions, listeners and the WebSocket adapter.
// Every field has a default, so a partial document (or none) is valid.

use serde::{Deserialize, Serialize};

/// Hard ceiling for any single frame, whatever the configuration says.
pub const MAX_FRAME_LEN_LIMIT: usize = 1 << 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Largest frame payload accepted or produced, in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    /// Read size when pumping an attachment into DATA frames
    #[serde(default = "default_attachment_chunk")]
    pub attachment_chunk: usize,

    /// Capacity of the in-memory byte pipe bridging a WebSocket
    #[serde(default = "default_websocket_buffer")]
    pub websocket_buffer: usize,
}

fn default_max_frame_len() -> usize {
    16 * 1024 * 1024
}

fn default_attachment_chunk() -> usize {
    32 * 1024
}

fn default_websocket_buffer() -> usize {
    64 * 1024
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: default_max_frame_len(),
            attachment_chunk: default_attachment_chunk(),
            websocket_buffer: default_websocket_buffer(),
        }
    }
}

impl SessionConfig {
    /// Apply `BEAM_MAX_FRAME_LEN`, `BEAM_ATTACHMENT_CHUNK` and
    /// `BEAM_WEBSOCKET_BUFFER` overrides. Unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        override_from_env("BEAM_MAX_FRAME_LEN", &mut self.max_frame_len);
        override_from_env("BEAM_ATTACHMENT_CHUNK", &mut self.attachment_chunk);
        override_from_env("BEAM_WEBSOCKET_BUFFER", &mut self.websocket_buffer);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_frame_len == 0 {
            anyhow::bail!("max_frame_len must be greater than zero");
        }
        if self.max_frame_len > MAX_FRAME_LEN_LIMIT {
            anyhow::bail!(
                "max_frame_len {} exceeds the limit of {} bytes",
                self.max_frame_len,
                MAX_FRAME_LEN_LIMIT
            );
        }
        if self.attachment_chunk == 0 {
            anyhow::bail!("attachment_chunk must be greater than zero");
        }
        if self.attachment_chunk > self.max_frame_len {
            anyhow::bail!(
                "attachment_chunk {} does not fit in max_frame_len {}",
                self.attachment_chunk,
                self.max_frame_len
            );
        }
        if self.websocket_buffer == 0 {
            anyhow::bail!("websocket_buffer must be greater than zero");
        }
        Ok(())
    }
}

fn override_from_env(name: &str, slot: &mut usize) {
    if let Ok(val) = std::env::var(name) {
        match val.trim().parse::<usize>() {
            Ok(parsed) => {
                tracing::info!("Environment override: {}={}", name, parsed);
                *slot = parsed;
            }
            Err(_) => {
                tracing::warn!(
                    "Invalid value for {}: '{}'. Expected a byte count. Ignoring.",
                    name,
                    val
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.max_frame_len, 16 * 1024 * 1024);
        assert_eq!(config.attachment_chunk, 32 * 1024);
        assert_eq!(config.websocket_buffer, 64 * 1024);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "attachment_chunk": 4096 }"#).unwrap();
        assert_eq!(config.attachment_chunk, 4096);
        assert_eq!(config.max_frame_len, default_max_frame_len());
        assert_eq!(config.websocket_buffer, default_websocket_buffer());
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let zero = SessionConfig {
            max_frame_len: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let chunk_too_big = SessionConfig {
            max_frame_len: 1024,
            attachment_chunk: 2048,
            ..Default::default()
        };
        let err = chunk_too_big.validate().unwrap_err();
        assert!(err.to_string().contains("attachment_chunk"));

        let huge = SessionConfig {
            max_frame_len: MAX_FRAME_LEN_LIMIT + 1,
            ..Default::default()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("BEAM_WEBSOCKET_BUFFER", "2048");
        std::env::set_var("BEAM_ATTACHMENT_CHUNK", "lots");
        let mut config = SessionConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("BEAM_WEBSOCKET_BUFFER");
        std::env::remove_var("BEAM_ATTACHMENT_CHUNK");

        assert_eq!(config.websocket_buffer, 2048);
        assert_eq!(config.attachment_chunk, default_attachment_chunk());
    }
}
