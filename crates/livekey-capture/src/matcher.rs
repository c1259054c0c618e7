//! Credential extraction from decoded payloads.

use regex::bytes::Regex;

use livekey_ipc::{CaptureConfig, DEFAULT_KEY_PATTERN, DEFAULT_SERVER_PATTERN};

use crate::error::{CaptureError, PatternKind};
use crate::CaptureResult;

/// Compiled server and key patterns.
///
/// Payloads are matched as raw bytes: traffic is not guaranteed to be UTF-8,
/// and a match whose text is not valid UTF-8 counts as no match.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    server: Regex,
    key: Regex,
}

impl PatternMatcher {
    /// Compile the patterns from a capture configuration.
    ///
    /// Empty patterns fall back to the built-in defaults.
    pub fn new(server_pattern: &str, key_pattern: &str) -> CaptureResult<Self> {
        Ok(Self {
            server: compile(PatternKind::Server, server_pattern, DEFAULT_SERVER_PATTERN)?,
            key: compile(PatternKind::Key, key_pattern, DEFAULT_KEY_PATTERN)?,
        })
    }

    /// Compile the patterns of `config`.
    pub fn from_config(config: &CaptureConfig) -> CaptureResult<Self> {
        Self::new(&config.server_pattern, &config.key_pattern)
    }

    /// Extract the ingest server URL from a payload.
    pub fn extract_server(&self, payload: &[u8]) -> Option<String> {
        extract(&self.server, payload)
    }

    /// Extract the stream key from a payload.
    pub fn extract_key(&self, payload: &[u8]) -> Option<String> {
        extract(&self.key, payload)
    }

    /// Pattern source used for the server.
    pub fn server_pattern(&self) -> &str {
        self.server.as_str()
    }

    /// Pattern source used for the key.
    pub fn key_pattern(&self) -> &str {
        self.key.as_str()
    }
}

fn compile(kind: PatternKind, pattern: &str, fallback: &str) -> CaptureResult<Regex> {
    let source = if pattern.trim().is_empty() {
        fallback
    } else {
        pattern
    };

    Regex::new(source).map_err(|e| CaptureError::InvalidPattern {
        kind,
        pattern: source.to_string(),
        message: e.to_string(),
    })
}

/// First capture group if the expression has one, the whole match otherwise.
fn extract(regex: &Regex, payload: &[u8]) -> Option<String> {
    let captures = regex.captures(payload)?;
    let matched = if regex.captures_len() > 1 {
        captures.get(1)?
    } else {
        captures.get(0)?
    };

    let text = std::str::from_utf8(matched.as_bytes()).ok()?;
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}
