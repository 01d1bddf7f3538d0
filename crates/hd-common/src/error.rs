//! Domain error type shared across the dispatch pipeline.
//!
//! Infrastructure crates keep their own `thiserror` enums; this type carries
//! the domain-level taxonomy (`kind`) plus a stable machine code, and the
//! HTTP edge maps `kind` to a transport status.

use thiserror::Error;

use crate::ChannelKind;

/// Domain-level failure classification, independent of transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller error: malformed request, schedule violations.
    Validation,
    /// The event slug is not in the template registry.
    NotRegistered,
    /// Requested channels outside the template's supported set.
    ChannelsNotSupported,
    /// Campaign or log persistence failed.
    Persistence,
    /// Broker publish failed or timed out.
    Transport,
    /// Template parse/execution failed; permanent, never requeued.
    Render,
    /// Broker payload could not be decoded; permanent, never requeued.
    Decode,
    Internal,
}

/// Structured domain error: `{kind, code, message, hint}`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DomainError {
    pub kind: ErrorKind,
    /// Stable machine-readable code (`event_not_registered`, ...).
    pub code: &'static str,
    pub message: String,
    /// Optional remediation hint surfaced to the caller.
    pub hint: Option<String>,
}

impl DomainError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, "validation_error", message)
    }

    pub fn event_not_registered(slug: &str) -> Self {
        Self::new(
            ErrorKind::NotRegistered,
            "event_not_registered",
            format!("event type [{slug}] is not registered"),
        )
    }

    pub fn channels_not_supported(channels: &[ChannelKind]) -> Self {
        let csv = channels
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Self::new(
            ErrorKind::ChannelsNotSupported,
            "channels_not_supported",
            format!("channels_not_supported: {csv}"),
        )
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, "persistence_error", message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, "publish_error", message)
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Render, "render_error", message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, "decode_error", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "internal_error", message)
    }
}
