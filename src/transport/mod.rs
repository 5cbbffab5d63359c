pub mod discord;

use crate::convert::assemble::SendPayload;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("payload rejected: {0}")]
    PayloadRejected(String),
    #[error("transient network error: {0}")]
    Transient(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl TransportError {
    /// Worth re-sending the same payload.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::RateLimited { .. } | TransportError::Transient(_)
        )
    }

    /// The destination connection itself is unusable; the run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Auth(_))
    }
}

/// A destination text channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: u64,
    pub name: String,
}

/// A delivered message, usable as a reply anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// Destination send operations. Implement for each way of delivering
/// payloads (live Discord connection, dry run, test recorder).
///
/// Attachment bytes travel inside the payload: Discord uploads files within
/// the message-create call, so there is no separate upload operation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve a destination channel by name, creating it when permitted.
    async fn ensure_channel(
        &self,
        name: &str,
        create_missing: bool,
    ) -> Result<ChannelRef, TransportError>;

    /// Deliver one payload. Must be safe to call again with the identical
    /// payload after a retryable error.
    async fn send(
        &self,
        channel: &ChannelRef,
        payload: &SendPayload,
    ) -> Result<MessageRef, TransportError>;
}

/// Member/channel lookups against the destination, plus the broadcast
/// permission decision.
pub trait Directory: Send + Sync {
    fn lookup_user(&self, name: &str) -> Option<u64>;
    fn lookup_channel(&self, name: &str) -> Option<u64>;
    fn can_broadcast(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Logs every payload instead of delivering it. Channel and message ids are
/// synthetic but stable within the run, so reply linkage still resolves.
#[derive(Default)]
pub struct DryRunTransport {
    next_id: AtomicU64,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    async fn ensure_channel(
        &self,
        name: &str,
        _create_missing: bool,
    ) -> Result<ChannelRef, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!("[dry-run] channel #{name}");
        Ok(ChannelRef {
            id,
            name: name.to_string(),
        })
    }

    async fn send(
        &self,
        channel: &ChannelRef,
        payload: &SendPayload,
    ) -> Result<MessageRef, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "[dry-run] #{} content={:?} embeds={} uploads={} reply_to={:?}",
            channel.name,
            payload.content.as_deref().map(truncate),
            payload.embeds.len(),
            payload.uploads.len(),
            payload.reply_to.map(|r| r.message_id),
        );
        Ok(MessageRef {
            channel_id: channel.id,
            message_id: id,
        })
    }
}

/// Directory with no destination to look things up in: every mention falls
/// back to literal text. Used for dry runs.
pub struct NullDirectory {
    pub allow_broadcast: bool,
}

impl Directory for NullDirectory {
    fn lookup_user(&self, _name: &str) -> Option<u64> {
        None
    }

    fn lookup_channel(&self, _name: &str) -> Option<u64> {
        None
    }

    fn can_broadcast(&self) -> bool {
        self.allow_broadcast
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= 80 {
        s.to_string()
    } else {
        format!("{}...", &s[..80])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
