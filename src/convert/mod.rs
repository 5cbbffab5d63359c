//! The conversion pipeline: one Slack message in, one or more Discord
//! payloads out, delivered in order. Messages are processed strictly
//! chronologically so that replies always find their parent in the ledger.

pub mod assemble;
pub mod attach;
pub mod chunk;
pub mod normalize;
pub mod resolve;

use crate::config::Limits;
use crate::convert::assemble::{assemble, plan_body, SendPayload};
use crate::convert::attach::{Relocated, Relocator};
use crate::convert::normalize::{normalize, Span};
use crate::convert::resolve::Resolver;
use crate::export::{ExportDir, SourceMessage};
use crate::transport::{ChannelRef, Directory, MessageRef, Transport, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("message expands to {needed} payloads, over the {max} payload ceiling")]
    CapacityExceeded { needed: usize, max: usize },
}

/// Only transport-fatal failures stop a run; everything else is recorded
/// per message and the run continues.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("destination transport failure: {0}")]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Run-scoped state
// ---------------------------------------------------------------------------

/// Slack message ts → the Discord message holding its first payload.
/// Entries are written once and never changed.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: HashMap<String, MessageRef>,
}

impl Ledger {
    pub fn record(&mut self, ts: &str, dest: MessageRef) {
        use std::collections::hash_map::Entry;
        match self.entries.entry(ts.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(dest);
            }
            Entry::Occupied(_) => {
                tracing::warn!("Ledger already holds {}; keeping the first entry", ts);
            }
        }
    }

    pub fn lookup(&self, ts: &str) -> Option<MessageRef> {
        self.entries.get(ts).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutable state shared across one run: the mention memo and the reply
/// ledger. Constructed fresh per run and passed explicitly, never ambient.
#[derive(Debug, Default)]
pub struct RunContext {
    pub mention_cache: HashMap<String, String>,
    pub ledger: Ledger,
}

// ---------------------------------------------------------------------------
// Per-message lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pending,
    Normalized,
    Chunked,
    Assembled,
    Sending,
    Sent,
    PartiallyFailed,
    Failed,
}

#[derive(Debug)]
pub struct MessageOutcome {
    pub ts: String,
    pub state: MessageState,
    pub detail: Option<String>,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub sent: usize,
    pub partially_failed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Outcomes worth surfacing to the operator
    pub failures: Vec<MessageOutcome>,
}

impl ImportReport {
    fn record(&mut self, outcome: MessageOutcome) {
        match outcome.state {
            MessageState::Sent => self.sent += 1,
            MessageState::PartiallyFailed => {
                self.partially_failed += 1;
                self.failures.push(outcome);
            }
            MessageState::Failed => {
                self.failed += 1;
                self.failures.push(outcome);
            }
            _ => {}
        }
    }

    pub fn merge(&mut self, other: ImportReport) {
        self.sent += other.sent;
        self.partially_failed += other.partially_failed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    pub fn summary(&self) -> String {
        format!(
            "{} sent, {} partial, {} failed, {} skipped",
            self.sent, self.partially_failed, self.failed, self.skipped
        )
    }
}

// ---------------------------------------------------------------------------
// Importer
// ---------------------------------------------------------------------------

pub struct Importer<'a> {
    transport: &'a dyn Transport,
    directory: &'a dyn Directory,
    relocator: Relocator,
    limits: Limits,
    users: &'a HashMap<String, String>,
    channels: &'a HashMap<String, String>,
    user_map: &'a HashMap<String, String>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Importer<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        directory: &'a dyn Directory,
        users: &'a HashMap<String, String>,
        channels: &'a HashMap<String, String>,
        user_map: &'a HashMap<String, String>,
        limits: Limits,
    ) -> Self {
        let relocator = Relocator::new(limits.max_attachment_bytes);
        Self {
            transport,
            directory,
            relocator,
            limits,
            users,
            channels,
            user_map,
            cancel: None,
        }
    }

    /// Stop cleanly between messages when `flag` flips: the message being
    /// sent finishes all of its payloads first.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn for_export(
        export: &'a ExportDir,
        transport: &'a dyn Transport,
        directory: &'a dyn Directory,
        limits: Limits,
    ) -> Self {
        Self::new(
            transport,
            directory,
            &export.users,
            &export.channels,
            &export.user_map,
            limits,
        )
    }

    /// Replay one channel's messages in order. Returns per-message
    /// outcomes; only a fatal transport error aborts early.
    pub async fn import_channel(
        &self,
        channel: &ChannelRef,
        messages: &[SourceMessage],
        ctx: &mut RunContext,
    ) -> Result<ImportReport, RunError> {
        let mut report = ImportReport::default();
        for message in messages {
            if self
                .cancel
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                tracing::info!("Cancelled; stopping before message {}", message.ts);
                break;
            }
            match self.process_message(channel, message, ctx).await? {
                Some(outcome) => {
                    if outcome.state != MessageState::Sent {
                        tracing::warn!(
                            "Message {} ended {:?}: {}",
                            outcome.ts,
                            outcome.state,
                            outcome.detail.as_deref().unwrap_or("")
                        );
                    }
                    report.record(outcome);
                }
                None => report.skipped += 1,
            }
        }
        tracing::info!("#{}: {}", channel.name, report.summary());
        Ok(report)
    }

    /// Drive one message through
    /// `Pending → Normalized → Chunked → Assembled → Sending → end state`.
    /// Returns None when the message has nothing to send.
    async fn process_message(
        &self,
        channel: &ChannelRef,
        message: &SourceMessage,
        ctx: &mut RunContext,
    ) -> Result<Option<MessageOutcome>, RunError> {
        let ts = message.ts.clone();

        // Pending → Normalized. The resolver borrows the run cache only for
        // this scope, before any attachment I/O starts.
        let (header, spans) = {
            let mut resolver = Resolver::new(
                self.users,
                self.channels,
                self.user_map,
                self.directory,
                &mut ctx.mention_cache,
            );
            let author = match message.user.as_deref() {
                Some(uid) => resolver.user(uid),
                None => "@unknown".to_string(),
            };
            let header = format!("*{}* **{}**:", message.formatted_timestamp(), author);
            let mut spans = normalize(&message.text, &mut resolver);
            if !spans.is_empty() {
                spans.insert(0, Span::text(format!("{header} ")));
            }
            (header, spans)
        };

        // Normalized → Chunked
        let body = plan_body(spans, &self.limits);

        // Sibling attachments transfer concurrently; the ledger and cache
        // are untouched until all of them settle
        let relocated = self.relocator.relocate_all(&message.files).await;
        let lost_attachments = relocated
            .iter()
            .filter(|r| matches!(r, Relocated::Missing { .. }))
            .count();

        let reply_to = match message.parent_ts() {
            Some(parent) => {
                let anchor = ctx.ledger.lookup(parent);
                if anchor.is_none() {
                    tracing::debug!(
                        "Parent {} of {} not in ledger; sending without reply link",
                        parent,
                        ts
                    );
                }
                anchor
            }
            None => None,
        };

        // Chunked → Assembled
        let payloads = match assemble(body, relocated, &header, reply_to, &self.limits) {
            Ok(payloads) => payloads,
            Err(err @ ConvertError::CapacityExceeded { .. }) => {
                return Ok(Some(MessageOutcome {
                    ts,
                    state: MessageState::Failed,
                    detail: Some(err.to_string()),
                }));
            }
        };
        if payloads.is_empty() {
            return Ok(None);
        }

        // Assembled → Sending
        let mut first_sent: Option<MessageRef> = None;
        let mut lost_payloads = 0usize;
        let mut detail: Option<String> = None;
        for (i, payload) in payloads.iter().enumerate() {
            if i > 0 && self.limits.throttle_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.limits.throttle_ms)).await;
            }
            match self.send_with_retry(channel, payload).await {
                Ok(sent) => {
                    if first_sent.is_none() {
                        first_sent = Some(sent);
                    }
                }
                Err(err) if err.is_fatal() => return Err(RunError::Transport(err)),
                Err(err) => {
                    lost_payloads += 1;
                    detail = Some(err.to_string());
                    if i == 0 {
                        // The mandatory text payload is gone; spillover
                        // payloads without it would be orphans
                        return Ok(Some(MessageOutcome {
                            ts,
                            state: MessageState::Failed,
                            detail,
                        }));
                    }
                }
            }
        }

        if let Some(anchor) = first_sent {
            // Recorded even for partial failures so later replies can
            // still anchor to what did arrive
            ctx.ledger.record(&ts, anchor);
        }

        let state = if lost_payloads > 0 || lost_attachments > 0 {
            if detail.is_none() {
                detail = Some(format!("{lost_attachments} attachment(s) lost"));
            }
            MessageState::PartiallyFailed
        } else {
            MessageState::Sent
        };
        Ok(Some(MessageOutcome { ts, state, detail }))
    }

    /// Re-send the identical payload on transient failure, up to the
    /// configured attempt ceiling. Backoff beyond the rate-limit hint is
    /// the transport's concern.
    async fn send_with_retry(
        &self,
        channel: &ChannelRef,
        payload: &SendPayload,
    ) -> Result<MessageRef, TransportError> {
        let mut attempts = 0u32;
        loop {
            match self.transport.send(channel, payload).await {
                Ok(sent) => return Ok(sent),
                Err(err) if err.is_retryable() && attempts < self.limits.send_retries => {
                    attempts += 1;
                    if let TransportError::RateLimited {
                        retry_after: Some(delay),
                    } = &err
                    {
                        tokio::time::sleep(*delay).await;
                    }
                    tracing::warn!("Resending payload after {} (attempt {})", err, attempts);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
