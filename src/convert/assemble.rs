//! Combines a message's text fragments and relocated attachments into
//! destination payloads. One payload is one Discord message: optional plain
//! content, up to `F` embeds within a combined character ceiling, and the
//! uploads riding with it. Overflow spills into further payloads in source
//! order; a payload is never empty.

use crate::config::Limits;
use crate::convert::attach::{AttachmentKind, Relocated, UploadPart};
use crate::convert::chunk::{chunk, Fragment};
use crate::convert::normalize::{Span, SpanKind};
use crate::convert::ConvertError;
use crate::transport::MessageRef;

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// One rich-text block of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedPart {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Filename of an upload in the same payload, rendered inline as
    /// `attachment://{filename}`
    pub image_attachment: Option<String>,
}

impl EmbedPart {
    pub fn text(description: impl Into<String>) -> Self {
        Self {
            title: None,
            description: Some(description.into()),
            image_attachment: None,
        }
    }

    pub fn image(title: Option<String>, filename: String) -> Self {
        Self {
            title,
            description: None,
            image_attachment: Some(filename),
        }
    }

    /// Characters counted against the per-message embed total.
    pub fn chars(&self) -> usize {
        self.title.as_deref().map_or(0, |t| t.chars().count())
            + self.description.as_deref().map_or(0, |d| d.chars().count())
    }
}

/// One atomic destination send.
#[derive(Debug, Clone)]
pub struct SendPayload {
    pub content: Option<String>,
    pub embeds: Vec<EmbedPart>,
    pub uploads: Vec<UploadPart>,
    pub reply_to: Option<MessageRef>,
}

impl SendPayload {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.embeds.is_empty() && self.uploads.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Body planning
// ---------------------------------------------------------------------------

/// How the message's text travels.
#[derive(Debug, PartialEq, Eq)]
pub enum TextBody {
    Empty,
    /// Fits the plain-content limit and carries no masked links
    Plain(String),
    /// Rendered as stacked embeds; each fragment fits the embed limit
    Rich(Vec<Fragment>),
}

/// Decide plain vs rich. Masked links only render inside embeds, so any
/// labeled hyperlink forces the rich form, as does overflowing the plain
/// content limit.
pub fn plan_body(spans: Vec<Span>, limits: &Limits) -> TextBody {
    let total: usize = spans.iter().map(|s| s.markdown_chars()).sum();
    if total == 0 {
        return TextBody::Empty;
    }

    let has_links = spans
        .iter()
        .any(|s| matches!(s.kind, SpanKind::Link { .. }));
    if !has_links && total <= limits.max_message_chars {
        let text = spans.iter().map(|s| s.markdown()).collect();
        return TextBody::Plain(text);
    }

    TextBody::Rich(chunk(spans, limits.max_embed_chars))
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Group {
    embeds: Vec<EmbedPart>,
    uploads: Vec<UploadPart>,
}

/// Build the ordered payload sequence for one message.
///
/// `header` is the `*timestamp* **author**:` prefix; the text body already
/// carries it, so it is only used for attachment-only messages.
pub fn assemble(
    body: TextBody,
    attachments: Vec<Relocated>,
    header: &str,
    reply_to: Option<MessageRef>,
    limits: &Limits,
) -> Result<Vec<SendPayload>, ConvertError> {
    let mut content: Option<String> = None;
    let mut text_embeds: Vec<EmbedPart> = Vec::new();
    match body {
        TextBody::Empty => {}
        TextBody::Plain(text) => content = Some(text),
        TextBody::Rich(fragments) => {
            text_embeds = fragments
                .iter()
                .map(|f| EmbedPart::text(f.text()))
                .collect();
        }
    }

    let mut image_parts: Vec<(EmbedPart, UploadPart)> = Vec::new();
    let mut file_uploads: Vec<UploadPart> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    for relocated in attachments {
        match relocated {
            Relocated::Upload { part, title } => match part.kind {
                AttachmentKind::Image => {
                    let embed = EmbedPart::image(title, part.filename.clone());
                    image_parts.push((embed, part));
                }
                AttachmentKind::File => file_uploads.push(part),
            },
            Relocated::Missing { name, .. } => missing.push(name),
        }
    }

    let has_uploads = !image_parts.is_empty() || !file_uploads.is_empty();
    if content.is_none() && text_embeds.is_empty() && !has_uploads && missing.is_empty() {
        // Nothing survived normalization and there was nothing else to carry
        return Ok(Vec::new());
    }

    // A message that was only ever attachments still gets an author line
    if content.is_none() && text_embeds.is_empty() {
        content = Some(format!("{header} *Attachments:*"));
    }

    for name in &missing {
        let note = format!("*[missing attachment: {name}]*");
        match content.as_mut() {
            Some(c)
                if c.chars().count() + 1 + note.chars().count() <= limits.max_message_chars =>
            {
                c.push('\n');
                c.push_str(&note);
            }
            _ => text_embeds.push(EmbedPart::text(note)),
        }
    }

    // Pack embeds into payload-sized groups. Image blocks go first so they
    // land on the message's first payload; each image keeps its upload in
    // the same group
    let mut groups: Vec<Group> = Vec::new();
    let mut current = Group::default();
    let mut current_chars = 0usize;
    {
        let mut place = |embed: EmbedPart, upload: Option<UploadPart>| {
            let chars = embed.chars();
            let over_count = current.embeds.len() >= limits.max_embeds_per_message;
            let over_chars = current_chars + chars > limits.max_total_embed_chars;
            if !current.embeds.is_empty() && (over_count || over_chars) {
                groups.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            current_chars += chars;
            current.embeds.push(embed);
            current.uploads.extend(upload);
        };
        for (embed, upload) in image_parts {
            place(embed, Some(upload));
        }
        for embed in text_embeds {
            place(embed, None);
        }
    }
    if !current.embeds.is_empty() {
        groups.push(current);
    }

    let mut payloads: Vec<SendPayload> = Vec::new();
    if groups.is_empty() {
        payloads.push(SendPayload {
            content,
            embeds: Vec::new(),
            uploads: file_uploads,
            reply_to,
        });
    } else {
        for (i, group) in groups.into_iter().enumerate() {
            let mut uploads = group.uploads;
            let mut payload_reply = None;
            let mut payload_content = None;
            if i == 0 {
                payload_content = content.take();
                payload_reply = reply_to;
                // Generic files ride on the first payload, ahead of images
                file_uploads.extend(uploads);
                uploads = std::mem::take(&mut file_uploads);
            }
            payloads.push(SendPayload {
                content: payload_content,
                embeds: group.embeds,
                uploads,
                reply_to: payload_reply,
            });
        }
    }

    debug_assert!(payloads.iter().all(|p| !p.is_empty()));

    if payloads.len() > limits.max_payloads_per_message {
        return Err(ConvertError::CapacityExceeded {
            needed: payloads.len(),
            max: limits.max_payloads_per_message,
        });
    }

    Ok(payloads)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
