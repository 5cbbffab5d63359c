//! Moves attachment bytes from Slack's file hosting onto Discord. Each file
//! is fetched once, classified as image-renderable or generic, and packaged
//! for upload; bytes are never written to disk. A fetch failure downgrades
//! the attachment to a textual placeholder instead of failing the message.

use crate::export::AttachmentRef;
use futures::future::join_all;

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("no url_private on attachment")]
    MissingUrl,
    #[error("fetch returned HTTP {0}")]
    Status(u16),
    #[error("fetch failed: {0}")]
    Network(String),
    #[error("attachment is {size} bytes, over the {max} byte ceiling")]
    TooLarge { size: u64, max: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Renders inline in an embed
    Image,
    /// Uploaded as a plain file
    File,
}

/// Bytes ready to ride on a payload.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub kind: AttachmentKind,
}

/// Outcome of relocating one attachment.
#[derive(Debug)]
pub enum Relocated {
    Upload {
        part: UploadPart,
        /// Slack file title, shown on the image embed
        title: Option<String>,
    },
    /// Could not be transferred; the message carries a placeholder note
    Missing { name: String, reason: String },
}

pub struct Relocator {
    http: reqwest::Client,
    max_bytes: u64,
}

impl Relocator {
    pub fn new(max_bytes: u64) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("slackcord/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("default reqwest client");
        Self { http, max_bytes }
    }

    /// Transfer all attachments of one message. Siblings have no ordering
    /// dependency, so they fetch concurrently; results come back in input
    /// order.
    pub async fn relocate_all(&self, refs: &[AttachmentRef]) -> Vec<Relocated> {
        join_all(refs.iter().map(|r| self.relocate(r))).await
    }

    /// Transfer one attachment. Infallible by design: failure is data.
    pub async fn relocate(&self, attachment: &AttachmentRef) -> Relocated {
        let name = attachment.filename();
        match self.fetch(attachment).await {
            Ok(bytes) => {
                let kind = classify(attachment.mimetype.as_deref(), &name);
                tracing::debug!(
                    "Relocated {} ({} bytes, {:?})",
                    name,
                    bytes.len(),
                    kind
                );
                Relocated::Upload {
                    part: UploadPart {
                        filename: name,
                        bytes,
                        kind,
                    },
                    title: attachment.title.clone(),
                }
            }
            Err(err) => {
                tracing::warn!("Unable to relocate attachment {}: {}", name, err);
                Relocated::Missing {
                    name,
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn fetch(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, AttachError> {
        let url = attachment
            .url_private
            .as_deref()
            .ok_or(AttachError::MissingUrl)?;

        if let Some(size) = attachment.size {
            if size > self.max_bytes {
                return Err(AttachError::TooLarge {
                    size,
                    max: self.max_bytes,
                });
            }
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AttachError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttachError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AttachError::Network(e.to_string()))?;

        // The export may understate the size; check what actually arrived
        if bytes.len() as u64 > self.max_bytes {
            return Err(AttachError::TooLarge {
                size: bytes.len() as u64,
                max: self.max_bytes,
            });
        }

        Ok(bytes.to_vec())
    }
}

/// Declared MIME type wins; otherwise guess from the filename. Anything
/// unclassifiable ships as a generic file rather than being dropped.
pub fn classify(mimetype: Option<&str>, filename: &str) -> AttachmentKind {
    let declared_image = mimetype
        .map(|m| m.trim().starts_with("image/"))
        .unwrap_or(false);
    if declared_image {
        return AttachmentKind::Image;
    }
    if mimetype.map_or(true, |m| m.trim().is_empty()) {
        let guessed = mime_guess::from_path(filename).first();
        if guessed.is_some_and(|m| m.type_() == mime_guess::mime::IMAGE) {
            return AttachmentKind::Image;
        }
    }
    AttachmentKind::File
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
