//! Reader for the standard Slack export layout:
//!
//! ```text
//! export-root/
//!   users.json         user id → profile
//!   channels.json      channel id → name
//!   <channel-name>/    one directory per channel
//!     2021-01-14.json  array of message records for one day
//! ```
//!
//! Also loads the operator-maintained `slackcord_users.json` mapping from
//! Slack identities to Discord member names, since nicks rarely survive a
//! platform move unchanged.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Root marker files distinguishing an export root from a channel subdir.
const ROOT_MARKERS: &[&str] = &["users.json", "channels.json", "integration_logs.json"];

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Not a Slack export root: {0}")]
    RootNotFound(PathBuf),
    #[error("No channel history found under {0}")]
    NoHistory(PathBuf),
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One message as it appears in a day log. Immutable once parsed.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceMessage {
    /// Slack timestamp, unique within a channel; serves as the message id
    pub ts: String,
    #[serde(default)]
    pub client_msg_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub files: Vec<AttachmentRef>,
}

impl SourceMessage {
    /// Thread children carry the root's `ts` here; the root itself repeats
    /// its own `ts`, which is not a reply.
    pub fn parent_ts(&self) -> Option<&str> {
        match self.thread_ts.as_deref() {
            Some(parent) if parent != self.ts => Some(parent),
            _ => None,
        }
    }

    /// Join/leave and bot chatter are not part of the conversation proper.
    pub fn is_importable(&self) -> bool {
        !matches!(
            self.subtype.as_deref(),
            Some("channel_join") | Some("channel_leave") | Some("bot_message")
        )
    }

    /// Human-readable send time derived from the `ts` epoch value.
    pub fn formatted_timestamp(&self) -> String {
        self.ts
            .split('.')
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.format("%Y-%m-%d at %H:%M:%S").to_string())
            .unwrap_or_else(|| "<no timestamp>".to_string())
    }

    fn ts_value(&self) -> f64 {
        self.ts.parse().unwrap_or(0.0)
    }
}

/// A file entry under a message's `files` array.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub filetype: Option<String>,
    #[serde(default)]
    pub url_private: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl AttachmentRef {
    /// Display name, with the Slack filetype appended when the export's
    /// `name` lacks an extension.
    pub fn filename(&self) -> String {
        let base = self
            .name
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| "attachment".to_string());
        match self.filetype.as_deref() {
            Some(ext) if !ext.is_empty() && !base.ends_with(&format!(".{ext}")) => {
                format!("{base}.{ext}")
            }
            _ => base,
        }
    }
}

// ---------------------------------------------------------------------------
// User mapping file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UserMapEntry {
    slack: UserMapSide,
    discord: UserMapSide,
}

#[derive(Debug, Default, Deserialize)]
struct UserMapSide {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

// ---------------------------------------------------------------------------
// Export directory
// ---------------------------------------------------------------------------

/// An opened Slack export with its lookup tables loaded.
#[derive(Debug)]
pub struct ExportDir {
    root: PathBuf,
    /// Slack user id → display name
    pub users: HashMap<String, String>,
    /// Slack channel id → channel name
    pub channels: HashMap<String, String>,
    /// Slack user id → Discord member name (operator-maintained)
    pub user_map: HashMap<String, String>,
    /// channel name → day files, sorted by filename
    history: BTreeMap<String, Vec<PathBuf>>,
}

impl ExportDir {
    /// Open an export given its root, a channel subdirectory, or a single
    /// day file; the root is probed upward one level when marker files are
    /// missing at the given path.
    pub fn open(path: &Path, user_map_file: &str) -> Result<Self, ExportError> {
        let root = locate_root(path)?;

        let users = load_users(&root.join("users.json"))?;
        let channels = load_channels(&root.join("channels.json"))?;
        let user_map = load_user_map(&root.join(user_map_file), &users)?;

        if users.is_empty() {
            tracing::warn!("No users.json found; mentions will show raw user IDs");
        }
        if channels.is_empty() {
            tracing::warn!("No channels.json found; channel references will show raw IDs");
        }
        if user_map.is_empty() {
            tracing::warn!(
                "No {} found; Slack names will not map to Discord members",
                user_map_file
            );
        }

        let history = scan_history(&root, path)?;
        if history.is_empty() {
            return Err(ExportError::NoHistory(path.to_path_buf()));
        }

        tracing::info!(
            "Opened export at {} ({} channels, {} users)",
            root.display(),
            history.len(),
            users.len()
        );

        Ok(Self {
            root,
            users,
            channels,
            user_map,
            history,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Channel names present in the history, in stable (sorted) order.
    pub fn channel_names(&self) -> Vec<&str> {
        self.history.keys().map(String::as_str).collect()
    }

    /// All importable messages of one channel in chronological order.
    ///
    /// Day files sort by name and messages by `ts`, so replies always see
    /// their parent converted first.
    pub fn messages(&self, channel: &str) -> Result<Vec<SourceMessage>, ExportError> {
        let files = self
            .history
            .get(channel)
            .ok_or_else(|| ExportError::UnknownChannel(channel.to_string()))?;

        let mut messages = Vec::new();
        for file in files {
            let raw = std::fs::read_to_string(file)?;
            let day: Vec<SourceMessage> =
                serde_json::from_str(&raw).map_err(|source| ExportError::Json {
                    path: file.clone(),
                    source,
                })?;
            messages.extend(day.into_iter().filter(SourceMessage::is_importable));
        }
        messages.sort_by(|a, b| {
            a.ts_value()
                .partial_cmp(&b.ts_value())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Discovery & loading
// ---------------------------------------------------------------------------

fn has_root_marker(dir: &Path) -> bool {
    ROOT_MARKERS.iter().any(|f| dir.join(f).exists())
}

fn locate_root(path: &Path) -> Result<PathBuf, ExportError> {
    let start = if path.is_file() {
        path.parent().unwrap_or(path).to_path_buf()
    } else {
        path.to_path_buf()
    };

    if has_root_marker(&start) {
        return Ok(start);
    }
    // A channel subdir sits one level below the root
    if let Some(parent) = start.parent() {
        if has_root_marker(parent) {
            return Ok(parent.to_path_buf());
        }
    }
    Err(ExportError::RootNotFound(path.to_path_buf()))
}

fn scan_history(root: &Path, given: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>, ExportError> {
    let mut history: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    let mut add_dir = |dir: &Path| -> Result<(), ExportError> {
        let name = match dir.file_name() {
            Some(n) => n.to_string_lossy().to_string(),
            None => return Ok(()),
        };
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        if files.is_empty() {
            return Ok(());
        }
        files.sort();
        history.insert(name, files);
        Ok(())
    };

    if given.is_file() {
        // A single day file: import just its channel
        if let Some(dir) = given.parent() {
            add_dir(dir)?;
        }
    } else if given != root {
        // A channel subdirectory
        add_dir(given)?;
    } else {
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if entry.path().is_dir() {
                add_dir(&entry.path())?;
            }
        }
    }

    Ok(history)
}

fn load_users(path: &Path) -> Result<HashMap<String, String>, ExportError> {
    #[derive(Deserialize)]
    struct User {
        id: String,
        #[serde(default)]
        profile: Profile,
    }
    #[derive(Default, Deserialize)]
    struct Profile {
        #[serde(default)]
        display_name: String,
        #[serde(default)]
        real_name: String,
    }

    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let users: Vec<User> = serde_json::from_str(&raw).map_err(|source| ExportError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(users
        .into_iter()
        .map(|u| {
            let name = if u.profile.display_name.is_empty() {
                u.profile.real_name
            } else {
                u.profile.display_name
            };
            (u.id, name)
        })
        .collect())
}

fn load_channels(path: &Path) -> Result<HashMap<String, String>, ExportError> {
    #[derive(Deserialize)]
    struct Channel {
        id: String,
        name: String,
    }

    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let channels: Vec<Channel> = serde_json::from_str(&raw).map_err(|source| ExportError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(channels.into_iter().map(|c| (c.id, c.name)).collect())
}

/// Entries may give a Slack id directly or just a Slack name, in which case
/// the name is matched against the users table (and skipped when ambiguous).
fn load_user_map(
    path: &Path,
    users: &HashMap<String, String>,
) -> Result<HashMap<String, String>, ExportError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<UserMapEntry> =
        serde_json::from_str(&raw).map_err(|source| ExportError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    let mut map = HashMap::new();
    for entry in entries {
        let discord_name = match entry.discord.name {
            Some(name) => name,
            None => continue,
        };
        let slack_id = match entry.slack.id {
            Some(id) => id,
            None => {
                let Some(slack_name) = entry.slack.name else {
                    continue;
                };
                let mut candidates = users
                    .iter()
                    .filter(|(_, name)| **name == slack_name)
                    .map(|(id, _)| id.clone());
                match (candidates.next(), candidates.next()) {
                    (Some(id), None) => id,
                    (Some(_), Some(_)) => {
                        tracing::warn!(
                            "Slack name \"{}\" is ambiguous in users.json; skipping mapping",
                            slack_name
                        );
                        continue;
                    }
                    (None, _) => {
                        tracing::warn!(
                            "No Slack user named \"{}\" in users.json; skipping mapping",
                            slack_name
                        );
                        continue;
                    }
                }
            }
        };
        map.insert(slack_id, discord_name);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
