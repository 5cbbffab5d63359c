use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Environment variable not set: ${0}")]
    MissingEnvVar(String),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub limits: Limits,
}

// ---------------------------------------------------------------------------
// Discord
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    /// Bot token (supports ${ENV_VAR} expansion)
    pub bot_token: String,
    /// Target guild ID
    pub guild_id: u64,
    /// Emit live @everyone/@here mentions instead of literal words.
    /// Off by default so a replayed archive cannot mass-ping the server.
    #[serde(default)]
    pub allow_broadcast: bool,
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Create missing destination channels instead of failing
    #[serde(default = "default_true")]
    pub create_channels: bool,
    /// Only import these channels (empty = all)
    #[serde(default)]
    pub channels: Vec<String>,
    /// Filename of the Slack→Discord user mapping inside the export root
    #[serde(default = "default_user_map")]
    pub user_map: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            create_channels: default_true(),
            channels: Vec::new(),
            user_map: default_user_map(),
        }
    }
}

// ---------------------------------------------------------------------------
// Destination limits
// ---------------------------------------------------------------------------

/// Discord-defined ceilings. Injected into the conversion pipeline so the
/// core never assumes platform numbers.
#[derive(Debug, Deserialize, Clone)]
pub struct Limits {
    /// Max characters in a plain message body
    #[serde(default = "default_message_chars")]
    pub max_message_chars: usize,
    /// Max characters in one embed description
    #[serde(default = "default_embed_chars")]
    pub max_embed_chars: usize,
    /// Max embeds attached to one message
    #[serde(default = "default_embeds_per_message")]
    pub max_embeds_per_message: usize,
    /// Max combined characters across all embeds of one message
    #[serde(default = "default_total_embed_chars")]
    pub max_total_embed_chars: usize,
    /// Max messages one source message may expand into before the
    /// conversion is declared over capacity
    #[serde(default = "default_payloads_per_message")]
    pub max_payloads_per_message: usize,
    /// Max attachment size to re-host, in bytes
    #[serde(default = "default_attachment_bytes")]
    pub max_attachment_bytes: u64,
    /// Retries for one payload on transient transport failure
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,
    /// Pause between payload sends
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_chars: default_message_chars(),
            max_embed_chars: default_embed_chars(),
            max_embeds_per_message: default_embeds_per_message(),
            max_total_embed_chars: default_total_embed_chars(),
            max_payloads_per_message: default_payloads_per_message(),
            max_attachment_bytes: default_attachment_bytes(),
            send_retries: default_send_retries(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_user_map() -> String {
    "slackcord_users.json".to_string()
}

fn default_message_chars() -> usize {
    2000
}

fn default_embed_chars() -> usize {
    4096
}

fn default_embeds_per_message() -> usize {
    10
}

fn default_total_embed_chars() -> usize {
    6000
}

fn default_payloads_per_message() -> usize {
    20
}

fn default_attachment_bytes() -> u64 {
    25 * 1024 * 1024
}

fn default_send_retries() -> u32 {
    3
}

fn default_throttle_ms() -> u64 {
    100
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Expand `~` to home directory in a path string.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${VAR_NAME}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut result = input.to_string();
    // Collect captures first to avoid borrow issues
    let captures: Vec<(String, String)> = re
        .captures_iter(input)
        .map(|cap| (cap[0].to_string(), cap[1].to_string()))
        .collect();
    for (full_match, var_name) in captures {
        let value = std::env::var(&var_name)
            .map_err(|_| ConfigError::MissingEnvVar(var_name.clone()))?;
        result = result.replace(&full_match, &value);
    }
    Ok(result)
}

/// Default config directory: ~/.slackcord/
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".slackcord")
}

/// Load config from `~/.slackcord/config.toml` (or a custom path).
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => config_dir().join("config.toml"),
    };

    if !config_path.exists() {
        return Err(ConfigError::NotFound(config_path));
    }

    let raw = std::fs::read_to_string(&config_path)?;
    parse_config(&raw)
}

/// Parse a config string (after reading from file).
pub fn parse_config(raw: &str) -> Result<Config, ConfigError> {
    let expanded = expand_env_vars(raw)?;
    let config: Config = toml::from_str(&expanded)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[discord]
bot_token = "xyz.abc"
guild_id = 123456789
"#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.discord.bot_token, "xyz.abc");
        assert_eq!(config.discord.guild_id, 123456789);
        assert!(!config.discord.allow_broadcast);
        assert!(config.import.create_channels);
        assert_eq!(config.import.user_map, "slackcord_users.json");
        assert_eq!(config.limits.max_message_chars, 2000);
        assert_eq!(config.limits.max_embed_chars, 4096);
        assert_eq!(config.limits.max_embeds_per_message, 10);
        assert_eq!(config.limits.max_total_embed_chars, 6000);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[discord]
bot_token = "xyz.abc"
guild_id = 42
allow_broadcast = true

[import]
create_channels = false
channels = ["general", "random"]
user_map = "mapping.json"

[limits]
max_message_chars = 1000
max_embed_chars = 2048
max_embeds_per_message = 4
max_total_embed_chars = 3000
max_payloads_per_message = 5
send_retries = 1
throttle_ms = 0
"#;
        let config = parse_config(toml).unwrap();
        assert!(config.discord.allow_broadcast);
        assert!(!config.import.create_channels);
        assert_eq!(config.import.channels, vec!["general", "random"]);
        assert_eq!(config.import.user_map, "mapping.json");
        assert_eq!(config.limits.max_message_chars, 1000);
        assert_eq!(config.limits.max_embeds_per_message, 4);
        assert_eq!(config.limits.send_retries, 1);
        assert_eq!(config.limits.throttle_ms, 0);
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("SLACKCORD_TEST_TOKEN", "expanded-token");
        let toml = r#"
[discord]
bot_token = "${SLACKCORD_TEST_TOKEN}"
guild_id = 1
"#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.discord.bot_token, "expanded-token");
        std::env::remove_var("SLACKCORD_TEST_TOKEN");
    }

    #[test]
    fn test_missing_env_var() {
        let toml = r#"
[discord]
bot_token = "${SLACKCORD_NONEXISTENT_VAR}"
guild_id = 1
"#;
        let err = parse_config(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "SLACKCORD_NONEXISTENT_VAR"));
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/.slackcord/config.toml");
        assert!(path.to_str().unwrap().contains(".slackcord/config.toml"));
        assert!(!path.to_str().unwrap().starts_with("~"));

        let abs = expand_tilde("/absolute/path");
        assert_eq!(abs, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_limits_defaults() {
        let limits = Limits::default();
        assert_eq!(limits.max_payloads_per_message, 20);
        assert_eq!(limits.send_retries, 3);
        assert_eq!(limits.max_attachment_bytes, 25 * 1024 * 1024);
    }
}
