//! Configuration for the alt-text labeler
use crate::error::{LabelerError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration struct, loaded from environment variables
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Account whose posts are checked for missing alt text
    pub target_did: String,

    /// DID stamped as `src` on emitted labels (defaults to `target_did`)
    #[serde(default)]
    pub labeler_did: Option<String>,

    /// Hex-encoded label signing secret
    pub signing_key: String,

    /// Bind host for the label listener
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port for the label listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// Jetstream subscribe endpoint
    #[serde(default = "default_firehose_url")]
    pub firehose_url: String,

    /// How often the cursor is checkpointed while connected
    #[serde(default = "default_cursor_update_interval_ms")]
    pub cursor_update_interval_ms: u64,

    /// Where the cursor is persisted
    #[serde(default = "default_cursor_file")]
    pub cursor_file: String,

    /// SQLite database for labels (`:memory:` for an ephemeral store)
    #[serde(default = "default_label_db_path")]
    pub label_db_path: String,

    /// Upper bound on one label-creation call
    #[serde(default = "default_label_timeout_ms")]
    pub label_timeout_ms: u64,

    /// Recently labeled subjects remembered locally; 0 disables
    #[serde(default = "default_dedupe_capacity")]
    pub dedupe_capacity: usize,

    /// Ask Jetstream to deliver only the target account's posts
    #[serde(default = "default_filter_upstream")]
    pub filter_upstream: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4100
}

fn default_firehose_url() -> String {
    "wss://jetstream1.us-east.bsky.network/subscribe".to_string()
}

fn default_cursor_update_interval_ms() -> u64 {
    10_000
}

fn default_cursor_file() -> String {
    "cursor.txt".to_string()
}

fn default_label_db_path() -> String {
    "labels.db".to_string()
}

fn default_label_timeout_ms() -> u64 {
    10_000
}

fn default_dedupe_capacity() -> usize {
    1024
}

fn default_filter_upstream() -> bool {
    true
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Config = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target_did.starts_with("did:") {
            return Err(LabelerError::Config(format!(
                "TARGET_DID must be a DID, got '{}'",
                self.target_did
            )));
        }
        if self.cursor_update_interval_ms == 0 {
            return Err(LabelerError::Config(
                "CURSOR_UPDATE_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        if self.label_timeout_ms == 0 {
            return Err(LabelerError::Config(
                "LABEL_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }
        if self.signing_key.trim().is_empty() || hex::decode(self.signing_key.trim()).is_err() {
            return Err(LabelerError::Config(
                "SIGNING_KEY must be a non-empty hex string".to_string(),
            ));
        }
        Ok(())
    }

    pub fn labeler_did(&self) -> &str {
        self.labeler_did.as_deref().unwrap_or(&self.target_did)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.cursor_update_interval_ms)
    }

    pub fn label_timeout(&self) -> Duration {
        Duration::from_millis(self.label_timeout_ms)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("target_did", &self.target_did)
            .field("labeler_did", &self.labeler_did())
            .field("signing_key", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("firehose_url", &self.firehose_url)
            .field("cursor_update_interval_ms", &self.cursor_update_interval_ms)
            .field("cursor_file", &self.cursor_file)
            .field("label_db_path", &self.label_db_path)
            .field("label_timeout_ms", &self.label_timeout_ms)
            .field("dedupe_capacity", &self.dedupe_capacity)
            .field("filter_upstream", &self.filter_upstream)
            .finish()
    }
}
