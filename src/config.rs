use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{GQL_URL, USER_AGENT, WEB_CLIENT_ID};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Where the external collaborators leave their files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Cookie bundles written by the session provisioner, one `<login>.json` each.
    #[serde(default = "default_cookies_dir")]
    pub cookies_dir: PathBuf,
    /// Integrity-token records, one `<login>.json` each.
    #[serde(default = "default_integrity_dir")]
    pub integrity_dir: PathBuf,
    /// Persisted-operation hashes.
    #[serde(default = "default_ops_path")]
    pub ops_path: PathBuf,
}

/// GraphQL client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_gql_url")]
    pub gql_url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Total network attempts for one logical operation (rate limit, 5xx, transport).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay; doubles every attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_millis: u64,
    /// Upper bound for a single backoff delay.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
}

/// Account worker timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    /// Inventory polls are spread uniformly over `[min, max]` seconds.
    #[serde(default = "default_inventory_min")]
    pub inventory_min_secs: u64,
    #[serde(default = "default_inventory_max")]
    pub inventory_max_secs: u64,
    /// Sleep quantum between command-drain passes.
    #[serde(default = "default_tick")]
    pub tick_millis: u64,
    #[serde(default = "default_max_claim_attempts")]
    pub max_claim_attempts: u32,
}

fn default_cookies_dir() -> PathBuf {
    PathBuf::from("cookies")
}

fn default_integrity_dir() -> PathBuf {
    PathBuf::from("ci")
}

fn default_ops_path() -> PathBuf {
    PathBuf::from("ops.json")
}

fn default_gql_url() -> String {
    GQL_URL.to_string()
}

fn default_client_id() -> String {
    WEB_CLIENT_ID.to_string()
}

fn default_user_agent() -> String {
    USER_AGENT.to_string()
}

fn default_request_timeout() -> u64 {
    8
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_backoff_cap() -> u64 {
    60
}

fn default_heartbeat() -> u64 {
    60
}

fn default_inventory_min() -> u64 {
    120
}

fn default_inventory_max() -> u64 {
    180
}

fn default_tick() -> u64 {
    1000
}

fn default_max_claim_attempts() -> u32 {
    5
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cookies_dir: default_cookies_dir(),
            integrity_dir: default_integrity_dir(),
            ops_path: default_ops_path(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gql_url: default_gql_url(),
            client_id: default_client_id(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_millis: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat(),
            inventory_min_secs: default_inventory_min(),
            inventory_max_secs: default_inventory_max(),
            tick_millis: default_tick(),
            max_claim_attempts: default_max_claim_attempts(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Backoff before retry number `attempt` (1-based): base, 2×base, 4×base, … capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let millis = self.backoff_base_millis.saturating_mul(1u64 << exp);
        Duration::from_millis(millis).min(Duration::from_secs(self.backoff_cap_secs))
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    /// Inventory window with `min <= max` enforced.
    pub fn inventory_window(&self) -> (Duration, Duration) {
        let min = self.inventory_min_secs.max(1);
        let max = self.inventory_max_secs.max(min);
        (Duration::from_secs(min), Duration::from_secs(max))
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
