//! Integrity-token records and the provider seam used on anti-bot challenges.
//!
//! Tokens are captured from a real browser session by an external tool and
//! dropped into `<integrity_dir>/<login>.json` as
//! `{client_version, client_integrity, expires_at}`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;

/// Default lifetime of a freshly captured token.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// `(Client-Version, Client-Integrity)` header pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityToken {
    pub client_version: String,
    pub client_integrity: String,
}

impl IntegrityToken {
    pub fn new(client_version: impl Into<String>, client_integrity: impl Into<String>) -> Self {
        Self {
            client_version: client_version.into(),
            client_integrity: client_integrity.into(),
        }
    }

    /// Both halves present.
    pub fn is_complete(&self) -> bool {
        !self.client_version.is_empty() && !self.client_integrity.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct StoredRecord<'a> {
    client_version: &'a str,
    client_integrity: &'a str,
    expires_at: f64,
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// First non-empty string among several historical key spellings.
fn pick(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Directory of per-login integrity records.
#[derive(Debug, Clone)]
pub struct IntegrityStore {
    dir: PathBuf,
}

impl IntegrityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, login: &str) -> PathBuf {
        self.dir.join(format!("{login}.json"))
    }

    /// Unexpired token for `login`. Absent, corrupt, expired or half-empty
    /// records all read as `None`.
    pub fn load(&self, login: &str) -> Option<IntegrityToken> {
        let path = self.path_for(login);
        let contents = std::fs::read_to_string(&path).ok()?;
        let value: Value = match serde_json::from_str(&contents) {
            Ok(v) => v,
            Err(e) => {
                warn!("[{login}] Corrupt integrity record {}: {e}", path.display());
                return None;
            }
        };
        let obj = value.as_object()?;
        let expires_at = obj.get("expires_at").and_then(Value::as_f64).unwrap_or(0.0);
        if expires_at > 0.0 && expires_at < now_secs() {
            return None;
        }
        let token = IntegrityToken {
            client_version: pick(
                obj,
                &["client_version", "Client-Version", "clientVersion", "client-version"],
            ),
            client_integrity: pick(
                obj,
                &["client_integrity", "Client-Integrity", "clientIntegrity", "client-integrity"],
            ),
        };
        token.is_complete().then_some(token)
    }

    /// Persist `token` for `login`, expiring after `ttl`.
    pub fn save(&self, login: &str, token: &IntegrityToken, ttl: Duration) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let record = StoredRecord {
            client_version: &token.client_version,
            client_integrity: &token.client_integrity,
            expires_at: now_secs() + ttl.as_secs_f64(),
        };
        let contents = serde_json::to_string_pretty(&record)?;
        std::fs::write(self.path_for(login), contents)?;
        Ok(())
    }
}

/// Source of fresh integrity tokens, consulted when the API issues a challenge.
#[async_trait]
pub trait IntegrityProvider: Send + Sync {
    /// A fresh token for `login`, or `None` if none can be obtained right now.
    async fn refresh(&self, login: &str) -> Result<Option<IntegrityToken>>;
}

/// Provider backed by the on-disk store: picks up whatever the external
/// capture tool wrote most recently.
#[derive(Debug, Clone)]
pub struct FileIntegrityProvider {
    store: IntegrityStore,
}

impl FileIntegrityProvider {
    pub fn new(store: IntegrityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IntegrityProvider for FileIntegrityProvider {
    async fn refresh(&self, login: &str) -> Result<Option<IntegrityToken>> {
        Ok(self.store.load(login))
    }
}
