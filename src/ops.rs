//! Persisted-operation registry.
//!
//! The private API only accepts operations referenced by a precomputed
//! sha256 hash. Hashes live in `ops.json` and are refreshed by hand when the
//! web client ships a new build; operations that get renamed keep resolving
//! through the alias table.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MinerError, Result};

pub const VIEWER_DROPS_DASHBOARD: &str = "ViewerDropsDashboard";
pub const INVENTORY: &str = "Inventory";
pub const DROP_CURRENT_SESSION_CONTEXT: &str = "DropCurrentSessionContext";
pub const DROP_CAMPAIGN_DETAILS: &str = "DropCampaignDetails";
pub const CLAIM_DROP_REWARDS: &str = "DropsPage_ClaimDropRewards";
pub const PLAYBACK_ACCESS_TOKEN: &str = "PlaybackAccessToken";

/// Operations the worker cannot run without.
pub const REQUIRED: &[&str] = &[
    VIEWER_DROPS_DASHBOARD,
    INVENTORY,
    DROP_CURRENT_SESSION_CONTEXT,
    DROP_CAMPAIGN_DETAILS,
    CLAIM_DROP_REWARDS,
];

/// `(alias, canonical)` pairs for operations the platform has renamed.
const ALIASES: &[(&str, &str)] = &[
    ("DropsCampaignDetails", DROP_CAMPAIGN_DETAILS),
    ("IncrementDropCurrentSessionProgress", DROP_CURRENT_SESSION_CONTEXT),
    ("ClaimDropReward", CLAIM_DROP_REWARDS),
    ("ClaimDropRewards", CLAIM_DROP_REWARDS),
];

/// Values shipped in template files that must be treated as "not configured".
const PLACEHOLDERS: &[&str] = &["", "REPLACE_ME", "<sha256>"];

/// Read-only mapping of operation name to persisted-query hash.
#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    hashes: HashMap<String, String>,
}

/// Map an alias to its canonical name; canonical names map to themselves.
pub fn canonical_name(name: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name)
}

fn aliases_of(canonical: &str) -> impl Iterator<Item = &'static str> {
    ALIASES
        .iter()
        .filter(move |(_, c)| *c == canonical)
        .map(|(alias, _)| *alias)
}

fn is_usable(hash: &str) -> bool {
    !PLACEHOLDERS.contains(&hash.trim())
}

impl OpRegistry {
    /// Load hashes from `path`. Never fails: a missing or corrupt file logs a
    /// warning and yields an empty registry, which the startup health check
    /// then reports.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Cannot read operation hashes from {}: {e}", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str::<Value>(&contents) {
            Ok(value) => {
                let registry = Self::from_json(&value);
                debug!("Loaded {} operation hashes from {}", registry.len(), path.display());
                registry
            }
            Err(e) => {
                warn!("Corrupt operation hash file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Accepts `{"Op": "hash"}` and `{"Op": {"sha256": "hash", "version": 1}}` entries.
    pub fn from_json(value: &Value) -> Self {
        let mut hashes = HashMap::new();
        if let Some(obj) = value.as_object() {
            for (name, entry) in obj {
                let hash = match entry {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(o) => o
                        .get("sha256")
                        .or_else(|| o.get("sha256Hash"))
                        .or_else(|| o.get("hash"))
                        .and_then(Value::as_str),
                    _ => None,
                };
                if let Some(hash) = hash {
                    hashes.insert(name.clone(), hash.trim().to_string());
                }
            }
        }
        Self { hashes }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            hashes: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    fn usable(&self, name: &str) -> Option<&str> {
        self.hashes
            .get(name)
            .map(String::as_str)
            .filter(|h| is_usable(h))
    }

    /// Usable hash for `canonical` or any of its aliases, canonical entry first.
    fn lookup(&self, canonical: &str) -> Option<&str> {
        self.usable(canonical)
            .or_else(|| aliases_of(canonical).find_map(|alias| self.usable(alias)))
    }

    /// Resolve an operation (or one of its aliases) to `(canonical_name, hash)`.
    pub fn resolve(&self, name: &str) -> Result<(String, String)> {
        let canonical = canonical_name(name);
        self.lookup(canonical)
            .map(|hash| (canonical.to_string(), hash.to_string()))
            .ok_or_else(|| {
                MinerError::Configuration(format!("no persisted-query hash for {name}"))
            })
    }

    /// Whether an optional operation has a usable hash.
    pub fn has(&self, name: &str) -> bool {
        self.lookup(canonical_name(name)).is_some()
    }

    /// Required operations lacking a usable hash.
    pub fn missing(&self) -> Vec<&'static str> {
        REQUIRED
            .iter()
            .copied()
            .filter(|op| self.lookup(op).is_none())
            .collect()
    }
}
