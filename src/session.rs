//! Read side of the session provisioner's cookie bundles.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

/// Name of the cookie carrying the bearer token.
pub const AUTH_COOKIE: &str = "auth-token";

/// One exported browser cookie. Extra fields (`domain`, `path`, `expires`, …) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Directory of `<login>.json` cookie bundles.
#[derive(Debug, Clone)]
pub struct CookieStore {
    dir: PathBuf,
}

impl CookieStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, login: &str) -> PathBuf {
        self.dir.join(format!("{login}.json"))
    }

    /// Bearer token for `login`, or `None` when the bundle or the cookie is absent.
    ///
    /// An unreadable or malformed bundle is logged and treated as absent.
    pub fn auth_token(&self, login: &str) -> Option<String> {
        let path = self.path_for(login);
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("[{login}] Failed to load auth token from {}: {e}", path.display());
                return None;
            }
        };
        let cookies: Vec<StoredCookie> = match serde_json::from_str(&contents) {
            Ok(c) => c,
            Err(e) => {
                warn!("[{login}] Failed to load auth token from {}: {e}", path.display());
                return None;
            }
        };
        cookies
            .into_iter()
            .find(|c| c.name == AUTH_COOKIE)
            .map(|c| c.value)
            .filter(|v| !v.trim().is_empty())
    }
}
