//! Account source files: `login:password[:totp[:proxy[:cv:ci]]]` text or
//! `label,login,password,proxy,totp_secret,client_version,client_integrity` CSV.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::integrity::IntegrityToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub label: String,
    pub login: String,
    pub password: String,
    pub totp_secret: String,
    pub proxy: String,
    pub client_version: String,
    pub client_integrity: String,
}

impl Account {
    pub fn proxy(&self) -> Option<String> {
        (!self.proxy.is_empty()).then(|| self.proxy.clone())
    }

    /// Integrity pair carried by the account file, if both halves are set.
    pub fn integrity(&self) -> Option<IntegrityToken> {
        let token = IntegrityToken::new(&self.client_version, &self.client_integrity);
        token.is_complete().then_some(token)
    }
}

/// Load accounts from `path`: `.txt` is colon-separated, anything else CSV.
pub fn load_accounts(path: &Path) -> Result<Vec<Account>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read accounts from {}", path.display()))?;
    let is_txt = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
    Ok(if is_txt {
        parse_txt(&contents)
    } else {
        parse_csv(&contents)
    })
}

fn is_scheme(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Rejoin a `scheme://[user[:pass]@]host[:port]` proxy split at fields 3..
/// Returns the proxy and the index of the first field after it.
fn rejoin_proxy(parts: &[&str]) -> (String, usize) {
    let mut proxy = format!("{}:{}", parts[3], parts[4]);
    let mut idx = 5;
    if !proxy.contains('@') && parts.get(idx).is_some_and(|p| p.contains('@')) {
        proxy = format!("{proxy}:{}", parts[idx]);
        idx += 1;
    }
    if parts
        .get(idx)
        .is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    {
        proxy = format!("{proxy}:{}", parts[idx]);
        idx += 1;
    }
    (proxy, idx)
}

/// Colon-separated records. A proxy written as a URL (`scheme://…`) spans
/// several fields and is rejoined.
pub fn parse_txt(contents: &str) -> Vec<Account> {
    let mut accounts = Vec::new();
    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 2 {
            warn!("Skipping malformed account line");
            continue;
        }
        let field = |i: usize| parts.get(i).map(|p| p.trim().to_string()).unwrap_or_default();
        let login = field(0);
        if login.is_empty() {
            continue;
        }

        let url_proxy = is_scheme(&field(3)) && parts.get(4).is_some_and(|p| p.starts_with("//"));
        let (proxy, idx) = if url_proxy {
            rejoin_proxy(&parts)
        } else {
            (field(3), 4)
        };

        accounts.push(Account {
            label: login.clone(),
            password: parts[1].to_string(),
            totp_secret: field(2),
            proxy,
            client_version: field(idx),
            client_integrity: field(idx + 1),
            login,
        });
    }
    accounts
}

/// Split one CSV record, honoring double-quoted fields.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Header-driven CSV. Rows without a login are dropped; label defaults to login.
pub fn parse_csv(contents: &str) -> Vec<Account> {
    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<String> = split_record(header)
        .into_iter()
        .map(|c| c.trim().trim_start_matches('\u{feff}').to_ascii_lowercase())
        .collect();

    lines
        .filter_map(|line| {
            let values = split_record(line);
            let get = |name: &str| {
                columns
                    .iter()
                    .position(|c| c == name)
                    .and_then(|i| values.get(i))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default()
            };
            let login = get("login");
            if login.is_empty() {
                return None;
            }
            let label = get("label");
            Some(Account {
                label: if label.is_empty() { login.clone() } else { label },
                password: get("password"),
                totp_secret: get("totp_secret"),
                proxy: get("proxy"),
                client_version: get("client_version"),
                client_integrity: get("client_integrity"),
                login,
            })
        })
        .collect()
}
