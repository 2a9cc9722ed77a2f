use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose;
use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{MinerError, Result};
use crate::extract::{extract_channels, extract_playback_token};
use crate::integrity::{DEFAULT_TTL, IntegrityProvider, IntegrityStore, IntegrityToken};
use crate::ops::{
    CLAIM_DROP_REWARDS, DROP_CAMPAIGN_DETAILS, DROP_CURRENT_SESSION_CONTEXT, INVENTORY,
    OpRegistry, PLAYBACK_ACCESS_TOKEN, VIEWER_DROPS_DASHBOARD,
};
use crate::state::ChannelBinding;
use crate::types::{ChannelCandidate, PlaybackEndpoints};
use crate::{CHANNEL_PAGE_BASE, USHER_BASE};

/// Everything the account worker needs from the platform.
///
/// [`GqlClient`] is the real implementation; tests drive the worker with a stub.
#[async_trait]
pub trait DropsApi: Send {
    async fn viewer_dashboard(&mut self) -> Result<Value>;

    async fn inventory(&mut self) -> Result<Value>;

    /// "Watching this channel" heartbeat; keeps watch time accruing server-side.
    async fn session_heartbeat(&mut self, channel_login: &str, channel_id: &str) -> Result<Value>;

    async fn claim(&mut self, drop_instance_id: &str) -> Result<Value>;

    async fn campaign_details(&mut self, campaign_id: &str) -> Result<Value>;

    /// Candidate channels for a campaign, most viewers first.
    async fn live_channels(&mut self, campaign_id: &str) -> Result<Vec<ChannelCandidate>> {
        let details = self.campaign_details(campaign_id).await?;
        Ok(extract_channels(&details))
    }

    async fn playback_endpoints(&mut self, channel_login: &str) -> Result<PlaybackEndpoints>;

    async fn minute_watched(&mut self, spade_url: &str, channel: &ChannelBinding) -> Result<()>;

    async fn head_hls(&mut self, url: &str) -> Result<()>;

    /// Release the connection context. Safe to call more than once.
    fn close(&mut self);
}

fn random_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn first_capture(txt: &str, pattern: &str) -> Option<String> {
    Regex::new(pattern)
        .ok()?
        .captures(txt)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

const SPADE_PATTERN: &str = r#""spade_?url":\s*"(https://video-edge-[.\w\-/]+\.ts(?:\?[^"]*)?)"#;
const SETTINGS_PATTERN: &str = r#"src="(https://[\w.]+/config/settings\.[0-9a-f]{32}\.js)"#;

/// Result of one network attempt.
enum Attempt {
    Done(Value),
    /// Transport failure, 5xx or 429.
    Transient(String),
    /// 4xx whose body mentions integrity.
    Challenge(String),
    Rejected { status: u16, body: String },
}

fn unwrap_payload(operation: &str, data: Value) -> Result<Value> {
    let data = match data {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };
    match data.get("errors") {
        Some(errors) if !errors.is_null() && errors.as_array().is_none_or(|e| !e.is_empty()) => {
            Err(MinerError::Api {
                operation: operation.to_string(),
                errors: errors.clone(),
            })
        }
        _ => Ok(data),
    }
}

/// Authenticated client for the private GraphQL endpoint, one per account.
pub struct GqlClient {
    login: String,
    token: String,
    config: ClientConfig,
    ops: Arc<OpRegistry>,
    proxy: Option<String>,
    integrity: Option<IntegrityToken>,
    provider: Option<Arc<dyn IntegrityProvider>>,
    store: Option<IntegrityStore>,
    http: Option<reqwest::Client>,
    device_id: String,
    session_id: String,
    client_session_id: String,
    channel_page_base: String,
    usher_base: String,
}

impl GqlClient {
    pub fn new(
        login: impl Into<String>,
        token: impl Into<String>,
        config: ClientConfig,
        ops: Arc<OpRegistry>,
    ) -> Self {
        Self {
            login: login.into(),
            token: token.into(),
            config,
            ops,
            proxy: None,
            integrity: None,
            provider: None,
            store: None,
            http: None,
            device_id: random_id(32),
            session_id: random_id(32),
            client_session_id: random_id(16),
            channel_page_base: CHANNEL_PAGE_BASE.to_string(),
            usher_base: USHER_BASE.to_string(),
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.is_empty());
        self
    }

    /// Initial integrity pair. Incomplete pairs are ignored.
    pub fn with_integrity(mut self, token: Option<IntegrityToken>) -> Self {
        self.integrity = token.filter(IntegrityToken::is_complete);
        self
    }

    /// Where to ask for a fresh integrity pair on a challenge, and where to persist it.
    pub fn with_refresh(
        mut self,
        provider: Arc<dyn IntegrityProvider>,
        store: Option<IntegrityStore>,
    ) -> Self {
        self.provider = Some(provider);
        self.store = store;
        self
    }

    /// Override the channel-page and playlist hosts.
    pub fn with_web_bases(mut self, channel_page: impl Into<String>, usher: impl Into<String>) -> Self {
        self.channel_page_base = channel_page.into();
        self.usher_base = usher.into();
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn integrity(&self) -> Option<&IntegrityToken> {
        self.integrity.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.http.is_some()
    }

    /// Shared connection context, created on first use.
    fn http(&mut self) -> Result<reqwest::Client> {
        if let Some(client) = &self.http {
            return Ok(client.clone());
        }
        let mut builder = reqwest::Client::builder()
            .timeout(self.config.request_timeout())
            .user_agent(self.config.user_agent.as_str());
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        let client = builder.build()?;
        self.http = Some(client.clone());
        Ok(client)
    }

    /// Run a persisted operation.
    ///
    /// Transport failures, 5xx and 429 are retried with capped exponential
    /// backoff up to `max_attempts` total attempts. A 4xx integrity challenge
    /// refreshes the integrity pair and retries once. A GraphQL `errors`
    /// payload is returned as [`MinerError::Api`] and never retried.
    pub async fn execute(&mut self, operation: &str, variables: Value) -> Result<Value> {
        let (name, hash) = self.ops.resolve(operation)?;
        let body = json!({
            "operationName": name,
            "variables": variables,
            "extensions": {"persistedQuery": {"version": 1, "sha256Hash": hash}},
        });
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts: u32 = 0;
        let mut refreshed = false;

        loop {
            attempts += 1;
            match self.attempt(&body).await? {
                Attempt::Done(data) => return unwrap_payload(&name, data),
                Attempt::Transient(last) => {
                    if attempts >= max_attempts {
                        return Err(MinerError::RetryExhausted {
                            operation: name,
                            attempts,
                            last,
                        });
                    }
                    let delay = self.config.backoff(attempts);
                    warn!(
                        "[{}] {name}: {last}; retrying in {:?} ({attempts}/{max_attempts})",
                        self.login, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Challenge(detail) => {
                    if refreshed {
                        return Err(MinerError::RetryExhausted {
                            operation: name,
                            attempts,
                            last: format!("integrity challenge after refresh: {detail}"),
                        });
                    }
                    refreshed = true;
                    if !self.refresh_integrity().await? {
                        return Err(MinerError::IntegrityChallenge {
                            operation: name,
                            detail,
                        });
                    }
                    debug!("[{}] {name}: integrity refreshed, retrying", self.login);
                }
                Attempt::Rejected { status, body } => {
                    return Err(MinerError::Status {
                        operation: name,
                        status,
                        body,
                    });
                }
            }
        }
    }

    async fn attempt(&mut self, body: &Value) -> Result<Attempt> {
        let http = self.http()?;
        let mut request = http
            .post(self.config.gql_url.as_str())
            .header("Client-ID", self.config.client_id.as_str())
            .header("Authorization", format!("OAuth {}", self.token))
            .header("Content-Type", "application/json")
            .header("X-Device-Id", self.device_id.as_str())
            .header("Client-Session-Id", self.client_session_id.as_str());
        if let Some(token) = &self.integrity {
            request = request
                .header("Client-Version", token.client_version.as_str())
                .header("Client-Integrity", token.client_integrity.as_str());
        }

        let response = match request.json(body).send().await {
            Ok(r) => r,
            Err(e) => return Ok(Attempt::Transient(format!("transport: {e}"))),
        };
        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return Ok(Attempt::Transient(format!("reading body: {e}"))),
        };

        if status.as_u16() == 429 || status.is_server_error() {
            return Ok(Attempt::Transient(format!("HTTP {}", status.as_u16())));
        }
        if status.is_success() {
            return Ok(Attempt::Done(serde_json::from_str(&text)?));
        }
        if status.is_client_error() && text.to_ascii_lowercase().contains("integrity") {
            return Ok(Attempt::Challenge(format!("HTTP {}: {text}", status.as_u16())));
        }
        Ok(Attempt::Rejected {
            status: status.as_u16(),
            body: text,
        })
    }

    /// Ask the provider for a fresh pair. Returns `false` if none is available.
    async fn refresh_integrity(&mut self) -> Result<bool> {
        let Some(provider) = self.provider.clone() else {
            return Ok(false);
        };
        let Some(token) = provider
            .refresh(&self.login)
            .await?
            .filter(IntegrityToken::is_complete)
        else {
            return Ok(false);
        };
        if let Some(store) = &self.store
            && let Err(e) = store.save(&self.login, &token, DEFAULT_TTL)
        {
            warn!("[{}] Failed to persist refreshed integrity token: {e}", self.login);
        }
        self.integrity = Some(token);
        Ok(true)
    }

    /// Append the per-account device/session identifiers to `base`.
    fn with_session_params(&self, base: &str, extra: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(base)
            .map_err(|e| MinerError::Configuration(format!("bad url {base}: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in extra {
                query.append_pair(k, v);
            }
            query
                .append_pair("device_id", &self.device_id)
                .append_pair("play_session_id", &self.session_id);
        }
        Ok(url)
    }

    async fn fetch_text(&mut self, url: &str) -> Result<String> {
        let http = self.http()?;
        Ok(http.get(url).send().await?.error_for_status()?.text().await?)
    }

    /// Beacon URL scraped from the channel page, or from the settings script it references.
    async fn spade_url(&mut self, channel_login: &str) -> Result<Option<String>> {
        let page_url = format!("{}/{channel_login}", self.channel_page_base.trim_end_matches('/'));
        let html = self.fetch_text(&page_url).await?;
        if let Some(url) = first_capture(&html, SPADE_PATTERN) {
            return Ok(Some(url));
        }
        let Some(settings_url) = first_capture(&html, SETTINGS_PATTERN) else {
            return Ok(None);
        };
        let settings = self.fetch_text(&settings_url).await?;
        Ok(first_capture(&settings, SPADE_PATTERN))
    }

    /// Playlist URL for `channel_login`, when the access-token operation is configured.
    async fn hls_url(&mut self, channel_login: &str) -> Result<Option<String>> {
        if !self.ops.has(PLAYBACK_ACCESS_TOKEN) {
            return Ok(None);
        }
        let response = self
            .execute(
                PLAYBACK_ACCESS_TOKEN,
                json!({
                    "isLive": true,
                    "login": channel_login,
                    "isVod": false,
                    "vodID": "",
                    "playerType": "site",
                }),
            )
            .await?;
        let Some((value, signature)) = extract_playback_token(&response) else {
            return Ok(None);
        };
        let base = format!("{}/{channel_login}.m3u8", self.usher_base.trim_end_matches('/'));
        let url = Url::parse_with_params(
            &base,
            [
                ("sig", signature.as_str()),
                ("token", value.as_str()),
                ("allow_source", "true"),
            ],
        )
        .map_err(|e| MinerError::Configuration(format!("bad url {base}: {e}")))?;
        Ok(Some(url.to_string()))
    }
}

#[async_trait]
impl DropsApi for GqlClient {
    async fn viewer_dashboard(&mut self) -> Result<Value> {
        self.execute(VIEWER_DROPS_DASHBOARD, json!({"fetchRewardCampaigns": true}))
            .await
    }

    async fn inventory(&mut self) -> Result<Value> {
        self.execute(INVENTORY, json!({})).await
    }

    async fn session_heartbeat(&mut self, channel_login: &str, channel_id: &str) -> Result<Value> {
        self.execute(
            DROP_CURRENT_SESSION_CONTEXT,
            json!({"channelLogin": channel_login, "channelID": channel_id}),
        )
        .await
    }

    async fn claim(&mut self, drop_instance_id: &str) -> Result<Value> {
        self.execute(
            CLAIM_DROP_REWARDS,
            json!({"input": {"dropInstanceID": drop_instance_id}}),
        )
        .await
    }

    async fn campaign_details(&mut self, campaign_id: &str) -> Result<Value> {
        self.execute(DROP_CAMPAIGN_DETAILS, json!({"campaignID": campaign_id}))
            .await
    }

    async fn playback_endpoints(&mut self, channel_login: &str) -> Result<PlaybackEndpoints> {
        let spade_url = self.spade_url(channel_login).await.unwrap_or_else(|e| {
            debug!("[{}] No spade url for {channel_login}: {e}", self.login);
            None
        });
        let hls_url = self.hls_url(channel_login).await.unwrap_or_else(|e| {
            debug!("[{}] No playlist for {channel_login}: {e}", self.login);
            None
        });
        Ok(PlaybackEndpoints { spade_url, hls_url })
    }

    async fn minute_watched(&mut self, spade_url: &str, channel: &ChannelBinding) -> Result<()> {
        let beacon = json!([{
            "event": "minute-watched",
            "properties": {
                "channel": channel.login,
                "channel_id": channel.id,
                "device_id": self.device_id,
                "hidden": false,
                "live": true,
                "location": "channel",
                "logged_in": true,
                "muted": false,
                "player": "site",
                "play_session_id": self.session_id,
            }
        }]);
        let encoded = general_purpose::STANDARD.encode(serde_json::to_string(&beacon)?);
        let url = self.with_session_params(spade_url, &[])?;
        let http = self.http()?;
        http.post(url)
            .form(&[("data", encoded)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn head_hls(&mut self, url: &str) -> Result<()> {
        let url = self.with_session_params(url, &[])?;
        let http = self.http()?;
        http.head(url).send().await?.error_for_status()?;
        Ok(())
    }

    fn close(&mut self) {
        if self.http.take().is_some() {
            debug!("[{}] Client closed", self.login);
        }
    }
}
