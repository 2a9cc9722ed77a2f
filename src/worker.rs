//! Per-account worker: discovery, then a steady loop of heartbeats,
//! jittered inventory polls, claims and control-command handling.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::DropsApi;
use crate::config::WorkerConfig;
use crate::error::{MinerError, Result};
use crate::events::{CommandQueue, EventSender};
use crate::extract::{extract_campaigns, extract_drop_progress, fallback_labels};
use crate::session::CookieStore;
use crate::state::{ChannelBinding, ClaimDecision, ClaimFailure, WorkerSnapshot, WorkerState};
use crate::types::{
    ChannelCandidate, Command, DropProgress, PlaybackEndpoints, WorkerEvent, WorkerStatus,
};

/// Shown when a campaign or game label is unknown.
pub const UNKNOWN_LABEL: &str = "—";

fn jittered(min: Duration, max: Duration) -> Duration {
    let lo = min.as_millis() as u64;
    let hi = (max.as_millis() as u64).max(lo);
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

fn label_or_unknown(label: String) -> String {
    if label.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        label
    }
}

/// Run one account until `stop` flips to `true` (or its sender is dropped).
///
/// `connect` builds the API client from the account's bearer token; it is
/// not called when no token is available. The client is closed on every
/// exit path.
pub async fn run_account<A, F>(
    login: &str,
    cookies: &CookieStore,
    connect: F,
    config: &WorkerConfig,
    events: EventSender,
    commands: CommandQueue,
    mut stop: watch::Receiver<bool>,
) -> WorkerSnapshot
where
    A: DropsApi,
    F: FnOnce(String) -> Result<A>,
{
    let mut state = WorkerState::new(login, config.max_claim_attempts);
    events.status(WorkerStatus::Starting, None);

    let connected = cookies
        .auth_token(login)
        .ok_or_else(|| MinerError::NoCredentials {
            login: login.to_string(),
        })
        .and_then(connect);
    let api = match connected {
        Ok(api) => api,
        Err(e) => {
            warn!("[{login}] {e}");
            let note = match &e {
                MinerError::NoCredentials { .. } => "no credentials",
                _ => "client setup failed",
            };
            state.record_error();
            events.error(e.to_string());
            state.status = WorkerStatus::Stopped;
            events.status(WorkerStatus::Stopped, Some(note));
            return state.snapshot();
        }
    };

    let mut api = scopeguard::guard(api, |mut api| api.close());
    let mut worker = AccountWorker {
        api: &mut *api,
        state,
        events,
        commands,
        config: config.clone(),
        endpoints: None,
    };
    worker.discover().await;
    worker.steady(&mut stop).await;
    worker.finish()
}

struct AccountWorker<'a, A: DropsApi> {
    api: &'a mut A,
    state: WorkerState,
    events: EventSender,
    commands: CommandQueue,
    config: WorkerConfig,
    /// Auxiliary endpoints for the channel they were resolved for.
    endpoints: Option<(String, PlaybackEndpoints)>,
}

impl<A: DropsApi> AccountWorker<'_, A> {
    fn login(&self) -> &str {
        &self.state.login
    }

    fn set_status(&mut self, status: WorkerStatus, note: Option<&str>) {
        self.state.status = status;
        self.events.status(status, note);
    }

    /// Log, count and publish a recoverable failure.
    fn report(&mut self, context: &str, err: &MinerError) {
        warn!("[{}] {context}: {err}", self.login());
        self.state.record_error();
        self.events.error(format!("{context}: {err}"));
    }

    async fn discover(&mut self) {
        self.set_status(WorkerStatus::Querying, Some("Fetching campaigns"));
        let dashboard = self.refresh_campaigns().await;
        self.publish_campaign(dashboard.as_ref());
        self.resolve_channels().await;
        self.set_status(WorkerStatus::Ready, Some("Campaigns discovered"));
    }

    /// Fetch the dashboard and replace the campaign list. Returns the raw
    /// dashboard for label fallbacks.
    async fn refresh_campaigns(&mut self) -> Option<Value> {
        let dashboard = match self.api.viewer_dashboard().await {
            Ok(d) => d,
            Err(e) => {
                self.report("dashboard", &e);
                return None;
            }
        };
        self.state.set_campaigns(extract_campaigns(&dashboard));
        info!(
            "[{}] Discovered {} campaign(s)",
            self.login(),
            self.state.campaigns.len()
        );
        self.events.emit(WorkerEvent::Campaigns {
            campaigns: self.state.campaigns.clone(),
        });
        Some(dashboard)
    }

    fn publish_campaign(&mut self, dashboard: Option<&Value>) {
        let (name, game) = match &self.state.active_campaign {
            Some(c) => (c.name.clone(), c.game.clone()),
            None => dashboard.and_then(fallback_labels).unwrap_or_default(),
        };
        self.events.emit(WorkerEvent::Campaign {
            name: label_or_unknown(name),
            game: label_or_unknown(game),
        });
    }

    /// Candidate channels for the active campaign, falling back to the
    /// names the campaign itself lists.
    async fn resolve_channels(&mut self) {
        let Some(campaign) = self.state.active_campaign.clone() else {
            self.state.set_channels(Vec::new());
            self.events.emit(WorkerEvent::Channels {
                channels: Vec::new(),
            });
            return;
        };
        let mut channels = Vec::new();
        if !campaign.id.is_empty() {
            match self.api.live_channels(&campaign.id).await {
                Ok(found) => channels = found,
                Err(e) => self.report("campaign details", &e),
            }
        }
        if channels.is_empty() {
            channels = campaign
                .channels
                .iter()
                .map(|name| ChannelCandidate {
                    login: name.clone(),
                    id: String::new(),
                    viewers: 0,
                    live: false,
                })
                .collect();
        }
        self.state.set_channels(channels);
        self.events.emit(WorkerEvent::Channels {
            channels: self.state.channels.clone(),
        });
    }

    fn enter_steady(&mut self) {
        let status = self.state.steady_status();
        let note = self.state.channel.as_ref().map(|c| c.login.clone());
        if let Some(channel) = &note {
            info!("[{}] Watching {channel}", self.login());
        }
        self.set_status(status, note.as_deref());
    }

    async fn steady(&mut self, stop: &mut watch::Receiver<bool>) {
        self.enter_steady();
        let tick = self.config.tick();
        let heartbeat_every = self.config.heartbeat_interval();
        let (inventory_min, inventory_max) = self.config.inventory_window();
        let mut next_heartbeat = Instant::now();
        let mut next_inventory = Instant::now();

        loop {
            if *stop.borrow() {
                break;
            }
            self.handle_commands().await;

            if Instant::now() >= next_heartbeat {
                self.heartbeat().await;
                next_heartbeat = Instant::now() + heartbeat_every;
            }
            if Instant::now() >= next_inventory {
                self.poll_inventory().await;
                next_inventory = Instant::now() + jittered(inventory_min, inventory_max);
            }

            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn handle_commands(&mut self) {
        for command in self.commands.drain() {
            match command {
                Command::SelectCampaigns(ids) => {
                    if !self.state.select_campaign(&ids) {
                        warn!("[{}] No known campaign among {ids:?}", self.login());
                        continue;
                    }
                    self.publish_campaign(None);
                    self.resolve_channels().await;
                    self.enter_steady();
                }
                Command::Switch(channel) => {
                    if self.state.promote_channel(&channel) {
                        self.events.emit(WorkerEvent::Channels {
                            channels: self.state.channels.clone(),
                        });
                    } else {
                        warn!(
                            "[{}] {channel} is not a candidate; binding unchanged",
                            self.login()
                        );
                    }
                    self.events.emit(WorkerEvent::Switch { channel });
                    self.enter_steady();
                }
            }
        }
    }

    async fn heartbeat(&mut self) {
        let Some(channel) = self.state.channel.clone() else {
            return;
        };
        if channel.id.is_empty() {
            debug!(
                "[{}] No channel id for {}, heartbeat skipped",
                self.login(),
                channel.login
            );
        } else if let Err(e) = self
            .api
            .session_heartbeat(&channel.login, &channel.id)
            .await
        {
            self.report("heartbeat", &e);
        }
        self.touch_playback(&channel).await;
    }

    /// Beacon and playlist probe alongside the heartbeat. Failures are only
    /// logged. Endpoints are cached per channel once something resolved; an
    /// empty resolution is retried on the next heartbeat.
    async fn touch_playback(&mut self, channel: &ChannelBinding) {
        let cached = match &self.endpoints {
            Some((login, cached)) if *login == channel.login => Some(cached.clone()),
            _ => None,
        };
        let endpoints = match cached {
            Some(endpoints) => endpoints,
            None => {
                let resolved = self
                    .api
                    .playback_endpoints(&channel.login)
                    .await
                    .unwrap_or_else(|e| {
                        debug!("[{}] Playback endpoints for {}: {e}", self.state.login, channel.login);
                        PlaybackEndpoints::default()
                    });
                if resolved.is_empty() {
                    self.endpoints = None;
                } else {
                    self.endpoints = Some((channel.login.clone(), resolved.clone()));
                }
                resolved
            }
        };
        if let Some(url) = &endpoints.spade_url
            && let Err(e) = self.api.minute_watched(url, channel).await
        {
            debug!("[{}] minute-watched beacon failed: {e}", self.login());
        }
        if let Some(url) = &endpoints.hls_url
            && let Err(e) = self.api.head_hls(url).await
        {
            debug!("[{}] playlist probe failed: {e}", self.login());
        }
    }

    async fn poll_inventory(&mut self) {
        if self.state.campaigns.is_empty()
            && let Some(dashboard) = self.refresh_campaigns().await
            && !self.state.campaigns.is_empty()
        {
            self.publish_campaign(Some(&dashboard));
            self.resolve_channels().await;
            self.enter_steady();
        }

        let inventory = match self.api.inventory().await {
            Ok(v) => v,
            Err(e) => {
                self.report("inventory", &e);
                return;
            }
        };
        let Some(drop) = extract_drop_progress(&inventory, self.state.active_campaign_id(), |id| {
            self.state.is_settled(id)
        }) else {
            debug!("[{}] No drop in progress", self.login());
            return;
        };

        self.events.emit(WorkerEvent::Progress {
            pct: drop.percent(),
            remain: drop.remaining_minutes(),
            drop: (!drop.name.is_empty()).then(|| drop.name.clone()),
        });

        match self.state.claim_decision(&drop) {
            ClaimDecision::Claim => self.claim(&drop).await,
            ClaimDecision::NoInstance => debug!(
                "[{}] {} complete but has no instance id yet",
                self.login(),
                drop.name
            ),
            ClaimDecision::NotReady | ClaimDecision::AlreadyClaimed | ClaimDecision::Abandoned => {}
        }
    }

    async fn claim(&mut self, drop: &DropProgress) {
        let label = if drop.name.is_empty() {
            drop.drop_instance_id.clone()
        } else {
            drop.name.clone()
        };
        match self.api.claim(&drop.drop_instance_id).await {
            Ok(_) => {
                let at = Utc::now();
                self.state.record_claim_success(&drop.drop_instance_id, at);
                info!("[{}] Claimed {label}", self.login());
                self.events.emit(WorkerEvent::Claimed {
                    drop: label,
                    at: at.to_rfc3339(),
                });
            }
            Err(e) => {
                let max = self.state.max_claim_attempts();
                let msg = match self.state.record_claim_failure(&drop.drop_instance_id) {
                    ClaimFailure::Retry { attempts } => {
                        format!("claim {label} failed (attempt {attempts}/{max}): {e}")
                    }
                    ClaimFailure::GaveUp { attempts } => {
                        format!("claim {label} abandoned after {attempts} attempts: {e}")
                    }
                };
                warn!("[{}] {msg}", self.login());
                self.events.error(msg);
            }
        }
    }

    fn finish(mut self) -> WorkerSnapshot {
        let note = format!(
            "claims={} errors={}",
            self.state.total_claims, self.state.total_errors
        );
        info!("[{}] Stopped ({note})", self.login());
        self.set_status(WorkerStatus::Stopped, Some(&note));
        self.state.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CommandSender, EventStream, control_channel, event_channel};
    use crate::types::AccountEvent;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Calls {
        dashboard: u32,
        inventory: u32,
        details: Vec<String>,
        heartbeats: Vec<String>,
        claims: Vec<String>,
        playback: u32,
        spade: u32,
        hls: u32,
        closed: u32,
    }

    type InventoryFn = Box<dyn FnMut(u32) -> Result<Value> + Send>;

    struct StubApi {
        calls: Arc<Mutex<Calls>>,
        dashboard: Value,
        channels: HashMap<String, Vec<ChannelCandidate>>,
        inventory: InventoryFn,
        failing_claims: u32,
        /// Playback resolutions that come back empty before one succeeds.
        empty_playback: u32,
    }

    fn api_error(op: &str) -> MinerError {
        MinerError::Api {
            operation: op.to_string(),
            errors: json!([{"message": "boom"}]),
        }
    }

    #[async_trait]
    impl DropsApi for StubApi {
        async fn viewer_dashboard(&mut self) -> Result<Value> {
            self.calls.lock().unwrap().dashboard += 1;
            Ok(self.dashboard.clone())
        }

        async fn inventory(&mut self) -> Result<Value> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.inventory += 1;
                calls.inventory
            };
            (self.inventory)(n)
        }

        async fn session_heartbeat(&mut self, channel_login: &str, _id: &str) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .heartbeats
                .push(channel_login.to_string());
            Ok(json!({"data": {}}))
        }

        async fn claim(&mut self, drop_instance_id: &str) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .claims
                .push(drop_instance_id.to_string());
            if self.failing_claims > 0 {
                return Err(api_error("DropsPage_ClaimDropRewards"));
            }
            Ok(json!({"data": {}}))
        }

        async fn campaign_details(&mut self, campaign_id: &str) -> Result<Value> {
            Ok(json!({"campaign": campaign_id}))
        }

        async fn live_channels(&mut self, campaign_id: &str) -> Result<Vec<ChannelCandidate>> {
            self.calls
                .lock()
                .unwrap()
                .details
                .push(campaign_id.to_string());
            Ok(self.channels.get(campaign_id).cloned().unwrap_or_default())
        }

        async fn playback_endpoints(&mut self, _login: &str) -> Result<PlaybackEndpoints> {
            self.calls.lock().unwrap().playback += 1;
            if self.empty_playback > 0 {
                self.empty_playback -= 1;
                return Ok(PlaybackEndpoints::default());
            }
            Ok(PlaybackEndpoints {
                spade_url: Some("http://spade.test".into()),
                hls_url: Some("http://usher.test/playlist.m3u8".into()),
            })
        }

        async fn minute_watched(&mut self, _url: &str, _channel: &ChannelBinding) -> Result<()> {
            self.calls.lock().unwrap().spade += 1;
            Ok(())
        }

        async fn head_hls(&mut self, _url: &str) -> Result<()> {
            self.calls.lock().unwrap().hls += 1;
            Err(MinerError::Status {
                operation: "hls".into(),
                status: 404,
                body: String::new(),
            })
        }

        fn close(&mut self) {
            self.calls.lock().unwrap().closed += 1;
        }
    }

    fn channel(login: &str, id: &str, viewers: u64) -> ChannelCandidate {
        ChannelCandidate {
            login: login.to_string(),
            id: id.to_string(),
            viewers,
            live: viewers > 0,
        }
    }

    fn dashboard() -> Value {
        json!({
            "data": {"viewer": {"dropsDashboard": {"currentCampaigns": [
                {"id": "camp1", "name": "Camp One", "game": {"name": "Game One"}},
                {"id": "camp2", "name": "Camp Two", "game": {"name": "Game Two"}}
            ]}}}
        })
    }

    fn flat_drop(current: u64) -> Value {
        json!({
            "requiredMinutesWatched": 2,
            "currentMinutesWatched": current,
            "dropInstanceID": "d1",
            "name": "Drop",
        })
    }

    fn two_ready_drops() -> Value {
        json!({
            "data": {"currentUser": {"inventory": {"dropCampaignsInProgress": [
                {"id": "camp1", "timeBasedDrops": [
                    {"name": "First", "requiredMinutesWatched": 10,
                     "self": {"currentMinutesWatched": 10, "dropInstanceID": "ia", "isClaimed": false}},
                    {"name": "Second", "requiredMinutesWatched": 10,
                     "self": {"currentMinutesWatched": 10, "dropInstanceID": "ib", "isClaimed": false}}
                ]}
            ]}}}
        })
    }

    fn stub(calls: &Arc<Mutex<Calls>>, inventory: InventoryFn) -> StubApi {
        StubApi {
            calls: calls.clone(),
            dashboard: dashboard(),
            channels: HashMap::from([
                (
                    "camp1".to_string(),
                    vec![channel("big", "1", 50), channel("small", "2", 5)],
                ),
                ("camp2".to_string(), vec![channel("other", "3", 7)]),
            ]),
            inventory,
            failing_claims: 0,
            empty_playback: 0,
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            heartbeat_secs: 60,
            inventory_min_secs: 120,
            inventory_max_secs: 120,
            tick_millis: 1000,
            max_claim_attempts: 5,
        }
    }

    fn cookies_with_token(dir: &tempfile::TempDir) -> CookieStore {
        let store = CookieStore::new(dir.path());
        std::fs::write(
            store.path_for("user"),
            r#"[{"name": "auth-token", "value": "tok"}]"#,
        )
        .unwrap();
        store
    }

    struct Harness {
        stream: EventStream,
        commands: CommandSender,
        stop: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<WorkerSnapshot>,
        _dir: tempfile::TempDir,
    }

    fn spawn(api: StubApi, config: WorkerConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cookies = cookies_with_token(&dir);
        let (sink, stream) = event_channel();
        let (commands, queue) = control_channel();
        let (stop, stop_rx) = watch::channel(false);
        let events = sink.for_account("user");
        let handle = tokio::spawn(async move {
            run_account(
                "user",
                &cookies,
                move |_token| Ok(api),
                &config,
                events,
                queue,
                stop_rx,
            )
            .await
        });
        Harness {
            stream,
            commands,
            stop,
            handle,
            _dir: dir,
        }
    }

    impl Harness {
        async fn finish(mut self) -> (WorkerSnapshot, Vec<WorkerEvent>) {
            self.stop.send(true).unwrap();
            let snapshot = self.handle.await.unwrap();
            let events = self
                .stream
                .drain()
                .into_iter()
                .map(|AccountEvent { login, event }| {
                    assert_eq!(login, "user");
                    event
                })
                .collect();
            (snapshot, events)
        }
    }

    fn progress_pcts(events: &[WorkerEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Progress { pct, .. } => Some(*pct),
                _ => None,
            })
            .collect()
    }

    fn errors(events: &[WorkerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Error { msg } => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn progress_then_single_claim() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let api = stub(&calls, Box::new(|n| Ok(flat_drop(n as u64))));
        let harness = spawn(api, config());
        tokio::time::sleep(Duration::from_secs(250)).await;
        let (snapshot, events) = harness.finish().await;

        // The third poll skips the drop already claimed.
        assert_eq!(progress_pcts(&events), vec![50.0, 100.0]);
        let full = events
            .iter()
            .position(|e| matches!(e, WorkerEvent::Progress { pct, .. } if *pct == 100.0))
            .expect("full progress");
        assert!(matches!(&events[full + 1], WorkerEvent::Claimed { drop, .. } if drop == "Drop"));
        let claimed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::Claimed { .. }))
            .collect();
        assert_eq!(claimed.len(), 1);
        assert!(matches!(claimed[0], WorkerEvent::Claimed { drop, .. } if drop == "Drop"));
        assert!(errors(&events).is_empty(), "{events:?}");
        assert_eq!(snapshot.total_claims, 1);
        assert!(snapshot.last_claim_at.is_some());

        let calls = calls.lock().unwrap();
        assert_eq!(calls.claims, vec!["d1".to_string()]);
        assert_eq!(calls.inventory, 3);
        assert!(calls.heartbeats.len() >= 4);
        assert!(calls.heartbeats.iter().all(|c| c == "big"));
        assert_eq!(calls.spade as usize, calls.heartbeats.len());
        assert_eq!(calls.hls as usize, calls.heartbeats.len());
        assert_eq!(calls.closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_publishes_in_order() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let api = stub(&calls, Box::new(|_| Ok(json!({}))));
        let harness = spawn(api, config());
        tokio::time::sleep(Duration::from_secs(1)).await;
        let (snapshot, events) = harness.finish().await;

        let statuses: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Status { status, .. } => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                WorkerStatus::Starting,
                WorkerStatus::Querying,
                WorkerStatus::Ready,
                WorkerStatus::Watching,
                WorkerStatus::Stopped,
            ]
        );
        assert!(matches!(&events[2], WorkerEvent::Campaigns { campaigns } if campaigns.len() == 2));
        assert_eq!(
            events[3],
            WorkerEvent::Campaign {
                name: "Camp One".into(),
                game: "Game One".into()
            }
        );
        assert!(matches!(&events[4], WorkerEvent::Channels { channels } if channels[0].login == "big"));
        assert_eq!(snapshot.campaign.as_deref(), Some("Camp One"));
        assert_eq!(snapshot.status, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn missing_credentials_stop_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = CookieStore::new(dir.path());
        let (sink, mut stream) = event_channel();
        let (_commands, queue) = control_channel();
        let (_stop, stop_rx) = watch::channel(false);
        let mut connected = false;

        let snapshot = run_account(
            "ghost",
            &cookies,
            |_token: String| -> Result<StubApi> {
                connected = true;
                Err(MinerError::Configuration("unreachable".into()))
            },
            &config(),
            sink.for_account("ghost"),
            queue,
            stop_rx,
        )
        .await;

        assert!(!connected);
        let events: Vec<_> = stream.drain().into_iter().map(|e| e.event).collect();
        assert_eq!(errors(&events).len(), 1);
        assert!(errors(&events)[0].contains("ghost"));
        assert_eq!(
            events.last(),
            Some(&WorkerEvent::Status {
                status: WorkerStatus::Stopped,
                note: Some("no credentials".into()),
            })
        );
        assert_eq!(snapshot.status, WorkerStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn select_campaigns_republishes() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let api = stub(&calls, Box::new(|_| Ok(json!({}))));
        let harness = spawn(api, config());
        tokio::time::sleep(Duration::from_secs(5)).await;
        harness
            .commands
            .send(Command::SelectCampaigns(vec!["nope".into(), "camp2".into()]));
        tokio::time::sleep(Duration::from_secs(125)).await;
        let (snapshot, events) = harness.finish().await;

        let idx = events
            .iter()
            .position(|e| {
                *e == WorkerEvent::Campaign {
                    name: "Camp Two".into(),
                    game: "Game Two".into(),
                }
            })
            .expect("campaign republished");
        assert!(matches!(
            &events[idx + 1],
            WorkerEvent::Channels { channels } if channels[0].login == "other"
        ));
        assert_eq!(snapshot.campaign.as_deref(), Some("Camp Two"));
        assert_eq!(snapshot.channel.as_deref(), Some("other"));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.details, vec!["camp1", "camp2"]);
        // Heartbeats at 0s, 60s and 120s; the command did not shift the cadence.
        assert_eq!(calls.heartbeats, vec!["big", "other", "other"]);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_promotes_and_rebinds_heartbeat() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let api = stub(&calls, Box::new(|_| Ok(json!({}))));
        let harness = spawn(api, config());
        tokio::time::sleep(Duration::from_secs(5)).await;
        harness.commands.send(Command::Switch("small".into()));
        tokio::time::sleep(Duration::from_secs(60)).await;
        let (snapshot, events) = harness.finish().await;

        let idx = events
            .iter()
            .position(|e| matches!(e, WorkerEvent::Switch { channel } if channel == "small"))
            .expect("switch event");
        assert!(matches!(
            &events[idx - 1],
            WorkerEvent::Channels { channels } if channels[0].login == "small" && channels.len() == 2
        ));
        assert_eq!(snapshot.channel.as_deref(), Some("small"));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.heartbeats.first().map(String::as_str), Some("big"));
        assert_eq!(calls.heartbeats.last().map(String::as_str), Some("small"));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_claim_is_abandoned_at_ceiling() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut api = stub(&calls, Box::new(|_| Ok(flat_drop(2))));
        api.failing_claims = u32::MAX;
        let mut cfg = config();
        cfg.max_claim_attempts = 3;
        let harness = spawn(api, cfg);
        tokio::time::sleep(Duration::from_secs(5 * 120 + 10)).await;
        let (snapshot, events) = harness.finish().await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.claims.len(), 3);
        assert!(calls.inventory >= 5);
        let errors = errors(&events);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.iter().filter(|m| m.contains("abandoned")).count(), 1);
        assert!(!events.iter().any(|e| matches!(e, WorkerEvent::Claimed { .. })));
        assert_eq!(snapshot.total_claims, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_drop_does_not_block_the_next() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let api = stub(&calls, Box::new(|_| Ok(two_ready_drops())));
        let harness = spawn(api, config());
        tokio::time::sleep(Duration::from_secs(250)).await;
        let (snapshot, events) = harness.finish().await;

        assert_eq!(calls.lock().unwrap().claims, vec!["ia", "ib"]);
        let claimed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Claimed { drop, .. } => Some(drop.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(claimed, vec!["First", "Second"]);
        assert_eq!(snapshot.total_claims, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_drop_does_not_block_the_next() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut api = stub(&calls, Box::new(|_| Ok(two_ready_drops())));
        api.failing_claims = u32::MAX;
        let mut cfg = config();
        cfg.max_claim_attempts = 2;
        let harness = spawn(api, cfg);
        tokio::time::sleep(Duration::from_secs(5 * 120 + 10)).await;
        let (_snapshot, events) = harness.finish().await;

        let calls = calls.lock().unwrap();
        assert!(calls.inventory >= 5);
        assert_eq!(calls.claims, vec!["ia", "ia", "ib", "ib"]);
        let errors = errors(&events);
        assert_eq!(errors.iter().filter(|m| m.contains("abandoned")).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_playback_resolution_is_retried() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut api = stub(&calls, Box::new(|_| Ok(json!({}))));
        api.empty_playback = 1;
        let harness = spawn(api, config());
        tokio::time::sleep(Duration::from_secs(130)).await;
        harness.finish().await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.heartbeats.len(), 3);
        // Resolved again at 60s, then served from cache at 120s.
        assert_eq!(calls.playback, 2);
        assert_eq!(calls.spade, 2);
        assert_eq!(calls.hls, 2);
    }

    #[tokio::test]
    async fn connect_failure_names_the_cause() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = cookies_with_token(&dir);
        let (sink, mut stream) = event_channel();
        let (_commands, queue) = control_channel();
        let (_stop, stop_rx) = watch::channel(false);

        let snapshot = run_account(
            "user",
            &cookies,
            |_token: String| -> Result<StubApi> {
                Err(MinerError::Configuration("invalid proxy url".into()))
            },
            &config(),
            sink.for_account("user"),
            queue,
            stop_rx,
        )
        .await;

        let events: Vec<_> = stream.drain().into_iter().map(|e| e.event).collect();
        assert!(errors(&events)[0].contains("invalid proxy url"));
        assert_eq!(
            events.last(),
            Some(&WorkerEvent::Status {
                status: WorkerStatus::Stopped,
                note: Some("client setup failed".into()),
            })
        );
        assert_eq!(snapshot.total_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_state_errors_do_not_stop_the_loop() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let api = stub(&calls, Box::new(|_| Err(api_error("Inventory"))));
        let harness = spawn(api, config());
        tokio::time::sleep(Duration::from_secs(250)).await;
        let (snapshot, events) = harness.finish().await;

        assert_eq!(calls.lock().unwrap().inventory, 3);
        assert_eq!(errors(&events).len(), 3);
        assert!(errors(&events)[0].starts_with("inventory"));
        assert_eq!(snapshot.total_errors, 3);
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Status {
                status: WorkerStatus::Stopped,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn no_campaigns_runs_without_channel() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut api = stub(&calls, Box::new(|_| Ok(json!({}))));
        api.dashboard = json!({"data": {"viewer": {"dropsDashboard": {"currentCampaigns": []}}}});
        let harness = spawn(api, config());
        tokio::time::sleep(Duration::from_secs(130)).await;
        let (snapshot, events) = harness.finish().await;

        assert!(events.contains(&WorkerEvent::Campaign {
            name: UNKNOWN_LABEL.into(),
            game: UNKNOWN_LABEL.into(),
        }));
        assert!(events.contains(&WorkerEvent::Status {
            status: WorkerStatus::Running,
            note: None,
        }));
        let calls = calls.lock().unwrap();
        assert!(calls.heartbeats.is_empty());
        // Re-queried at each inventory poll while nothing is known.
        assert_eq!(calls.dashboard, 3);
        assert!(snapshot.channel.is_none());
    }
}
