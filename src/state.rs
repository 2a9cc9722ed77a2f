use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Campaign, ChannelCandidate, DropProgress, WorkerStatus};

/// Channel the heartbeat is sent for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelBinding {
    pub login: String,
    /// Numeric channel id; heartbeats are skipped while it is unknown.
    pub id: String,
}

impl From<&ChannelCandidate> for ChannelBinding {
    fn from(c: &ChannelCandidate) -> Self {
        Self {
            login: c.login.clone(),
            id: c.id.clone(),
        }
    }
}

/// What to do with a drop observed on an inventory poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Threshold reached and not yet claimed by this worker.
    Claim,
    NotReady,
    AlreadyClaimed,
    /// Claim ceiling reached earlier; never retried again.
    Abandoned,
    /// Threshold reached but the server has not issued an instance id yet.
    NoInstance,
}

/// Outcome of recording a failed claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimFailure {
    /// Still eligible on the next inventory poll.
    Retry { attempts: u32 },
    /// Ceiling reached; the drop is abandoned for this worker's lifetime.
    GaveUp { attempts: u32 },
}

/// Pick the channel to watch: the busiest live channel with viewers, else the first candidate.
pub fn select_channel(channels: &[ChannelCandidate]) -> Option<&ChannelCandidate> {
    channels
        .iter()
        .filter(|c| c.live && c.viewers > 0)
        .max_by_key(|c| c.viewers)
        .or_else(|| channels.first())
}

/// Per-account session state. Owned and mutated by the account's worker only.
#[derive(Debug)]
pub struct WorkerState {
    pub login: String,
    pub status: WorkerStatus,
    pub campaigns: Vec<Campaign>,
    pub active_campaign: Option<Campaign>,
    pub channels: Vec<ChannelCandidate>,
    pub channel: Option<ChannelBinding>,
    /// Drop instance ids this worker has successfully claimed.
    pub claimed: HashSet<String>,
    claim_attempts: HashMap<String, u32>,
    abandoned: HashSet<String>,
    max_claim_attempts: u32,
    pub last_claim_at: Option<DateTime<Utc>>,
    pub total_claims: u64,
    pub total_errors: u64,
}

/// Owned copy of the state for logging and reporting.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub login: String,
    pub status: WorkerStatus,
    pub campaign: Option<String>,
    pub channel: Option<String>,
    pub last_claim_at: Option<String>,
    pub total_claims: u64,
    pub total_errors: u64,
}

impl WorkerState {
    pub fn new(login: impl Into<String>, max_claim_attempts: u32) -> Self {
        Self {
            login: login.into(),
            status: WorkerStatus::Starting,
            campaigns: Vec::new(),
            active_campaign: None,
            channels: Vec::new(),
            channel: None,
            claimed: HashSet::new(),
            claim_attempts: HashMap::new(),
            abandoned: HashSet::new(),
            max_claim_attempts: max_claim_attempts.max(1),
            last_claim_at: None,
            total_claims: 0,
            total_errors: 0,
        }
    }

    pub fn max_claim_attempts(&self) -> u32 {
        self.max_claim_attempts
    }

    pub fn active_campaign_id(&self) -> Option<&str> {
        self.active_campaign
            .as_ref()
            .map(|c| c.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Replace the discovered campaign list. Keeps the active campaign if it
    /// is still listed, otherwise activates the first one.
    pub fn set_campaigns(&mut self, campaigns: Vec<Campaign>) {
        let keep = self
            .active_campaign
            .as_ref()
            .and_then(|active| campaigns.iter().find(|c| c.id == active.id))
            .cloned();
        self.active_campaign = keep.or_else(|| campaigns.first().cloned());
        self.campaigns = campaigns;
    }

    /// Activate the first known campaign among `ids`. Returns `false` if
    /// none of them is known.
    pub fn select_campaign(&mut self, ids: &[String]) -> bool {
        let Some(found) = ids
            .iter()
            .find_map(|id| self.campaigns.iter().find(|c| &c.id == id))
            .cloned()
        else {
            return false;
        };
        self.active_campaign = Some(found);
        true
    }

    /// Replace the candidate list and rebind the heartbeat channel.
    pub fn set_channels(&mut self, channels: Vec<ChannelCandidate>) {
        self.channel = select_channel(&channels).map(ChannelBinding::from);
        self.channels = channels;
    }

    /// Move `name` to the front of the candidate list and bind it.
    /// Returns `false` if the channel is not a known candidate.
    pub fn promote_channel(&mut self, name: &str) -> bool {
        let Some(idx) = self
            .channels
            .iter()
            .position(|c| c.login.eq_ignore_ascii_case(name))
        else {
            return false;
        };
        let chosen = self.channels.remove(idx);
        self.channel = Some(ChannelBinding::from(&chosen));
        self.channels.insert(0, chosen);
        true
    }

    /// Steady-state status implied by the current binding.
    pub fn steady_status(&self) -> WorkerStatus {
        if self.channel.is_some() {
            WorkerStatus::Watching
        } else {
            WorkerStatus::Running
        }
    }

    pub fn claim_decision(&self, drop: &DropProgress) -> ClaimDecision {
        if !drop.is_complete() {
            return ClaimDecision::NotReady;
        }
        if drop.drop_instance_id.is_empty() {
            return ClaimDecision::NoInstance;
        }
        if drop.claimed || self.claimed.contains(&drop.drop_instance_id) {
            return ClaimDecision::AlreadyClaimed;
        }
        if self.abandoned.contains(&drop.drop_instance_id) {
            return ClaimDecision::Abandoned;
        }
        ClaimDecision::Claim
    }

    /// Claimed or abandoned by this worker; never worth tracking again.
    pub fn is_settled(&self, drop_instance_id: &str) -> bool {
        self.claimed.contains(drop_instance_id) || self.abandoned.contains(drop_instance_id)
    }

    pub fn record_claim_success(&mut self, drop_instance_id: &str, at: DateTime<Utc>) {
        self.claimed.insert(drop_instance_id.to_string());
        self.claim_attempts.remove(drop_instance_id);
        self.last_claim_at = Some(at);
        self.total_claims += 1;
    }

    pub fn record_claim_failure(&mut self, drop_instance_id: &str) -> ClaimFailure {
        self.total_errors += 1;
        let attempts = self
            .claim_attempts
            .entry(drop_instance_id.to_string())
            .or_insert(0);
        *attempts += 1;
        let attempts = *attempts;
        if attempts >= self.max_claim_attempts {
            self.claim_attempts.remove(drop_instance_id);
            self.abandoned.insert(drop_instance_id.to_string());
            ClaimFailure::GaveUp { attempts }
        } else {
            ClaimFailure::Retry { attempts }
        }
    }

    pub fn record_error(&mut self) {
        self.total_errors += 1;
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            login: self.login.clone(),
            status: self.status,
            campaign: self.active_campaign.as_ref().map(|c| c.name.clone()),
            channel: self.channel.as_ref().map(|c| c.login.clone()),
            last_claim_at: self.last_claim_at.map(|t| t.to_rfc3339()),
            total_claims: self.total_claims,
            total_errors: self.total_errors,
        }
    }
}
