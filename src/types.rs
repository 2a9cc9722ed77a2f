use serde::{Deserialize, Serialize};

/// A reward promotion discovered on the viewer dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub game: String,
    /// Channel logins/names the campaign lists as eligible, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

/// A channel that can be "watched" for campaign credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCandidate {
    #[serde(rename = "name")]
    pub login: String,
    /// Numeric channel id; empty when the campaign detail did not carry it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub viewers: u64,
    pub live: bool,
}

/// Normalized progress of one time-based drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropProgress {
    pub drop_instance_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub required_minutes: u64,
    pub current_minutes: u64,
    #[serde(default)]
    pub claimed: bool,
}

impl DropProgress {
    /// `current / required * 100`, clamped to `[0, 100]`; zero when nothing is required.
    pub fn percent(&self) -> f64 {
        if self.required_minutes == 0 {
            return 0.0;
        }
        let pct = self.current_minutes as f64 / self.required_minutes as f64 * 100.0;
        pct.clamp(0.0, 100.0)
    }

    pub fn remaining_minutes(&self) -> u64 {
        self.required_minutes.saturating_sub(self.current_minutes)
    }

    /// Watch time has reached the threshold. A zero threshold is met at once.
    pub fn is_complete(&self) -> bool {
        self.current_minutes >= self.required_minutes
    }
}

/// Endpoints the simulated player touches alongside the GraphQL heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackEndpoints {
    pub spade_url: Option<String>,
    pub hls_url: Option<String>,
}

impl PlaybackEndpoints {
    /// Nothing was resolved.
    pub fn is_empty(&self) -> bool {
        self.spade_url.is_none() && self.hls_url.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Starting,
    Querying,
    Ready,
    /// Steady state with a channel bound for heartbeats.
    Watching,
    /// Steady state without a channel; inventory is still polled.
    Running,
    Stopped,
}

/// Worker → observer message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerEvent {
    Status {
        status: WorkerStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Campaign {
        name: String,
        game: String,
    },
    Campaigns {
        campaigns: Vec<Campaign>,
    },
    Channels {
        channels: Vec<ChannelCandidate>,
    },
    Switch {
        channel: String,
    },
    Progress {
        pct: f64,
        /// Minutes left until the drop can be claimed.
        remain: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        drop: Option<String>,
    },
    Claimed {
        drop: String,
        at: String,
    },
    Error {
        msg: String,
    },
}

/// A worker event tagged with the account that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountEvent {
    pub login: String,
    #[serde(flatten)]
    pub event: WorkerEvent,
}

/// Observer → worker instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "value", rename_all = "snake_case")]
pub enum Command {
    /// Make the first known campaign among `ids` the active one.
    SelectCampaigns(Vec<String>),
    /// Promote a channel to the front of the candidate list.
    Switch(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn progress(current: u64, required: u64) -> DropProgress {
        DropProgress {
            drop_instance_id: "d1".into(),
            name: "Drop".into(),
            campaign_id: None,
            required_minutes: required,
            current_minutes: current,
            claimed: false,
        }
    }

    #[test]
    fn percent_is_clamped() {
        for (current, required) in [(0, 1), (1, 2), (2, 2), (5, 2), (u64::MAX, 3), (7, 240)] {
            let pct = progress(current, required).percent();
            assert!((0.0..=100.0).contains(&pct), "{current}/{required} -> {pct}");
        }
        assert_eq!(progress(1, 2).percent(), 50.0);
        assert_eq!(progress(9, 2).percent(), 100.0);
    }

    #[test]
    fn zero_required_is_zero_percent_and_complete() {
        let p = progress(3, 0);
        assert_eq!(p.percent(), 0.0);
        assert_eq!(p.remaining_minutes(), 0);
        assert!(p.is_complete());
        assert!(progress(0, 0).is_complete());
        assert!(!progress(1, 2).is_complete());
    }

    #[test]
    fn remaining_never_negative() {
        assert_eq!(progress(10, 4).remaining_minutes(), 0);
        assert_eq!(progress(1, 4).remaining_minutes(), 3);
    }

    #[test]
    fn event_wire_shape() {
        let event = AccountEvent {
            login: "user1".into(),
            event: WorkerEvent::Progress {
                pct: 33.3,
                remain: 5,
                drop: Some("Drop".into()),
            },
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"login": "user1", "kind": "progress", "pct": 33.3, "remain": 5, "drop": "Drop"})
        );

        let status = WorkerEvent::Status {
            status: WorkerStatus::Ready,
            note: None,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"kind": "status", "status": "Ready"})
        );
    }

    #[test]
    fn command_wire_shape() {
        let cmd: Command =
            serde_json::from_value(json!({"cmd": "select_campaigns", "value": ["c1", "c2"]}))
                .unwrap();
        assert_eq!(cmd, Command::SelectCampaigns(vec!["c1".into(), "c2".into()]));
        let cmd: Command = serde_json::from_value(json!({"cmd": "switch", "value": "chan"})).unwrap();
        assert_eq!(cmd, Command::Switch("chan".into()));
    }
}
