use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{AccountEvent, WorkerEvent, WorkerStatus};

/// Emit a worker event as a single JSON line to stdout.
pub fn report_event(event: &AccountEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{json}");
    }
}

/// Running totals mirrored from the event stream.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Tally {
    pub claimed: u64,
    pub errors: u64,
    /// Last reported status per login.
    pub accounts: BTreeMap<String, WorkerStatus>,
}

impl Tally {
    pub fn observe(&mut self, event: &AccountEvent) {
        match &event.event {
            WorkerEvent::Claimed { .. } => self.claimed += 1,
            WorkerEvent::Error { .. } => self.errors += 1,
            WorkerEvent::Status { status, .. } => {
                self.accounts.insert(event.login.clone(), *status);
            }
            _ => {}
        }
    }
}

/// Emit the tally as pretty-printed JSON to stdout.
pub fn report_tally(tally: &Tally) {
    if let Ok(json) = serde_json::to_string_pretty(tally) {
        println!("{json}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(login: &str, event: WorkerEvent) -> AccountEvent {
        AccountEvent {
            login: login.into(),
            event,
        }
    }

    #[test]
    fn tally_counts_claims_and_errors() {
        let mut tally = Tally::default();
        tally.observe(&event(
            "a",
            WorkerEvent::Claimed {
                drop: "Drop".into(),
                at: "2026-01-01T00:00:00+00:00".into(),
            },
        ));
        tally.observe(&event("a", WorkerEvent::Error { msg: "x".into() }));
        tally.observe(&event("b", WorkerEvent::Error { msg: "y".into() }));
        tally.observe(&event(
            "b",
            WorkerEvent::Progress {
                pct: 10.0,
                remain: 9,
                drop: None,
            },
        ));
        assert_eq!(tally.claimed, 1);
        assert_eq!(tally.errors, 2);
    }

    #[test]
    fn tally_keeps_last_status() {
        let mut tally = Tally::default();
        for status in [WorkerStatus::Starting, WorkerStatus::Watching, WorkerStatus::Stopped] {
            tally.observe(&event("a", WorkerEvent::Status { status, note: None }));
        }
        assert_eq!(tally.accounts.get("a"), Some(&WorkerStatus::Stopped));
        let json = serde_json::to_value(&tally).unwrap();
        assert_eq!(json["accounts"]["a"], "Stopped");
    }
}
