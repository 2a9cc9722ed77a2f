//! Best-effort extraction from the private API's loosely-typed responses.
//!
//! Field names and nesting drift between web-client releases, so every
//! extractor runs an ordered list of shape matchers, each returning
//! `Option`, followed by a breadth-first scan of the whole tree. All
//! accessors are total: a missing key is `None`, never a panic.

use std::collections::VecDeque;

use regex::Regex;
use serde_json::Value;

use crate::types::{Campaign, ChannelCandidate, DropProgress};

const REQUIRED_KEY: &str = "requiredMinutesWatched";
const CURRENT_KEY: &str = "currentMinutesWatched";
const INSTANCE_KEY: &str = "dropInstanceID";

// ── total accessors ────────────────────────────────────────────────

/// First present, non-null value among `keys`.
pub fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let obj = value.as_object()?;
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Follow a path of object keys.
pub fn path<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .try_fold(value, |v, k| v.as_object()?.get(*k))
        .filter(|v| !v.is_null())
}

/// First non-empty string (numbers are stringified) among `keys`.
pub fn text(value: &Value, keys: &[&str]) -> Option<String> {
    let obj = value.as_object()?;
    keys.iter().filter_map(|k| obj.get(*k)).find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Non-negative integer among `keys`; accepts floats and numeric strings.
pub fn uint(value: &Value, keys: &[&str]) -> Option<u64> {
    let obj = value.as_object()?;
    keys.iter().filter_map(|k| obj.get(*k)).find_map(as_uint)
}

fn as_uint(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i.max(0) as u64))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Non-empty array of objects at `keys`.
fn object_list<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    let obj = value.as_object()?;
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_array))
        .find(|list| list.iter().any(Value::is_object))
}

/// Strip a `data` envelope if present.
fn payload(value: &Value) -> &Value {
    path(value, &["data"]).unwrap_or(value)
}

/// Breadth-first walk yielding nodes for which `matches` holds.
///
/// Matched nodes are not descended into. Uses an explicit queue so depth is
/// bounded by memory, not the call stack.
fn scan<'a>(root: &'a Value, matches: impl Fn(&Value) -> bool) -> Vec<&'a Value> {
    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        if matches(node) {
            found.push(node);
            continue;
        }
        match node {
            Value::Object(obj) => queue.extend(obj.values()),
            Value::Array(items) => queue.extend(items.iter()),
            _ => {}
        }
    }
    found
}

fn scan_first<'a>(root: &'a Value, matches: impl Fn(&Value) -> bool) -> Option<&'a Value> {
    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        if matches(node) {
            return Some(node);
        }
        match node {
            Value::Object(obj) => queue.extend(obj.values()),
            Value::Array(items) => queue.extend(items.iter()),
            _ => {}
        }
    }
    None
}

// ── campaigns ──────────────────────────────────────────────────────

const CAMPAIGN_LIST_KEYS: &[&str] = &[
    "currentCampaigns",
    "availableCampaigns",
    "campaigns",
    "dropCampaigns",
];

/// `data.{viewer|currentUser}.{dropsDashboard|drops}.<list>`
fn campaigns_under_dashboard(root: &Value) -> Option<&Vec<Value>> {
    let user = field(root, &["viewer", "currentUser"])?;
    let dashboard = field(user, &["dropsDashboard", "drops"]).unwrap_or(user);
    object_list(dashboard, CAMPAIGN_LIST_KEYS)
}

/// `data.<list>` (highlight service and older dashboard builds).
fn campaigns_at_top(root: &Value) -> Option<&Vec<Value>> {
    object_list(root, CAMPAIGN_LIST_KEYS)
}

fn looks_like_campaign(node: &Value) -> bool {
    node.is_object()
        && text(node, &["id", "campaignID", "campaignId"]).is_some()
        && text(node, &["name", "displayName"]).is_some()
        && field(node, &["game", "gameTitle", "timeBasedDrops"]).is_some()
}

fn game_name(node: &Value) -> Option<String> {
    match field(node, &["game", "gameTitle"])? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        game => text(game, &["displayName", "name"]),
    }
}

fn allowed_channels(node: &Value) -> Vec<String> {
    let list = path(node, &["allow", "channels"])
        .or_else(|| field(node, &["allowlistedChannels", "channels"]))
        .and_then(Value::as_array);
    list.map(|items| {
        items
            .iter()
            .filter_map(|c| match c {
                Value::String(s) => Some(s.clone()),
                other => text(other, &["login", "name", "displayName"]),
            })
            .collect()
    })
    .unwrap_or_default()
}

fn campaign_from(node: &Value) -> Campaign {
    let id = text(node, &["id", "campaignID", "campaignId"]).unwrap_or_default();
    let mut name = text(node, &["name", "displayName"]).unwrap_or_else(|| id.clone());
    let mut game = game_name(node).unwrap_or_default();
    if name.is_empty() || game.is_empty() {
        if let Some((fallback_name, fallback_game)) = fallback_labels(node) {
            if name.is_empty() {
                name = fallback_name;
            }
            if game.is_empty() {
                game = fallback_game;
            }
        }
    }
    Campaign {
        id,
        name,
        game,
        channels: allowed_channels(node),
    }
}

/// Normalized campaign list from a viewer-dashboard response.
///
/// Tries the known nestings first, then scans the whole tree for
/// campaign-shaped objects. An empty result means "nothing found".
pub fn extract_campaigns(response: &Value) -> Vec<Campaign> {
    let root = payload(response);
    let structured = campaigns_under_dashboard(root).or_else(|| campaigns_at_top(root));
    let nodes: Vec<&Value> = match structured {
        Some(list) => list.iter().filter(|c| c.is_object()).collect(),
        None => scan(root, looks_like_campaign),
    };
    nodes.into_iter().map(campaign_from).collect()
}

fn first_capture(txt: &str, patterns: &[&str]) -> Option<String> {
    patterns.iter().find_map(|p| {
        Regex::new(p)
            .ok()?
            .captures(txt)?
            .get(1)
            .map(|m| m.as_str().to_string())
    })
}

/// Last-resort `(name, game)` labels pulled straight from the serialized text.
///
/// Loose on purpose: a wrong or missing match only affects what the
/// observer displays.
pub fn fallback_labels(value: &Value) -> Option<(String, String)> {
    let txt = serde_json::to_string(value).ok()?;
    let name = first_capture(
        &txt,
        &[
            r#""displayName"\s*:\s*"([^"]+)""#,
            r#""name"\s*:\s*"([^"]+)""#,
        ],
    );
    let game = first_capture(
        &txt,
        &[
            r#""gameTitle"\s*:\s*\{[^}]*"displayName"\s*:\s*"([^"]+)""#,
            r#""game"\s*:\s*\{[^}]*"name"\s*:\s*"([^"]+)""#,
        ],
    );
    match (name, game) {
        (None, None) => None,
        (name, game) => Some((name.unwrap_or_default(), game.unwrap_or_default())),
    }
}

// ── channels ───────────────────────────────────────────────────────

fn channel_from(entry: &Value) -> Option<ChannelCandidate> {
    let chan = field(entry, &["channel"]).filter(|c| c.is_object()).unwrap_or(entry);
    let id = text(chan, &["id"]).unwrap_or_default();
    let login = text(chan, &["login", "name", "displayName"]).unwrap_or_else(|| id.clone());
    if login.is_empty() {
        return None;
    }
    let stream = field(chan, &["stream"]).filter(|s| s.is_object());
    let viewers = stream
        .and_then(|s| uint(s, &["viewersCount", "viewers"]))
        .unwrap_or(0);
    Some(ChannelCandidate {
        login,
        id,
        viewers,
        live: stream.is_some(),
    })
}

/// Candidate channels from a campaign-detail response, most viewers first.
pub fn extract_channels(response: &Value) -> Vec<ChannelCandidate> {
    let root = payload(response);
    let campaign = field(root, &["campaign", "dropsCampaign"])
        .or_else(|| path(root, &["user", "dropCampaign"]));
    let Some(campaign) = campaign else {
        return Vec::new();
    };
    let list = field(campaign, &["availableChannels", "channels"])
        .or_else(|| path(campaign, &["allow", "channels"]))
        .and_then(Value::as_array);
    let mut channels: Vec<ChannelCandidate> = list
        .map(|items| items.iter().filter_map(channel_from).collect())
        .unwrap_or_default();
    channels.sort_by(|a, b| b.viewers.cmp(&a.viewers));
    channels
}

// ── drop progress ──────────────────────────────────────────────────

fn is_hallmark_node(node: &Value) -> bool {
    node.as_object().is_some_and(|obj| {
        obj.contains_key(REQUIRED_KEY)
            && obj.contains_key(CURRENT_KEY)
            && obj.contains_key(INSTANCE_KEY)
    })
}

fn drop_name(node: &Value) -> String {
    text(node, &["name"])
        .or_else(|| {
            field(node, &["benefitEdges"])
                .and_then(Value::as_array)
                .and_then(|edges| edges.first())
                .and_then(|edge| path(edge, &["benefit"]))
                .and_then(|b| text(b, &["name"]))
        })
        .or_else(|| text(node, &["id"]))
        .unwrap_or_default()
}

/// A `timeBasedDrops` entry whose progress sits under `self`.
fn structured_drop(drop: &Value, campaign_id: Option<&str>) -> Option<DropProgress> {
    let required = uint(drop, &[REQUIRED_KEY])?;
    let progress = field(drop, &["self"]).unwrap_or(drop);
    let current = uint(progress, &[CURRENT_KEY]).unwrap_or(0);
    let instance = text(progress, &[INSTANCE_KEY])
        .or_else(|| text(drop, &[INSTANCE_KEY]))
        .unwrap_or_default();
    let claimed = field(progress, &["isClaimed"])
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some(DropProgress {
        drop_instance_id: instance,
        name: drop_name(drop),
        campaign_id: campaign_id.map(str::to_string),
        required_minutes: required,
        current_minutes: current,
        claimed,
    })
}

fn drops_in_progress(root: &Value) -> Vec<DropProgress> {
    let inventory = path(root, &["currentUser", "inventory"])
        .or_else(|| path(root, &["viewer", "inventory"]))
        .or_else(|| field(root, &["inventory"]));
    let Some(campaigns) = inventory
        .and_then(|inv| object_list(inv, &["dropCampaignsInProgress", "campaigns"]))
    else {
        return Vec::new();
    };
    campaigns
        .iter()
        .flat_map(|camp| {
            let id = text(camp, &["id"]);
            field(camp, &["timeBasedDrops"])
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(move |d| structured_drop(d, id.as_deref()))
        })
        .collect()
}

fn pick_drop(
    drops: Vec<DropProgress>,
    campaign_id: Option<&str>,
    settled: &impl Fn(&str) -> bool,
) -> Option<DropProgress> {
    let in_campaign = |d: &DropProgress| match campaign_id {
        Some(id) => d.campaign_id.as_deref() == Some(id),
        None => true,
    };
    let open: Vec<DropProgress> = drops
        .into_iter()
        .filter(|d| {
            !d.claimed && (d.drop_instance_id.is_empty() || !settled(d.drop_instance_id.as_str()))
        })
        .collect();
    let preferred: Vec<&DropProgress> = {
        let scoped: Vec<&DropProgress> = open.iter().filter(|d| in_campaign(*d)).collect();
        if scoped.is_empty() {
            open.iter().collect()
        } else {
            scoped
        }
    };
    preferred
        .iter()
        .find(|d| d.is_complete() && !d.drop_instance_id.is_empty())
        .or_else(|| preferred.first())
        .map(|d| (*d).clone())
}

/// The time-based drop to track for `campaign_id` (any campaign when `None`
/// or when the campaign has no open drop).
///
/// Claim-ready drops win over in-progress ones. Drops whose instance id
/// `settled` accepts (already claimed or given up by the caller) are
/// skipped. Falls back to the shallowest, leftmost object carrying all
/// three hallmark keys.
pub fn extract_drop_progress(
    response: &Value,
    campaign_id: Option<&str>,
    settled: impl Fn(&str) -> bool,
) -> Option<DropProgress> {
    let root = payload(response);
    if let Some(found) = pick_drop(drops_in_progress(root), campaign_id, &settled) {
        return Some(found);
    }
    let node = scan_first(response, |node| {
        is_hallmark_node(node)
            && text(node, &[INSTANCE_KEY]).is_none_or(|id| !settled(id.as_str()))
    })?;
    Some(DropProgress {
        drop_instance_id: text(node, &[INSTANCE_KEY]).unwrap_or_default(),
        name: drop_name(node),
        campaign_id: None,
        required_minutes: uint(node, &[REQUIRED_KEY]).unwrap_or(0),
        current_minutes: uint(node, &[CURRENT_KEY]).unwrap_or(0),
        claimed: field(node, &["isClaimed"])
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// `(value, signature)` of a playback access token response.
pub fn extract_playback_token(response: &Value) -> Option<(String, String)> {
    let token = path(payload(response), &["streamPlaybackAccessToken"])?;
    Some((text(token, &["value"])?, text(token, &["signature"])?))
}
