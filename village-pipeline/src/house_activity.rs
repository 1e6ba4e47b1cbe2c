//! Debounced, webhook-driven indicator state machine (spec §4.7). Every
//! repo gets up to three indicators (`lights`, `banner`, `smoke`), each with
//! its own TTL and min-visible window; external webhook payloads become
//! `Transition`s, and every state change is coalesced into at most one
//! broadcast per repo per `broadcast_coalesce_ms` window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use village_common::events::HouseActivityEvent;
use village_common::ids::{RepoId, VillageId};
use village_common::model::{HouseActivity, Indicator, IndicatorKind};

use crate::broadcast::BroadcastSink;
use crate::event_bus::EventBus;
use crate::scheduler::TimerHandle;

/// One logical state-change request, the common shape every webhook
/// mapping (spec §4.7) reduces to before being applied.
#[derive(Debug, Clone)]
pub struct Transition {
    pub repo_id: RepoId,
    pub village_id: Option<VillageId>,
    pub kind: IndicatorKind,
    pub on: bool,
    pub source: Option<String>,
    pub pr_number: Option<u64>,
    pub build_status: Option<String>,
}

impl Transition {
    pub fn push(repo_id: RepoId, village_id: Option<VillageId>, after_sha: impl Into<String>) -> Self {
        Self {
            repo_id,
            village_id,
            kind: IndicatorKind::Lights,
            on: true,
            source: Some(format!("push:{}", after_sha.into())),
            pr_number: None,
            build_status: None,
        }
    }

    /// `action` is the webhook's `pull_request.action` field. Returns
    /// `None` for actions this core doesn't react to.
    pub fn pull_request(repo_id: RepoId, village_id: Option<VillageId>, action: &str, pr_number: u64) -> Option<Self> {
        let on = match action {
            "opened" | "reopened" | "ready_for_review" | "synchronize" => true,
            "closed" => false,
            _ => return None,
        };
        Some(Self {
            repo_id,
            village_id,
            kind: IndicatorKind::Banner,
            on,
            source: Some("pull_request".to_string()),
            pr_number: Some(pr_number),
            build_status: None,
        })
    }

    /// `action` is `check_run.action`; `conclusion` is only present when
    /// `action == "completed"`.
    pub fn check_run(repo_id: RepoId, village_id: Option<VillageId>, action: &str, conclusion: Option<&str>) -> Option<Self> {
        match action {
            "created" | "in_progress" | "rerequested" => Some(Self {
                repo_id,
                village_id,
                kind: IndicatorKind::Smoke,
                on: true,
                source: Some("check_run".to_string()),
                pr_number: None,
                build_status: Some("in_progress".to_string()),
            }),
            "completed" => {
                let status = if conclusion == Some("success") { "passed" } else { "failed" };
                Some(Self {
                    repo_id,
                    village_id,
                    kind: IndicatorKind::Smoke,
                    on: false,
                    source: Some("check_run".to_string()),
                    pr_number: None,
                    build_status: Some(status.to_string()),
                })
            }
            _ => None,
        }
    }
}

struct HouseEntry {
    activity: HouseActivity,
    village_id: Option<VillageId>,
    expiry_timers: HashMap<IndicatorKind, TimerHandle>,
    off_delay_timers: HashMap<IndicatorKind, TimerHandle>,
    coalesce_timer: Option<TimerHandle>,
    dirty: bool,
}

impl HouseEntry {
    fn new(repo_id: RepoId, village_id: Option<VillageId>) -> Self {
        Self {
            activity: HouseActivity::new(repo_id, village_id.clone()),
            village_id,
            expiry_timers: HashMap::new(),
            off_delay_timers: HashMap::new(),
            coalesce_timer: None,
            dirty: false,
        }
    }
}

pub struct HouseActivityCore {
    entries: Mutex<HashMap<RepoId, HouseEntry>>,
    sink: Arc<dyn BroadcastSink>,
    coalesce_ms: u64,
    events: Arc<EventBus<HouseActivityEvent>>,
}

impl HouseActivityCore {
    pub fn new(sink: Arc<dyn BroadcastSink>, coalesce_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            sink,
            coalesce_ms,
            events: Arc::new(EventBus::default()),
        })
    }

    pub fn events(&self) -> Arc<EventBus<HouseActivityEvent>> {
        self.events.clone()
    }

    pub fn snapshot(&self, repo_id: &RepoId) -> Option<HouseActivity> {
        self.entries.lock().expect("house activity state poisoned").get(repo_id).map(|e| e.activity.clone())
    }

    pub fn apply_transition(self: &Arc<Self>, transition: Transition) {
        let now = Utc::now();
        let repo_id = transition.repo_id.clone();
        let kind = transition.kind;

        let mut entries = self.entries.lock().expect("house activity state poisoned");
        let entry = entries.entry(repo_id.clone()).or_insert_with(|| HouseEntry::new(repo_id.clone(), transition.village_id.clone()));
        if entry.village_id.is_none() {
            entry.village_id = transition.village_id.clone();
        }

        {
            let indicator = entry.activity.indicator_mut(kind);
            if transition.source.is_some() {
                indicator.source = transition.source.clone();
            }
            if transition.pr_number.is_some() {
                indicator.pr_number = transition.pr_number;
            }
            if let Some(status) = &transition.build_status {
                indicator.build_status = Some(status.clone());
            }
        }

        if transition.on {
            entry.off_delay_timers.remove(&kind);
            Self::apply_on(entry, kind, now);

            let expires_at = entry.activity.indicator(kind).expires_at.expect("set by apply_on");
            let wait = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
            let core = self.clone();
            let repo_for_timer = repo_id.clone();
            let timer = TimerHandle::spawn(async move {
                tokio::time::sleep(wait).await;
                core.handle_expiry(repo_for_timer, kind).await;
            });
            entry.expiry_timers.insert(kind, timer);
        } else {
            entry.expiry_timers.remove(&kind);
            self.schedule_or_turn_off(entry, &repo_id, kind, now);
        }

        entry.activity.version += 1;
        entry.dirty = true;
        drop(entries);

        self.ensure_coalesce_timer(repo_id);
    }

    fn apply_on(entry: &mut HouseEntry, kind: IndicatorKind, now: DateTime<Utc>) {
        let indicator = entry.activity.indicator_mut(kind);
        if !indicator.active {
            indicator.started_at = Some(now);
        }
        indicator.active = true;

        let min_candidate = now + chrono::Duration::milliseconds(kind.default_min_visible_ms());
        indicator.min_visible_until = Some(match indicator.min_visible_until {
            Some(existing) if existing > min_candidate => existing,
            _ => min_candidate,
        });
        indicator.expires_at = Some(now + chrono::Duration::milliseconds(kind.default_ttl_ms()));
    }

    fn clear_indicator(indicator: &mut Indicator) {
        indicator.active = false;
        indicator.started_at = None;
        indicator.min_visible_until = None;
        indicator.expires_at = None;
    }

    /// Shared by the explicit `on=false` path and by an expiry timer firing
    /// while min-visible hasn't elapsed yet (spec §4.7: "defers to a
    /// trailing off-delay if minVisibleUntil is still in the future").
    fn schedule_or_turn_off(self: &Arc<Self>, entry: &mut HouseEntry, repo_id: &RepoId, kind: IndicatorKind, now: DateTime<Utc>) {
        let min_visible_until = entry.activity.indicator(kind).min_visible_until;
        match min_visible_until {
            Some(min_visible) if min_visible > now => {
                let wait = (min_visible - now).to_std().unwrap_or(Duration::ZERO);
                let core = self.clone();
                let repo_for_timer = repo_id.clone();
                let timer = TimerHandle::spawn(async move {
                    tokio::time::sleep(wait).await;
                    core.handle_off_delay(repo_for_timer, kind).await;
                });
                entry.off_delay_timers.insert(kind, timer);
            }
            _ => Self::clear_indicator(entry.activity.indicator_mut(kind)),
        }
    }

    async fn handle_expiry(self: Arc<Self>, repo_id: RepoId, kind: IndicatorKind) {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("house activity state poisoned");
        let Some(entry) = entries.get_mut(&repo_id) else { return };
        if !entry.activity.indicator(kind).active {
            return;
        }
        entry.expiry_timers.remove(&kind);
        self.schedule_or_turn_off(entry, &repo_id, kind, now);
        entry.activity.version += 1;
        entry.dirty = true;
        drop(entries);
        self.ensure_coalesce_timer(repo_id);
    }

    async fn handle_off_delay(self: Arc<Self>, repo_id: RepoId, kind: IndicatorKind) {
        let mut entries = self.entries.lock().expect("house activity state poisoned");
        let Some(entry) = entries.get_mut(&repo_id) else { return };
        entry.off_delay_timers.remove(&kind);
        Self::clear_indicator(entry.activity.indicator_mut(kind));
        entry.activity.version += 1;
        entry.dirty = true;
        drop(entries);
        self.ensure_coalesce_timer(repo_id);
    }

    /// Starts (if not already pending) the coalesce window for `repo_id`;
    /// every state change within the window rides the same timer, so a
    /// burst produces exactly one broadcast (spec §4.7).
    fn ensure_coalesce_timer(self: &Arc<Self>, repo_id: RepoId) {
        let mut entries = self.entries.lock().expect("house activity state poisoned");
        let Some(entry) = entries.get_mut(&repo_id) else { return };
        if entry.coalesce_timer.is_some() {
            return;
        }
        let core = self.clone();
        let repo_for_timer = repo_id.clone();
        let wait = Duration::from_millis(self.coalesce_ms);
        let timer = TimerHandle::spawn(async move {
            tokio::time::sleep(wait).await;
            core.flush(repo_for_timer).await;
        });
        entry.coalesce_timer = Some(timer);
    }

    async fn flush(self: Arc<Self>, repo_id: RepoId) {
        let (activity, village_id) = {
            let mut entries = self.entries.lock().expect("house activity state poisoned");
            let Some(entry) = entries.get_mut(&repo_id) else { return };
            entry.coalesce_timer = None;
            if !entry.dirty {
                return;
            }
            entry.dirty = false;
            (entry.activity.clone(), entry.village_id.clone())
        };

        let payload = house_activity_payload(&activity);
        if let Some(village_id) = &village_id {
            self.sink.emit_to_village(village_id.as_str(), "house.activity", payload.clone());
        }
        if let Some(repo_id) = &activity.repo_id {
            self.sink.emit_to_repo(repo_id.as_str(), "house.activity", payload);
        }
        self.events.emit(HouseActivityEvent::HouseActivity { snapshot: activity });
    }
}

fn house_activity_payload(activity: &HouseActivity) -> serde_json::Value {
    let now = Utc::now();
    let summarize = |indicator: &Indicator| {
        json!({
            "active": indicator.active,
            "minRemainingMs": indicator.min_visible_until.map(|t| (t - now).num_milliseconds().max(0)),
            "prNumber": indicator.pr_number,
            "buildStatus": indicator.build_status,
        })
    };
    json!({
        "type": "house.activity",
        "houseId": activity.house_id.as_ref().map(|h| h.as_str()),
        "repoId": activity.repo_id.as_ref().map(|r| r.as_str()),
        "indicators": {
            "lights": summarize(&activity.lights),
            "banner": summarize(&activity.banner),
            "smoke": summarize(&activity.smoke),
        },
        "version": activity.version,
        "ts": now.to_rfc3339(),
    })
}
