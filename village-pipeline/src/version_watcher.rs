//! Upstream release polling (spec §4.1).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use village_common::events::VersionWatcherEvent;
use village_common::ids::ProviderId;

use crate::event_bus::EventBus;
use crate::scheduler::IntervalTimer;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Thin HTTP fetch seam so tests never touch the network; `ReqwestFetcher`
/// is the production implementation.
pub trait HttpFetcher: Send + Sync {
    fn fetch(&self, url: String, user_agent: Option<String>) -> BoxFuture<'static, Result<String, String>>;
}

/// Production fetcher backed by `reqwest`, used by `villaged`.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), timeout }
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn fetch(&self, url: String, user_agent: Option<String>) -> BoxFuture<'static, Result<String, String>> {
        let client = self.client.clone();
        let timeout = self.timeout;
        Box::pin(async move {
            let mut request = client.get(&url).timeout(timeout);
            if let Some(ua) = user_agent {
                request = request.header(reqwest::header::USER_AGENT, ua);
            }
            let response = request.send().await.map_err(|e| e.to_string())?;
            if !response.status().is_success() {
                return Err(format!("HTTP {} fetching {url}", response.status()));
            }
            response.text().await.map_err(|e| e.to_string())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Npm,
    GithubReleases,
    Homebrew,
    Custom,
}

/// One upstream registry to poll for one provider (spec §4.1 "Sources").
#[derive(Clone)]
pub struct VersionSource {
    pub provider_id: ProviderId,
    pub source_type: SourceType,
    /// npm package name, `org/repo`, or homebrew formula name; for custom
    /// sources, the URL to fetch.
    pub source: String,
    pub check_interval_ms: u64,
    /// Required for `Custom` sources; applied to the raw response body.
    pub version_extractor: Option<Arc<dyn Fn(&str) -> Option<String> + Send + Sync>>,
}

impl VersionSource {
    pub fn new(provider_id: ProviderId, source_type: SourceType, source: impl Into<String>, check_interval_ms: u64) -> Self {
        Self {
            provider_id,
            source_type,
            source: source.into(),
            check_interval_ms,
            version_extractor: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>) -> Self {
        self.version_extractor = Some(extractor);
        self
    }

    fn request_url(&self) -> String {
        match self.source_type {
            SourceType::Npm => format!("https://registry.npmjs.org/{}/latest", self.source),
            SourceType::GithubReleases => format!("https://api.github.com/repos/{}/releases/latest", self.source),
            SourceType::Homebrew => format!("https://formulae.brew.sh/api/formula/{}.json", self.source),
            SourceType::Custom => self.source.clone(),
        }
    }
}

#[derive(Deserialize)]
struct NpmLatest {
    version: String,
}

#[derive(Deserialize)]
struct GithubRelease {
    tag_name: String,
}

#[derive(Deserialize)]
struct HomebrewVersions {
    stable: String,
}

#[derive(Deserialize)]
struct HomebrewFormula {
    versions: HomebrewVersions,
}

fn extract_version(source: &VersionSource, body: &str) -> Result<String, String> {
    match source.source_type {
        SourceType::Npm => {
            let parsed: NpmLatest = serde_json::from_str(body).map_err(|e| e.to_string())?;
            Ok(parsed.version)
        }
        SourceType::GithubReleases => {
            let parsed: GithubRelease = serde_json::from_str(body).map_err(|e| e.to_string())?;
            Ok(parsed.tag_name.strip_prefix('v').unwrap_or(&parsed.tag_name).to_string())
        }
        SourceType::Homebrew => {
            let parsed: HomebrewFormula = serde_json::from_str(body).map_err(|e| e.to_string())?;
            Ok(parsed.versions.stable)
        }
        SourceType::Custom => source
            .version_extractor
            .as_ref()
            .and_then(|f| f(body))
            .ok_or_else(|| "custom source missing version_extractor or extractor returned None".to_string()),
    }
}

/// The GitHub API requires an explicit `User-Agent` (spec §6).
const GITHUB_USER_AGENT: &str = "ai-agent-village-monitor";

struct WatcherState {
    sources: Vec<VersionSource>,
    known_versions: HashMap<ProviderId, String>,
    timers: Vec<IntervalTimer>,
}

/// Polls upstream registries for each provider's latest release.
pub struct VersionWatcher {
    fetcher: Arc<dyn HttpFetcher>,
    state: Arc<Mutex<WatcherState>>,
    started: AtomicBool,
    events: Arc<EventBus<VersionWatcherEvent>>,
}

impl VersionWatcher {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            fetcher,
            state: Arc::new(Mutex::new(WatcherState {
                sources: Vec::new(),
                known_versions: HashMap::new(),
                timers: Vec::new(),
            })),
            started: AtomicBool::new(false),
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn events(&self) -> Arc<EventBus<VersionWatcherEvent>> {
        self.events.clone()
    }

    pub fn add_source(&self, source: VersionSource) {
        self.state.lock().expect("watcher state mutex poisoned").sources.push(source);
    }

    /// Initial sweep then per-source periodic polling. Idempotent: a
    /// second call while already started is a no-op (spec §4.1).
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.check_all_sources().await;

        let sources = self.state.lock().expect("watcher state mutex poisoned").sources.clone();
        let mut timers = Vec::with_capacity(sources.len());
        for source in sources {
            let watcher = self.clone();
            let period = Duration::from_millis(source.check_interval_ms);
            let provider_id = source.provider_id.clone();
            let timer = IntervalTimer::start(period, move || {
                let watcher = watcher.clone();
                let provider_id = provider_id.clone();
                async move {
                    watcher.check_source_by_provider(&provider_id).await;
                }
            });
            timers.push(timer);
        }
        self.state.lock().expect("watcher state mutex poisoned").timers = timers;
    }

    /// Cancel all pending timers. Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().expect("watcher state mutex poisoned");
        for mut timer in state.timers.drain(..) {
            timer.stop();
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Fetch the latest version for every configured source. Errors in
    /// one source never abort the others; returns the discovery events
    /// emitted, in source order.
    pub async fn check_all_sources(&self) -> Vec<VersionWatcherEvent> {
        let sources = self.state.lock().expect("watcher state mutex poisoned").sources.clone();
        let mut discovered = Vec::new();
        for source in &sources {
            if let Some(event) = self.check_source(source).await {
                discovered.push(event);
            }
        }
        discovered
    }

    async fn check_source_by_provider(&self, provider_id: &ProviderId) {
        let source = self
            .state
            .lock()
            .expect("watcher state mutex poisoned")
            .sources
            .iter()
            .find(|s| &s.provider_id == provider_id)
            .cloned();
        if let Some(source) = source {
            self.check_source(&source).await;
        }
    }

    /// Fetch and compare against the prior known version; on change,
    /// records it and emits `VersionDiscovered`. On fetch failure, emits
    /// `CheckError` and returns `None` (spec §4.1 "Failure semantics").
    pub async fn check_source(&self, source: &VersionSource) -> Option<VersionWatcherEvent> {
        let user_agent = matches!(source.source_type, SourceType::GithubReleases)
            .then(|| GITHUB_USER_AGENT.to_string());

        let body = match self.fetcher.fetch(source.request_url(), user_agent).await {
            Ok(body) => body,
            Err(message) => {
                let event = VersionWatcherEvent::CheckError { provider_id: source.provider_id.clone(), message };
                self.events.emit(event.clone());
                return None;
            }
        };

        let version = match extract_version(source, &body) {
            Ok(v) => v,
            Err(message) => {
                let event = VersionWatcherEvent::CheckError { provider_id: source.provider_id.clone(), message };
                self.events.emit(event.clone());
                return None;
            }
        };

        let mut state = self.state.lock().expect("watcher state mutex poisoned");
        let previous = state.known_versions.get(&source.provider_id).cloned();
        if previous.as_deref() == Some(version.as_str()) {
            return None;
        }
        state.known_versions.insert(source.provider_id.clone(), version.clone());
        drop(state);

        let event = VersionWatcherEvent::VersionDiscovered {
            provider_id: source.provider_id.clone(),
            version,
            previous_version: previous,
            source_url: Some(source.request_url()),
            discovered_at: Utc::now(),
        };
        self.events.emit(event.clone());
        Some(event)
    }

    /// Inform the watcher of a version observed in the wild by an external
    /// runner heartbeat (spec §4.1). Does not itself emit a discovery
    /// event — a heartbeat is an observation, not an upstream release.
    pub fn register_heartbeat_version(&self, provider_id: ProviderId, version: String) {
        self.state
            .lock()
            .expect("watcher state mutex poisoned")
            .known_versions
            .insert(provider_id, version);
    }

    pub fn get_known_version(&self, provider_id: &ProviderId) -> Option<String> {
        self.state.lock().expect("watcher state mutex poisoned").known_versions.get(provider_id).cloned()
    }

    pub fn get_all_known_versions(&self) -> HashMap<ProviderId, String> {
        self.state.lock().expect("watcher state mutex poisoned").known_versions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeFetcher {
        responses: Mutex<HashMap<String, Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        fn new() -> Self {
            Self { responses: Mutex::new(HashMap::new()), calls: AtomicUsize::new(0) }
        }

        fn set(&self, url: impl Into<String>, response: Result<String, String>) {
            self.responses.lock().unwrap().insert(url.into(), response);
        }
    }

    impl HttpFetcher for FakeFetcher {
        fn fetch(&self, url: String, _user_agent: Option<String>) -> BoxFuture<'static, Result<String, String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = self.responses.lock().unwrap().get(&url).cloned().unwrap_or_else(|| Err("no fixture".into()));
            Box::pin(async move { result })
        }
    }

    fn npm_source() -> VersionSource {
        VersionSource::new(ProviderId::from("codex"), SourceType::Npm, "codex-cli", 50)
    }

    #[tokio::test]
    async fn check_source_emits_discovery_on_first_observation() {
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.set("https://registry.npmjs.org/codex-cli/latest", Ok(r#"{"version":"1.2.0"}"#.to_string()));
        let watcher = VersionWatcher::new(fetcher);
        let source = npm_source();

        let event = watcher.check_source(&source).await.expect("expected discovery");
        match event {
            VersionWatcherEvent::VersionDiscovered { version, previous_version, .. } => {
                assert_eq!(version, "1.2.0");
                assert_eq!(previous_version, None);
            }
            _ => panic!("expected VersionDiscovered"),
        }
        assert_eq!(watcher.get_known_version(&ProviderId::from("codex")), Some("1.2.0".to_string()));
    }

    #[tokio::test]
    async fn check_source_is_silent_when_version_unchanged() {
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.set("https://registry.npmjs.org/codex-cli/latest", Ok(r#"{"version":"1.2.0"}"#.to_string()));
        let watcher = VersionWatcher::new(fetcher);
        let source = npm_source();

        assert!(watcher.check_source(&source).await.is_some());
        assert!(watcher.check_source(&source).await.is_none(), "second identical check should not re-discover");
    }

    #[tokio::test]
    async fn check_source_emits_check_error_on_fetch_failure() {
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.set("https://registry.npmjs.org/codex-cli/latest", Err("connection reset".to_string()));
        let watcher = VersionWatcher::new(fetcher);

        let event = watcher.check_source(&npm_source()).await;
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn check_all_sources_continues_past_one_failing_source() {
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.set("https://registry.npmjs.org/codex-cli/latest", Ok(r#"{"version":"1.2.0"}"#.to_string()));
        // homebrew source left unset -> fails.
        let watcher = VersionWatcher::new(fetcher);
        watcher.add_source(npm_source());
        watcher.add_source(VersionSource::new(ProviderId::from("gemini_cli"), SourceType::Homebrew, "gemini-cli", 50));

        let discovered = watcher.check_all_sources().await;
        assert_eq!(discovered.len(), 1);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.set("https://registry.npmjs.org/codex-cli/latest", Ok(r#"{"version":"1.0.0"}"#.to_string()));
        let watcher = Arc::new(VersionWatcher::new(fetcher));
        watcher.add_source(npm_source());

        watcher.start().await;
        assert!(watcher.is_started());
        watcher.start().await;
        assert!(watcher.is_started());
        watcher.stop();
        assert!(!watcher.is_started());
        watcher.stop();
        assert!(!watcher.is_started());
    }

    #[tokio::test]
    async fn register_heartbeat_version_updates_known_version_without_event() {
        let fetcher = Arc::new(FakeFetcher::new());
        let watcher = VersionWatcher::new(fetcher);
        let mut rx = watcher.events().subscribe();

        watcher.register_heartbeat_version(ProviderId::from("codex"), "9.9.9".to_string());
        assert_eq!(watcher.get_known_version(&ProviderId::from("codex")), Some("9.9.9".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn github_releases_strip_leading_v() {
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.set(
            "https://api.github.com/repos/openai/codex/releases/latest",
            Ok(r#"{"tag_name":"v2.5.1","published_at":"2026-01-01T00:00:00Z","html_url":"x"}"#.to_string()),
        );
        let watcher = VersionWatcher::new(fetcher);
        let source = VersionSource::new(ProviderId::from("codex"), SourceType::GithubReleases, "openai/codex", 50);

        let event = watcher.check_source(&source).await.expect("expected discovery");
        match event {
            VersionWatcherEvent::VersionDiscovered { version, .. } => assert_eq!(version, "2.5.1"),
            _ => panic!("expected VersionDiscovered"),
        }
    }
}
