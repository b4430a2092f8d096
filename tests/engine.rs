//! Scan-cycle tests with in-memory adapters, notifiers, and browsers.
//!
//! These drive [`ScanEngine::run_cycle`] directly against a temporary data
//! directory, so every check covers the full path from adapter output to
//! the seen ledger on disk.

use anyhow::{bail, Result};
use async_trait::async_trait;
use prospector::browser::{Browser, BrowserLauncher, BrowserProfile, PageElement};
use prospector::config::Config;
use prospector::engine::ScanEngine;
use prospector::state::SharedState;
use prospector::storage::Storage;
use prospector::traits::{AdapterRegistry, ListingCollector, Notifier, ScrapeContext, SourceAdapter};
use prospector_core::client::normalize_client;
use prospector_core::{ClientConfig, Listing, SeenLedger};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Candidate listing as a fake marketplace would return it.
#[derive(Clone)]
struct Candidate {
    id: &'static str,
    title: &'static str,
    price: f64,
    region: &'static str,
}

fn candidate(id: &'static str, title: &'static str, price: f64, region: &'static str) -> Candidate {
    Candidate {
        id,
        title,
        price,
        region,
    }
}

/// Runs candidates through the same collector the real adapters use.
struct FakeAdapter {
    name: &'static str,
    browser: bool,
    candidates: Vec<Candidate>,
}

impl FakeAdapter {
    fn new(name: &'static str, candidates: Vec<Candidate>) -> Self {
        Self {
            name,
            browser: false,
            candidates,
        }
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn requires_browser(&self) -> bool {
        self.browser
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>> {
        let mut collector = ListingCollector::new(ctx);
        for c in &self.candidates {
            if collector.is_full() {
                break;
            }
            if !collector.is_new(c.id) || !collector.passes(c.title, Some(c.region), c.price) {
                continue;
            }
            collector.push(Listing {
                source: self.name.to_uppercase(),
                id: c.id.to_string(),
                title: c.title.to_string(),
                price_text: format!("$ {}", c.price),
                extra_info: String::new(),
                region: c.region.to_string(),
                link: format!("https://example.test/{}", c.id),
            });
        }
        Ok(collector.into_listings())
    }
}

struct FailingAdapter;

#[async_trait]
impl SourceAdapter for FailingAdapter {
    fn name(&self) -> &str {
        "broken"
    }

    async fn scrape(&self, _ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>> {
        bail!("upstream returned 503")
    }
}

struct PanickingAdapter;

#[async_trait]
impl SourceAdapter for PanickingAdapter {
    fn name(&self) -> &str {
        "panicky"
    }

    async fn scrape(&self, _ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>> {
        panic!("selector table out of date")
    }
}

/// Records every delivery; optionally fails them all.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        if self.fail {
            bail!("chat unreachable");
        }
        Ok(())
    }
}

struct PanickingNotifier;

#[async_trait]
impl Notifier for PanickingNotifier {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn send(&self, _chat_id: &str, _text: &str) -> Result<()> {
        panic!("transport state corrupted")
    }
}

/// Finds nothing; counts how often it is closed.
struct NoopBrowser {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Browser for NoopBrowser {
    async fn open(&self, _url: &str, _selector: &str, _wait: Duration) -> Result<Vec<PageElement>> {
        Ok(Vec::new())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts launches and either fails or hands out a [`NoopBrowser`].
#[derive(Default)]
struct FakeLauncher {
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
    fail: bool,
}

impl FakeLauncher {
    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _profile: &BrowserProfile) -> Result<Box<dyn Browser>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("chrome not installed");
        }
        Ok(Box::new(NoopBrowser {
            closes: Arc::clone(&self.closes),
        }))
    }
}

fn browser_adapter(candidates: Vec<Candidate>) -> FakeAdapter {
    FakeAdapter {
        name: "facebook",
        browser: true,
        candidates,
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config() -> Config {
    let mut config = Config::default();
    config.scan.pacing_ms = 0;
    config.scan.adapter_timeout_secs = 5;
    config
}

fn client(chat_id: &str, price_max: f64, city: &str) -> ClientConfig {
    normalize_client(&json!({
        "chat_id": chat_id,
        "search_term": "bike",
        "price_max": price_max,
        "target_city": city,
    }))
}

struct Harness {
    tmp: TempDir,
    state: SharedState,
    engine: ScanEngine,
}

fn harness(
    clients: Vec<ClientConfig>,
    adapters: Vec<Box<dyn SourceAdapter>>,
    notifier: Arc<dyn Notifier>,
    launcher: Arc<dyn BrowserLauncher>,
) -> Harness {
    let tmp = TempDir::new().unwrap();
    let state = SharedState::new(Arc::new(Storage::in_dir(tmp.path())), clients);
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }
    let engine = ScanEngine::new(state.clone(), registry, notifier, launcher, &test_config());
    Harness {
        tmp,
        state,
        engine,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_price_above_max_is_never_sent() {
    let notifier = Arc::new(RecordingNotifier::default());
    let h = harness(
        vec![client("1", 500.0, "")],
        vec![Box::new(FakeAdapter::new(
            "fake",
            vec![
                candidate("a", "bike too pricey", 600.0, ""),
                candidate("b", "bike fair", 300.0, ""),
            ],
        ))],
        notifier.clone(),
        Arc::new(FakeLauncher::default()),
    );

    let mut ledger = SeenLedger::new();
    let report = h.engine.run_cycle(&mut ledger).await.unwrap();

    assert_eq!(report.delivered, 1);
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("bike fair"));
    assert!(!ledger.contains("1", "a"));
    assert!(ledger.contains("1", "b"));
}

#[tokio::test]
async fn test_failing_adapter_does_not_block_others() {
    let notifier = Arc::new(RecordingNotifier::default());
    let h = harness(
        vec![client("1", 1000.0, ""), client("2", 1000.0, "")],
        vec![
            Box::new(FailingAdapter),
            Box::new(FakeAdapter::new("fake", vec![candidate("x", "bike", 100.0, "")])),
        ],
        notifier.clone(),
        Arc::new(FakeLauncher::default()),
    );

    let mut ledger = SeenLedger::new();
    let report = h.engine.run_cycle(&mut ledger).await.unwrap();

    assert_eq!(report.clients, 2);
    assert_eq!(report.adapter_failures, 2);
    assert_eq!(report.delivered, 2);
    let recipients: Vec<String> = notifier.sent().into_iter().map(|(id, _)| id).collect();
    assert_eq!(recipients, vec!["1".to_string(), "2".to_string()]);
}

#[tokio::test]
async fn test_browser_launch_failure_skips_browser_adapters() {
    let notifier = Arc::new(RecordingNotifier::default());
    let launcher = Arc::new(FakeLauncher {
        fail: true,
        ..FakeLauncher::default()
    });
    let browser_adapter = FakeAdapter {
        name: "facebook",
        browser: true,
        candidates: vec![candidate("fb", "bike via browser", 100.0, "")],
    };
    let h = harness(
        vec![client("1", 1000.0, "")],
        vec![
            Box::new(browser_adapter),
            Box::new(FakeAdapter::new("fake", vec![candidate("x", "bike", 100.0, "")])),
        ],
        notifier.clone(),
        launcher.clone(),
    );

    let mut ledger = SeenLedger::new();
    let report = h.engine.run_cycle(&mut ledger).await.unwrap();

    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    assert!(!report.browser);
    assert_eq!(report.delivered, 1);
    assert!(notifier.sent()[0].1.contains("FAKE"));
    assert!(h.state.is_running());
    assert!(h.state.last_scan_at().is_some());
}

#[tokio::test]
async fn test_browser_only_launched_when_needed() {
    let launcher = Arc::new(FakeLauncher::default());
    let mut paused_fb = client("1", 1000.0, "");
    paused_fb.sources.get_mut("facebook").unwrap().active = false;
    let browser_adapter = FakeAdapter {
        name: "facebook",
        browser: true,
        candidates: vec![],
    };
    let h = harness(
        vec![paused_fb],
        vec![Box::new(browser_adapter)],
        Arc::new(RecordingNotifier::default()),
        launcher.clone(),
    );

    let report = h.engine.run_cycle(&mut SeenLedger::new()).await.unwrap();
    assert!(!report.browser);
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_delivery_is_still_marked_seen() {
    let notifier = Arc::new(RecordingNotifier::failing());
    let h = harness(
        vec![client("1", 1000.0, "")],
        vec![Box::new(FakeAdapter::new("fake", vec![candidate("x", "bike", 100.0, "")]))],
        notifier.clone(),
        Arc::new(FakeLauncher::default()),
    );

    let mut ledger = SeenLedger::new();
    let report = h.engine.run_cycle(&mut ledger).await.unwrap();

    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed_deliveries, 1);
    assert_eq!(notifier.sent().len(), 1);
    let on_disk = h.state.storage().load_seen().unwrap();
    assert!(on_disk.contains("1", "x"));
}

#[tokio::test]
async fn test_second_cycle_sends_nothing_new() {
    let notifier = Arc::new(RecordingNotifier::default());
    let h = harness(
        vec![client("1", 1000.0, "")],
        vec![Box::new(FakeAdapter::new(
            "fake",
            vec![candidate("x", "bike", 100.0, ""), candidate("y", "bike 2", 200.0, "")],
        ))],
        notifier.clone(),
        Arc::new(FakeLauncher::default()),
    );

    let mut ledger = SeenLedger::new();
    let first = h.engine.run_cycle(&mut ledger).await.unwrap();
    let second = h.engine.run_cycle(&mut ledger).await.unwrap();

    assert_eq!(first.delivered, 2);
    assert_eq!(second.delivered, 0);
    assert_eq!(notifier.sent().len(), 2);
    assert_eq!(h.state.offers_for("1").len(), 2);
}

#[tokio::test]
async fn test_strict_city_filters_after_scrape() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut austin = client("1", 1000.0, "");
    austin.strict_city = "Austin".into();
    let h = harness(
        vec![austin],
        vec![Box::new(FakeAdapter::new(
            "fake",
            vec![
                candidate("h", "bike", 100.0, "Houston, TX"),
                candidate("a", "bike", 100.0, "Austin, TX"),
            ],
        ))],
        notifier.clone(),
        Arc::new(FakeLauncher::default()),
    );

    let mut ledger = SeenLedger::new();
    h.engine.run_cycle(&mut ledger).await.unwrap();

    let offers = h.state.offers_for("1");
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].id, "a");
    assert!(!ledger.contains("1", "h"));
}

#[tokio::test]
async fn test_paused_clients_are_skipped() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut paused = client("2", 1000.0, "");
    paused.active = false;
    let h = harness(
        vec![client("1", 1000.0, ""), paused],
        vec![Box::new(FakeAdapter::new("fake", vec![candidate("x", "bike", 100.0, "")]))],
        notifier.clone(),
        Arc::new(FakeLauncher::default()),
    );

    let report = h.engine.run_cycle(&mut SeenLedger::new()).await.unwrap();
    assert_eq!(report.clients, 1);
    assert!(notifier.sent().iter().all(|(id, _)| id == "1"));
}

#[tokio::test(start_paused = true)]
async fn test_spawn_once_and_stop() {
    let h = harness(
        Vec::new(),
        Vec::new(),
        Arc::new(RecordingNotifier::default()),
        Arc::new(FakeLauncher::default()),
    );
    let engine = Arc::new(h.engine);

    assert!(engine.spawn());
    assert!(!engine.spawn());
    assert!(h.state.engine_alive());

    h.state.set_running(false);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(!h.state.engine_alive());

    assert!(engine.spawn());
    assert!(h.state.is_running());
}

#[tokio::test]
async fn test_browser_closed_after_cycle() {
    let launcher = Arc::new(FakeLauncher::default());
    let h = harness(
        vec![client("1", 1000.0, "")],
        vec![Box::new(browser_adapter(vec![candidate("fb", "bike", 100.0, "")]))],
        Arc::new(RecordingNotifier::default()),
        launcher.clone(),
    );

    let report = h.engine.run_cycle(&mut SeenLedger::new()).await.unwrap();
    assert!(report.browser);
    assert_eq!(report.delivered, 1);
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    assert_eq!(launcher.closes(), 1);
}

#[tokio::test]
async fn test_failed_cycle_still_closes_browser() {
    let launcher = Arc::new(FakeLauncher::default());
    let h = harness(
        vec![client("1", 1000.0, "")],
        vec![Box::new(browser_adapter(vec![candidate("fb", "bike", 100.0, "")]))],
        Arc::new(RecordingNotifier::default()),
        launcher.clone(),
    );
    // A directory where the ledger file should be makes the final save fail.
    std::fs::create_dir_all(h.tmp.path().join("data").join("seen_history.json")).unwrap();

    let result = h.engine.run_cycle(&mut SeenLedger::new()).await;
    assert!(result.is_err());
    assert_eq!(launcher.closes(), 1);
    assert!(h.state.last_scan_at().is_some());
}

#[tokio::test]
async fn test_panicking_notifier_fails_cycle_but_cleans_up() {
    let launcher = Arc::new(FakeLauncher::default());
    let h = harness(
        vec![client("1", 1000.0, "")],
        vec![Box::new(browser_adapter(vec![candidate("fb", "bike", 100.0, "")]))],
        Arc::new(PanickingNotifier),
        launcher.clone(),
    );

    let err = h.engine.run_cycle(&mut SeenLedger::new()).await.unwrap_err();
    assert!(err.to_string().contains("transport state corrupted"));
    assert_eq!(launcher.closes(), 1);
    assert!(h.state.last_scan_at().is_some());
}

#[tokio::test]
async fn test_panicking_adapter_is_isolated() {
    let notifier = Arc::new(RecordingNotifier::default());
    let h = harness(
        vec![client("1", 1000.0, ""), client("2", 1000.0, "")],
        vec![
            Box::new(PanickingAdapter),
            Box::new(FakeAdapter::new("fake", vec![candidate("x", "bike", 100.0, "")])),
        ],
        notifier.clone(),
        Arc::new(FakeLauncher::default()),
    );

    let report = h.engine.run_cycle(&mut SeenLedger::new()).await.unwrap();
    assert_eq!(report.adapter_failures, 2);
    assert_eq!(report.delivered, 2);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_loop_survives_adapter_panic() {
    let notifier = Arc::new(RecordingNotifier::default());
    let h = harness(
        vec![client("1", 1000.0, "")],
        vec![
            Box::new(PanickingAdapter),
            Box::new(FakeAdapter::new("fake", vec![candidate("x", "bike", 100.0, "")])),
        ],
        notifier.clone(),
        Arc::new(FakeLauncher::default()),
    );
    let engine = Arc::new(h.engine);

    assert!(engine.spawn());
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert!(h.state.is_running());
    assert!(h.state.engine_alive());
    assert!(h.state.last_scan_at().is_some());
    assert_eq!(notifier.sent().len(), 1);

    h.state.set_running(false);
}
