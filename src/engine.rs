//! The scan loop: adapters in, notifications out.
//!
//! # Cycle
//!
//! ```text
//!   running? ──no──▶ exit
//!      │yes
//!   active clients? ──no──▶ sleep(interval) ─┐
//!      │yes                                  │
//!   launch browser if any client needs it    │
//!   (failure = no browser this cycle)        │
//!      │                                     │
//!   for each client (registry order):        │
//!     adapters in order ─▶ city filter       │
//!     ─▶ offer cache ─▶ notify, mark seen    │
//!     ─▶ pacing delay                        │
//!      │                                     │
//!   save seen ledger once                    │
//!   close browser (always), stamp last scan  │
//!      │                                     │
//!   sleep(interval) ◀────────────────────────┘
//! ```
//!
//! The running flag is only read at the top of the loop, so a cycle that has
//! started always finishes, including its cleanup. Each adapter call runs
//! under the configured timeout; its errors and panics are logged and
//! dropped.
//! A listing is marked seen right after its delivery attempt, whether or
//! not the transport succeeded.

use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::FutureExt;
use prospector_core::filter::filter_by_city;
use prospector_core::i18n::select_locale;
use prospector_core::{ClientConfig, Listing, SeenLedger};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::browser::{Browser, BrowserLauncher, BrowserProfile};
use crate::config::Config;
use crate::notify::format_offer_message;
use crate::state::SharedState;
use crate::traits::{AdapterRegistry, Notifier, ScrapeContext};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub clients: usize,
    pub delivered: usize,
    pub failed_deliveries: usize,
    pub adapter_failures: usize,
    pub browser: bool,
}

pub struct ScanEngine {
    state: SharedState,
    registry: AdapterRegistry,
    notifier: Arc<dyn Notifier>,
    launcher: Arc<dyn BrowserLauncher>,
    profile: BrowserProfile,
    interval: Duration,
    pacing: Duration,
    adapter_timeout: Duration,
    default_locale: String,
}

impl ScanEngine {
    pub fn new(
        state: SharedState,
        registry: AdapterRegistry,
        notifier: Arc<dyn Notifier>,
        launcher: Arc<dyn BrowserLauncher>,
        config: &Config,
    ) -> Self {
        let profile = BrowserProfile::new(state.storage().session_dir(), &config.browser);
        Self {
            state,
            registry,
            notifier,
            launcher,
            profile,
            interval: config.scan.interval(),
            pacing: config.scan.pacing(),
            adapter_timeout: config.scan.adapter_timeout(),
            default_locale: config.bot.default_locale.clone(),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Start the loop on the runtime unless a live one is already attached.
    /// Returns whether a new loop was started.
    pub fn spawn(self: &Arc<Self>) -> bool {
        let engine = Arc::clone(self);
        self.state
            .attach_engine_task(move || tokio::spawn(async move { engine.run().await }))
    }

    /// Loop until the running flag is cleared.
    pub async fn run(&self) {
        info!(
            adapters = self.registry.len(),
            interval_secs = self.interval.as_secs_f64(),
            "scan engine started"
        );
        let mut ledger = match self.state.storage().load_seen() {
            Ok(ledger) => ledger,
            Err(e) => {
                error!(error = %e, "failed to load seen ledger, starting empty");
                SeenLedger::new()
            }
        };

        while self.state.is_running() {
            if self.state.active_clients().is_empty() {
                debug!("no active clients, waiting");
                tokio::time::sleep(self.interval).await;
                continue;
            }

            match self.run_cycle(&mut ledger).await {
                Ok(report) => info!(
                    clients = report.clients,
                    delivered = report.delivered,
                    adapter_failures = report.adapter_failures,
                    "scan cycle complete"
                ),
                Err(e) => error!(error = %e, "scan cycle failed"),
            }
            tokio::time::sleep(self.interval).await;
        }
        info!("scan engine stopped");
    }

    /// One full cycle over the active clients.
    ///
    /// The browser is closed and the scan time recorded even when the
    /// cycle fails.
    pub async fn run_cycle(&self, ledger: &mut SeenLedger) -> Result<CycleReport> {
        let clients = self.state.active_clients();
        let browser = self.acquire_browser(&clients).await;

        let result = AssertUnwindSafe(self.process_clients(&clients, browser.as_deref(), ledger))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow!("scan cycle panicked: {}", panic_message(&*panic))));

        if let Some(browser) = browser {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "failed to close browser");
            }
        }
        self.state.mark_scanned(Utc::now());
        result
    }

    async fn acquire_browser(&self, clients: &[ClientConfig]) -> Option<Box<dyn Browser>> {
        if !clients
            .iter()
            .any(|c| self.registry.client_needs_browser(c))
        {
            return None;
        }
        match self.launcher.launch(&self.profile).await {
            Ok(browser) => {
                debug!(profile = %self.profile.profile_dir.display(), "browser launched");
                Some(browser)
            }
            Err(e) => {
                warn!(error = %e, "browser launch failed, skipping browser adapters this cycle");
                None
            }
        }
    }

    async fn process_clients(
        &self,
        clients: &[ClientConfig],
        browser: Option<&dyn Browser>,
        ledger: &mut SeenLedger,
    ) -> Result<CycleReport> {
        let mut report = CycleReport {
            clients: clients.len(),
            browser: browser.is_some(),
            ..CycleReport::default()
        };

        for client in clients {
            let chat_id = client.chat_id.as_str();
            let (offers, failures) = {
                let seen: &HashSet<String> = ledger.ensure(chat_id);
                self.collect_offers(client, seen, browser).await
            };
            report.adapter_failures += failures;

            let filtered = filter_by_city(offers, client.city_filter());
            self.state.store_offers(chat_id, &filtered);
            if !filtered.is_empty() {
                info!(chat_id, count = filtered.len(), "new listings");
            }

            let locale = select_locale(Some(client.locale.as_str()), None, &self.default_locale);
            for listing in &filtered {
                let text = format_offer_message(listing, &locale);
                match self.notifier.send(chat_id, &text).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        warn!(chat_id, listing = %listing.id, error = %e, "delivery failed");
                        report.failed_deliveries += 1;
                    }
                }
                ledger.mark(chat_id, &listing.id);
            }

            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        self.state.storage().save_seen(ledger)?;
        Ok(report)
    }

    /// Run every adapter for one client. Returns the listings and the
    /// number of adapters that failed or timed out.
    async fn collect_offers(
        &self,
        client: &ClientConfig,
        seen: &HashSet<String>,
        browser: Option<&dyn Browser>,
    ) -> (Vec<Listing>, usize) {
        let ctx = ScrapeContext {
            client,
            seen,
            browser,
        };
        let mut offers = Vec::new();
        let mut failures = 0;

        for adapter in self.registry.adapters() {
            if adapter.requires_browser() && browser.is_none() {
                debug!(chat_id = %client.chat_id, adapter = adapter.name(), "no browser, skipping");
                continue;
            }
            let scrape = AssertUnwindSafe(adapter.scrape(&ctx)).catch_unwind();
            match tokio::time::timeout(self.adapter_timeout, scrape).await {
                Ok(Ok(Ok(found))) => {
                    debug!(chat_id = %client.chat_id, adapter = adapter.name(), count = found.len(), "adapter done");
                    offers.extend(found);
                }
                Ok(Ok(Err(e))) => {
                    warn!(chat_id = %client.chat_id, adapter = adapter.name(), error = %e, "adapter failed");
                    failures += 1;
                }
                Ok(Err(panic)) => {
                    error!(
                        chat_id = %client.chat_id,
                        adapter = adapter.name(),
                        panic = panic_message(&*panic),
                        "adapter panicked"
                    );
                    failures += 1;
                }
                Err(_) => {
                    warn!(chat_id = %client.chat_id, adapter = adapter.name(), "adapter timed out");
                    failures += 1;
                }
            }
        }
        (offers, failures)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
