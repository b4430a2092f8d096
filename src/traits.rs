//! Extension traits for listing sources and notification transports.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │               AdapterRegistry                 │
//! │  ┌──────────┐ ┌──────┐ ┌─────┐ ┌──────────┐   │
//! │  │craigslist│ │ ebay │ │ rss │ │ facebook │   │
//! │  │  (RSS)   │ │(API) │ │     │ │ (browser)│   │
//! │  └──────────┘ └──────┘ └─────┘ └──────────┘   │
//! └──────────────────────┬────────────────────────┘
//!                        ▼
//!               ScanEngine::run_cycle()
//!                        ▼
//!          Notifier (console / telegram)
//! ```
//!
//! Adapters are invoked in registration order for every active client.
//! They never fail the cycle: a transient upstream problem yields an empty
//! or partial result, and the engine additionally isolates any error or
//! timeout an adapter does return.

use anyhow::Result;
use async_trait::async_trait;
use prospector_core::filter::ListingFilter;
use prospector_core::{ClientConfig, Listing};
use std::collections::HashSet;

use crate::adapter_craigslist::CraigslistAdapter;
use crate::adapter_ebay::EbayAdapter;
use crate::adapter_facebook::FacebookAdapter;
use crate::adapter_rss::RssAdapter;
use crate::browser::Browser;
use crate::config::Config;

/// Most listings one adapter returns for one client per cycle.
pub const SCRAPE_LIMIT: usize = 5;

// ═══════════════════════════════════════════════════════════════════════
// Source Adapter
// ═══════════════════════════════════════════════════════════════════════

/// Everything an adapter may look at for one client.
pub struct ScrapeContext<'a> {
    pub client: &'a ClientConfig,
    /// Listing IDs already delivered to this client.
    pub seen: &'a HashSet<String>,
    /// Present only when the cycle acquired a browser.
    pub browser: Option<&'a dyn Browser>,
}

/// A marketplace or feed that produces listings for a client.
///
/// # Contract
///
/// - Return `Ok(vec![])` when the client's source entry is inactive or
///   lacks what the adapter needs (URL, credentials).
/// - Skip seen IDs before any other work, then reject on negative
///   keywords, city, and price, in that order.
/// - Stop at [`SCRAPE_LIMIT`] accepted listings.
/// - Listing IDs derive from the upstream identifier only.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use prospector::traits::{ScrapeContext, SourceAdapter};
/// use prospector_core::Listing;
///
/// pub struct StaticAdapter;
///
/// #[async_trait]
/// impl SourceAdapter for StaticAdapter {
///     fn name(&self) -> &str { "static" }
///
///     async fn scrape(&self, _ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source key, matching the key in `ClientConfig::sources`.
    fn name(&self) -> &str;

    /// Adapters that need a DOM are skipped in cycles without a browser.
    fn requires_browser(&self) -> bool {
        false
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>>;
}

/// Ordered set of adapters consulted each cycle.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// The built-in adapters in their fixed order: craigslist, ebay, rss,
    /// facebook.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.scan.adapter_timeout();
        let mut registry = Self::new();
        registry.register(Box::new(CraigslistAdapter::new(timeout)?));
        registry.register(Box::new(EbayAdapter::new(config.ebay.clone(), timeout)?));
        registry.register(Box::new(RssAdapter::new(timeout)?));
        registry.register(Box::new(FacebookAdapter::new(config.browser.dom_wait())));
        Ok(registry)
    }

    /// Register an adapter. Order of registration is invocation order.
    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn adapters(&self) -> &[Box<dyn SourceAdapter>] {
        &self.adapters
    }

    pub fn find(&self, name: &str) -> Option<&dyn SourceAdapter> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.as_ref())
    }

    /// Whether any browser-backed adapter has an active source for `client`.
    pub fn client_needs_browser(&self, client: &ClientConfig) -> bool {
        self.adapters
            .iter()
            .any(|a| a.requires_browser() && client.source_active(a.name()))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies the per-item adapter contract: seen check, filters, and cap.
pub struct ListingCollector<'a> {
    seen: &'a HashSet<String>,
    filter: ListingFilter,
    limit: usize,
    listings: Vec<Listing>,
}

impl<'a> ListingCollector<'a> {
    pub fn new(ctx: &ScrapeContext<'a>) -> Self {
        Self {
            seen: ctx.seen,
            filter: ListingFilter::for_client(ctx.client),
            limit: SCRAPE_LIMIT,
            listings: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.listings.len() >= self.limit
    }

    /// Not yet delivered and not already collected in this call.
    pub fn is_new(&self, id: &str) -> bool {
        !self.seen.contains(id) && !self.listings.iter().any(|l| l.id == id)
    }

    /// Negative keywords against `text`, the city against `city_text`
    /// (when the adapter has one), then the price range.
    pub fn passes(&self, text: &str, city_text: Option<&str>, price: f64) -> bool {
        if self.filter.has_negative_keyword(text) {
            return false;
        }
        if city_text.is_some_and(|c| self.filter.outside_city(c)) {
            return false;
        }
        self.filter.price_in_range(price)
    }

    pub fn push(&mut self, listing: Listing) {
        self.listings.push(listing);
    }

    pub fn into_listings(self) -> Vec<Listing> {
        self.listings
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Notifier
// ═══════════════════════════════════════════════════════════════════════

/// Delivers a formatted message to one chat.
///
/// Errors are reported to the caller, which logs them. The engine marks
/// the listing seen either way.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, chat_id: &str, text: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_core::client::normalize_client;
    use serde_json::json;

    struct Named(&'static str, bool);

    #[async_trait]
    impl SourceAdapter for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn requires_browser(&self) -> bool {
            self.1
        }
        async fn scrape(&self, _ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>> {
            Ok(vec![])
        }
    }

    fn listing(id: &str) -> Listing {
        Listing {
            source: "T".into(),
            id: id.into(),
            title: id.into(),
            price_text: String::new(),
            extra_info: String::new(),
            region: String::new(),
            link: String::new(),
        }
    }

    #[test]
    fn test_registry_order_and_find() {
        let mut registry = AdapterRegistry::new();
        assert!(registry.is_empty());
        registry.register(Box::new(Named("a", false)));
        registry.register(Box::new(Named("facebook", true)));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.adapters()[0].name(), "a");
        assert!(registry.find("facebook").is_some());
        assert!(registry.find("zzz").is_none());
    }

    #[test]
    fn test_builtin_order() {
        let registry = AdapterRegistry::from_config(&Config::default()).unwrap();
        let names: Vec<&str> = registry.adapters().iter().map(|a| a.name()).collect();
        assert_eq!(names, ["craigslist", "ebay", "rss", "facebook"]);
        assert!(registry.find("facebook").unwrap().requires_browser());
    }

    #[test]
    fn test_client_needs_browser() {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(Named("facebook", true)));
        let with_fb = normalize_client(&json!({"chat_id": "1"}));
        let without_fb =
            normalize_client(&json!({"chat_id": "2", "sources": {"fb": {"active": false}}}));
        assert!(registry.client_needs_browser(&with_fb));
        assert!(!registry.client_needs_browser(&without_fb));
    }

    #[test]
    fn test_collector_contract() {
        let client = normalize_client(&json!({
            "chat_id": "1",
            "price_min": 100,
            "price_max": 500,
            "target_city": "Austin",
            "negative_keywords": ["broken"],
        }));
        let seen: HashSet<String> = ["x_seen".to_string()].into_iter().collect();
        let ctx = ScrapeContext {
            client: &client,
            seen: &seen,
            browser: None,
        };
        let mut collector = ListingCollector::new(&ctx);

        assert!(!collector.is_new("x_seen"));
        assert!(collector.is_new("x_1"));
        assert!(!collector.passes("Broken bike", None, 200.0));
        assert!(!collector.passes("bike", Some("Dallas"), 200.0));
        assert!(!collector.passes("bike", Some("Austin"), 600.0));
        assert!(collector.passes("bike", Some("Austin TX"), 200.0));
        assert!(collector.passes("bike", None, 100.0));

        for i in 0..SCRAPE_LIMIT {
            collector.push(listing(&format!("x_{i}")));
        }
        assert!(collector.is_full());
        assert!(!collector.is_new("x_1"));
        assert_eq!(collector.into_listings().len(), SCRAPE_LIMIT);
    }
}
