//! Craigslist adapter.
//!
//! Reads the public RSS search feed. When the client has no literal URL, the
//! feed URL is derived from the search term, price range, and city slug;
//! either way it is forced to `format=rss`.
//!
//! # Listing shape
//!
//! | Field | Value |
//! |-------|-------|
//! | `id` | `cl_<posting id>` from the guid or link, else `cl_<hash>` |
//! | `price_text` | `$ 1,234`, empty when no price was found |
//! | `extra_info` | description text |
//! | `region` | the client's target city |
//!
//! The city check runs against title and description together, because
//! nationwide sponsored posts often only name their city in the body.

use anyhow::Result;
use async_trait::async_trait;
use prospector_core::filter::extract_price;
use prospector_core::text::{format_thousands, stable_id};
use prospector_core::urls::{build_craigslist_url, ensure_craigslist_rss};
use prospector_core::{ClientConfig, Listing, SourceConfig};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

use crate::feed::{fetch_feed_items, FeedItem};
use crate::http::build_client;
use crate::traits::{ListingCollector, ScrapeContext, SourceAdapter};

pub const SOURCE_KEY: &str = "craigslist";

pub struct CraigslistAdapter {
    http: reqwest::Client,
}

impl CraigslistAdapter {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl SourceAdapter for CraigslistAdapter {
    fn name(&self) -> &str {
        SOURCE_KEY
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>> {
        let Some(source) = ctx.client.active_source(SOURCE_KEY) else {
            return Ok(Vec::new());
        };
        let url = feed_url(ctx.client, source);
        info!(chat_id = %ctx.client.chat_id, url = %url, "craigslist: reading feed");

        let items = fetch_feed_items(&self.http, &url).await;
        Ok(select_listings(ctx, &items))
    }
}

/// The RSS URL to read for this client.
pub fn feed_url(client: &ClientConfig, source: &SourceConfig) -> String {
    let base = if source.url.trim().is_empty() {
        build_craigslist_url(
            &client.search_term,
            client.price_min,
            client.price_max,
            &client.target_city,
            None,
        )
    } else {
        source.url.trim().to_string()
    };
    ensure_craigslist_rss(&base, &client.search_term, client.price_min, client.price_max)
}

/// Apply the adapter contract to parsed feed items.
pub fn select_listings(ctx: &ScrapeContext<'_>, items: &[FeedItem]) -> Vec<Listing> {
    let mut collector = ListingCollector::new(ctx);

    for item in items {
        if collector.is_full() {
            debug!(chat_id = %ctx.client.chat_id, "craigslist: listing limit reached");
            break;
        }
        let Some(id) = item_id(&item.guid, &item.link) else {
            continue;
        };
        if !collector.is_new(&id) {
            continue;
        }

        let title = if item.title.is_empty() {
            "Craigslist Listing"
        } else {
            item.title.as_str()
        };
        let combined = format!("{} {}", title, item.description);
        let price = extract_price(title, &item.description);
        if !collector.passes(&combined, Some(&combined), price) {
            continue;
        }

        collector.push(Listing {
            source: "CRAIGSLIST".to_string(),
            id,
            title: title.to_string(),
            price_text: if price > 0.0 {
                format!("$ {}", format_thousands(price))
            } else {
                String::new()
            },
            extra_info: item.description.clone(),
            region: ctx.client.target_city.clone(),
            link: item.link.clone(),
        });
    }

    collector.into_listings()
}

/// Posting ID from the guid, then the link; a hash of whichever is present
/// otherwise. Items with neither are unusable.
pub fn item_id(guid: &str, link: &str) -> Option<String> {
    static HTML_ID: OnceLock<Regex> = OnceLock::new();
    static LONG_NUMBER: OnceLock<Regex> = OnceLock::new();
    let html_id = HTML_ID.get_or_init(|| Regex::new(r"/(\d+)\.html").expect("valid id regex"));
    let long_number =
        LONG_NUMBER.get_or_init(|| Regex::new(r"(\d{6,})").expect("valid id regex"));

    let from_text = |text: &str| {
        html_id
            .captures(text)
            .or_else(|| long_number.captures(text))
            .map(|c| format!("cl_{}", &c[1]))
    };

    let key = if guid.trim().is_empty() { link } else { guid };
    if key.trim().is_empty() {
        return None;
    }
    from_text(guid)
        .or_else(|| from_text(link))
        .or_else(|| Some(format!("cl_{}", stable_id(key.trim()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_core::client::normalize_client;
    use serde_json::json;
    use std::collections::HashSet;

    fn item(title: &str, link: &str, description: &str) -> FeedItem {
        FeedItem {
            title: title.into(),
            link: link.into(),
            guid: String::new(),
            description: description.into(),
            pub_date: String::new(),
        }
    }

    #[test]
    fn test_item_id_prefers_posting_number() {
        assert_eq!(
            item_id("", "https://austin.craigslist.org/bik/d/x/7712345678.html").as_deref(),
            Some("cl_7712345678")
        );
        assert_eq!(
            item_id("post 1234567 ok", "").as_deref(),
            Some("cl_1234567")
        );
        let hashed = item_id("https://x.org/a", "").unwrap();
        assert!(hashed.starts_with("cl_") && hashed.len() == 19);
        assert_eq!(item_id("", ""), None);
    }

    #[test]
    fn test_feed_url_derived_or_literal() {
        let client = normalize_client(&json!({
            "chat_id": "1",
            "search_term": "bike",
            "price_min": 100,
            "price_max": 500,
            "target_city": "Austin",
        }));
        let derived = feed_url(&client, &SourceConfig::default());
        assert!(derived.starts_with("https://austin.craigslist.org/search/sss?"));
        assert!(derived.contains("format=rss"));

        let literal = SourceConfig {
            url: "https://sfbay.craigslist.org/search/bia?query=road".into(),
            ..SourceConfig::default()
        };
        let url = feed_url(&client, &literal);
        assert!(url.starts_with("https://sfbay.craigslist.org/search/bia?query=road"));
        assert!(url.contains("format=rss"));
        assert!(url.contains("min_price=100"));
    }

    #[test]
    fn test_select_listings_filters_and_shapes() {
        let client = normalize_client(&json!({
            "chat_id": "1",
            "price_min": 100,
            "price_max": 500,
            "target_city": "Austin",
            "negative_keywords": ["parts"],
        }));
        let seen: HashSet<String> = ["cl_1000001".to_string()].into_iter().collect();
        let ctx = ScrapeContext {
            client: &client,
            seen: &seen,
            browser: None,
        };
        let items = vec![
            item("Seen bike $200", "https://a.org/1000001.html", "Austin"),
            item("Bike for parts $200", "https://a.org/1000002.html", "Austin"),
            item("Bike $200", "https://a.org/1000003.html", "Dallas"),
            item("Bike $900", "https://a.org/1000004.html", "Austin"),
            item("Bike", "https://a.org/1000005.html", "Austin, asking 1,250"),
            item("Nice bike $250", "https://a.org/1000006.html", "South Austin"),
        ];

        let listings = select_listings(&ctx, &items);
        assert_eq!(listings.len(), 1);
        let l = &listings[0];
        assert_eq!(l.id, "cl_1000006");
        assert_eq!(l.source, "CRAIGSLIST");
        assert_eq!(l.price_text, "$ 250");
        assert_eq!(l.region, "Austin");
        assert_eq!(l.extra_info, "South Austin");
    }

    #[test]
    fn test_select_listings_stops_at_limit() {
        let client = normalize_client(&json!({"chat_id": "1"}));
        let seen = HashSet::new();
        let ctx = ScrapeContext {
            client: &client,
            seen: &seen,
            browser: None,
        };
        let items: Vec<FeedItem> = (0..8)
            .map(|i| item(&format!("Item {i}"), &format!("https://a.org/{}.html", 2000000 + i), ""))
            .collect();
        let listings = select_listings(&ctx, &items);
        assert_eq!(listings.len(), crate::traits::SCRAPE_LIMIT);
        assert_eq!(listings[0].id, "cl_2000000");
        assert_eq!(listings[0].price_text, "");
    }
}
