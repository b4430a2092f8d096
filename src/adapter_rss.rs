//! Generic RSS adapter for any feed the client lists.
//!
//! Reads `url` and every entry of `urls` in order. The listing limit is
//! shared across all feeds of one client, so the first feeds win. There is
//! no per-item city check: feed items rarely carry a location, and the
//! engine's post-scan city filter sees the client's target city in
//! `region` anyway.

use anyhow::Result;
use async_trait::async_trait;
use prospector_core::filter::extract_price;
use prospector_core::text::{format_thousands, stable_id};
use prospector_core::Listing;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::feed::{fetch_feed_items, FeedItem};
use crate::http::build_client;
use crate::traits::{ListingCollector, ScrapeContext, SourceAdapter};

pub const SOURCE_KEY: &str = "rss";

pub struct RssAdapter {
    http: reqwest::Client,
}

impl RssAdapter {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn name(&self) -> &str {
        SOURCE_KEY
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>> {
        let Some(source) = ctx.client.active_source(SOURCE_KEY) else {
            return Ok(Vec::new());
        };
        let urls = source.all_urls();
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut collector = ListingCollector::new(ctx);
        for url in &urls {
            if collector.is_full() {
                debug!(chat_id = %ctx.client.chat_id, "rss: listing limit reached");
                break;
            }
            info!(chat_id = %ctx.client.chat_id, url = %url, "rss: reading feed");
            let items = fetch_feed_items(&self.http, url).await;
            collect_feed(&mut collector, ctx, &source_label(url), &items);
        }
        Ok(collector.into_listings())
    }
}

/// `RSS:<domain>` with any `www.` prefix dropped, or plain `RSS`.
pub fn source_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .filter(|h| !h.is_empty())
        .map(|h| format!("RSS:{h}"))
        .unwrap_or_else(|| "RSS".to_string())
}

/// Feed items to listings, pushing into a collector shared across feeds.
pub fn collect_feed(
    collector: &mut ListingCollector<'_>,
    ctx: &ScrapeContext<'_>,
    label: &str,
    items: &[FeedItem],
) {
    for item in items {
        if collector.is_full() {
            break;
        }
        let key = if item.guid.is_empty() {
            item.link.as_str()
        } else {
            item.guid.as_str()
        };
        if key.is_empty() {
            continue;
        }
        let id = format!("rss_{}", stable_id(key));
        if !collector.is_new(&id) {
            continue;
        }

        let title = if item.title.is_empty() {
            "RSS Listing"
        } else {
            item.title.as_str()
        };
        let combined = format!("{} {}", title, item.description);
        let price = extract_price(title, &item.description);
        if !collector.passes(&combined, None, price) {
            continue;
        }

        collector.push(Listing {
            source: label.to_string(),
            id,
            title: title.to_string(),
            price_text: if price > 0.0 {
                format_thousands(price)
            } else {
                String::new()
            },
            extra_info: item.description.clone(),
            region: ctx.client.target_city.clone(),
            link: item.link.clone(),
        });
    }
}
