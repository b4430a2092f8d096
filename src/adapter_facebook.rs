//! Facebook Marketplace adapter. Needs the cycle's browser session.
//!
//! Every anchor pointing at `/marketplace/item/<id>` is one card. The card
//! text is split into non-blank lines: the first is the title, the first
//! line with a digit is the price, and the last is the location.

use anyhow::Result;
use async_trait::async_trait;
use prospector_core::text::parse_price;
use prospector_core::Listing;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

use crate::browser::PageElement;
use crate::traits::{ListingCollector, ScrapeContext, SourceAdapter};

pub const SOURCE_KEY: &str = "facebook";

/// CSS selector matching listing cards.
pub const CARD_SELECTOR: &str = r#"a[href*="/marketplace/item/"]"#;

pub struct FacebookAdapter {
    dom_wait: Duration,
}

impl FacebookAdapter {
    pub fn new(dom_wait: Duration) -> Self {
        Self { dom_wait }
    }
}

#[async_trait]
impl SourceAdapter for FacebookAdapter {
    fn name(&self) -> &str {
        SOURCE_KEY
    }

    fn requires_browser(&self) -> bool {
        true
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>> {
        let Some(source) = ctx.client.active_source(SOURCE_KEY) else {
            return Ok(Vec::new());
        };
        let url = source.url.trim();
        if url.is_empty() {
            return Ok(Vec::new());
        }
        let Some(browser) = ctx.browser else {
            return Ok(Vec::new());
        };

        info!(chat_id = %ctx.client.chat_id, "facebook: opening marketplace");
        let cards = match browser.open(url, CARD_SELECTOR, self.dom_wait).await {
            Ok(cards) => cards,
            Err(e) => {
                debug!(chat_id = %ctx.client.chat_id, error = %e, "facebook: no listing cards");
                return Ok(Vec::new());
            }
        };
        Ok(select_listings(ctx, &cards))
    }
}

/// Apply the adapter contract to listing cards.
pub fn select_listings(ctx: &ScrapeContext<'_>, cards: &[PageElement]) -> Vec<Listing> {
    let mut collector = ListingCollector::new(ctx);

    for card in cards {
        if collector.is_full() {
            debug!(chat_id = %ctx.client.chat_id, "facebook: listing limit reached");
            break;
        }
        let Some(item_id) = card.href.as_deref().and_then(item_number) else {
            continue;
        };
        let id = format!("fb_{item_id}");
        if !collector.is_new(&id) {
            continue;
        }

        let lines: Vec<&str> = card
            .text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let price_line = lines
            .iter()
            .find(|l| l.chars().any(|c| c.is_ascii_digit()))
            .copied()
            .unwrap_or("0");
        let price = parse_price(price_line);
        if !collector.passes(&card.text, Some(&card.text), price) {
            continue;
        }

        collector.push(Listing {
            source: "FACEBOOK".to_string(),
            id,
            title: lines
                .first()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "Facebook Listing".to_string()),
            price_text: price_line.to_string(),
            extra_info: lines.last().map(|l| l.to_string()).unwrap_or_default(),
            region: String::new(),
            link: format!("https://facebook.com/marketplace/item/{item_id}/"),
        });
    }

    collector.into_listings()
}

fn item_number(href: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/marketplace/item/(\d+)").expect("valid item regex"))
        .captures(href)
        .map(|c| c[1].to_string())
}
