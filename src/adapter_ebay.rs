//! eBay adapter backed by the Finding API (`findItemsByKeywords`).
//!
//! Credentials and marketplace settings come from the client's `ebay`
//! source entry first, then from the `[ebay]` config section. Without an
//! app ID the adapter returns nothing.
//!
//! ```toml
//! [ebay]
//! app_id = "..."            # or EBAY_APP_ID
//! global_id = "EBAY-US"
//! currency = "USD"
//! ```
//!
//! The API wraps every scalar in a one-element array; [`parse_items`]
//! flattens that into [`EbayItem`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use prospector_core::text::parse_price;
use prospector_core::{Listing, PRICE_UNBOUNDED};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EbayConfig;
use crate::http::{build_client, fetch_json};
use crate::traits::{ListingCollector, ScrapeContext, SourceAdapter};

pub const SOURCE_KEY: &str = "ebay";

/// Upstream page size. Larger than the listing limit so filtering has
/// something to choose from.
const ENTRIES_PER_PAGE: &str = "20";

/// One search result, flattened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EbayItem {
    pub item_id: String,
    pub title: String,
    pub link: String,
    pub location: String,
    /// `"<currency> <value>"`, or just the value when no currency is given.
    pub price: String,
}

/// Query parameters for one Finding API call.
#[derive(Debug, Clone)]
pub struct EbayQuery<'a> {
    pub keywords: &'a str,
    pub app_id: &'a str,
    pub global_id: &'a str,
    pub currency: &'a str,
    pub price_min: f64,
    pub price_max: f64,
}

pub struct EbayAdapter {
    http: reqwest::Client,
    config: EbayConfig,
}

impl EbayAdapter {
    pub fn new(config: EbayConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            config,
        })
    }

    /// Full request URL against the configured endpoint.
    pub fn request_url(&self, query: &EbayQuery<'_>) -> Result<Url> {
        let mut params: Vec<(String, String)> = vec![
            ("OPERATION-NAME".into(), "findItemsByKeywords".into()),
            ("SERVICE-VERSION".into(), "1.0.0".into()),
            ("SECURITY-APPNAME".into(), query.app_id.into()),
            ("RESPONSE-DATA-FORMAT".into(), "JSON".into()),
            ("REST-PAYLOAD".into(), "true".into()),
            ("GLOBAL-ID".into(), query.global_id.into()),
            ("keywords".into(), query.keywords.into()),
            ("paginationInput.entriesPerPage".into(), ENTRIES_PER_PAGE.into()),
        ];

        let mut filters = Vec::new();
        if query.price_min != 0.0 {
            filters.push(("MinPrice", query.price_min));
        }
        if query.price_max != 0.0 && query.price_max < PRICE_UNBOUNDED {
            filters.push(("MaxPrice", query.price_max));
        }
        for (idx, (name, value)) in filters.into_iter().enumerate() {
            let key = |field: &str| format!("itemFilter({idx}).{field}");
            params.push((key("name"), name.into()));
            params.push((key("value"), value.to_string()));
            params.push((key("paramName"), "Currency".into()));
            params.push((key("paramValue"), query.currency.into()));
        }

        Url::parse_with_params(&self.config.endpoint, &params)
            .with_context(|| format!("Invalid eBay endpoint: {}", self.config.endpoint))
    }
}

#[async_trait]
impl SourceAdapter for EbayAdapter {
    fn name(&self) -> &str {
        SOURCE_KEY
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<Vec<Listing>> {
        let Some(source) = ctx.client.active_source(SOURCE_KEY) else {
            return Ok(Vec::new());
        };

        let app_id = source.setting("app_id").unwrap_or(self.config.app_id.trim());
        if app_id.is_empty() {
            warn!(chat_id = %ctx.client.chat_id, "ebay: no app id configured, skipping");
            return Ok(Vec::new());
        }
        let keywords = source
            .setting("keywords")
            .unwrap_or(ctx.client.search_term.trim());
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let query = EbayQuery {
            keywords,
            app_id,
            global_id: source.setting("global_id").unwrap_or(&self.config.global_id),
            currency: source.setting("currency").unwrap_or(&self.config.currency),
            price_min: ctx.client.price_min,
            price_max: ctx.client.price_max,
        };
        let url = self.request_url(&query)?;
        info!(chat_id = %ctx.client.chat_id, "ebay: querying API");

        let Some(payload) = fetch_json(&self.http, url.as_str()).await else {
            return Ok(Vec::new());
        };
        Ok(select_listings(ctx, &parse_items(&payload)))
    }
}

/// Apply the adapter contract to parsed API items.
pub fn select_listings(ctx: &ScrapeContext<'_>, items: &[EbayItem]) -> Vec<Listing> {
    let mut collector = ListingCollector::new(ctx);

    for item in items {
        if collector.is_full() {
            debug!(chat_id = %ctx.client.chat_id, "ebay: listing limit reached");
            break;
        }
        if item.item_id.is_empty() {
            continue;
        }
        let id = format!("ebay_{}", item.item_id);
        if !collector.is_new(&id) {
            continue;
        }

        let title = if item.title.is_empty() {
            "eBay Listing"
        } else {
            item.title.as_str()
        };
        let price = parse_price(&item.price);
        if !collector.passes(title, Some(&item.location), price) {
            continue;
        }

        collector.push(Listing {
            source: "EBAY".to_string(),
            id,
            title: title.to_string(),
            price_text: item.price.clone(),
            extra_info: item.location.clone(),
            region: item.location.clone(),
            link: item.link.clone(),
        });
    }

    collector.into_listings()
}

/// Flatten `findItemsByKeywordsResponse[0].searchResult[0].item[]`.
pub fn parse_items(payload: &Value) -> Vec<EbayItem> {
    let items = payload
        .get("findItemsByKeywordsResponse")
        .and_then(first)
        .and_then(|root| root.get("searchResult"))
        .and_then(first)
        .and_then(|result| result.get("item"))
        .and_then(Value::as_array);
    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| {
            let price = item
                .get("sellingStatus")
                .and_then(first)
                .and_then(|s| s.get("currentPrice"))
                .and_then(first)
                .map(|current| {
                    let value = scalar(current.get("__value__"));
                    let currency = scalar(current.get("@currencyId"));
                    match (value.is_empty(), currency.is_empty()) {
                        (true, _) => String::new(),
                        (false, true) => value,
                        (false, false) => format!("{currency} {value}"),
                    }
                })
                .unwrap_or_default();
            EbayItem {
                item_id: scalar(item.get("itemId")),
                title: scalar(item.get("title")),
                link: scalar(item.get("viewItemURL")),
                location: scalar(item.get("location")),
                price,
            }
        })
        .collect()
}

/// First element of a JSON array, or the value itself when it isn't one.
fn first(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(values) => values.first(),
        Value::Null => None,
        other => Some(other),
    }
}

fn scalar(value: Option<&Value>) -> String {
    match value.and_then(first) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_core::client::normalize_client;
    use serde_json::json;
    use std::collections::HashSet;

    fn payload() -> Value {
        json!({
            "findItemsByKeywordsResponse": [{
                "searchResult": [{
                    "item": [
                        {
                            "itemId": ["111"],
                            "title": ["Road bike"],
                            "viewItemURL": ["https://www.ebay.com/itm/111"],
                            "location": ["Austin,TX,USA"],
                            "sellingStatus": [{"currentPrice": [{"@currencyId": "USD", "__value__": "250.0"}]}]
                        },
                        {
                            "itemId": ["222"],
                            "title": ["Bike frame cracked"],
                            "location": ["Austin,TX,USA"],
                            "sellingStatus": [{"currentPrice": [{"__value__": "90.0"}]}]
                        },
                        {"title": ["no id"]},
                        "junk"
                    ]
                }]
            }]
        })
    }

    #[test]
    fn test_parse_items_flattens() {
        let items = parse_items(&payload());
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].item_id, "111");
        assert_eq!(items[0].price, "USD 250.0");
        assert_eq!(items[0].link, "https://www.ebay.com/itm/111");
        assert_eq!(items[1].price, "90.0");
        assert!(items[2].item_id.is_empty());
        assert!(parse_items(&json!({"other": 1})).is_empty());
    }

    #[test]
    fn test_select_listings() {
        let client = normalize_client(&json!({
            "chat_id": "1",
            "price_min": 100,
            "price_max": 500,
            "target_city": "austin",
            "negative_keywords": ["cracked"],
        }));
        let seen = HashSet::new();
        let ctx = ScrapeContext {
            client: &client,
            seen: &seen,
            browser: None,
        };
        let listings = select_listings(&ctx, &parse_items(&payload()));
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id, "ebay_111");
        assert_eq!(listings[0].source, "EBAY");
        assert_eq!(listings[0].price_text, "USD 250.0");
        assert_eq!(listings[0].region, "Austin,TX,USA");
    }

    #[test]
    fn test_request_url_filters() {
        let adapter = EbayAdapter::new(EbayConfig::default(), Duration::from_secs(5)).unwrap();
        let query = EbayQuery {
            keywords: "road bike",
            app_id: "APP",
            global_id: "EBAY-US",
            currency: "USD",
            price_min: 100.0,
            price_max: PRICE_UNBOUNDED,
        };
        let url = adapter.request_url(&query).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("SECURITY-APPNAME"), Some("APP"));
        assert_eq!(get("keywords"), Some("road bike"));
        assert_eq!(get("itemFilter(0).name"), Some("MinPrice"));
        assert_eq!(get("itemFilter(0).value"), Some("100"));
        assert_eq!(get("itemFilter(1).name"), None);
    }
}
