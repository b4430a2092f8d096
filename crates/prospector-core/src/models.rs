//! Data types shared by the scanner, storage, and HTTP surfaces.
//!
//! These are the serialized forms. [`ClientConfig`] is always the
//! *normalized* shape; raw, alias-laden JSON goes through
//! [`crate::client::normalize_client`] before it becomes one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper price bound used when a client sets none.
pub const PRICE_UNBOUNDED: f64 = 999_999.0;

/// Persona assigned to clients that do not pick one.
pub const DEFAULT_PERSONA: &str = "SNIPER";

/// Display name assigned to clients that do not supply one.
pub const DEFAULT_NAME: &str = "Unknown";

/// A single marketplace listing produced by a source adapter.
///
/// `id` is namespaced by source (`cl_`, `ebay_`, `rss_`, `fb_`) and stable
/// across scans, so it can be recorded in the seen ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub source: String,
    pub id: String,
    pub title: String,
    pub price_text: String,
    #[serde(default)]
    pub extra_info: String,
    #[serde(default)]
    pub region: String,
    pub link: String,
}

/// Per-source settings inside a client profile.
///
/// Adapter-specific keys (`app_id`, `global_id`, `currency`, `keywords`)
/// are kept verbatim in `extra` and read with [`SourceConfig::setting`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub active: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_url: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            active: true,
            url: String::new(),
            auto_url: None,
            urls: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl SourceConfig {
    /// Non-empty string setting from the adapter-specific keys.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// `url` followed by `urls`, blanks and duplicates removed.
    pub fn all_urls(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for candidate in std::iter::once(&self.url).chain(self.urls.iter()) {
            let trimmed = candidate.trim();
            if !trimmed.is_empty() && !out.iter().any(|u| u == trimmed) {
                out.push(trimmed.to_string());
            }
        }
        out
    }
}

/// A normalized client profile: one per chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub chat_id: String,
    pub name: String,
    pub active: bool,
    pub search_term: String,
    pub price_min: f64,
    pub price_max: f64,
    pub target_city: String,
    pub strict_city: String,
    pub persona: String,
    pub negative_keywords: Vec<String>,
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub locale: String,
}

impl ClientConfig {
    /// The source entry if present and active.
    pub fn active_source(&self, key: &str) -> Option<&SourceConfig> {
        self.sources.get(key).filter(|s| s.active)
    }

    pub fn source_active(&self, key: &str) -> bool {
        self.active_source(key).is_some()
    }

    /// City used by the post-scrape filter: `strict_city`, else `target_city`.
    pub fn city_filter(&self) -> &str {
        if self.strict_city.trim().is_empty() {
            &self.target_city
        } else {
            &self.strict_city
        }
    }
}

/// Structured search extracted from a free-text chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub product: String,
    pub max_price: f64,
    pub city: String,
}

impl SearchRequest {
    /// All three fields are present and the price is positive.
    pub fn is_complete(&self) -> bool {
        !self.product.trim().is_empty() && !self.city.trim().is_empty() && self.max_price > 0.0
    }
}
