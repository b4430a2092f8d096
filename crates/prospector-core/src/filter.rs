//! Listing filters applied inside adapters and after a scan.
//!
//! Adapters run the checks in a fixed order for each candidate: seen
//! ledger, negative keywords, city, then price. [`ListingFilter`] bundles
//! the client-derived parts so adapters don't re-normalize per item.

use crate::models::{ClientConfig, Listing};
use crate::text::{normalize_text, parse_price};

/// Keep only listings whose `extra_info + region` mentions `city`.
///
/// Cities shorter than three characters disable the filter.
pub fn filter_by_city(listings: Vec<Listing>, city: &str) -> Vec<Listing> {
    if city.chars().count() < 3 {
        return listings;
    }
    let target = normalize_text(city);
    listings
        .into_iter()
        .filter(|listing| {
            let haystack = normalize_text(&format!("{} {}", listing.extra_info, listing.region));
            haystack.contains(&target)
        })
        .collect()
}

/// Price from the primary text, falling back to the secondary text when
/// the primary yields nothing.
pub fn extract_price(primary: &str, fallback: &str) -> f64 {
    let price = parse_price(primary);
    if price > 0.0 {
        price
    } else {
        parse_price(fallback)
    }
}

/// Per-client filter state, built once per adapter call.
#[derive(Debug, Clone)]
pub struct ListingFilter {
    negative_keywords: Vec<String>,
    city: String,
    price_min: f64,
    price_max: f64,
}

impl ListingFilter {
    pub fn for_client(client: &ClientConfig) -> Self {
        Self::new(
            &client.negative_keywords,
            &client.target_city,
            client.price_min,
            client.price_max,
        )
    }

    pub fn new(negative_keywords: &[String], city: &str, price_min: f64, price_max: f64) -> Self {
        Self {
            negative_keywords: negative_keywords
                .iter()
                .map(|k| normalize_text(k))
                .filter(|k| !k.is_empty())
                .collect(),
            city: normalize_text(city),
            price_min,
            price_max,
        }
    }

    /// Text contains any negative keyword (accent and case insensitive).
    pub fn has_negative_keyword(&self, text: &str) -> bool {
        if self.negative_keywords.is_empty() {
            return false;
        }
        let text = normalize_text(text);
        self.negative_keywords.iter().any(|k| text.contains(k.as_str()))
    }

    /// A city is configured and `text` does not mention it.
    pub fn outside_city(&self, text: &str) -> bool {
        !self.city.is_empty() && !normalize_text(text).contains(&self.city)
    }

    /// Inclusive range check. An inverted range accepts nothing.
    pub fn price_in_range(&self, price: f64) -> bool {
        price >= self.price_min && price <= self.price_max
    }
}
