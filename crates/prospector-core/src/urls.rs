//! Search URL builders for each marketplace.
//!
//! Every builder is idempotent: feeding a builder's own output back in as
//! the base URL yields the same URL. Normalization relies on that, since a
//! stored client is re-normalized on every merge.

use url::form_urlencoded::byte_serialize;
use url::Url;

use crate::models::PRICE_UNBOUNDED;
use crate::text::to_slug;

const OLX_DEFAULT: &str = "https://www.olx.com.br/brasil";
const MERCADO_LIVRE_DEFAULT: &str = "https://lista.mercadolivre.com.br/";
const FACEBOOK_DEFAULT: &str = "https://www.facebook.com/marketplace/search/";
const EBAY_SEARCH: &str = "https://www.ebay.com/sch/i.html";

fn whole(price: f64) -> i64 {
    price as i64
}

/// Parse a user-supplied base URL, requiring scheme and host.
fn parse_base(base: Option<&str>) -> Option<Url> {
    let raw = base?.trim();
    if raw.is_empty() {
        return None;
    }
    Url::parse(raw).ok().filter(|u| u.host_str().is_some())
}

/// Replace, remove, or default query parameters while keeping the rest.
///
/// `set` entries with `None` remove the key. `defaults` are only added
/// when the key is absent.
fn update_query(url: &mut Url, set: &[(&str, Option<String>)], defaults: &[(&str, &str)]) {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    for (key, value) in set {
        match value {
            Some(value) => {
                let mut replaced = false;
                pairs.retain_mut(|(k, v)| {
                    if k.as_str() != *key {
                        return true;
                    }
                    if replaced {
                        return false;
                    }
                    *v = value.clone();
                    replaced = true;
                    true
                });
                if !replaced {
                    pairs.push((key.to_string(), value.clone()));
                }
            }
            None => pairs.retain(|(k, _)| k.as_str() != *key),
        }
    }

    for (key, value) in defaults {
        if !pairs.iter().any(|(k, _)| k.as_str() == *key) {
            pairs.push((key.to_string(), value.to_string()));
        }
    }

    url.set_query(None);
    url.set_fragment(None);
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs.iter());
    }
}

/// Craigslist RSS search URL.
///
/// The host of `base` is kept when it parses; otherwise the city slug picks
/// the subdomain (`geo` when there is no city).
pub fn build_craigslist_url(
    search_term: &str,
    price_min: f64,
    price_max: f64,
    city: &str,
    base: Option<&str>,
) -> String {
    let mut url = match parse_base(base) {
        Some(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url
        }
        None => {
            let slug = to_slug(city);
            let subdomain = if slug.is_empty() { "geo".to_string() } else { slug };
            match Url::parse(&format!("https://{subdomain}.craigslist.org/search/sss")) {
                Ok(url) => url,
                Err(_) => return "https://geo.craigslist.org/search/sss?format=rss".to_string(),
            }
        }
    };

    let min = if price_min != 0.0 { whole(price_min) } else { 0 };
    let max = if price_max != 0.0 {
        whole(price_max)
    } else {
        whole(PRICE_UNBOUNDED)
    };
    url.query_pairs_mut()
        .append_pair("query", search_term)
        .append_pair("min_price", &min.to_string())
        .append_pair("max_price", &max.to_string())
        .append_pair("format", "rss");
    url.to_string()
}

/// eBay website search URL (the API adapter builds its own request).
pub fn build_ebay_url(search_term: &str, price_min: f64, price_max: f64) -> String {
    let price = |p: f64| {
        if p != 0.0 {
            whole(p).to_string()
        } else {
            String::new()
        }
    };
    match Url::parse_with_params(
        EBAY_SEARCH,
        &[
            ("_nkw", search_term.to_string()),
            ("_udlo", price(price_min)),
            ("_udhi", price(price_max)),
        ],
    ) {
        Ok(url) => url.to_string(),
        Err(_) => EBAY_SEARCH.to_string(),
    }
}

/// OLX search URL, updating `q`, `ps`, `pe` on the base in place.
pub fn build_olx_url(search_term: &str, price_min: f64, price_max: f64, base: Option<&str>) -> String {
    let Some(mut url) = parse_base(base).or_else(|| Url::parse(OLX_DEFAULT).ok()) else {
        return OLX_DEFAULT.to_string();
    };
    let min = if price_min != 0.0 { whole(price_min) } else { 0 };
    let max = if price_max != 0.0 {
        whole(price_max)
    } else {
        whole(PRICE_UNBOUNDED)
    };
    update_query(
        &mut url,
        &[
            ("q", Some(search_term.to_string())),
            ("ps", Some(min.to_string())),
            ("pe", Some(max.to_string())),
        ],
        &[("sf", "1")],
    );
    url.to_string()
}

/// Mercado Livre listing URL. The term and price range live in the last
/// path segment, which is replaced on every build.
pub fn build_mercado_livre_url(
    search_term: &str,
    price_min: f64,
    price_max: f64,
    base: Option<&str>,
) -> String {
    let Some(mut url) = parse_base(base).or_else(|| Url::parse(MERCADO_LIVRE_DEFAULT).ok()) else {
        return MERCADO_LIVRE_DEFAULT.to_string();
    };
    let min = if price_min > 0.0 { whole(price_min) } else { 0 };
    let max = if price_max > 0.0 {
        whole(price_max)
    } else {
        whole(PRICE_UNBOUNDED)
    };
    let term: String = byte_serialize(search_term.trim().as_bytes()).collect();
    let segment = format!("{term}_PriceRange_{min}BRL-{max}BRL_NoIndex_True");

    let mut parts: Vec<String> = url
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if parts.last().is_some_and(|p| p.contains("_PriceRange_")) {
        parts.pop();
    }
    parts.push(segment);

    url.set_path(&format!("/{}", parts.join("/")));
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

/// Facebook Marketplace search URL. Price bounds are only set when positive.
pub fn build_facebook_url(
    search_term: &str,
    price_min: f64,
    price_max: f64,
    base: Option<&str>,
) -> String {
    let Some(mut url) = parse_base(base).or_else(|| Url::parse(FACEBOOK_DEFAULT).ok()) else {
        return FACEBOOK_DEFAULT.to_string();
    };
    let bound = |p: f64| (p > 0.0).then(|| whole(p).to_string());
    update_query(
        &mut url,
        &[
            ("query", Some(search_term.to_string())),
            ("minPrice", bound(price_min)),
            ("maxPrice", bound(price_max)),
        ],
        &[("sortBy", "creation_time_descend"), ("exact", "false")],
    );
    url.to_string()
}

/// Make sure a Craigslist search URL asks for RSS and carries the search.
///
/// Existing parameters win; only missing ones are added.
pub fn ensure_craigslist_rss(url: &str, search_term: &str, price_min: f64, price_max: f64) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let has = |parsed: &Url, key: &str| parsed.query_pairs().any(|(k, _)| k == key);

    let mut defaults: Vec<(&str, String)> = Vec::new();
    if !has(&parsed, "format") {
        defaults.push(("format", "rss".to_string()));
    }
    if !has(&parsed, "query") && !search_term.trim().is_empty() {
        defaults.push(("query", search_term.to_string()));
    }
    if !has(&parsed, "min_price") && price_min != 0.0 {
        defaults.push(("min_price", whole(price_min).to_string()));
    }
    if !has(&parsed, "max_price") && price_max != 0.0 {
        defaults.push(("max_price", whole(price_max).to_string()));
    }
    if defaults.is_empty() {
        return parsed.to_string();
    }
    let borrowed: Vec<(&str, &str)> = defaults.iter().map(|(k, v)| (*k, v.as_str())).collect();
    update_query(&mut parsed, &[], &borrowed);
    parsed.to_string()
}
