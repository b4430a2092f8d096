//! Client profile normalization, merging, and upserting.
//!
//! Profiles arrive from three places: the preferences file on disk, the
//! REST API, and the chat bot. All of them may use legacy or alias field
//! names (`termo_busca`, `preco_max`, `cidade`, ...). [`normalize_client`]
//! collapses every alias onto the canonical [`ClientConfig`] shape and
//! fills defaults, so the rest of the system only ever sees one schema.
//!
//! # Alias table
//!
//! | Canonical           | Aliases                               | Default        |
//! |---------------------|---------------------------------------|----------------|
//! | `name`              | `nome`                                | `"Unknown"`    |
//! | `chat_id`           | `chatId`                              | `""`           |
//! | `active`            | `ativo`                               | `true`         |
//! | `search_term`       | `term`, `termo_busca`, `termo`        | `""`           |
//! | `price_min`         | `preco_min`                           | `0`            |
//! | `price_max`         | `preco_max`, `preco`                  | `999999`       |
//! | `target_city`       | `cidade_alvo`, `cidade`               | `""`           |
//! | `strict_city`       | `cidade_filtro`                       | `target_city`  |
//! | `persona`           | `profile`                             | `"SNIPER"`     |
//! | `locale`            | `language`, `lang`                    | `""`           |
//! | `negative_keywords` | `palavras_negativas`                  | `[]`           |
//! | `sources`           | `fontes`                              | all sources    |
//!
//! Aliases are resolved in table order and empty values (`""`, `0`,
//! `null`, `[]`, `{}`) fall through to the next alias, then to the default.
//! Normalization is idempotent.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::i18n::normalize_locale;
use crate::models::{
    ClientConfig, SearchRequest, SourceConfig, DEFAULT_NAME, DEFAULT_PERSONA, PRICE_UNBOUNDED,
};
use crate::urls::{
    build_craigslist_url, build_ebay_url, build_facebook_url, build_mercado_livre_url,
    build_olx_url,
};

/// Known sources and the keys they may appear under in raw input.
pub const SOURCE_KEYS: &[(&str, &[&str])] = &[
    ("craigslist", &["craigslist", "cl"]),
    ("ebay", &["ebay", "e-bay"]),
    ("olx", &["olx"]),
    ("mercado_livre", &["mercado_livre", "mercadolivre", "ml"]),
    ("facebook", &["facebook", "fb", "face"]),
    ("rss", &["rss", "feed", "feeds"]),
];

/// Canonical field name for every accepted alias.
const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("name", &["name", "nome"]),
    ("chat_id", &["chat_id", "chatId"]),
    ("active", &["active", "ativo"]),
    ("search_term", &["search_term", "term", "termo_busca", "termo"]),
    ("price_min", &["price_min", "preco_min"]),
    ("price_max", &["price_max", "preco_max", "preco"]),
    ("target_city", &["target_city", "cidade_alvo", "cidade"]),
    ("strict_city", &["strict_city", "cidade_filtro"]),
    ("persona", &["persona", "profile"]),
    ("locale", &["locale", "language", "lang"]),
    ("negative_keywords", &["negative_keywords", "palavras_negativas"]),
    ("sources", &["sources", "fontes"]),
];

fn aliases_for(field: &str) -> &'static [&'static str] {
    FIELD_ALIASES
        .iter()
        .find(|(canonical, _)| *canonical == field)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

/// Canonical name for a raw key, or the key itself if unknown.
pub fn canonical_field(key: &str) -> &str {
    FIELD_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&key))
        .map(|(canonical, _)| *canonical)
        .unwrap_or(key)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// First truthy value among the aliases of `field`.
fn pick<'a>(raw: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    aliases_for(field)
        .iter()
        .filter_map(|alias| raw.get(*alias))
        .find(|v| is_truthy(v))
}

/// First non-null value among `keys` (a `false` here is meaningful).
fn pick_present<'a>(raw: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find(|v| !v.is_null())
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_float(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .unwrap_or(default),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => default,
    }
}

fn as_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !matches!(
            s.trim().to_lowercase().as_str(),
            "" | "0" | "false" | "no" | "off"
        ),
        Some(Value::Null) | None => default,
        Some(other) => is_truthy(other),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Turn arbitrary client JSON into a canonical [`ClientConfig`].
///
/// Non-object input yields an all-defaults profile.
pub fn normalize_client(raw: &Value) -> ClientConfig {
    let empty = Map::new();
    let raw = raw.as_object().unwrap_or(&empty);

    let name = pick(raw, "name")
        .map(as_text)
        .unwrap_or_else(|| DEFAULT_NAME.to_string());
    let chat_id = pick(raw, "chat_id").map(as_text).unwrap_or_default();
    let active = as_bool(pick_present(raw, aliases_for("active")), true);
    let search_term = pick(raw, "search_term").map(as_text).unwrap_or_default();
    let price_min = as_float(pick(raw, "price_min"), 0.0);
    let price_max = as_float(pick(raw, "price_max"), PRICE_UNBOUNDED);
    let target_city = pick(raw, "target_city").map(as_text).unwrap_or_default();
    let strict_city = pick(raw, "strict_city")
        .map(as_text)
        .unwrap_or_else(|| target_city.clone());
    let persona = pick(raw, "persona")
        .map(as_text)
        .unwrap_or_else(|| DEFAULT_PERSONA.to_string());
    let locale = pick(raw, "locale")
        .map(as_text)
        .filter(|l| !l.trim().is_empty())
        .map(|l| normalize_locale(Some(l.as_str()), "en"))
        .unwrap_or_default();
    let negative_keywords = string_list(pick(raw, "negative_keywords"));
    let raw_sources = pick(raw, "sources").and_then(Value::as_object);

    let sources = normalize_sources(raw_sources, &search_term, price_min, price_max, &target_city);

    ClientConfig {
        chat_id,
        name,
        active,
        search_term,
        price_min,
        price_max,
        target_city,
        strict_city,
        persona,
        negative_keywords,
        sources,
        locale,
    }
}

/// Build the full source map, deriving search URLs where enabled.
///
/// Every known source gets an entry, active unless the input says
/// otherwise. A source with `auto_url` unset that carries a literal `url`
/// keeps it as-is; otherwise the URL is derived from the search fields and
/// `auto_url` is pinned to `true` so the next pass derives it again.
/// RSS has no derivation and is deactivated when it has no URLs.
pub fn normalize_sources(
    raw: Option<&Map<String, Value>>,
    search_term: &str,
    price_min: f64,
    price_max: f64,
    city: &str,
) -> BTreeMap<String, SourceConfig> {
    let empty = Map::new();
    let raw = raw.unwrap_or(&empty);
    let mut out = BTreeMap::new();

    for (key, aliases) in SOURCE_KEYS {
        let entry = aliases
            .iter()
            .find_map(|alias| raw.get(*alias))
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let mut source = normalize_source_entry(entry);

        if *key == "rss" {
            if source.all_urls().is_empty() {
                source.active = false;
            }
            out.insert(key.to_string(), source);
            continue;
        }

        let derive = source.auto_url.unwrap_or(source.url.trim().is_empty());
        source.auto_url = Some(derive);
        if derive {
            let base = Some(source.url.as_str()).filter(|u| !u.trim().is_empty());
            source.url = match *key {
                "craigslist" => build_craigslist_url(search_term, price_min, price_max, city, base),
                "ebay" => build_ebay_url(search_term, price_min, price_max),
                "olx" => build_olx_url(search_term, price_min, price_max, base),
                "mercado_livre" => build_mercado_livre_url(search_term, price_min, price_max, base),
                "facebook" => build_facebook_url(search_term, price_min, price_max, base),
                _ => source.url.clone(),
            };
        }
        out.insert(key.to_string(), source);
    }
    out
}

fn normalize_source_entry(raw: &Map<String, Value>) -> SourceConfig {
    let active = as_bool(pick_present(raw, &["active", "ativo"]), true);
    let url = pick_present(raw, &["url", "link"])
        .map(as_text)
        .unwrap_or_default();
    let auto_url = pick_present(raw, &["auto_url", "auto"]).map(|v| as_bool(Some(v), true));
    let urls = string_list(raw.get("urls"));

    let extra = raw
        .iter()
        .filter(|(k, _)| {
            !matches!(
                k.as_str(),
                "active" | "ativo" | "url" | "link" | "auto_url" | "auto" | "urls"
            )
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    SourceConfig {
        active,
        url,
        auto_url,
        urls,
        extra,
    }
}

/// Overlay a raw partial update onto an existing profile and renormalize.
///
/// Null fields in the update are ignored. `negative_keywords` and
/// `sources` are replaced only when the update supplies a non-empty value.
pub fn merge_client(existing: &ClientConfig, update: &Value) -> ClientConfig {
    let mut merged = match serde_json::to_value(existing) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    if let Some(update) = update.as_object() {
        for (key, value) in update {
            if value.is_null() {
                continue;
            }
            let canonical = canonical_field(key);
            let keep_existing = matches!(canonical, "negative_keywords" | "sources")
                && !is_truthy(value);
            if keep_existing {
                continue;
            }
            merged.insert(canonical.to_string(), value.clone());
        }
    }

    normalize_client(&Value::Object(merged))
}

/// Typed overlay: the incoming profile wins except for empty lists.
fn overlay(existing: &ClientConfig, incoming: ClientConfig) -> ClientConfig {
    let mut merged = incoming;
    if merged.negative_keywords.is_empty() {
        merged.negative_keywords = existing.negative_keywords.clone();
    }
    if merged.sources.is_empty() {
        merged.sources = existing.sources.clone();
    }
    merged
}

/// Insert or replace a profile by `chat_id`, returning the stored result.
pub fn upsert_client(clients: &mut Vec<ClientConfig>, incoming: ClientConfig) -> ClientConfig {
    match clients.iter_mut().find(|c| c.chat_id == incoming.chat_id) {
        Some(slot) => {
            let merged = overlay(slot, incoming);
            *slot = merged.clone();
            merged
        }
        None => {
            clients.push(incoming.clone());
            incoming
        }
    }
}

/// Profile for a chat user who just described what they want.
pub fn client_from_request(
    chat_id: &str,
    name: &str,
    request: &SearchRequest,
    locale: &str,
) -> ClientConfig {
    let display = if name.trim().is_empty() { "User" } else { name };
    normalize_client(&serde_json::json!({
        "chat_id": chat_id,
        "name": display,
        "active": true,
        "search_term": request.product,
        "price_min": 0,
        "price_max": request.max_price,
        "target_city": request.city,
        "strict_city": request.city,
        "persona": DEFAULT_PERSONA,
        "negative_keywords": [],
        "sources": {},
        "locale": locale,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_resolves_aliases() {
        let client = normalize_client(&json!({
            "nome": "Ana",
            "chatId": 42,
            "ativo": false,
            "termo_busca": "bicicleta",
            "preco_min": "50",
            "preco": 800,
            "cidade": "Curitiba",
            "palavras_negativas": ["quebrada"],
            "lang": "pt",
        }));
        assert_eq!(client.name, "Ana");
        assert_eq!(client.chat_id, "42");
        assert!(!client.active);
        assert_eq!(client.search_term, "bicicleta");
        assert_eq!(client.price_min, 50.0);
        assert_eq!(client.price_max, 800.0);
        assert_eq!(client.target_city, "Curitiba");
        assert_eq!(client.strict_city, "Curitiba");
        assert_eq!(client.negative_keywords, vec!["quebrada"]);
        assert_eq!(client.locale, "pt-BR");
        assert_eq!(client.persona, "SNIPER");
    }

    #[test]
    fn test_normalize_defaults() {
        let client = normalize_client(&json!({}));
        assert_eq!(client.name, "Unknown");
        assert!(client.active);
        assert_eq!(client.price_min, 0.0);
        assert_eq!(client.price_max, PRICE_UNBOUNDED);
        assert_eq!(client.locale, "");
        assert_eq!(client.sources.len(), SOURCE_KEYS.len());
        assert!(client.source_active("craigslist"));
        assert!(!client.source_active("rss"));
    }

    #[test]
    fn test_zero_price_max_means_unbounded() {
        let client = normalize_client(&json!({"price_max": 0}));
        assert_eq!(client.price_max, PRICE_UNBOUNDED);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_client(&json!({
            "chat_id": "7",
            "search_term": "ps5 slim",
            "price_min": 100,
            "price_max": 2500,
            "target_city": "São Paulo",
            "sources": {
                "fb": {"active": true},
                "feeds": {"urls": ["https://example.com/rss"]},
                "ebay": {"app_id": "APP-1"},
                "olx": {"link": "https://www.olx.com.br/sp?cat=1"},
            },
        }));
        let again = normalize_client(&serde_json::to_value(&once).unwrap());
        assert_eq!(once, again);
        assert!(once.source_active("rss"));
        assert_eq!(once.sources["ebay"].setting("app_id"), Some("APP-1"));
    }

    #[test]
    fn test_non_finite_prices_fall_back_to_defaults() {
        let once = normalize_client(&json!({
            "chat_id": "8",
            "price_min": "nan",
            "price_max": "inf",
        }));
        assert_eq!(once.price_min, 0.0);
        assert_eq!(once.price_max, PRICE_UNBOUNDED);

        let again = normalize_client(&serde_json::to_value(&once).unwrap());
        assert_eq!(once, again);
        assert_eq!(normalize_client(&json!({"price_max": "-infinity"})).price_max, PRICE_UNBOUNDED);
    }

    #[test]
    fn test_literal_url_is_kept() {
        let client = normalize_client(&json!({
            "search_term": "desk",
            "sources": {"craigslist": {"url": "https://sfbay.craigslist.org/search/sss?query=chair"}},
        }));
        let cl = &client.sources["craigslist"];
        assert_eq!(cl.auto_url, Some(false));
        assert_eq!(cl.url, "https://sfbay.craigslist.org/search/sss?query=chair");
    }

    #[test]
    fn test_auto_url_uses_base_host() {
        let client = normalize_client(&json!({
            "search_term": "desk",
            "sources": {"craigslist": {"url": "https://sfbay.craigslist.org/search/sss", "auto": true}},
        }));
        let cl = &client.sources["craigslist"];
        assert!(cl.url.starts_with("https://sfbay.craigslist.org/search/sss?query=desk"));
    }

    #[test]
    fn test_merge_keeps_lists_on_empty_update() {
        let existing = normalize_client(&json!({
            "chat_id": "1",
            "search_term": "camera",
            "negative_keywords": ["broken"],
        }));
        let merged = merge_client(&existing, &json!({"price_max": 300, "negative_keywords": []}));
        assert_eq!(merged.negative_keywords, vec!["broken"]);
        assert_eq!(merged.price_max, 300.0);
        assert_eq!(merged.search_term, "camera");
    }

    #[test]
    fn test_merge_with_empty_update_is_identity() {
        let existing = normalize_client(&json!({"chat_id": "1", "search_term": "camera"}));
        assert_eq!(merge_client(&existing, &json!({})), existing);
    }

    #[test]
    fn test_merge_maps_aliases_onto_canonical_fields() {
        let existing = normalize_client(&json!({"chat_id": "1", "search_term": "camera"}));
        let merged = merge_client(&existing, &json!({"termo": "lens", "cidade": "Austin"}));
        assert_eq!(merged.search_term, "lens");
        assert_eq!(merged.target_city, "Austin");
        assert!(merged.sources["craigslist"].url.contains("query=lens"));
    }

    #[test]
    fn test_upsert_replaces_by_chat_id() {
        let mut clients = vec![normalize_client(&json!({
            "chat_id": "1",
            "negative_keywords": ["broken"],
        }))];
        let incoming = normalize_client(&json!({"chat_id": "1", "search_term": "tv"}));
        let stored = upsert_client(&mut clients, incoming);
        assert_eq!(clients.len(), 1);
        assert_eq!(stored.search_term, "tv");
        assert_eq!(stored.negative_keywords, vec!["broken"]);

        upsert_client(&mut clients, normalize_client(&json!({"chat_id": "2"})));
        assert_eq!(clients.len(), 2);
    }

    #[test]
    fn test_client_from_request() {
        let request = SearchRequest {
            product: "PlayStation 5".into(),
            max_price: 2500.0,
            city: "Rio".into(),
        };
        let client = client_from_request("99", "", &request, "es");
        assert_eq!(client.chat_id, "99");
        assert_eq!(client.name, "User");
        assert_eq!(client.search_term, "PlayStation 5");
        assert_eq!(client.price_max, 2500.0);
        assert_eq!(client.strict_city, "Rio");
        assert_eq!(client.locale, "es");
        assert!(client.active);
    }
}
