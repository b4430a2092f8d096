//! Conversion between client profiles and the historical preference shape
//! served under `/api/preferences`.
//!
//! Older front-ends address profiles by registry position and use the
//! Portuguese field names:
//!
//! | Preference field | Profile field |
//! |------------------|---------------|
//! | `produto` | `search_term` |
//! | `cidade_alvo` | `target_city` |
//! | `preco_min` / `preco_max` | `price_min` / `price_max` |
//! | `palavras_negativas` | `negative_keywords` |
//! | `fontes.<name>.{ativo,url}` | `sources.<key>.{active,url}` |
//! | `<name>_ativo`, `<name>_url` | same, flat form (wins over `fontes`) |

use prospector_core::ClientConfig;
use serde_json::{json, Map, Value};

/// Source keys and the names older payloads use for them.
const LEGACY_SOURCES: &[(&str, &str)] = &[
    ("craigslist", "craigslist"),
    ("ebay", "ebay"),
    ("facebook", "facebook"),
    ("mercado_livre", "mercadolivre"),
    ("olx", "olx"),
    ("rss", "rss"),
];

/// Field renames applied to incoming preference payloads, first match wins.
const LEGACY_FIELDS: &[(&str, &[&str])] = &[
    ("chat_id", &["chat_id", "chatId"]),
    ("name", &["name", "nome"]),
    ("active", &["active", "ativo"]),
    ("search_term", &["produto", "product", "search_term"]),
    ("target_city", &["cidade_alvo", "city", "target_city"]),
    ("strict_city", &["strict_city", "cidade_filtro"]),
    ("price_min", &["preco_min", "price_min"]),
    ("price_max", &["preco_max", "price_max"]),
    ("negative_keywords", &["palavras_negativas", "negative_keywords"]),
];

/// Render a profile in the historical preference shape.
pub fn client_to_preference(client: &ClientConfig) -> Value {
    let fontes: Map<String, Value> = LEGACY_SOURCES
        .iter()
        .map(|(key, name)| {
            let (active, url) = client
                .sources
                .get(*key)
                .map(|s| (s.active, s.url.clone()))
                .unwrap_or((true, String::new()));
            (name.to_string(), json!({ "ativo": active, "url": url }))
        })
        .collect();

    json!({
        "chat_id": client.chat_id,
        "ativo": client.active,
        "produto": client.search_term,
        "cidade_alvo": client.target_city,
        "preco_min": client.price_min,
        "preco_max": client.price_max,
        "palavras_negativas": client.negative_keywords,
        "fontes": fontes,
    })
}

/// Translate a preference payload into a partial profile update.
///
/// Only fields present (and non-null) in `data` appear in the result, so
/// the update can be merged onto a stored profile. Source entries are laid
/// over `existing`'s sources so toggling one source leaves the rest alone.
pub fn preference_to_update(data: &Value, existing: Option<&ClientConfig>) -> Value {
    let empty = Map::new();
    let raw = data.as_object().unwrap_or(&empty);
    let mut update = Map::new();

    for (field, keys) in LEGACY_FIELDS {
        if let Some(value) = keys.iter().filter_map(|k| raw.get(*k)).find(|v| !v.is_null()) {
            update.insert(field.to_string(), value.clone());
        }
    }

    let fontes = raw
        .get("fontes")
        .or_else(|| raw.get("sources"))
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let mut sources = match existing.map(|c| serde_json::to_value(&c.sources)) {
        Some(Ok(Value::Object(map))) => map,
        _ => Map::new(),
    };
    let mut touched = false;

    for (key, name) in LEGACY_SOURCES {
        let nested = fontes
            .get(*name)
            .or_else(|| fontes.get(*key))
            .and_then(Value::as_object);
        let active = present(raw.get(&format!("{name}_ativo")))
            .or_else(|| nested.and_then(|n| present(n.get("ativo").or_else(|| n.get("active")))));
        let url = present(raw.get(&format!("{name}_url")))
            .or_else(|| nested.and_then(|n| present(n.get("url"))));
        if active.is_none() && url.is_none() {
            continue;
        }

        let entry = sources
            .entry(key.to_string())
            .or_insert_with(|| json!({ "active": true, "url": "" }));
        if let Some(obj) = entry.as_object_mut() {
            if let Some(active) = active {
                obj.insert("active".into(), active.clone());
            }
            if let Some(url) = url {
                obj.insert("url".into(), url.clone());
                // A URL supplied here is a literal and stops auto-derivation.
                obj.insert("auto_url".into(), Value::Bool(false));
            }
        }
        touched = true;
    }

    if touched {
        update.insert("sources".into(), Value::Object(sources));
    }
    Value::Object(update)
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}
