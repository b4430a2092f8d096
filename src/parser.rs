//! Turns a free-text chat message into a [`SearchRequest`].
//!
//! Two strategies sit behind [`RequestParser`]. [`create_parser`] picks one
//! at startup:
//!
//! | Strategy | When | How |
//! |----------|------|-----|
//! | [`GeminiParser`] | `parser.gemini_api_key` set | generative-language API, JSON extraction |
//! | [`HeuristicParser`] | otherwise | text after ` in ` / ` em ` is the city, the last number before it the price |
//!
//! The remote strategy falls back to the heuristic on any transport or
//! decoding failure, so callers never see an error, only a reply and an
//! optional request.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use prospector_core::i18n::{language_name, t};
use prospector_core::text::parse_price;
use prospector_core::SearchRequest;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, ParserConfig};

const SYSTEM_PROMPT: &str = r#"You are a parameter extractor.
Your only job is to extract: Product, Maximum Price, and City from the user text.
Do NOT chat. Do NOT explain. Output ONLY valid JSON.
{
  "status": "READY",
  "product": "...",
  "max_price": 0.0,
  "city": "..."
}"#;

/// A reply for the user plus the request, when one could be extracted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseOutcome {
    pub reply: String,
    #[serde(rename = "payload")]
    pub request: Option<SearchRequest>,
}

#[async_trait]
pub trait RequestParser: Send + Sync {
    fn name(&self) -> &str;

    async fn parse(&self, text: &str, locale: Option<&str>) -> ParseOutcome;
}

/// Pick the parser for this process.
pub fn create_parser(config: &Config) -> Result<Arc<dyn RequestParser>> {
    if config.parser.gemini_api_key.trim().is_empty() {
        info!("request parser: heuristic");
        return Ok(Arc::new(HeuristicParser));
    }
    info!(model = %config.parser.model, "request parser: gemini");
    Ok(Arc::new(GeminiParser::new(&config.parser)?))
}

// ═══════════════════════════════════════════════════════════════════════
// Heuristic
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicParser;

#[async_trait]
impl RequestParser for HeuristicParser {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn parse(&self, text: &str, locale: Option<&str>) -> ParseOutcome {
        fallback_outcome(text, locale)
    }
}

fn fallback_outcome(text: &str, locale: Option<&str>) -> ParseOutcome {
    match heuristic_parse(text) {
        Some(request) => ParseOutcome {
            reply: t(locale, "ai_fallback_starting", &[]),
            request: Some(request),
        },
        None => ParseOutcome {
            reply: t(locale, "ai_fallback_prompt", &[]),
            request: None,
        },
    }
}

/// `"iPhone 13 up to 3000 in Sao Paulo"` style messages.
///
/// Whatever follows ` in ` (or the Portuguese ` em `) is the city. The last
/// number before it is the max price, so model numbers in the product name
/// survive. The product is the rest, minus currency symbols and a trailing
/// "up to" style filler.
pub fn heuristic_parse(message: &str) -> Option<SearchRequest> {
    static IN: OnceLock<Regex> = OnceLock::new();
    static EM: OnceLock<Regex> = OnceLock::new();
    static NUMBERS: OnceLock<Regex> = OnceLock::new();
    let in_re = IN.get_or_init(|| Regex::new(r"(?i)\sin\s").expect("valid connector regex"));
    let em_re = EM.get_or_init(|| Regex::new(r"(?i)\sem\s").expect("valid connector regex"));
    let numbers = NUMBERS.get_or_init(|| Regex::new(r"\d+[\d.,]*").expect("valid number regex"));

    let text = message.trim();
    if text.is_empty() {
        return None;
    }
    let connector = in_re.find(text).or_else(|| em_re.find(text))?;
    let city = text[connector.end()..].trim().to_string();
    let head = &text[..connector.start()];

    let price = numbers.find_iter(head).last()?;
    let max_price = parse_price(price.as_str());

    let rest = format!("{} {}", &head[..price.start()], &head[price.end()..]);
    let mut words: Vec<&str> = rest
        .split_whitespace()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .filter(|word| !matches!(word.to_lowercase().as_str(), "r$" | "us$" | "usd" | "brl"))
        .collect();
    while words
        .last()
        .is_some_and(|w| PRICE_FILLERS.contains(&w.to_lowercase().as_str()))
    {
        words.pop();
    }

    let request = SearchRequest {
        product: words.join(" "),
        max_price,
        city,
    };
    request.is_complete().then_some(request)
}

/// Words that introduce a price and are dropped from the end of a product.
const PRICE_FILLERS: &[&str] = &[
    "up", "to", "under", "max", "for", "below", "ate", "até", "por", "hasta", "menos", "de",
    "bis", "unter", "jusqu'a", "jusqu'à", "fino", "a", "sotto",
];

// ═══════════════════════════════════════════════════════════════════════
// Gemini
// ═══════════════════════════════════════════════════════════════════════

/// Generative-language API parser.
pub struct GeminiParser {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiParser {
    pub fn new(config: &ParserConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key: config.gemini_api_key.trim().to_string(),
            model: config.model.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, body_text);
        }

        let json: Value = response.json().await.context("Invalid Gemini response")?;
        let text = json
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }
}

#[async_trait]
impl RequestParser for GeminiParser {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn parse(&self, text: &str, locale: Option<&str>) -> ParseOutcome {
        let prompt = format!(
            "{SYSTEM_PROMPT}\n\nUser language: {}.\n\nUser: {text}",
            language_name(locale)
        );
        let reply = match self.generate(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "remote parser unavailable, using heuristic");
                return fallback_outcome(text, locale);
            }
        };
        debug!(reply = %reply, "remote parser reply");

        let (reply_text, payload) = extract_json_payload(&reply);
        match payload.as_ref().and_then(normalize_payload) {
            Some(request) => ParseOutcome {
                reply: non_empty_or(reply_text, || t(locale, "ai_ready", &[])),
                request: Some(request),
            },
            None => ParseOutcome {
                reply: non_empty_or(reply_text, || t(locale, "ai_missing_fields", &[])),
                request: None,
            },
        }
    }
}

fn non_empty_or(text: String, default: impl FnOnce() -> String) -> String {
    if text.trim().is_empty() {
        default()
    } else {
        text
    }
}

/// Split a model reply into its prose and its JSON object.
///
/// A fenced ```` ```json ```` block wins; otherwise the outermost `{...}`
/// span is tried.
pub fn extract_json_payload(text: &str) -> (String, Option<Value>) {
    if text.trim().is_empty() {
        return (String::new(), None);
    }

    if let Some((before, rest)) = text.split_once("```json") {
        let reply = before.trim().to_string();
        let block = rest.split("```").next().unwrap_or_default().trim();
        return (reply, serde_json::from_str(block).ok());
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            let candidate = &text[start..=end];
            return match serde_json::from_str::<Value>(candidate) {
                Ok(value) => (text.replacen(candidate, "", 1).trim().to_string(), Some(value)),
                Err(_) => (text.trim().to_string(), None),
            };
        }
    }

    (text.trim().to_string(), None)
}

/// Validate and coerce a model payload into a request.
///
/// A present `status` other than `READY` rejects the payload. Field names
/// in Portuguese are accepted too.
pub fn normalize_payload(payload: &Value) -> Option<SearchRequest> {
    let obj = payload.as_object()?;
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k))
            .filter(|v| !v.is_null())
    };

    let status = field(&["status", "STATUS"])
        .map(|v| match v {
            Value::String(s) => s.trim().to_uppercase(),
            other => other.to_string().to_uppercase(),
        })
        .unwrap_or_default();
    if !status.is_empty() && status != "READY" {
        return None;
    }

    let text_of = |v: &Value| match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    let product = text_of(field(&["product", "produto", "item"])?);
    let city = text_of(field(&["city", "cidade"])?);
    let max_price = match field(&["max_price", "preco", "price"])? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };

    if product.is_empty() || city.is_empty() {
        return None;
    }
    Some(SearchRequest {
        product,
        max_price,
        city,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_parse_english() {
        let request = heuristic_parse("road bike $300 in Austin").unwrap();
        assert_eq!(request.product, "road bike");
        assert_eq!(request.max_price, 300.0);
        assert_eq!(request.city, "Austin");
    }

    #[test]
    fn test_heuristic_parse_portuguese() {
        let request = heuristic_parse("iPhone 13 até 3.000 em São Paulo").unwrap();
        assert_eq!(request.max_price, 3000.0);
        assert_eq!(request.city, "São Paulo");
        assert_eq!(request.product, "iPhone 13");
    }

    #[test]
    fn test_heuristic_parse_keeps_model_numbers() {
        let request = heuristic_parse("PlayStation 5 up to 2500 in Sao Paulo").unwrap();
        assert_eq!(request.product, "PlayStation 5");
        assert_eq!(request.max_price, 2500.0);
    }

    #[test]
    fn test_heuristic_parse_requires_all_fields() {
        assert!(heuristic_parse("").is_none());
        assert!(heuristic_parse("bike in Austin").is_none());
        assert!(heuristic_parse("bike 300").is_none());
        assert!(heuristic_parse("300 in Austin").is_none());
    }

    #[test]
    fn test_extract_json_payload_fenced() {
        let (reply, payload) = extract_json_payload(
            "Sure!\n```json\n{\"status\": \"READY\", \"product\": \"tv\", \"max_price\": 500, \"city\": \"Rio\"}\n```",
        );
        assert_eq!(reply, "Sure!");
        let request = normalize_payload(&payload.unwrap()).unwrap();
        assert_eq!(request.product, "tv");
        assert_eq!(request.max_price, 500.0);
    }

    #[test]
    fn test_extract_json_payload_inline() {
        let (reply, payload) =
            extract_json_payload(r#"Here: {"produto": "sofa", "preco": "750", "cidade": "Recife"}"#);
        assert_eq!(reply, "Here:");
        let request = normalize_payload(&payload.unwrap()).unwrap();
        assert_eq!(request.city, "Recife");
        assert_eq!(request.max_price, 750.0);

        let (reply, payload) = extract_json_payload("no json {here");
        assert_eq!(reply, "no json {here");
        assert!(payload.is_none());
    }

    #[test]
    fn test_normalize_payload_rejects_incomplete() {
        assert!(normalize_payload(&json!({"status": "NEED_INFO", "product": "a", "max_price": 1, "city": "b"})).is_none());
        assert!(normalize_payload(&json!({"product": "a", "max_price": 1})).is_none());
        assert!(normalize_payload(&json!({"product": "", "max_price": 1, "city": "b"})).is_none());
        assert!(normalize_payload(&json!([1, 2])).is_none());
    }

    #[tokio::test]
    async fn test_heuristic_parser_replies() {
        let parser = HeuristicParser;
        let ok = parser.parse("tv 500 in Rio", Some("en")).await;
        assert_eq!(ok.reply, t(Some("en"), "ai_fallback_starting", &[]));
        assert!(ok.request.is_some());

        let missing = parser.parse("hello", Some("en")).await;
        assert_eq!(missing.reply, t(Some("en"), "ai_fallback_prompt", &[]));
        assert!(missing.request.is_none());
    }

    #[test]
    fn test_create_parser_selects_by_key() {
        let mut config = Config::default();
        assert_eq!(create_parser(&config).unwrap().name(), "heuristic");
        config.parser.gemini_api_key = "key".into();
        assert_eq!(create_parser(&config).unwrap().name(), "gemini");
    }
}
