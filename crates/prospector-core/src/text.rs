//! Text normalization and price parsing.
//!
//! Every comparison the scanner makes against user-supplied text (city
//! filters, negative keywords, slugs) goes through [`normalize_text`] so
//! that `"São Paulo"`, `"SAO PAULO "` and `"sao paulo"` compare equal.
//!
//! Price strings arrive in whatever format the marketplace prints them:
//!
//! | Input          | Parsed    |
//! |----------------|-----------|
//! | `$ 1,234.56`   | `1234.56` |
//! | `1.234,56`     | `1234.56` |
//! | `R$ 1.899`     | `1899.0`  |
//! | `12,5`         | `12.5`    |
//! | `Free`         | `0.0`     |
//! | `abc`          | `0.0`     |

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Decompose, drop combining marks, lowercase, and trim.
pub fn normalize_text(text: &str) -> String {
    let stripped: String = text.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    stripped.to_lowercase().trim().to_string()
}

/// Convert a city or region name into a subdomain-safe slug.
///
/// `"São Paulo"` becomes `"sao-paulo"`.
pub fn to_slug(text: &str) -> String {
    let normalized = normalize_text(text);
    let kept: String = normalized
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .trim_matches('-')
        .to_string()
}

fn currency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:R\$|US\$|\$|€|£|\bUSD|\bBRL|\bEUR|\bGBP)\s*(\d[\d.,]*\d|\d)")
            .expect("valid currency regex")
    })
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+[\d.,]*").expect("valid number regex"))
}

/// Parse a human-readable price string into a number.
///
/// Returns `0.0` for empty input, for "free"/"gratis", and for anything
/// without digits. When a currency marker is present the number right
/// after it is used; otherwise all digits in the text are considered.
pub fn parse_price(text: &str) -> f64 {
    if text.trim().is_empty() {
        return 0.0;
    }
    let lowered = normalize_text(text);
    if lowered.contains("free") || lowered.contains("gratis") {
        return 0.0;
    }

    let candidate = currency_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    let normalized = normalize_separators(candidate);
    let numeric: String = normalized
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    numeric.trim_matches('.').parse::<f64>().unwrap_or(0.0)
}

/// Rewrite thousands/decimal separators so that at most one `.` remains
/// and it marks the decimal point.
fn normalize_separators(raw: &str) -> String {
    let last_comma = raw.rfind(',');
    let last_dot = raw.rfind('.');

    match (last_comma, last_dot) {
        // Whichever separator comes last is the decimal one.
        (Some(comma), Some(dot)) if comma > dot => raw.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => raw.replace(',', ""),
        (Some(comma), None) => {
            if raw.matches(',').count() > 1 || trailing_digits(&raw[comma + 1..]) == 3 {
                raw.replace(',', "")
            } else {
                raw.replace(',', ".")
            }
        }
        (None, Some(dot)) => {
            if raw.matches('.').count() > 1 || trailing_digits(&raw[dot + 1..]) == 3 {
                raw.replace('.', "")
            } else {
                raw.to_string()
            }
        }
        (None, None) => raw.to_string(),
    }
}

fn trailing_digits(rest: &str) -> usize {
    rest.chars().take_while(|c| c.is_ascii_digit()).count()
}

/// Find the first number-looking token in `text` and parse it as a price.
pub fn extract_first_number(text: &str) -> Option<f64> {
    number_regex()
        .find(text)
        .map(|m| parse_price(m.as_str()))
}

/// Remove each non-empty fragment from `text` and collapse whitespace.
pub fn remove_fragments(text: &str, fragments: &[&str]) -> String {
    let mut cleaned = text.to_string();
    for fragment in fragments.iter().filter(|f| !f.trim().is_empty()) {
        cleaned = cleaned.replace(fragment, " ");
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Format a price as a whole number with comma thousands separators.
///
/// `1234.56` becomes `"1,235"`.
pub fn format_thousands(value: f64) -> String {
    let rounded = if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    };
    let digits = rounded.to_string();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// First 16 hex characters of the SHA-256 of `text`.
pub fn stable_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
