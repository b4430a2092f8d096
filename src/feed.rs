//! RSS / RDF / Atom item extraction.
//!
//! Only the handful of fields the adapters need are read. HTML in
//! descriptions is reduced to plain text with collapsed whitespace.
//!
//! | Field | RSS 2.0 / RDF | Atom |
//! |-------|---------------|------|
//! | `title` | `<title>` | `<title>` |
//! | `link` | `<link>` text | `<link href>` |
//! | `guid` | `<guid>` | `<id>` |
//! | `description` | `<description>` | `<summary>` / `<content>` |
//! | `pub_date` | `<pubDate>` / `<dc:date>` | `<updated>` / `<published>` |

use anyhow::{bail, Result};
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use std::sync::OnceLock;

use crate::http::fetch_text;

/// One feed entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub guid: String,
    pub description: String,
    pub pub_date: String,
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Link,
    Guid,
    Description,
    PubDate,
}

fn field_for(local_name: &[u8]) -> Option<Field> {
    match local_name {
        b"title" => Some(Field::Title),
        b"link" => Some(Field::Link),
        b"guid" | b"id" => Some(Field::Guid),
        b"description" | b"summary" | b"content" => Some(Field::Description),
        b"pubDate" | b"date" | b"updated" | b"published" => Some(Field::PubDate),
        _ => None,
    }
}

impl FeedItem {
    fn slot(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Guid => &mut self.guid,
            Field::Description => &mut self.description,
            Field::PubDate => &mut self.pub_date,
        }
    }

    fn finish(mut self) -> Self {
        for value in [
            &mut self.title,
            &mut self.link,
            &mut self.guid,
            &mut self.pub_date,
        ] {
            *value = value.trim().to_string();
        }
        self.description = strip_html(&self.description);
        self
    }
}

/// Parse every `<item>` / `<entry>` in a feed document.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut items = Vec::new();
    let mut current: Option<FeedItem> = None;
    let mut field: Option<Field> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                saw_root = true;
                let name = e.local_name();
                match name.as_ref() {
                    b"item" | b"entry" => {
                        current = Some(FeedItem::default());
                        field = None;
                    }
                    other if current.is_some() => {
                        field = field_for(other);
                        if let (Some(Field::Link), Some(item)) = (field, current.as_mut()) {
                            take_href(&e, item);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                saw_root = true;
                if e.local_name().as_ref() == b"link" {
                    if let Some(item) = current.as_mut() {
                        take_href(&e, item);
                    }
                }
            }
            Ok(Event::Text(te)) => {
                if let (Some(f), Some(item)) = (field, current.as_mut()) {
                    let text = te
                        .unescape()
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&te).into_owned());
                    item.slot(f).push_str(&text);
                }
            }
            Ok(Event::CData(cd)) => {
                if let (Some(f), Some(item)) = (field, current.as_mut()) {
                    item.slot(f).push_str(&String::from_utf8_lossy(&cd));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    if let Some(item) = current.take() {
                        items.push(item.finish());
                    }
                    field = None;
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed feed at byte {}: {}", reader.buffer_position(), e),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        bail!("Document contains no XML elements");
    }
    Ok(items)
}

/// Atom links carry the URL in `href`; the first `alternate` (or unmarked)
/// link wins.
fn take_href(e: &BytesStart<'_>, item: &mut FeedItem) {
    if !item.link.is_empty() {
        return;
    }
    let mut href = None;
    let mut alternate = true;
    for attr in e.attributes().flatten() {
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_default();
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value),
            b"rel" => alternate = value == "alternate",
            _ => {}
        }
    }
    if let (Some(href), true) = (href, alternate) {
        item.link = href;
    }
}

/// Remove tags, decode entities, and collapse whitespace.
pub fn strip_html(text: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"));

    if text.trim().is_empty() {
        return String::new();
    }
    let cleaned = tags.replace_all(text, " ");
    let cleaned = cleaned.replace("&nbsp;", " ");
    let decoded = quick_xml::escape::unescape(&cleaned)
        .map(|s| s.into_owned())
        .unwrap_or(cleaned);
    space.replace_all(&decoded, " ").trim().to_string()
}

/// Fetch and parse a feed. Any failure yields an empty list.
pub async fn fetch_feed_items(client: &reqwest::Client, url: &str) -> Vec<FeedItem> {
    if url.trim().is_empty() {
        return Vec::new();
    }
    let Some(body) = fetch_text(client, url).await else {
        return Vec::new();
    };
    match parse_feed(&body) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(url, error = %e, "unparseable feed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Channel title is ignored</title>
    <item>
      <title>Mountain bike &amp; helmet $250</title>
      <link>https://austin.craigslist.org/bik/d/mountain-bike/7712345678.html</link>
      <guid>https://austin.craigslist.org/bik/d/mountain-bike/7712345678.html</guid>
      <description><![CDATA[<p>Great shape,&nbsp;<b>Austin</b></p>
        pickup only]]></description>
      <dc:date>2024-05-01T10:00:00-05:00</dc:date>
    </item>
    <item>
      <title>Second</title>
      <description>&lt;i&gt;escaped&lt;/i&gt; html</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_rss_items() {
        let items = parse_feed(RSS).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.title, "Mountain bike & helmet $250");
        assert!(first.link.ends_with("7712345678.html"));
        assert_eq!(first.guid, first.link);
        assert_eq!(first.description, "Great shape, Austin pickup only");
        assert_eq!(first.pub_date, "2024-05-01T10:00:00-05:00");

        assert_eq!(items[1].description, "escaped html");
        assert!(items[1].link.is_empty());
    }

    #[test]
    fn test_parse_rdf_items() {
        let rdf = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <item rdf:about="https://x.org/1.html"><title>One</title><link>https://x.org/1.html</link></item>
</rdf:RDF>"#;
        let items = parse_feed(rdf).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "One");
    }

    #[test]
    fn test_parse_atom_entries() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Atom entry</title>
    <link rel="self" href="https://x.org/self"/>
    <link href="https://x.org/entry/1"/>
    <id>tag:x.org,2024:1</id>
    <summary>Hello</summary>
  </entry>
</feed>"#;
        let items = parse_feed(atom).unwrap();
        assert_eq!(items[0].link, "https://x.org/entry/1");
        assert_eq!(items[0].guid, "tag:x.org,2024:1");
        assert_eq!(items[0].description, "Hello");
    }

    #[test]
    fn test_not_xml_is_error() {
        assert!(parse_feed("").is_err());
        assert!(parse_feed("plain text").is_err());
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html(""), "");
        assert_eq!(strip_html("<p>a</p>\n\n<p>b &amp; c</p>"), "a b & c");
    }
}
