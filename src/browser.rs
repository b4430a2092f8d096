//! The shared browser resource used by DOM-based adapters.
//!
//! A cycle launches at most one [`Browser`] and closes it when the cycle
//! ends, whatever happened in between. The default implementation is an
//! HTTP browsing session: a cookie-carrying `reqwest` client whose cookies
//! persist in the profile directory (`<profile>/cookies.tsv`), with CSS
//! selector queries answered by `scraper`.
//!
//! # Profile format
//!
//! One line per origin, tab separated:
//!
//! ```text
//! https://www.facebook.com\tc_user=123; xs=abc
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::BrowserConfig;

const COOKIE_FILE: &str = "cookies.tsv";

/// Launch settings for one browsing session.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub channel: String,
}

impl BrowserProfile {
    pub fn new(profile_dir: &Path, config: &BrowserConfig) -> Self {
        Self {
            profile_dir: profile_dir.to_path_buf(),
            headless: config.headless,
            channel: config.channel.clone(),
        }
    }
}

/// A matched DOM element: its `href` (if any) and its visible text, one
/// text node per line.
#[derive(Debug, Clone, PartialEq)]
pub struct PageElement {
    pub href: Option<String>,
    pub text: String,
}

/// An open browsing session.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Load `url` and return the elements matching `selector`. Fails if the
    /// page does not produce a match within `wait`.
    async fn open(&self, url: &str, selector: &str, wait: Duration) -> Result<Vec<PageElement>>;

    /// Flush session state to the profile and release the session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Creates browsing sessions. The engine asks for one per cycle, only when
/// some active client needs it.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile: &BrowserProfile) -> Result<Box<dyn Browser>>;
}

// ═══════════════════════════════════════════════════════════════════════
// HTTP session implementation
// ═══════════════════════════════════════════════════════════════════════

/// Launches [`HttpBrowser`] sessions.
#[derive(Debug, Default, Clone)]
pub struct HttpBrowserLauncher;

#[async_trait]
impl BrowserLauncher for HttpBrowserLauncher {
    async fn launch(&self, profile: &BrowserProfile) -> Result<Box<dyn Browser>> {
        let browser = HttpBrowser::launch(profile)?;
        Ok(Box::new(browser))
    }
}

pub struct HttpBrowser {
    client: reqwest::Client,
    jar: Arc<Jar>,
    profile_dir: PathBuf,
    origins: Mutex<BTreeSet<String>>,
}

fn user_agent_for(channel: &str) -> &'static str {
    match channel {
        "msedge" => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36 Edg/124.0",
        "firefox" => "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        _ => "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    }
}

fn default_headers(channel: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(user_agent_for(channel)));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,pt-BR;q=0.8"),
    );
    headers
}

fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

impl HttpBrowser {
    pub fn launch(profile: &BrowserProfile) -> Result<Self> {
        std::fs::create_dir_all(&profile.profile_dir).with_context(|| {
            format!(
                "Failed to create browser profile: {}",
                profile.profile_dir.display()
            )
        })?;

        let jar = Arc::new(Jar::default());
        let origins = restore_cookies(&profile.profile_dir, &jar)?;

        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .default_headers(default_headers(&profile.channel))
            .redirect(reqwest::redirect::Policy::limited(8))
            .build()
            .context("Failed to build browser HTTP client")?;

        debug!(
            profile = %profile.profile_dir.display(),
            origins = origins.len(),
            headless = profile.headless,
            "browser session launched"
        );

        Ok(Self {
            client,
            jar,
            profile_dir: profile.profile_dir.clone(),
            origins: Mutex::new(origins),
        })
    }

    fn remember_origin(&self, url: &Url) {
        self.origins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(origin_of(url));
    }

    fn save_cookies(&self) -> Result<()> {
        let origins = self
            .origins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut lines = Vec::new();
        for origin in origins {
            let Ok(url) = Url::parse(&origin) else {
                continue;
            };
            if let Some(header) = self.jar.cookies(&url) {
                if let Ok(value) = header.to_str() {
                    lines.push(format!("{origin}\t{value}"));
                }
            }
        }
        write_cookie_file(&self.profile_dir, &lines)
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn open(&self, url: &str, selector: &str, wait: Duration) -> Result<Vec<PageElement>> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid page URL: {url}"))?;
        self.remember_origin(&parsed);

        let fetch = async {
            let response = self.client.get(parsed.as_str()).send().await?;
            Ok::<_, reqwest::Error>(response.error_for_status()?.text().await?)
        };
        let html = tokio::time::timeout(wait, fetch)
            .await
            .map_err(|_| anyhow!("timed out after {wait:?} waiting for {selector}"))?
            .with_context(|| format!("Failed to load {url}"))?;

        select_elements(&html, selector)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.save_cookies()
    }
}

/// Run a CSS selector over an HTML document. No match is an error, the
/// same as a page that never rendered the awaited element.
pub fn select_elements(html: &str, selector: &str) -> Result<Vec<PageElement>> {
    let parsed =
        Selector::parse(selector).map_err(|e| anyhow!("invalid selector {selector}: {e:?}"))?;
    let document = Html::parse_document(html);
    let elements: Vec<PageElement> = document
        .select(&parsed)
        .map(|el| PageElement {
            href: el.value().attr("href").map(str::to_string),
            text: el
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        })
        .collect();
    if elements.is_empty() {
        return Err(anyhow!("no elements matched {selector}"));
    }
    Ok(elements)
}

fn restore_cookies(profile_dir: &Path, jar: &Jar) -> Result<BTreeSet<String>> {
    let path = profile_dir.join(COOKIE_FILE);
    let mut origins = BTreeSet::new();
    if !path.exists() {
        return Ok(origins);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    for line in content.lines() {
        let Some((origin, cookies)) = line.split_once('\t') else {
            continue;
        };
        let Ok(url) = Url::parse(origin.trim()) else {
            continue;
        };
        for pair in cookies.split(';').map(str::trim).filter(|p| p.contains('=')) {
            jar.add_cookie_str(pair, &url);
        }
        origins.insert(origin_of(&url));
    }
    Ok(origins)
}

fn write_cookie_file(profile_dir: &Path, lines: &[String]) -> Result<()> {
    let path = profile_dir.join(COOKIE_FILE);
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    std::fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))
}

/// Seed the profile with cookies for `origin`, replacing any stored for
/// that origin. Backs the `login` command.
pub fn seed_profile_cookies(profile_dir: &Path, origin: &str, cookie_header: &str) -> Result<()> {
    let url = Url::parse(origin).with_context(|| format!("Invalid origin: {origin}"))?;
    let origin = origin_of(&url);
    std::fs::create_dir_all(profile_dir).with_context(|| {
        format!("Failed to create browser profile: {}", profile_dir.display())
    })?;

    let path = profile_dir.join(COOKIE_FILE);
    let existing = if path.exists() {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        String::new()
    };

    let mut lines: Vec<String> = existing
        .lines()
        .filter(|line| !matches!(line.split_once('\t'), Some((o, _)) if o.trim() == origin))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();
    lines.push(format!("{origin}\t{}", cookie_header.trim()));
    write_cookie_file(profile_dir, &lines)?;
    info!(origin = %origin, profile = %profile_dir.display(), "browser profile cookies saved");
    Ok(())
}
