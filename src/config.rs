//! Configuration parsing, environment overrides, and validation.
//!
//! Configuration comes from an optional TOML file (default
//! `config/prospector.toml`) layered under environment variables. A `.env`
//! file in the working directory is loaded first, so deployment secrets
//! never need to live in the TOML file.
//!
//! # Example
//!
//! ```toml
//! [scan]
//! interval_minutes = 5
//! pacing_ms = 1000
//! adapter_timeout_secs = 20
//!
//! [storage]
//! data_dir = "./data"
//!
//! [browser]
//! headless = true
//! channel = "chrome"
//!
//! [api]
//! host = "127.0.0.1"
//! port = 8000
//!
//! [bot]
//! default_locale = "pt-BR"
//! run_mode = "both"
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SCAN_INTERVAL_MINUTES`, `INTERVAL_MINUTES`, `INTERVALO_MINUTOS` | `scan.interval_minutes` |
//! | `HEADLESS` | `browser.headless` |
//! | `BROWSER_CHANNEL` | `browser.channel` |
//! | `DATA_DIR`, `SESSION_DIR` | `storage.data_dir`, `storage.session_dir` |
//! | `SEEN_HISTORY_PATH`, `USER_PREFERENCES_PATH` | `storage.history_path`, `storage.preferences_path` |
//! | `TELEGRAM_TOKEN` | `telegram.token` |
//! | `GEMINI_API_KEY` | `parser.gemini_api_key` |
//! | `API_HOST`, `API_PORT`, `API_KEY` | `api.host`, `api.port`, `api.key` |
//! | `EBAY_APP_ID`, `EBAY_GLOBAL_ID`, `EBAY_CURRENCY` | `ebay.*` |
//! | `DEFAULT_LOCALE`, `BOT_LOCALE` | `bot.default_locale` |
//! | `RUN_MODE` | `bot.run_mode` |
//! | `LOG_LEVEL` | `logging.level` |

use anyhow::{Context, Result};
use prospector_core::i18n::resolve_locale;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub ebay: EbayConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Minutes between scan cycles. Fractions are allowed; the effective
    /// floor is 0.1 minutes.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: f64,
    /// Pause between clients within one cycle.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Upper bound on one adapter call for one client.
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
}

fn default_interval_minutes() -> f64 {
    5.0
}
fn default_pacing_ms() -> u64 {
    1000
}
fn default_adapter_timeout_secs() -> u64 {
    20
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            pacing_ms: default_pacing_ms(),
            adapter_timeout_secs: default_adapter_timeout_secs(),
        }
    }
}

impl ScanConfig {
    /// Sleep between cycles, never shorter than six seconds.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_minutes.max(0.1) * 60.0)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}

/// Where durable state lives. Unset paths derive from `data_dir`.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory scanned for pre-rename legacy files.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
    #[serde(default)]
    pub history_path: Option<PathBuf>,
    #[serde(default)]
    pub preferences_path: Option<PathBuf>,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            data_dir: default_data_dir(),
            session_dir: None,
            history_path: None,
            preferences_path: None,
        }
    }
}

impl StorageConfig {
    pub fn session_dir(&self) -> PathBuf {
        self.session_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("browser_session"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("seen_history.json"))
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.preferences_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("user_preferences.json"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_channel")]
    pub channel: String,
    /// How long a page may take to produce the awaited elements.
    #[serde(default = "default_dom_wait_secs")]
    pub dom_wait_secs: u64,
}

fn default_channel() -> String {
    "chrome".to_string()
}
fn default_dom_wait_secs() -> u64 {
    8
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            channel: default_channel(),
            dom_wait_secs: default_dom_wait_secs(),
        }
    }
}

impl BrowserConfig {
    pub fn dom_wait(&self) -> Duration {
        Duration::from_secs(self.dom_wait_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Shared secret for the `x-api-key` header. Empty disables the check.
    #[serde(default)]
    pub key: String,
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            key: String::new(),
        }
    }
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParserConfig {
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_parser_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_parser_timeout_secs() -> u64 {
    30
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            model: default_gemini_model(),
            endpoint: default_gemini_endpoint(),
            timeout_secs: default_parser_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EbayConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default = "default_global_id")]
    pub global_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_ebay_endpoint")]
    pub endpoint: String,
}

fn default_global_id() -> String {
    "EBAY-US".to_string()
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_ebay_endpoint() -> String {
    "https://svcs.ebay.com/services/search/FindingService/v1".to_string()
}

impl Default for EbayConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            global_id: default_global_id(),
            currency: default_currency(),
            endpoint: default_ebay_endpoint(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_locale")]
    pub default_locale: String,
    /// `telegram`, `api`, or `both`.
    #[serde(default = "default_run_mode")]
    pub run_mode: String,
}

fn default_locale() -> String {
    "en".to_string()
}
fn default_run_mode() -> String {
    "telegram".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            default_locale: default_locale(),
            run_mode: default_run_mode(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// First set variable among `keys`.
fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env_opt(k))
}

fn env_bool(key: &str) -> Option<bool> {
    env_opt(key).map(|v| {
        matches!(
            v.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        )
    })
}

/// Apply deployment-time environment variables on top of the file config.
///
/// Unparseable numeric values are ignored (the file or default value
/// stays).
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(raw) = env_first(&["SCAN_INTERVAL_MINUTES", "INTERVAL_MINUTES", "INTERVALO_MINUTOS"]) {
        if let Ok(minutes) = raw.trim().parse::<f64>() {
            config.scan.interval_minutes = minutes;
        }
    }
    if let Some(headless) = env_bool("HEADLESS") {
        config.browser.headless = headless;
    }
    if let Some(channel) = env_opt("BROWSER_CHANNEL") {
        config.browser.channel = channel;
    }
    if let Some(dir) = env_opt("DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
    if let Some(dir) = env_opt("SESSION_DIR") {
        config.storage.session_dir = Some(PathBuf::from(dir));
    }
    if let Some(path) = env_opt("SEEN_HISTORY_PATH") {
        config.storage.history_path = Some(PathBuf::from(path));
    }
    if let Some(path) = env_opt("USER_PREFERENCES_PATH") {
        config.storage.preferences_path = Some(PathBuf::from(path));
    }
    if let Some(token) = env_opt("TELEGRAM_TOKEN") {
        config.telegram.token = token;
    }
    if let Some(key) = env_opt("GEMINI_API_KEY") {
        config.parser.gemini_api_key = key;
    }
    if let Some(host) = env_opt("API_HOST") {
        config.api.host = host;
    }
    if let Some(port) = env_opt("API_PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
        config.api.port = port;
    }
    if let Some(key) = env_opt("API_KEY") {
        config.api.key = key;
    }
    if let Some(app_id) = env_opt("EBAY_APP_ID") {
        config.ebay.app_id = app_id;
    }
    if let Some(global_id) = env_opt("EBAY_GLOBAL_ID") {
        config.ebay.global_id = global_id;
    }
    if let Some(currency) = env_opt("EBAY_CURRENCY") {
        config.ebay.currency = currency;
    }
    if let Some(locale) = env_first(&["DEFAULT_LOCALE", "BOT_LOCALE"]) {
        config.bot.default_locale = locale;
    }
    if let Some(mode) = env_opt("RUN_MODE") {
        config.bot.run_mode = mode;
    }
    if let Some(level) = env_opt("LOG_LEVEL") {
        config.logging.level = level;
    }
}

/// Load configuration from `path` (optional), `.env`, and the environment.
///
/// A missing file means "all defaults". A present but malformed file is an
/// error.
pub fn load_config(path: &Path) -> Result<Config> {
    dotenvy::dotenv().ok();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);
    validate(&mut config)?;
    Ok(config)
}

/// Check invariants and canonicalize values that have a canonical form.
pub fn validate(config: &mut Config) -> Result<()> {
    if !config.scan.interval_minutes.is_finite() || config.scan.interval_minutes <= 0.0 {
        anyhow::bail!("scan.interval_minutes must be a positive number");
    }

    if config.scan.adapter_timeout_secs == 0 {
        anyhow::bail!("scan.adapter_timeout_secs must be > 0");
    }

    if config.api.port == 0 {
        anyhow::bail!("api.port must be > 0");
    }

    match resolve_locale(&config.bot.default_locale) {
        Some(locale) => config.bot.default_locale = locale,
        None => anyhow::bail!(
            "Unknown bot.default_locale: '{}'",
            config.bot.default_locale
        ),
    }

    match config.bot.run_mode.as_str() {
        "telegram" | "api" | "both" => {}
        other => anyhow::bail!(
            "Unknown bot.run_mode: '{}'. Must be telegram, api, or both.",
            other
        ),
    }

    Ok(())
}
