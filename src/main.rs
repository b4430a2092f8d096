//! # Prospector CLI (`prospector`)
//!
//! ## Usage
//!
//! ```bash
//! prospector --config ./config/prospector.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `prospector run` | Start the scan engine and the configured front-ends |
//! | `prospector scan` | Run the scan loop with console output (`--once` for one cycle) |
//! | `prospector parse "<text>"` | Run the request parser on a message |
//! | `prospector clients` | List registered clients |
//! | `prospector init` | Create data directories and move legacy files |
//! | `prospector login` | Store marketplace cookies in the browser profile |
//!
//! ## Examples
//!
//! ```bash
//! # Bot and REST API together
//! prospector run --mode both
//!
//! # REST API only, on a different port
//! prospector run --mode api --api-port 9000
//!
//! # See what one cycle would send
//! prospector scan --once
//!
//! # Reuse a logged-in Facebook session
//! prospector login --origin https://www.facebook.com --cookie "c_user=...; xs=..."
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use prospector::browser::{seed_profile_cookies, HttpBrowserLauncher};
use prospector::config::{self, Config};
use prospector::engine::ScanEngine;
use prospector::notify::{ConsoleNotifier, TelegramNotifier};
use prospector::parser::create_parser;
use prospector::server::{run_server, AppState};
use prospector::state::SharedState;
use prospector::storage::Storage;
use prospector::telegram::{run_bot, ChatBot};
use prospector::traits::{AdapterRegistry, Notifier};
use prospector_core::text::format_thousands;
use prospector_core::PRICE_UNBOUNDED;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::Bot;
use tracing::{info, warn};

/// Prospector: marketplace listing alerts over chat.
#[derive(Parser)]
#[command(
    name = "prospector",
    about = "Scans marketplaces for new listings and alerts chat users about matches",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Optional; defaults apply when missing.
    #[arg(long, global = true, default_value = "./config/prospector.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scan engine with the Telegram bot, the REST API, or both.
    Run {
        /// Front-ends to start. Defaults to `bot.run_mode` (`RUN_MODE`).
        #[arg(long, value_parser = ["telegram", "api", "both"])]
        mode: Option<String>,

        /// Override `api.host`.
        #[arg(long)]
        api_host: Option<String>,

        /// Override `api.port`.
        #[arg(long)]
        api_port: Option<u16>,
    },

    /// Scan with console output instead of chat delivery.
    Scan {
        /// Run exactly one cycle, then exit.
        #[arg(long)]
        once: bool,
    },

    /// Parse a free-text search request and print the result.
    Parse {
        /// The message, e.g. "road bike 300 in Austin".
        text: String,

        /// Reply locale (e.g. `en`, `pt-BR`).
        #[arg(long)]
        locale: Option<String>,
    },

    /// List registered clients.
    Clients,

    /// Create data directories and move files from legacy locations.
    Init,

    /// Store cookies for a site in the browser profile.
    Login {
        /// Site origin, e.g. `https://www.facebook.com`.
        #[arg(long)]
        origin: String,

        /// Cookie header value copied from a logged-in browser.
        #[arg(long)]
        cookie: String,
    },
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("prospector={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Storage with directories created and legacy files moved into place.
fn open_storage(cfg: &Config) -> Result<Arc<Storage>> {
    let storage = Storage::from_config(&cfg.storage);
    storage.ensure_directories()?;
    let moved = storage.migrate_legacy_paths()?;
    if moved > 0 {
        info!(moved, "migrated legacy data files");
    }
    Ok(Arc::new(storage))
}

fn build_engine(
    cfg: &Config,
    state: SharedState,
    notifier: Arc<dyn Notifier>,
) -> Result<Arc<ScanEngine>> {
    let registry = AdapterRegistry::from_config(cfg)?;
    Ok(Arc::new(ScanEngine::new(
        state,
        registry,
        notifier,
        Arc::new(HttpBrowserLauncher),
        cfg,
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Run {
            mode,
            api_host,
            api_port,
        } => {
            if let Some(mode) = mode {
                cfg.bot.run_mode = mode;
            }
            if let Some(host) = api_host {
                cfg.api.host = host;
            }
            if let Some(port) = api_port {
                cfg.api.port = port;
            }
            config::validate(&mut cfg)?;
            run(&cfg).await?;
        }
        Commands::Scan { once } => {
            let storage = open_storage(&cfg)?;
            let state = SharedState::load(storage)?;
            let engine = build_engine(&cfg, state.clone(), Arc::new(ConsoleNotifier))?;
            if once {
                let mut ledger = state.storage().load_seen()?;
                let report = engine.run_cycle(&mut ledger).await?;
                println!(
                    "Scanned {} client(s): {} listing(s) delivered, {} adapter failure(s).",
                    report.clients, report.delivered, report.adapter_failures
                );
            } else {
                engine.run().await;
            }
        }
        Commands::Parse { text, locale } => {
            let parser = create_parser(&cfg)?;
            let outcome = parser.parse(&text, locale.as_deref()).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Clients => {
            let storage = Storage::from_config(&cfg.storage);
            let clients = storage.load_clients()?;
            if clients.is_empty() {
                println!("No clients registered.");
            }
            for client in clients {
                let max = if client.price_max >= PRICE_UNBOUNDED {
                    "any".to_string()
                } else {
                    format_thousands(client.price_max)
                };
                println!(
                    "{:<14} {:<7} {} in {} ({} - {})",
                    client.chat_id,
                    if client.active { "active" } else { "paused" },
                    client.search_term,
                    client.target_city,
                    format_thousands(client.price_min),
                    max,
                );
            }
        }
        Commands::Init => {
            let storage = open_storage(&cfg)?;
            println!("Preferences: {}", storage.preferences_path().display());
            println!("Seen history: {}", storage.history_path().display());
            println!("Browser profile: {}", storage.session_dir().display());
        }
        Commands::Login { origin, cookie } => {
            let storage = open_storage(&cfg)?;
            seed_profile_cookies(storage.session_dir(), &origin, &cookie)?;
            println!("Cookies stored for {origin}.");
        }
    }

    Ok(())
}

/// Start the engine plus the front-ends named by `bot.run_mode`.
async fn run(cfg: &Config) -> Result<()> {
    let mode = cfg.bot.run_mode.as_str();
    let token = cfg.telegram.token.trim();
    if mode != "api" && token.is_empty() {
        bail!("telegram.token (TELEGRAM_TOKEN) is required for run mode '{mode}'");
    }

    let storage = open_storage(cfg)?;
    let state = SharedState::load(storage)?;
    let parser = create_parser(cfg)?;

    let bot = (!token.is_empty()).then(|| Bot::new(token));
    let notifier: Arc<dyn Notifier> = match &bot {
        Some(bot) => Arc::new(TelegramNotifier::new(bot.clone())),
        None => {
            warn!("no Telegram token, offers will only be logged");
            Arc::new(ConsoleNotifier)
        }
    };

    let engine = build_engine(cfg, state.clone(), notifier)?;
    engine.spawn();
    info!(mode, clients = state.client_count(), "prospector running");

    let chat = Arc::new(ChatBot::new(
        state.clone(),
        Arc::clone(&parser),
        &cfg.bot.default_locale,
    ));
    let app = AppState::new(Arc::clone(&engine), parser, &cfg.api.key);
    let bind_addr = cfg.api.bind_addr();

    match (mode, bot) {
        ("api", _) => run_server(app, &bind_addr).await?,
        ("telegram", Some(bot)) => run_bot(bot, chat).await,
        ("both", Some(bot)) => {
            tokio::select! {
                _ = run_bot(bot, chat) => {}
                result = run_server(app, &bind_addr) => result?,
            }
        }
        _ => bail!("unsupported run mode '{mode}'"),
    }

    state.set_running(false);
    info!("shutting down");
    Ok(())
}
