//! # Prospector
//!
//! Watches second-hand marketplaces for chat users and messages them when a
//! new listing matches what they asked for.
//!
//! Each client describes a search (term, price range, city, excluded words,
//! enabled sources). A scan loop periodically runs every source adapter for
//! every active client, filters the results, drops listings the client has
//! already been sent, and delivers the rest through a notifier.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────┐
//! │   Adapters   │──▶│ Scan engine  │──▶│  Notifier  │
//! │ CL/eBay/RSS/ │   │ filter+dedup │   │ Telegram / │
//! │   Facebook   │   └──────┬───────┘   │  console   │
//! └──────────────┘          │           └────────────┘
//!                    ┌──────┴───────┐
//!                    │ SharedState  │◀── JSON storage
//!                    └──┬────────┬──┘
//!                       ▼        ▼
//!                 ┌──────────┐ ┌──────────┐
//!                 │ Telegram │ │ REST API │
//!                 │   bot    │ │  (axum)  │
//!                 └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! prospector init                          # create data directories
//! prospector parse "road bike 300 in Austin"
//! prospector scan --once                   # one cycle, console output
//! prospector run --mode both               # engine + bot + REST API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`storage`] | Preferences and seen-history JSON files |
//! | [`state`] | Registry, offer cache, and engine flags behind one lock |
//! | [`traits`] | Source adapter and notifier traits, adapter registry |
//! | [`http`] | Shared HTTP client helpers |
//! | [`feed`] | RSS/Atom parsing |
//! | [`adapter_craigslist`] | Craigslist RSS search |
//! | [`adapter_ebay`] | eBay Finding API |
//! | [`adapter_rss`] | Generic RSS feeds |
//! | [`adapter_facebook`] | Facebook Marketplace via the browser session |
//! | [`browser`] | Browser session resource and profile cookies |
//! | [`notify`] | Offer formatting and delivery transports |
//! | [`parser`] | Free-text search request parsing |
//! | [`engine`] | The scan loop |
//! | [`telegram`] | Chat front-end |
//! | [`legacy`] | Historical preference field mapping |
//! | [`server`] | REST API |

pub mod adapter_craigslist;
pub mod adapter_ebay;
pub mod adapter_facebook;
pub mod adapter_rss;
pub mod browser;
pub mod config;
pub mod engine;
pub mod feed;
pub mod http;
pub mod legacy;
pub mod notify;
pub mod parser;
pub mod server;
pub mod state;
pub mod storage;
pub mod telegram;
pub mod traits;
