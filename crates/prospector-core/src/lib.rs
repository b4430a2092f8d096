//! # Prospector Core
//!
//! Pure logic shared by the Prospector scanner: listing and client models,
//! client profile normalization, marketplace URL builders, listing
//! filters, the seen-listing ledger, and the message catalog.
//!
//! This crate does no I/O. Everything that touches the network, the
//! filesystem, or a clock lives in the `prospector` crate.

pub mod client;
pub mod filter;
pub mod i18n;
pub mod ledger;
pub mod models;
pub mod text;
pub mod urls;

pub use ledger::SeenLedger;
pub use models::{ClientConfig, Listing, SearchRequest, SourceConfig, PRICE_UNBOUNDED};
