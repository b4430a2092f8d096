//! Notification transports and offer message formatting.
//!
//! | Transport | Used by | Delivery |
//! |-----------|---------|----------|
//! | [`ConsoleNotifier`] | `scan --once`, `api` mode without a token | `info!` log line |
//! | [`TelegramNotifier`] | `telegram` / `both` modes | Bot API, MarkdownV2 then plain text |

use anyhow::{Context, Result};
use async_trait::async_trait;
use prospector_core::i18n::t;
use prospector_core::Listing;
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, ParseMode};
use teloxide::utils::markdown;
use tracing::{info, warn};

use crate::traits::Notifier;

/// Localized multi-line message for one listing. Price, info, and link
/// lines are omitted when empty.
pub fn format_offer_message(listing: &Listing, locale: &str) -> String {
    let locale = Some(locale);
    let title = if listing.title.trim().is_empty() {
        t(locale, "offer_default_title", &[])
    } else {
        listing.title.clone()
    };

    let mut lines = vec![
        t(locale, "offer_found", &[]),
        t(locale, "offer_source", &[("source", listing.source.as_str())]),
        t(locale, "offer_title", &[("title", title.as_str())]),
    ];
    if !listing.price_text.is_empty() {
        lines.push(t(locale, "offer_price", &[("price", listing.price_text.as_str())]));
    }
    if !listing.extra_info.is_empty() {
        lines.push(t(locale, "offer_info", &[("extra", listing.extra_info.as_str())]));
    }
    if !listing.link.is_empty() {
        lines.push(t(locale, "offer_link", &[("link", listing.link.as_str())]));
    }
    lines.join("\n")
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        info!(chat_id, "\n{}", text);
        Ok(())
    }
}

/// Sends notifications through a Telegram bot.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn no_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Send `text` to `chat_id`, trying MarkdownV2 first and falling back to
/// plain text. Link previews are always disabled.
pub async fn send_text(bot: &Bot, chat_id: &str, text: &str) -> Result<()> {
    let id: i64 = chat_id
        .trim()
        .parse()
        .with_context(|| format!("Invalid Telegram chat id: {chat_id}"))?;
    let chat = ChatId(id);

    let escaped = markdown::escape(text);
    let first = bot
        .send_message(chat, escaped)
        .parse_mode(ParseMode::MarkdownV2)
        .link_preview_options(no_preview())
        .await;
    if let Err(e) = first {
        warn!(chat_id, error = %e, "MarkdownV2 failed, sending as plain text");
        bot.send_message(chat, text)
            .link_preview_options(no_preview())
            .await
            .with_context(|| format!("Failed to send message to {chat_id}"))?;
    }
    Ok(())
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        send_text(&self.bot, chat_id, text).await
    }
}
