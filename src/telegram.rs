//! Telegram chat front-end.
//!
//! [`ChatBot`] holds the conversation logic and returns the replies to send,
//! so it can be exercised without a bot token. [`run_bot`] wires it to a
//! teloxide long-polling dispatcher.
//!
//! | Message | Registered client | Unregistered chat |
//! |---------|-------------------|-------------------|
//! | `/lang` | list locales | list locales |
//! | `/lang <code>` | store on the client | remember as pending |
//! | `/stop`, `stop`, `pause` | pause | parse |
//! | `/resume`, `resume`, `start` | resume | parse |
//! | `/status`, `status` | search summary | parse |
//! | anything else | parse, upsert | parse, register |

use prospector_core::client::client_from_request;
use prospector_core::i18n::{language_name, resolve_locale, select_locale, t, SUPPORTED_LOCALES};
use prospector_core::text::format_thousands;
use prospector_core::ClientConfig;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ChatAction;
use tracing::{debug, error, info, warn};

use crate::notify::send_text;
use crate::parser::RequestParser;
use crate::state::SharedState;

/// The parts of an incoming chat message the bot looks at.
#[derive(Debug, Clone, Copy)]
pub struct IncomingMessage<'a> {
    pub chat_id: &'a str,
    pub first_name: Option<&'a str>,
    pub language_code: Option<&'a str>,
    pub text: &'a str,
}

pub struct ChatBot {
    state: SharedState,
    parser: Arc<dyn RequestParser>,
    default_locale: String,
}

impl ChatBot {
    pub fn new(state: SharedState, parser: Arc<dyn RequestParser>, default_locale: &str) -> Self {
        Self {
            state,
            parser,
            default_locale: default_locale.to_string(),
        }
    }

    /// Handle one text message and return the replies, in order.
    pub async fn handle(&self, msg: &IncomingMessage<'_>) -> Vec<String> {
        let client = self.state.find_client(msg.chat_id);
        let locale = self.resolve_locale(msg, client.as_ref());
        let command = msg.text.trim().to_lowercase();

        if command.starts_with("/lang") {
            return vec![self.language_command(msg, client.as_ref(), &locale)];
        }

        if let Some(client) = &client {
            match command.as_str() {
                "/stop" | "stop" | "pause" => {
                    return self.toggle(client, false, t(Some(&locale), "paused", &[]));
                }
                "/resume" | "resume" | "start" => {
                    return self.toggle(client, true, t(Some(&locale), "resumed", &[]));
                }
                "/status" | "status" => {
                    return vec![t(
                        Some(&locale),
                        "status",
                        &[
                            ("search_term", client.search_term.as_str()),
                            ("target_city", client.target_city.as_str()),
                        ],
                    )];
                }
                _ => {}
            }
        }

        let outcome = self.parser.parse(msg.text, Some(&locale)).await;
        let mut replies = vec![outcome.reply];
        let Some(request) = outcome.request else {
            return replies;
        };

        let name = msg.first_name.unwrap_or_default();
        let incoming = client_from_request(msg.chat_id, name, &request, &locale);
        match self.state.upsert_client(incoming) {
            Ok(saved) => {
                info!(chat_id = msg.chat_id, search_term = %saved.search_term, "client registered");
                replies.push(t(
                    Some(&locale),
                    "config_confirmed",
                    &[
                        ("persona", saved.persona.as_str()),
                        ("search_term", saved.search_term.as_str()),
                        ("target_city", saved.target_city.as_str()),
                        ("price_max", format_thousands(saved.price_max).as_str()),
                    ],
                ));
            }
            Err(e) => error!(chat_id = msg.chat_id, error = %e, "failed to save client"),
        }
        replies
    }

    fn toggle(&self, client: &ClientConfig, active: bool, reply: String) -> Vec<String> {
        match self.state.set_active(&client.chat_id, active) {
            Ok(_) => vec![reply],
            Err(e) => {
                error!(chat_id = %client.chat_id, error = %e, "failed to update client");
                Vec::new()
            }
        }
    }

    /// Stored preference, then pending choice, then the Telegram language,
    /// then the default. A changed result is written back.
    fn resolve_locale(&self, msg: &IncomingMessage<'_>, client: Option<&ClientConfig>) -> String {
        let pending = self.state.pending_locale(msg.chat_id);
        let preferred = match client {
            Some(c) => Some(c.locale.as_str()),
            None => pending.as_deref(),
        };
        let locale = select_locale(preferred, msg.language_code, &self.default_locale);

        match client {
            Some(c) if c.locale != locale => {
                if let Err(e) = self.state.set_locale(msg.chat_id, &locale) {
                    warn!(chat_id = msg.chat_id, error = %e, "failed to store locale");
                }
            }
            None if pending.as_deref() != Some(locale.as_str()) => {
                self.state.set_pending_locale(msg.chat_id, &locale);
            }
            _ => {}
        }
        locale
    }

    fn language_command(
        &self,
        msg: &IncomingMessage<'_>,
        client: Option<&ClientConfig>,
        current: &str,
    ) -> String {
        let requested = msg
            .text
            .trim()
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default();
        let locales = locale_list();
        if requested.is_empty() {
            return t(Some(current), "lang_prompt", &[("locales", locales.as_str())]);
        }
        let Some(locale) = resolve_locale(requested) else {
            return t(Some(current), "lang_unknown", &[("locales", locales.as_str())]);
        };

        if client.is_some() {
            if let Err(e) = self.state.set_locale(msg.chat_id, &locale) {
                error!(chat_id = msg.chat_id, error = %e, "failed to store locale");
            }
        } else {
            self.state.set_pending_locale(msg.chat_id, &locale);
        }
        t(
            Some(&locale),
            "lang_updated",
            &[("locale", language_name(Some(&locale)))],
        )
    }
}

/// `de (German), en (English), ...` sorted by code.
pub fn locale_list() -> String {
    let mut codes: Vec<&str> = SUPPORTED_LOCALES.to_vec();
    codes.sort_unstable();
    codes
        .iter()
        .map(|code| format!("{code} ({})", language_name(Some(code))))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Long-poll Telegram and answer text messages until the process stops.
pub async fn run_bot(bot: Bot, chat: Arc<ChatBot>) {
    info!("starting Telegram long polling");

    let handler = Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
        let chat = Arc::clone(&chat);
        async move {
            let Some(text) = msg.text() else {
                debug!(chat_id = msg.chat.id.0, "ignoring non-text message");
                return respond(());
            };
            let chat_id = msg.chat.id.0.to_string();
            let user = msg.from.as_ref();
            let incoming = IncomingMessage {
                chat_id: &chat_id,
                first_name: user.map(|u| u.first_name.as_str()),
                language_code: user.and_then(|u| u.language_code.as_deref()),
                text,
            };

            if let Err(e) = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await {
                debug!(error = %e, "typing indicator failed");
            }
            for reply in chat.handle(&incoming).await {
                if let Err(e) = send_text(&bot, &chat_id, &reply).await {
                    warn!(chat_id = %chat_id, error = %e, "failed to reply");
                }
            }
            respond(())
        }
    });

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
