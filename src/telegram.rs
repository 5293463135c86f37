//! Telegram Bot API transport for operator commands and notifications

use crate::commands::CommandHandler;
use crate::config::TelegramConfig;
use crate::exchange::AccountSource;
use crate::journal::TickJournal;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Long-poll duration passed to getUpdates, in seconds
const POLL_TIMEOUT_SECS: u64 = 25;

/// Telegram rejects messages longer than 4096 characters
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Client bound to one bot token and one operator chat
#[derive(Clone)]
pub struct TelegramBot {
    client: Client,
    api_url: String,
    chat_id: String,
    journal: Option<TickJournal>,
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        Self::with_api_url(TELEGRAM_API_URL, &config.token, &config.chat_id)
    }

    pub fn with_api_url(base_url: &str, token: &str, chat_id: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            api_url: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
            chat_id: chat_id.to_string(),
            journal: None,
        })
    }

    /// Record a short excerpt of every sent message in the journal
    pub fn with_journal(mut self, journal: TickJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Send a message to the operator chat, split if too long
    pub async fn send_message(&self, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            let response = self
                .client
                .post(format!("{}/sendMessage", self.api_url))
                .json(&json!({ "chat_id": self.chat_id, "text": chunk }))
                .send()
                .await
                .context("Failed to reach Telegram")?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Telegram sendMessage failed ({}): {}", status, body);
            }
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append_sent(text).await {
                warn!("[Telegram] Failed to write journal: {:#}", e);
            }
        }
        Ok(())
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        let mut query = vec![("timeout", timeout_secs.to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/getUpdates", self.api_url))
            .query(&query)
            .send()
            .await
            .context("Failed to reach Telegram")?;

        let status = response.status();
        let body: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .with_context(|| format!("Invalid getUpdates response ({})", status))?;

        if !body.ok {
            anyhow::bail!(
                "Telegram getUpdates failed: {}",
                body.description.unwrap_or_else(|| status.to_string())
            );
        }
        Ok(body.result.unwrap_or_default())
    }

    /// Text of an update if it comes from the operator chat
    fn operator_text<'a>(&self, update: &'a Update) -> Option<&'a str> {
        let message = update.message.as_ref()?;
        if message.chat.id.to_string() != self.chat_id {
            debug!("[Telegram] Ignoring message from chat {}", message.chat.id);
            return None;
        }
        message.text.as_deref()
    }

    /// Answer operator commands until `shutdown` flips to true
    pub fn spawn_polling<A>(
        &self,
        handler: Arc<CommandHandler<A>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()>
    where
        A: AccountSource + 'static,
    {
        let bot = self.clone();
        tokio::spawn(async move {
            info!("[Telegram] Polling for commands");
            let mut offset: Option<i64> = None;

            loop {
                if *shutdown.borrow() {
                    break;
                }

                let updates = tokio::select! {
                    _ = shutdown.changed() => break,
                    res = bot.get_updates(offset, POLL_TIMEOUT_SECS) => res,
                };

                match updates {
                    Ok(updates) => {
                        for update in updates {
                            offset = Some(update.update_id + 1);
                            let Some(text) = bot.operator_text(&update) else {
                                continue;
                            };
                            let reply = handler.handle_text(text).await;
                            if let Err(e) = bot.send_message(&reply).await {
                                warn!("[Telegram] Failed to reply: {:#}", e);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("[Telegram] Polling error: {:#}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            info!("[Telegram] Polling stopped");
        })
    }

    /// Forward scheduler notifications until the sender side is dropped
    pub fn spawn_outbound(&self, mut rx: mpsc::Receiver<String>) -> JoinHandle<()> {
        let bot = self.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = bot.send_message(&message).await {
                    warn!("[Telegram] Failed to send notification: {:#}", e);
                }
            }
        })
    }
}

/// Split on line boundaries so each chunk stays under `max_chars`
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split('\n') {
        let line_len = line.chars().count();
        if !current.is_empty() && current.chars().count() + 1 + line_len > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if line_len > max_chars {
            // Hard-split a single oversized line
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}
