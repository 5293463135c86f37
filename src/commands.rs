//! Operator commands (pause, resume, status, log, help)
//!
//! Transport-agnostic: the Telegram poller feeds raw text in and sends the
//! returned reply back out.

use crate::exchange::AccountSource;
use crate::journal::TickJournal;
use crate::scheduler::ControlHandle;
use crate::state::StateStore;
use crate::types::TradingPair;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use tracing::{info, warn};

pub const HELP_TEXT: &str = "Commands:\n\
    pause - pause the bot\n\
    resume (reprendre) - resume the bot\n\
    status - account and bot status\n\
    log N - journal of the last N days (default 1)\n\
    help (aide) - this help";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Status,
    Log(u32),
    Help,
}

impl Command {
    /// Parse operator input; anything unrecognized maps to Help
    pub fn parse(input: &str) -> Self {
        let lowered = input.trim().to_lowercase();
        let mut parts = lowered.split_whitespace();
        let Some(word) = parts.next() else {
            return Command::Help;
        };

        match word {
            "pause" => Command::Pause,
            "resume" | "reprendre" => Command::Resume,
            "status" => Command::Status,
            "log" | "logs" => {
                let days = parts
                    .next()
                    .and_then(|n| n.parse::<u32>().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(1);
                Command::Log(days)
            }
            _ => Command::Help,
        }
    }
}

/// Executes commands against the running bot
pub struct CommandHandler<A> {
    account: A,
    pair: TradingPair,
    control: ControlHandle,
    journal: TickJournal,
    state_path: PathBuf,
    cooldown: Duration,
}

impl<A: AccountSource> CommandHandler<A> {
    pub fn new(
        account: A,
        pair: TradingPair,
        control: ControlHandle,
        journal: TickJournal,
        state_path: PathBuf,
        cooldown: Duration,
    ) -> Self {
        Self {
            account,
            pair,
            control,
            journal,
            state_path,
            cooldown,
        }
    }

    /// Parse and run raw text, returning the reply
    pub async fn handle_text(&self, text: &str) -> String {
        self.handle(Command::parse(text)).await
    }

    pub async fn handle(&self, command: Command) -> String {
        info!("[Commands] {:?}", command);
        match command {
            Command::Pause => {
                if self.control.pause() {
                    self.journal_line("pause").await;
                    "Bot paused".to_string()
                } else {
                    "Bot already paused".to_string()
                }
            }
            Command::Resume => {
                if self.control.resume() {
                    self.journal_line("resume").await;
                    "Bot resumed".to_string()
                } else {
                    "Bot already running".to_string()
                }
            }
            Command::Status => self.status(Utc::now()).await,
            Command::Log(days) => self.journal.recent(days, Utc::now()),
            Command::Help => HELP_TEXT.to_string(),
        }
    }

    async fn status(&self, now: DateTime<Utc>) -> String {
        let mut lines = Vec::new();

        match self.account.account_snapshot(&self.pair).await {
            Ok(snapshot) => lines.push(snapshot.to_string()),
            Err(e) => lines.push(format!("Account unavailable: {}", e)),
        }

        lines.push(format!(
            "Bot: {}",
            if self.control.is_paused() { "paused" } else { "running" }
        ));

        match StateStore::read_record(&self.state_path) {
            Ok(record) => match record.last_action_at {
                Some(at) => {
                    lines.push(format!("Last trade: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
                    let next = at + self.cooldown;
                    if next > now {
                        lines.push(format!("Next trade allowed: {}", next.format("%Y-%m-%d %H:%M:%S UTC")));
                    }
                }
                None => lines.push("Last trade: none".to_string()),
            },
            Err(e) => {
                warn!("[Commands] {}", e);
                lines.push(format!("Last trade: unknown ({})", e));
            }
        }

        lines.join("\n")
    }

    async fn journal_line(&self, message: &str) {
        if let Err(e) = self.journal.append(message).await {
            warn!("[Commands] Failed to write journal: {:#}", e);
        }
    }
}
