//! Bot-level error taxonomy

use crate::exchange::{ErrorKind, ExchangeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    /// Programming or configuration error; fatal
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failure reported by the exchange adapter
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Last-action bookkeeping could not be written; cooldown may be stale
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl BotError {
    /// Fatal errors halt the scheduler and make the process exit non-zero
    pub fn is_fatal(&self) -> bool {
        match self {
            BotError::InvalidInput(_) => true,
            BotError::Exchange(e) => e.is_fatal(),
            BotError::Persistence(_) => false,
        }
    }

    pub fn exchange_kind(&self) -> Option<ErrorKind> {
        match self {
            BotError::Exchange(e) => Some(e.kind()),
            _ => None,
        }
    }
}

pub type BotResult<T> = std::result::Result<T, BotError>;
