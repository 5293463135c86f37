//! Exchange API Error Differentiation
//!
//! Parses Binance REST error responses into structured types so the
//! scheduler can tell a fatal failure (bad credentials) from one that
//! should simply be retried on the next tick.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Coarse failure class used by the scheduler's propagation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    InsufficientFunds,
    TransientNetwork,
    RateLimited,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Authentication => write!(f, "authentication"),
            ErrorKind::InsufficientFunds => write!(f, "insufficient_funds"),
            ErrorKind::TransientNetwork => write!(f, "transient_network"),
            ErrorKind::RateLimited => write!(f, "rate_limited"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Structured exchange API error types
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// API key, signature or IP whitelist rejected
    #[error("API authentication failed: {0}")]
    Authentication(String),
    /// Account balance too low for the requested order
    #[error("Insufficient balance: {0}")]
    InsufficientFunds(String),
    /// Timeout, connection failure or exchange-side 5xx
    #[error("Network error: {0}")]
    TransientNetwork(String),
    /// Request weight or order rate limit exceeded
    #[error("Rate limited by exchange")]
    RateLimited,
    /// Anything else, with status code and body
    #[error("Exchange API error {status}: {body}")]
    Unknown { status: u16, body: String },
}

/// Binance error response format
#[derive(Debug, Deserialize)]
struct BinanceErrorResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

impl ExchangeError {
    /// Parse an exchange API response into a structured error
    pub fn from_response(status: u16, body: &str) -> Self {
        let (code, error_msg) = match serde_json::from_str::<BinanceErrorResponse>(body) {
            Ok(parsed) => (parsed.code, parsed.msg.unwrap_or_else(|| body.to_string())),
            Err(_) => (None, body.to_string()),
        };

        let msg_lower = error_msg.to_lowercase();

        // Rate limiting (418 = IP banned after repeated 429s)
        if status == 429 || status == 418 || code == Some(-1003) || msg_lower.contains("too many requests") {
            return ExchangeError::RateLimited;
        }

        // Authentication
        if status == 401
            || status == 403
            || matches!(code, Some(-2014) | Some(-2015) | Some(-1022))
            || msg_lower.contains("invalid api-key")
            || msg_lower.contains("signature for this request is not valid")
        {
            return ExchangeError::Authentication(error_msg);
        }

        // Insufficient balance
        if msg_lower.contains("insufficient balance") || msg_lower.contains("insufficient funds") {
            return ExchangeError::InsufficientFunds(error_msg);
        }

        // Exchange-side failures are worth another attempt next tick
        if status >= 500 {
            return ExchangeError::TransientNetwork(format!("HTTP {}: {}", status, error_msg));
        }

        ExchangeError::Unknown {
            status,
            body: error_msg,
        }
    }

    /// Parse a network/reqwest error
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::TransientNetwork("Request timed out".to_string())
        } else if err.is_connect() {
            ExchangeError::TransientNetwork("Connection failed".to_string())
        } else if err.is_decode() {
            ExchangeError::Unknown {
                status: 0,
                body: format!("Malformed response: {}", err),
            }
        } else {
            ExchangeError::TransientNetwork(err.to_string())
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::Authentication(_) => ErrorKind::Authentication,
            ExchangeError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            ExchangeError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            ExchangeError::RateLimited => ErrorKind::RateLimited,
            ExchangeError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Only bad credentials stop the loop; everything else waits for the next tick
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Authentication(_))
    }

    /// Whether the exchange rejected the order for being below the notional filter
    pub fn is_notional_rejection(&self) -> bool {
        match self {
            ExchangeError::Unknown { body, .. } => body.to_uppercase().contains("NOTIONAL"),
            _ => false,
        }
    }
}
