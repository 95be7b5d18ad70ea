//! Streaming error taxonomy
//!
//! Errors are `Clone` because a single connection failure is broadcast to
//! every future waiting on that connection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type for streaming operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Streaming operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout: {0}")]
    RequestTimeout(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Exchange error: {0}")]
    ExchangeReported(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Bad symbol: {0}")]
    BadSymbol(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Invalid nonce: {0}")]
    InvalidNonce(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Connection closed by the user")]
    ClosedByUser,

    #[error("Unsubscribed from {0}")]
    Unsubscribed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl ExchangeError {
    /// Errors that end the connection and are delivered to every waiter
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::RequestTimeout(_) | Self::ClosedByUser
        )
    }
}

impl From<sriquant_core::FixedError> for ExchangeError {
    fn from(err: sriquant_core::FixedError) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for ExchangeError {
    fn from(err: std::io::Error) -> Self {
        Self::NetworkError(err.to_string())
    }
}

/// Typed error an exchange error code or message maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionKind {
    NetworkError,
    RequestTimeout,
    AuthenticationError,
    ExchangeError,
    BadRequest,
    BadSymbol,
    RateLimitExceeded,
    PermissionDenied,
    InsufficientFunds,
    InvalidNonce,
    NotSupported,
}

impl ExceptionKind {
    pub fn into_error(self, feedback: String) -> ExchangeError {
        match self {
            Self::NetworkError => ExchangeError::NetworkError(feedback),
            Self::RequestTimeout => ExchangeError::RequestTimeout(feedback),
            Self::AuthenticationError => ExchangeError::AuthenticationError(feedback),
            Self::ExchangeError => ExchangeError::ExchangeReported(feedback),
            Self::BadRequest => ExchangeError::BadRequest(feedback),
            Self::BadSymbol => ExchangeError::BadSymbol(feedback),
            Self::RateLimitExceeded => ExchangeError::RateLimitExceeded(feedback),
            Self::PermissionDenied => ExchangeError::PermissionDenied(feedback),
            Self::InsufficientFunds => ExchangeError::InsufficientFunds(feedback),
            Self::InvalidNonce => ExchangeError::InvalidNonce(feedback),
            Self::NotSupported => ExchangeError::NotSupported(feedback),
        }
    }
}

/// Exact (error code) and broad (message substring) exception tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionTable {
    pub exact: HashMap<String, ExceptionKind>,
    pub broad: HashMap<String, ExceptionKind>,
}

impl Default for ExceptionTable {
    fn default() -> Self {
        let exact = HashMap::from([
            ("-10009".to_string(), ExceptionKind::BadRequest),
            ("10003".to_string(), ExceptionKind::AuthenticationError),
            ("10004".to_string(), ExceptionKind::AuthenticationError),
            ("10006".to_string(), ExceptionKind::RateLimitExceeded),
            ("10429".to_string(), ExceptionKind::RateLimitExceeded),
        ]);
        let broad = HashMap::from([
            ("invalid symbol".to_string(), ExceptionKind::BadSymbol),
            ("too many requests".to_string(), ExceptionKind::RateLimitExceeded),
            ("rate limit".to_string(), ExceptionKind::RateLimitExceeded),
            ("permission denied".to_string(), ExceptionKind::PermissionDenied),
        ]);
        Self { exact, broad }
    }
}

impl ExceptionTable {
    pub fn empty() -> Self {
        Self {
            exact: HashMap::new(),
            broad: HashMap::new(),
        }
    }

    /// Error for an exactly matching code, if the table knows it
    pub fn exactly_matched(&self, code: &str, feedback: &str) -> Option<ExchangeError> {
        self.exact
            .get(code)
            .map(|kind| kind.into_error(feedback.to_string()))
    }

    /// Error for the longest table key contained in `message`
    /// (case-insensitive), if any
    pub fn broadly_matched(&self, message: &str, feedback: &str) -> Option<ExchangeError> {
        let lowered = message.to_lowercase();
        self.broad
            .iter()
            .filter(|(key, _)| lowered.contains(&key.to_lowercase()))
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|(_, kind)| kind.into_error(feedback.to_string()))
    }
}
