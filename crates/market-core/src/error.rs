//! Error types for the marketplace domain.

use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MarketError>;

/// Errors produced by domain rules and the store.
///
/// Every message here is safe to surface to an API client; anything
/// sensitive (provider payloads, internal state) belongs in logs only.
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Deck not found: {0}")]
    DeckNotFound(String),

    #[error("Review not found: {0}")]
    ReviewNotFound(String),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Deck already purchased: {0}")]
    AlreadyPurchased(String),

    #[error("Deck already reviewed by this user")]
    AlreadyReviewed,

    #[error("Deck must be purchased before it can be reviewed")]
    PurchaseRequired,

    #[error("Operation not permitted for this user")]
    NotOwner,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<anyhow::Error> for MarketError {
    fn from(err: anyhow::Error) -> Self {
        MarketError::Storage(err.to_string())
    }
}

impl MarketError {
    /// Whether retrying the same request could succeed without any
    /// other state changing first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::Storage(_))
    }
}
