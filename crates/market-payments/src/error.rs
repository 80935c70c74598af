//! Payment Error Types

use thiserror::Error;

use market_core::MarketError;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Provider API rejected or failed a request. The message carries
    /// only the endpoint and status, never the provider's raw body.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Transport-level failure talking to the provider
    #[error("Provider request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// User has no connected account yet
    #[error("No connected account for user: {0}")]
    AccountMissing(String),

    /// Connected account exists but onboarding has not completed
    #[error("Connected account not active for user: {0}")]
    AccountNotActive(String),

    /// Amount cannot be expressed as a whole number of cents
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Domain or storage rule rejected the operation
    #[error(transparent)]
    Market(#[from] MarketError),
}

impl PaymentError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Provider(_) | PaymentError::Network(_) => true,
            PaymentError::Market(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Provider(_) | PaymentError::Network(_) => {
                "Payment processing failed. Please try again.".to_string()
            }
            PaymentError::AccountMissing(_) => {
                "Set up your payout account before selling or withdrawing.".to_string()
            }
            PaymentError::AccountNotActive(_) => {
                "Finish onboarding your payout account first.".to_string()
            }
            PaymentError::Config(_) => "Service configuration error.".to_string(),
            PaymentError::InvalidAmount(_) => "That amount is not valid.".to_string(),
            // Domain errors already carry client-safe messages
            PaymentError::Market(e) => e.to_string(),
            _ => "An error occurred processing your request.".to_string(),
        }
    }
}
