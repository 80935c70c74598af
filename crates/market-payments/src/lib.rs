//! # market-payments
//!
//! Payment provider integration for the deck marketplace: connected
//! accounts, hosted checkout, transfers, payouts, and webhooks.
//!
//! ## Settlement paths
//!
//! A deck sale can settle two ways, both owned by [`Settlement`]:
//!
//! **Balance (synchronous)** — the buyer pays from their stored
//! wallet; the seller is paid by an immediate provider transfer:
//!
//! ```text
//! ┌────────┐  debit + record   ┌───────┐  transfer (90%)  ┌────────────┐
//! │ buyer  │──────────────────▶│ store │─────────────────▶│  seller's  │
//! │ wallet │   (atomic)        │       │  reverse on fail │  account   │
//! └────────┘                   └───────┘                  └────────────┘
//! ```
//!
//! **Checkout (asynchronous)** — the buyer pays at the provider's
//! hosted page; nothing settles until the completion webhook lands:
//!
//! ```text
//! ┌────────┐  hosted page  ┌──────────┐  webhook  ┌──────────────────┐
//! │ buyer  │──────────────▶│ provider │──────────▶│ verify, dedupe,  │
//! │        │               │ checkout │           │ record purchase  │
//! └────────┘               └──────────┘           └──────────────────┘
//! ```
//!
//! Webhook side effects run at most once: every event ID goes through
//! the store's event ledger before anything is applied.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use market_payments::{Settlement, SettlementConfig, StripeGateway};
//!
//! let gateway = Arc::new(StripeGateway::from_env()?);
//! let settlement = Settlement::new(store, gateway, SettlementConfig::from_env());
//!
//! // Synchronous purchase from stored balance
//! let settled = settlement.purchase_with_balance(&buyer, &deck_id).await?;
//! println!("transfer {} sent", settled.transfer);
//! ```

mod error;
mod gateway;
mod mock;
mod settlement;
mod stripe;
mod webhook;

pub use error::{PaymentError, Result};
pub use gateway::{
    CheckoutParams, CheckoutSession, OnboardingLink, PaymentGateway, PayoutId, TransferId,
    cents_to_dollars, dollars_to_cents,
};
pub use mock::{GatewayCall, MockGateway};
pub use settlement::{
    PayoutSettled, PurchaseSettled, Settlement, SettlementConfig, SettlementMode,
    split_seller_share,
};
pub use stripe::{StripeConfig, StripeGateway};
pub use webhook::{
    ProviderEvent, SIGNATURE_TOLERANCE_SECS, SessionPurpose, WebhookEvent, WebhookOutcome,
    WebhookProcessor, WebhookVerifier, parse_event,
};
