//! Shared application state.

use std::sync::Arc;

use market_core::MemoryStore;
use market_payments::{
    PaymentGateway, Settlement, SettlementConfig, WebhookProcessor, WebhookVerifier,
};

/// State shared across all request handlers. Everything is injected
/// here once at startup; handlers hold no globals.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub settlement: Arc<Settlement<MemoryStore>>,
    pub webhooks: Arc<WebhookProcessor<MemoryStore>>,
}

impl AppState {
    /// Wire a fresh store to the given gateway. Production passes the
    /// Stripe gateway; tests pass a mock.
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        webhook_secret: &str,
        settlement: SettlementConfig,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let fee_percent = settlement.platform_fee_percent;
        let settlement = Arc::new(Settlement::new(store.clone(), gateway, settlement));
        let webhooks = Arc::new(WebhookProcessor::new(
            store.clone(),
            WebhookVerifier::new(webhook_secret),
            fee_percent,
        ));
        Self {
            store,
            settlement,
            webhooks,
        }
    }
}
