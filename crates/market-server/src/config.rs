//! Server configuration assembled from the environment.

use market_payments::{SettlementConfig, StripeConfig};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Everything the server needs to start. Constructed once in `main`;
/// nothing else reads the environment after this.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub stripe: StripeConfig,
    pub settlement: SettlementConfig,
}

impl ServerConfig {
    /// Read configuration from the environment. Fails when either
    /// Stripe secret is missing.
    pub fn from_env() -> anyhow::Result<Self> {
        let stripe = StripeConfig::from_env()?;
        let settlement = SettlementConfig::from_env();
        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        Ok(Self {
            bind_addr,
            stripe,
            settlement,
        })
    }
}
