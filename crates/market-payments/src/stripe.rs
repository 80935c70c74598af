//! Stripe REST gateway.
//!
//! Talks to the provider's form-encoded REST API directly. Requests
//! carry a bearer key; connected-account payouts add the
//! `Stripe-Account` header so the call runs against the seller's
//! account rather than the platform's.
//!
//! Provider error bodies are logged in full but never surfaced to
//! callers; the returned error names only the endpoint and status.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use async_trait::async_trait;

use market_core::AccountId;

use crate::error::{PaymentError, Result};
use crate::gateway::{
    CheckoutParams, CheckoutSession, OnboardingLink, PaymentGateway, PayoutId, TransferId,
};

const DEFAULT_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Stripe connection settings
#[derive(Clone, Debug)]
pub struct StripeConfig {
    /// Secret API key (`sk_...`)
    pub secret_key: String,
    /// Webhook signing secret (`whsec_...`)
    pub webhook_secret: String,
    /// API origin; overridable for tests against a local stub
    pub api_base: String,
    pub timeout_secs: u64,
}

impl StripeConfig {
    /// Create from environment variables. Both secrets are required;
    /// the service must not start without them.
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| PaymentError::Config("STRIPE_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| PaymentError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;
        let api_base =
            std::env::var("STRIPE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        Ok(Self {
            secret_key,
            webhook_secret,
            api_base,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
    }
}

/// Stripe client wrapper
pub struct StripeGateway {
    http: reqwest::Client,
    config: StripeConfig,
}

impl StripeGateway {
    /// Create a new Stripe gateway
    pub fn new(config: StripeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    /// Get the webhook signing secret
    pub fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }

    /// POST a form-encoded request and decode the JSON response.
    /// `on_behalf_of` switches the call onto a connected account.
    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        on_behalf_of: Option<&AccountId>,
    ) -> Result<T> {
        let url = format!("{}/v1/{}", self.config.api_base, path);
        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(form);
        if let Some(account) = on_behalf_of {
            request = request.header("Stripe-Account", account.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| "no error detail".to_string());
            warn!(endpoint = path, status = %status, detail = %detail, "provider rejected request");
            return Err(PaymentError::Provider(format!("{path} returned {status}")));
        }

        debug!(endpoint = path, status = %status, "provider request ok");
        serde_json::from_str(&body)
            .map_err(|e| PaymentError::Provider(format!("unexpected response from {path}: {e}")))
    }
}

/// Flatten checkout params into Stripe's bracketed form encoding.
fn checkout_form(params: &CheckoutParams) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), params.success_url.clone()),
        ("cancel_url".to_string(), params.cancel_url.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            "usd".to_string(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            params.amount_cents.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            params.product_name.clone(),
        ),
    ];
    // BTreeMap ordering keeps the encoding deterministic for tests
    let metadata: std::collections::BTreeMap<_, _> = params.metadata.iter().collect();
    for (key, value) in metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }
    if let Some(email) = &params.customer_email {
        form.push(("customer_email".to_string(), email.clone()));
    }
    form
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_express_account(&self, email: &str) -> Result<AccountId> {
        let form = vec![
            ("type".to_string(), "express".to_string()),
            ("email".to_string(), email.to_string()),
        ];
        let account: AccountObject = self.post_form("accounts", &form, None).await?;
        Ok(AccountId::from_string(account.id))
    }

    async fn create_onboarding_link(
        &self,
        account: &AccountId,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<OnboardingLink> {
        let form = vec![
            ("account".to_string(), account.as_str().to_string()),
            ("refresh_url".to_string(), refresh_url.to_string()),
            ("return_url".to_string(), return_url.to_string()),
            ("type".to_string(), "account_onboarding".to_string()),
        ];
        let link: AccountLinkObject = self.post_form("account_links", &form, None).await?;
        Ok(OnboardingLink {
            url: link.url,
            expires_at: link.expires_at,
        })
    }

    async fn create_checkout_session(&self, params: CheckoutParams) -> Result<CheckoutSession> {
        let form = checkout_form(&params);
        let session: SessionObject = self.post_form("checkout/sessions", &form, None).await?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::Provider("No checkout URL returned".into()))?;
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    async fn create_transfer(
        &self,
        destination: &AccountId,
        amount_cents: i64,
        transfer_group: &str,
    ) -> Result<TransferId> {
        let form = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), "usd".to_string()),
            ("destination".to_string(), destination.as_str().to_string()),
            ("transfer_group".to_string(), transfer_group.to_string()),
        ];
        let transfer: TransferObject = self.post_form("transfers", &form, None).await?;
        Ok(TransferId::from_string(transfer.id))
    }

    async fn create_payout(&self, account: &AccountId, amount_cents: i64) -> Result<PayoutId> {
        let form = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), "usd".to_string()),
        ];
        // Runs on the connected account: pays their provider balance
        // out to their bank.
        let payout: PayoutObject = self.post_form("payouts", &form, Some(account)).await?;
        Ok(PayoutId::from_string(payout.id))
    }

    fn name(&self) -> &str {
        "stripe"
    }
}

// ===== Provider response shapes (only the fields we read) =====

#[derive(Debug, Deserialize)]
struct AccountObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AccountLinkObject {
    url: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PayoutObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
}
