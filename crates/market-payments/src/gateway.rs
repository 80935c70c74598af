//! Payment gateway abstraction.
//!
//! Strategy pattern: settlement and the HTTP layer depend on this
//! trait, production wires in [`StripeGateway`](crate::StripeGateway),
//! and tests wire in [`MockGateway`](crate::MockGateway). Amounts
//! cross this boundary as whole cents, the provider's native unit.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use market_core::AccountId;

use crate::error::{PaymentError, Result};

/// Provider transfer ID (`tr_...`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferId(String);

impl TransferId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider payout ID (`po_...`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutId(String);

impl PayoutId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PayoutId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One-time onboarding URL for a connected account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnboardingLink {
    pub url: String,
    /// Unix timestamp after which the link is dead, when the provider
    /// reports one
    pub expires_at: Option<i64>,
}

/// Everything needed to open a hosted checkout page
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutParams {
    /// Line-item name shown on the hosted page
    pub product_name: String,
    pub amount_cents: i64,
    pub success_url: String,
    pub cancel_url: String,
    /// Echoed back verbatim in the completion webhook; this is how the
    /// webhook attributes the payment to a user or a deck sale
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

/// Result of creating a checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider session ID (`cs_...`)
    pub id: String,
    /// URL to redirect the buyer to
    pub url: String,
}

/// The payment provider operations the marketplace needs.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provision an express connected account for a seller
    async fn create_express_account(&self, email: &str) -> Result<AccountId>;

    /// Create a one-time onboarding link for a connected account
    async fn create_onboarding_link(
        &self,
        account: &AccountId,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<OnboardingLink>;

    /// Open a hosted checkout session
    async fn create_checkout_session(&self, params: CheckoutParams) -> Result<CheckoutSession>;

    /// Move platform funds to a connected account
    async fn create_transfer(
        &self,
        destination: &AccountId,
        amount_cents: i64,
        transfer_group: &str,
    ) -> Result<TransferId>;

    /// Pay out a connected account's provider balance to its bank
    async fn create_payout(&self, account: &AccountId, amount_cents: i64) -> Result<PayoutId>;

    /// Short name for logs and health reporting
    fn name(&self) -> &str;
}

/// Convert a dollar amount to whole cents. Fails for amounts that do
/// not land on a cent boundary or exceed the provider's integer range.
pub fn dollars_to_cents(amount: Decimal) -> Result<i64> {
    let cents = amount * Decimal::from(100);
    if cents.fract() != Decimal::ZERO {
        return Err(PaymentError::InvalidAmount(format!(
            "{amount} is not a whole number of cents"
        )));
    }
    cents
        .to_i64()
        .ok_or_else(|| PaymentError::InvalidAmount(format!("{amount} out of range")))
}

/// Convert provider cents back to a dollar amount
pub fn cents_to_dollars(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn dollars_convert_to_cents_exactly() {
        assert_eq!(dollars_to_cents(dec!(10)).unwrap(), 1000);
        assert_eq!(dollars_to_cents(dec!(9.99)).unwrap(), 999);
        assert_eq!(dollars_to_cents(dec!(0.01)).unwrap(), 1);
    }

    #[test]
    fn sub_cent_amounts_are_rejected() {
        assert!(dollars_to_cents(dec!(1.005)).is_err());
    }

    #[test]
    fn cents_round_trip() {
        assert_eq!(cents_to_dollars(2500), dec!(25.00));
        assert_eq!(dollars_to_cents(cents_to_dollars(999)).unwrap(), 999);
    }
}
