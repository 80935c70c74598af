//! Purchase and payout settlement.
//!
//! One module owns every money-moving flow, each as an explicit,
//! named operation:
//!
//! - `purchase_with_balance`: synchronous. Debit the buyer's stored
//!   balance and transfer the seller share, compensating the debit if
//!   the transfer fails.
//! - `deck_checkout_session` / `recharge_session`: asynchronous. Open
//!   a hosted checkout; settlement happens later when the completion
//!   webhook lands.
//! - `withdraw`: debit-first payout with a compensating credit if the
//!   provider leg fails.
//!
//! The store legs are atomic store methods, so two racing settlements
//! can never both spend the same balance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use market_core::{
    AccountId, DeckId, MarketError, MarketStore, Profile, PurchaseFunding, PurchaseReceipt,
    PurchaseRequest, UserId,
};

use crate::error::{PaymentError, Result};
use crate::gateway::{
    CheckoutParams, CheckoutSession, OnboardingLink, PaymentGateway, PayoutId, TransferId,
    dollars_to_cents,
};

const DEFAULT_CLIENT_BASE_URL: &str = "http://localhost:5173";
const DEFAULT_FEE_PERCENT: u32 = 10;

/// Which settlement path a deployment treats as canonical. Both paths
/// stay callable; this names the one the client is built around and is
/// surfaced in health and startup logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    /// Stored-balance purchases settled synchronously with a transfer
    Balance,
    /// Hosted-checkout purchases settled by webhook
    Checkout,
}

impl SettlementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementMode::Balance => "balance",
            SettlementMode::Checkout => "checkout",
        }
    }
}

impl std::str::FromStr for SettlementMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "balance" => Ok(SettlementMode::Balance),
            "checkout" => Ok(SettlementMode::Checkout),
            other => Err(format!("unknown settlement mode: {other}")),
        }
    }
}

impl std::fmt::Display for SettlementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement policy knobs
#[derive(Clone, Debug)]
pub struct SettlementConfig {
    pub mode: SettlementMode,
    /// Percentage of each sale the platform keeps, 0..=100
    pub platform_fee_percent: u32,
    /// Client origin used to build redirect URLs
    pub client_base_url: String,
}

impl SettlementConfig {
    /// Read settlement settings from the environment, falling back to
    /// defaults with a warning rather than refusing to start.
    pub fn from_env() -> Self {
        let mode = match std::env::var("SETTLEMENT_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(error = %e, "invalid SETTLEMENT_MODE, using balance");
                SettlementMode::Balance
            }),
            Err(_) => SettlementMode::Balance,
        };
        let platform_fee_percent = match std::env::var("PLATFORM_FEE_PERCENT") {
            Ok(raw) => match raw.parse::<u32>() {
                Ok(fee) if fee <= 100 => fee,
                _ => {
                    warn!(raw, "invalid PLATFORM_FEE_PERCENT, using {DEFAULT_FEE_PERCENT}");
                    DEFAULT_FEE_PERCENT
                }
            },
            Err(_) => DEFAULT_FEE_PERCENT,
        };
        let client_base_url = std::env::var("CLIENT_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_CLIENT_BASE_URL.to_string());

        Self {
            mode,
            platform_fee_percent,
            client_base_url,
        }
    }
}

/// Seller's cut of a sale: the price minus the platform fee, computed
/// in integer cents with truncation. The remainder stays with the
/// platform account implicitly.
pub fn split_seller_share(amount: Decimal, fee_percent: u32) -> Result<Decimal> {
    if fee_percent > 100 {
        return Err(PaymentError::InvalidAmount(format!(
            "platform fee {fee_percent}% exceeds 100%"
        )));
    }
    let cents = dollars_to_cents(amount)?;
    let seller_cents = cents * i64::from(100 - fee_percent) / 100;
    Ok(Decimal::new(seller_cents, 2))
}

/// Result of a synchronous stored-balance purchase
#[derive(Clone, Debug)]
pub struct PurchaseSettled {
    pub receipt: PurchaseReceipt,
    pub transfer: TransferId,
}

/// Result of a payout
#[derive(Clone, Debug)]
pub struct PayoutSettled {
    pub payout: PayoutId,
    pub new_balance: Decimal,
}

/// Orchestrates every flow that moves money, against whatever store
/// and gateway it was constructed with.
pub struct Settlement<S> {
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    config: SettlementConfig,
}

impl<S: MarketStore> Settlement<S> {
    pub fn new(store: Arc<S>, gateway: Arc<dyn PaymentGateway>, config: SettlementConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub fn mode(&self) -> SettlementMode {
        self.config.mode
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    /// Seller share of `amount` under the configured platform fee
    pub fn seller_share(&self, amount: Decimal) -> Result<Decimal> {
        split_seller_share(amount, self.config.platform_fee_percent)
    }

    // ===== Connected accounts =====

    /// Look up or create the user's connected account. Idempotent at
    /// our end: once an account is bound, later calls return it
    /// without touching the provider.
    pub async fn provision_account(&self, user: &UserId) -> Result<AccountId> {
        let profile = self.require_profile(user)?;
        if let Some(account) = profile.connect_account_id {
            info!(user = %user, account = %account, "reusing existing connected account");
            return Ok(account);
        }

        let email = profile
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| MarketError::MissingInput("profile email".into()))?;

        let account = self.gateway.create_express_account(&email).await?;
        self.store.bind_connect_account(user, account.clone())?;
        info!(user = %user, account = %account, "connected account provisioned");
        Ok(account)
    }

    /// Create a connected account for an email with no profile yet.
    /// The caller holds the returned ID until sign-up completes.
    pub async fn provision_pending_account(&self, email: &str) -> Result<AccountId> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(MarketError::Validation(format!("invalid email: {email}")).into());
        }
        let account = self.gateway.create_express_account(email).await?;
        info!(account = %account, "pending connected account provisioned");
        Ok(account)
    }

    /// Onboarding link for a user with a bound account
    pub async fn onboarding_link_for_user(&self, user: &UserId) -> Result<OnboardingLink> {
        let profile = self.require_profile(user)?;
        let account = profile
            .connect_account_id
            .ok_or_else(|| PaymentError::AccountMissing(user.to_string()))?;
        self.onboarding_link_for_account(&account).await
    }

    /// Onboarding link for a raw account ID (the pre-sign-up flow)
    pub async fn onboarding_link_for_account(&self, account: &AccountId) -> Result<OnboardingLink> {
        let refresh_url = format!("{}/connect/refresh", self.config.client_base_url);
        let return_url = format!("{}/connect/return", self.config.client_base_url);
        self.gateway
            .create_onboarding_link(account, &refresh_url, &return_url)
            .await
    }

    // ===== Hosted checkout =====

    /// Open a checkout session that tops up the user's stored balance.
    /// The wallet is only credited when the completion webhook lands.
    pub async fn recharge_session(&self, user: &UserId, amount: Decimal) -> Result<CheckoutSession> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!(
                "recharge amount must be positive, got {amount}"
            )));
        }
        let profile = self.require_profile(user)?;
        let amount_cents = dollars_to_cents(amount)?;

        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), user.to_string());
        metadata.insert("isRecharge".to_string(), "true".to_string());

        let session = self
            .gateway
            .create_checkout_session(CheckoutParams {
                product_name: "Add Credits".to_string(),
                amount_cents,
                success_url: format!("{}/wallet?recharge=success", self.config.client_base_url),
                cancel_url: format!("{}/wallet?recharge=cancelled", self.config.client_base_url),
                metadata,
                customer_email: profile.email,
            })
            .await?;
        info!(user = %user, session = %session.id, amount = %amount, "recharge session created");
        Ok(session)
    }

    /// Open a checkout session for a deck. The price comes from the
    /// stored deck, never from the client.
    pub async fn deck_checkout_session(
        &self,
        buyer: &UserId,
        deck_id: &DeckId,
    ) -> Result<CheckoutSession> {
        let buyer_profile = self.require_profile(buyer)?;
        let deck = self
            .store
            .deck(deck_id)?
            .ok_or_else(|| MarketError::DeckNotFound(deck_id.to_string()))?;
        if buyer_profile.owns_deck(deck_id) {
            return Err(MarketError::AlreadyPurchased(deck_id.to_string()).into());
        }
        let amount_cents = dollars_to_cents(deck.price)?;

        let mut metadata = HashMap::new();
        metadata.insert("buyerId".to_string(), buyer.to_string());
        metadata.insert("deckId".to_string(), deck_id.to_string());

        let session = self
            .gateway
            .create_checkout_session(CheckoutParams {
                product_name: deck.title.clone(),
                amount_cents,
                success_url: format!(
                    "{}/decks/{}?purchase=success",
                    self.config.client_base_url, deck_id
                ),
                cancel_url: format!(
                    "{}/decks/{}?purchase=cancelled",
                    self.config.client_base_url, deck_id
                ),
                metadata,
                customer_email: buyer_profile.email,
            })
            .await?;
        info!(buyer = %buyer, deck = %deck_id, session = %session.id, "deck checkout session created");
        Ok(session)
    }

    // ===== Synchronous settlement =====

    /// Buy a deck with stored balance: atomically debit the buyer and
    /// record the sale, then transfer the seller share. If the
    /// transfer fails the purchase is reversed in full.
    pub async fn purchase_with_balance(
        &self,
        buyer: &UserId,
        deck_id: &DeckId,
    ) -> Result<PurchaseSettled> {
        let deck = self
            .store
            .deck(deck_id)?
            .ok_or_else(|| MarketError::DeckNotFound(deck_id.to_string()))?;
        let seller = self.require_profile(&deck.creator_id)?;
        let destination = self.require_active_account(&seller)?;

        let seller_share = self.seller_share(deck.price)?;
        let request = PurchaseRequest {
            buyer_id: buyer.clone(),
            deck_id: deck_id.clone(),
            amount: deck.price,
            seller_share,
            funding: PurchaseFunding::StoredBalance,
        };

        let receipt = self.store.record_purchase(&request)?;

        let amount_cents = dollars_to_cents(seller_share)?;
        let transfer_group = format!("deck_{deck_id}");
        let transfer = match self
            .gateway
            .create_transfer(&destination, amount_cents, &transfer_group)
            .await
        {
            Ok(transfer) => transfer,
            Err(e) => {
                warn!(buyer = %buyer, deck = %deck_id, error = %e, "transfer failed, reversing purchase");
                if let Err(reversal) = self.store.reverse_purchase(&request) {
                    error!(
                        buyer = %buyer,
                        deck = %deck_id,
                        error = %reversal,
                        "purchase reversal failed; manual reconciliation required"
                    );
                }
                return Err(e);
            }
        };

        info!(
            buyer = %buyer,
            deck = %deck_id,
            transfer = %transfer,
            seller_share = %seller_share,
            "purchase settled from stored balance"
        );
        Ok(PurchaseSettled { receipt, transfer })
    }

    // ===== Payouts =====

    /// Withdraw stored balance to the user's bank via their connected
    /// account. The wallet is debited before the provider call; a
    /// failed payout credits the amount straight back.
    pub async fn withdraw(&self, user: &UserId, amount: Decimal) -> Result<PayoutSettled> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!(
                "payout amount must be positive, got {amount}"
            )));
        }
        let profile = self.require_profile(user)?;
        let account = self.require_active_account(&profile)?;
        let amount_cents = dollars_to_cents(amount)?;

        let new_balance = self.store.try_debit_balance(user, amount)?;

        let payout = match self.gateway.create_payout(&account, amount_cents).await {
            Ok(payout) => payout,
            Err(e) => {
                warn!(user = %user, amount = %amount, error = %e, "payout failed, refunding balance");
                if let Err(refund) = self.store.credit_balance(user, amount) {
                    error!(
                        user = %user,
                        amount = %amount,
                        error = %refund,
                        "payout refund failed; manual reconciliation required"
                    );
                }
                return Err(e);
            }
        };

        info!(user = %user, payout = %payout, new_balance = %new_balance, "payout settled");
        Ok(PayoutSettled {
            payout,
            new_balance,
        })
    }

    // ===== Helpers =====

    fn require_profile(&self, user: &UserId) -> Result<Profile> {
        Ok(self
            .store
            .profile(user)?
            .ok_or_else(|| MarketError::ProfileNotFound(user.to_string()))?)
    }

    /// The user's connected account, which must have finished
    /// onboarding. Transfers and payouts both require this.
    fn require_active_account(&self, profile: &Profile) -> Result<AccountId> {
        let account = profile
            .connect_account_id
            .clone()
            .ok_or_else(|| PaymentError::AccountMissing(profile.id.to_string()))?;
        if !profile.connect_status.is_active() {
            return Err(PaymentError::AccountNotActive(profile.id.to_string()));
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{GatewayCall, MockGateway};
    use market_core::{ConnectStatus, Deck, Difficulty, MemoryStore};
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn settlement_with(
        gateway: MockGateway,
    ) -> (Arc<MemoryStore>, Arc<MockGateway>, Settlement<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(gateway);
        let settlement = Settlement::new(
            store.clone(),
            gateway.clone(),
            SettlementConfig {
                mode: SettlementMode::Balance,
                platform_fee_percent: 10,
                client_base_url: "http://client.test".to_string(),
            },
        );
        (store, gateway, settlement)
    }

    fn profile_with_email(id: &str) -> Profile {
        let mut p = Profile::new(UserId::from_string(id), id);
        p.email = Some(format!("{id}@test"));
        p
    }

    /// Buyer with $15, seller with an active account, one $10 deck
    fn seed_market(store: &MemoryStore) -> (UserId, UserId, DeckId) {
        let buyer = UserId::from_string("buyer");
        let seller = UserId::from_string("seller");
        store.upsert_profile(profile_with_email("buyer")).unwrap();
        store.upsert_profile(profile_with_email("seller")).unwrap();
        store.credit_balance(&buyer, dec!(15)).unwrap();

        let account = AccountId::from_string("acct_seller");
        store.bind_connect_account(&seller, account.clone()).unwrap();
        store
            .set_connect_status(&account, ConnectStatus::Active)
            .unwrap();

        let deck = Deck::new(
            seller.clone(),
            "Spanish Verbs",
            "Common irregular verbs",
            dec!(10.00),
            Difficulty::Beginner,
            BTreeSet::new(),
            "ser\nestar",
            2,
        );
        let deck_id = deck.id.clone();
        store.insert_deck(deck).unwrap();
        (buyer, seller, deck_id)
    }

    #[test]
    fn seller_share_truncates_in_cents() {
        assert_eq!(split_seller_share(dec!(10.00), 10).unwrap(), dec!(9.00));
        assert_eq!(split_seller_share(dec!(9.99), 10).unwrap(), dec!(8.99));
        // 3 cents * 90 / 100 = 2.7 -> 2 cents
        assert_eq!(split_seller_share(dec!(0.03), 10).unwrap(), dec!(0.02));
        assert_eq!(split_seller_share(dec!(5.00), 0).unwrap(), dec!(5.00));
        assert!(split_seller_share(dec!(5.00), 101).is_err());
    }

    #[tokio::test]
    async fn balance_purchase_transfers_seller_share() {
        let (store, gateway, settlement) = settlement_with(MockGateway::new());
        let (buyer, seller, deck_id) = seed_market(&store);

        let settled = settlement.purchase_with_balance(&buyer, &deck_id).await.unwrap();
        assert_eq!(settled.receipt.buyer_balance, dec!(5));
        assert_eq!(settled.receipt.seller_share, dec!(9.00));
        assert_eq!(settled.transfer.as_str(), "tr_mock_1");

        assert_eq!(gateway.transferred_cents(), 900);
        let calls = gateway.calls();
        assert!(matches!(
            &calls[0],
            GatewayCall::TransferCreated { amount_cents: 900, .. }
        ));

        let seller_profile = store.profile(&seller).unwrap().unwrap();
        assert_eq!(seller_profile.total_earnings, dec!(9.00));
        assert_eq!(seller_profile.total_sales, 1);
    }

    #[tokio::test]
    async fn purchase_requires_active_seller_account() {
        let (store, gateway, settlement) = settlement_with(MockGateway::new());
        let (buyer, seller, deck_id) = seed_market(&store);
        store
            .set_connect_status(
                &AccountId::from_string("acct_seller"),
                ConnectStatus::Pending,
            )
            .unwrap();

        let err = settlement
            .purchase_with_balance(&buyer, &deck_id)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::AccountNotActive(_)));

        // Nothing moved anywhere
        assert!(gateway.calls().is_empty());
        assert_eq!(store.profile(&buyer).unwrap().unwrap().balance, dec!(15));
        assert_eq!(store.profile(&seller).unwrap().unwrap().total_sales, 0);
    }

    #[tokio::test]
    async fn failed_transfer_reverses_the_purchase() {
        let (store, gateway, settlement) =
            settlement_with(MockGateway::new().with_failing_transfers());
        let (buyer, seller, deck_id) = seed_market(&store);

        let err = settlement
            .purchase_with_balance(&buyer, &deck_id)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Provider(_)));
        assert_eq!(gateway.transferred_cents(), 0);

        let buyer_profile = store.profile(&buyer).unwrap().unwrap();
        assert_eq!(buyer_profile.balance, dec!(15));
        assert!(!buyer_profile.owns_deck(&deck_id));
        let seller_profile = store.profile(&seller).unwrap().unwrap();
        assert_eq!(seller_profile.total_earnings, dec!(0));
        assert_eq!(seller_profile.total_sales, 0);
    }

    #[tokio::test]
    async fn withdraw_debits_then_pays_out() {
        let (store, gateway, settlement) = settlement_with(MockGateway::new());
        let (_, seller, _) = seed_market(&store);
        store.credit_balance(&seller, dec!(50)).unwrap();

        let settled = settlement.withdraw(&seller, dec!(20)).await.unwrap();
        assert_eq!(settled.new_balance, dec!(30));
        assert_eq!(settled.payout.as_str(), "po_mock_1");
        assert!(matches!(
            &gateway.calls()[0],
            GatewayCall::PayoutCreated { amount_cents: 2000, .. }
        ));
    }

    #[tokio::test]
    async fn withdraw_rejects_overdraw_before_the_provider() {
        let (store, gateway, settlement) = settlement_with(MockGateway::new());
        let (_, seller, _) = seed_market(&store);
        store.credit_balance(&seller, dec!(10)).unwrap();

        let err = settlement.withdraw(&seller, dec!(25)).await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::Market(MarketError::InsufficientFunds { .. })
        ));
        assert!(gateway.calls().is_empty());
        assert_eq!(store.profile(&seller).unwrap().unwrap().balance, dec!(10));
    }

    #[tokio::test]
    async fn failed_payout_refunds_the_wallet() {
        let (store, _, settlement) = settlement_with(MockGateway::new().with_failing_payouts());
        let (_, seller, _) = seed_market(&store);
        store.credit_balance(&seller, dec!(50)).unwrap();

        let err = settlement.withdraw(&seller, dec!(20)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Provider(_)));
        assert_eq!(store.profile(&seller).unwrap().unwrap().balance, dec!(50));
    }

    #[tokio::test]
    async fn recharge_session_carries_attribution_metadata() {
        let (store, gateway, settlement) = settlement_with(MockGateway::new());
        let (buyer, _, _) = seed_market(&store);

        let session = settlement.recharge_session(&buyer, dec!(25)).await.unwrap();
        assert!(session.url.contains("checkout.mock"));

        let calls = gateway.calls();
        let GatewayCall::SessionCreated { params } = &calls[0] else {
            panic!("expected a session");
        };
        assert_eq!(params.amount_cents, 2500);
        assert_eq!(params.metadata.get("userId").unwrap(), "buyer");
        assert_eq!(params.metadata.get("isRecharge").unwrap(), "true");
        assert!(params.success_url.starts_with("http://client.test"));
    }

    #[tokio::test]
    async fn deck_session_prices_from_the_stored_deck() {
        let (store, gateway, settlement) = settlement_with(MockGateway::new());
        let (buyer, _, deck_id) = seed_market(&store);

        settlement.deck_checkout_session(&buyer, &deck_id).await.unwrap();

        let calls = gateway.calls();
        let GatewayCall::SessionCreated { params } = &calls[0] else {
            panic!("expected a session");
        };
        assert_eq!(params.amount_cents, 1000);
        assert_eq!(params.metadata.get("deckId").unwrap(), deck_id.as_str());
    }

    #[tokio::test]
    async fn provisioning_reuses_a_bound_account() {
        let (store, gateway, settlement) = settlement_with(MockGateway::new());
        let (_, seller, _) = seed_market(&store);

        let account = settlement.provision_account(&seller).await.unwrap();
        assert_eq!(account.as_str(), "acct_seller");
        // No provider call happened
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn provisioning_requires_an_email() {
        let (store, _, settlement) = settlement_with(MockGateway::new());
        let user = UserId::from_string("no_email");
        store
            .upsert_profile(Profile::new(user.clone(), "no_email"))
            .unwrap();

        let err = settlement.provision_account(&user).await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::Market(MarketError::MissingInput(_))
        ));
    }

    #[tokio::test]
    async fn pending_accounts_validate_the_email() {
        let (_, gateway, settlement) = settlement_with(MockGateway::new());

        let account = settlement
            .provision_pending_account("new@seller.test")
            .await
            .unwrap();
        assert_eq!(account.as_str(), "acct_mock_1");
        assert_eq!(gateway.calls().len(), 1);

        assert!(settlement.provision_pending_account("not-an-email").await.is_err());
    }
}
