//! Provider webhook ingestion.
//!
//! Three stages, strictly ordered:
//!
//! 1. **Verify**: HMAC-SHA256 over `"{t}.{raw body}"` against the
//!    `t=...,v1=...` signature header, with a replay-window tolerance
//!    on `t`. Failure stops everything; no state is touched.
//! 2. **Classify**: map the provider event into a domain event.
//! 3. **Apply**: record the event ID in the ledger, then run the side
//!    effect. A replayed ID short-circuits before any effect, so a
//!    credit or purchase can never be applied twice.

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use market_core::{
    AccountId, ConnectStatus, DeckId, MarketError, MarketStore, PurchaseFunding, PurchaseRequest,
    UserId,
};

use crate::error::{PaymentError, Result};
use crate::gateway::cents_to_dollars;
use crate::settlement::split_seller_share;

type HmacSha256 = Hmac<Sha256>;

/// Signatures older or newer than this many seconds are rejected.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verifies provider signatures on raw webhook bodies.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: SIGNATURE_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Check `signature_header` against the raw request body.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        self.verify_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    fn verify_at(&self, payload: &[u8], signature_header: &str, now: i64) -> Result<()> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in signature_header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| PaymentError::WebhookSignature("missing timestamp".into()))?;
        if candidates.is_empty() {
            return Err(PaymentError::WebhookSignature("missing v1 signature".into()));
        }
        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(PaymentError::WebhookSignature(
                "timestamp outside tolerance".into(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| PaymentError::WebhookSignature(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        // verify_slice is constant-time; a header may carry several v1
        // entries during secret rotation, any one of which may match
        for candidate in candidates {
            let Ok(bytes) = hex::decode(candidate) else {
                continue;
            };
            if mac.clone().verify_slice(&bytes).is_ok() {
                return Ok(());
            }
        }
        Err(PaymentError::WebhookSignature(
            "no matching v1 signature".into(),
        ))
    }
}

/// Raw provider event envelope
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderEvent {
    /// Provider event ID (`evt_...`), the idempotency key
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// What a completed checkout session was for, read from its metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionPurpose {
    /// Wallet top-up for `user_id`
    Recharge { user_id: UserId },
    /// Deck sale paid at the provider
    DeckSale { buyer_id: UserId, deck_id: DeckId },
    /// Metadata carried no recognizable attribution
    Unknown,
}

/// Provider event mapped into the marketplace domain
#[derive(Clone, Debug)]
pub enum WebhookEvent {
    /// Connected-account onboarding state changed
    AccountUpdated {
        account: AccountId,
        charges_enabled: bool,
    },
    /// A hosted checkout session was paid
    CheckoutCompleted {
        session_id: String,
        /// Amount actually charged, from the session's `amount_total`
        amount: Decimal,
        purpose: SessionPurpose,
    },
    /// Unhandled event type
    Other { event_type: String },
}

#[derive(Deserialize)]
struct AccountPayload {
    id: String,
    #[serde(default)]
    charges_enabled: bool,
}

#[derive(Deserialize)]
struct SessionPayload {
    id: String,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Map a raw provider event into a [`WebhookEvent`]. Unknown types are
/// not errors; malformed payloads of known types are.
pub fn parse_event(event: &ProviderEvent) -> Result<WebhookEvent> {
    match event.event_type.as_str() {
        "account.updated" => {
            let account: AccountPayload = serde_json::from_value(event.data.object.clone())
                .map_err(|e| {
                    PaymentError::WebhookParse(format!("bad account.updated payload: {e}"))
                })?;
            Ok(WebhookEvent::AccountUpdated {
                account: AccountId::from_string(account.id),
                charges_enabled: account.charges_enabled,
            })
        }
        "checkout.session.completed" => {
            let session: SessionPayload = serde_json::from_value(event.data.object.clone())
                .map_err(|e| {
                    PaymentError::WebhookParse(format!("bad checkout session payload: {e}"))
                })?;
            let purpose = if session
                .metadata
                .get("isRecharge")
                .is_some_and(|v| v == "true")
            {
                match session.metadata.get("userId") {
                    Some(user) => SessionPurpose::Recharge {
                        user_id: UserId::from_string(user.clone()),
                    },
                    None => SessionPurpose::Unknown,
                }
            } else {
                match (
                    session.metadata.get("buyerId"),
                    session.metadata.get("deckId"),
                ) {
                    (Some(buyer), Some(deck)) => SessionPurpose::DeckSale {
                        buyer_id: UserId::from_string(buyer.clone()),
                        deck_id: DeckId::from_string(deck.clone()),
                    },
                    _ => SessionPurpose::Unknown,
                }
            };
            Ok(WebhookEvent::CheckoutCompleted {
                session_id: session.id,
                amount: cents_to_dollars(session.amount_total.unwrap_or(0)),
                purpose,
            })
        }
        other => Ok(WebhookEvent::Other {
            event_type: other.to_string(),
        }),
    }
}

/// What processing an event did
#[derive(Clone, Debug, PartialEq)]
pub enum WebhookOutcome {
    AccountStatusChanged {
        account: AccountId,
        status: ConnectStatus,
    },
    BalanceCredited {
        user_id: UserId,
        amount: Decimal,
    },
    PurchaseRecorded {
        buyer_id: UserId,
        deck_id: DeckId,
        seller_share: Decimal,
    },
    /// Event ID was already in the ledger; nothing ran
    AlreadyProcessed,
    /// Verified and parsed, but nothing to do
    Ignored { reason: String },
}

/// Applies verified provider events to the store, at most once each.
pub struct WebhookProcessor<S> {
    store: Arc<S>,
    verifier: WebhookVerifier,
    fee_percent: u32,
}

impl<S: MarketStore> WebhookProcessor<S> {
    pub fn new(store: Arc<S>, verifier: WebhookVerifier, fee_percent: u32) -> Self {
        Self {
            store,
            verifier,
            fee_percent,
        }
    }

    /// Verify the signature, then parse the body. Any failure here
    /// means the request never touches the store.
    pub fn verify_and_parse(&self, payload: &[u8], signature_header: &str) -> Result<ProviderEvent> {
        self.verifier.verify(payload, signature_header)?;
        serde_json::from_slice(payload)
            .map_err(|e| PaymentError::WebhookParse(format!("bad event envelope: {e}")))
    }

    /// Run a verified event's side effect.
    pub fn process(&self, event: ProviderEvent) -> Result<WebhookOutcome> {
        info!(event_id = %event.id, event_type = %event.event_type, "processing provider webhook");
        let parsed = parse_event(&event)?;

        if let WebhookEvent::Other { event_type } = &parsed {
            debug!(event_type, "unhandled webhook event");
            return Ok(WebhookOutcome::Ignored {
                reason: format!("unhandled event type {event_type}"),
            });
        }

        // Ledger first: a replayed ID must never re-run side effects,
        // whatever else happens on this call.
        if !self.store.record_event(&event.id)? {
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        match parsed {
            WebhookEvent::AccountUpdated {
                account,
                charges_enabled,
            } => {
                let status = if charges_enabled {
                    ConnectStatus::Active
                } else {
                    ConnectStatus::Pending
                };
                match self.store.set_connect_status(&account, status)? {
                    Some(user) => {
                        info!(user = %user, account = %account, status = %status, "connect status mirrored");
                        Ok(WebhookOutcome::AccountStatusChanged { account, status })
                    }
                    None => {
                        warn!(account = %account, "account.updated for unbound account");
                        Ok(WebhookOutcome::Ignored {
                            reason: "account not bound to any profile".into(),
                        })
                    }
                }
            }

            WebhookEvent::CheckoutCompleted {
                session_id,
                amount,
                purpose,
            } => {
                if purpose != SessionPurpose::Unknown && amount <= Decimal::ZERO {
                    return Err(PaymentError::WebhookParse(format!(
                        "session {session_id} completed with no amount"
                    )));
                }
                match purpose {
                    SessionPurpose::Recharge { user_id } => {
                        let new_balance = self.store.credit_balance(&user_id, amount)?;
                        info!(
                            user = %user_id,
                            amount = %amount,
                            new_balance = %new_balance,
                            session = %session_id,
                            "wallet recharged"
                        );
                        Ok(WebhookOutcome::BalanceCredited { user_id, amount })
                    }
                    SessionPurpose::DeckSale { buyer_id, deck_id } => {
                        let seller_share = split_seller_share(amount, self.fee_percent)?;
                        let request = PurchaseRequest {
                            buyer_id: buyer_id.clone(),
                            deck_id: deck_id.clone(),
                            amount,
                            seller_share,
                            funding: PurchaseFunding::ProviderCheckout,
                        };
                        match self.store.record_purchase(&request) {
                            Ok(receipt) => {
                                info!(
                                    buyer = %buyer_id,
                                    deck = %deck_id,
                                    seller = %receipt.seller_id,
                                    seller_share = %seller_share,
                                    session = %session_id,
                                    "checkout purchase recorded"
                                );
                                Ok(WebhookOutcome::PurchaseRecorded {
                                    buyer_id,
                                    deck_id,
                                    seller_share,
                                })
                            }
                            Err(MarketError::AlreadyPurchased(_)) => {
                                warn!(buyer = %buyer_id, deck = %deck_id, "duplicate deck purchase via webhook");
                                Ok(WebhookOutcome::Ignored {
                                    reason: "deck already purchased".into(),
                                })
                            }
                            Err(e) => Err(e.into()),
                        }
                    }
                    SessionPurpose::Unknown => {
                        warn!(session = %session_id, "completed session without attribution metadata");
                        Ok(WebhookOutcome::Ignored {
                            reason: "session missing attribution metadata".into(),
                        })
                    }
                }
            }

            WebhookEvent::Other { .. } => unreachable!("handled above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::{Deck, Difficulty, MemoryStore, Profile};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::BTreeSet;

    const SECRET: &str = "whsec_test_secret";

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={signature}")
    }

    fn event(value: Value) -> ProviderEvent {
        serde_json::from_value(value).unwrap()
    }

    fn processor() -> (Arc<MemoryStore>, WebhookProcessor<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let processor = WebhookProcessor::new(store.clone(), WebhookVerifier::new(SECRET), 10);
        (store, processor)
    }

    fn seed_profile(store: &MemoryStore, id: &str) -> UserId {
        let user = UserId::from_string(id);
        store.upsert_profile(Profile::new(user.clone(), id)).unwrap();
        user
    }

    fn seed_deck(store: &MemoryStore, seller: &UserId, price: Decimal) -> DeckId {
        let deck = Deck::new(
            seller.clone(),
            "Deck",
            "",
            price,
            Difficulty::Beginner,
            BTreeSet::new(),
            "card",
            1,
        );
        let id = deck.id.clone();
        store.insert_deck(deck).unwrap();
        id
    }

    // ===== Signature verification =====

    #[test]
    fn valid_signature_passes() {
        let verifier = WebhookVerifier::new(SECRET);
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(SECRET, now, payload);
        verifier
            .verify_at(payload.as_bytes(), &header, now)
            .unwrap();
    }

    #[test]
    fn wrong_secret_fails() {
        let verifier = WebhookVerifier::new(SECRET);
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign("whsec_other", now, payload);
        let err = verifier
            .verify_at(payload.as_bytes(), &header, now)
            .unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignature(_)));
    }

    #[test]
    fn tampered_body_fails() {
        let verifier = WebhookVerifier::new(SECRET);
        let now = 1_700_000_000;
        let header = sign(SECRET, now, r#"{"id":"evt_1"}"#);
        assert!(verifier
            .verify_at(br#"{"id":"evt_2"}"#, &header, now)
            .is_err());
    }

    #[test]
    fn stale_timestamp_fails() {
        let verifier = WebhookVerifier::new(SECRET);
        let payload = "{}";
        let signed_at = 1_700_000_000;
        let header = sign(SECRET, signed_at, payload);
        let err = verifier
            .verify_at(payload.as_bytes(), &header, signed_at + 301)
            .unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignature(_)));

        // Just inside the window still passes
        verifier
            .verify_at(payload.as_bytes(), &header, signed_at + 300)
            .unwrap();
    }

    #[test]
    fn malformed_headers_fail() {
        let verifier = WebhookVerifier::new(SECRET);
        for header in ["", "v1=abcd", "t=notanumber,v1=abcd", "t=123"] {
            assert!(verifier.verify_at(b"{}", header, 123).is_err(), "{header}");
        }
    }

    #[test]
    fn verify_and_parse_returns_the_envelope() {
        let (_, processor) = processor();
        let payload = r#"{"id":"evt_9","type":"payment_intent.created","data":{"object":{}}}"#;
        let header = sign(SECRET, chrono::Utc::now().timestamp(), payload);

        let event = processor
            .verify_and_parse(payload.as_bytes(), &header)
            .unwrap();
        assert_eq!(event.id, "evt_9");

        let bad = sign("whsec_other", chrono::Utc::now().timestamp(), payload);
        assert!(processor.verify_and_parse(payload.as_bytes(), &bad).is_err());
    }

    // ===== Event application =====

    #[test]
    fn recharge_credits_the_wallet_once() {
        let (store, processor) = processor();
        let user = seed_profile(&store, "buyer");

        let evt = json!({
            "id": "evt_recharge_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_1",
                "amount_total": 2500,
                "metadata": { "userId": "buyer", "isRecharge": "true" }
            }}
        });

        let outcome = processor.process(event(evt.clone())).unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::BalanceCredited {
                user_id: user.clone(),
                amount: dec!(25.00)
            }
        );
        assert_eq!(store.profile(&user).unwrap().unwrap().balance, dec!(25.00));

        // Replay: same event ID, no second credit
        let outcome = processor.process(event(evt)).unwrap();
        assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);
        assert_eq!(store.profile(&user).unwrap().unwrap().balance, dec!(25.00));
    }

    #[test]
    fn deck_sale_settles_to_the_seller_wallet() {
        let (store, processor) = processor();
        let buyer = seed_profile(&store, "buyer");
        let seller = seed_profile(&store, "seller");
        let deck_id = seed_deck(&store, &seller, dec!(10.00));

        let evt = json!({
            "id": "evt_sale_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_2",
                "amount_total": 1000,
                "metadata": { "buyerId": "buyer", "deckId": deck_id.as_str() }
            }}
        });

        let outcome = processor.process(event(evt)).unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::PurchaseRecorded {
                buyer_id: buyer.clone(),
                deck_id: deck_id.clone(),
                seller_share: dec!(9.00)
            }
        );

        assert!(store.profile(&buyer).unwrap().unwrap().owns_deck(&deck_id));
        let seller_profile = store.profile(&seller).unwrap().unwrap();
        assert_eq!(seller_profile.balance, dec!(9.00));
        assert_eq!(seller_profile.total_sales, 1);

        // A distinct event for the same buyer and deck changes nothing
        let evt2 = json!({
            "id": "evt_sale_2",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_3",
                "amount_total": 1000,
                "metadata": { "buyerId": "buyer", "deckId": deck_id.as_str() }
            }}
        });
        let outcome = processor.process(event(evt2)).unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        assert_eq!(store.profile(&seller).unwrap().unwrap().balance, dec!(9.00));
        assert_eq!(
            store.deck(&deck_id).unwrap().unwrap().purchase_history.len(),
            1
        );
    }

    #[test]
    fn account_updated_mirrors_both_directions() {
        let (store, processor) = processor();
        let seller = seed_profile(&store, "seller");
        let account = AccountId::from_string("acct_1");
        store.bind_connect_account(&seller, account.clone()).unwrap();

        let enable = json!({
            "id": "evt_acct_1",
            "type": "account.updated",
            "data": { "object": { "id": "acct_1", "charges_enabled": true } }
        });
        let outcome = processor.process(event(enable)).unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::AccountStatusChanged {
                account: account.clone(),
                status: ConnectStatus::Active
            }
        );
        assert!(store.profile(&seller).unwrap().unwrap().can_receive_transfers());

        // Provider can suspend the account later
        let disable = json!({
            "id": "evt_acct_2",
            "type": "account.updated",
            "data": { "object": { "id": "acct_1", "charges_enabled": false } }
        });
        processor.process(event(disable)).unwrap();
        assert_eq!(
            store.profile(&seller).unwrap().unwrap().connect_status,
            ConnectStatus::Pending
        );
    }

    #[test]
    fn unbound_accounts_and_unknown_types_are_ignored() {
        let (_, processor) = processor();

        let unbound = json!({
            "id": "evt_x",
            "type": "account.updated",
            "data": { "object": { "id": "acct_nobody", "charges_enabled": true } }
        });
        assert!(matches!(
            processor.process(event(unbound)).unwrap(),
            WebhookOutcome::Ignored { .. }
        ));

        let unknown = json!({
            "id": "evt_y",
            "type": "payment_intent.created",
            "data": { "object": {} }
        });
        assert!(matches!(
            processor.process(event(unknown)).unwrap(),
            WebhookOutcome::Ignored { .. }
        ));
    }

    #[test]
    fn session_without_metadata_is_ignored_not_fatal() {
        let (_, processor) = processor();
        let evt = json!({
            "id": "evt_z",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_9", "amount_total": 500, "metadata": {} } }
        });
        assert!(matches!(
            processor.process(event(evt)).unwrap(),
            WebhookOutcome::Ignored { .. }
        ));
    }

    #[test]
    fn zero_amount_session_is_a_parse_error() {
        let (store, processor) = processor();
        seed_profile(&store, "buyer");
        let evt = json!({
            "id": "evt_zero",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_0",
                "metadata": { "userId": "buyer", "isRecharge": "true" }
            }}
        });
        assert!(matches!(
            processor.process(event(evt)).unwrap_err(),
            PaymentError::WebhookParse(_)
        ));
    }
}
