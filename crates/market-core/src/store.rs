//! Storage trait and the in-memory reference implementation.
//!
//! Purchases, payouts, and webhook credits all race against each other
//! in a live marketplace, so every compound mutation here is a single
//! trait method applied under one write lock: callers never read a
//! balance, decide, and write it back across two calls.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::deck::{Deck, PurchaseRecord};
use crate::error::{MarketError, Result};
use crate::ids::{AccountId, DeckId, ReviewId, UserId};
use crate::profile::{ConnectStatus, Profile};
use crate::review::{PlagiarismDispute, Review};

/// How a purchase was funded, which decides which balances move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurchaseFunding {
    /// Paid from the buyer's stored balance; the store debits it and
    /// the seller is paid by a provider transfer outside the store.
    StoredBalance,
    /// Paid at the provider's hosted checkout; no local debit, and the
    /// seller share is credited to the seller's stored balance.
    ProviderCheckout,
}

/// Everything the store needs to settle one purchase atomically.
#[derive(Clone, Debug)]
pub struct PurchaseRequest {
    pub buyer_id: UserId,
    pub deck_id: DeckId,
    /// Full deck price in dollars
    pub amount: Decimal,
    /// Portion owed to the seller after the platform fee
    pub seller_share: Decimal,
    pub funding: PurchaseFunding,
}

/// Snapshot of a purchase the instant it settled.
#[derive(Clone, Debug, Serialize)]
pub struct PurchaseReceipt {
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub deck_id: DeckId,
    pub amount: Decimal,
    pub seller_share: Decimal,
    /// Buyer's stored balance after the purchase
    pub buyer_balance: Decimal,
    pub purchased_at: DateTime<Utc>,
}

/// Persistence boundary for the marketplace.
///
/// Implementations must make each method atomic with respect to the
/// others; the conditional methods (`try_debit_balance`,
/// `record_purchase`, `record_event`) check and mutate in one step.
pub trait MarketStore: Send + Sync {
    // ===== Profiles =====

    /// Insert a profile, or refresh the identity fields of an existing
    /// one. Sign-up events can replay, so balance, library, and
    /// connect state are never overwritten.
    fn upsert_profile(&self, profile: Profile) -> Result<Profile>;

    fn profile(&self, id: &UserId) -> Result<Option<Profile>>;

    /// Look up the profile bound to a provider connected account
    fn profile_by_account(&self, account: &AccountId) -> Result<Option<Profile>>;

    /// Attach a freshly provisioned connected account to a profile and
    /// mark it pending until the provider enables charges.
    fn bind_connect_account(&self, user: &UserId, account: AccountId) -> Result<()>;

    /// Update the mirrored onboarding status for whichever profile owns
    /// `account`. Returns the affected user, or `None` if no profile
    /// has claimed that account.
    fn set_connect_status(&self, account: &AccountId, status: ConnectStatus)
    -> Result<Option<UserId>>;

    /// Add funds to a wallet. Returns the new balance.
    fn credit_balance(&self, user: &UserId, amount: Decimal) -> Result<Decimal>;

    /// Withdraw funds if and only if the full amount is covered.
    /// Returns the new balance.
    fn try_debit_balance(&self, user: &UserId, amount: Decimal) -> Result<Decimal>;

    /// Flip whether `user` has liked `deck`. Returns the new state.
    fn toggle_liked(&self, user: &UserId, deck: &DeckId) -> Result<bool>;

    /// Flip whether `user` follows `creator`. Returns the new state.
    fn toggle_followed(&self, user: &UserId, creator: &UserId) -> Result<bool>;

    // ===== Decks =====

    fn insert_deck(&self, deck: Deck) -> Result<()>;

    fn deck(&self, id: &DeckId) -> Result<Option<Deck>>;

    /// All decks, in no particular order
    fn decks(&self) -> Result<Vec<Deck>>;

    /// Remove a deck. Returns whether it existed. Purchased copies
    /// stay in buyers' libraries.
    fn delete_deck(&self, id: &DeckId) -> Result<bool>;

    // ===== Purchases =====

    /// Settle a purchase: ownership, purchase history, seller stats,
    /// and (depending on funding) balances, all or nothing.
    fn record_purchase(&self, request: &PurchaseRequest) -> Result<PurchaseReceipt>;

    /// Undo a purchase previously applied with the same request. Used
    /// to compensate when the provider leg fails after the store leg
    /// succeeded.
    fn reverse_purchase(&self, request: &PurchaseRequest) -> Result<()>;

    // ===== Reviews & disputes =====

    /// Add a review. The reviewer must own the deck and must not have
    /// reviewed it before.
    fn add_review(&self, review: Review) -> Result<()>;

    fn reviews_for_deck(&self, deck: &DeckId) -> Result<Vec<Review>>;

    /// Delete a review; only its author may do so.
    fn delete_review(&self, id: &ReviewId, requester: &UserId) -> Result<()>;

    fn file_dispute(&self, dispute: PlagiarismDispute) -> Result<()>;

    // ===== Webhook event ledger =====

    /// Record a provider event ID. Returns `true` the first time an ID
    /// is seen and `false` on replays, so webhook side effects run at
    /// most once.
    fn record_event(&self, event_id: &str) -> Result<bool>;
}

#[derive(Default)]
struct StoreInner {
    profiles: HashMap<UserId, Profile>,
    decks: HashMap<DeckId, Deck>,
    reviews: HashMap<ReviewId, Review>,
    disputes: Vec<PlagiarismDispute>,
    /// Secondary index: provider account -> owning profile
    by_account: HashMap<AccountId, UserId>,
    processed_events: HashSet<String>,
}

/// In-memory store. All state lives behind one `RwLock`, which is what
/// makes the compound operations atomic.
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketStore for MemoryStore {
    fn upsert_profile(&self, profile: Profile) -> Result<Profile> {
        let mut inner = self.inner.write().unwrap();
        if let Some(existing) = inner.profiles.get_mut(&profile.id) {
            existing.username = profile.username;
            existing.email = profile.email;
            existing.avatar_url = profile.avatar_url;
            return Ok(existing.clone());
        }
        if let Some(account) = &profile.connect_account_id {
            inner.by_account.insert(account.clone(), profile.id.clone());
        }
        inner.profiles.insert(profile.id.clone(), profile.clone());
        debug!(user = %profile.id, "profile created");
        Ok(profile)
    }

    fn profile(&self, id: &UserId) -> Result<Option<Profile>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.profiles.get(id).cloned())
    }

    fn profile_by_account(&self, account: &AccountId) -> Result<Option<Profile>> {
        let inner = self.inner.read().unwrap();
        let Some(user) = inner.by_account.get(account) else {
            return Ok(None);
        };
        Ok(inner.profiles.get(user).cloned())
    }

    fn bind_connect_account(&self, user: &UserId, account: AccountId) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let profile = inner
            .profiles
            .get_mut(user)
            .ok_or_else(|| MarketError::ProfileNotFound(user.to_string()))?;
        profile.connect_account_id = Some(account.clone());
        profile.connect_status = ConnectStatus::Pending;
        inner.by_account.insert(account, user.clone());
        Ok(())
    }

    fn set_connect_status(
        &self,
        account: &AccountId,
        status: ConnectStatus,
    ) -> Result<Option<UserId>> {
        let mut inner = self.inner.write().unwrap();
        let Some(user) = inner.by_account.get(account).cloned() else {
            return Ok(None);
        };
        if let Some(profile) = inner.profiles.get_mut(&user) {
            profile.connect_status = status;
            debug!(user = %user, status = %status, "connect status updated");
        }
        Ok(Some(user))
    }

    fn credit_balance(&self, user: &UserId, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::Validation(format!(
                "credit amount must be positive, got {amount}"
            )));
        }
        let mut inner = self.inner.write().unwrap();
        let profile = inner
            .profiles
            .get_mut(user)
            .ok_or_else(|| MarketError::ProfileNotFound(user.to_string()))?;
        profile.balance += amount;
        Ok(profile.balance)
    }

    fn try_debit_balance(&self, user: &UserId, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::Validation(format!(
                "debit amount must be positive, got {amount}"
            )));
        }
        let mut inner = self.inner.write().unwrap();
        let profile = inner
            .profiles
            .get_mut(user)
            .ok_or_else(|| MarketError::ProfileNotFound(user.to_string()))?;
        if profile.balance < amount {
            return Err(MarketError::InsufficientFunds {
                needed: amount,
                available: profile.balance,
            });
        }
        profile.balance -= amount;
        Ok(profile.balance)
    }

    fn toggle_liked(&self, user: &UserId, deck: &DeckId) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        if !inner.decks.contains_key(deck) {
            return Err(MarketError::DeckNotFound(deck.to_string()));
        }
        let profile = inner
            .profiles
            .get_mut(user)
            .ok_or_else(|| MarketError::ProfileNotFound(user.to_string()))?;
        let liked = if profile.liked_deck_ids.contains(deck) {
            profile.liked_deck_ids.remove(deck);
            false
        } else {
            profile.liked_deck_ids.insert(deck.clone());
            true
        };
        Ok(liked)
    }

    fn toggle_followed(&self, user: &UserId, creator: &UserId) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        if !inner.profiles.contains_key(creator) {
            return Err(MarketError::ProfileNotFound(creator.to_string()));
        }
        let profile = inner
            .profiles
            .get_mut(user)
            .ok_or_else(|| MarketError::ProfileNotFound(user.to_string()))?;
        let following = if profile.followed_creators.contains(creator) {
            profile.followed_creators.remove(creator);
            false
        } else {
            profile.followed_creators.insert(creator.clone());
            true
        };
        Ok(following)
    }

    fn insert_deck(&self, deck: Deck) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        debug!(deck = %deck.id, title = %deck.title, "deck published");
        inner.decks.insert(deck.id.clone(), deck);
        Ok(())
    }

    fn deck(&self, id: &DeckId) -> Result<Option<Deck>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.decks.get(id).cloned())
    }

    fn decks(&self) -> Result<Vec<Deck>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.decks.values().cloned().collect())
    }

    fn delete_deck(&self, id: &DeckId) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        Ok(inner.decks.remove(id).is_some())
    }

    fn record_purchase(&self, request: &PurchaseRequest) -> Result<PurchaseReceipt> {
        let mut inner = self.inner.write().unwrap();

        let deck = inner
            .decks
            .get(&request.deck_id)
            .ok_or_else(|| MarketError::DeckNotFound(request.deck_id.to_string()))?;
        let seller_id = deck.creator_id.clone();

        let buyer = inner
            .profiles
            .get(&request.buyer_id)
            .ok_or_else(|| MarketError::ProfileNotFound(request.buyer_id.to_string()))?;
        if buyer.purchased_deck_ids.contains(&request.deck_id) {
            return Err(MarketError::AlreadyPurchased(request.deck_id.to_string()));
        }
        if request.funding == PurchaseFunding::StoredBalance && buyer.balance < request.amount {
            return Err(MarketError::InsufficientFunds {
                needed: request.amount,
                available: buyer.balance,
            });
        }
        if !inner.profiles.contains_key(&seller_id) {
            return Err(MarketError::ProfileNotFound(seller_id.to_string()));
        }

        // All checks passed; apply every side of the purchase under the
        // same write lock so no interleaving observes partial state.
        let purchased_at = Utc::now();
        let mut buyer_balance = Decimal::ZERO;
        if let Some(buyer) = inner.profiles.get_mut(&request.buyer_id) {
            if request.funding == PurchaseFunding::StoredBalance {
                buyer.balance -= request.amount;
            }
            buyer.purchased_deck_ids.insert(request.deck_id.clone());
            buyer_balance = buyer.balance;
        }
        if let Some(deck) = inner.decks.get_mut(&request.deck_id) {
            deck.purchase_history.push(PurchaseRecord {
                buyer_id: request.buyer_id.clone(),
                purchased_at,
                amount: request.amount,
            });
        }
        if let Some(seller) = inner.profiles.get_mut(&seller_id) {
            seller.total_earnings += request.seller_share;
            seller.total_sales += 1;
            if request.funding == PurchaseFunding::ProviderCheckout {
                seller.balance += request.seller_share;
            }
        }

        debug!(
            buyer = %request.buyer_id,
            deck = %request.deck_id,
            amount = %request.amount,
            seller_share = %request.seller_share,
            "purchase recorded"
        );

        Ok(PurchaseReceipt {
            buyer_id: request.buyer_id.clone(),
            seller_id,
            deck_id: request.deck_id.clone(),
            amount: request.amount,
            seller_share: request.seller_share,
            buyer_balance,
            purchased_at,
        })
    }

    fn reverse_purchase(&self, request: &PurchaseRequest) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        let seller_id = inner
            .decks
            .get(&request.deck_id)
            .ok_or_else(|| MarketError::DeckNotFound(request.deck_id.to_string()))?
            .creator_id
            .clone();

        if let Some(buyer) = inner.profiles.get_mut(&request.buyer_id) {
            buyer.purchased_deck_ids.remove(&request.deck_id);
            if request.funding == PurchaseFunding::StoredBalance {
                buyer.balance += request.amount;
            }
        }
        if let Some(deck) = inner.decks.get_mut(&request.deck_id) {
            if let Some(pos) = deck
                .purchase_history
                .iter()
                .rposition(|r| r.buyer_id == request.buyer_id)
            {
                deck.purchase_history.remove(pos);
            }
        }
        if let Some(seller) = inner.profiles.get_mut(&seller_id) {
            seller.total_earnings -= request.seller_share;
            seller.total_sales = seller.total_sales.saturating_sub(1);
            if request.funding == PurchaseFunding::ProviderCheckout {
                seller.balance -= request.seller_share;
            }
        }

        warn!(
            buyer = %request.buyer_id,
            deck = %request.deck_id,
            "purchase reversed"
        );
        Ok(())
    }

    fn add_review(&self, review: Review) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.decks.contains_key(&review.deck_id) {
            return Err(MarketError::DeckNotFound(review.deck_id.to_string()));
        }
        let profile = inner
            .profiles
            .get(&review.user_id)
            .ok_or_else(|| MarketError::ProfileNotFound(review.user_id.to_string()))?;
        if !profile.owns_deck(&review.deck_id) {
            return Err(MarketError::PurchaseRequired);
        }
        let duplicate = inner
            .reviews
            .values()
            .any(|r| r.deck_id == review.deck_id && r.user_id == review.user_id);
        if duplicate {
            return Err(MarketError::AlreadyReviewed);
        }
        inner.reviews.insert(review.id.clone(), review);
        Ok(())
    }

    fn reviews_for_deck(&self, deck: &DeckId) -> Result<Vec<Review>> {
        let inner = self.inner.read().unwrap();
        let mut reviews: Vec<Review> = inner
            .reviews
            .values()
            .filter(|r| &r.deck_id == deck)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }

    fn delete_review(&self, id: &ReviewId, requester: &UserId) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let review = inner
            .reviews
            .get(id)
            .ok_or_else(|| MarketError::ReviewNotFound(id.to_string()))?;
        if &review.user_id != requester {
            return Err(MarketError::NotOwner);
        }
        inner.reviews.remove(id);
        Ok(())
    }

    fn file_dispute(&self, dispute: PlagiarismDispute) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        debug!(user = %dispute.user_id, title = %dispute.deck_title, "plagiarism dispute filed");
        inner.disputes.push(dispute);
        Ok(())
    }

    fn record_event(&self, event_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        let first = inner.processed_events.insert(event_id.to_string());
        if !first {
            debug!(event_id, "webhook event replay ignored");
        }
        Ok(first)
    }
}
