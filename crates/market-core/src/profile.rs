//! User profiles: wallet balance, library, social graph, and the
//! mirrored state of the user's connected payout account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{AccountId, DeckId, UserId};

/// Onboarding state of a user's connected account at the payment
/// provider, mirrored locally from provisioning calls and webhooks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectStatus {
    /// No account has been provisioned for this user
    #[default]
    None,
    /// Account exists but the provider has not enabled charges yet
    Pending,
    /// Provider reports `charges_enabled`; transfers and payouts allowed
    Active,
}

impl ConnectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectStatus::None => "none",
            ConnectStatus::Pending => "pending",
            ConnectStatus::Active => "active",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConnectStatus::Active)
    }
}

impl std::fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A marketplace user. One record per auth-provider user, created when
/// the sign-up event is mirrored into the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    /// Auth-provider user ID
    pub id: UserId,
    /// Display name
    pub username: String,
    /// Contact email; required before a connected account can be
    /// provisioned, optional otherwise
    pub email: Option<String>,
    /// Avatar image URL
    pub avatar_url: Option<String>,
    /// Stored wallet balance in dollars. Never negative.
    pub balance: Decimal,
    /// Decks this user has bought. Owning grants review rights.
    pub purchased_deck_ids: BTreeSet<DeckId>,
    /// Decks this user has liked
    pub liked_deck_ids: BTreeSet<DeckId>,
    /// Creators this user follows
    pub followed_creators: BTreeSet<UserId>,
    /// Connected-account ID at the payment provider, once provisioned
    pub connect_account_id: Option<AccountId>,
    /// Mirrored onboarding state of the connected account
    pub connect_status: ConnectStatus,
    /// Lifetime earnings from deck sales, in dollars
    pub total_earnings: Decimal,
    /// Lifetime number of decks sold
    pub total_sales: u64,
    /// When the profile was first mirrored
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: None,
            avatar_url: None,
            balance: Decimal::ZERO,
            purchased_deck_ids: BTreeSet::new(),
            liked_deck_ids: BTreeSet::new(),
            followed_creators: BTreeSet::new(),
            connect_account_id: None,
            connect_status: ConnectStatus::None,
            total_earnings: Decimal::ZERO,
            total_sales: 0,
            created_at: Utc::now(),
        }
    }

    /// True once the provider has enabled charges for this user's
    /// connected account. Transfers and payouts require this.
    pub fn can_receive_transfers(&self) -> bool {
        self.connect_account_id.is_some() && self.connect_status.is_active()
    }

    pub fn owns_deck(&self, deck_id: &DeckId) -> bool {
        self.purchased_deck_ids.contains(deck_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_profile_starts_empty() {
        let p = Profile::new(UserId::from_string("u1"), "alice");
        assert_eq!(p.balance, dec!(0));
        assert_eq!(p.connect_status, ConnectStatus::None);
        assert!(p.purchased_deck_ids.is_empty());
        assert!(!p.can_receive_transfers());
    }

    #[test]
    fn transfers_require_account_and_active_status() {
        let mut p = Profile::new(UserId::from_string("u1"), "alice");
        p.connect_account_id = Some(AccountId::from_string("acct_1"));
        assert!(!p.can_receive_transfers());

        p.connect_status = ConnectStatus::Pending;
        assert!(!p.can_receive_transfers());

        p.connect_status = ConnectStatus::Active;
        assert!(p.can_receive_transfers());
    }

    #[test]
    fn connect_status_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }
}
