//! Decks: the sellable unit of the marketplace.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{DeckId, UserId};

/// Self-reported difficulty tier of a deck
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Difficulty::Beginner => "Beginner",
            Difficulty::Intermediate => "Intermediate",
            Difficulty::Advanced => "Advanced",
        };
        write!(f, "{s}")
    }
}

/// One completed sale of a deck, kept on the deck itself
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Who bought it
    pub buyer_id: UserId,
    /// When the purchase settled
    pub purchased_at: DateTime<Utc>,
    /// Full price paid, in dollars
    pub amount: Decimal,
}

/// A published flashcard deck
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Deck {
    pub id: DeckId,
    pub title: String,
    pub description: String,
    /// Listing price in dollars, at most two decimal places
    pub price: Decimal,
    /// Number of cards, derived from `content` at submission time
    pub card_count: u32,
    pub difficulty: Difficulty,
    /// Free-form category tags
    pub categories: BTreeSet<String>,
    /// Profile that published the deck and receives the seller share
    pub creator_id: UserId,
    /// Raw card text, one card per line; `#` lines are comments
    pub content: String,
    /// Every settled sale of this deck, oldest first
    pub purchase_history: Vec<PurchaseRecord>,
    pub created_at: DateTime<Utc>,
}

impl Deck {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        creator_id: UserId,
        title: impl Into<String>,
        description: impl Into<String>,
        price: Decimal,
        difficulty: Difficulty,
        categories: BTreeSet<String>,
        content: impl Into<String>,
        card_count: u32,
    ) -> Self {
        Self {
            id: DeckId::generate(),
            title: title.into(),
            description: description.into(),
            price,
            card_count,
            difficulty,
            categories,
            creator_id,
            content: content.into(),
            purchase_history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn times_sold(&self) -> usize {
        self.purchase_history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_deck() -> Deck {
        Deck::new(
            UserId::from_string("creator"),
            "Spanish Verbs",
            "Common irregular verbs",
            dec!(9.99),
            Difficulty::Beginner,
            BTreeSet::from(["language".to_string()]),
            "ser\nestar\nir",
            3,
        )
    }

    #[test]
    fn new_deck_has_no_sales() {
        let deck = sample_deck();
        assert_eq!(deck.times_sold(), 0);
        assert_eq!(deck.card_count, 3);
    }

    #[test]
    fn difficulty_serializes_capitalized() {
        let json = serde_json::to_string(&Difficulty::Intermediate).unwrap();
        assert_eq!(json, "\"Intermediate\"");
    }
}
