//! Catalog browsing: filter and order the deck list.

use rust_decimal::Decimal;
use serde::Deserialize;

use market_core::{Deck, Difficulty, UserId};

/// Browse filters. Every field is optional; an empty filter returns
/// the whole catalog.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeckFilter {
    pub difficulty: Option<Difficulty>,
    /// Exact category tag, matched case-insensitively
    pub category: Option<String>,
    pub creator_id: Option<UserId>,
    /// Free-text needle matched against title and description
    pub query: Option<String>,
    pub max_price: Option<Decimal>,
}

/// Apply `filter` and return matches newest-first.
pub fn search(decks: Vec<Deck>, filter: &DeckFilter) -> Vec<Deck> {
    let needle = filter.query.as_deref().map(str::to_lowercase);
    let mut matches: Vec<Deck> = decks
        .into_iter()
        .filter(|deck| {
            if let Some(difficulty) = filter.difficulty {
                if deck.difficulty != difficulty {
                    return false;
                }
            }
            if let Some(category) = &filter.category {
                let tagged = deck
                    .categories
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(category));
                if !tagged {
                    return false;
                }
            }
            if let Some(creator) = &filter.creator_id {
                if &deck.creator_id != creator {
                    return false;
                }
            }
            if let Some(max) = filter.max_price {
                if deck.price > max {
                    return false;
                }
            }
            if let Some(needle) = &needle {
                let haystack =
                    format!("{} {}", deck.title.to_lowercase(), deck.description.to_lowercase());
                if !haystack.contains(needle) {
                    return false;
                }
            }
            true
        })
        .collect();
    matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn deck(title: &str, price: Decimal, difficulty: Difficulty, category: &str) -> Deck {
        Deck::new(
            UserId::from_string("creator"),
            title,
            "practice deck",
            price,
            difficulty,
            BTreeSet::from([category.to_string()]),
            "card",
            1,
        )
    }

    fn catalog() -> Vec<Deck> {
        vec![
            deck("Spanish Verbs", dec!(9.99), Difficulty::Beginner, "language"),
            deck("Organic Chemistry", dec!(19.99), Difficulty::Advanced, "science"),
            deck("Spanish Idioms", dec!(14.50), Difficulty::Intermediate, "language"),
        ]
    }

    #[test]
    fn empty_filter_returns_everything() {
        let found = search(catalog(), &DeckFilter::default());
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn filters_compose() {
        let filter = DeckFilter {
            category: Some("Language".to_string()),
            max_price: Some(dec!(10)),
            ..DeckFilter::default()
        };
        let found = search(catalog(), &filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Spanish Verbs");
    }

    #[test]
    fn query_matches_title_case_insensitively() {
        let filter = DeckFilter {
            query: Some("spanish".to_string()),
            ..DeckFilter::default()
        };
        assert_eq!(search(catalog(), &filter).len(), 2);
    }

    #[test]
    fn difficulty_filter_is_exact() {
        let filter = DeckFilter {
            difficulty: Some(Difficulty::Advanced),
            ..DeckFilter::default()
        };
        let found = search(catalog(), &filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Organic Chemistry");
    }
}
