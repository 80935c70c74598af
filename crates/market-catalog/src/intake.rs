//! Deck submission: validation, card counting, and the originality
//! gate that runs before anything is published.

use rust_decimal::Decimal;
use serde::Deserialize;

use market_core::{Deck, Difficulty, UserId};

use crate::error::{CatalogError, Result};
use crate::similarity::{self, SimilarityHit};

/// A deck as submitted by a creator, before any ID or timestamps exist.
#[derive(Clone, Debug, Deserialize)]
pub struct DeckSubmission {
    pub creator_id: UserId,
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub difficulty: Difficulty,
    pub categories: Vec<String>,
    /// Raw card text, one card per line
    pub content: String,
}

impl DeckSubmission {
    /// Build the publishable deck once intake has accepted the
    /// submission and counted its cards.
    pub fn into_deck(self, card_count: u32) -> Deck {
        let categories = self
            .categories
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        Deck::new(
            self.creator_id,
            self.title.trim(),
            self.description,
            self.price,
            self.difficulty,
            categories,
            self.content,
            card_count,
        )
    }
}

/// Outcome of evaluating a submission against the live catalog.
#[derive(Clone, Debug)]
pub enum SubmissionVerdict {
    /// Publishable; `card_count` is the derived card total
    Accepted { card_count: u32 },
    /// Too similar to an existing deck. Carries the closest match so
    /// the submitter can see what they collided with and dispute it.
    Blocked { closest: SimilarityHit },
}

/// Count the cards in raw deck text: one card per non-empty line,
/// ignoring lines whose first non-whitespace character is `#`.
pub fn card_count(content: &str) -> u32 {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count() as u32
}

/// Validate a submission and run the originality check against every
/// existing deck. Field errors come back as `CatalogError::Invalid`;
/// a too-similar deck is not an error but a `Blocked` verdict.
pub fn evaluate(submission: &DeckSubmission, existing: &[Deck]) -> Result<SubmissionVerdict> {
    if submission.title.trim().is_empty() {
        return Err(CatalogError::Invalid("title must not be empty".into()));
    }
    if submission.price <= Decimal::ZERO {
        return Err(CatalogError::Invalid(format!(
            "price must be positive, got {}",
            submission.price
        )));
    }
    if submission.price.normalize().scale() > 2 {
        return Err(CatalogError::Invalid(format!(
            "price must have at most two decimal places, got {}",
            submission.price
        )));
    }

    let cards = card_count(&submission.content);
    if cards == 0 {
        return Err(CatalogError::Invalid(
            "deck must contain at least one card".into(),
        ));
    }

    if let Some(closest) = similarity::closest_match(&submission.content, existing) {
        if similarity::blocks(closest.score) {
            return Ok(SubmissionVerdict::Blocked { closest });
        }
    }

    Ok(SubmissionVerdict::Accepted { card_count: cards })
}
