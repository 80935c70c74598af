//! Reviews and plagiarism disputes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DeckId, DisputeId, ReviewId, UserId};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// Whether a rating falls in the accepted 1..=5 range
pub fn valid_rating(rating: u8) -> bool {
    (MIN_RATING..=MAX_RATING).contains(&rating)
}

/// A buyer's review of a purchased deck. At most one per user per deck.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub deck_id: DeckId,
    pub user_id: UserId,
    /// Star rating, 1 to 5 inclusive
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    pub fn new(user_id: UserId, deck_id: DeckId, rating: u8, comment: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ReviewId::generate(),
            deck_id,
            user_id,
            rating,
            comment: comment.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle of a plagiarism dispute
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeStatus {
    /// Filed, awaiting moderator attention
    #[default]
    Pending,
    /// Moderator sided with the submitter
    Resolved,
    /// Moderator sided with the original deck
    Rejected,
}

/// Filed by a creator whose submission was blocked by the originality
/// check and who believes the block is wrong.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlagiarismDispute {
    pub id: DisputeId,
    /// Who filed the dispute
    pub user_id: UserId,
    /// Title of the blocked submission (the deck was never created,
    /// so there is no deck ID to reference)
    pub deck_title: String,
    /// The submitter's case for originality
    pub message: String,
    pub status: DisputeStatus,
    pub created_at: DateTime<Utc>,
}

impl PlagiarismDispute {
    pub fn new(user_id: UserId, deck_title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: DisputeId::generate(),
            user_id,
            deck_title: deck_title.into(),
            message: message.into(),
            status: DisputeStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds_are_inclusive() {
        assert!(!valid_rating(0));
        assert!(valid_rating(1));
        assert!(valid_rating(5));
        assert!(!valid_rating(6));
    }

    #[test]
    fn new_dispute_starts_pending() {
        let d = PlagiarismDispute::new(UserId::from_string("u1"), "Spanish Verbs", "I wrote this");
        assert_eq!(d.status, DisputeStatus::Pending);
    }
}
