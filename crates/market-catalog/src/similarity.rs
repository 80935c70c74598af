//! Word-set similarity between deck texts.
//!
//! The originality check treats a deck as a bag of lowercased words
//! and compares submissions against the live catalog with the Jaccard
//! index: `|A ∩ B| / |A ∪ B|`. Word ORDER is deliberately ignored; a
//! reordered copy of someone else's deck scores 1.0.

use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use market_core::{Deck, DeckId};

/// Scores strictly above this block a submission.
pub const SIMILARITY_THRESHOLD: f64 = 0.5;

/// The catalog deck most similar to a submission.
#[derive(Clone, Debug, Serialize)]
pub struct SimilarityHit {
    pub deck_id: DeckId,
    pub title: String,
    pub score: f64,
}

/// Lowercased whitespace-delimited vocabulary of a text.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard index of the two texts' vocabularies, in `[0.0, 1.0]`.
///
/// Two texts with no words at all are identical, so they score 1.0.
pub fn jaccard(a: &str, b: &str) -> f64 {
    jaccard_sets(&word_set(a), &word_set(b))
}

fn jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Whether a similarity score is high enough to block a submission.
/// The threshold itself does not block; only scores above it do.
pub fn blocks(score: f64) -> bool {
    score > SIMILARITY_THRESHOLD
}

/// Compare a submission's text against every existing deck and return
/// the single closest match, if the catalog is non-empty.
pub fn closest_match(content: &str, existing: &[Deck]) -> Option<SimilarityHit> {
    let submitted = word_set(content);
    let mut best: Option<SimilarityHit> = None;
    for deck in existing {
        let score = jaccard_sets(&submitted, &word_set(&deck.content));
        let better = best.as_ref().is_none_or(|b| score > b.score);
        if better {
            best = Some(SimilarityHit {
                deck_id: deck.id.clone(),
                title: deck.title.clone(),
                score,
            });
        }
    }
    if let Some(hit) = &best {
        debug!(decks = existing.len(), closest = %hit.title, score = hit.score, "originality scan");
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::{Difficulty, UserId};
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn deck_with_content(title: &str, content: &str) -> Deck {
        Deck::new(
            UserId::from_string("creator"),
            title,
            "",
            dec!(5.00),
            Difficulty::Beginner,
            BTreeSet::new(),
            content,
            1,
        )
    }

    #[test]
    fn identical_texts_score_one() {
        assert_eq!(jaccard("hola mundo", "hola mundo"), 1.0);
        assert_eq!(jaccard("", ""), 1.0);
    }

    #[test]
    fn disjoint_texts_score_zero() {
        assert_eq!(jaccard("alpha beta", "gamma delta"), 0.0);
        assert_eq!(jaccard("", "anything"), 0.0);
    }

    #[test]
    fn jaccard_is_symmetric() {
        let a = "the quick brown fox";
        let b = "the slow brown bear";
        assert_eq!(jaccard(a, b), jaccard(b, a));
    }

    #[test]
    fn case_and_order_are_ignored() {
        assert_eq!(jaccard("Foo BAR", "bar foo"), 1.0);
    }

    #[test]
    fn three_of_five_shared_words_scores_point_six() {
        // {a,b,c,d} vs {a,b,c,e}: intersection 3, union 5
        let score = jaccard("A B C D", "A B C E");
        assert_eq!(score, 0.6);
        assert!(blocks(score));
    }

    #[test]
    fn threshold_is_strict() {
        // {a,b} vs {a}: intersection 1, union 2 = exactly 0.5
        let score = jaccard("a b", "a");
        assert_eq!(score, 0.5);
        assert!(!blocks(score));
    }

    #[test]
    fn closest_match_picks_highest_score() {
        let far = deck_with_content("Far", "x y z");
        let near = deck_with_content("Near", "a b c e");
        let hit = closest_match("a b c d", &[far, near]).unwrap();
        assert_eq!(hit.title, "Near");
        assert_eq!(hit.score, 0.6);
    }

    #[test]
    fn empty_catalog_has_no_match() {
        assert!(closest_match("a b c", &[]).is_none());
    }
}
