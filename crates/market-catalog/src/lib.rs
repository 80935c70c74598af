//! # market-catalog
//!
//! Catalog logic for the deck marketplace: submission intake, the
//! Jaccard originality check, and browse/search filtering.
//!
//! ## Originality check
//!
//! Every submission is compared against every live deck:
//!
//! ```text
//! submission "A B C D"   catalog deck "A B C E"
//!         \                   /
//!          word sets {a,b,c,d} vs {a,b,c,e}
//!          intersection 3, union 5 -> score 0.6
//!          0.6 > 0.5 threshold    -> submission blocked
//! ```
//!
//! A blocked submission is not an error: the verdict carries the
//! closest match so the creator can file a plagiarism dispute.

pub mod error;
pub mod intake;
pub mod search;
pub mod similarity;

pub use error::{CatalogError, Result};
pub use intake::{DeckSubmission, SubmissionVerdict, card_count, evaluate};
pub use search::{DeckFilter, search};
pub use similarity::{SIMILARITY_THRESHOLD, SimilarityHit, blocks, closest_match, jaccard};
