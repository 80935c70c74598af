//! # market-core
//!
//! Core domain model for the deck marketplace: profiles, decks,
//! reviews, plagiarism disputes, and the storage trait everything else
//! is built on.
//!
//! The store is the concurrency boundary. Money-moving operations are
//! expressed as single atomic methods (`try_debit_balance`,
//! `record_purchase`, `record_event`) so the payment layer never has
//! to read-modify-write balances across calls.

pub mod deck;
pub mod error;
pub mod ids;
pub mod profile;
pub mod review;
pub mod store;

pub use deck::{Deck, Difficulty, PurchaseRecord};
pub use error::{MarketError, Result};
pub use ids::{AccountId, DeckId, DisputeId, ReviewId, UserId};
pub use profile::{ConnectStatus, Profile};
pub use review::{DisputeStatus, PlagiarismDispute, Review, valid_rating};
pub use store::{
    MarketStore, MemoryStore, PurchaseFunding, PurchaseReceipt, PurchaseRequest,
};
