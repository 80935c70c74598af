//! Error types for deck intake.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// The submission failed a validation rule. The message names the
    /// field and the rule, and is safe to show to the submitter.
    #[error("Invalid submission: {0}")]
    Invalid(String),
}
