//! External collaborators the core consumes but does not own: a SOL/USD
//! price oracle and a token metadata enricher. Both are modeled as traits
//! so the core can be exercised against a fake in tests, with one
//! `reqwest`-backed implementation each.

pub mod metadata;
pub mod price;

pub use metadata::{HttpMetadataEnricher, MetadataEnricher, TokenMetadata};
pub use price::{HttpSolPriceSource, SolPriceSource};
