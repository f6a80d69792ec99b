//! Spectral similarity search.
//!
//! # Architecture
//!
//! - `vectorize`: peak list to fixed-length embedding
//! - `index`: curated in-memory index with cosine ranking
//! - `matrix`: dense embedding matrix behind the broad index
//! - `broad`: background build of the broad index
//! - `fragment`: fragment-overlap scoring in an m/z tolerance window
//! - `compare`: agreement between the two rankings
//! - `service`: high-level search service

pub mod broad;
pub mod compare;
pub mod fragment;
pub mod index;
pub mod matrix;
mod service;
pub mod vectorize;

pub use broad::BroadIndexStatus;
pub use compare::ComparisonRow;
pub use index::MatchResult;
pub use service::{LibrarySelector, SearchError, SimilaritySearchService};
pub use vectorize::{PeakVectorizer, VectorizerParams};
