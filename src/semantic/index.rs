//! In-memory reference index with full-scan cosine ranking.
//!
//! Holds the embeddings of a curated library in load order and ranks them
//! against a query embedding.

use serde::{Deserialize, Serialize};

use crate::semantic::vectorize::Embedding;

/// Descriptive data of a reference compound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompoundInfo {
    pub id: String,
    pub name: String,
    pub formula: Option<String>,
    /// Library or corpus the entry came from
    pub source: String,
    pub tox_score: Option<f64>,
}

/// An entry in the similarity index.
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub compound: CompoundInfo,
    pub embedding: Embedding,
}

/// A ranked candidate for a query spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub id: String,
    pub name: String,
    pub formula: Option<String>,
    /// Similarity score (0.0 to 1.0)
    pub similarity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_matched_peaks: Option<usize>,
    pub source: String,
    #[serde(default)]
    pub tox_score: Option<f64>,
}

impl MatchResult {
    pub fn new(compound: &CompoundInfo, similarity: f32, n_matched_peaks: Option<usize>) -> Self {
        Self {
            id: compound.id.clone(),
            name: compound.name.clone(),
            formula: compound.formula.clone(),
            similarity,
            n_matched_peaks,
            source: compound.source.clone(),
            tox_score: compound.tox_score,
        }
    }
}

/// Ordered collection of library entries sharing one embedding dimension.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    entries: Vec<LibraryEntry>,
    dimensions: usize,
}

impl SimilarityIndex {
    /// Create a new empty index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: Vec::new(),
            dimensions,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. Insertion order is the tie-break order of `rank`.
    pub fn push(&mut self, entry: LibraryEntry) -> Result<(), IndexError> {
        if entry.embedding.dim() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: entry.embedding.dim(),
            });
        }

        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, position: usize) -> Option<&LibraryEntry> {
        self.entries.get(position)
    }

    /// Rank every entry against `query` and keep the best `top_n`.
    ///
    /// Similarity is the dot product clamped to `[0, 1]`. Equal scores keep
    /// load order.
    pub fn rank(&self, query: &Embedding, top_n: usize) -> Result<Vec<MatchResult>, IndexError> {
        if query.dim() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.dim(),
            });
        }

        let scores = self
            .entries
            .iter()
            .map(|entry| query.cosine_similarity(&entry.embedding))
            .collect();

        Ok(top_positions(scores, top_n)
            .into_iter()
            .map(|(position, similarity)| {
                MatchResult::new(&self.entries[position].compound, similarity, None)
            })
            .collect())
    }
}

/// Stable descending sort of `(position, score)` pairs, truncated to `top_n`.
///
/// Scores are expected to be clamped already; ties keep original position.
pub fn top_positions(scores: Vec<f32>, top_n: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();

    // sort_by is stable
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_n);
    ranked
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
