//! Dense row-major embedding matrix backing the broad index.

use rayon::prelude::*;

use crate::semantic::index::{top_positions, CompoundInfo, IndexError, MatchResult};
use crate::semantic::vectorize::{clamp_similarity, dot, Embedding};

/// Rows below this count are scored on the calling thread.
const PARALLEL_THRESHOLD: usize = 4096;

/// `rows × dim` matrix of unit embeddings, one row per reference spectrum.
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    dim: usize,
}

impl EmbeddingMatrix {
    pub fn with_capacity(dim: usize, rows: usize) -> Self {
        Self {
            data: Vec::with_capacity(dim * rows),
            dim,
        }
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn push_row(&mut self, embedding: &Embedding) -> Result<(), IndexError> {
        if embedding.dim() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got: embedding.dim(),
            });
        }
        self.data.extend_from_slice(embedding.as_slice());
        Ok(())
    }

    /// `matrix @ query`, one raw dot product per row.
    pub fn mat_vec(&self, query: &Embedding) -> Result<Vec<f32>, IndexError> {
        if query.dim() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got: query.dim(),
            });
        }
        if self.dim == 0 {
            return Ok(Vec::new());
        }

        let q = query.as_slice();
        let scores = if self.rows() >= PARALLEL_THRESHOLD {
            self.data.par_chunks(self.dim).map(|row| dot(row, q)).collect()
        } else {
            self.data.chunks(self.dim).map(|row| dot(row, q)).collect()
        };
        Ok(scores)
    }
}

/// The materialized broad index: compound metadata aligned with matrix rows.
#[derive(Debug, Clone)]
pub struct BroadIndex {
    compounds: Vec<CompoundInfo>,
    matrix: EmbeddingMatrix,
}

impl BroadIndex {
    pub fn with_capacity(dim: usize, rows: usize) -> Self {
        Self {
            compounds: Vec::with_capacity(rows),
            matrix: EmbeddingMatrix::with_capacity(dim, rows),
        }
    }

    pub fn push(&mut self, compound: CompoundInfo, embedding: &Embedding) -> Result<(), IndexError> {
        self.matrix.push_row(embedding)?;
        self.compounds.push(compound);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.compounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty()
    }

    /// Same ranking as [`SimilarityIndex::rank`](crate::semantic::index::SimilarityIndex::rank),
    /// computed as one matrix–vector product.
    pub fn rank(&self, query: &Embedding, top_n: usize) -> Result<Vec<MatchResult>, IndexError> {
        let scores = self
            .matrix
            .mat_vec(query)?
            .into_iter()
            .map(clamp_similarity)
            .collect();

        Ok(top_positions(scores, top_n)
            .into_iter()
            .map(|(row, similarity)| MatchResult::new(&self.compounds[row], similarity, None))
            .collect())
    }
}
