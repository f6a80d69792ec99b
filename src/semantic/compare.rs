//! Agreement between embedding ranking and fragment-overlap ranking.
//!
//! For each embedding-ranked candidate the fragment-overlap rank of the same
//! id is looked up, the rank delta is reported, and fragment scores that look
//! good but rest on too few matched peaks are flagged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::semantic::index::MatchResult;

pub const DEFAULT_LOW_CONFIDENCE_SIMILARITY: f32 = 0.65;
pub const DEFAULT_LOW_CONFIDENCE_MIN_PEAKS: usize = 5;
pub const DEFAULT_HIGH_BAND: f32 = 0.7;
pub const DEFAULT_GREY_BAND: f32 = 0.4;

/// Calibration of the agreement heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    /// Fragment similarity from which a score counts as "good"
    pub low_confidence_similarity: f32,
    /// A good fragment score with fewer matched peaks is flagged
    pub low_confidence_min_peaks: usize,
    pub high_band: f32,
    pub grey_band: f32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            low_confidence_similarity: DEFAULT_LOW_CONFIDENCE_SIMILARITY,
            low_confidence_min_peaks: DEFAULT_LOW_CONFIDENCE_MIN_PEAKS,
            high_band: DEFAULT_HIGH_BAND,
            grey_band: DEFAULT_GREY_BAND,
        }
    }
}

impl ConfidenceThresholds {
    pub fn is_low_confidence(&self, fragment_similarity: f32, matched_peaks: usize) -> bool {
        fragment_similarity >= self.low_confidence_similarity
            && matched_peaks < self.low_confidence_min_peaks
    }
}

/// Display band of a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityBand {
    High,
    Grey,
    None,
}

impl SimilarityBand {
    pub fn of(similarity: f32, thresholds: &ConfidenceThresholds) -> Self {
        if similarity >= thresholds.high_band {
            SimilarityBand::High
        } else if similarity >= thresholds.grey_band {
            SimilarityBand::Grey
        } else {
            SimilarityBand::None
        }
    }
}

/// One embedding-ranked candidate next to its fragment-overlap result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    pub id: String,
    pub name: String,
    /// 1-based rank in the embedding results
    pub embedding_rank: usize,
    pub embedding_similarity: f32,
    /// 1-based rank in the fragment-overlap results
    pub fragment_rank: Option<usize>,
    pub fragment_similarity: Option<f32>,
    pub n_matched_peaks: Option<usize>,
    /// `fragment_rank - embedding_rank`; `None` when only the embedding
    /// search found the candidate
    pub delta: Option<i64>,
    pub low_confidence: bool,
    pub band: SimilarityBand,
}

/// Merge the two rankings of the same query, in embedding order.
pub fn compare(
    embedding_results: &[MatchResult],
    fragment_results: &[MatchResult],
    thresholds: &ConfidenceThresholds,
) -> Vec<ComparisonRow> {
    let fragment_by_id: HashMap<&str, (usize, &MatchResult)> = fragment_results
        .iter()
        .enumerate()
        .rev() // first occurrence wins
        .map(|(i, r)| (r.id.as_str(), (i + 1, r)))
        .collect();

    embedding_results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let embedding_rank = i + 1;
            let fragment = fragment_by_id.get(result.id.as_str());

            let fragment_rank = fragment.map(|(rank, _)| *rank);
            let fragment_similarity = fragment.map(|(_, r)| r.similarity);
            let n_matched_peaks = fragment.and_then(|(_, r)| r.n_matched_peaks);

            let low_confidence = match (fragment_similarity, n_matched_peaks) {
                (Some(similarity), Some(matched)) => {
                    thresholds.is_low_confidence(similarity, matched)
                }
                _ => false,
            };

            ComparisonRow {
                id: result.id.clone(),
                name: result.name.clone(),
                embedding_rank,
                embedding_similarity: result.similarity,
                fragment_rank,
                fragment_similarity,
                n_matched_peaks,
                delta: fragment_rank.map(|rank| rank as i64 - embedding_rank as i64),
                low_confidence,
                band: SimilarityBand::of(result.similarity, thresholds),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, similarity: f32, n_matched_peaks: Option<usize>) -> MatchResult {
        MatchResult {
            id: id.to_string(),
            name: id.to_uppercase(),
            formula: None,
            similarity,
            n_matched_peaks,
            source: "test".to_string(),
            tox_score: None,
        }
    }

    #[test]
    fn test_delta_and_embedding_only() {
        let embedding = vec![result("a", 0.9, None), result("b", 0.8, None), result("c", 0.7, None)];
        let fragment = vec![result("c", 0.9, Some(8)), result("a", 0.6, Some(6))];

        let rows = compare(&embedding, &fragment, &ConfidenceThresholds::default());
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[0].fragment_rank, Some(2));
        assert_eq!(rows[0].delta, Some(1));

        assert_eq!(rows[1].id, "b");
        assert_eq!(rows[1].delta, None);
        assert!(rows[1].fragment_rank.is_none());
        assert!(!rows[1].low_confidence);

        assert_eq!(rows[2].embedding_rank, 3);
        assert_eq!(rows[2].fragment_rank, Some(1));
        assert_eq!(rows[2].delta, Some(-2));
    }

    #[test]
    fn test_low_confidence_flag() {
        let embedding = vec![result("a", 0.9, None), result("b", 0.8, None)];
        let fragment = vec![result("a", 0.7, Some(3)), result("b", 0.7, Some(6))];

        let rows = compare(&embedding, &fragment, &ConfidenceThresholds::default());
        assert!(rows[0].low_confidence);
        assert!(!rows[1].low_confidence);
    }

    #[test]
    fn test_low_confidence_threshold_edges() {
        let t = ConfidenceThresholds::default();
        assert!(t.is_low_confidence(0.65, 4));
        assert!(!t.is_low_confidence(0.64, 1));
        assert!(!t.is_low_confidence(0.9, 5));
    }

    #[test]
    fn test_configurable_thresholds() {
        let thresholds = ConfidenceThresholds {
            low_confidence_similarity: 0.5,
            low_confidence_min_peaks: 10,
            ..Default::default()
        };
        let rows = compare(
            &[result("a", 0.9, None)],
            &[result("a", 0.55, Some(8))],
            &thresholds,
        );
        assert!(rows[0].low_confidence);
    }

    #[test]
    fn test_bands() {
        let t = ConfidenceThresholds::default();
        assert_eq!(SimilarityBand::of(0.95, &t), SimilarityBand::High);
        assert_eq!(SimilarityBand::of(0.7, &t), SimilarityBand::High);
        assert_eq!(SimilarityBand::of(0.5, &t), SimilarityBand::Grey);
        assert_eq!(SimilarityBand::of(0.1, &t), SimilarityBand::None);
    }

    #[test]
    fn test_empty_inputs() {
        let t = ConfidenceThresholds::default();
        assert!(compare(&[], &[result("a", 0.9, Some(3))], &t).is_empty());

        let rows = compare(&[result("a", 0.9, None)], &[], &t);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].delta, None);
    }

    #[test]
    fn test_row_wire_format() {
        let rows = compare(
            &[result("a", 0.9, None)],
            &[result("a", 0.7, Some(3))],
            &ConfidenceThresholds::default(),
        );
        let value = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(value["lowConfidence"], true);
        assert_eq!(value["delta"], 0);
        assert_eq!(value["band"], "high");
    }
}
