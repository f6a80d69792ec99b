//! Fragment-overlap scoring in an m/z tolerance window.
//!
//! Independent of the embedding: query and reference peaks closer than the
//! tolerance are paired greedily by intensity product, each peak used at
//! most once, and the matched products are normalized like a cosine.

use crate::semantic::vectorize::clamp_similarity;
use crate::spectrum::{Peak, Spectrum};

/// Default matching tolerance in Da.
pub const DEFAULT_TOLERANCE: f64 = 0.02;

/// Outcome of comparing one query spectrum with one reference spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentScore {
    pub similarity: f32,
    pub matched_peaks: usize,
}

impl FragmentScore {
    const NONE: FragmentScore = FragmentScore {
        similarity: 0.0,
        matched_peaks: 0,
    };
}

/// Score `query` against `reference`.
///
/// When the query carries a precursor m/z, query fragments heavier than
/// `precursor + tolerance` are ignored.
pub fn score(query: &Spectrum, reference: &Spectrum, tolerance: f64) -> FragmentScore {
    let tolerance = tolerance.max(0.0);
    let ceiling = if query.precursor_mz > 0.0 {
        query.precursor_mz + tolerance
    } else {
        f64::INFINITY
    };

    let mut query_peaks: Vec<Peak> = query
        .peaks
        .iter()
        .filter(|p| p.is_valid() && p.mz <= ceiling)
        .copied()
        .collect();
    let mut reference_peaks: Vec<Peak> = reference
        .peaks
        .iter()
        .filter(|p| p.is_valid())
        .copied()
        .collect();

    let query_norm = intensity_norm(&query_peaks);
    let reference_norm = intensity_norm(&reference_peaks);
    if query_norm <= 0.0 || reference_norm <= 0.0 {
        return FragmentScore::NONE;
    }

    query_peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    reference_peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));

    let mut candidates = candidate_pairs(&query_peaks, &reference_peaks, tolerance);
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut query_used = vec![false; query_peaks.len()];
    let mut reference_used = vec![false; reference_peaks.len()];
    let mut total = 0.0;
    let mut matched = 0;
    for (qi, ri, product) in candidates {
        if query_used[qi] || reference_used[ri] {
            continue;
        }
        query_used[qi] = true;
        reference_used[ri] = true;
        total += product;
        matched += 1;
    }

    FragmentScore {
        similarity: clamp_similarity((total / (query_norm * reference_norm)) as f32),
        matched_peaks: matched,
    }
}

/// Pairs `(query index, reference index, intensity product)` within
/// tolerance. Both slices must be sorted by m/z.
fn candidate_pairs(query: &[Peak], reference: &[Peak], tolerance: f64) -> Vec<(usize, usize, f64)> {
    let mut pairs = Vec::new();
    let mut start = 0;

    for (qi, q) in query.iter().enumerate() {
        while start < reference.len() && reference[start].mz < q.mz - tolerance {
            start += 1;
        }
        for (ri, r) in reference.iter().enumerate().skip(start) {
            if r.mz > q.mz + tolerance {
                break;
            }
            let product = q.intensity * r.intensity;
            if product > 0.0 {
                pairs.push((qi, ri, product));
            }
        }
    }

    pairs
}

fn intensity_norm(peaks: &[Peak]) -> f64 {
    peaks.iter().map(|p| p.intensity * p.intensity).sum::<f64>().sqrt()
}
