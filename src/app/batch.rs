//! Sequential search over the detected peaks of one spectrum.
//!
//! Peaks are searched one at a time, in order, and every outcome is yielded
//! as soon as it is known. A failed peak yields an empty result list and
//! the batch carries on, unless the broad index turns out not to be ready:
//! every later peak would fail the same way, so the batch ends there and
//! the outcome carries the index status.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::semantic::{BroadIndexStatus, MatchResult, SearchError};
use crate::spectrum::DetectedPeak;

use super::backend::{SearchBackend, SearchRequest};
use super::errors::AppError;

/// Parameters applied to every peak of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    /// Search the broad index instead of a curated library
    pub broad: bool,
    pub library_id: Option<String>,
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakOutcome {
    pub peak_id: String,
    pub results: Vec<MatchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the broad index was not ready; the batch stops here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_status: Option<BroadIndexStatus>,
}

/// Stream of per-peak outcomes, in peak order.
pub fn batch_search(
    backend: Arc<dyn SearchBackend>,
    peaks: Vec<DetectedPeak>,
    request: BatchRequest,
) -> BoxStream<'static, PeakOutcome> {
    stream::unfold((peaks.into_iter(), false), move |(mut peaks, stopped)| {
        let backend = backend.clone();
        let request = request.clone();
        async move {
            if stopped {
                return None;
            }
            let peak = peaks.next()?;
            let outcome = search_peak(backend.as_ref(), peak, &request).await;
            let stopped = outcome.index_status.is_some();
            Some((outcome, (peaks, stopped)))
        }
    })
    .boxed()
}

async fn search_peak(
    backend: &dyn SearchBackend,
    peak: DetectedPeak,
    request: &BatchRequest,
) -> PeakOutcome {
    let search_request = SearchRequest {
        peaks: peak.spectrum.peaks,
        top_n: request.top_n,
        library_id: request.library_id.clone(),
    };

    let searched = if request.broad {
        backend.search_broad(search_request).await
    } else {
        backend.search_embedding(search_request).await
    };

    match searched {
        Ok(results) => PeakOutcome {
            peak_id: peak.id,
            results,
            error: None,
            index_status: None,
        },
        Err(AppError::Search(SearchError::BroadIndexUnavailable(status))) => {
            log::warn!("broad index not ready, stopping batch at peak {}", peak.id);
            PeakOutcome {
                peak_id: peak.id,
                results: Vec::new(),
                error: Some(SearchError::BroadIndexUnavailable(status.clone()).to_string()),
                index_status: Some(status),
            }
        }
        Err(err) => {
            log::warn!("search for peak {} failed: {err}", peak.id);
            PeakOutcome {
                peak_id: peak.id,
                results: Vec::new(),
                error: Some(err.to_string()),
                index_status: None,
            }
        }
    }
}

/// Results gathered so far, keyed by peak id, iterated in arrival order.
#[derive(Debug, Clone, Default)]
pub struct PartialResults {
    order: Vec<String>,
    results: HashMap<String, Vec<MatchResult>>,
    errors: usize,
    index_status: Option<BroadIndexStatus>,
}

impl PartialResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: PeakOutcome) {
        if outcome.error.is_some() {
            self.errors += 1;
        }
        if outcome.index_status.is_some() {
            self.index_status = outcome.index_status;
        }
        if !self.results.contains_key(&outcome.peak_id) {
            self.order.push(outcome.peak_id.clone());
        }
        self.results.insert(outcome.peak_id, outcome.results);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// At least one peak failed; shown once per batch.
    pub fn had_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Status of the broad index when the batch stopped because it was not
    /// ready.
    pub fn index_unavailable(&self) -> Option<&BroadIndexStatus> {
        self.index_status.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MatchResult])> {
        self.order
            .iter()
            .filter_map(|id| Some((id.as_str(), self.results.get(id)?.as_slice())))
    }
}

/// Identifies one selection of spectrum or peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selection(u64);

/// Hands out selections; only the latest one is current.
#[derive(Debug, Default)]
pub struct SelectionTracker {
    current: AtomicU64,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a new selection current, staling every earlier one.
    pub fn select(&self) -> Selection {
        Selection(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, selection: Selection) -> bool {
        self.current.load(Ordering::SeqCst) == selection.0
    }
}

/// Run a batch for `selection`, reporting each outcome to `on_outcome`.
///
/// Returns `None` as soon as the selection is superseded; the outcome that
/// arrived late is discarded.
pub async fn run_batch<F>(
    backend: Arc<dyn SearchBackend>,
    peaks: Vec<DetectedPeak>,
    request: BatchRequest,
    tracker: &SelectionTracker,
    selection: Selection,
    mut on_outcome: F,
) -> Option<PartialResults>
where
    F: FnMut(&PeakOutcome),
{
    let mut outcomes = batch_search(backend, peaks, request);
    let mut partial = PartialResults::new();

    while let Some(outcome) = outcomes.next().await {
        if !tracker.is_current(selection) {
            log::debug!(
                "discarding stale result for peak {} of selection {:?}",
                outcome.peak_id,
                selection
            );
            return None;
        }
        on_outcome(&outcome);
        partial.push(outcome);
    }

    if partial.had_errors() {
        log::warn!(
            "{} of {} peak searches failed",
            partial.error_count(),
            partial.len()
        );
    }
    Some(partial)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, error: Option<&str>) -> PeakOutcome {
        PeakOutcome {
            peak_id: id.to_string(),
            results: Vec::new(),
            error: error.map(str::to_string),
            index_status: None,
        }
    }

    #[test]
    fn test_partial_results_keep_arrival_order() {
        let mut partial = PartialResults::new();
        partial.push(outcome("p2", None));
        partial.push(outcome("p1", Some("timeout")));
        partial.push(outcome("p3", None));

        let ids: Vec<&str> = partial.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["p2", "p1", "p3"]);
        assert_eq!(partial.len(), 3);
        assert!(partial.had_errors());
        assert_eq!(partial.index_unavailable(), None);
    }

    #[test]
    fn test_partial_results_remember_index_status() {
        let mut partial = PartialResults::new();
        partial.push(PeakOutcome {
            index_status: Some(BroadIndexStatus::NotBuilt),
            ..outcome("p1", Some("broad index is not ready"))
        });
        assert_eq!(partial.index_unavailable(), Some(&BroadIndexStatus::NotBuilt));
    }

    #[test]
    fn test_no_errors() {
        let mut partial = PartialResults::new();
        assert!(partial.is_empty());
        partial.push(outcome("p1", None));
        assert!(!partial.had_errors());
    }

    #[test]
    fn test_selection_tracker() {
        let tracker = SelectionTracker::new();
        let first = tracker.select();
        assert!(tracker.is_current(first));

        let second = tracker.select();
        assert_ne!(first, second);
        assert!(!tracker.is_current(first));
        assert!(tracker.is_current(second));
    }

    #[test]
    fn test_outcome_wire_format() {
        let json = serde_json::to_value(outcome("p1", None)).unwrap();
        assert_eq!(json["peakId"], "p1");
        assert!(json.get("error").is_none());
        assert!(json.get("indexStatus").is_none());
    }
}
