use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    config::Config,
    library::{EntryDetail, EntrySummary, LibraryInfo},
    semantic::{BroadIndexStatus, ComparisonRow, MatchResult},
    spectrum::{sanitize_peaks, Peak, Spectrum},
};

use super::errors::AppError;

/// Operations shared by the in-process service and a remote daemon.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn libraries(&self) -> Result<Vec<LibraryInfo>, AppError>;

    async fn entries(&self, library_id: String) -> Result<Vec<EntrySummary>, AppError>;

    async fn entry(&self, library_id: String, entry_id: String) -> Result<EntryDetail, AppError>;

    async fn broad_index_status(&self) -> Result<BroadIndexStatus, AppError>;

    /// Request a broad index build. Answers with the status right after the
    /// request, `Building` or whatever state the index was already in.
    async fn build_broad_index(&self) -> Result<BroadIndexStatus, AppError>;

    async fn search_embedding(&self, request: SearchRequest) -> Result<Vec<MatchResult>, AppError>;

    async fn search_broad(&self, request: SearchRequest) -> Result<Vec<MatchResult>, AppError>;

    async fn search_fragment(
        &self,
        request: FragmentSearchRequest,
    ) -> Result<Vec<MatchResult>, AppError>;

    async fn compare(&self, request: FragmentSearchRequest)
        -> Result<Vec<ComparisonRow>, AppError>;

    async fn config(&self) -> Result<Config, AppError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default, deserialize_with = "lenient_peaks")]
    pub peaks: Vec<Peak>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
    /// Ignored by broad searches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<String>,
}

impl SearchRequest {
    pub fn spectrum(&self) -> Spectrum {
        Spectrum::from_peaks(self.peaks.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentSearchRequest {
    #[serde(default, deserialize_with = "lenient_peaks")]
    pub peaks: Vec<Peak>,
    #[serde(default)]
    pub precursor_mz: f64,
    /// Matching tolerance in Da, the configured one when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<String>,
}

impl FragmentSearchRequest {
    pub fn spectrum(&self) -> Spectrum {
        Spectrum::new(self.peaks.clone(), self.precursor_mz, 0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<MatchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareResponse {
    pub rows: Vec<ComparisonRow>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PeakRepr {
    Object { mz: f64, intensity: f64 },
    Pair(f64, f64),
}

/// Accepts `[{mz, intensity}]` or `[[mz, intensity]]`. Anything else, or a
/// list holding a single invalid peak, becomes the empty list.
fn lenient_peaks<'de, D>(deserializer: D) -> Result<Vec<Peak>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;

    let peaks = match serde_json::from_value::<Vec<PeakRepr>>(value) {
        Ok(peaks) => peaks
            .into_iter()
            .map(|p| match p {
                PeakRepr::Object { mz, intensity } | PeakRepr::Pair(mz, intensity) => {
                    Peak::new(mz, intensity)
                }
            })
            .collect(),
        Err(err) => {
            log::debug!("ignoring malformed peaks: {err}");
            return Ok(Vec::new());
        }
    };

    Ok(sanitize_peaks(peaks).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_as_objects_or_pairs() {
        let request: SearchRequest = serde_json::from_str(
            r#"{"peaks": [{"mz": 107.05, "intensity": 100}, [145.06, 80]], "topN": 3}"#,
        )
        .unwrap();
        assert_eq!(
            request.peaks,
            vec![Peak::new(107.05, 100.0), Peak::new(145.06, 80.0)]
        );
        assert_eq!(request.top_n, Some(3));
        assert_eq!(request.library_id, None);
    }

    #[test]
    fn test_malformed_peaks_become_empty() {
        for body in [
            r#"{"peaks": "107.05:100"}"#,
            r#"{"peaks": [{"mz": "a"}]}"#,
            r#"{"peaks": null}"#,
            r#"{"peaks": [[100, 1], [-5, 1]]}"#,
            r#"{}"#,
        ] {
            let request: FragmentSearchRequest = serde_json::from_str(body).unwrap();
            assert!(request.peaks.is_empty(), "{body}");
        }
    }

    #[test]
    fn test_fragment_request_defaults() {
        let request: FragmentSearchRequest =
            serde_json::from_str(r#"{"peaks": [[100, 1]], "precursorMz": 222.1}"#).unwrap();
        assert_eq!(request.tolerance, None);
        assert_eq!(request.spectrum().precursor_mz, 222.1);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["precursorMz"], 222.1);
        assert!(json.get("tolerance").is_none());
    }
}
