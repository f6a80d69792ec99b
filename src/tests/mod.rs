
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::app::{AppError, FragmentSearchRequest, LocalBackend, SearchBackend, SearchRequest};
use crate::config::{Config, LibraryConfig};
use crate::library::{EntryDetail, EntrySummary, LibraryError, LibraryInfo};
use crate::semantic::{
    BroadIndexStatus, ComparisonRow, MatchResult, SearchError, SimilaritySearchService,
};

/// Curated library of the end-to-end scenario: A is the query itself, B is
/// disjoint in m/z, C is A with every intensity halved.
pub const SCENARIO_LIBRARY: &str = "\
BEGIN IONS
NAME=Compound A [M+H]+
SPECTRUMID=A
107.05 100
145.06 80
181.09 40
END IONS
BEGIN IONS
NAME=Compound B [M+H]+
SPECTRUMID=B
500.0 100
700.0 80
900.0 40
END IONS
BEGIN IONS
NAME=Compound C [M+H]+
SPECTRUMID=C
107.05 50
145.06 40
181.09 20
END IONS
";

pub const SCENARIO_PEAKS: [(f64, f64); 3] = [(107.05, 100.0), (145.06, 80.0), (181.09, 40.0)];

/// Creates a service over an isolated base directory holding the scenario
/// library (also used as broad corpus).
pub fn create_service() -> (Arc<SimilaritySearchService>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    std::fs::write(tmp.path().join("scenario.mgf"), SCENARIO_LIBRARY).unwrap();

    let mut config = Config::load_with(tmp.path()).expect("failed to load config");
    config.libraries = vec![LibraryConfig {
        id: "scenario".to_string(),
        name: "Scenario".to_string(),
        mgf: "scenario.mgf".to_string(),
        metadata_csv: None,
        default: true,
    }];
    config.broad_index.corpus = "scenario.mgf".to_string();
    config.broad_index.poll_interval_ms = 10;

    (Arc::new(SimilaritySearchService::new(config)), tmp)
}

pub fn create_backend() -> (Arc<dyn SearchBackend>, tempfile::TempDir) {
    let (service, tmp) = create_service();
    (Arc::new(LocalBackend::new(service)), tmp)
}

/// Backend answering status polls from a script and failing searches for
/// peaks whose first m/z is listed in `failing_mz`.
#[derive(Default)]
pub struct ScriptedBackend {
    pub statuses: Mutex<VecDeque<Result<BroadIndexStatus, String>>>,
    pub status_calls: Mutex<usize>,
    pub failing_mz: Vec<f64>,
    pub searched: Mutex<Vec<f64>>,
}

impl ScriptedBackend {
    pub fn with_statuses(statuses: Vec<Result<BroadIndexStatus, String>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            ..Default::default()
        }
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<MatchResult>, AppError> {
        let first = request.peaks.first().map(|p| p.mz).unwrap_or_default();
        self.searched.lock().unwrap().push(first);

        if self.failing_mz.contains(&first) {
            return Err(AppError::Remote(format!("search for {first} failed")));
        }
        Ok(vec![MatchResult {
            id: format!("{first}"),
            name: format!("match for {first}"),
            formula: None,
            similarity: 0.9,
            n_matched_peaks: None,
            source: "scripted".to_string(),
            tox_score: None,
        }])
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    async fn libraries(&self) -> Result<Vec<LibraryInfo>, AppError> {
        Ok(Vec::new())
    }

    async fn entries(&self, _library_id: String) -> Result<Vec<EntrySummary>, AppError> {
        Ok(Vec::new())
    }

    async fn entry(&self, library: String, entry: String) -> Result<EntryDetail, AppError> {
        Err(SearchError::Library(LibraryError::UnknownEntry { library, entry }).into())
    }

    async fn broad_index_status(&self) -> Result<BroadIndexStatus, AppError> {
        *self.status_calls.lock().unwrap() += 1;
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        match next {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(AppError::Remote(message)),
            None => Ok(BroadIndexStatus::NotBuilt),
        }
    }

    async fn build_broad_index(&self) -> Result<BroadIndexStatus, AppError> {
        self.broad_index_status().await
    }

    async fn search_embedding(&self, request: SearchRequest) -> Result<Vec<MatchResult>, AppError> {
        tokio::task::yield_now().await;
        self.search(&request)
    }

    async fn search_broad(&self, request: SearchRequest) -> Result<Vec<MatchResult>, AppError> {
        self.search(&request)
    }

    async fn search_fragment(
        &self,
        _request: FragmentSearchRequest,
    ) -> Result<Vec<MatchResult>, AppError> {
        Ok(Vec::new())
    }

    async fn compare(
        &self,
        _request: FragmentSearchRequest,
    ) -> Result<Vec<ComparisonRow>, AppError> {
        Ok(Vec::new())
    }

    async fn config(&self) -> Result<Config, AppError> {
        Ok(Config::default())
    }
}
