//! Similarity search service.
//!
//! Owns the vectorizer, the lazily loaded curated libraries and the broad
//! index builder. Every query is vectorized once and ranked against the
//! selected collection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{Config, LibraryConfig};
use crate::library::{EntryDetail, EntrySummary, Library, LibraryError, LibraryInfo};
use crate::semantic::broad::{BroadIndexBuilder, BroadIndexStatus, CorpusSource, MgfCorpus};
use crate::semantic::compare::{self, ComparisonRow};
use crate::semantic::index::{IndexError, MatchResult};
use crate::semantic::vectorize::{Embedding, PeakVectorizer};
use crate::spectrum::{sanitize_peaks, Peak, Spectrum};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{0}")]
    Library(#[from] LibraryError),

    #[error("no library configured")]
    NoLibraries,

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("broad index is not ready")]
    BroadIndexUnavailable(BroadIndexStatus),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which reference collection a query runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySelector {
    /// A curated library by id; `None` picks the default library.
    Curated(Option<String>),
    Broad,
}

impl Default for LibrarySelector {
    fn default() -> Self {
        LibrarySelector::Curated(None)
    }
}

pub struct SimilaritySearchService {
    config: Config,
    vectorizer: PeakVectorizer,
    /// Curated libraries, loaded on first use.
    libraries: Mutex<HashMap<String, Arc<Library>>>,
    broad: BroadIndexBuilder,
}

impl SimilaritySearchService {
    pub fn new(config: Config) -> Self {
        let vectorizer = PeakVectorizer::new(config.vectorizer);
        let broad = BroadIndexBuilder::new(vectorizer.clone(), config.broad_index.chunk_size);

        Self {
            config,
            vectorizer,
            libraries: Mutex::new(HashMap::new()),
            broad,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vectorize(&self, peaks: &[Peak]) -> Embedding {
        self.vectorizer.vectorize(peaks)
    }

    /// Configured libraries with their spectrum counts.
    ///
    /// A library that fails to load is still listed, with zero spectra.
    pub fn list_libraries(&self) -> Result<Vec<LibraryInfo>, SearchError> {
        let default_id = self.config.default_library().map(|l| l.id.as_str());

        self.config
            .libraries
            .iter()
            .map(|library_config| {
                let n_spectra = match self.load_library(library_config) {
                    Ok(library) => library.len(),
                    Err(SearchError::Library(err)) => {
                        log::warn!("library '{}' unavailable: {err}", library_config.id);
                        0
                    }
                    Err(err) => return Err(err),
                };

                Ok(LibraryInfo {
                    id: library_config.id.clone(),
                    name: library_config.name.clone(),
                    n_spectra,
                    is_default: Some(library_config.id.as_str()) == default_id,
                })
            })
            .collect()
    }

    /// Resolve and load a curated library, the default one for `None`.
    pub fn library(&self, id: Option<&str>) -> Result<Arc<Library>, SearchError> {
        let library_config = match id {
            Some(id) => self
                .config
                .library(id)
                .ok_or_else(|| LibraryError::Unknown(id.to_string()))?,
            None => self
                .config
                .default_library()
                .ok_or(SearchError::NoLibraries)?,
        };
        self.load_library(library_config)
    }

    fn cached_library(&self, id: &str) -> Result<Option<Arc<Library>>, SearchError> {
        let libraries = self
            .libraries
            .lock()
            .map_err(|e| SearchError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(libraries.get(id).cloned())
    }

    /// Loads outside the cache lock so a slow load does not hold up
    /// queries on libraries that are already cached.
    fn load_library(&self, library_config: &LibraryConfig) -> Result<Arc<Library>, SearchError> {
        if let Some(library) = self.cached_library(&library_config.id)? {
            return Ok(library);
        }

        let metadata_path = library_config
            .metadata_csv
            .as_deref()
            .map(|p| self.config.resolve(p));
        let library = Arc::new(Library::load(
            &library_config.id,
            &self.config.resolve(&library_config.mgf),
            metadata_path.as_deref(),
            &self.vectorizer,
        )?);

        let mut libraries = self
            .libraries
            .lock()
            .map_err(|e| SearchError::Internal(format!("Lock poisoned: {}", e)))?;
        // a concurrent load of the same library may have finished first
        Ok(libraries
            .entry(library_config.id.clone())
            .or_insert(library)
            .clone())
    }

    /// Entries of a curated library, the default one for `None`.
    pub fn library_entries(&self, id: Option<&str>) -> Result<Vec<EntrySummary>, SearchError> {
        Ok(self.library(id)?.entries())
    }

    pub fn library_entry(
        &self,
        id: Option<&str>,
        entry_id: &str,
    ) -> Result<EntryDetail, SearchError> {
        Ok(self.library(id)?.entry(entry_id)?)
    }

    /// Embedding search.
    ///
    /// Empty or malformed peak lists give an empty result. The broad index
    /// must be `Ready`; otherwise its status is returned as the error.
    pub fn search_spectrum(
        &self,
        spectrum: &Spectrum,
        selector: &LibrarySelector,
        top_n: usize,
    ) -> Result<Vec<MatchResult>, SearchError> {
        let Some(query) = self.query_embedding(spectrum) else {
            return Ok(Vec::new());
        };

        let results = match selector {
            LibrarySelector::Curated(id) => {
                self.library(id.as_deref())?.index().rank(&query, top_n)?
            }
            LibrarySelector::Broad => self
                .broad
                .ready_index()
                .map_err(SearchError::BroadIndexUnavailable)?
                .rank(&query, top_n)?,
        };

        log::debug!(
            "embedding search over {selector:?} returned {} results",
            results.len()
        );
        Ok(results)
    }

    /// Fragment-overlap search against a curated library.
    pub fn fragment_search(
        &self,
        spectrum: &Spectrum,
        library_id: Option<&str>,
        tolerance: Option<f64>,
        top_n: usize,
    ) -> Result<Vec<MatchResult>, SearchError> {
        let Some(peaks) = usable_peaks(spectrum) else {
            return Ok(Vec::new());
        };

        let query = Spectrum::new(peaks, spectrum.precursor_mz, spectrum.retention_time);
        let tolerance = tolerance.unwrap_or(self.config.search.fragment_tolerance);
        Ok(self.library(library_id)?.fragment_rank(&query, tolerance, top_n))
    }

    /// Merge two rankings of the same query.
    pub fn compare(
        &self,
        embedding_results: &[MatchResult],
        fragment_results: &[MatchResult],
    ) -> Vec<ComparisonRow> {
        compare::compare(
            embedding_results,
            fragment_results,
            &self.config.search.thresholds(),
        )
    }

    /// Run both searches on one curated library and compare them.
    pub fn compare_spectrum(
        &self,
        spectrum: &Spectrum,
        library_id: Option<&str>,
        tolerance: Option<f64>,
        top_n: usize,
    ) -> Result<Vec<ComparisonRow>, SearchError> {
        let selector = LibrarySelector::Curated(library_id.map(str::to_string));
        let embedding_results = self.search_spectrum(spectrum, &selector, top_n)?;
        let fragment_results = self.fragment_search(spectrum, library_id, tolerance, top_n)?;
        Ok(self.compare(&embedding_results, &fragment_results))
    }

    pub fn broad_status(&self) -> BroadIndexStatus {
        self.broad.status()
    }

    /// Build the broad index from the configured corpus.
    pub fn request_broad_build(&self) -> BroadIndexStatus {
        let corpus = MgfCorpus::new(self.config.resolve(&self.config.broad_index.corpus));
        self.request_broad_build_from(Arc::new(corpus))
    }

    pub fn request_broad_build_from(&self, source: Arc<dyn CorpusSource>) -> BroadIndexStatus {
        self.broad.build(source)
    }

    fn query_embedding(&self, spectrum: &Spectrum) -> Option<Embedding> {
        let peaks = usable_peaks(spectrum)?;
        let embedding = self.vectorizer.vectorize(&peaks);
        (!embedding.is_zero()).then_some(embedding)
    }
}

fn usable_peaks(spectrum: &Spectrum) -> Option<Vec<Peak>> {
    sanitize_peaks(spectrum.peaks.clone()).filter(|peaks| !peaks.is_empty())
}
