//! Background construction of the broad reference index.
//!
//! State machine:
//!
//! ```text
//! NotBuilt ──build()──▶ Building ──▶ Ready
//!                          │  ▲
//!                          ▼  │ build()
//!                         Error
//! ```
//!
//! At most one build runs at a time. `build()` while `Building` or `Ready`
//! only reports the current status. Observers poll [`BroadIndexBuilder::status`].

use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mgf;
use crate::semantic::index::CompoundInfo;
use crate::semantic::matrix::BroadIndex;
use crate::semantic::vectorize::PeakVectorizer;
use crate::spectrum::Spectrum;

const PROGRESS_LOADING: u8 = 5;
const PROGRESS_LOADED: u8 = 10;
const PROGRESS_VECTORIZED: u8 = 95;

/// A reference spectrum to be indexed.
#[derive(Debug, Clone)]
pub struct CorpusRecord {
    pub compound: CompoundInfo,
    pub spectrum: Spectrum,
}

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("corpus unavailable: {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corpus holds no spectra: {0}")]
    Empty(PathBuf),
}

/// Where the broad index gets its reference spectra from.
pub trait CorpusSource: Send + Sync {
    /// Human readable origin, used in progress messages
    fn describe(&self) -> String;

    fn load(&self) -> Result<Vec<CorpusRecord>, CorpusError>;
}

/// GNPS-style MGF collection on disk.
pub struct MgfCorpus {
    path: PathBuf,
    source: String,
}

impl MgfCorpus {
    pub fn new(path: PathBuf) -> Self {
        let source = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "broad".to_string());
        Self { path, source }
    }
}

impl CorpusSource for MgfCorpus {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Vec<CorpusRecord>, CorpusError> {
        let records = mgf::read_mgf(&self.path).map_err(|source| CorpusError::Unavailable {
            path: self.path.clone(),
            source,
        })?;
        if records.is_empty() {
            return Err(CorpusError::Empty(self.path.clone()));
        }

        Ok(records
            .into_iter()
            .enumerate()
            .map(|(ordinal, record)| {
                let raw_name = record.name().unwrap_or_default().to_string();
                let (name, split_formula) = match mgf::split_gnps_name(&raw_name) {
                    Some(split) => (split.common, Some(split.formula)),
                    None => (mgf::strip_adduct(&raw_name), None),
                };

                CorpusRecord {
                    compound: CompoundInfo {
                        id: record
                            .get("SPECTRUMID")
                            .map(str::to_string)
                            .unwrap_or_else(|| ordinal.to_string()),
                        name,
                        formula: record
                            .get("FORMULA")
                            .map(str::to_string)
                            .or(split_formula)
                            .filter(|f| !f.is_empty()),
                        source: self.source.clone(),
                        tox_score: None,
                    },
                    spectrum: record.to_spectrum(),
                }
            })
            .collect())
    }
}

/// Build lifecycle, including the finished index.
#[derive(Debug, Clone)]
pub enum BroadIndexState {
    NotBuilt,
    Building { progress: u8, message: String },
    Ready { count: usize, index: Arc<BroadIndex> },
    Error { message: String },
}

impl BroadIndexState {
    pub fn status(&self) -> BroadIndexStatus {
        match self {
            BroadIndexState::NotBuilt => BroadIndexStatus::NotBuilt,
            BroadIndexState::Building { progress, message } => BroadIndexStatus::Building {
                progress: *progress,
                message: message.clone(),
            },
            BroadIndexState::Ready { count, .. } => BroadIndexStatus::Ready { count: *count },
            BroadIndexState::Error { message } => BroadIndexStatus::Error {
                message: message.clone(),
            },
        }
    }
}

/// Wire form of [`BroadIndexState`], without the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BroadIndexStatus {
    NotBuilt,
    Building { progress: u8, message: String },
    Ready { count: usize },
    Error { message: String },
}

impl BroadIndexStatus {
    /// `Ready` or `Error`: polling can stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BroadIndexStatus::Ready { .. } | BroadIndexStatus::Error { .. })
    }
}

/// Owns the broad index state and runs builds on a background thread.
pub struct BroadIndexBuilder {
    state: Arc<RwLock<BroadIndexState>>,
    vectorizer: PeakVectorizer,
    chunk_size: usize,
}

impl BroadIndexBuilder {
    pub fn new(vectorizer: PeakVectorizer, chunk_size: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(BroadIndexState::NotBuilt)),
            vectorizer,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn status(&self) -> BroadIndexStatus {
        read_state(&self.state).status()
    }

    /// The finished index, or the current status when not `Ready`.
    pub fn ready_index(&self) -> Result<Arc<BroadIndex>, BroadIndexStatus> {
        match &*read_state(&self.state) {
            BroadIndexState::Ready { index, .. } => Ok(index.clone()),
            other => Err(other.status()),
        }
    }

    /// Start a build unless one is running or already finished.
    ///
    /// Returns immediately with the resulting status.
    pub fn build(&self, source: Arc<dyn CorpusSource>) -> BroadIndexStatus {
        {
            let mut state = write_state(&self.state);
            match &*state {
                BroadIndexState::Building { .. } | BroadIndexState::Ready { .. } => {
                    return state.status();
                }
                BroadIndexState::NotBuilt | BroadIndexState::Error { .. } => {}
            }
            *state = BroadIndexState::Building {
                progress: 0,
                message: "Queued".to_string(),
            };
        }

        log::info!("Starting broad index build from {}", source.describe());

        let job = BuildJob {
            state: self.state.clone(),
            vectorizer: self.vectorizer.clone(),
            chunk_size: self.chunk_size,
        };
        let spawned = std::thread::Builder::new()
            .name("broad-index-build".to_string())
            .spawn(move || job.run(source.as_ref()));

        match spawned {
            Ok(handle) => {
                // handle build panics
                let state = self.state.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle.join() {
                        log::error!("broad index build panicked: {err:?}");
                        *write_state(&state) = BroadIndexState::Error {
                            message: "build worker panicked".to_string(),
                        };
                    }
                });
            }
            Err(err) => {
                log::error!("failed to spawn broad index build: {err}");
                *write_state(&self.state) = BroadIndexState::Error {
                    message: format!("failed to start build: {err}"),
                };
            }
        }

        self.status()
    }
}

fn read_state(state: &RwLock<BroadIndexState>) -> RwLockReadGuard<'_, BroadIndexState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_state(state: &RwLock<BroadIndexState>) -> RwLockWriteGuard<'_, BroadIndexState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct BuildJob {
    state: Arc<RwLock<BroadIndexState>>,
    vectorizer: PeakVectorizer,
    chunk_size: usize,
}

impl BuildJob {
    fn run(&self, source: &dyn CorpusSource) {
        let next = match self.materialize(source) {
            Ok(index) => {
                log::info!("Broad index ready with {} spectra", index.len());
                BroadIndexState::Ready {
                    count: index.len(),
                    index: Arc::new(index),
                }
            }
            Err(message) => {
                log::error!("Broad index build failed: {message}");
                BroadIndexState::Error { message }
            }
        };
        *write_state(&self.state) = next;
    }

    /// Progress never moves backwards.
    fn advance(&self, progress: u8, message: impl Into<String>) {
        let message = message.into();
        log::debug!("broad index build {progress}%: {message}");

        let mut state = write_state(&self.state);
        if let BroadIndexState::Building {
            progress: current,
            message: current_message,
        } = &mut *state
        {
            *current = (*current).max(progress.min(100));
            *current_message = message;
        }
    }

    fn materialize(&self, source: &dyn CorpusSource) -> Result<BroadIndex, String> {
        self.advance(
            PROGRESS_LOADING,
            format!("Loading reference corpus from {}", source.describe()),
        );
        let records = source.load().map_err(|e| e.to_string())?;
        let total = records.len();
        log::info!("Loaded {total} reference spectra from {}", source.describe());
        self.advance(PROGRESS_LOADED, format!("Loaded {total} reference spectra"));

        let mut index = BroadIndex::with_capacity(self.vectorizer.dim(), total);
        let mut skipped = 0;
        let mut done = 0;

        for chunk in records.chunks(self.chunk_size) {
            let embeddings: Vec<_> = chunk
                .par_iter()
                .map(|record| self.vectorizer.vectorize(&record.spectrum.peaks))
                .collect();

            for (record, embedding) in chunk.iter().zip(embeddings) {
                if embedding.is_zero() {
                    skipped += 1;
                    continue;
                }
                index
                    .push(record.compound.clone(), &embedding)
                    .map_err(|e| e.to_string())?;
            }

            done += chunk.len();
            let span = (PROGRESS_VECTORIZED - PROGRESS_LOADED) as usize;
            let progress = PROGRESS_LOADED as usize + span * done / total.max(1);
            self.advance(progress as u8, format!("Vectorized {done}/{total} spectra"));
        }

        if skipped > 0 {
            log::warn!("Skipped {skipped} corpus spectra without usable peaks");
        }
        if index.is_empty() {
            return Err("reference corpus contains no usable spectra".to_string());
        }

        self.advance(PROGRESS_VECTORIZED, "Assembling matrix");
        Ok(index)
    }
}
