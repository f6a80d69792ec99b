use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::Config,
    library::{EntryDetail, EntrySummary, LibraryInfo},
    semantic::{
        BroadIndexStatus, ComparisonRow, LibrarySelector, MatchResult, SearchError,
        SimilaritySearchService,
    },
};

use super::{backend::*, errors::AppError};

/// Runs searches in-process.
///
/// Library loads and ranking are CPU and file bound, so every call runs on
/// the blocking pool and the async workers stay free for status polls.
pub struct LocalBackend {
    service: Arc<SimilaritySearchService>,
}

impl LocalBackend {
    pub fn new(service: Arc<SimilaritySearchService>) -> Self {
        Self { service }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&SimilaritySearchService) -> Result<T, SearchError> + Send + 'static,
        T: Send + 'static,
    {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(anyhow::Error::from)?
            .map_err(Into::into)
    }

    fn top_n(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.service.config().search.default_top_n)
    }
}

#[async_trait]
impl SearchBackend for LocalBackend {
    async fn libraries(&self) -> Result<Vec<LibraryInfo>, AppError> {
        self.blocking(|service| service.list_libraries()).await
    }

    async fn entries(&self, library_id: String) -> Result<Vec<EntrySummary>, AppError> {
        self.blocking(move |service| service.library_entries(Some(&library_id)))
            .await
    }

    async fn entry(&self, library_id: String, entry_id: String) -> Result<EntryDetail, AppError> {
        self.blocking(move |service| service.library_entry(Some(&library_id), &entry_id))
            .await
    }

    async fn broad_index_status(&self) -> Result<BroadIndexStatus, AppError> {
        Ok(self.service.broad_status())
    }

    async fn build_broad_index(&self) -> Result<BroadIndexStatus, AppError> {
        // the build itself runs on its own thread
        Ok(self.service.request_broad_build())
    }

    async fn search_embedding(&self, request: SearchRequest) -> Result<Vec<MatchResult>, AppError> {
        let top_n = self.top_n(request.top_n);
        self.blocking(move |service| {
            let selector = LibrarySelector::Curated(request.library_id.clone());
            service.search_spectrum(&request.spectrum(), &selector, top_n)
        })
        .await
    }

    async fn search_broad(&self, request: SearchRequest) -> Result<Vec<MatchResult>, AppError> {
        let top_n = self.top_n(request.top_n);
        self.blocking(move |service| {
            service.search_spectrum(&request.spectrum(), &LibrarySelector::Broad, top_n)
        })
        .await
    }

    async fn search_fragment(
        &self,
        request: FragmentSearchRequest,
    ) -> Result<Vec<MatchResult>, AppError> {
        let top_n = self.top_n(request.top_n);
        self.blocking(move |service| {
            service.fragment_search(
                &request.spectrum(),
                request.library_id.as_deref(),
                request.tolerance,
                top_n,
            )
        })
        .await
    }

    async fn compare(
        &self,
        request: FragmentSearchRequest,
    ) -> Result<Vec<ComparisonRow>, AppError> {
        let top_n = self.top_n(request.top_n);
        self.blocking(move |service| {
            service.compare_spectrum(
                &request.spectrum(),
                request.library_id.as_deref(),
                request.tolerance,
                top_n,
            )
        })
        .await
    }

    async fn config(&self) -> Result<Config, AppError> {
        Ok(self.service.config().clone())
    }
}
