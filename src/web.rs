use crate::{
    app::{
        backend::{CompareResponse, SearchResponse},
        AppError, FragmentSearchRequest, SearchBackend, SearchRequest,
    },
    config::Config,
    library::{EntryDetail, EntrySummary, LibraryError, LibraryInfo},
    semantic::{BroadIndexStatus, SearchError},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    backend: Arc<dyn SearchBackend>,
}

pub fn router(backend: Arc<dyn SearchBackend>) -> Router {
    let shared_state = Arc::new(SharedState { backend });

    Router::new()
        .route("/api/libraries", get(libraries))
        .route("/api/libraries/:library_id/entries", get(entries))
        .route("/api/libraries/:library_id/entries/:entry_id", get(entry))
        .route("/api/broad_index/status", get(broad_index_status))
        .route("/api/broad_index/build", post(build_broad_index))
        .route("/api/search/embedding", post(search_embedding))
        .route("/api/search/broad", post(search_broad))
        .route("/api/search/fragment", post(search_fragment))
        .route("/api/search/compare", post(compare))
        .route("/api/config", get(get_config))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

/// Serve the HTTP API on `listen` until Ctrl+C or SIGTERM.
pub async fn start_daemon(backend: Arc<dyn SearchBackend>, listen: &str) -> anyhow::Result<()> {
    let app = router(backend);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("listening on {listen}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let message = self.0.to_string();
        match self.0 {
            AppError::Search(SearchError::Library(
                LibraryError::Unknown(_) | LibraryError::UnknownEntry { .. },
            ))
            | AppError::Search(SearchError::NoLibraries) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message })))
            }
            AppError::Search(SearchError::BroadIndexUnavailable(status)) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": message, "status": status })),
            ),
            AppError::Remote(_) | AppError::Reqwest(_) => {
                log::error!("{message}");
                (StatusCode::BAD_GATEWAY, Json(json!({ "error": message })))
            }
            _ => {
                log::error!("{message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": message })),
                )
            }
        }
        .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn libraries(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<Vec<LibraryInfo>>, HttpError> {
    Ok(Json(state.backend.libraries().await?))
}

async fn entries(
    State(state): State<Arc<SharedState>>,
    Path(library_id): Path<String>,
) -> Result<Json<Vec<EntrySummary>>, HttpError> {
    Ok(Json(state.backend.entries(library_id).await?))
}

async fn entry(
    State(state): State<Arc<SharedState>>,
    Path((library_id, entry_id)): Path<(String, String)>,
) -> Result<Json<EntryDetail>, HttpError> {
    Ok(Json(state.backend.entry(library_id, entry_id).await?))
}

async fn broad_index_status(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<BroadIndexStatus>, HttpError> {
    Ok(Json(state.backend.broad_index_status().await?))
}

async fn build_broad_index(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<BroadIndexStatus>, HttpError> {
    Ok(Json(state.backend.build_broad_index().await?))
}

async fn search_embedding(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("embedding search: {} peaks", payload.peaks.len());
    let results = state.backend.search_embedding(payload).await?;
    Ok(Json(SearchResponse { results }))
}

async fn search_broad(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("broad search: {} peaks", payload.peaks.len());
    let results = state.backend.search_broad(payload).await?;
    Ok(Json(SearchResponse { results }))
}

async fn search_fragment(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<FragmentSearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("fragment search: {} peaks", payload.peaks.len());
    let results = state.backend.search_fragment(payload).await?;
    Ok(Json(SearchResponse { results }))
}

async fn compare(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<FragmentSearchRequest>,
) -> Result<Json<CompareResponse>, HttpError> {
    let rows = state.backend.compare(payload).await?;
    Ok(Json(CompareResponse { rows }))
}

async fn get_config(State(state): State<Arc<SharedState>>) -> Result<Json<Config>, HttpError> {
    Ok(Json(state.backend.config().await?))
}
