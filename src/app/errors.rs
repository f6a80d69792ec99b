use crate::semantic::SearchError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Error reported by a remote daemon
    #[error("remote error: {0}")]
    Remote(String),

    #[error("reqwest error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
