use crate::{
    app::{backend::SearchBackend, local::LocalBackend, remote::RemoteBackend},
    config::Config,
    semantic::SimilaritySearchService,
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;

/// Address of a running daemon; selects the remote backend when set
pub const ADDR_ENV: &str = "SPECSEARCH_ADDR";
pub const BASE_PATH_ENV: &str = "SPECSEARCH_BASE_PATH";

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Remote backend when `SPECSEARCH_ADDR` is set, in-process otherwise.
    pub fn create_backend() -> Result<Arc<dyn SearchBackend>> {
        if let Ok(addr) = std::env::var(ADDR_ENV) {
            log::info!("Using remote backend: {}", addr);
            return Ok(Arc::new(RemoteBackend::new(&addr)));
        }

        let service = Self::create_service()?;
        Ok(Arc::new(LocalBackend::new(service)))
    }

    pub fn create_service() -> Result<Arc<SimilaritySearchService>> {
        let config = Self::create_config()?;
        Ok(Arc::new(SimilaritySearchService::new(config)))
    }

    /// Load `config.yaml` from the base path, creating both when missing.
    pub fn create_config() -> Result<Config> {
        let base_path = Self::get_base_path()?;

        // Ensure base directory exists
        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Config::load_with(&base_path)
            .with_context(|| format!("Failed to load config from {}", base_path.display()))
    }

    /// Get the base path for the application
    pub fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var(BASE_PATH_ENV) {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/spectral-search"))
    }
}
