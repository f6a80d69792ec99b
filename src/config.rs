use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::compare::{
    ConfidenceThresholds, DEFAULT_GREY_BAND, DEFAULT_HIGH_BAND, DEFAULT_LOW_CONFIDENCE_MIN_PEAKS,
    DEFAULT_LOW_CONFIDENCE_SIMILARITY,
};
use crate::semantic::fragment::DEFAULT_TOLERANCE;
use crate::semantic::VectorizerParams;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_TOP_N: usize = 5;
/// Spectra vectorized per progress step of a broad build
const DEFAULT_CHUNK_SIZE: usize = 1024;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1500;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Search defaults and agreement heuristics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_n")]
    pub default_top_n: usize,

    /// Fragment matching tolerance in Da
    #[serde(default = "default_fragment_tolerance")]
    pub fragment_tolerance: f64,

    #[serde(default = "default_low_confidence_similarity")]
    pub low_confidence_similarity: f32,

    #[serde(default = "default_low_confidence_min_peaks")]
    pub low_confidence_min_peaks: usize,

    #[serde(default = "default_high_band")]
    pub high_similarity_band: f32,

    #[serde(default = "default_grey_band")]
    pub grey_similarity_band: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_n: DEFAULT_TOP_N,
            fragment_tolerance: DEFAULT_TOLERANCE,
            low_confidence_similarity: DEFAULT_LOW_CONFIDENCE_SIMILARITY,
            low_confidence_min_peaks: DEFAULT_LOW_CONFIDENCE_MIN_PEAKS,
            high_similarity_band: DEFAULT_HIGH_BAND,
            grey_similarity_band: DEFAULT_GREY_BAND,
        }
    }
}

impl SearchConfig {
    pub fn thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds {
            low_confidence_similarity: self.low_confidence_similarity,
            low_confidence_min_peaks: self.low_confidence_min_peaks,
            high_band: self.high_similarity_band,
            grey_band: self.grey_similarity_band,
        }
    }
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

fn default_fragment_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_low_confidence_similarity() -> f32 {
    DEFAULT_LOW_CONFIDENCE_SIMILARITY
}

fn default_low_confidence_min_peaks() -> usize {
    DEFAULT_LOW_CONFIDENCE_MIN_PEAKS
}

fn default_high_band() -> f32 {
    DEFAULT_HIGH_BAND
}

fn default_grey_band() -> f32 {
    DEFAULT_GREY_BAND
}

/// A curated library on disk. Paths are relative to the base directory
/// unless absolute.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub id: String,
    pub name: String,
    pub mgf: String,
    #[serde(default)]
    pub metadata_csv: Option<String>,
    #[serde(default)]
    pub default: bool,
}

fn default_libraries() -> Vec<LibraryConfig> {
    vec![LibraryConfig {
        id: "ecrfs".to_string(),
        name: "EFSA/WFSR ECRFS".to_string(),
        mgf: "libraries/ECRFS_library_final.mgf".to_string(),
        metadata_csv: Some("libraries/ECRFS_metadata_final.csv".to_string()),
        default: true,
    }]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadIndexConfig {
    /// MGF corpus the broad index is built from
    #[serde(default = "default_corpus")]
    pub corpus: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Status poll interval used by clients following a build
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BroadIndexConfig {
    fn default() -> Self {
        Self {
            corpus: default_corpus(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

fn default_corpus() -> String {
    "libraries/gnps_broad.mgf".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub vectorizer: VectorizerParams,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default = "default_libraries")]
    pub libraries: Vec<LibraryConfig>,
    #[serde(default)]
    pub broad_index: BroadIndexConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            vectorizer: VectorizerParams::default(),
            search: SearchConfig::default(),
            libraries: default_libraries(),
            broad_index: BroadIndexConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let v = &self.vectorizer;
        if !(v.mz_low < v.mz_high) {
            return invalid(format!(
                "vectorizer.mz_low ({}) must be below vectorizer.mz_high ({})",
                v.mz_low, v.mz_high
            ));
        }
        if v.dim < 2 {
            return invalid(format!("vectorizer.dim must be at least 2, got {}", v.dim));
        }
        if !(v.sigma > 0.0) {
            return invalid(format!("vectorizer.sigma must be positive, got {}", v.sigma));
        }

        let s = &self.search;
        for (field, value) in [
            ("low_confidence_similarity", s.low_confidence_similarity),
            ("high_similarity_band", s.high_similarity_band),
            ("grey_similarity_band", s.grey_similarity_band),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!(
                    "search.{field} must be between 0.0 and 1.0, got {value}"
                ));
            }
        }
        if s.grey_similarity_band > s.high_similarity_band {
            return invalid("search.grey_similarity_band must not exceed search.high_similarity_band".to_string());
        }
        if !(s.fragment_tolerance >= 0.0) {
            return invalid(format!(
                "search.fragment_tolerance must not be negative, got {}",
                s.fragment_tolerance
            ));
        }

        if self.libraries.iter().filter(|l| l.default).count() > 1 {
            return invalid("only one library may be marked default".to_string());
        }
        for (idx, library) in self.libraries.iter().enumerate() {
            if library.id.trim().is_empty() {
                return invalid(format!("library #{} has an empty id", idx + 1));
            }
            if self.libraries[..idx].iter().any(|l| l.id == library.id) {
                return invalid(format!("library id '{}' is used twice", library.id));
            }
        }

        if self.broad_index.chunk_size == 0 {
            return invalid("broad_index.chunk_size must be greater than 0".to_string());
        }
        if self.broad_index.poll_interval_ms == 0 {
            return invalid("broad_index.poll_interval_ms must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults when missing.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path)?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE), config_str)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Resolve a configured path against the base directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    /// The library used when a request names none: the one flagged
    /// `default`, else the first configured.
    pub fn default_library(&self) -> Option<&LibraryConfig> {
        self.libraries
            .iter()
            .find(|l| l.default)
            .or_else(|| self.libraries.first())
    }

    pub fn library(&self, id: &str) -> Option<&LibraryConfig> {
        self.libraries.iter().find(|l| l.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.vectorizer.dim, 300);
        assert_eq!(config.search.default_top_n, 5);
        assert_eq!(config.broad_index.poll_interval_ms, 1500);
        assert_eq!(config.default_library().unwrap().id, "ecrfs");
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert_eq!(config.base_path, dir.path());
        assert_eq!(
            config.resolve("libraries/x.mgf"),
            dir.path().join("libraries/x.mgf")
        );
        assert_eq!(config.resolve("/abs/x.mgf"), PathBuf::from("/abs/x.mgf"));
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "search:\n  default_top_n: 10\nlibraries:\n  - id: a\n    name: A\n    mgf: a.mgf\n  - id: b\n    name: B\n    mgf: b.mgf\n    default: true\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.search.default_top_n, 10);
        assert_eq!(config.search.low_confidence_min_peaks, 5);
        assert_eq!(config.vectorizer.sigma, 1.2);
        assert_eq!(config.default_library().unwrap().id, "b");
        assert!(config.library("a").is_some());
        assert!(config.library("c").is_none());

        // upgraded file now carries every field
        let saved = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("poll_interval_ms"));
    }

    #[test]
    fn test_default_library_falls_back_to_first() {
        let mut config = Config::default();
        config.libraries[0].default = false;
        assert_eq!(config.default_library().unwrap().id, "ecrfs");

        config.libraries.clear();
        assert!(config.default_library().is_none());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.vectorizer.mz_low = 2000.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.vectorizer.sigma = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.low_confidence_similarity = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.grey_similarity_band = 0.9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.broad_index.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        let mut second = config.libraries[0].clone();
        second.id = "other".to_string();
        config.libraries.push(second);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        let mut duplicate = config.libraries[0].clone();
        duplicate.default = false;
        config.libraries.push(duplicate);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "search: [").unwrap();
        assert!(matches!(
            Config::load_with(dir.path()),
            Err(ConfigError::Malformed(_))
        ));
    }
}
