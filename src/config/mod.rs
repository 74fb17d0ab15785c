//! Unified configuration for the xref tooling.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (xref.toml)
//! ```toml
//! [resolver]
//! backend = "rocksdb"
//! path = "/var/lib/xref/resolver"
//! retention_days = 30
//!
//! [index]
//! fuzzy = true
//!
//! [xref]
//! limit = 10000
//!
//! [statements]
//! path = "/var/lib/xref/statements.jsonl"
//!
//! [[datasets]]
//! name = "id_dpr"
//! prefix = "id-dpr"
//! ```
//!
//! Nested keys in environment variables are separated by a double underscore,
//! e.g. `XREF_RESOLVER__MIN_SCORE=0.3` or `XREF_INDEX__MAX_BUCKET_SIZE=50`.

mod defaults;

pub use defaults::*;

use crate::dataset::Dataset;
use crate::index::IndexOptions;
use crate::persistence::{
    FileResolverStore, MemoryResolverStore, PersistenceError, ResolverStore, RocksResolverStore,
};
use crate::resolver::PrunePolicy;
use crate::xref::XrefOptions;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Main configuration for the xref binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct XrefConfig {
    /// Resolver storage and retention
    pub resolver: ResolverConfig,
    /// Blocking index tuning
    pub index: IndexConfig,
    /// Orchestrator settings
    pub xref: RunConfig,
    /// Statement input
    pub statements: StatementsConfig,
    /// Known datasets and their lookups
    pub datasets: Vec<Dataset>,
}

impl XrefConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(config_path: Option<&str>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(XrefConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with XREF_ prefix
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SPLIT));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: Self = figment.extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.xref.fetch_concurrency == 0 {
            return Err(ConfigError::new("xref.fetch_concurrency must be at least 1"));
        }
        if self.index.max_bucket_size < 2 {
            return Err(ConfigError::new("index.max_bucket_size must be at least 2"));
        }
        for (name, score) in [
            ("resolver.min_score", self.resolver.min_score),
            ("index.min_score", self.index.min_score),
        ] {
            if !(0.0..=1.0).contains(&score) {
                return Err(ConfigError::new(format!("{} must be within [0, 1]", name)));
            }
        }
        Ok(())
    }

    /// Dataset settings by name; unconfigured datasets get no lookups.
    pub fn dataset(&self, name: &str) -> Dataset {
        self.datasets
            .iter()
            .find(|dataset| dataset.name == name)
            .cloned()
            .unwrap_or_else(|| Dataset::new(name))
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            fuzzy: self.index.fuzzy,
            max_bucket_size: self.index.max_bucket_size,
            min_score: self.index.min_score,
        }
    }

    pub fn xref_options(&self) -> XrefOptions {
        XrefOptions {
            limit: self.xref.limit,
            index: self.index_options(),
            fetch_concurrency: self.xref.fetch_concurrency,
            fetch_timeout: Duration::from_millis(self.xref.fetch_timeout_ms),
            progress_every: self.xref.progress_every,
        }
    }

    pub fn prune_policy(&self) -> PrunePolicy {
        PrunePolicy {
            min_score: self.resolver.min_score,
            retention: match self.resolver.retention_days {
                0 => None,
                days => Some(Duration::from_secs(days * SECONDS_PER_DAY)),
            },
        }
    }
}

/// Where resolver edges are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// JSON snapshot file
    #[default]
    File,
    /// RocksDB directory
    Rocksdb,
    /// Not persisted across processes
    Memory,
}

/// Resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub backend: Backend,
    pub path: PathBuf,
    /// Pending edges scoring below this are pruned
    pub min_score: f64,
    /// Pending edge retention in days (0 = forever)
    pub retention_days: u64,
    /// Run RocksDB repair before opening
    pub repair: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: PathBuf::from(DEFAULT_RESOLVER_PATH),
            min_score: DEFAULT_PRUNE_MIN_SCORE,
            retention_days: DEFAULT_RETENTION_DAYS,
            repair: false,
        }
    }
}

impl ResolverConfig {
    /// Open the configured resolver store.
    pub fn open_store(&self) -> Result<Box<dyn ResolverStore>, PersistenceError> {
        Ok(match self.backend {
            Backend::File => Box::new(FileResolverStore::new(&self.path)),
            Backend::Rocksdb => Box::new(RocksResolverStore::open_with_options(
                &self.path,
                crate::persistence::RocksOpenOptions {
                    repair: self.repair,
                },
            )?),
            Backend::Memory => Box::new(MemoryResolverStore::new()),
        })
    }
}

/// Blocking index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub fuzzy: bool,
    pub max_bucket_size: usize,
    pub min_score: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            fuzzy: false,
            max_bucket_size: DEFAULT_MAX_BUCKET_SIZE,
            min_score: DEFAULT_INDEX_MIN_SCORE,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub limit: usize,
    pub fetch_concurrency: usize,
    pub fetch_timeout_ms: u64,
    pub progress_every: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_XREF_LIMIT,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// Statement input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementsConfig {
    pub path: PathBuf,
}

impl Default for StatementsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATEMENTS_PATH),
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolver: Option<ResolverOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xref: Option<RunOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statements: Option<StatementsOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuzzy: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
