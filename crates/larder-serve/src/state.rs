//! Application state and configuration.

use crate::cache::{new_cache, ResponseCache};
use crate::hydration::Hydrator;
use crate::search::SearchClient;
use crate::store::RecordStore;
use larder_core::Db;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite index database.
    pub db_path: PathBuf,

    /// Base URL of the external search backend (optional). When absent,
    /// search skeletons fall back to the relational store.
    pub search_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `LARDER_DB_PATH`: Path to the SQLite index database
    ///
    /// Optional environment variables:
    /// - `LARDER_SEARCH_URL`: Search backend base URL
    pub fn from_env() -> anyhow::Result<Self> {
        let db_path = std::env::var("LARDER_DB_PATH")
            .map(PathBuf::from)
            .map_err(|_| anyhow::anyhow!("LARDER_DB_PATH environment variable is required"))?;

        let search_url = std::env::var("LARDER_SEARCH_URL")
            .ok()
            .filter(|s| !s.is_empty());

        tracing::info!(
            db_path = %db_path.display(),
            search = search_url.as_deref().unwrap_or("(store fallback)"),
            "configuration loaded"
        );

        Ok(Self { db_path, search_url })
    }
}

/// Shared application state available to all feed entry points.
#[derive(Clone)]
pub struct AppState {
    /// Record store over the index database.
    pub store: RecordStore,

    /// Batch-fetch façade over the store.
    pub hydrator: Hydrator,

    /// Response cache for viewer-independent skeletons.
    pub cache: ResponseCache,

    /// External search backend, when configured.
    pub search: Option<SearchClient>,

    /// Application configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create application state from configuration, opening the database.
    pub fn new(config: Config) -> larder_core::Result<Self> {
        let db = Db::open(&config.db_path)?;
        let search = config.search_url.as_deref().map(SearchClient::new);
        let store = RecordStore::new(db);

        Ok(Self {
            hydrator: Hydrator::new(store.clone()),
            store,
            cache: new_cache(),
            search,
            config: Arc::new(config),
        })
    }

    /// State over an in-memory database. For tests.
    pub fn in_memory() -> larder_core::Result<Self> {
        let db = Db::open_in_memory()?;
        let store = RecordStore::new(db);
        Ok(Self {
            hydrator: Hydrator::new(store.clone()),
            store,
            cache: new_cache(),
            search: None,
            config: Arc::new(Config {
                db_path: PathBuf::from(":memory:"),
                search_url: None,
            }),
        })
    }

    /// The underlying database handle.
    pub fn db(&self) -> &Db {
        self.store.db()
    }
}
