/// Integration module for the site archiver
///
/// Loads configuration, initialises logging and wires the database,
/// storage, fetchers, crawler, coordinator and scheduler together.

use archive_manager::{
    ArchiveCoordinator, ArchiveScheduler, ArchiveStorage, ArchiveTrigger, CrawlerConfig, SiteCrawler,
    StorageConfig,
};
use browser_connector::{CdpConfig, CdpRenderer, HttpFetcher, DEFAULT_USER_AGENT};
use data_access::DatabaseManager;
use site_archiver_core::errors::{ArchiverError, Result, SystemError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub mod application;
pub mod logger;

pub use application::Application;
pub use logger::{LoggerConfig, UnifiedLogger};

/// Application configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database path; an in-memory database is used when unset
    pub database_path: Option<PathBuf>,

    /// Root directory of all archives
    pub archive_base_path: PathBuf,

    /// Page cap per crawl
    pub max_pages: usize,

    /// Concurrent page renders per crawl
    pub max_concurrent_requests: usize,

    /// Per page and per asset timeout
    pub request_timeout_ms: u64,

    /// Origin of the serving endpoint used in rewritten links
    pub public_base_url: String,

    /// DevTools endpoint of the rendering browser
    pub cdp_host: String,
    pub cdp_port: u16,

    pub user_agent: String,

    /// Log level
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            archive_base_path: PathBuf::from("./archives"),
            max_pages: 100,
            max_concurrent_requests: 5,
            request_timeout_ms: 30_000,
            public_base_url: "http://localhost:3001".to_string(),
            cdp_host: "127.0.0.1".to_string(),
            cdp_port: 9222,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(SystemError::from)?;
        let config = serde_json::from_str(&content).map_err(SystemError::from)?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("ARCHIVE_BASE_PATH") {
            self.archive_base_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("MAX_PAGES_PER_DOMAIN") {
            self.max_pages = parse_number("MAX_PAGES_PER_DOMAIN", &value)?;
        }
        if let Some(value) = lookup("MAX_CONCURRENT_REQUESTS") {
            self.max_concurrent_requests = parse_number("MAX_CONCURRENT_REQUESTS", &value)?;
        }
        if let Some(value) = lookup("REQUEST_TIMEOUT") {
            self.request_timeout_ms = parse_number("REQUEST_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("PUBLIC_BASE_URL") {
            self.public_base_url = value;
        }
        if let Some(value) = lookup("CDP_HOST") {
            self.cdp_host = value;
        }
        if let Some(value) = lookup("CDP_PORT") {
            self.cdp_port = parse_number("CDP_PORT", &value)?;
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.log_level = value;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig {
            max_pages: self.max_pages,
            max_concurrent_requests: self.max_concurrent_requests,
            request_timeout: self.request_timeout(),
        }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            base_path: self.archive_base_path.clone(),
            ..StorageConfig::default()
        }
    }

    pub fn cdp_config(&self) -> CdpConfig {
        CdpConfig {
            host: self.cdp_host.clone(),
            port: self.cdp_port,
            page_timeout: self.request_timeout(),
            ..CdpConfig::default()
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ArchiverError::configuration(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

/// Application context that holds all initialized components
pub struct AppContext {
    /// Database manager for data persistence
    pub database: Arc<DatabaseManager>,

    pub storage: Arc<ArchiveStorage>,

    pub coordinator: ArchiveCoordinator,

    pub scheduler: Arc<ArchiveScheduler>,

    /// Application configuration
    pub config: AppConfig,
}

impl AppContext {
    /// Create a new application context with all components initialized
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing application context");

        let database = if let Some(path) = &config.database_path {
            Arc::new(DatabaseManager::new(path).await?)
        } else {
            Arc::new(DatabaseManager::in_memory().await?)
        };
        info!("Database initialized");

        let storage = Arc::new(ArchiveStorage::new(config.storage_config()));
        storage.create_directory(storage.base_path()).await?;
        info!("Archive storage at {}", storage.base_path().display());

        let renderer = Arc::new(CdpRenderer::new(config.cdp_config())?);
        let fetcher = Arc::new(HttpFetcher::new(config.request_timeout(), &config.user_agent)?);
        let crawler = Arc::new(SiteCrawler::new(
            config.crawler_config(),
            renderer,
            fetcher,
            Arc::clone(&storage),
        ));

        let coordinator = ArchiveCoordinator::new(
            &database,
            Arc::clone(&storage),
            crawler,
            config.public_base_url.clone(),
        );

        let trigger: Arc<dyn ArchiveTrigger> = Arc::new(coordinator.clone());
        let scheduler = Arc::new(ArchiveScheduler::new(
            Arc::new(database.schedule_repository()),
            trigger,
        ));

        info!("Application context initialized successfully");

        Ok(Self {
            database,
            storage,
            coordinator,
            scheduler,
            config,
        })
    }

    /// Shutdown all components gracefully
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down application context");
        self.scheduler.shutdown().await;
        info!("Application context shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.archive_base_path, PathBuf::from("./archives"));
        assert_eq!(config.max_pages, 100);
        assert_eq!(config.max_concurrent_requests, 5);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.public_base_url, "http://localhost:3001");
        assert_eq!(config.cdp_port, 9222);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup(&[
                ("DATABASE_PATH", "/var/lib/archiver/db.sqlite"),
                ("MAX_PAGES_PER_DOMAIN", "25"),
                ("REQUEST_TIMEOUT", "5000"),
                ("PUBLIC_BASE_URL", "https://archive.example.com"),
                ("CDP_PORT", "9333"),
            ]))
            .unwrap();

        assert_eq!(config.database_path, Some(PathBuf::from("/var/lib/archiver/db.sqlite")));
        assert_eq!(config.max_pages, 25);
        assert_eq!(config.crawler_config().request_timeout, Duration::from_secs(5));
        assert_eq!(config.cdp_config().port, 9333);
        assert_eq!(config.public_base_url, "https://archive.example.com");
        assert_eq!(config.max_concurrent_requests, 5);
    }

    #[test]
    fn test_invalid_number_is_configuration_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(lookup(&[("MAX_CONCURRENT_REQUESTS", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ArchiverError::System { source: SystemError::Configuration { .. } }
        ));
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_pages": 10, "log_level": "debug" }"#).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.max_pages, 10);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.cdp_host, "127.0.0.1");

        assert!(AppConfig::from_file(dir.path().join("missing.json")).is_err());
    }

    #[tokio::test]
    async fn test_app_context_lifecycle() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            archive_base_path: dir.path().join("archives"),
            ..AppConfig::default()
        };

        let context = AppContext::new(config).await.unwrap();
        assert!(context.storage.base_path().is_dir());
        assert!(context.coordinator.list_archives().await.unwrap().is_empty());
        assert_eq!(context.scheduler.initialize().await.unwrap(), 0);
        context.shutdown().await.unwrap();
    }
}
