/// Main application module
///
/// Provides high-level Application API

use crate::{AppConfig, AppContext, LoggerConfig, UnifiedLogger};
use site_archiver_core::errors::Result;
use site_archiver_core::types::*;
use std::sync::Arc;
use tracing::info;

/// Main application
pub struct Application {
    /// Application context
    context: Arc<AppContext>,
}

impl Application {
    /// Create and initialize a new application
    pub async fn new(config: AppConfig) -> Result<Self> {
        UnifiedLogger::init(LoggerConfig::with_level(&config.log_level))?;

        info!("Starting site archiver");

        let context = Arc::new(AppContext::new(config).await?);

        info!("Application initialized successfully");

        Ok(Self { context })
    }

    /// Register jobs for every active scheduled archive
    pub async fn start(&self) -> Result<()> {
        let jobs = self.context.scheduler.initialize().await?;
        info!("Application started with {} scheduled jobs", jobs);
        Ok(())
    }

    /// Shutdown the application
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down application");
        self.context.shutdown().await?;
        info!("Application shutdown complete");
        Ok(())
    }

    /// Get application context
    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    // High-level API methods

    /// Start archiving a site in the background
    pub async fn archive_site(&self, url: &str) -> Result<Archive> {
        self.context.coordinator.create_archive(url).await
    }

    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.context.scheduler.get_job_status().await
    }
}
