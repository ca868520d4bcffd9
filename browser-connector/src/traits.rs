//! Fetch seams used by the crawler

use site_archiver_core::*;
use async_trait::async_trait;

/// Markup captured after the page's scripts ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
    pub title: Option<String>,
}

/// Bytes of a downloaded resource plus the server-reported content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Source of rendering sessions
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Acquire a session for one crawl. The caller must `close` it.
    async fn open_session(&self) -> Result<Box<dyn RenderSession>>;
}

/// A browser-automation session. `render` may be called concurrently.
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Render a page, executing its scripts
    async fn render(&self, url: &str) -> Result<RenderedPage>;

    /// Release every browser resource held by the session
    async fn close(&self) -> Result<()>;
}

/// Plain HTTP retrieval without script execution
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Raw fetch of a document body
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// Download a resource
    async fn fetch_bytes(&self, url: &str) -> Result<FetchedResource>;
}
