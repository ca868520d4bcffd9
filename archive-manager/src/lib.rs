//! Archive Manager for the site archiver
//!
//! Crawls a website into a timestamped on-disk snapshot, persists the
//! snapshot's pages and assets, serves stored files with links routed
//! through the serving endpoint, and re-archives sites on a schedule.
//!
//! # Features
//! - Bounded-concurrency breadth-first crawl of one host
//! - Asset localization with transparent gzip storage of text payloads
//! - Supervised background crawl jobs with a terminal status per archive
//! - Serve-time link rewriting
//! - Cron-style recurring archives with one timer job per active entry

pub mod storage;
pub mod markup;
pub mod asset_localizer;
pub mod crawler;
pub mod link_rewriter;
pub mod serving;
pub mod cadence;
pub mod scheduler;
pub mod coordinator;

pub use storage::{ArchiveStorage, StorageConfig, StoredFile};
pub use asset_localizer::{AssetLocalizer, LocalizedAssets};
pub use crawler::{parse_site_url, CrawlerConfig, SiteCrawler};
pub use link_rewriter::LinkRewriter;
pub use serving::ServedFile;
pub use cadence::{Cadence, DEFAULT_CADENCE};
pub use scheduler::{ArchiveScheduler, ArchiveTrigger};
pub use coordinator::ArchiveCoordinator;

// Re-export commonly used types
pub use site_archiver_core::*;

/// In-memory renderer and fetcher used by the crawl and coordinator tests
#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use browser_connector::{FetchedResource, PageRenderer, RenderSession, RenderedPage, ResourceFetcher};
    use site_archiver_core::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy)]
    enum Breakage {
        Unavailable,
        Panic,
    }

    #[derive(Clone)]
    pub struct FakeRenderer {
        pages: Arc<HashMap<String, String>>,
        open_sessions: Arc<AtomicUsize>,
        breakage: Option<Breakage>,
    }

    impl FakeRenderer {
        pub fn new() -> Self {
            Self {
                pages: Arc::new(HashMap::new()),
                open_sessions: Arc::new(AtomicUsize::new(0)),
                breakage: None,
            }
        }

        /// A renderer whose browser cannot be reached
        pub fn unavailable() -> Self {
            Self {
                breakage: Some(Breakage::Unavailable),
                ..Self::new()
            }
        }

        pub fn panicking() -> Self {
            Self {
                breakage: Some(Breakage::Panic),
                ..Self::new()
            }
        }

        pub fn page(mut self, url: &str, html: &str) -> Self {
            Arc::make_mut(&mut self.pages).insert(url.to_string(), html.to_string());
            self
        }

        pub fn all_sessions_closed(&self) -> bool {
            self.open_sessions.load(Ordering::SeqCst) == 0
        }
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn open_session(&self) -> Result<Box<dyn RenderSession>> {
            match self.breakage {
                Some(Breakage::Unavailable) => {
                    return Err(FetchError::BrowserUnavailable {
                        endpoint: "fake".to_string(),
                    }
                    .into())
                }
                Some(Breakage::Panic) => panic!("renderer crashed"),
                None => {}
            }

            self.open_sessions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                pages: Arc::clone(&self.pages),
                open_sessions: Arc::clone(&self.open_sessions),
            }))
        }
    }

    struct FakeSession {
        pages: Arc<HashMap<String, String>>,
        open_sessions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RenderSession for FakeSession {
        async fn render(&self, url: &str) -> Result<RenderedPage> {
            let html = self.pages.get(url).ok_or_else(|| FetchError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            })?;
            Ok(RenderedPage {
                url: url.to_string(),
                html: html.clone(),
                title: None,
            })
        }

        async fn close(&self) -> Result<()> {
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    pub struct FakeFetcher {
        texts: HashMap<String, String>,
        assets: HashMap<String, Vec<u8>>,
        slow: HashSet<String>,
    }

    impl FakeFetcher {
        /// Raw fetches return the same markup the renderer produces
        pub fn mirroring(renderer: &FakeRenderer) -> Self {
            Self {
                texts: renderer.pages.as_ref().clone(),
                ..Self::default()
            }
        }

        pub fn asset(mut self, url: &str, bytes: &[u8]) -> Self {
            self.assets.insert(url.to_string(), bytes.to_vec());
            self
        }

        pub fn timing_out(mut self, url: &str) -> Self {
            self.slow.insert(url.to_string());
            self
        }

        fn check(&self, url: &str) -> Result<()> {
            if self.slow.contains(url) {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: 30_000,
                }
                .into());
            }
            Ok(())
        }

        fn missing(url: &str) -> ArchiverError {
            FetchError::HttpStatus {
                url: url.to_string(),
                status: 404,
            }
            .into()
        }
    }

    #[async_trait]
    impl ResourceFetcher for FakeFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            self.check(url)?;
            self.texts.get(url).cloned().ok_or_else(|| Self::missing(url))
        }

        async fn fetch_bytes(&self, url: &str) -> Result<FetchedResource> {
            self.check(url)?;
            let bytes = self.assets.get(url).cloned().ok_or_else(|| Self::missing(url))?;
            Ok(FetchedResource {
                bytes,
                content_type: None,
            })
        }
    }
}
