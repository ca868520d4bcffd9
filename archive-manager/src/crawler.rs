//! Crawl Orchestrator
//!
//! Breadth-first traversal of one site. Each page is rendered through the
//! browser session, its assets are localized and the rewritten markup is
//! stored under `pages/`. Further links come from a raw fetch of the same
//! URL, so links injected only by client-side script are not discovered.
//!
//! # Features
//! - FIFO frontier with visited and queued sets, fragments ignored
//! - Page cap honoured exactly, also with concurrent renders
//! - Per-page failures are logged and skipped; the crawl continues

use crate::asset_localizer::AssetLocalizer;
use crate::markup::{self, UrlSlot};
use crate::storage::ArchiveStorage;
use browser_connector::{PageRenderer, RenderSession, ResourceFetcher};
use site_archiver_core::*;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Configuration for the crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Maximum number of pages stored per crawl
    pub max_pages: usize,
    /// Maximum number of pages rendered at once
    pub max_concurrent_requests: usize,
    /// Timeout for rendering one page
    pub request_timeout: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: 100,
            max_concurrent_requests: 5,
            request_timeout: Duration::from_millis(30_000),
        }
    }
}

/// Parse a root URL for archiving: absolute `http`/`https` with a host
pub fn parse_site_url(url: &str) -> Result<Url> {
    let invalid = || ValidationError::InvalidUrl { url: url.to_string() };

    let mut parsed = Url::parse(url.trim()).map_err(|_| invalid())?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(invalid().into());
    }
    if parsed.host_str().map(|h| h.is_empty()).unwrap_or(true) {
        return Err(invalid().into());
    }
    parsed.set_fragment(None);
    Ok(parsed)
}

/// Stored file name for a page: the URL path with `/` replaced by `_`
pub fn page_filename(url: &Url, storage: &ArchiveStorage) -> String {
    let mut name = url.path().replace('/', "_");
    if name.is_empty() || name == "_" {
        name = "index".to_string();
    }
    if !name.ends_with(".html") {
        name.push_str(".html");
    }
    storage.sanitize_filename(&name)
}

pub struct SiteCrawler {
    config: CrawlerConfig,
    renderer: Arc<dyn PageRenderer>,
    fetcher: Arc<dyn ResourceFetcher>,
    storage: Arc<ArchiveStorage>,
    localizer: AssetLocalizer,
}

impl SiteCrawler {
    pub fn new(
        config: CrawlerConfig,
        renderer: Arc<dyn PageRenderer>,
        fetcher: Arc<dyn ResourceFetcher>,
        storage: Arc<ArchiveStorage>,
    ) -> Self {
        let localizer = AssetLocalizer::new(Arc::clone(&fetcher), Arc::clone(&storage));
        Self {
            config,
            renderer,
            fetcher,
            storage,
            localizer,
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Crawl the site below `root_url`, storing files under `archive_root`.
    /// One render session is used for the whole call and always closed.
    pub async fn crawl_site(&self, root_url: &str, archive_root: &Path) -> Result<CrawlResult> {
        let root = parse_site_url(root_url)?;
        info!("Starting crawl of {} (max {} pages)", root, self.config.max_pages);

        let session = self.renderer.open_session().await?;
        let result = self.traverse(session.as_ref(), &root, archive_root).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close render session for {}: {}", root, e);
        }

        info!(
            "Crawl of {} finished: {} pages, {} assets",
            root,
            result.pages().len(),
            result.total_assets()
        );
        Ok(result)
    }

    async fn traverse(&self, session: &dyn RenderSession, root: &Url, archive_root: &Path) -> CrawlResult {
        let root_host = root.host_str().unwrap_or_default().to_string();
        let limit = self.config.max_concurrent_requests.max(1);

        let mut frontier: VecDeque<Url> = VecDeque::from([root.clone()]);
        let mut queued: HashSet<String> = HashSet::from([root.to_string()]);
        let mut visited: HashSet<String> = HashSet::new();
        let mut pages: Vec<PageRecord> = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < limit && pages.len() + in_flight.len() < self.config.max_pages {
                let Some(url) = frontier.pop_front() else {
                    break;
                };
                let key = url.to_string();
                queued.remove(&key);
                if !visited.insert(key) {
                    continue;
                }
                debug!("Crawling {}", url);
                in_flight.push(self.crawl_page(session, url, &root_host, archive_root));
            }

            let Some((url, outcome)) = in_flight.next().await else {
                break;
            };

            match outcome {
                Ok((page, links)) => {
                    pages.push(page);
                    for link in links {
                        let key = link.to_string();
                        if !visited.contains(&key) && queued.insert(key) {
                            frontier.push_back(link);
                        }
                    }
                }
                Err(e) => warn!("Skipping {}: {}", url, e),
            }
        }

        CrawlResult::new(pages)
    }

    async fn crawl_page(
        &self,
        session: &dyn RenderSession,
        url: Url,
        root_host: &str,
        archive_root: &Path,
    ) -> (Url, Result<(PageRecord, Vec<Url>)>) {
        let outcome = self.render_and_store(session, &url, root_host, archive_root).await;
        (url, outcome)
    }

    async fn render_and_store(
        &self,
        session: &dyn RenderSession,
        url: &Url,
        root_host: &str,
        archive_root: &Path,
    ) -> Result<(PageRecord, Vec<Url>)> {
        let rendered = match tokio::time::timeout(self.config.request_timeout, session.render(url.as_str())).await {
            Ok(rendered) => rendered?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: self.config.request_timeout.as_millis() as u64,
                }
                .into())
            }
        };

        let references = markup::extract_asset_references(&rendered.html);
        let localized = self.localizer.localize(url, &references, archive_root).await;

        let html = markup::rewrite_urls(&rendered.html, |slot, value| match slot {
            UrlSlot::Resource { kind: Some(_) } => localized.replacements.get(value).cloned(),
            _ => None,
        })?;

        let file_path = format!("pages/{}", page_filename(url, &self.storage));
        self.storage
            .write_file(&archive_root.join(&file_path), html.as_bytes())
            .await?;

        let title = rendered
            .title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| markup::page_title(&rendered.html));
        let links_count = markup::count_anchors(&rendered.html) as u32;

        let links = self.discover_links(url, root_host).await;

        Ok((
            PageRecord {
                url: url.to_string(),
                title,
                file_path,
                links_count,
                assets: localized.records,
            },
            links,
        ))
    }

    /// Same-host links of the page's unrendered markup. A failed fetch yields none.
    async fn discover_links(&self, url: &Url, root_host: &str) -> Vec<Url> {
        let body = match self.fetcher.fetch_text(url.as_str()).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Link discovery failed for {}: {}", url, e);
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        markup::extract_links(&body)
            .into_iter()
            .filter_map(|href| url.join(&href).ok())
            .filter(|link| matches!(link.scheme(), "http" | "https"))
            .filter(|link| link.host_str() == Some(root_host))
            .map(|mut link| {
                link.set_fragment(None);
                link
            })
            .filter(|link| seen.insert(link.to_string()))
            .collect()
    }
}
