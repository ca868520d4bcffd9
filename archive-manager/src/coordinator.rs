//! Snapshot Persistence Coordinator
//!
//! Creates archive records, runs their crawl in a supervised background task
//! set and persists the outcome. An archive leaves `IN_PROGRESS` exactly once:
//! `COMPLETED` when crawl and persistence succeed, `FAILED` on any error or
//! panic. Rows written before a failure are kept.

use crate::crawler::{parse_site_url, SiteCrawler};
use crate::link_rewriter::LinkRewriter;
use crate::scheduler::ArchiveTrigger;
use crate::serving::{self, ServedFile};
use crate::storage::ArchiveStorage;
use data_access::{ArchiveRepository, AssetRepository, DatabaseManager, PageRepository};
use site_archiver_core::*;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct ArchiveCoordinator {
    archives: Arc<dyn ArchiveRepository>,
    pages: Arc<dyn PageRepository>,
    assets: Arc<dyn AssetRepository>,
    storage: Arc<ArchiveStorage>,
    crawler: Arc<SiteCrawler>,
    public_base_url: String,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl ArchiveCoordinator {
    pub fn new(
        database: &DatabaseManager,
        storage: Arc<ArchiveStorage>,
        crawler: Arc<SiteCrawler>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            archives: Arc::new(database.archive_repository()),
            pages: Arc::new(database.page_repository()),
            assets: Arc::new(database.asset_repository()),
            storage,
            crawler,
            public_base_url: public_base_url.into(),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    /// Record a new archive and start crawling it in the background.
    /// Returns as soon as the `IN_PROGRESS` record exists.
    pub async fn create_archive(&self, url: &str) -> Result<Archive> {
        let root = parse_site_url(url)?;
        let domain = root.host_str().unwrap_or_default().to_string();

        let now = Utc::now();
        let created_at = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let storage_path = self.storage.generate_archive_path(&domain, created_at);

        let archive = Archive::in_progress(&domain, root.as_str(), created_at, storage_path);
        self.archives.create(&archive).await?;
        info!("Created archive {} for {}", archive.id, archive.root_url);

        let mut tasks = self.tasks.lock().await;
        while let Some(Some(joined)) = tasks.join_next().now_or_never() {
            if let Err(e) = joined {
                error!("Archive task ended abnormally: {}", e);
            }
        }
        tasks.spawn(self.clone().run_archive_job(archive.clone()));

        Ok(archive)
    }

    async fn run_archive_job(self, archive: Archive) {
        let outcome = AssertUnwindSafe(self.crawl_and_persist(&archive))
            .catch_unwind()
            .await;

        let status = match outcome {
            Ok(Ok(())) => ArchiveStatus::Completed,
            Ok(Err(e)) => {
                error!("Archive {} of {} failed: {}", archive.id, archive.root_url, e);
                ArchiveStatus::Failed
            }
            Err(_) => {
                error!("Archive {} of {} panicked", archive.id, archive.root_url);
                ArchiveStatus::Failed
            }
        };

        match self.archives.transition_status(&archive.id, status).await {
            Ok(true) => info!("Archive {} finished as {}", archive.id, status),
            Ok(false) => warn!("Archive {} was no longer in progress", archive.id),
            Err(e) => error!("Failed to record status of archive {}: {}", archive.id, e),
        }
    }

    async fn crawl_and_persist(&self, archive: &Archive) -> Result<()> {
        self.storage.create_directory(&archive.storage_path).await?;

        let result = self
            .crawler
            .crawl_site(&archive.root_url, &archive.storage_path)
            .await?;

        for record in result.into_pages() {
            let page = Page {
                id: PageId::new(),
                archive_id: archive.id,
                url: record.url,
                title: record.title,
                file_path: record.file_path,
                links_count: record.links_count,
                created_at: Utc::now(),
            };
            self.pages.create(&page).await?;

            for asset in record.assets {
                self.assets
                    .create(&Asset {
                        id: AssetId::new(),
                        page_id: page.id,
                        kind: asset.kind,
                        original_url: asset.original_url,
                        local_path: asset.local_path,
                        size: asset.size,
                        compressed_size: asset.compressed_size,
                        mime_type: asset.mime_type,
                        created_at: Utc::now(),
                    })
                    .await?;
            }
            debug!("Persisted page {} of archive {}", page.url, archive.id);
        }

        let total_pages = self.pages.count_by_archive(&archive.id).await?;
        let total_assets = self.assets.count_by_archive(&archive.id).await?;
        self.archives
            .update_totals(&archive.id, total_pages as u32, total_assets as u32)
            .await
    }

    pub async fn get_archive(&self, archive_id: &ArchiveId) -> Result<Archive> {
        self.archives
            .get_by_id(archive_id)
            .await?
            .ok_or_else(|| NotFoundError::Archive { archive_id: archive_id.to_string() }.into())
    }

    /// All archives, newest first
    pub async fn list_archives(&self) -> Result<Vec<Archive>> {
        self.archives.list().await
    }

    /// Archives grouped per domain. Groups and their versions are newest first.
    pub async fn list_archives_by_domain(&self) -> Result<Vec<DomainGroup>> {
        let mut groups: Vec<DomainGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for archive in self.archives.list().await? {
            match index.get(&archive.domain) {
                Some(&i) => {
                    groups[i].total_versions += 1;
                    groups[i].versions.push(archive);
                }
                None => {
                    index.insert(archive.domain.clone(), groups.len());
                    groups.push(DomainGroup {
                        domain: archive.domain.clone(),
                        root_url: archive.root_url.clone(),
                        total_versions: 1,
                        latest_archive: archive.clone(),
                        versions: vec![archive],
                    });
                }
            }
        }

        Ok(groups)
    }

    /// Pages of an archive in crawl order with their asset counts
    pub async fn list_archive_pages(&self, archive_id: &ArchiveId) -> Result<Vec<PageSummary>> {
        self.get_archive(archive_id).await?;
        self.pages.list_summaries_by_archive(archive_id).await
    }

    /// Original bytes of a stored file
    pub async fn serve_archived_file(&self, archive_id: &ArchiveId, relative_path: &str) -> Result<Vec<u8>> {
        let archive = self.get_archive(archive_id).await?;

        let Some(path) = serving::resolve_within(&archive.storage_path, relative_path) else {
            return Err(NotFoundError::StoredFile { path: relative_path.to_string() }.into());
        };

        self.storage.read_file(&path).await
    }

    /// Route links of stored markup through the serving endpoint
    pub async fn rewrite_links_for_serving(&self, html: &str, archive_id: &ArchiveId) -> Result<String> {
        let pages = self.pages.list_by_archive(archive_id).await?;
        let rewriter = LinkRewriter::new(&self.public_base_url, archive_id, &pages);
        rewriter.rewrite(html)
    }

    /// A stored file with content type and framing headers. Markup is link-rewritten.
    pub async fn serve_file(&self, archive_id: &ArchiveId, relative_path: &str) -> Result<ServedFile> {
        let content = self.serve_archived_file(archive_id, relative_path).await?;
        let content_type = serving::content_type_for(relative_path);

        let content = if serving::is_html(relative_path) {
            let html = String::from_utf8_lossy(&content);
            self.rewrite_links_for_serving(&html, archive_id)
                .await?
                .into_bytes()
        } else {
            content
        };

        Ok(ServedFile {
            content,
            content_type,
            headers: serving::framing_headers(&self.public_base_url),
        })
    }

    /// Wait until every background crawl, including ones started meanwhile, has ended
    pub async fn wait_for_background_tasks(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Archive task ended abnormally: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl ArchiveTrigger for ArchiveCoordinator {
    async fn trigger_archive(&self, url: &str) -> Result<Archive> {
        self.create_archive(url).await
    }
}
