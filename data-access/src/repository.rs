//! Repository implementations for data access

use site_archiver_core::*;
use tokio_rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{ErrorCode, Row};

/// Repository trait for archives
#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    async fn create(&self, archive: &Archive) -> Result<()>;
    async fn get_by_id(&self, id: &ArchiveId) -> Result<Option<Archive>>;
    /// All archives, newest first
    async fn list(&self) -> Result<Vec<Archive>>;
    async fn update_totals(&self, id: &ArchiveId, total_pages: u32, total_assets: u32) -> Result<()>;
    /// Move a non-terminal archive into a terminal status. Returns false when
    /// the archive is missing or already terminal.
    async fn transition_status(&self, id: &ArchiveId, status: ArchiveStatus) -> Result<bool>;
    async fn delete(&self, id: &ArchiveId) -> Result<bool>;
}

/// Repository trait for stored pages
#[async_trait]
pub trait PageRepository: Send + Sync {
    async fn create(&self, page: &Page) -> Result<()>;
    async fn get_by_id(&self, id: &PageId) -> Result<Option<Page>>;
    /// Pages of an archive in crawl order
    async fn list_by_archive(&self, archive_id: &ArchiveId) -> Result<Vec<Page>>;
    async fn list_summaries_by_archive(&self, archive_id: &ArchiveId) -> Result<Vec<PageSummary>>;
    async fn count_by_archive(&self, archive_id: &ArchiveId) -> Result<usize>;
}

/// Repository trait for downloaded assets
#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn create(&self, asset: &Asset) -> Result<()>;
    async fn list_by_page(&self, page_id: &PageId) -> Result<Vec<Asset>>;
    async fn count_by_archive(&self, archive_id: &ArchiveId) -> Result<usize>;
}

/// Repository trait for scheduled archives
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Fails with a validation error when another active entry holds the URL
    async fn create(&self, schedule: &ScheduledArchive) -> Result<()>;
    async fn get_by_id(&self, id: &ScheduleId) -> Result<Option<ScheduledArchive>>;
    async fn find_active_by_url(&self, url: &str) -> Result<Option<ScheduledArchive>>;
    /// All entries ordered by next run, entries without one last
    async fn list(&self) -> Result<Vec<ScheduledArchive>>;
    async fn list_active(&self) -> Result<Vec<ScheduledArchive>>;
    /// Fails with a validation error when another active entry holds the URL
    async fn update(&self, schedule: &ScheduledArchive) -> Result<()>;
    async fn record_run(
        &self,
        id: &ScheduleId,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn delete(&self, id: &ScheduleId) -> Result<bool>;
}

fn db_error(action: &'static str) -> impl FnOnce(tokio_rusqlite::Error) -> ArchiverError {
    move |e| ArchiverError::database(format!("Failed to {}: {}", action, e))
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn parse_uuid(index: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| invalid_column(index, format!("invalid id '{}': {}", value, e)))
}

fn from_millis(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_else(Utc::now)
}

/// Helper function to map a row to Archive
fn row_to_archive(row: &Row) -> rusqlite::Result<Archive> {
    let id_str: String = row.get(0)?;
    let domain: String = row.get(1)?;
    let root_url: String = row.get(2)?;
    let created_at_ts: i64 = row.get(3)?;
    let status_str: String = row.get(4)?;
    let total_pages: u32 = row.get(5)?;
    let total_assets: u32 = row.get(6)?;
    let storage_path: String = row.get(7)?;

    let status = ArchiveStatus::parse(&status_str)
        .ok_or_else(|| invalid_column(4, format!("unknown archive status '{}'", status_str)))?;

    Ok(Archive {
        id: ArchiveId(parse_uuid(0, &id_str)?),
        domain,
        root_url,
        created_at: from_millis(created_at_ts),
        status,
        total_pages,
        total_assets,
        storage_path: PathBuf::from(storage_path),
    })
}

/// Helper function to map a row to Page
fn row_to_page(row: &Row) -> rusqlite::Result<Page> {
    let id_str: String = row.get(0)?;
    let archive_id_str: String = row.get(1)?;
    let url: String = row.get(2)?;
    let title: Option<String> = row.get(3)?;
    let file_path: String = row.get(4)?;
    let links_count: u32 = row.get(5)?;
    let created_at_ts: i64 = row.get(6)?;

    Ok(Page {
        id: PageId(parse_uuid(0, &id_str)?),
        archive_id: ArchiveId(parse_uuid(1, &archive_id_str)?),
        url,
        title,
        file_path,
        links_count,
        created_at: from_millis(created_at_ts),
    })
}

/// Helper function to map a row to Asset
fn row_to_asset(row: &Row) -> rusqlite::Result<Asset> {
    let id_str: String = row.get(0)?;
    let page_id_str: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let original_url: String = row.get(3)?;
    let local_path: String = row.get(4)?;
    let size: i64 = row.get(5)?;
    let compressed_size: Option<i64> = row.get(6)?;
    let mime_type: String = row.get(7)?;
    let created_at_ts: i64 = row.get(8)?;

    let kind = AssetKind::parse(&kind_str)
        .ok_or_else(|| invalid_column(2, format!("unknown asset kind '{}'", kind_str)))?;

    Ok(Asset {
        id: AssetId(parse_uuid(0, &id_str)?),
        page_id: PageId(parse_uuid(1, &page_id_str)?),
        kind,
        original_url,
        local_path,
        size: size.max(0) as u64,
        compressed_size: compressed_size.map(|s| s.max(0) as u64),
        mime_type,
        created_at: from_millis(created_at_ts),
    })
}

/// Helper function to map a row to ScheduledArchive
fn row_to_schedule(row: &Row) -> rusqlite::Result<ScheduledArchive> {
    let id_str: String = row.get(0)?;
    let url: String = row.get(1)?;
    let domain: String = row.get(2)?;
    let cadence: String = row.get(3)?;
    let is_active: bool = row.get(4)?;
    let last_run_ts: Option<i64> = row.get(5)?;
    let next_run_ts: Option<i64> = row.get(6)?;
    let created_at_ts: i64 = row.get(7)?;
    let updated_at_ts: i64 = row.get(8)?;

    Ok(ScheduledArchive {
        id: ScheduleId(parse_uuid(0, &id_str)?),
        url,
        domain,
        cadence,
        is_active,
        last_run: last_run_ts.map(from_millis),
        next_run: next_run_ts.map(from_millis),
        created_at: from_millis(created_at_ts),
        updated_at: from_millis(updated_at_ts),
    })
}

const ARCHIVE_COLUMNS: &str =
    "id, domain, root_url, created_at, status, total_pages, total_assets, storage_path";
const PAGE_COLUMNS: &str = "id, archive_id, url, title, file_path, links_count, created_at";
const ASSET_COLUMNS: &str =
    "id, page_id, kind, original_url, local_path, size, compressed_size, mime_type, created_at";
const SCHEDULE_COLUMNS: &str =
    "id, url, domain, cadence, is_active, last_run, next_run, created_at, updated_at";

/// SQLite implementation of ArchiveRepository
pub struct SqliteArchiveRepository {
    connection: Arc<Connection>,
}

impl SqliteArchiveRepository {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ArchiveRepository for SqliteArchiveRepository {
    async fn create(&self, archive: &Archive) -> Result<()> {
        let archive = archive.clone();

        self.connection
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO archives
                    (id, domain, root_url, created_at, status, total_pages, total_assets, storage_path)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    rusqlite::params![
                        archive.id.to_string(),
                        archive.domain,
                        archive.root_url,
                        archive.created_at.timestamp_millis(),
                        archive.status.as_str(),
                        archive.total_pages,
                        archive.total_assets,
                        archive.storage_path.to_string_lossy().to_string(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(db_error("create archive"))
    }

    async fn get_by_id(&self, id: &ArchiveId) -> Result<Option<Archive>> {
        let id_str = id.to_string();

        self.connection
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM archives WHERE id = ?1",
                    ARCHIVE_COLUMNS
                ))?;

                match stmt.query_row([&id_str], row_to_archive) {
                    Ok(archive) => Ok(Some(archive)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(db_error("get archive"))
    }

    async fn list(&self) -> Result<Vec<Archive>> {
        self.connection
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM archives ORDER BY created_at DESC, rowid DESC",
                    ARCHIVE_COLUMNS
                ))?;
                let archives = stmt
                    .query_map([], row_to_archive)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(archives)
            })
            .await
            .map_err(db_error("list archives"))
    }

    async fn update_totals(&self, id: &ArchiveId, total_pages: u32, total_assets: u32) -> Result<()> {
        let id_str = id.to_string();

        self.connection
            .call(move |conn| {
                conn.execute(
                    "UPDATE archives SET total_pages = ?2, total_assets = ?3 WHERE id = ?1",
                    rusqlite::params![id_str, total_pages, total_assets],
                )?;
                Ok(())
            })
            .await
            .map_err(db_error("update archive totals"))
    }

    async fn transition_status(&self, id: &ArchiveId, status: ArchiveStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Ok(false);
        }
        let id_str = id.to_string();

        self.connection
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE archives SET status = ?2 \
                     WHERE id = ?1 AND status IN ('PENDING', 'IN_PROGRESS')",
                    rusqlite::params![id_str, status.as_str()],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(db_error("update archive status"))
    }

    async fn delete(&self, id: &ArchiveId) -> Result<bool> {
        let id_str = id.to_string();

        self.connection
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM archives WHERE id = ?1", [&id_str])?;
                Ok(changed > 0)
            })
            .await
            .map_err(db_error("delete archive"))
    }
}

/// SQLite implementation of PageRepository
pub struct SqlitePageRepository {
    connection: Arc<Connection>,
}

impl SqlitePageRepository {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl PageRepository for SqlitePageRepository {
    async fn create(&self, page: &Page) -> Result<()> {
        let page = page.clone();

        self.connection
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO pages (id, archive_id, url, title, file_path, links_count, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    rusqlite::params![
                        page.id.to_string(),
                        page.archive_id.to_string(),
                        page.url,
                        page.title,
                        page.file_path,
                        page.links_count,
                        page.created_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(db_error("create page"))
    }

    async fn get_by_id(&self, id: &PageId) -> Result<Option<Page>> {
        let id_str = id.to_string();

        self.connection
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM pages WHERE id = ?1", PAGE_COLUMNS))?;

                match stmt.query_row([&id_str], row_to_page) {
                    Ok(page) => Ok(Some(page)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(db_error("get page"))
    }

    async fn list_by_archive(&self, archive_id: &ArchiveId) -> Result<Vec<Page>> {
        let archive_id_str = archive_id.to_string();

        self.connection
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM pages WHERE archive_id = ?1 ORDER BY created_at ASC, rowid ASC",
                    PAGE_COLUMNS
                ))?;
                let pages = stmt
                    .query_map([&archive_id_str], row_to_page)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(pages)
            })
            .await
            .map_err(db_error("list pages"))
    }

    async fn list_summaries_by_archive(&self, archive_id: &ArchiveId) -> Result<Vec<PageSummary>> {
        let archive_id_str = archive_id.to_string();

        self.connection
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT p.id, p.archive_id, p.url, p.title, p.file_path, p.links_count, p.created_at, \
                     COUNT(a.id) \
                     FROM pages p LEFT JOIN assets a ON a.page_id = p.id \
                     WHERE p.archive_id = ?1 \
                     GROUP BY p.id \
                     ORDER BY p.created_at ASC, p.rowid ASC",
                )?;
                let summaries = stmt
                    .query_map([&archive_id_str], |row| {
                        let page = row_to_page(row)?;
                        let asset_count: u32 = row.get(7)?;
                        Ok(PageSummary { page, asset_count })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(summaries)
            })
            .await
            .map_err(db_error("list page summaries"))
    }

    async fn count_by_archive(&self, archive_id: &ArchiveId) -> Result<usize> {
        let archive_id_str = archive_id.to_string();

        self.connection
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM pages WHERE archive_id = ?1",
                    [&archive_id_str],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
            .map_err(db_error("count pages"))
    }
}

/// SQLite implementation of AssetRepository
pub struct SqliteAssetRepository {
    connection: Arc<Connection>,
}

impl SqliteAssetRepository {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl AssetRepository for SqliteAssetRepository {
    async fn create(&self, asset: &Asset) -> Result<()> {
        let asset = asset.clone();

        self.connection
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO assets
                    (id, page_id, kind, original_url, local_path, size, compressed_size, mime_type, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    rusqlite::params![
                        asset.id.to_string(),
                        asset.page_id.to_string(),
                        asset.kind.as_str(),
                        asset.original_url,
                        asset.local_path,
                        asset.size as i64,
                        asset.compressed_size.map(|s| s as i64),
                        asset.mime_type,
                        asset.created_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(db_error("create asset"))
    }

    async fn list_by_page(&self, page_id: &PageId) -> Result<Vec<Asset>> {
        let page_id_str = page_id.to_string();

        self.connection
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM assets WHERE page_id = ?1 ORDER BY rowid ASC",
                    ASSET_COLUMNS
                ))?;
                let assets = stmt
                    .query_map([&page_id_str], row_to_asset)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(assets)
            })
            .await
            .map_err(db_error("list assets"))
    }

    async fn count_by_archive(&self, archive_id: &ArchiveId) -> Result<usize> {
        let archive_id_str = archive_id.to_string();

        self.connection
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM assets a JOIN pages p ON a.page_id = p.id \
                     WHERE p.archive_id = ?1",
                    [&archive_id_str],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
            .map_err(db_error("count assets"))
    }
}

/// SQLite implementation of ScheduleRepository
pub struct SqliteScheduleRepository {
    connection: Arc<Connection>,
}

impl SqliteScheduleRepository {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    async fn create(&self, schedule: &ScheduledArchive) -> Result<()> {
        let schedule = schedule.clone();
        let url = schedule.url.clone();

        let inserted = self
            .connection
            .call(move |conn| {
                let result = conn.execute(
                    r#"
                    INSERT INTO scheduled_archives
                    (id, url, domain, cadence, is_active, last_run, next_run, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    rusqlite::params![
                        schedule.id.to_string(),
                        schedule.url,
                        schedule.domain,
                        schedule.cadence,
                        schedule.is_active,
                        schedule.last_run.map(|t| t.timestamp_millis()),
                        schedule.next_run.map(|t| t.timestamp_millis()),
                        schedule.created_at.timestamp_millis(),
                        schedule.updated_at.timestamp_millis(),
                    ],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(e) if is_constraint_violation(&e) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(db_error("create scheduled archive"))?;

        if inserted {
            Ok(())
        } else {
            Err(ValidationError::DuplicateSchedule { url }.into())
        }
    }

    async fn get_by_id(&self, id: &ScheduleId) -> Result<Option<ScheduledArchive>> {
        let id_str = id.to_string();

        self.connection
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM scheduled_archives WHERE id = ?1",
                    SCHEDULE_COLUMNS
                ))?;

                match stmt.query_row([&id_str], row_to_schedule) {
                    Ok(schedule) => Ok(Some(schedule)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(db_error("get scheduled archive"))
    }

    async fn find_active_by_url(&self, url: &str) -> Result<Option<ScheduledArchive>> {
        let url = url.to_string();

        self.connection
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM scheduled_archives WHERE url = ?1 AND is_active = 1 LIMIT 1",
                    SCHEDULE_COLUMNS
                ))?;

                match stmt.query_row([&url], row_to_schedule) {
                    Ok(schedule) => Ok(Some(schedule)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(db_error("find scheduled archive"))
    }

    async fn list(&self) -> Result<Vec<ScheduledArchive>> {
        self.connection
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM scheduled_archives \
                     ORDER BY next_run IS NULL, next_run ASC, created_at ASC",
                    SCHEDULE_COLUMNS
                ))?;
                let schedules = stmt
                    .query_map([], row_to_schedule)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(schedules)
            })
            .await
            .map_err(db_error("list scheduled archives"))
    }

    async fn list_active(&self) -> Result<Vec<ScheduledArchive>> {
        self.connection
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM scheduled_archives WHERE is_active = 1 ORDER BY created_at ASC",
                    SCHEDULE_COLUMNS
                ))?;
                let schedules = stmt
                    .query_map([], row_to_schedule)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(schedules)
            })
            .await
            .map_err(db_error("list active scheduled archives"))
    }

    async fn update(&self, schedule: &ScheduledArchive) -> Result<()> {
        let schedule = schedule.clone();
        let url = schedule.url.clone();

        let updated = self
            .connection
            .call(move |conn| {
                let result = conn.execute(
                    r#"
                    UPDATE scheduled_archives
                    SET cadence = ?2, is_active = ?3, last_run = ?4, next_run = ?5, updated_at = ?6
                    WHERE id = ?1
                    "#,
                    rusqlite::params![
                        schedule.id.to_string(),
                        schedule.cadence,
                        schedule.is_active,
                        schedule.last_run.map(|t| t.timestamp_millis()),
                        schedule.next_run.map(|t| t.timestamp_millis()),
                        schedule.updated_at.timestamp_millis(),
                    ],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(e) if is_constraint_violation(&e) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(db_error("update scheduled archive"))?;

        if updated {
            Ok(())
        } else {
            Err(ValidationError::DuplicateSchedule { url }.into())
        }
    }

    async fn record_run(
        &self,
        id: &ScheduleId,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let id_str = id.to_string();

        self.connection
            .call(move |conn| {
                conn.execute(
                    "UPDATE scheduled_archives SET last_run = ?2, next_run = ?3, updated_at = ?4 \
                     WHERE id = ?1",
                    rusqlite::params![
                        id_str,
                        last_run.timestamp_millis(),
                        next_run.map(|t| t.timestamp_millis()),
                        Utc::now().timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(db_error("record scheduled run"))
    }

    async fn delete(&self, id: &ScheduleId) -> Result<bool> {
        let id_str = id.to_string();

        self.connection
            .call(move |conn| {
                let changed =
                    conn.execute("DELETE FROM scheduled_archives WHERE id = ?1", [&id_str])?;
                Ok(changed > 0)
            })
            .await
            .map_err(db_error("delete scheduled archive"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabaseManager;
    use chrono::Duration;

    fn sample_archive() -> Archive {
        Archive::in_progress(
            "example.com",
            "https://example.com",
            Utc::now(),
            PathBuf::from("./archives/example.com/2024-01-01-00-00-00"),
        )
    }

    fn sample_page(archive_id: ArchiveId, url: &str) -> Page {
        Page {
            id: PageId::new(),
            archive_id,
            url: url.to_string(),
            title: Some("Title".to_string()),
            file_path: "pages/index.html".to_string(),
            links_count: 3,
            created_at: Utc::now(),
        }
    }

    fn sample_asset(page_id: PageId, name: &str) -> Asset {
        Asset {
            id: AssetId::new(),
            page_id,
            kind: AssetKind::Stylesheet,
            original_url: format!("https://example.com/{}", name),
            local_path: format!("assets/stylesheet/{}", name),
            size: 120,
            compressed_size: Some(80),
            mime_type: "text/css".to_string(),
            created_at: Utc::now(),
        }
    }

    fn sample_schedule(url: &str) -> ScheduledArchive {
        let now = Utc::now();
        ScheduledArchive {
            id: ScheduleId::new(),
            url: url.to_string(),
            domain: "example.com".to_string(),
            cadence: "0 0 * * 0".to_string(),
            is_active: true,
            last_run: None,
            next_run: Some(now + Duration::days(1)),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_archive_create_and_get() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.archive_repository();
        let archive = sample_archive();

        repo.create(&archive).await.unwrap();
        let loaded = repo.get_by_id(&archive.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, archive.id);
        assert_eq!(loaded.status, ArchiveStatus::InProgress);
        assert_eq!(loaded.storage_path, archive.storage_path);
        assert!(repo.get_by_id(&ArchiveId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_transition_is_monotonic() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.archive_repository();
        let archive = sample_archive();
        repo.create(&archive).await.unwrap();

        assert!(repo.transition_status(&archive.id, ArchiveStatus::Completed).await.unwrap());
        assert!(!repo.transition_status(&archive.id, ArchiveStatus::Failed).await.unwrap());
        assert!(!repo.transition_status(&archive.id, ArchiveStatus::InProgress).await.unwrap());

        let loaded = repo.get_by_id(&archive.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ArchiveStatus::Completed);
    }

    #[tokio::test]
    async fn test_list_archives_newest_first() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.archive_repository();

        let mut older = sample_archive();
        older.created_at = Utc::now() - Duration::hours(2);
        let newer = sample_archive();
        repo.create(&older).await.unwrap();
        repo.create(&newer).await.unwrap();

        let listed = repo.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[tokio::test]
    async fn test_pages_and_assets_cascade_with_archive() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let archives = db.archive_repository();
        let pages = db.page_repository();
        let assets = db.asset_repository();

        let archive = sample_archive();
        archives.create(&archive).await.unwrap();
        let page = sample_page(archive.id, "https://example.com");
        pages.create(&page).await.unwrap();
        assets.create(&sample_asset(page.id, "a.css")).await.unwrap();
        assets.create(&sample_asset(page.id, "b.css")).await.unwrap();

        assert_eq!(pages.count_by_archive(&archive.id).await.unwrap(), 1);
        assert_eq!(assets.count_by_archive(&archive.id).await.unwrap(), 2);

        let summaries = pages.list_summaries_by_archive(&archive.id).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].asset_count, 2);

        let stored = assets.list_by_page(&page.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].is_compressed());

        assert!(archives.delete(&archive.id).await.unwrap());
        assert_eq!(pages.count_by_archive(&archive.id).await.unwrap(), 0);
        assert!(assets.list_by_page(&page.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pages_listed_in_crawl_order() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let archives = db.archive_repository();
        let pages = db.page_repository();

        let archive = sample_archive();
        archives.create(&archive).await.unwrap();
        let created_at = Utc::now();
        for path in ["", "/about", "/contact"] {
            let mut page = sample_page(archive.id, &format!("https://example.com{}", path));
            page.created_at = created_at;
            pages.create(&page).await.unwrap();
        }

        let urls: Vec<String> = pages
            .list_by_archive(&archive.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.url)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com",
                "https://example.com/about",
                "https://example.com/contact"
            ]
        );
    }

    #[tokio::test]
    async fn test_second_active_schedule_for_url_rejected() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.schedule_repository();

        repo.create(&sample_schedule("https://example.com")).await.unwrap();
        let err = repo.create(&sample_schedule("https://example.com")).await.unwrap_err();
        assert!(err.is_validation());

        let mut inactive = sample_schedule("https://example.com");
        inactive.is_active = false;
        repo.create(&inactive).await.unwrap();

        inactive.is_active = true;
        let err = repo.update(&inactive).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_schedule_list_ordered_by_next_run() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.schedule_repository();

        let mut later = sample_schedule("https://later.example.com");
        later.next_run = Some(Utc::now() + Duration::days(3));
        let mut sooner = sample_schedule("https://sooner.example.com");
        sooner.next_run = Some(Utc::now() + Duration::hours(1));
        let mut never = sample_schedule("https://never.example.com");
        never.next_run = None;

        repo.create(&never).await.unwrap();
        repo.create(&later).await.unwrap();
        repo.create(&sooner).await.unwrap();

        let ids: Vec<ScheduleId> = repo.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![sooner.id, later.id, never.id]);
    }

    #[tokio::test]
    async fn test_record_run_and_delete_schedule() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.schedule_repository();
        let schedule = sample_schedule("https://example.com");
        repo.create(&schedule).await.unwrap();

        let ran_at = Utc::now();
        let next = ran_at + Duration::days(7);
        repo.record_run(&schedule.id, ran_at, Some(next)).await.unwrap();

        let loaded = repo.get_by_id(&schedule.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_run.map(|t| t.timestamp_millis()), Some(ran_at.timestamp_millis()));
        assert_eq!(loaded.next_run.map(|t| t.timestamp_millis()), Some(next.timestamp_millis()));

        assert_eq!(repo.list_active().await.unwrap().len(), 1);
        assert!(repo.delete(&schedule.id).await.unwrap());
        assert!(!repo.delete(&schedule.id).await.unwrap());
        assert!(repo.find_active_by_url("https://example.com").await.unwrap().is_none());
    }
}
