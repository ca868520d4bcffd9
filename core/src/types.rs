//! Core data types shared by every layer of the site archiver

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an id from its hyphenated string form
            pub fn parse(value: &str) -> Option<Self> {
                Uuid::parse_str(value).ok().map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identity of one crawl attempt
    ArchiveId
);
define_id!(
    /// Identity of a stored page
    PageId
);
define_id!(AssetId);
define_id!(
    /// Identity of a recurring archive definition
    ScheduleId
);

/// Lifecycle state of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ArchiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveStatus::Pending => "PENDING",
            ArchiveStatus::InProgress => "IN_PROGRESS",
            ArchiveStatus::Completed => "COMPLETED",
            ArchiveStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ArchiveStatus::Pending),
            "IN_PROGRESS" => Some(ArchiveStatus::InProgress),
            "COMPLETED" => Some(ArchiveStatus::Completed),
            "FAILED" => Some(ArchiveStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states are never left once reached
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArchiveStatus::Completed | ArchiveStatus::Failed)
    }

    pub fn can_transition_to(&self, next: ArchiveStatus) -> bool {
        !self.is_terminal() && next.is_terminal()
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a downloaded resource, derived from the tag referencing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetKind {
    Image,
    Stylesheet,
    Script,
    Font,
    Other,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "IMAGE",
            AssetKind::Stylesheet => "STYLESHEET",
            AssetKind::Script => "SCRIPT",
            AssetKind::Font => "FONT",
            AssetKind::Other => "OTHER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IMAGE" => Some(AssetKind::Image),
            "STYLESHEET" => Some(AssetKind::Stylesheet),
            "SCRIPT" => Some(AssetKind::Script),
            "FONT" => Some(AssetKind::Font),
            "OTHER" => Some(AssetKind::Other),
            _ => None,
        }
    }

    /// Subdirectory of `assets/` holding resources of this kind
    pub fn dir_name(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Stylesheet => "stylesheet",
            AssetKind::Script => "script",
            AssetKind::Font => "font",
            AssetKind::Other => "other",
        }
    }

    /// MIME type recorded when the server does not report one
    pub fn default_mime_type(&self) -> &'static str {
        match self {
            AssetKind::Image => "image/*",
            AssetKind::Stylesheet => "text/css",
            AssetKind::Script => "application/javascript",
            AssetKind::Font => "font/*",
            AssetKind::Other => "application/octet-stream",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete crawl attempt for a root URL at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub id: ArchiveId,
    pub domain: String,
    pub root_url: String,
    pub created_at: DateTime<Utc>,
    pub status: ArchiveStatus,
    pub total_pages: u32,
    pub total_assets: u32,
    /// Directory holding every stored file of this archive
    pub storage_path: PathBuf,
}

impl Archive {
    /// A freshly created archive whose crawl is about to start
    pub fn in_progress(domain: &str, root_url: &str, created_at: DateTime<Utc>, storage_path: PathBuf) -> Self {
        Self {
            id: ArchiveId::new(),
            domain: domain.to_string(),
            root_url: root_url.to_string(),
            created_at,
            status: ArchiveStatus::InProgress,
            total_pages: 0,
            total_assets: 0,
            storage_path,
        }
    }
}

/// A crawled and locally stored HTML document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub archive_id: ArchiveId,
    pub url: String,
    pub title: Option<String>,
    /// Path relative to the archive storage root
    pub file_path: String,
    pub links_count: u32,
    pub created_at: DateTime<Utc>,
}

/// A non-HTML resource referenced by a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub page_id: PageId,
    pub kind: AssetKind,
    pub original_url: String,
    pub local_path: String,
    pub size: u64,
    pub compressed_size: Option<u64>,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn is_compressed(&self) -> bool {
        self.compressed_size.is_some()
    }
}

/// A page together with the number of assets stored for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page: Page,
    pub asset_count: u32,
}

/// Archives of one domain, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainGroup {
    pub domain: String,
    pub root_url: String,
    pub total_versions: usize,
    pub latest_archive: Archive,
    pub versions: Vec<Archive>,
}

/// Persisted recurring-archive definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledArchive {
    pub id: ScheduleId,
    pub url: String,
    pub domain: String,
    pub cadence: String,
    pub is_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied to a scheduled archive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub cadence: Option<String>,
    pub is_active: Option<bool>,
}

/// Asset produced by the localizer for one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub kind: AssetKind,
    pub original_url: String,
    /// Path relative to the archive storage root, `/`-separated
    pub local_path: String,
    pub size: u64,
    pub compressed_size: Option<u64>,
    pub mime_type: String,
}

/// Page produced by the crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: Option<String>,
    /// Path relative to the archive storage root, `/`-separated
    pub file_path: String,
    pub links_count: u32,
    pub assets: Vec<AssetRecord>,
}

/// Output of one crawl. `total_assets` always equals the sum of the per-page asset lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlResult {
    pages: Vec<PageRecord>,
    total_assets: usize,
}

impl CrawlResult {
    pub fn new(pages: Vec<PageRecord>) -> Self {
        let total_assets = pages.iter().map(|p| p.assets.len()).sum();
        Self { pages, total_assets }
    }

    pub fn pages(&self) -> &[PageRecord] {
        &self.pages
    }

    pub fn total_assets(&self) -> usize {
        self.total_assets
    }

    pub fn into_pages(self) -> Vec<PageRecord> {
        self.pages
    }
}

/// Liveness of one registered scheduler job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: ScheduleId,
    pub url: String,
    pub cadence: String,
    pub is_running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub jobs: Vec<JobStatus>,
}
