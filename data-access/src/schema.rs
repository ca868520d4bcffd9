//! Database schema definitions and migrations

/// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Pragmas applied to every connection before the schema
pub const CONNECTION_PRAGMAS: &str = r#"
PRAGMA foreign_keys = ON;
"#;

/// SQL schema for the site archiver database
pub const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL,
    description TEXT
);

-- One row per crawl attempt
CREATE TABLE IF NOT EXISTS archives (
    id TEXT PRIMARY KEY,
    domain TEXT NOT NULL,
    root_url TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    status TEXT NOT NULL,
    total_pages INTEGER NOT NULL DEFAULT 0,
    total_assets INTEGER NOT NULL DEFAULT 0,
    storage_path TEXT NOT NULL
);

-- Stored pages, owned by an archive
CREATE TABLE IF NOT EXISTS pages (
    id TEXT PRIMARY KEY,
    archive_id TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT,
    file_path TEXT NOT NULL,
    links_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (archive_id) REFERENCES archives(id) ON DELETE CASCADE
);

-- Downloaded assets, owned by a page
CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,
    page_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    original_url TEXT NOT NULL,
    local_path TEXT NOT NULL,
    size INTEGER NOT NULL,
    compressed_size INTEGER,
    mime_type TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (page_id) REFERENCES pages(id) ON DELETE CASCADE
);

-- Recurring archive definitions
CREATE TABLE IF NOT EXISTS scheduled_archives (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    domain TEXT NOT NULL,
    cadence TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    last_run INTEGER,
    next_run INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- At most one active schedule per URL
CREATE UNIQUE INDEX IF NOT EXISTS idx_scheduled_archives_active_url
    ON scheduled_archives(url) WHERE is_active = 1;

-- Indexes for common queries
CREATE INDEX IF NOT EXISTS idx_archives_created_at ON archives(created_at);
CREATE INDEX IF NOT EXISTS idx_archives_domain ON archives(domain);
CREATE INDEX IF NOT EXISTS idx_pages_archive_id ON pages(archive_id);
CREATE INDEX IF NOT EXISTS idx_assets_page_id ON assets(page_id);
CREATE INDEX IF NOT EXISTS idx_scheduled_archives_next_run ON scheduled_archives(next_run);
"#;

/// Migration definitions
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// List of all migrations
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        sql: SCHEMA_SQL,
    },
];

/// Get migration by version
pub fn get_migration(version: u32) -> Option<&'static Migration> {
    MIGRATIONS.iter().find(|m| m.version == version)
}
