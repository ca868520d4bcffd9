//! Archive Storage Manager
//!
//! Lays archives out as `<base>/<domain>/<YYYY-MM-DD-HH-MM-SS>` and stores
//! files with transparent gzip compression of text-like payloads. A
//! compressed file keeps its logical name with `.gz` appended; readers ask
//! for the logical name and always get the original bytes back.

use site_archiver_core::*;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 255;

/// Suffix marking a compressed file on disk
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Markup, stylesheet, script, structured data, vector image and plain text
const COMPRESSIBLE_EXTENSIONS: &[&str] = &[
    "html", "htm", "css", "js", "mjs", "json", "xml", "svg", "txt", "csv", "map",
];

const RESERVED_CHARACTERS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Configuration for archive storage
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory holding every archive
    pub base_path: PathBuf,
    /// Upper bound for generated file names, in bytes
    pub max_filename_length: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./archives"),
            max_filename_length: DEFAULT_MAX_FILENAME_LENGTH,
        }
    }
}

/// Outcome of a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path actually written, including the compression suffix if any
    pub path: PathBuf,
    /// Length of the logical content
    pub size: u64,
    pub compressed_size: Option<u64>,
}

/// File storage for archives
pub struct ArchiveStorage {
    config: StorageConfig,
}

impl ArchiveStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    /// Directory for one crawl of `domain` started at `timestamp`.
    /// Sortable lexicographically and free of filesystem-reserved characters.
    pub fn generate_archive_path(&self, domain: &str, timestamp: DateTime<Utc>) -> PathBuf {
        self.config
            .base_path
            .join(self.sanitize_filename(domain))
            .join(timestamp.format("%Y-%m-%d-%H-%M-%S").to_string())
    }

    pub fn sanitize_filename(&self, name: &str) -> String {
        sanitize_filename_with_limit(name, self.config.max_filename_length)
    }

    /// Whether content stored at `path` is compressed
    pub fn is_compressible(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                COMPRESSIBLE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }

    pub async fn create_directory(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await.map_err(|e| io_error(path, e))
    }

    /// Write `content` at `path`, creating parent directories first
    pub async fn write_file(&self, path: &Path, content: &[u8]) -> Result<StoredFile> {
        if let Some(parent) = path.parent() {
            self.create_directory(parent).await?;
        }

        if Self::is_compressible(path) {
            let compressed = gzip(content).map_err(|e| StorageError::Compression {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let target = compressed_path(path);
            tokio::fs::write(&target, &compressed)
                .await
                .map_err(|e| io_error(&target, e))?;

            debug!(
                "Stored {} ({} -> {} bytes)",
                target.display(),
                content.len(),
                compressed.len()
            );

            Ok(StoredFile {
                path: target,
                size: content.len() as u64,
                compressed_size: Some(compressed.len() as u64),
            })
        } else {
            tokio::fs::write(path, content)
                .await
                .map_err(|e| io_error(path, e))?;

            debug!("Stored {} ({} bytes)", path.display(), content.len());

            Ok(StoredFile {
                path: path.to_path_buf(),
                size: content.len() as u64,
                compressed_size: None,
            })
        }
    }

    /// Read the logical content at `path`, preferring the compressed variant
    pub async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let compressed = compressed_path(path);
        if tokio::fs::try_exists(&compressed).await.unwrap_or(false) {
            let bytes = tokio::fs::read(&compressed)
                .await
                .map_err(|e| io_error(&compressed, e))?;
            return gunzip(&bytes).map_err(|e| {
                StorageError::Compression {
                    path: compressed.display().to_string(),
                    reason: e.to_string(),
                }
                .into()
            });
        }

        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(NotFoundError::StoredFile {
                path: path.display().to_string(),
            }
            .into()),
            Err(e) => Err(io_error(path, e)),
        }
    }

    /// Whether either variant of `path` exists
    pub async fn file_exists(&self, path: &Path) -> bool {
        let compressed = compressed_path(path);
        tokio::fs::try_exists(&compressed).await.unwrap_or(false)
            || tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
    }
}

/// Sanitize with the default length bound
pub fn sanitize_filename(name: &str) -> String {
    sanitize_filename_with_limit(name, DEFAULT_MAX_FILENAME_LENGTH)
}

/// Replace reserved and control characters with `_`, collapse whitespace
/// runs into a single `_`, then truncate to `max_len` bytes on a character
/// boundary. Applying it twice yields the same name.
pub fn sanitize_filename_with_limit(name: &str, max_len: usize) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut in_whitespace = false;

    for c in name.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                sanitized.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;

        if RESERVED_CHARACTERS.contains(&c) || c.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(c);
        }
    }

    if sanitized.len() > max_len {
        let mut end = max_len;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
    }

    if sanitized == "." || sanitized == ".." {
        return "_".to_string();
    }

    sanitized
}

fn compressed_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(COMPRESSED_SUFFIX);
    PathBuf::from(name)
}

fn io_error(path: &Path, source: std::io::Error) -> ArchiverError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
    .into()
}

fn gzip(content: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content)?;
    encoder.finish()
}

fn gunzip(content: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(content);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> ArchiveStorage {
        ArchiveStorage::new(StorageConfig {
            base_path: dir.path().to_path_buf(),
            max_filename_length: DEFAULT_MAX_FILENAME_LENGTH,
        })
    }

    #[test]
    fn test_archive_path_layout() {
        let storage = ArchiveStorage::new(StorageConfig::default());
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let path = storage.generate_archive_path("example.com", ts);
        assert_eq!(path, PathBuf::from("./archives/example.com/2024-03-09-07-05-01"));
    }

    #[test]
    fn test_sanitize_filename_rules() {
        assert_eq!(sanitize_filename("a<b>c:d\"e/f\\g|h?i*j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("my   page\tname.html"), "my_page_name.html");
        assert_eq!(sanitize_filename(".."), "_");
        assert_eq!(sanitize_filename_with_limit("abcdef", 4), "abcd");
        // multi-byte characters are never split
        assert_eq!(sanitize_filename_with_limit("ééé", 3), "é");
    }

    #[tokio::test]
    async fn test_markup_is_compressed_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let path = dir.path().join("pages").join("index.html");
        let html = b"<html><body>hello hello hello hello</body></html>";

        let stored = storage.write_file(&path, html).await.unwrap();
        assert_eq!(stored.path, dir.path().join("pages").join("index.html.gz"));
        assert_eq!(stored.size, html.len() as u64);
        assert!(stored.compressed_size.is_some());
        assert!(!path.exists());

        assert!(storage.file_exists(&path).await);
        assert_eq!(storage.read_file(&path).await.unwrap(), html.to_vec());
    }

    #[tokio::test]
    async fn test_binary_is_stored_as_is() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let path = dir.path().join("assets").join("image").join("logo.png");
        let png = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 255];

        let stored = storage.write_file(&path, &png).await.unwrap();
        assert_eq!(stored.path, path);
        assert_eq!(stored.compressed_size, None);
        assert_eq!(storage.read_file(&path).await.unwrap(), png);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let err = storage.read_file(&dir.path().join("nope.css")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!storage.file_exists(&dir.path().join("nope.css")).await);
    }
}
