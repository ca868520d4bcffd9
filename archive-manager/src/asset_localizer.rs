//! Asset Localizer
//!
//! Downloads the resources a page references and stores them under
//! `assets/<kind>/` of the archive. A failed download is logged and the
//! asset dropped; it never fails the page.

use crate::markup::AssetReference;
use crate::storage::ArchiveStorage;
use browser_connector::ResourceFetcher;
use sha2::{Digest, Sha256};
use site_archiver_core::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Assets stored for one page
#[derive(Debug, Clone, Default)]
pub struct LocalizedAssets {
    pub records: Vec<AssetRecord>,
    /// Reference as written in the markup to its archive-relative local path
    pub replacements: HashMap<String, String>,
}

pub struct AssetLocalizer {
    fetcher: Arc<dyn ResourceFetcher>,
    storage: Arc<ArchiveStorage>,
}

impl AssetLocalizer {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, storage: Arc<ArchiveStorage>) -> Self {
        Self { fetcher, storage }
    }

    /// Download and store every reference of a page. A URL referenced more
    /// than once is downloaded once.
    pub async fn localize(
        &self,
        page_url: &Url,
        references: &[AssetReference],
        archive_root: &Path,
    ) -> LocalizedAssets {
        let mut localized = LocalizedAssets::default();
        let mut by_url: HashMap<String, Option<String>> = HashMap::new();

        for reference in references {
            let Some(resolved) = resolve_asset_url(page_url, &reference.url) else {
                debug!("Skipping asset reference {}", reference.url);
                continue;
            };
            let resolved = resolved.to_string();

            if let Some(previous) = by_url.get(&resolved) {
                if let Some(local_path) = previous {
                    localized
                        .replacements
                        .insert(reference.url.clone(), local_path.clone());
                }
                continue;
            }

            match self.download(reference.kind, &resolved, archive_root).await {
                Ok(record) => {
                    localized
                        .replacements
                        .insert(reference.url.clone(), record.local_path.clone());
                    by_url.insert(resolved, Some(record.local_path.clone()));
                    localized.records.push(record);
                }
                Err(e) => {
                    warn!("Dropping asset {}: {}", resolved, e);
                    by_url.insert(resolved, None);
                }
            }
        }

        localized
    }

    async fn download(&self, kind: AssetKind, url: &str, archive_root: &Path) -> Result<AssetRecord> {
        let resource = self.fetcher.fetch_bytes(url).await?;

        let filename = self.storage.sanitize_filename(&asset_filename(url));
        let local_path = format!("assets/{}/{}", kind.dir_name(), filename);
        let stored = self
            .storage
            .write_file(&archive_root.join(&local_path), &resource.bytes)
            .await?;

        let mime_type = resource
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| kind.default_mime_type().to_string());

        debug!("Localized {} -> {}", url, local_path);

        Ok(AssetRecord {
            kind,
            original_url: url.to_string(),
            local_path,
            size: stored.size,
            compressed_size: stored.compressed_size,
            mime_type,
        })
    }
}

/// Resolve a reference against its page. Inline and non-network
/// references (`data:`, `javascript:`, `blob:`, ...) yield `None`.
pub fn resolve_asset_url(page_url: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    let mut resolved = page_url.join(reference).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Last path segment of the URL, or `asset_<hash>` when it has none
pub fn asset_filename(url: &str) -> String {
    let segment = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
    });

    match segment {
        Some(name) if !name.is_empty() => name,
        _ => {
            let mut hasher = Sha256::new();
            hasher.update(url.as_bytes());
            let digest = format!("{:x}", hasher.finalize());
            format!("asset_{}", &digest[..16])
        }
    }
}
