//! Serve-time link rewriting
//!
//! Anchors that point at a stored page and references into `assets/` are
//! routed through `<public base>/api/archives/<id>/serve/`. Values that are
//! already qualified are left alone, so rewriting twice changes nothing.

use crate::markup::{self, UrlSlot};
use site_archiver_core::*;
use std::collections::HashMap;
use url::Url;

pub struct LinkRewriter {
    serve_prefix: String,
    lookup: HashMap<String, String>,
}

impl LinkRewriter {
    pub fn new(public_base_url: &str, archive_id: &ArchiveId, pages: &[Page]) -> Self {
        let mut lookup = HashMap::new();
        for page in pages {
            for key in url_variants(&page.url) {
                lookup.entry(key).or_insert_with(|| page.file_path.clone());
            }
        }

        Self {
            serve_prefix: serve_prefix(public_base_url, archive_id),
            lookup,
        }
    }

    /// Stored file path for a link target, if it names a crawled page
    pub fn resolve(&self, href: &str) -> Option<&str> {
        let href = href.trim();
        if let Some(path) = self.lookup.get(href) {
            return Some(path.as_str());
        }
        let without_fragment = href.split('#').next().unwrap_or(href);
        self.lookup.get(without_fragment).map(String::as_str)
    }

    pub fn rewrite(&self, html: &str) -> Result<String> {
        markup::rewrite_urls(html, |slot, value| {
            if value.starts_with(&self.serve_prefix) {
                return None;
            }

            match slot {
                UrlSlot::Anchor => {
                    let file_path = self.resolve(value)?;
                    let fragment = value
                        .split_once('#')
                        .map(|(_, f)| format!("#{}", f))
                        .unwrap_or_default();
                    Some(format!("{}/{}{}", self.serve_prefix, file_path, fragment))
                }
                UrlSlot::Resource { .. } => {
                    let local = strip_relative_prefix(value);
                    local
                        .starts_with("assets/")
                        .then(|| format!("{}/{}", self.serve_prefix, local))
                }
            }
        })
    }
}

/// `<public base>/api/archives/<id>/serve`
pub fn serve_prefix(public_base_url: &str, archive_id: &ArchiveId) -> String {
    format!(
        "{}/api/archives/{}/serve",
        public_base_url.trim_end_matches('/'),
        archive_id
    )
}

fn strip_relative_prefix(value: &str) -> &str {
    let mut rest = value;
    loop {
        if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix("../") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
        } else {
            return rest;
        }
    }
}

/// The URL itself plus its path with and without leading and trailing slash
fn url_variants(url: &str) -> Vec<String> {
    let mut variants = vec![url.to_string()];
    if let Some(stripped) = url.strip_suffix('/') {
        variants.push(stripped.to_string());
    } else {
        variants.push(format!("{}/", url));
    }

    if let Ok(parsed) = Url::parse(url) {
        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path = format!("{}?{}", path, query);
        }
        let bare = path.trim_start_matches('/').trim_end_matches('/').to_string();

        if bare.is_empty() {
            variants.push("/".to_string());
        } else {
            variants.push(bare.clone());
            variants.push(format!("{}/", bare));
            variants.push(format!("/{}", bare));
            variants.push(format!("/{}/", bare));
        }
    }

    variants
}
