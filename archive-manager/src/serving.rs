//! Helpers for serving stored archive files

use std::path::{Component, Path, PathBuf};

/// A stored file ready to be returned to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedFile {
    pub content: Vec<u8>,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
}

/// Content type inferred from the file extension
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

pub fn is_html(path: &str) -> bool {
    content_type_for(path) == "text/html"
}

/// Headers allowing the archived copy to be embedded in a frame by the viewer
pub fn framing_headers(public_base_url: &str) -> Vec<(&'static str, String)> {
    vec![
        ("X-Frame-Options", "SAMEORIGIN".to_string()),
        (
            "Content-Security-Policy",
            format!("frame-ancestors 'self' {}", public_base_url.trim_end_matches('/')),
        ),
        ("Access-Control-Allow-Origin", "*".to_string()),
        (
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS".to_string(),
        ),
        (
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization".to_string(),
        ),
    ]
}

/// Join a client-supplied relative path onto the archive root. Absolute
/// paths and paths climbing out of the root yield `None`.
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    (depth > 0).then_some(resolved)
}
