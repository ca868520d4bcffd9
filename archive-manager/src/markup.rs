//! Markup scanning and rewriting
//!
//! URL-bearing attributes are read and rewritten with `lol_html`, which
//! streams the document and re-serialises only the start tags it changes.
//! Values are entity-decoded before callers see them. Title lookup, anchor
//! counting and link discovery go through `scraper`.

use site_archiver_core::*;
use html_escape::{decode_html_entities, encode_double_quoted_attribute};
use lol_html::html_content::Element;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use scraper::{Html, Selector};
use std::cell::RefCell;
use std::error::Error;
use tracing::warn;

type HandlerResult = std::result::Result<(), Box<dyn Error + Send + Sync>>;

/// Role of a URL-bearing attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlSlot {
    /// `a[href]`
    Anchor,
    /// `img[src]`, `script[src]` or `link[href]`. `kind` is set when the
    /// reference is an archivable asset.
    Resource { kind: Option<AssetKind> },
}

/// Reference to a resource the page needs in order to display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    pub kind: AssetKind,
    /// Decoded attribute value
    pub url: String,
}

fn decoded_attribute(el: &Element<'_, '_>, name: &str) -> Option<String> {
    el.get_attribute(name)
        .map(|raw| decode_html_entities(&raw).into_owned())
}

/// Asset kind of a `link` element, from its `rel` and `as` attributes
fn link_kind(el: &Element<'_, '_>) -> Option<AssetKind> {
    let rel: Vec<String> = decoded_attribute(el, "rel")
        .map(|rel| rel.split_ascii_whitespace().map(|t| t.to_ascii_lowercase()).collect())
        .unwrap_or_default();

    if rel.iter().any(|t| t == "stylesheet") {
        Some(AssetKind::Stylesheet)
    } else if rel.iter().any(|t| t == "icon" || t == "apple-touch-icon") {
        Some(AssetKind::Image)
    } else if rel.iter().any(|t| t == "preload")
        && decoded_attribute(el, "as")
            .map(|a| a.trim().eq_ignore_ascii_case("font"))
            .unwrap_or(false)
    {
        Some(AssetKind::Font)
    } else {
        None
    }
}

fn apply<F>(el: &mut Element<'_, '_>, attribute: &str, slot: UrlSlot, rewrite: &RefCell<F>) -> HandlerResult
where
    F: FnMut(UrlSlot, &str) -> Option<String>,
{
    let Some(value) = decoded_attribute(el, attribute) else {
        return Ok(());
    };

    let replacement = {
        let mut rewrite = rewrite.borrow_mut();
        (&mut *rewrite)(slot, value.trim())
    };

    if let Some(replacement) = replacement {
        el.set_attribute(attribute, &encode_double_quoted_attribute(&replacement))?;
    }
    Ok(())
}

/// Visit every anchor and resource URL in document order. `rewrite`
/// receives the decoded, trimmed value and returns a replacement, if any.
/// Start tags without a replacement are emitted byte for byte.
pub fn rewrite_urls<F>(html: &str, rewrite: F) -> Result<String>
where
    F: FnMut(UrlSlot, &str) -> Option<String>,
{
    let rewrite = RefCell::new(rewrite);

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("a[href]", |el| apply(el, "href", UrlSlot::Anchor, &rewrite)),
                element!("img[src]", |el| {
                    apply(el, "src", UrlSlot::Resource { kind: Some(AssetKind::Image) }, &rewrite)
                }),
                element!("script[src]", |el| {
                    apply(el, "src", UrlSlot::Resource { kind: Some(AssetKind::Script) }, &rewrite)
                }),
                element!("link[href]", |el| {
                    let kind = link_kind(el);
                    apply(el, "href", UrlSlot::Resource { kind }, &rewrite)
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| FetchError::MalformedMarkup { reason: e.to_string() }.into())
}

/// Image, stylesheet, script, icon and preloaded font references in document order
pub fn extract_asset_references(html: &str) -> Vec<AssetReference> {
    let mut references = Vec::new();

    let scanned = rewrite_urls(html, |slot, value| {
        if let UrlSlot::Resource { kind: Some(kind) } = slot {
            if !value.is_empty() {
                references.push(AssetReference {
                    kind,
                    url: value.to_string(),
                });
            }
        }
        None
    });

    if let Err(e) = scanned {
        warn!("Asset scan stopped early: {}", e);
    }
    references
}

/// Document title, if present and non-blank
pub fn page_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

/// Number of `<a>` elements in the document
pub fn count_anchors(html: &str) -> usize {
    let Ok(selector) = Selector::parse("a") else {
        return 0;
    };
    Html::parse_document(html).select(&selector).count()
}

/// Extract hyperlink targets, skipping script, mail, phone and data links
pub fn extract_links(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    for element in document.select(&selector) {
        if let Some(href) = element.value().attr("href") {
            let cleaned = href.trim();
            if !cleaned.is_empty()
                && !cleaned.starts_with("javascript:")
                && !cleaned.starts_with("mailto:")
                && !cleaned.starts_with("tel:")
                && !cleaned.starts_with("data:")
            {
                links.push(cleaned.to_string());
            }
        }
    }

    links
}
