//! Landing-page detection: small HTML pages that stand between a link and
//! the file it promises (paper abstract pages, dataset cards, "click here to
//! download" interstitials).

use scraper::{Html, Selector};
use url::Url;

use crate::domain::{Extension, FetchContext};
use crate::error::FetchwiseError;
use crate::router::ExtensionRouter;

/// Pages larger than this are treated as content in their own right.
pub const DEFAULT_MAX_LANDING_PAGE_BYTES: usize = 1_000_000;

const MARKUP_MIME_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];
const MARKUP_EXTENSIONS: &[&str] = &[
    ".html", ".htm", ".xhtml", ".shtml", ".php", ".asp", ".aspx", ".jsp",
];

/// One anchor of a page, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    pub href: String,
    pub text: String,
}

/// Extracts `a[href]` anchors with their whitespace-collapsed inner text.
///
/// Bodies that are clearly binary (NUL bytes near the start) are rejected as
/// unparseable.
pub fn parse_links(body: &[u8]) -> Result<Vec<PageLink>, FetchwiseError> {
    if looks_binary(body) {
        return Err(FetchwiseError::Markup("body is not text".to_string()));
    }
    let text = String::from_utf8_lossy(body);
    let document = Html::parse_document(&text);
    let selector =
        Selector::parse("a[href]").map_err(|err| FetchwiseError::Markup(err.to_string()))?;

    let links = document
        .select(&selector)
        .filter_map(|element| {
            let href = element.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            let text = element
                .text()
                .flat_map(str::split_whitespace)
                .collect::<Vec<_>>()
                .join(" ");
            Some(PageLink {
                href: href.to_string(),
                text,
            })
        })
        .collect();
    Ok(links)
}

fn looks_binary(body: &[u8]) -> bool {
    body.iter().take(crate::domain::SNIFF_LEN).any(|b| *b == 0)
}

/// Markup sniffing for responses without a usable `Content-Type`.
fn sniff_markup(prefix: &[u8]) -> bool {
    let text = String::from_utf8_lossy(prefix);
    let head = text.trim_start_matches('\u{feff}').trim_start().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<html")
}

#[derive(Debug, Clone)]
pub struct LandingPageDetector {
    router: ExtensionRouter,
    max_bytes: usize,
}

impl Default for LandingPageDetector {
    fn default() -> Self {
        Self::new(ExtensionRouter::default())
    }
}

impl LandingPageDetector {
    /// Priority extensions and known types are taken from `router`.
    pub fn new(router: ExtensionRouter) -> Self {
        Self {
            router,
            max_bytes: DEFAULT_MAX_LANDING_PAGE_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn router(&self) -> &ExtensionRouter {
        &self.router
    }

    pub fn is_landing_page(&self, context: &FetchContext) -> bool {
        let is_markup = match context.mime_type() {
            Some(mime) => MARKUP_MIME_TYPES.contains(&mime.as_str()),
            None => sniff_markup(context.prefix()),
        };
        if !is_markup {
            return false;
        }

        if let Some(ext) = context.url_extension() {
            if self.is_known_non_markup(&ext) {
                return false;
            }
        }

        if context.body_len() > self.max_bytes {
            return false;
        }

        parse_links(context.body()).is_ok()
    }

    /// Best download link on the page, or `None` when nothing qualifies.
    pub fn extract_target(&self, context: &FetchContext) -> Option<String> {
        let links = parse_links(context.body()).ok()?;
        let base = Url::parse(context.final_url())
            .or_else(|_| Url::parse(context.url()))
            .ok()?;

        links
            .iter()
            .enumerate()
            .filter_map(|(position, link)| {
                let resolved = base.join(&link.href).ok()?;
                if !matches!(resolved.scheme(), "http" | "https") {
                    return None;
                }
                let ext = Extension::from_url(resolved.as_str())?;
                let rank = self.router.priority_rank(&ext)?;
                Some((rank, position, resolved))
            })
            .min_by_key(|(rank, position, _)| (*rank, *position))
            .map(|(_, _, url)| url.to_string())
    }

    fn is_known_non_markup(&self, ext: &Extension) -> bool {
        !MARKUP_EXTENSIONS.contains(&ext.as_str()) && self.router.is_known_extension(ext)
    }
}
