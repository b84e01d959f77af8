use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::FetchwiseError;

/// Number of leading body bytes kept for signature sniffing.
pub const SNIFF_LEN: usize = 512;

const MAX_EXTENSION_LEN: usize = 16;
const MAX_URL_EXTENSION_LEN: usize = 10;
const COMPOUND_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst"];
const PLACEHOLDER_EXTENSIONS: &[&str] = &[".bin", ".tmp", ".dat", ".download"];

/// A normalized file extension: leading dot, lower case, never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Extension(String);

impl Extension {
    /// Builds an extension from a literal known to be normalized.
    pub(crate) fn known(value: &str) -> Self {
        debug_assert!(value.starts_with('.') && value.len() > 1);
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generic names servers hand out when they do not know better.
    pub fn is_placeholder(&self) -> bool {
        PLACEHOLDER_EXTENSIONS.contains(&self.0.as_str())
    }

    /// Extension carried by a file name, if it looks like a real one.
    ///
    /// Purely numeric suffixes (`2103.00020`) are not extensions.
    pub fn from_filename(name: &str) -> Option<Self> {
        split_extension(name).1
    }

    /// Extension of the last path segment of `url`.
    pub fn from_url(url: &str) -> Option<Self> {
        url_last_segment(url).and_then(|segment| Self::from_filename(&segment))
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Extension {
    type Err = FetchwiseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_start_matches('.').to_ascii_lowercase();
        let is_valid = !normalized.is_empty()
            && normalized.len() <= MAX_EXTENSION_LEN
            && !normalized.ends_with('.')
            && !normalized.contains("..")
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '.');
        if !is_valid {
            return Err(FetchwiseError::InvalidExtension(value.to_string()));
        }
        Ok(Self(format!(".{normalized}")))
    }
}

impl TryFrom<String> for Extension {
    type Error = FetchwiseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Extension> for String {
    fn from(value: Extension) -> Self {
        value.0
    }
}

/// Splits `name` into its stem and extension, keeping compound archive
/// extensions such as `.tar.gz` together.
pub fn split_extension(name: &str) -> (&str, Option<Extension>) {
    let lower = name.to_ascii_lowercase();
    for compound in COMPOUND_EXTENSIONS {
        if lower.len() > compound.len() && lower.ends_with(compound) {
            let stem = &name[..name.len() - compound.len()];
            return (stem, Some(Extension::known(compound)));
        }
    }

    let Some((stem, ext)) = name.rsplit_once('.') else {
        return (name, None);
    };
    let looks_real = !stem.is_empty()
        && !ext.is_empty()
        && ext.len() <= MAX_URL_EXTENSION_LEN
        && ext.chars().all(|ch| ch.is_ascii_alphanumeric())
        && ext.chars().any(|ch| ch.is_ascii_alphabetic());
    if !looks_real {
        return (name, None);
    }
    (stem, Some(Extension(format!(".{}", ext.to_ascii_lowercase()))))
}

/// Last non-empty path segment of `url`, percent-decoded.
pub fn url_last_segment(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let segment = path.split('/').filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(crate::filename::percent_decode(segment))
}

/// Response headers keyed by lower-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeaders(BTreeMap<String, String>);

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// Everything known about one fetch attempt.
///
/// A context is never mutated once built. Following a landing page yields a
/// fresh context through [`FetchContext::follow`], which records where it came
/// from and how deep the chain is.
#[derive(Debug, Clone, Serialize)]
pub struct FetchContext {
    url: String,
    final_url: String,
    context_text: Option<String>,
    explicit_extension: Option<Extension>,
    status: u16,
    headers: ResponseHeaders,
    #[serde(skip)]
    body: Arc<[u8]>,
    body_len: usize,
    parent_url: Option<String>,
    depth: u8,
}

impl FetchContext {
    pub fn new(
        url: impl Into<String>,
        status: u16,
        headers: ResponseHeaders,
        body: Vec<u8>,
    ) -> Self {
        let url = url.into();
        let body_len = body.len();
        Self {
            final_url: url.clone(),
            url,
            context_text: None,
            explicit_extension: None,
            status,
            headers,
            body: Arc::from(body),
            body_len,
            parent_url: None,
            depth: 0,
        }
    }

    pub fn with_final_url(mut self, final_url: impl Into<String>) -> Self {
        self.final_url = final_url.into();
        self
    }

    pub fn with_context_text(mut self, text: Option<String>) -> Self {
        self.context_text = text;
        self
    }

    pub fn with_explicit_extension(mut self, extension: Option<Extension>) -> Self {
        self.explicit_extension = extension;
        self
    }

    /// Context for the resource a landing page pointed at.
    pub fn follow(
        &self,
        url: impl Into<String>,
        status: u16,
        headers: ResponseHeaders,
        body: Vec<u8>,
    ) -> Self {
        let mut next = Self::new(url, status, headers, body)
            .with_context_text(self.context_text.clone())
            .with_explicit_extension(self.explicit_extension.clone());
        next.parent_url = Some(self.url.clone());
        next.depth = self.depth.saturating_add(1);
        next
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// URL the response actually came from after HTTP redirects.
    pub fn final_url(&self) -> &str {
        &self.final_url
    }

    pub fn context_text(&self) -> Option<&str> {
        self.context_text.as_deref()
    }

    pub fn explicit_extension(&self) -> Option<&Extension> {
        self.explicit_extension.as_ref()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// MIME type without parameters, lower-cased.
    pub fn mime_type(&self) -> Option<String> {
        let raw = self.content_type()?;
        let essence = raw.split(';').next().unwrap_or_default().trim();
        (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
    }

    pub fn prefix(&self) -> &[u8] {
        &self.body[..self.body.len().min(SNIFF_LEN)]
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_len(&self) -> usize {
        self.body_len
    }

    pub fn parent_url(&self) -> Option<&str> {
        self.parent_url.as_deref()
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Extension visible in the requested URL, falling back to the
    /// post-redirect URL.
    pub fn url_extension(&self) -> Option<Extension> {
        Extension::from_url(&self.url).or_else(|| Extension::from_url(&self.final_url))
    }
}
