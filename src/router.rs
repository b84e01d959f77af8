//! Decides which extension a fetched resource really has.
//!
//! Servers routinely lie about `Content-Type` (a PDF served as `text/html` is
//! the classic case), so the router weighs several signals:
//!
//! 1. an explicit extension supplied by the caller always wins;
//! 2. a URL extension from the priority list short-circuits everything else;
//! 3. the ordered strategy list (header MIME type, byte signature,
//!    Content-Disposition name, URL extension) is evaluated, first hit wins;
//! 4. otherwise the default extension is used.
//!
//! All tables are plain data owned by each router instance.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{Extension, FetchContext};
use crate::filename::parse_content_disposition_filename;

pub const DEFAULT_EXTENSION: &str = ".bin";

const DEFAULT_PRIORITY_EXTENSIONS: &[&str] = &[
    ".pdf", ".md", ".ipynb", ".csv", ".json", ".zip", ".tar.gz", ".tgz", ".gz", ".parquet",
    ".txt",
];

const DEFAULT_MIME_TYPES: &[(&str, &str)] = &[
    ("application/pdf", ".pdf"),
    ("application/x-pdf", ".pdf"),
    ("text/html", ".html"),
    ("application/xhtml+xml", ".xhtml"),
    ("text/plain", ".txt"),
    ("text/markdown", ".md"),
    ("text/x-markdown", ".md"),
    ("text/csv", ".csv"),
    ("application/csv", ".csv"),
    ("text/tab-separated-values", ".tsv"),
    ("application/json", ".json"),
    ("application/ld+json", ".jsonld"),
    ("application/x-ndjson", ".jsonl"),
    ("application/x-ipynb+json", ".ipynb"),
    ("application/xml", ".xml"),
    ("text/xml", ".xml"),
    ("application/x-yaml", ".yaml"),
    ("application/yaml", ".yaml"),
    ("text/yaml", ".yaml"),
    ("application/zip", ".zip"),
    ("application/x-zip-compressed", ".zip"),
    ("application/gzip", ".gz"),
    ("application/x-gzip", ".gz"),
    ("application/x-tar", ".tar"),
    ("application/x-bzip2", ".bz2"),
    ("application/x-xz", ".xz"),
    ("application/x-7z-compressed", ".7z"),
    ("application/vnd.apache.parquet", ".parquet"),
    ("application/x-parquet", ".parquet"),
    ("application/x-hdf5", ".h5"),
    ("application/x-sqlite3", ".sqlite"),
    ("application/epub+zip", ".epub"),
    ("application/rtf", ".rtf"),
    ("application/msword", ".doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".docx",
    ),
    ("application/vnd.ms-excel", ".xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".xlsx",
    ),
    ("application/vnd.ms-powerpoint", ".ppt"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ".pptx",
    ),
    ("application/postscript", ".ps"),
    ("text/css", ".css"),
    ("text/javascript", ".js"),
    ("application/javascript", ".js"),
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("image/tiff", ".tiff"),
    ("audio/mpeg", ".mp3"),
    ("audio/ogg", ".ogg"),
    ("audio/flac", ".flac"),
    ("audio/wav", ".wav"),
    ("video/mp4", ".mp4"),
    ("video/webm", ".webm"),
];

const DEFAULT_SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", ".pdf"),
    (b"PK\x03\x04", ".zip"),
    (b"\x1f\x8b", ".gz"),
    (b"BZh", ".bz2"),
    (b"\xfd7zXZ\x00", ".xz"),
    (b"7z\xbc\xaf\x27\x1c", ".7z"),
    (b"PAR1", ".parquet"),
    (b"\x89HDF\r\n\x1a\n", ".h5"),
    (b"\x93NUMPY", ".npy"),
    (b"SQLite format 3\x00", ".sqlite"),
    (b"\x89PNG\r\n\x1a\n", ".png"),
    (b"\xff\xd8\xff", ".jpg"),
    (b"GIF87a", ".gif"),
    (b"GIF89a", ".gif"),
    (b"%!PS", ".ps"),
    (b"{\\rtf", ".rtf"),
    (b"ID3", ".mp3"),
    (b"OggS", ".ogg"),
    (b"fLaC", ".flac"),
];

/// Structured-syntax suffixes (RFC 6839) used when a MIME type is not in the
/// table, e.g. `application/vnd.api+json`.
const MIME_SUFFIXES: &[(&str, &str)] = &[("+json", ".json"), ("+xml", ".xml"), ("+zip", ".zip")];

pub type StrategyFn = Arc<dyn Fn(&FetchContext) -> Option<Extension> + Send + Sync>;

/// What a strategy looks at.
#[derive(Clone)]
pub enum StrategyKind {
    ContentType,
    Signature,
    ContentDisposition,
    UrlPath,
    Custom(StrategyFn),
}

impl fmt::Debug for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::ContentType => write!(f, "ContentType"),
            StrategyKind::Signature => write!(f, "Signature"),
            StrategyKind::ContentDisposition => write!(f, "ContentDisposition"),
            StrategyKind::UrlPath => write!(f, "UrlPath"),
            StrategyKind::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A named routing step.
#[derive(Debug, Clone)]
pub struct RoutingStrategy {
    name: String,
    kind: StrategyKind,
}

impl RoutingStrategy {
    pub fn content_type() -> Self {
        Self::builtin("content_type", StrategyKind::ContentType)
    }

    pub fn signature() -> Self {
        Self::builtin("signature", StrategyKind::Signature)
    }

    pub fn content_disposition() -> Self {
        Self::builtin("content_disposition", StrategyKind::ContentDisposition)
    }

    pub fn url_path() -> Self {
        Self::builtin("url_path", StrategyKind::UrlPath)
    }

    pub fn custom<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&FetchContext) -> Option<Extension> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: StrategyKind::Custom(Arc::new(f)),
        }
    }

    fn builtin(name: &str, kind: StrategyKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StrategyKind {
        &self.kind
    }
}

pub fn default_strategies() -> Vec<RoutingStrategy> {
    vec![
        RoutingStrategy::content_type(),
        RoutingStrategy::signature(),
        RoutingStrategy::content_disposition(),
        RoutingStrategy::url_path(),
    ]
}

pub fn default_priority_extensions() -> Vec<Extension> {
    DEFAULT_PRIORITY_EXTENSIONS
        .iter()
        .map(|ext| Extension::known(ext))
        .collect()
}

pub fn default_mime_types() -> BTreeMap<String, Extension> {
    DEFAULT_MIME_TYPES
        .iter()
        .map(|(mime, ext)| (mime.to_string(), Extension::known(ext)))
        .collect()
}

pub fn default_signatures() -> Vec<(Vec<u8>, Extension)> {
    DEFAULT_SIGNATURES
        .iter()
        .map(|(magic, ext)| (magic.to_vec(), Extension::known(ext)))
        .collect()
}

/// Which step produced the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "strategy", rename_all = "snake_case")]
pub enum ResolutionSource {
    Explicit,
    Priority,
    Strategy(String),
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub extension: Extension,
    pub source: ResolutionSource,
}

#[derive(Debug, Clone)]
pub struct ExtensionRouter {
    strategies: Vec<RoutingStrategy>,
    priority_extensions: Vec<Extension>,
    mime_types: BTreeMap<String, Extension>,
    signatures: Vec<(Vec<u8>, Extension)>,
    default_extension: Extension,
}

impl Default for ExtensionRouter {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ExtensionRouter {
    pub fn builder() -> ExtensionRouterBuilder {
        ExtensionRouterBuilder::default()
    }

    /// A builder seeded with this router's tables.
    pub fn to_builder(&self) -> ExtensionRouterBuilder {
        ExtensionRouterBuilder {
            strategies: self.strategies.clone(),
            priority_extensions: self.priority_extensions.clone(),
            mime_types: self.mime_types.clone(),
            signatures: self.signatures.clone(),
            default_extension: self.default_extension.clone(),
        }
    }

    pub fn strategies(&self) -> &[RoutingStrategy] {
        &self.strategies
    }

    /// Priority extensions in declared order.
    pub fn priority_extensions(&self) -> &[Extension] {
        &self.priority_extensions
    }

    pub fn mime_types(&self) -> &BTreeMap<String, Extension> {
        &self.mime_types
    }

    pub fn signatures(&self) -> &[(Vec<u8>, Extension)] {
        &self.signatures
    }

    pub fn default_extension(&self) -> &Extension {
        &self.default_extension
    }

    /// Position of `extension` in the priority list; lower ranks win.
    pub fn priority_rank(&self, extension: &Extension) -> Option<usize> {
        self.priority_extensions
            .iter()
            .position(|candidate| candidate == extension)
    }

    pub fn is_priority(&self, extension: &Extension) -> bool {
        self.priority_rank(extension).is_some()
    }

    /// Whether any table of this router knows `extension`.
    pub fn is_known_extension(&self, extension: &Extension) -> bool {
        self.is_priority(extension)
            || self.mime_types.values().any(|ext| ext == extension)
            || self.signatures.iter().any(|(_, ext)| ext == extension)
    }

    /// Looks up a MIME type, ignoring parameters and case.
    pub fn extension_for_mime(&self, content_type: &str) -> Option<Extension> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.is_empty() {
            return None;
        }
        if let Some(ext) = self.mime_types.get(&essence) {
            return Some(ext.clone());
        }
        MIME_SUFFIXES
            .iter()
            .find(|(suffix, _)| essence.ends_with(suffix))
            .map(|(_, ext)| Extension::known(ext))
    }

    pub fn sniff(&self, bytes: &[u8]) -> Option<Extension> {
        self.signatures
            .iter()
            .find(|(magic, _)| !magic.is_empty() && bytes.starts_with(magic))
            .map(|(_, ext)| ext.clone())
    }

    pub fn resolve(&self, context: &FetchContext) -> Extension {
        self.resolve_detailed(context).extension
    }

    pub fn resolve_detailed(&self, context: &FetchContext) -> Resolution {
        if let Some(explicit) = context.explicit_extension() {
            return Resolution {
                extension: explicit.clone(),
                source: ResolutionSource::Explicit,
            };
        }

        if let Some(url_ext) = context.url_extension() {
            if self.is_priority(&url_ext) {
                return Resolution {
                    extension: url_ext,
                    source: ResolutionSource::Priority,
                };
            }
        }

        for strategy in &self.strategies {
            if let Some(extension) = self.evaluate(strategy, context) {
                return Resolution {
                    extension,
                    source: ResolutionSource::Strategy(strategy.name.clone()),
                };
            }
        }

        Resolution {
            extension: self.default_extension.clone(),
            source: ResolutionSource::Default,
        }
    }

    fn evaluate(&self, strategy: &RoutingStrategy, context: &FetchContext) -> Option<Extension> {
        match &strategy.kind {
            StrategyKind::ContentType => context
                .content_type()
                .and_then(|value| self.extension_for_mime(value)),
            StrategyKind::Signature => self.sniff(context.prefix()),
            StrategyKind::ContentDisposition => context
                .headers()
                .get("content-disposition")
                .and_then(parse_content_disposition_filename)
                .and_then(|name| Extension::from_filename(&name))
                .filter(|ext| !ext.is_placeholder()),
            StrategyKind::UrlPath => context.url_extension().filter(|ext| !ext.is_placeholder()),
            StrategyKind::Custom(f) => f(context),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtensionRouterBuilder {
    strategies: Vec<RoutingStrategy>,
    priority_extensions: Vec<Extension>,
    mime_types: BTreeMap<String, Extension>,
    signatures: Vec<(Vec<u8>, Extension)>,
    default_extension: Extension,
}

impl Default for ExtensionRouterBuilder {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            priority_extensions: default_priority_extensions(),
            mime_types: default_mime_types(),
            signatures: default_signatures(),
            default_extension: Extension::known(DEFAULT_EXTENSION),
        }
    }
}

impl ExtensionRouterBuilder {
    pub fn strategies(mut self, strategies: Vec<RoutingStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Inserts `strategy` ahead of the built-in ones.
    pub fn prepend_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategies.insert(0, strategy);
        self
    }

    pub fn push_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Replaces the priority list; duplicates keep their first position.
    pub fn priority_extensions<I>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = Extension>,
    {
        let mut ordered: Vec<Extension> = Vec::new();
        for ext in extensions {
            if !ordered.contains(&ext) {
                ordered.push(ext);
            }
        }
        self.priority_extensions = ordered;
        self
    }

    pub fn mime_types(mut self, mime_types: BTreeMap<String, Extension>) -> Self {
        self.mime_types = mime_types
            .into_iter()
            .map(|(mime, ext)| (mime.trim().to_ascii_lowercase(), ext))
            .collect();
        self
    }

    pub fn mime_type(mut self, mime: &str, extension: Extension) -> Self {
        self.mime_types
            .insert(mime.trim().to_ascii_lowercase(), extension);
        self
    }

    pub fn signatures(mut self, signatures: Vec<(Vec<u8>, Extension)>) -> Self {
        self.signatures = signatures;
        self
    }

    /// Adds a signature checked before the existing ones.
    pub fn signature(mut self, magic: &[u8], extension: Extension) -> Self {
        self.signatures.insert(0, (magic.to_vec(), extension));
        self
    }

    pub fn default_extension(mut self, extension: Extension) -> Self {
        self.default_extension = extension;
        self
    }

    pub fn build(self) -> ExtensionRouter {
        ExtensionRouter {
            strategies: self.strategies,
            priority_extensions: self.priority_extensions,
            mime_types: self.mime_types,
            signatures: self.signatures,
            default_extension: self.default_extension,
        }
    }
}
