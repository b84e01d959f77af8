use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{Extension, FetchContext};
use crate::fetch::{DEFAULT_TIMEOUT, FetchedResponse, Fetcher, clamp_timeout};
use crate::filename::{FilenameBuilder, fallback_basename};
use crate::landing::LandingPageDetector;
use crate::normalize::UrlNormalizer;
use crate::router::{ExtensionRouter, ResolutionSource};
use crate::store::DownloadStore;

/// How many landing pages are followed before the current response is
/// taken as final.
pub const MAX_LANDING_DEPTH: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub context: Option<String>,
    pub explicit_extension: Option<Extension>,
    pub timeout: Option<Duration>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            context: None,
            explicit_extension: None,
            timeout: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_explicit_extension(mut self, extension: Extension) -> Self {
        self.explicit_extension = Some(extension);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnreachableResource,
    StorageFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    AmbiguousLandingPage,
    UnresolvableExtension,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadWarning {
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseMetadata {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: usize,
    pub final_url: String,
}

impl ResponseMetadata {
    fn from_context(context: &FetchContext) -> Self {
        Self {
            status: context.status(),
            content_type: context.content_type().map(str::to_string),
            content_length: context.body_len(),
            final_url: context.final_url().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub success: bool,
    /// URL as the caller supplied it.
    pub url: String,
    pub normalized_url: String,
    pub path: Option<Utf8PathBuf>,
    pub extension: Option<Extension>,
    pub extension_source: Option<ResolutionSource>,
    pub chain: Vec<FetchContext>,
    pub warnings: Vec<DownloadWarning>,
    pub metadata: Option<ResponseMetadata>,
    pub error: Option<DownloadFailure>,
    pub downloaded_at: String,
}

impl DownloadResult {
    fn started(url: &str, normalized_url: &str) -> Self {
        Self {
            success: false,
            url: url.to_string(),
            normalized_url: normalized_url.to_string(),
            path: None,
            extension: None,
            extension_source: None,
            chain: Vec::new(),
            warnings: Vec::new(),
            metadata: None,
            error: None,
            downloaded_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn fail(mut self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.success = false;
        self.path = None;
        self.error = Some(DownloadFailure {
            kind,
            message: message.into(),
        });
        self
    }

    /// Whether a landing page was followed to reach the saved content.
    pub fn followed_landing_page(&self) -> bool {
        self.chain.len() > 1
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.message.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub results: Vec<DownloadResult>,
    pub succeeded: Vec<usize>,
    pub failed: Vec<usize>,
}

impl BatchResult {
    fn from_results(results: Vec<DownloadResult>) -> Self {
        let (succeeded, failed): (Vec<usize>, Vec<usize>) =
            (0..results.len()).partition(|index| results[*index].success);
        Self {
            results,
            succeeded,
            failed,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// `Downloaded 2/3 files (1 failed)`.
    pub fn summary(&self) -> String {
        let mut message = format!("Downloaded {}/{} files", self.succeeded.len(), self.total());
        if !self.failed.is_empty() {
            message.push_str(&format!(" ({} failed)", self.failed.len()));
        }
        message
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Discards progress events.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}

fn emit(sink: &dyn ProgressSink, started: Instant, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: Some(started.elapsed()),
    });
}

#[derive(Clone)]
pub struct DownloadEngine<F: Fetcher, S: DownloadStore> {
    fetcher: F,
    store: S,
    normalizer: UrlNormalizer,
    router: ExtensionRouter,
    detector: LandingPageDetector,
    filenames: FilenameBuilder,
    timeout: Duration,
}

impl<F: Fetcher, S: DownloadStore> DownloadEngine<F, S> {
    pub fn new(fetcher: F, store: S) -> Self {
        let router = ExtensionRouter::default();
        Self {
            fetcher,
            store,
            normalizer: UrlNormalizer::default(),
            detector: LandingPageDetector::new(router.clone()),
            router,
            filenames: FilenameBuilder::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replaces the router; the landing-page detector follows its priority
    /// extensions.
    pub fn with_router(mut self, router: ExtensionRouter) -> Self {
        self.detector =
            LandingPageDetector::new(router.clone()).with_max_bytes(self.detector.max_bytes());
        self.router = router;
        self
    }

    pub fn with_normalizer(mut self, normalizer: UrlNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_filename_builder(mut self, filenames: FilenameBuilder) -> Self {
        self.filenames = filenames;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_landing_page_bytes(mut self, max_bytes: usize) -> Self {
        self.detector = self.detector.with_max_bytes(max_bytes);
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn router(&self) -> &ExtensionRouter {
        &self.router
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn download(&self, request: DownloadRequest) -> DownloadResult {
        self.download_with_progress(request, &SilentProgress)
    }

    pub fn download_with_progress(
        &self,
        request: DownloadRequest,
        sink: &dyn ProgressSink,
    ) -> DownloadResult {
        self.run(&request, &self.store, sink)
    }

    /// Same as [`DownloadEngine::download`] but saves into `store`.
    pub fn download_into(
        &self,
        request: DownloadRequest,
        store: &dyn DownloadStore,
    ) -> DownloadResult {
        self.run(&request, store, &SilentProgress)
    }

    pub fn download_into_with_progress(
        &self,
        request: DownloadRequest,
        store: &dyn DownloadStore,
        sink: &dyn ProgressSink,
    ) -> DownloadResult {
        self.run(&request, store, sink)
    }

    /// One result per request, in input order. Items are independent: a
    /// failure never stops the batch.
    pub fn download_multiple(&self, requests: Vec<DownloadRequest>) -> BatchResult {
        self.download_multiple_into(requests, &self.store, &SilentProgress)
    }

    pub fn download_multiple_into(
        &self,
        requests: Vec<DownloadRequest>,
        store: &dyn DownloadStore,
        sink: &dyn ProgressSink,
    ) -> BatchResult {
        let total = requests.len();
        let results = requests
            .iter()
            .enumerate()
            .map(|(index, request)| {
                debug!(index, total, url = %request.url, "batch item");
                self.run(request, store, sink)
            })
            .collect();
        let batch = BatchResult::from_results(results);
        info!(
            succeeded = batch.succeeded.len(),
            failed = batch.failed.len(),
            "batch finished"
        );
        batch
    }

    fn run(
        &self,
        request: &DownloadRequest,
        store: &dyn DownloadStore,
        sink: &dyn ProgressSink,
    ) -> DownloadResult {
        let started = Instant::now();
        let url = self.normalizer.normalize(&request.url);
        if url != request.url {
            debug!(from = %request.url, to = %url, "normalized URL");
        }
        emit(sink, started, format!("phase=Normalize; {url}"));

        let mut result = DownloadResult::started(&request.url, &url);
        let timeout = clamp_timeout(request.timeout.unwrap_or(self.timeout));

        emit(sink, started, format!("phase=Fetch; GET {url}"));
        let response = match self.fetcher.fetch(&url, timeout) {
            Ok(response) => response,
            Err(err) => {
                warn!(url = %url, error = %err, "fetch failed");
                return result.fail(FailureKind::UnreachableResource, err.to_string());
            }
        };
        let mut current =
            FetchContext::new(url.clone(), response.status, response.headers, response.body)
                .with_final_url(response.url)
                .with_context_text(request.context.clone())
                .with_explicit_extension(request.explicit_extension.clone());
        result.chain.push(current.clone());

        let mut depth = 0u8;
        while depth < MAX_LANDING_DEPTH && self.detector.is_landing_page(&current) {
            let Some(target) = self.detector.extract_target(&current) else {
                warn!(url = %current.url(), "landing page without a download link");
                result.warnings.push(DownloadWarning {
                    kind: WarningKind::AmbiguousLandingPage,
                    message: format!(
                        "{} looks like a landing page but no download link was found; \
                         saving the page itself",
                        current.url()
                    ),
                });
                break;
            };
            emit(sink, started, format!("phase=Landing; following {target}"));
            info!(page = %current.url(), target = %target, "following landing page");

            let FetchedResponse {
                url: final_url,
                status,
                headers,
                body,
            } = match self.fetcher.fetch(&target, timeout) {
                Ok(response) => response,
                Err(err) => {
                    warn!(url = %target, error = %err, "landing target fetch failed");
                    return result.fail(FailureKind::UnreachableResource, err.to_string());
                }
            };
            current = current
                .follow(target, status, headers, body)
                .with_final_url(final_url);
            result.chain.push(current.clone());
            depth += 1;
        }

        emit(sink, started, format!("phase=Resolve; {}", current.url()));
        let resolution = self.router.resolve_detailed(&current);
        debug!(
            extension = %resolution.extension,
            source = ?resolution.source,
            "extension resolved"
        );
        if resolution.source == ResolutionSource::Default {
            result.warnings.push(DownloadWarning {
                kind: WarningKind::UnresolvableExtension,
                message: format!(
                    "could not determine the file type; using {}",
                    resolution.extension
                ),
            });
        }

        let basename =
            fallback_basename(current.url(), current.headers().get("content-disposition"));
        let stem = self.filenames.stem(request.context.as_deref(), &basename);
        let filename = format!("{stem}{}", resolution.extension);
        result.metadata = Some(ResponseMetadata::from_context(&current));

        emit(sink, started, format!("phase=Store; {filename}"));
        let saved = store.save(&stem, &resolution.extension, current.body());
        result.extension = Some(resolution.extension);
        result.extension_source = Some(resolution.source);
        match saved {
            Ok(path) => {
                info!(path = %path, bytes = current.body_len(), "download complete");
                result.success = true;
                result.path = Some(path);
                result
            }
            Err(err) => {
                warn!(filename = %filename, error = %err, "save failed");
                result.fail(FailureKind::StorageFailure, err.to_string())
            }
        }
    }
}
