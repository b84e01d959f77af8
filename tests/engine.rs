use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use fetchwise::domain::{Extension, ResponseHeaders};
use fetchwise::engine::{
    DownloadEngine, DownloadRequest, FailureKind, MAX_LANDING_DEPTH, WarningKind,
};
use fetchwise::error::FetchwiseError;
use fetchwise::fetch::{FetchedResponse, Fetcher, MAX_TIMEOUT};
use fetchwise::router::{ExtensionRouter, ResolutionSource};
use fetchwise::store::{DirectoryStore, DownloadStore};

#[derive(Default)]
struct MockFetcher {
    routes: HashMap<String, FetchedResponse>,
    calls: Mutex<Vec<(String, Duration)>>,
}

impl MockFetcher {
    fn route(mut self, url: &str, content_type: Option<&str>, body: &[u8]) -> Self {
        let mut headers = ResponseHeaders::new();
        if let Some(content_type) = content_type {
            headers.insert("Content-Type", content_type);
        }
        self.routes.insert(
            url.to_string(),
            FetchedResponse {
                url: url.to_string(),
                status: 200,
                headers,
                body: body.to_vec(),
            },
        );
        self
    }

    fn route_response(mut self, url: &str, response: FetchedResponse) -> Self {
        self.routes.insert(url.to_string(), response);
        self
    }

    fn called_urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedResponse, FetchwiseError> {
        self.calls.lock().unwrap().push((url.to_string(), timeout));
        self.routes
            .get(url)
            .cloned()
            .ok_or_else(|| FetchwiseError::Unreachable {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            })
    }
}

struct FailingStore {
    root: Utf8PathBuf,
}

impl DownloadStore for FailingStore {
    fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn save(
        &self,
        _stem: &str,
        _extension: &Extension,
        _content: &[u8],
    ) -> Result<Utf8PathBuf, FetchwiseError> {
        Err(FetchwiseError::Storage("disk full".to_string()))
    }
}

fn engine(
    fetcher: MockFetcher,
) -> (tempfile::TempDir, DownloadEngine<MockFetcher, DirectoryStore>) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("downloads")).unwrap();
    (temp, DownloadEngine::new(fetcher, DirectoryStore::new(root)))
}

fn file_name(path: &Utf8Path) -> &str {
    path.file_name().unwrap()
}

#[test]
fn pdf_served_as_html_is_saved_as_pdf() {
    let fetcher = MockFetcher::default().route(
        "https://example.com/paper.pdf",
        Some("text/html"),
        b"%PDF-1.7 not really html",
    );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(DownloadRequest::new("https://example.com/paper.pdf"));
    assert!(result.success);
    let path = result.path.as_ref().unwrap();
    assert_eq!(file_name(path), "paper.pdf");
    assert_eq!(result.extension_source, Some(ResolutionSource::Priority));
    assert_eq!(result.chain.len(), 1);
    assert_eq!(
        std::fs::read(path.as_std_path()).unwrap(),
        b"%PDF-1.7 not really html"
    );
}

#[test]
fn landing_page_is_followed_once() {
    let fetcher = MockFetcher::default()
        .route(
            "https://example.com/view?id=123",
            Some("text/html; charset=utf-8"),
            br#"<html><body><h1>Report</h1><a href="/files/123.pdf">Download PDF</a></body></html>"#,
        )
        .route(
            "https://example.com/files/123.pdf",
            Some("application/pdf"),
            b"%PDF-1.4 body",
        );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(
        DownloadRequest::new("https://example.com/view?id=123").with_context("Annual Report 2023"),
    );
    assert!(result.success);
    assert_eq!(file_name(result.path.as_ref().unwrap()), "Annual_Report_2023.pdf");
    assert_eq!(result.chain.len(), 2);
    assert_eq!(result.chain[0].depth(), 0);
    assert_eq!(result.chain[1].depth(), 1);
    assert_eq!(result.chain[1].parent_url(), Some("https://example.com/view?id=123"));
    assert!(result.followed_landing_page());
    assert_eq!(
        result.metadata.as_ref().unwrap().content_type.as_deref(),
        Some("application/pdf")
    );
}

#[test]
fn landing_target_without_context_uses_its_own_name() {
    let fetcher = MockFetcher::default()
        .route(
            "https://example.com/view?id=123",
            Some("text/html"),
            br#"<a href="/files/123.pdf">Download</a>"#,
        )
        .route("https://example.com/files/123.pdf", Some("application/pdf"), b"%PDF-");
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(DownloadRequest::new("https://example.com/view?id=123"));
    assert_eq!(file_name(result.path.as_ref().unwrap()), "123.pdf");
}

#[test]
fn context_names_pdf_without_url_extension() {
    let fetcher = MockFetcher::default().route(
        "https://arxiv.org/pdf/2103.00020",
        Some("application/pdf"),
        b"%PDF-1.5",
    );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(
        DownloadRequest::new("https://arxiv.org/pdf/2103.00020")
            .with_context("Attention Is All You Need!!"),
    );
    assert!(result.success);
    assert_eq!(
        file_name(result.path.as_ref().unwrap()),
        "Attention_Is_All_You_Need.pdf"
    );
    assert_eq!(
        result.extension_source,
        Some(ResolutionSource::Strategy("content_type".to_string()))
    );
}

#[test]
fn explicit_extension_always_wins() {
    let fetcher = MockFetcher::default().route(
        "https://example.com/paper.pdf",
        Some("application/pdf"),
        b"%PDF-1.7",
    );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(
        DownloadRequest::new("https://example.com/paper.pdf")
            .with_explicit_extension("JSON".parse().unwrap()),
    );
    assert_eq!(result.extension.as_ref().unwrap().as_str(), ".json");
    assert_eq!(result.extension_source, Some(ResolutionSource::Explicit));
    assert_eq!(file_name(result.path.as_ref().unwrap()), "paper.json");
}

#[test]
fn landing_page_without_link_is_saved_with_warning() {
    let fetcher = MockFetcher::default().route(
        "https://example.com/about",
        Some("text/html"),
        br#"<html><a href="/contact">Contact</a></html>"#,
    );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(DownloadRequest::new("https://example.com/about"));
    assert!(result.success);
    assert_eq!(result.chain.len(), 1);
    assert_eq!(file_name(result.path.as_ref().unwrap()), "about.html");
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, WarningKind::AmbiguousLandingPage);
}

#[test]
fn unreachable_landing_target_fails_and_keeps_page() {
    let fetcher = MockFetcher::default().route(
        "https://example.com/view",
        Some("text/html"),
        br#"<a href="https://files.example.com/gone.zip">zip</a>"#,
    );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(DownloadRequest::new("https://example.com/view"));
    assert!(!result.success);
    assert!(result.path.is_none());
    assert_eq!(result.chain.len(), 1);
    assert_eq!(result.chain[0].url(), "https://example.com/view");
    assert_matches!(
        result.error.as_ref().map(|failure| failure.kind),
        Some(FailureKind::UnreachableResource)
    );
}

#[test]
fn unreachable_url_has_empty_chain() {
    let (_temp, engine) = engine(MockFetcher::default());

    let result = engine.download(DownloadRequest::new("https://nowhere.invalid/file.pdf"));
    assert!(!result.success);
    assert!(result.chain.is_empty());
    assert!(result.metadata.is_none());
    let failure = result.error.unwrap();
    assert_eq!(failure.kind, FailureKind::UnreachableResource);
    assert!(failure.message.contains("connection refused"));
}

#[test]
fn unknown_content_falls_back_to_default_extension() {
    let fetcher =
        MockFetcher::default().route("https://example.com/blob", None, b"\x00\x01\x02\x03");
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(DownloadRequest::new("https://example.com/blob"));
    assert!(result.success);
    assert_eq!(file_name(result.path.as_ref().unwrap()), "blob.bin");
    assert_eq!(result.extension_source, Some(ResolutionSource::Default));
    assert_eq!(result.warnings[0].kind, WarningKind::UnresolvableExtension);
}

#[test]
fn signature_beats_generic_content_type() {
    let fetcher = MockFetcher::default().route(
        "https://example.com/get?file=7",
        Some("application/octet-stream"),
        b"PK\x03\x04archive",
    );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(DownloadRequest::new("https://example.com/get?file=7"));
    assert_eq!(file_name(result.path.as_ref().unwrap()), "get.zip");
}

#[test]
fn content_disposition_names_the_file() {
    let fetcher = MockFetcher::default().route_response(
        "https://example.com/download?id=9",
        FetchedResponse {
            url: "https://example.com/download?id=9".to_string(),
            status: 200,
            headers: ResponseHeaders::new()
                .with("Content-Type", "application/octet-stream")
                .with("Content-Disposition", "attachment; filename=\"Survey Results.xlsx\""),
            body: b"\x01\x02".to_vec(),
        },
    );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(DownloadRequest::new("https://example.com/download?id=9"));
    assert_eq!(file_name(result.path.as_ref().unwrap()), "Survey_Results.xlsx");
}

#[test]
fn platform_urls_are_normalized_before_fetch() {
    let fetcher = MockFetcher::default().route(
        "https://raw.githubusercontent.com/user/repo/main/data/table.csv",
        Some("text/plain; charset=utf-8"),
        b"a,b\n1,2\n",
    );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(DownloadRequest::new(
        "https://github.com/user/repo/blob/main/data/table.csv",
    ));
    assert!(result.success);
    assert_eq!(
        result.normalized_url,
        "https://raw.githubusercontent.com/user/repo/main/data/table.csv"
    );
    assert_eq!(file_name(result.path.as_ref().unwrap()), "table.csv");
    assert_eq!(
        engine.fetcher().called_urls(),
        vec!["https://raw.githubusercontent.com/user/repo/main/data/table.csv"]
    );
}

#[test]
fn per_call_timeout_reaches_fetcher() {
    let fetcher =
        MockFetcher::default().route("https://example.com/a.txt", Some("text/plain"), b"hi");
    let (_temp, engine) = engine(fetcher);
    let engine = engine.with_timeout(Duration::from_secs(12));

    let request =
        DownloadRequest::new("https://example.com/a.txt").with_timeout(Duration::from_secs(3));
    engine.download(request);
    engine.download(DownloadRequest::new("https://example.com/a.txt"));

    let timeouts: Vec<Duration> = engine
        .fetcher()
        .calls
        .lock()
        .unwrap()
        .iter()
        .map(|(_, timeout)| *timeout)
        .collect();
    assert_eq!(timeouts, vec![Duration::from_secs(3), Duration::from_secs(12)]);
}

#[test]
fn oversized_timeout_is_capped_before_fetch() {
    let fetcher =
        MockFetcher::default().route("https://example.com/a.txt", Some("text/plain"), b"hi");
    let (_temp, engine) = engine(fetcher);

    let request = DownloadRequest::new("https://example.com/a.txt")
        .with_timeout(Duration::from_secs(u64::MAX));
    assert!(engine.download(request).success);
    let calls = engine.fetcher().calls.lock().unwrap();
    assert_eq!(calls[0].1, MAX_TIMEOUT);
}

#[test]
fn batch_isolates_failures() {
    let fetcher = MockFetcher::default()
        .route("https://example.com/a.pdf", Some("application/pdf"), b"%PDF-a")
        .route("https://example.com/c.csv", Some("text/csv"), b"x,y\n");
    let (_temp, engine) = engine(fetcher);

    let batch = engine.download_multiple(vec![
        DownloadRequest::new("https://example.com/a.pdf").with_context("First"),
        DownloadRequest::new("https://down.example.com/b.zip"),
        DownloadRequest::new("https://example.com/c.csv"),
    ]);

    assert_eq!(batch.results.len(), 3);
    assert_eq!(batch.succeeded, vec![0, 2]);
    assert_eq!(batch.failed, vec![1]);
    assert_eq!(batch.summary(), "Downloaded 2/3 files (1 failed)");
    assert_eq!(batch.results[1].url, "https://down.example.com/b.zip");
    assert_eq!(file_name(batch.results[0].path.as_ref().unwrap()), "First.pdf");
}

#[test]
fn storage_failure_is_reported() {
    let fetcher = MockFetcher::default().route(
        "https://example.com/a.pdf",
        Some("application/pdf"),
        b"%PDF-",
    );
    let (_temp, engine) = engine(fetcher);
    let store = FailingStore {
        root: Utf8PathBuf::from("/nonexistent"),
    };

    let result = engine.download_into(DownloadRequest::new("https://example.com/a.pdf"), &store);
    assert!(!result.success);
    assert_eq!(result.chain.len(), 1);
    assert_eq!(result.extension.as_ref().unwrap().as_str(), ".pdf");
    assert_eq!(result.error.unwrap().kind, FailureKind::StorageFailure);
}

#[test]
fn download_into_uses_the_given_store() {
    let fetcher = MockFetcher::default().route(
        "https://example.com/notes.md",
        Some("text/markdown"),
        b"# hi",
    );
    let (_temp, engine) = engine(fetcher);
    let other = tempfile::tempdir().unwrap();
    let other_root = Utf8PathBuf::from_path_buf(other.path().to_path_buf()).unwrap();

    let result = engine.download_into(
        DownloadRequest::new("https://example.com/notes.md"),
        &DirectoryStore::new(other_root.clone()),
    );
    assert_eq!(result.path.unwrap(), other_root.join("notes.md"));
    assert!(!engine.store().root().as_std_path().exists());
}

#[test]
fn repeated_download_reuses_identical_file() {
    let fetcher = MockFetcher::default().route(
        "https://example.com/data.json",
        Some("application/json"),
        b"{}",
    );
    let (_temp, engine) = engine(fetcher);

    let first = engine.download(DownloadRequest::new("https://example.com/data.json"));
    let second = engine.download(DownloadRequest::new("https://example.com/data.json"));
    assert_eq!(first.path, second.path);
}

#[test]
fn saved_path_always_carries_resolved_extension() {
    let fetcher = MockFetcher::default()
        .route("https://example.com/a", Some("application/zip"), b"PK\x03\x04")
        .route("https://example.com/b.tar.gz", Some("application/gzip"), b"\x1f\x8b")
        .route("https://example.com/c", Some("text/html"), b"<html></html>")
        .route("https://example.com/d.weird", None, b"?");
    let (_temp, engine) = engine(fetcher);

    let contexts = ["", "   ", "../../etc/passwd", "a/b\\c", "Ünïcödé title", "***"];
    for url in [
        "https://example.com/a",
        "https://example.com/b.tar.gz",
        "https://example.com/c",
        "https://example.com/d.weird",
    ] {
        for context in contexts {
            let result = engine.download(DownloadRequest::new(url).with_context(context));
            assert!(result.success, "{url} with {context:?}");
            let name = file_name(result.path.as_ref().unwrap()).to_string();
            let extension = result.extension.unwrap();
            assert!(name.ends_with(extension.as_str()), "{name} vs {extension}");
            assert!(name.len() > extension.as_str().len());
            assert!(!name.contains('/') && !name.contains('\\'));
        }
    }
}

#[test]
fn second_landing_page_is_saved_as_is() {
    assert_eq!(MAX_LANDING_DEPTH, 1);
    let second_page = br#"<html><body><a href="/three.html">next</a></body></html>"#;
    let fetcher = MockFetcher::default()
        .route("https://example.com/one", Some("text/html"), br#"<a href="/two.html">2</a>"#)
        .route("https://example.com/two.html", Some("text/html"), second_page)
        .route("https://example.com/three.html", Some("text/html"), b"<html>3</html>");
    let (_temp, engine) = engine(fetcher);
    let html: Extension = "html".parse().unwrap();
    let engine = engine.with_router(ExtensionRouter::builder().priority_extensions([html]).build());

    let result = engine.download(DownloadRequest::new("https://example.com/one"));
    assert!(result.success);
    assert_eq!(
        engine.fetcher().called_urls(),
        vec!["https://example.com/one", "https://example.com/two.html"]
    );
    assert_eq!(result.chain.len(), 2);
    assert!(result.chain.iter().all(|context| context.depth() <= MAX_LANDING_DEPTH));
    let path = result.path.unwrap();
    assert_eq!(file_name(&path), "two.html");
    assert_eq!(std::fs::read(path.as_std_path()).unwrap(), second_page);
}

#[test]
fn explicit_compound_extension_survives_dedupe() {
    let fetcher = MockFetcher::default()
        .route("https://example.com/v1/scan", Some("application/octet-stream"), b"first")
        .route("https://example.com/v2/scan", Some("application/octet-stream"), b"second");
    let (_temp, engine) = engine(fetcher);
    let nifti: Extension = "nii.gz".parse().unwrap();

    for url in ["https://example.com/v1/scan", "https://example.com/v2/scan"] {
        let request = DownloadRequest::new(url).with_explicit_extension(nifti.clone());
        let result = engine.download(request);
        let path = result.path.unwrap();
        assert!(path.as_str().ends_with(".nii.gz"), "{path}");
        assert_eq!(result.extension.as_ref(), Some(&nifti));
    }
    let names: Vec<_> = engine
        .store()
        .list(None)
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(names, vec!["scan.nii.gz", "scan_1.nii.gz"]);
}

#[test]
fn result_serializes_without_bodies() {
    let fetcher = MockFetcher::default().route(
        "https://example.com/a.txt",
        Some("text/plain"),
        b"secret body",
    );
    let (_temp, engine) = engine(fetcher);

    let result = engine.download(DownloadRequest::new("https://example.com/a.txt"));
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["success"], true);
    assert_eq!(value["extension"], ".txt");
    assert_eq!(value["extension_source"]["kind"], "priority");
    assert_eq!(value["chain"][0]["body_len"], 11);
    assert!(value["chain"][0].get("body").is_none());
    assert!(!value.to_string().contains("secret body"));
}
