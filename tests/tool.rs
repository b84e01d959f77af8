use std::collections::HashMap;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::json;

use fetchwise::domain::ResponseHeaders;
use fetchwise::engine::DownloadEngine;
use fetchwise::error::FetchwiseError;
use fetchwise::fetch::{FetchedResponse, Fetcher};
use fetchwise::store::DirectoryStore;
use fetchwise::tool::DownloadAgent;

#[derive(Default)]
struct MockFetcher {
    routes: HashMap<String, (String, Vec<u8>)>,
}

impl MockFetcher {
    fn route(mut self, url: &str, content_type: &str, body: &[u8]) -> Self {
        self.routes
            .insert(url.to_string(), (content_type.to_string(), body.to_vec()));
        self
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedResponse, FetchwiseError> {
        let (content_type, body) = self.routes.get(url).ok_or_else(|| FetchwiseError::HttpStatus {
            url: url.to_string(),
            status: 404,
            message: "Not Found".to_string(),
        })?;
        Ok(FetchedResponse {
            url: url.to_string(),
            status: 200,
            headers: ResponseHeaders::new().with("content-type", content_type.as_str()),
            body: body.clone(),
        })
    }
}

fn agent() -> (tempfile::TempDir, Utf8PathBuf, DownloadAgent<MockFetcher>) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("downloads")).unwrap();
    let fetcher = MockFetcher::default()
        .route("https://example.com/paper.pdf", "text/html", b"%PDF-1.7")
        .route("https://example.com/data.csv", "text/csv", b"a,b\n1,2\n")
        .route(
            "https://example.com/view?id=5",
            "text/html",
            br#"<a href="/files/5.zip">zip</a>"#,
        )
        .route("https://example.com/files/5.zip", "application/zip", b"PK\x03\x04");
    let engine = DownloadEngine::new(fetcher, DirectoryStore::new(root.clone()));
    (temp, root, DownloadAgent::new(engine))
}

#[test]
fn download_content_reports_path() {
    let (_temp, root, agent) = agent();
    let response = agent.execute_tool(
        "download_content",
        &json!({"url": "https://example.com/paper.pdf", "context": "Deep Learning Survey"}),
    );
    assert!(response.success, "{:?}", response.message);
    let data = response.data.unwrap();
    let expected = root.join("Deep_Learning_Survey.pdf");
    assert_eq!(data["path"], expected.as_str());
    assert_eq!(data["extension"], ".pdf");
    assert_eq!(data["size_formatted"], "8.0 B");
    assert!(expected.as_std_path().is_file());
    assert!(response.metadata.contains_key("downloaded_at"));
}

#[test]
fn download_content_follows_landing_pages() {
    let (_temp, _root, agent) = agent();
    let arguments = json!({"url": "https://example.com/view?id=5"});
    let response = agent.execute_tool("download_content", &arguments);
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["landing_page_followed"], true);
    assert!(data["path"].as_str().unwrap().ends_with("5.zip"));
}

#[test]
fn download_content_honors_explicit_extension_and_dir() {
    let (temp, _root, agent) = agent();
    let other = temp.path().join("elsewhere");
    let response = agent.execute_tool(
        "download_content",
        &json!({
            "url": "https://example.com/data.csv",
            "explicit_extension": "txt",
            "download_dir": other.to_str().unwrap(),
        }),
    );
    assert!(response.success);
    assert!(other.join("data.txt").is_file());
}

#[test]
fn download_content_failure_is_not_an_exception() {
    let (_temp, _root, agent) = agent();
    let arguments = json!({"url": "https://example.com/missing"});
    let response = agent.execute_tool("download_content", &arguments);
    assert!(!response.success);
    let message = response.message.unwrap();
    assert!(message.starts_with("Failed to download https://example.com/missing"));
    assert!(message.contains("404"));
}

#[test]
fn oversized_timeout_is_accepted() {
    let (_temp, _root, agent) = agent();
    let response = agent.execute_tool(
        "download_content",
        &json!({"url": "https://example.com/data.csv", "timeout_secs": u64::MAX}),
    );
    assert!(response.success, "{:?}", response.message);
}

#[test]
fn bad_explicit_extension_is_rejected() {
    let (_temp, _root, agent) = agent();
    let response = agent.execute_tool(
        "download_content",
        &json!({"url": "https://example.com/data.csv", "explicit_extension": "../x"}),
    );
    assert!(!response.success);
}

#[test]
fn download_multiple_summarizes() {
    let (_temp, _root, agent) = agent();
    let response = agent.execute_tool(
        "download_multiple",
        &json!({
            "urls": [
                "https://example.com/paper.pdf",
                "https://example.com/missing",
                "https://example.com/data.csv"
            ],
            "contexts": ["Paper", null, "Table"],
        }),
    );
    assert!(response.success);
    assert_eq!(response.message.as_deref(), Some("Downloaded 2/3 files (1 failed)"));
    let data = response.data.unwrap();
    assert_eq!(data["total"], 3);
    assert_eq!(data["failed_indices"], json!([1]));
    assert_eq!(data["results"][1]["success"], false);
    assert!(data["results"][2]["path"].as_str().unwrap().ends_with("Table.csv"));
}

#[test]
fn download_multiple_rejects_mismatched_contexts() {
    let (_temp, _root, agent) = agent();
    let response = agent.execute_tool(
        "download_multiple",
        &json!({"urls": ["https://example.com/paper.pdf"], "contexts": ["a", "b"]}),
    );
    assert!(!response.success);
    assert!(response.message.unwrap().contains("contexts has 2 entries but urls has 1"));
}

#[test]
fn list_downloads_after_downloading() {
    let (_temp, _root, agent) = agent();
    agent.execute_tool("download_content", &json!({"url": "https://example.com/paper.pdf"}));
    agent.execute_tool("download_content", &json!({"url": "https://example.com/data.csv"}));

    let all = agent.execute_tool("list_downloads", &json!({}));
    assert!(all.success);
    assert_eq!(all.data.as_ref().unwrap()["total"], 2);

    let pdfs = agent.execute_tool("list_downloads", &json!({"pattern": "*.pdf"}));
    let data = pdfs.data.unwrap();
    assert_eq!(data["total"], 1);
    assert_eq!(data["files"][0]["name"], "paper.pdf");
}

#[test]
fn list_downloads_errors_are_responses() {
    let (_temp, _root, agent) = agent();
    let missing = agent.execute_tool("list_downloads", &json!({}));
    assert!(!missing.success);
    assert!(missing.message.unwrap().starts_with("directory does not exist"));

    agent.execute_tool("download_content", &json!({"url": "https://example.com/paper.pdf"}));
    let bad = agent.execute_tool("list_downloads", &json!({"pattern": "[unclosed"}));
    assert!(!bad.success);
}

#[test]
fn responses_serialize_to_the_tool_wire_shape() {
    let (_temp, _root, agent) = agent();
    let response = agent.execute_tool("nope", &json!({}));
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["success"], false);
    assert_eq!(value["warnings"], json!([]));
    assert!(value.get("data").is_none());
    assert_eq!(value["message"], "unknown tool: nope");
}
