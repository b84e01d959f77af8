//! Protocol-neutral tool surface: tool definitions with JSON-schema
//! parameters and a single `execute_tool` entry point that never fails.
//! Chat-platform adapters sit on top of this.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::expand_home;
use crate::engine::{DownloadEngine, DownloadRequest, DownloadResult, SilentProgress};
use crate::error::FetchwiseError;
use crate::fetch::Fetcher;
use crate::store::{DirectoryStore, DownloadStore, format_size};

pub const AGENT_NAME: &str = "DownloadAgent";
const AGENT_DESCRIPTION: &str =
    "Smart content downloader with context-aware naming and intelligent link handling";

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub warnings: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl ToolResponse {
    pub fn ok(data: Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            warnings: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            warnings: Vec::new(),
            metadata: Map::new(),
        }
    }

    fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct DownloadContentArgs {
    url: String,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    explicit_extension: Option<String>,
    #[serde(default)]
    download_dir: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DownloadMultipleArgs {
    urls: Vec<String>,
    #[serde(default)]
    contexts: Option<Vec<Option<String>>>,
    #[serde(default)]
    download_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListDownloadsArgs {
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    download_dir: Option<String>,
}

pub struct DownloadAgent<F: Fetcher> {
    engine: DownloadEngine<F, DirectoryStore>,
}

impl<F: Fetcher> DownloadAgent<F> {
    pub fn new(engine: DownloadEngine<F, DirectoryStore>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DownloadEngine<F, DirectoryStore> {
        &self.engine
    }

    pub fn metadata(&self) -> AgentMetadata {
        AgentMetadata {
            name: AGENT_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: AGENT_DESCRIPTION.to_string(),
        }
    }

    pub fn tools(&self) -> Vec<ToolDefinition> {
        let download_dir = json!({
            "type": "string",
            "description": format!(
                "Optional: directory to download to. Default: {}",
                self.engine.store().root()
            ),
        });
        vec![
            ToolDefinition {
                name: "download_content",
                description: "Download content from a URL with intelligent handling. \
                    Detects landing pages and follows them to the actual file, \
                    works out the real file type, and names the file from the given context.",
                parameters: object_schema(
                    json!({
                        "url": {"type": "string", "description": "URL to download from"},
                        "context": {
                            "type": "string",
                            "description": "Context about the content (title, description), \
                                used to build the filename"
                        },
                        "explicit_extension": {
                            "type": "string",
                            "description": "Optional: force the file extension, e.g. \"pdf\""
                        },
                        "timeout_secs": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Optional: request timeout in seconds"
                        },
                        "download_dir": download_dir.clone(),
                    }),
                    &["url"],
                ),
            },
            ToolDefinition {
                name: "download_multiple",
                description: "Download several URLs at once. Each URL can have its own context \
                    for filename generation. One result per URL, in order.",
                parameters: object_schema(
                    json!({
                        "urls": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "URLs to download"
                        },
                        "contexts": {
                            "type": "array",
                            "items": {"type": ["string", "null"]},
                            "description": "Optional: one context per URL"
                        },
                        "download_dir": download_dir.clone(),
                    }),
                    &["urls"],
                ),
            },
            ToolDefinition {
                name: "list_downloads",
                description: "List files in the downloads directory.",
                parameters: object_schema(
                    json!({
                        "pattern": {
                            "type": "string",
                            "description": "Optional: glob pattern to filter files (e.g. \"*.pdf\")"
                        },
                        "download_dir": download_dir,
                    }),
                    &[],
                ),
            },
        ]
    }

    /// Runs tool `name`. Every failure, including unknown tools and malformed
    /// arguments, comes back as `success = false`.
    pub fn execute_tool(&self, name: &str, arguments: &Value) -> ToolResponse {
        debug!(tool = name, "execute tool");
        let outcome = match name {
            "download_content" => self.download_content(arguments),
            "download_multiple" => self.download_multiple(arguments),
            "list_downloads" => self.list_downloads(arguments),
            other => Err(FetchwiseError::UnknownTool(other.to_string())),
        };
        outcome.unwrap_or_else(|err| ToolResponse::error(err.to_string()))
    }

    fn download_content(&self, arguments: &Value) -> Result<ToolResponse, FetchwiseError> {
        let args: DownloadContentArgs = parse_args(arguments)?;
        let mut request = DownloadRequest::new(args.url.as_str());
        if let Some(context) = args.context {
            request = request.with_context(context);
        }
        if let Some(extension) = args.explicit_extension {
            request = request.with_explicit_extension(extension.parse()?);
        }
        if let Some(secs) = args.timeout_secs.filter(|secs| *secs > 0) {
            request = request.with_timeout(Duration::from_secs(secs));
        }

        let result = match self.store_for(args.download_dir.as_deref()) {
            Some(store) => self.engine.download_into(request, &store),
            None => self.engine.download(request),
        };
        Ok(single_response(&result))
    }

    fn download_multiple(&self, arguments: &Value) -> Result<ToolResponse, FetchwiseError> {
        let args: DownloadMultipleArgs = parse_args(arguments)?;
        let contexts = match args.contexts {
            Some(contexts) if contexts.len() != args.urls.len() => {
                return Err(FetchwiseError::InvalidToolArguments(format!(
                    "contexts has {} entries but urls has {}",
                    contexts.len(),
                    args.urls.len()
                )));
            }
            Some(contexts) => contexts,
            None => vec![None; args.urls.len()],
        };

        let requests: Vec<DownloadRequest> = args
            .urls
            .iter()
            .zip(contexts)
            .map(|(url, context)| {
                let request = DownloadRequest::new(url.as_str());
                match context {
                    Some(context) => request.with_context(context),
                    None => request,
                }
            })
            .collect();

        let batch = match self.store_for(args.download_dir.as_deref()) {
            Some(store) => self
                .engine
                .download_multiple_into(requests, &store, &SilentProgress),
            None => self.engine.download_multiple(requests),
        };

        let results: Vec<Value> = batch.results.iter().map(batch_item).collect();
        let data = json!({
            "results": results,
            "total": batch.total(),
            "successful": batch.succeeded.len(),
            "failed": batch.failed.len(),
            "succeeded_indices": batch.succeeded,
            "failed_indices": batch.failed,
        });
        Ok(ToolResponse::ok(data, batch.summary()))
    }

    fn list_downloads(&self, arguments: &Value) -> Result<ToolResponse, FetchwiseError> {
        let args: ListDownloadsArgs = parse_args(arguments)?;
        let store = self
            .store_for(args.download_dir.as_deref())
            .unwrap_or_else(|| self.engine.store().clone());
        let files = store.list(args.pattern.as_deref())?;
        let message = format!("Found {} files in {}", files.len(), store.root());
        let data = json!({
            "directory": store.root(),
            "total": files.len(),
            "files": files,
        });
        Ok(ToolResponse::ok(data, message))
    }

    fn store_for(&self, download_dir: Option<&str>) -> Option<DirectoryStore> {
        download_dir
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(|dir| DirectoryStore::new(expand_home(dir)))
    }
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn parse_args<T: DeserializeOwned>(arguments: &Value) -> Result<T, FetchwiseError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(arguments)
        .map_err(|err| FetchwiseError::InvalidToolArguments(err.to_string()))
}

fn single_response(result: &DownloadResult) -> ToolResponse {
    let mut metadata = Map::new();
    if let Some(response) = &result.metadata {
        metadata.insert("status".to_string(), json!(response.status));
        metadata.insert("content_type".to_string(), json!(response.content_type));
        metadata.insert("content_length".to_string(), json!(response.content_length));
        metadata.insert("final_url".to_string(), json!(response.final_url));
    }
    metadata.insert("downloaded_at".to_string(), json!(result.downloaded_at));

    let response = match (&result.path, &result.error) {
        (Some(path), _) if result.success => {
            let size = result.metadata.as_ref().map(|m| m.content_length as u64).unwrap_or(0);
            ToolResponse::ok(
                json!({
                    "path": path,
                    "url": result.url,
                    "normalized_url": result.normalized_url,
                    "extension": result.extension,
                    "extension_source": result.extension_source,
                    "size": size,
                    "size_formatted": format_size(size),
                    "landing_page_followed": result.followed_landing_page(),
                }),
                format!("Downloaded successfully to: {path}"),
            )
        }
        (_, Some(failure)) => ToolResponse::error(format!(
            "Failed to download {}: {}",
            result.url, failure.message
        )),
        _ => ToolResponse::error(format!("Failed to download {}", result.url)),
    };
    response
        .with_warnings(result.warning_messages())
        .with_metadata(metadata)
}

fn batch_item(result: &DownloadResult) -> Value {
    json!({
        "url": result.url,
        "success": result.success,
        "path": result.path.as_ref().map(|path| path.as_str()),
        "extension": result.extension,
        "error": result.error.as_ref().map(|failure| failure.message.as_str()),
        "warnings": result.warning_messages(),
    })
}
