use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchwiseError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid extension: {0}")]
    InvalidExtension(String),

    #[error("request to {url} failed: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("{url} returned status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("could not parse markup: {0}")]
    Markup(String),

    #[error("storage write failed: {0}")]
    Storage(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("invalid file pattern: {0}")]
    InvalidPattern(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unable to resolve a download directory")]
    MissingDownloadDir,

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool arguments: {0}")]
    InvalidToolArguments(String),
}
