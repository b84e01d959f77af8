use std::fs;
use std::io::{ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::Serialize;
use tempfile::Builder;
use tracing::debug;

use crate::domain::Extension;
use crate::error::FetchwiseError;

const MAX_DEDUP_SUFFIX: usize = 10_000;

/// Destination for downloaded bytes.
pub trait DownloadStore: Send + Sync {
    fn root(&self) -> &Utf8Path;

    /// Persists `content` as `{stem}{extension}` and returns the path
    /// actually used. The path may carry a suffix on the stem when a
    /// different file already exists, but always ends in `extension`.
    fn save(
        &self,
        stem: &str,
        extension: &Extension,
        content: &[u8],
    ) -> Result<Utf8PathBuf, FetchwiseError>;
}

/// A flat directory of downloads.
///
/// Writes go through a temporary file in the same directory and are
/// published with a no-clobber rename, so an existing file is never
/// replaced. Identical content reuses the existing path; different content
/// gets `stem_1.ext`, `stem_2.ext`, ...
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadEntry {
    pub name: String,
    pub path: Utf8PathBuf,
    pub size: u64,
    pub size_formatted: String,
    pub modified: Option<String>,
}

impl DirectoryStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn ensure_root(&self) -> Result<(), FetchwiseError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| FetchwiseError::Storage(format!("{}: {err}", self.root)))
    }

    /// Files in the root whose name matches `pattern` (glob, default `*`),
    /// sorted by path.
    pub fn list(&self, pattern: Option<&str>) -> Result<Vec<DownloadEntry>, FetchwiseError> {
        let pattern = pattern.unwrap_or("*");
        let matcher = Pattern::new(pattern)
            .map_err(|err| FetchwiseError::InvalidPattern(format!("{pattern}: {err}")))?;

        if !self.root.as_std_path().is_dir() {
            return Err(FetchwiseError::DirectoryNotFound(
                self.root.clone().into_std_path_buf(),
            ));
        }

        let mut entries = Vec::new();
        let dir = fs::read_dir(self.root.as_std_path())
            .map_err(|err| FetchwiseError::Filesystem(err.to_string()))?;
        for entry in dir {
            let entry = entry.map_err(|err| FetchwiseError::Filesystem(err.to_string()))?;
            let metadata = entry
                .metadata()
                .map_err(|err| FetchwiseError::Filesystem(err.to_string()))?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !matcher.matches(&name) {
                continue;
            }
            let modified = metadata
                .modified()
                .ok()
                .map(|time| DateTime::<Utc>::from(time).to_rfc3339());
            entries.push(DownloadEntry {
                path: self.root.join(&name),
                name,
                size: metadata.len(),
                size_formatted: format_size(metadata.len()),
                modified,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn candidate(stem: &str, extension: &Extension, attempt: usize) -> String {
        if attempt == 0 {
            format!("{stem}{extension}")
        } else {
            format!("{stem}_{attempt}{extension}")
        }
    }

    fn same_content(path: &Utf8Path, content: &[u8]) -> Result<bool, FetchwiseError> {
        let metadata = fs::metadata(path.as_std_path())
            .map_err(|err| FetchwiseError::Storage(format!("{path}: {err}")))?;
        if !metadata.is_file() || metadata.len() != content.len() as u64 {
            return Ok(false);
        }
        let existing = fs::read(path.as_std_path())
            .map_err(|err| FetchwiseError::Storage(format!("{path}: {err}")))?;
        Ok(existing == content)
    }
}

impl DownloadStore for DirectoryStore {
    fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn save(
        &self,
        stem: &str,
        extension: &Extension,
        content: &[u8],
    ) -> Result<Utf8PathBuf, FetchwiseError> {
        validate_stem(stem)?;
        self.ensure_root()?;

        let mut temp = Builder::new()
            .prefix(".fetchwise-")
            .suffix(".part")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| FetchwiseError::Storage(err.to_string()))?;
        temp.write_all(content)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|err| FetchwiseError::Storage(err.to_string()))?;

        let mut attempt = 0;
        while attempt <= MAX_DEDUP_SUFFIX {
            let path = self.root.join(Self::candidate(stem, extension, attempt));
            if path.as_std_path().exists() {
                if Self::same_content(&path, content)? {
                    debug!(path = %path, "identical file already present");
                    return Ok(path);
                }
                attempt += 1;
                continue;
            }
            match temp.persist_noclobber(path.as_std_path()) {
                Ok(_) => {
                    debug!(path = %path, bytes = content.len(), "saved");
                    return Ok(path);
                }
                // Lost a race with a concurrent writer; look at the same name again.
                Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                    temp = err.file;
                }
                Err(err) => {
                    return Err(FetchwiseError::Storage(format!("{path}: {}", err.error)));
                }
            }
        }
        Err(FetchwiseError::Storage(format!(
            "no free file name for {stem}{extension} in {}",
            self.root
        )))
    }
}

fn validate_stem(stem: &str) -> Result<(), FetchwiseError> {
    let invalid = stem.is_empty()
        || stem == "."
        || stem == ".."
        || stem.contains(['/', '\\', '\0']);
    if invalid {
        return Err(FetchwiseError::Storage(format!("invalid file name: {stem:?}")));
    }
    Ok(())
}

/// `1536` -> `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}
