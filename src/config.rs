use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::{BaseDirs, UserDirs};
use serde::{Deserialize, Serialize};

use crate::domain::Extension;
use crate::error::FetchwiseError;
use crate::fetch::{DEFAULT_TIMEOUT, clamp_timeout, default_user_agent};
use crate::filename::DEFAULT_MAX_STEM_LEN;
use crate::landing::DEFAULT_MAX_LANDING_PAGE_BYTES;
use crate::router::{ExtensionRouter, default_priority_extensions};

pub const DEFAULT_CONFIG_FILE: &str = "fetchwise.json";
pub const DOWNLOAD_DIR_ENV: &str = "FETCHWISE_DOWNLOAD_DIR";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub max_stem_len: Option<usize>,
    #[serde(default)]
    pub max_landing_page_bytes: Option<usize>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Replaces the built-in priority list when present.
    #[serde(default)]
    pub priority_extensions: Option<Vec<String>>,
    /// Added to (or overriding) the built-in MIME table.
    #[serde(default)]
    pub mime_types: BTreeMap<String, String>,
    #[serde(default)]
    pub default_extension: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub download_dir: Utf8PathBuf,
    pub timeout: Duration,
    pub user_agent: String,
    pub max_stem_len: usize,
    pub max_landing_page_bytes: usize,
    pub priority_extensions: Vec<Extension>,
    pub mime_types: BTreeMap<String, Extension>,
    pub default_extension: Option<Extension>,
}

impl ResolvedConfig {
    /// Router with the built-in tables plus this configuration's overrides.
    pub fn router(&self) -> ExtensionRouter {
        let mut builder =
            ExtensionRouter::builder().priority_extensions(self.priority_extensions.clone());
        for (mime, extension) in &self.mime_types {
            builder = builder.mime_type(mime, extension.clone());
        }
        if let Some(extension) = &self.default_extension {
            builder = builder.default_extension(extension.clone());
        }
        builder.build()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `fetchwise.json` in the working directory when it
    /// exists. Without either, built-in defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FetchwiseError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| FetchwiseError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| FetchwiseError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config_with_env(config, std::env::var(DOWNLOAD_DIR_ENV).ok())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, FetchwiseError> {
        Self::resolve_config_with_env(config, None)
    }

    /// `env_download_dir` takes precedence over the file's `download_dir`.
    pub fn resolve_config_with_env(
        config: Config,
        env_download_dir: Option<String>,
    ) -> Result<ResolvedConfig, FetchwiseError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let download_dir = match env_download_dir
            .filter(|dir| !dir.trim().is_empty())
            .or(config.download_dir)
        {
            Some(dir) => expand_home(&dir),
            None => default_download_dir()?,
        };

        let timeout = config
            .timeout_secs
            .filter(|secs| *secs > 0)
            .map(|secs| clamp_timeout(Duration::from_secs(secs)))
            .unwrap_or(DEFAULT_TIMEOUT);

        let priority_extensions = match config.routing.priority_extensions {
            Some(values) => values
                .iter()
                .map(|value| value.parse())
                .collect::<Result<Vec<Extension>, FetchwiseError>>()?,
            None => default_priority_extensions(),
        };

        let mime_types = config
            .routing
            .mime_types
            .into_iter()
            .map(|(mime, ext)| -> Result<(String, Extension), FetchwiseError> {
                Ok((mime.trim().to_ascii_lowercase(), ext.parse()?))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let default_extension = config
            .routing
            .default_extension
            .map(|value| value.parse())
            .transpose()?;

        Ok(ResolvedConfig {
            schema_version,
            download_dir,
            timeout,
            user_agent: config.user_agent.unwrap_or_else(default_user_agent),
            max_stem_len: config.max_stem_len.unwrap_or(DEFAULT_MAX_STEM_LEN).max(1),
            max_landing_page_bytes: config
                .max_landing_page_bytes
                .unwrap_or(DEFAULT_MAX_LANDING_PAGE_BYTES),
            priority_extensions,
            mime_types,
            default_extension,
        })
    }
}

/// The platform Downloads folder, falling back to `~/Downloads`.
pub fn default_download_dir() -> Result<Utf8PathBuf, FetchwiseError> {
    let path = UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(|dir| dir.to_path_buf()))
        .or_else(|| BaseDirs::new().map(|dirs| dirs.home_dir().join("Downloads")))
        .ok_or(FetchwiseError::MissingDownloadDir)?;
    Utf8PathBuf::from_path_buf(path).map_err(|_| FetchwiseError::MissingDownloadDir)
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &str) -> Utf8PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return Utf8PathBuf::from(path),
    };
    let home = BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().to_path_buf()).ok());
    match home {
        Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
        None => Utf8PathBuf::from(path),
    }
}
