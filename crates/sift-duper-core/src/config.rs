use crate::strategy::options::{ComparisonOptions, FileTypeFilter};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RootConfig {
    pub path: String,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_recursive() -> bool {
    true
}

/// Whether a changed size or modification date invalidates cached content attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevalidationPolicy {
    /// Content attributes are permanent once computed.
    #[default]
    Never,
    /// Sync clears content attributes of files whose size or mtime changed.
    OnChange,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub db_path: String,
    #[serde(default)]
    pub roots: Vec<RootConfig>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Extension allow-lists per file category (`image`, `video`, ...).
    #[serde(default = "default_file_types")]
    pub file_types: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub file_type: FileTypeFilter,
    #[serde(default)]
    pub comparison: ComparisonOptions,
    #[serde(default)]
    pub revalidation: RevalidationPolicy,
    /// Files per calculator batch; each batch is one store transaction.
    pub batch_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "sift_duper.db".to_string(),
            roots: Vec::new(),
            ignore_patterns: Vec::new(),
            file_types: default_file_types(),
            file_type: FileTypeFilter::All,
            comparison: ComparisonOptions::default(),
            revalidation: RevalidationPolicy::Never,
            batch_size: 64,
        }
    }
}

impl AppConfig {
    /// Extension allow-list for the configured file type; `None` admits every file.
    pub fn extension_filter(&self) -> Option<Vec<String>> {
        self.file_type.resolve(&self.file_types)
    }
}

pub fn default_file_types() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 4] = [
        ("image", &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"]),
        ("video", &["mp4", "mov", "avi", "mkv", "wmv", "webm", "m4v"]),
        ("audio", &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"]),
        ("document", &["pdf", "doc", "docx", "txt", "rtf", "odt", "xls", "xlsx", "md"]),
    ];
    table
        .iter()
        .map(|(k, exts)| (k.to_string(), exts.iter().map(|e| e.to_string()).collect()))
        .collect()
}

/// Layered configuration: built-in defaults, then an optional `Config.{toml,yaml,json}`,
/// then `SIFT_*` environment variables (`SIFT_DB_PATH`, `SIFT_BATCH_SIZE`, ...).
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let defaults = AppConfig::default();
    let mut builder = Config::builder()
        .set_default("db_path", defaults.db_path.clone())?
        .set_default("batch_size", defaults.batch_size as i64)?;
    for (category, exts) in &defaults.file_types {
        builder = builder.set_default(format!("file_types.{}", category), exts.clone())?;
    }

    let config = builder
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("SIFT")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    config.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|kept| dir_path.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(dir_path));
        result.push(dir);
    }

    result
}
