//! Configuration management for dmig using the prefer crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::converters::pool::WorkerCommand;
use crate::converters::{ConverterSettings, RunnerOptions};
use crate::database::DEFAULT_BUSY_TIMEOUT;
use crate::importer::ImporterOptions;
use crate::uploads::{MaterializeOptions, DEFAULT_MAX_UPLOAD_SIZE};

/// Default Intermediate Store filename.
pub const DEFAULT_INTERMEDIATE_FILENAME: &str = "intermediate.db";

/// Default mappings store filename.
pub const DEFAULT_MAPPINGS_FILENAME: &str = "mappings.db";

/// Default upload artifact store filename.
pub const DEFAULT_UPLOADS_DB_FILENAME: &str = "uploads.db";

/// Default materialized uploads subdirectory name.
const UPLOADS_SUBDIR: &str = "uploads";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Intermediate Store written by converters.
    pub intermediate_db: PathBuf,
    /// ID mapping store written by importers.
    pub mappings_db: PathBuf,
    /// Upload artifact store written by the materializer.
    pub uploads_db: PathBuf,
    /// Directory materialized upload files are written to.
    pub uploads_dir: PathBuf,
    /// Source database exported from the platform being migrated.
    pub source_db: Option<PathBuf>,
    /// Root directory of source attachments.
    pub attachments_dir: Option<PathBuf>,
    /// Destination database importers write to.
    pub destination_db: Option<PathBuf>,
    /// How long to wait for a competing writer on any store.
    pub busy_timeout: Duration,
    /// Converter worker processes (0 = in-process).
    pub workers: usize,
    /// Items per converter batch.
    pub converter_batch_size: usize,
    /// Worker program override (defaults to the running binary).
    pub worker_program: Option<PathBuf>,
    /// Rows per destination insert batch.
    pub importer_batch_size: usize,
    /// Largest upload the materializer writes, in bytes.
    pub max_upload_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_data_dir(PathBuf::from("."))
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let runner = RunnerOptions::default();
        Self {
            intermediate_db: data_dir.join(DEFAULT_INTERMEDIATE_FILENAME),
            mappings_db: data_dir.join(DEFAULT_MAPPINGS_FILENAME),
            uploads_db: data_dir.join(DEFAULT_UPLOADS_DB_FILENAME),
            uploads_dir: data_dir.join(UPLOADS_SUBDIR),
            data_dir,
            source_db: None,
            attachments_dir: None,
            destination_db: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            workers: runner.workers,
            converter_batch_size: runner.batch_size,
            worker_program: None,
            importer_batch_size: ImporterOptions::default().batch_size,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }

    /// Point every store that still lives in the data directory at a new one.
    pub fn set_data_dir(&mut self, data_dir: PathBuf) {
        let fresh = Self::with_data_dir(data_dir.clone());
        let old = Self::with_data_dir(self.data_dir.clone());
        if self.intermediate_db == old.intermediate_db {
            self.intermediate_db = fresh.intermediate_db;
        }
        if self.mappings_db == old.mappings_db {
            self.mappings_db = fresh.mappings_db;
        }
        if self.uploads_db == old.uploads_db {
            self.uploads_db = fresh.uploads_db;
        }
        if self.uploads_dir == old.uploads_dir {
            self.uploads_dir = fresh.uploads_dir;
        }
        self.data_dir = data_dir;
    }

    /// Source settings shipped to converter workers.
    pub fn converter_settings(&self) -> Option<ConverterSettings> {
        self.source_db.as_ref().map(|source_db| ConverterSettings {
            source_db: source_db.clone(),
            attachments_dir: self.attachments_dir.clone(),
        })
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            workers: self.workers,
            batch_size: self.converter_batch_size.max(1),
            worker_command: self.worker_program.clone().map(WorkerCommand::new),
        }
    }

    pub fn importer_options(&self) -> ImporterOptions {
        ImporterOptions {
            batch_size: self.importer_batch_size.max(1),
        }
    }

    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            uploads_dir: self.uploads_dir.clone(),
            max_size: self.max_upload_size,
        }
    }
}

/// Converter section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct ConverterConfig {
    /// Worker processes (0 = in-process).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u64>,
    /// Items per batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u64>,
    /// Worker program path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<String>,
}

impl ConverterConfig {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Importer section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct ImporterConfig {
    /// Rows per destination insert batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u64>,
}

impl ImporterConfig {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Intermediate Store path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_db: Option<String>,
    /// Mappings store path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings_db: Option<String>,
    /// Upload artifact store path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploads_db: Option<String>,
    /// Materialized uploads directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploads_dir: Option<String>,
    /// Source database path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_db: Option<String>,
    /// Source attachments directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments_dir: Option<String>,
    /// Destination database path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_db: Option<String>,
    /// Store busy timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_timeout_secs: Option<u64>,
    /// Largest upload to materialize, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_upload_size: Option<u64>,
    #[serde(default, skip_serializing_if = "ConverterConfig::is_default")]
    #[prefer(default)]
    pub converter: ConverterConfig,
    #[serde(default, skip_serializing_if = "ImporterConfig::is_default")]
    #[prefer(default)]
    pub importer: ImporterConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers dmig config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("dmig").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config {}: {}", path.display(), e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory if available, otherwise None.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths (typically the config file dir).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.set_data_dir(self.resolve_path(data_dir, base_dir));
        }
        let resolve = |value: &Option<String>| value.as_ref().map(|p| self.resolve_path(p, base_dir));

        if let Some(path) = resolve(&self.intermediate_db) {
            settings.intermediate_db = path;
        }
        if let Some(path) = resolve(&self.mappings_db) {
            settings.mappings_db = path;
        }
        if let Some(path) = resolve(&self.uploads_db) {
            settings.uploads_db = path;
        }
        if let Some(path) = resolve(&self.uploads_dir) {
            settings.uploads_dir = path;
        }
        if let Some(path) = resolve(&self.source_db) {
            settings.source_db = Some(path);
        }
        if let Some(path) = resolve(&self.attachments_dir) {
            settings.attachments_dir = Some(path);
        }
        if let Some(path) = resolve(&self.destination_db) {
            settings.destination_db = Some(path);
        }
        if let Some(secs) = self.busy_timeout_secs {
            settings.busy_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = self.max_upload_size {
            settings.max_upload_size = size;
        }
        if let Some(workers) = self.converter.workers {
            settings.workers = workers as usize;
        }
        if let Some(batch_size) = self.converter.batch_size {
            settings.converter_batch_size = batch_size as usize;
        }
        if let Some(path) = resolve(&self.converter.worker_program) {
            settings.worker_program = Some(path);
        }
        if let Some(batch_size) = self.importer.batch_size {
            settings.importer_batch_size = batch_size as usize;
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (skips discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory override from the command line.
    pub data_dir: Option<PathBuf>,
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> anyhow::Result<(Settings, Config)> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path)
            .await
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?,
        None => Config::load().await,
    };

    let mut settings = Settings::default();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = config.base_dir().unwrap_or(cwd);
    config.apply_to_settings(&mut settings, &base_dir);

    if let Some(data_dir) = options.data_dir {
        tracing::debug!("Using data directory {}", data_dir.display());
        settings.set_data_dir(data_dir);
    }

    Ok((settings, config))
}
