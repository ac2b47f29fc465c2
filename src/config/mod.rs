// backupsync/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::sync::plan::RetentionPolicy;

/// Value returned by string getters when a setting is absent.
pub const NOT_SET: &str = "NOT SET";
/// Value returned by `backup_amount_max` when the setting is absent.
pub const UNLIMITED_BACKUPS: i64 = -1;

pub const KEY_MYSQLDUMP_COMMAND: &str = "backup.mysqldump_command";
pub const KEY_MYSQL_RESTORE_COMMAND: &str = "backup.mysql_restore_command";
pub const KEY_BACKUP_DIR: &str = "backup.backup_dir";
pub const KEY_PATHS_TO_BACKUP: &str = "backup.paths_to_backup";
pub const KEY_BACKUP_AMOUNT_MAX: &str = "backup.backup_amount_max";
pub const KEY_S3_PATH: &str = "backup.s3_path";

const DEFAULT_REGION: &str = "us-east-1";
const MIN_OPERATION_TIMEOUT_SECS: u64 = 1;

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonSyncOptions {
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonLoggingOptions {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    /// Flat key/value view of the host configuration store.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
    pub sync: Option<JsonSyncOptions>,
    pub logging: Option<JsonLoggingOptions>,
}

fn default_max_concurrent_operations() -> usize {
    4
}

fn default_operation_timeout_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Key lookup against a host configuration store.
pub trait SettingsStore {
    /// Returns the value only if the key is present and holds a string.
    fn find(&self, key: &str) -> Option<String>;
}

impl SettingsStore for HashMap<String, serde_json::Value> {
    fn find(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str()).map(str::to_string)
    }
}

/// Typed getters over the backup settings, falling back to documented sentinels.
#[derive(Debug, Clone)]
pub struct BackupSettings<S> {
    store: S,
}

impl<S: SettingsStore> BackupSettings<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn mysqldump_command(&self) -> String {
        self.store
            .find(KEY_MYSQLDUMP_COMMAND)
            .unwrap_or_else(|| NOT_SET.to_string())
    }

    pub fn mysql_restore_command(&self) -> String {
        self.store
            .find(KEY_MYSQL_RESTORE_COMMAND)
            .unwrap_or_else(|| NOT_SET.to_string())
    }

    pub fn backup_dir(&self) -> String {
        self.store
            .find(KEY_BACKUP_DIR)
            .unwrap_or_else(|| NOT_SET.to_string())
    }

    pub fn paths_to_backup(&self) -> String {
        self.store
            .find(KEY_PATHS_TO_BACKUP)
            .unwrap_or_else(|| NOT_SET.to_string())
    }

    /// Retention count. Reads a leading integer (`"5 backups"` is 5); values
    /// without one fall back to [`UNLIMITED_BACKUPS`].
    pub fn backup_amount_max(&self) -> i64 {
        self.store
            .find(KEY_BACKUP_AMOUNT_MAX)
            .and_then(|raw| parse_leading_integer(&raw))
            .unwrap_or(UNLIMITED_BACKUPS)
    }

    pub fn s3_path(&self) -> String {
        self.store.find(KEY_S3_PATH).unwrap_or_default()
    }

    /// Include paths, split on `:` or `;`. Empty when the setting is absent.
    pub fn paths_to_backup_list(&self) -> Vec<PathBuf> {
        let raw = self.paths_to_backup();
        if !is_set(&raw) {
            return Vec::new();
        }
        raw.split([':', ';'])
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.backup_amount_max())
    }

    /// Problems with setting values that were papered over by a fallback.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(raw) = self.store.find(KEY_BACKUP_AMOUNT_MAX) {
            match parse_leading_integer(&raw) {
                None => warnings.push(format!(
                    "Setting {} has non-numeric value {:?}, treating retention as unlimited",
                    KEY_BACKUP_AMOUNT_MAX, raw
                )),
                Some(value) if raw.trim().parse::<i64>().is_err() => warnings.push(format!(
                    "Setting {} has trailing text in {:?}, using {}",
                    KEY_BACKUP_AMOUNT_MAX, raw, value
                )),
                Some(_) => {}
            }
        }
        warnings
    }
}

/// Optional sign followed by digits at the start of `raw`, ignoring leading whitespace.
fn parse_leading_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let digits_start = usize::from(trimmed.starts_with(['-', '+']));
    let digits_len = trimmed[digits_start..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return None;
    }
    trimmed[..digits_start + digits_len].parse().ok()
}

/// True unless the value is empty or the `NOT SET` sentinel.
pub fn is_set(value: &str) -> bool {
    !value.trim().is_empty() && value != NOT_SET
}

/// Trims leading/trailing `/` and re-appends a single trailing `/` when non-empty.
pub fn normalize_path_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub bucket: String,
    pub endpoint: Option<String>,
    /// Always normalized, see [`normalize_path_prefix`].
    pub path_prefix: String,
}

impl RemoteConfig {
    /// Reads credentials from the process environment once.
    pub fn from_env(path_prefix: &str) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), path_prefix)
    }

    pub fn from_lookup<F>(lookup: F, path_prefix: &str) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            access_key: non_empty("S3_ACCESS_KEY").unwrap_or_default(),
            secret_key: non_empty("S3_SECRET_KEY").unwrap_or_default(),
            region: non_empty("S3_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket: non_empty("S3_BUCKET").unwrap_or_default(),
            endpoint: non_empty("S3_ENDPOINT"),
            path_prefix: normalize_path_prefix(path_prefix),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.access_key.is_empty()
            && !self.secret_key.is_empty()
            && !self.bucket.is_empty()
            && !self.path_prefix.is_empty()
    }

    pub fn object_key(&self, name: &str) -> String {
        format!("{}{}", self.path_prefix, name)
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub retention: RetentionPolicy,
    pub max_concurrent_operations: usize,
    pub operation_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings: BackupSettings<HashMap<String, serde_json::Value>>,
    pub remote: RemoteConfig,
    pub sync: SyncOptions,
    pub logging: LoggingOptions,
    /// Collected while building; logged by the caller once logging is up.
    pub warnings: Vec<String>,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).with_context(|| {
            format!("Failed to read config file at {}", config_path.display())
        })?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        Ok(Self::from_raw(raw_json_config, RemoteConfig::from_env))
    }

    /// Builds the typed configuration; `remote_for_prefix` resolves
    /// credentials for the configured prefix.
    pub fn from_raw<F>(raw: RawJsonConfig, remote_for_prefix: F) -> Self
    where
        F: FnOnce(&str) -> RemoteConfig,
    {
        let settings = BackupSettings::new(raw.settings);
        let remote = remote_for_prefix(&settings.s3_path());
        let mut warnings = settings.warnings();

        if !remote.is_enabled()
            && (!remote.access_key.is_empty()
                || !remote.secret_key.is_empty()
                || !remote.bucket.is_empty())
        {
            // Only warn if some S3 fields were provided but the set is incomplete
            warnings.push(format!(
                "S3 configuration is partially present but some required fields \
                 (S3_ACCESS_KEY, S3_SECRET_KEY, S3_BUCKET, {}) are missing or empty. \
                 Remote storage will be disabled.",
                KEY_S3_PATH
            ));
        }

        let sync_raw = raw.sync.unwrap_or(JsonSyncOptions {
            max_concurrent_operations: default_max_concurrent_operations(),
            operation_timeout_secs: default_operation_timeout_secs(),
        });
        if sync_raw.operation_timeout_secs == 0 {
            warnings.push(format!(
                "sync.operation_timeout_secs is 0, using {}s",
                MIN_OPERATION_TIMEOUT_SECS
            ));
        }
        let sync = SyncOptions {
            retention: settings.retention_policy(),
            max_concurrent_operations: sync_raw.max_concurrent_operations.max(1),
            operation_timeout: Duration::from_secs(
                sync_raw.operation_timeout_secs.max(MIN_OPERATION_TIMEOUT_SECS),
            ),
        };

        let logging = raw
            .logging
            .map(|l| LoggingOptions {
                level: l.level,
                json: l.json,
            })
            .unwrap_or(LoggingOptions {
                level: default_log_level(),
                json: false,
            });

        AppConfig {
            settings,
            remote,
            sync,
            logging,
            warnings,
        }
    }

    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
    }

    /// Backup directory, or an error if the setting is absent.
    pub fn backup_dir(&self) -> Result<PathBuf> {
        let dir = self.settings.backup_dir();
        if !is_set(&dir) {
            anyhow::bail!("{} must be set in config.json", KEY_BACKUP_DIR);
        }
        Ok(PathBuf::from(dir))
    }
}
