// ABOUTME: Configuration loading and validation for stagelog journals and stores.
// ABOUTME: Reads STAGELOG_* environment variables with defaults and rejects inconsistent table ids.

use std::path::PathBuf;

use thiserror::Error;

/// Table id the journal rows are written under unless configured otherwise.
pub const DEFAULT_JOURNAL_TABLE: u16 = 36;

/// Table id the crash reports are written under unless configured otherwise.
pub const DEFAULT_CRASH_TABLE: u16 = 32;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid number: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("STAGELOG_JOURNAL_TABLE and STAGELOG_CRASH_TABLE must differ, both are {0}")]
    TableClash(u16),
}

/// Journal configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagelogConfig {
    pub home: PathBuf,
    pub service: String,
    pub host: String,
    pub base_url: String,
    pub max_verbosity: i32,
    pub save_only_errors: bool,
    pub journal_table: u16,
    pub crash_table: u16,
}

impl StagelogConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - STAGELOG_HOME: data directory (default: ~/.stagelog)
    /// - STAGELOG_SERVICE: service name and crash code prefix (default: stagelog)
    /// - STAGELOG_HOST: host recorded on entries (default: $HOSTNAME, then localhost)
    /// - ERR_BASE_URL: documentation page crash links point into (default: empty)
    /// - STAGELOG_MAX_VERBOSITY: highest level `Recorder::v` accepts (default: 0)
    /// - STAGELOG_SAVE_ONLY_ERRORS: persist only crashed entries (default: false)
    /// - STAGELOG_JOURNAL_TABLE: journal table id (default: 36)
    /// - STAGELOG_CRASH_TABLE: crash table id (default: 32)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let home = var("STAGELOG_HOME").map(PathBuf::from).unwrap_or_else(|| {
            var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".stagelog")
        });

        let service = var("STAGELOG_SERVICE").unwrap_or_else(|| "stagelog".to_string());

        let host = var("STAGELOG_HOST")
            .or_else(|| var("HOSTNAME"))
            .unwrap_or_else(|| "localhost".to_string());

        let base_url = var("ERR_BASE_URL").unwrap_or_default();

        let max_verbosity = parse(&var, "STAGELOG_MAX_VERBOSITY", 0)?;

        let save_only_errors = var("STAGELOG_SAVE_ONLY_ERRORS")
            .map(|v| v == "true" || v == "1" || v == "yes")
            .unwrap_or(false);

        let journal_table = parse(&var, "STAGELOG_JOURNAL_TABLE", DEFAULT_JOURNAL_TABLE)?;
        let crash_table = parse(&var, "STAGELOG_CRASH_TABLE", DEFAULT_CRASH_TABLE)?;
        if journal_table == crash_table {
            return Err(ConfigError::TableClash(journal_table));
        }

        Ok(Self {
            home,
            service,
            host,
            base_url,
            max_verbosity,
            save_only_errors,
            journal_table,
            crash_table,
        })
    }

    /// Path of the SQLite journal database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.home.join("journal.db")
    }
}

fn parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        None => Ok(default),
    }
}
