use std::fs;
use std::time::Duration;

use common::DsnComponents;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BATCH_SIZE: usize = 20_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_POLL_DURATION_SECS: u64 = 6 * 60 * 60;
pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_WAREHOUSE_ENDPOINT: &str = "https://bigquery.googleapis.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("expanding environment references: {0}")]
    EnvExpand(String),

    #[error("parsing yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Config tree
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub source: SourceCfg,
    pub warehouse: WarehouseCfg,
    pub sync: SyncCfg,
    pub logging: LoggingCfg,
    pub metrics: MetricsCfg,
}

/// MySQL connection. Either a full `dsn` or discrete parts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCfg {
    pub dsn: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseCfg {
    pub project_id: String,
    pub dataset: String,
    /// Static OAuth2 bearer token. Takes precedence over `key_file` and
    /// is never refreshed.
    pub access_token: Option<String>,
    /// Service-account JSON key; tokens are minted and refreshed from it.
    pub key_file: Option<String>,
    /// Job location, e.g. `EU`.
    pub location: Option<String>,
    /// Overrides the public API root (emulators, proxies).
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCfg {
    pub batch_size: Option<usize>,
    pub poll_interval_ms: u64,
    pub max_poll_duration_secs: u64,
    pub ignore_columns: Vec<String>,
    pub order_column: Option<String>,
}

impl Default for SyncCfg {
    fn default() -> Self {
        Self {
            batch_size: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_duration_secs: DEFAULT_MAX_POLL_DURATION_SECS,
            ignore_columns: Vec::new(),
            order_column: None,
        }
    }
}

impl SyncCfg {
    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_duration(&self) -> Duration {
        Duration::from_secs(self.max_poll_duration_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingCfg {
    /// `info`, or a full filter like `info,sinks=debug`.
    pub level: Option<String>,
    pub json: bool,
    pub with_targets: bool,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self {
            level: Some("info".to_owned()),
            json: false,
            with_targets: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsCfg {
    /// Prometheus scrape listener, e.g. `0.0.0.0:9000`. Off when unset.
    pub listen: Option<String>,
}

// ============================================================================
// Loading
// ============================================================================

pub fn load_from_path(file_path: &str) -> Result<SyncConfig, ConfigError> {
    let raw = fs::read_to_string(file_path).map_err(|source| ConfigError::Io {
        path: file_path.to_owned(),
        source,
    })?;
    let with_env = shellexpand::env(&raw)
        .map_err(|e| ConfigError::EnvExpand(e.to_string()))?
        .to_string();
    let cfg: SyncConfig = serde_yaml::from_str(&with_env)?;

    Ok(cfg)
}

/// Optional file, then the environment overlay, then validation.
pub fn load(file_path: Option<&str>) -> Result<SyncConfig, ConfigError> {
    let mut cfg = match file_path {
        Some(path) => load_from_path(path)?,
        None => SyncConfig::default(),
    };
    cfg.apply_env()?;
    cfg.validate()?;
    Ok(cfg)
}

impl SyncConfig {
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Fill every field the file left empty from the `DB_*`, `BQ_*` and
    /// sync variables.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // A full dsn in the file wins over the DB_* parts.
        if self.source.dsn.as_deref().is_none_or(str::is_empty) {
            fill(&mut self.source.host, var("DB_HOST"));
            fill(&mut self.source.user, var("DB_USERNAME"));
            fill(&mut self.source.password, var("DB_PASSWORD"));
            fill(&mut self.source.database, var("DB_DATABASE_NAME"));
            if let (None, Some(port)) = (self.source.port, var("DB_PORT")) {
                self.source.port = Some(port.trim().parse().map_err(|_| {
                    ConfigError::invalid(
                        "DB_PORT",
                        format!("not a port: {port}"),
                    )
                })?);
            }
        }

        fill_str(&mut self.warehouse.project_id, var("BQ_PROJECT_ID"));
        fill_str(&mut self.warehouse.dataset, var("BQ_DATASET"));
        fill(&mut self.warehouse.access_token, var("BQ_ACCESS_TOKEN"));
        fill(&mut self.warehouse.key_file, var("BQ_KEY_FILE"));
        fill(&mut self.warehouse.location, var("BQ_LOCATION"));

        if let (None, Some(n)) =
            (self.sync.batch_size, var("MAX_ROWS_PER_BATCH"))
        {
            self.sync.batch_size = Some(n.trim().parse().map_err(|_| {
                ConfigError::invalid(
                    "MAX_ROWS_PER_BATCH",
                    format!("not a number: {n}"),
                )
            })?);
        }
        if let (true, Some(list)) =
            (self.sync.ignore_columns.is_empty(), var("IGNORE_COLUMNS"))
        {
            self.sync.ignore_columns = split_list(&list);
        }
        fill(&mut self.sync.order_column, var("ORDER_COLUMN"));

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.batch_size() == 0 {
            return Err(ConfigError::invalid("sync.batch_size", "must be > 0"));
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "sync.poll_interval_ms",
                "must be > 0",
            ));
        }
        if self.sync.max_poll_duration() < self.sync.poll_interval() {
            return Err(ConfigError::invalid(
                "sync.max_poll_duration_secs",
                "shorter than the poll interval",
            ));
        }
        if self.warehouse.project_id.trim().is_empty() {
            return Err(ConfigError::invalid(
                "warehouse.project_id",
                "required (or BQ_PROJECT_ID)",
            ));
        }
        if self.warehouse.dataset.trim().is_empty() {
            return Err(ConfigError::invalid(
                "warehouse.dataset",
                "required (or BQ_DATASET)",
            ));
        }
        self.source.resolved_dsn()?;
        debug!("configuration validated");
        Ok(())
    }
}

impl SourceCfg {
    /// Connection URL, built from the parts when no `dsn` is given.
    /// `database` replaces the path of an explicit `dsn`.
    pub fn resolved_dsn(&self) -> Result<String, ConfigError> {
        if let Some(dsn) = self.dsn.as_deref().filter(|d| !d.is_empty()) {
            let mut parts = DsnComponents::from_url(dsn, DEFAULT_MYSQL_PORT)
                .map_err(|e| ConfigError::invalid("source.dsn", e))?;
            match self.database.as_deref().filter(|d| !d.is_empty()) {
                Some(db) if db != parts.database => {
                    parts.database = db.to_owned();
                    return parts
                        .to_url("mysql")
                        .map_err(|e| ConfigError::invalid("source.dsn", e));
                }
                _ if parts.database.is_empty() => {
                    return Err(ConfigError::invalid(
                        "source.dsn",
                        "no database in path (or source.database)",
                    ));
                }
                _ => return Ok(dsn.to_owned()),
            }
        }

        let database = self
            .database
            .clone()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                ConfigError::invalid(
                    "source.database",
                    "required (or DB_DATABASE_NAME)",
                )
            })?;

        DsnComponents {
            host: self.host.clone().unwrap_or_else(|| "localhost".to_owned()),
            port: self.port.unwrap_or(DEFAULT_MYSQL_PORT),
            user: self.user.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            database,
        }
        .to_url("mysql")
        .map_err(|e| ConfigError::invalid("source", e))
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.as_deref().is_none_or(str::is_empty) {
        if let Some(v) = value {
            *slot = Some(v);
        }
    }
}

fn fill_str(slot: &mut String, value: Option<String>) {
    if slot.trim().is_empty() {
        if let Some(v) = value {
            *slot = v;
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
