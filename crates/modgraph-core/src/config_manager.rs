use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::ModGraphError {
    fn from(err: ConfigError) -> Self {
        crate::ModGraphError::Config(err.to_string())
    }
}

/// Main configuration for a ModGraph build session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModGraphConfig {
    /// Root that cache keys and transform contexts are relative to
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Bumping this invalidates every cache entry
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    #[serde(default)]
    pub transformer: TransformerConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ModGraphConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            cache_version: default_cache_version(),
            transformer: TransformerConfig::default(),
            workers: WorkerConfig::default(),
            cache: CacheConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Transformer identity; all of it is folded into the cache base hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerConfig {
    #[serde(default = "default_transformer_name")]
    pub name: String,

    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            name: default_transformer_name(),
            options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 1 runs transforms in-process
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheStoreConfig {
    Memory,
    File {
        root: PathBuf,
        #[serde(default)]
        gzip: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Consulted in order on reads
    #[serde(default = "default_cache_stores")]
    pub stores: Vec<CacheStoreConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stores: default_cache_stores(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_watcher_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_watcher_extensions")]
    pub extensions: Vec<String>,

    /// Batches buffered per subscriber before it has to rebuild from scratch
    #[serde(default = "default_watcher_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_watcher_debounce_ms(),
            extensions: default_watcher_extensions(),
            channel_capacity: default_watcher_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_cache_version() -> String {
    "1".to_string()
}
fn default_transformer_name() -> String {
    "default".to_string()
}
fn default_max_workers() -> usize {
    num_cpus::get().max(1)
}
fn default_cache_stores() -> Vec<CacheStoreConfig> {
    vec![CacheStoreConfig::File {
        root: std::env::temp_dir().join("modgraph-cache"),
        gzip: false,
    }]
}
fn default_watcher_debounce_ms() -> u64 {
    35
}
fn default_watcher_extensions() -> Vec<String> {
    ["js", "jsx", "mjs", "cjs", "ts", "tsx", "json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_watcher_channel_capacity() -> usize {
    1024
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

pub struct ConfigManager {
    config: ModGraphConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration for the current directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_for(Path::new("."))
    }

    /// Load configuration with the following precedence:
    /// 1. Environment variables
    /// 2. `<project>/.modgraph.toml`, else `~/.modgraph/config.toml`
    /// 3. Defaults
    pub fn load_for(project_dir: &Path) -> Result<Self, ConfigError> {
        let (config, config_path) = Self::load_config_file(project_dir)?;
        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());
        Self::validate_config(&config)?;

        match &config_path {
            Some(path) => info!("Config file: {}", path.display()),
            None => info!("No config file found, using defaults"),
        }
        info!(
            "Project root {} with {} worker(s), {} cache store(s)",
            config.project_root.display(),
            config.workers.max_workers,
            config.cache.stores.len()
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load an explicit file; env overrides still apply.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::read_toml_file(path)?;
        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    fn load_config_file(project_dir: &Path) -> Result<(ModGraphConfig, Option<PathBuf>), ConfigError> {
        let local_config = project_dir.join(".modgraph.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(&local_config)?;
            return Ok((config, Some(local_config)));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".modgraph").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((ModGraphConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<ModGraphConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config: ModGraphConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    fn apply_env_overrides(
        mut config: ModGraphConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> ModGraphConfig {
        if let Some(root) = var("MODGRAPH_PROJECT_ROOT") {
            config.project_root = PathBuf::from(root);
        }
        if let Some(workers) = var("MODGRAPH_MAX_WORKERS") {
            if let Ok(n) = workers.parse() {
                config.workers.max_workers = n;
            }
        }
        if let Some(dir) = var("MODGRAPH_CACHE_DIR") {
            config.cache.stores = vec![CacheStoreConfig::File {
                root: PathBuf::from(dir),
                gzip: false,
            }];
        }
        if let Some(level) = var("MODGRAPH_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }

    fn validate_config(config: &ModGraphConfig) -> Result<(), ConfigError> {
        if config.workers.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "workers.max_workers must be at least 1".to_string(),
            ));
        }

        if config.cache_version.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "cache_version must not be empty".to_string(),
            ));
        }

        for store in &config.cache.stores {
            if let CacheStoreConfig::File { root, .. } = store {
                if root.as_os_str().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "file cache store requires a root directory".to_string(),
                    ));
                }
            }
        }

        if config.watcher.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "watcher.channel_capacity must be at least 1".to_string(),
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &ModGraphConfig {
        &self.config
    }

    pub fn into_config(self) -> ModGraphConfig {
        self.config
    }

    /// Path of the config file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = ModGraphConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ModGraphConfig::default();
        assert_eq!(config.cache_version, "1");
        assert!(config.workers.max_workers >= 1);
        assert_eq!(config.cache.stores.len(), 1);
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = ModGraphConfig::default();
        bad.workers.max_workers = 0;
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = ModGraphConfig::default();
        bad.logging.level = "loud".to_string();
        assert!(ConfigManager::validate_config(&bad).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MODGRAPH_MAX_WORKERS", "3"),
            ("MODGRAPH_CACHE_DIR", "/var/cache/modgraph"),
        ]
        .into_iter()
        .collect();
        let config = ConfigManager::apply_env_overrides(ModGraphConfig::default(), |k| {
            vars.get(k).map(|v| v.to_string())
        });
        assert_eq!(config.workers.max_workers, 3);
        assert_eq!(
            config.cache.stores,
            vec![CacheStoreConfig::File {
                root: PathBuf::from("/var/cache/modgraph"),
                gzip: false
            }]
        );
    }

    #[test]
    fn test_parse_toml() {
        let config: ModGraphConfig = toml::from_str(
            r#"
            project_root = "/srv/app"
            cache_version = "7"

            [workers]
            max_workers = 2

            [[cache.stores]]
            type = "memory"

            [[cache.stores]]
            type = "file"
            root = "/tmp/mg"
            gzip = true
            "#,
        )
        .unwrap();
        assert_eq!(config.project_root, PathBuf::from("/srv/app"));
        assert_eq!(config.workers.max_workers, 2);
        assert_eq!(config.cache.stores[0], CacheStoreConfig::Memory);
        assert_eq!(
            config.cache.stores[1],
            CacheStoreConfig::File {
                root: PathBuf::from("/tmp/mg"),
                gzip: true
            }
        );
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_project_file_takes_precedence() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".modgraph.toml"),
            "cache_version = \"9\"\n[logging]\nformat = \"pretty\"\n",
        )
        .unwrap();

        let manager = ConfigManager::load_for(dir.path()).unwrap();
        assert_eq!(manager.config().cache_version, "9");
        assert_eq!(manager.config().logging.format, "pretty");
        assert_eq!(manager.config_path(), Some(dir.path().join(".modgraph.toml").as_path()));
    }

    #[test]
    fn test_default_config_file_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        ConfigManager::create_default_config(&path).unwrap();

        let manager = ConfigManager::from_file(&path).unwrap();
        assert_eq!(manager.config().cache_version, ModGraphConfig::default().cache_version);
        assert!(matches!(
            ConfigManager::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::NotFound(_))
        ));
    }
}
