//! CLI configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via --config or PROGLOG_CONFIG)
//! 3. Environment variables

use proglog_store::{FlushPolicy, StoreConfig, TailRecovery};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store configuration.
    pub store: StoreConfig,
}

impl Config {
    /// Loads configuration from `path` if given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies overrides looked up by variable name.
    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(policy) = lookup("PROGLOG_FLUSH_POLICY") {
            self.store.flush_policy = policy
                .parse::<FlushPolicy>()
                .map_err(|e| ConfigError::ValidationError(format!("PROGLOG_FLUSH_POLICY: {}", e)))?;
        }

        if let Some(recovery) = lookup("PROGLOG_TAIL_RECOVERY") {
            self.store.tail_recovery = recovery.parse::<TailRecovery>().map_err(|e| {
                ConfigError::ValidationError(format!("PROGLOG_TAIL_RECOVERY: {}", e))
            })?;
        }

        if let Some(sync) = lookup("PROGLOG_SYNC_ON_CLOSE") {
            self.store.sync_on_close = sync == "1" || sync.to_lowercase() == "true";
        }

        self.store.validate().map_err(ConfigError::ValidationError)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config {
            store: StoreConfig::new()
                .with_flush_policy(FlushPolicy::BufferFull(4096))
                .with_tail_recovery(TailRecovery::Truncate),
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proglog.yaml");
        std::fs::write(&path, "store:\n  flush_policy: manual\n  sync_on_close: false\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.store.flush_policy, FlushPolicy::Manual);
        assert!(!config.store.sync_on_close);
        assert_eq!(config.store.tail_recovery, TailRecovery::Fail);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::IoError(..))
        ));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "store:\n  flush_policy: sometimes\n").unwrap();
        assert!(matches!(
            Config::from_file(&bad),
            Err(ConfigError::ParseError(..))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("PROGLOG_FLUSH_POLICY", "buffer_full:128"),
                ("PROGLOG_TAIL_RECOVERY", "truncate"),
                ("PROGLOG_SYNC_ON_CLOSE", "false"),
            ]))
            .unwrap();

        assert_eq!(config.store.flush_policy, FlushPolicy::BufferFull(128));
        assert_eq!(config.store.tail_recovery, TailRecovery::Truncate);
        assert!(!config.store.sync_on_close);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("PROGLOG_FLUSH_POLICY", "hourly")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = config
            .apply_overrides(env(&[("PROGLOG_FLUSH_POLICY", "buffer_full:0")]))
            .unwrap_err();
        assert!(err.to_string().contains("at least 1 byte"));
    }
}
