use etcetera::{choose_app_strategy, AppStrategy, AppStrategyArgs};
use once_cell::sync::{Lazy, OnceCell};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub static APP_STRATEGY: Lazy<AppStrategyArgs> = Lazy::new(|| AppStrategyArgs {
    top_level_domain: "Block".to_string(),
    author: "Block".to_string(),
    app_name: "toolhub".to_string(),
});

const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration value not found: {0}")]
    NotFound(String),
    #[error("Failed to deserialize value: {0}")]
    DeserializeError(String),
    #[error("Failed to read config file: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Failed to create config directory: {0}")]
    DirectoryError(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::DeserializeError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::DeserializeError(err.to_string())
    }
}

/// Key/value configuration backed by a YAML file.
///
/// Lookups check the environment first: a key `foo_bar` is overridden by the
/// variable `FOO_BAR`. Environment values are parsed as JSON when possible so
/// numbers and booleans come through typed, and fall back to plain strings.
#[derive(Debug, Clone)]
pub struct Config {
    config_path: PathBuf,
}

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

impl Default for Config {
    fn default() -> Self {
        // choose_app_strategy().config_dir()
        // - macOS/Linux: ~/.config/toolhub/
        // - Windows:     ~\AppData\Roaming\Block\toolhub\config\
        let config_dir = choose_app_strategy(APP_STRATEGY.clone())
            .map(|strategy| strategy.config_dir())
            .unwrap_or_else(|_| PathBuf::from(".toolhub"));

        Config {
            config_path: config_dir.join(CONFIG_FILE_NAME),
        }
    }
}

impl Config {
    /// Get the process-wide configuration instance
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Create a configuration stored at an explicit file path
    pub fn new<P: AsRef<Path>>(config_path: P) -> Self {
        Config {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Get a configuration value, preferring the environment over the file
    pub fn get_param<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<T, ConfigError> {
        let value = match env_override(key) {
            Some(value) => value,
            None => self
                .load_values()?
                .remove(key)
                .ok_or_else(|| ConfigError::NotFound(key.to_string()))?,
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Set a value in the config file, leaving other keys untouched
    pub fn set_param(&self, key: &str, value: Value) -> Result<(), ConfigError> {
        self.update_values(|values| {
            values.insert(key.to_string(), value);
        })
    }

    pub fn delete(&self, key: &str) -> Result<(), ConfigError> {
        self.update_values(|values| {
            values.remove(key);
        })
    }

    /// Every value stored in the file, without environment overrides
    pub fn load_values(&self) -> Result<BTreeMap<String, Value>, ConfigError> {
        let raw = match fs::read_to_string(&self.config_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let parsed: serde_yaml::Value = serde_yaml::from_str(&raw)?;
        Ok(match serde_json::to_value(parsed)? {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        })
    }

    /// Read, modify and rewrite the whole file; keys are written in sorted order
    fn update_values<F>(&self, update: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut BTreeMap<String, Value>),
    {
        let mut values = self.load_values()?;
        update(&mut values);

        if let Some(dir) = self.config_path.parent() {
            fs::create_dir_all(dir).map_err(|e| ConfigError::DirectoryError(e.to_string()))?;
        }
        fs::write(&self.config_path, serde_yaml::to_string(&values)?)?;
        Ok(())
    }
}

/// `foo_bar` is overridden by `FOO_BAR`; JSON values come through typed, anything else as a string
fn env_override(key: &str) -> Option<Value> {
    let raw = env::var(key.to_uppercase()).ok()?;
    Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[test]
    fn test_basic_config() -> Result<(), ConfigError> {
        let temp_file = NamedTempFile::new().unwrap();
        let config = Config::new(temp_file.path());

        config.set_param("test_key", Value::String("test_value".to_string()))?;

        let value: String = config.get_param("test_key")?;
        assert_eq!(value, "test_value");
        Ok(())
    }

    #[test]
    fn test_missing_key() {
        let temp_file = NamedTempFile::new().unwrap();
        let config = Config::new(temp_file.path());

        let result: Result<String, _> = config.get_param("missing");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_delete_keeps_other_keys() -> Result<(), ConfigError> {
        let temp_file = NamedTempFile::new().unwrap();
        let config = Config::new(temp_file.path());

        config.set_param("first", json!(1))?;
        config.set_param("second", json!({"nested": true}))?;
        config.delete("first")?;

        let values = config.load_values()?;
        assert!(!values.contains_key("first"));
        assert_eq!(values.get("second"), Some(&json!({"nested": true})));
        Ok(())
    }

    #[test]
    fn test_creates_parent_directories() -> Result<(), ConfigError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let config = Config::new(&path);

        config.set_param("key", json!("value"))?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() -> Result<(), ConfigError> {
        let temp_file = NamedTempFile::new().unwrap();
        let config = Config::new(temp_file.path());
        config.set_param("toolhub_test_timeout", json!(5))?;

        temp_env::with_var("TOOLHUB_TEST_TIMEOUT", Some("42"), || {
            let value: u64 = config.get_param("toolhub_test_timeout").unwrap();
            assert_eq!(value, 42);
        });

        let value: u64 = config.get_param("toolhub_test_timeout")?;
        assert_eq!(value, 5);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_plain_string_value() {
        let temp_file = NamedTempFile::new().unwrap();
        let config = Config::new(temp_file.path());

        temp_env::with_var("TOOLHUB_TEST_LABEL", Some("Misc tools"), || {
            let value: String = config.get_param("TOOLHUB_TEST_LABEL").unwrap();
            assert_eq!(value, "Misc tools");
        });
    }
}
