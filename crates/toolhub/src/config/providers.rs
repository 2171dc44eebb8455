use super::base::{Config, ConfigError};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const PROVIDERS_KEY: &str = "providers";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Envs {
    /// A map of environment variables to set, e.g. API_KEY -> some_secret, HOST -> host
    #[serde(default)]
    #[serde(flatten)]
    map: HashMap<String, String>,
}

impl Envs {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get_env(&self) -> HashMap<String, String> {
        self.map.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn default_enabled() -> bool {
    true
}

/// How to launch one tool provider process
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProviderConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: Envs,
    /// Disabled providers stay configured but are skipped by discovery
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ProviderConfig {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            args: vec![],
            envs: Envs::default(),
            enabled: true,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_envs(mut self, envs: Envs) -> Self {
        self.envs = envs;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl std::fmt::Display for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.command)
        } else {
            write!(f, "{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Persisted form: the display name travels with the entry since map keys are normalized
#[derive(Debug, Clone, Deserialize, Serialize)]
struct ProviderEntry {
    name: String,
    #[serde(flatten)]
    config: ProviderConfig,
}

pub fn name_to_key(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Where configured tool providers come from.
///
/// `load` returns providers keyed by name; the map order is the discovery order.
pub trait ProviderConfigStore: Send + Sync {
    fn load(&self) -> Result<BTreeMap<String, ProviderConfig>>;

    fn add(&self, name: &str, config: ProviderConfig) -> Result<()>;

    /// Returns whether the provider existed
    fn remove(&self, name: &str) -> Result<bool>;
}

/// Provider configuration stored under the `providers` key of a [`Config`] file
#[derive(Debug, Clone)]
pub struct ProviderConfigManager {
    config: Config,
}

impl ProviderConfigManager {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Manager over the process-wide configuration file
    pub fn global() -> Self {
        Self::new(Config::global().clone())
    }

    fn entries(&self) -> Result<HashMap<String, ProviderEntry>> {
        match self.config.get_param(PROVIDERS_KEY) {
            Ok(entries) => Ok(entries),
            Err(ConfigError::NotFound(_)) => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: HashMap<String, ProviderEntry>) -> Result<()> {
        self.config
            .set_param(PROVIDERS_KEY, serde_json::to_value(entries)?)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<ProviderConfig>> {
        Ok(self
            .entries()?
            .remove(&name_to_key(name))
            .map(|entry| entry.config))
    }

    /// Enable or disable a provider without removing it. Returns whether it exists.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let mut entries = self.entries()?;
        match entries.get_mut(&name_to_key(name)) {
            Some(entry) => {
                entry.config.enabled = enabled;
                self.save(entries)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.map(|config| config.enabled).unwrap_or(false))
    }
}

impl ProviderConfigStore for ProviderConfigManager {
    fn load(&self) -> Result<BTreeMap<String, ProviderConfig>> {
        Ok(self
            .entries()?
            .into_values()
            .map(|entry| (entry.name, entry.config))
            .collect())
    }

    fn add(&self, name: &str, config: ProviderConfig) -> Result<()> {
        let mut entries = self.entries()?;
        entries.insert(
            name_to_key(name),
            ProviderEntry {
                name: name.to_string(),
                config,
            },
        );
        self.save(entries)
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let mut entries = self.entries()?;
        let existed = entries.remove(&name_to_key(name)).is_some();
        if existed {
            self.save(entries)?;
        }
        Ok(existed)
    }
}
