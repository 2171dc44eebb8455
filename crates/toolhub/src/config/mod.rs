mod base;
mod providers;

pub use base::{Config, ConfigError, APP_STRATEGY};
pub use providers::{name_to_key, Envs, ProviderConfig, ProviderConfigManager, ProviderConfigStore};
