use anyhow::{bail, Result};
use console::style;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;
use tracing::info;

use toolhub::config::{Envs, ProviderConfig, ProviderConfigManager, ProviderConfigStore};

/// A provider as entered on the command line
pub struct NewProvider {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// `KEY=VALUE` pairs
    pub envs: Vec<String>,
    pub enabled: bool,
}

#[derive(Serialize)]
struct ProviderListing<'a> {
    name: &'a str,
    #[serde(flatten)]
    config: &'a ProviderConfig,
}

fn parse_env(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("Invalid environment variable '{}', expected KEY=VALUE", pair),
    }
}

pub fn handle_providers_list(store: &dyn ProviderConfigStore, format: &str) -> Result<String> {
    let providers = store.load()?;

    if format == "json" {
        let listing: Vec<ProviderListing> = providers
            .iter()
            .map(|(name, config)| ProviderListing { name, config })
            .collect();
        return Ok(format!("{}\n", serde_json::to_string_pretty(&listing)?));
    }

    if providers.is_empty() {
        return Ok("No tool providers configured. Add one with 'toolhub providers add'.\n".to_string());
    }

    let mut output = String::new();
    for (name, config) in &providers {
        let status = if config.enabled {
            style("enabled").green()
        } else {
            style("disabled").dim()
        };
        writeln!(output, "{} ({})", style(name).bold(), status)?;
        writeln!(output, "    {}", config)?;
        let mut envs: Vec<_> = config.envs.get_env().into_keys().collect();
        envs.sort();
        if !envs.is_empty() {
            writeln!(output, "    env: {}", envs.join(", "))?;
        }
    }
    Ok(output)
}

pub fn handle_providers_add(store: &dyn ProviderConfigStore, provider: NewProvider) -> Result<String> {
    if provider.name.trim().is_empty() {
        bail!("Provider name cannot be empty");
    }

    let envs = provider
        .envs
        .iter()
        .map(|pair| parse_env(pair))
        .collect::<Result<HashMap<_, _>>>()?;
    let config = ProviderConfig::new(provider.command)
        .with_args(provider.args)
        .with_envs(Envs::new(envs))
        .with_enabled(provider.enabled);

    store.add(&provider.name, config)?;
    info!(provider = %provider.name, enabled = provider.enabled, "Added provider");
    Ok(format!("Added provider '{}'", provider.name))
}

pub fn handle_providers_remove(store: &dyn ProviderConfigStore, name: &str) -> Result<String> {
    if !store.remove(name)? {
        bail!("No provider named '{}'", name);
    }
    info!(provider = %name, "Removed provider");
    Ok(format!("Removed provider '{}'", name))
}

pub fn handle_providers_toggle(
    manager: &ProviderConfigManager,
    name: &str,
    enabled: bool,
) -> Result<String> {
    if !manager.set_enabled(name, enabled)? {
        bail!("No provider named '{}'", name);
    }
    let state = if enabled { "Enabled" } else { "Disabled" };
    info!(provider = %name, enabled, "Changed provider state");
    Ok(format!("{} provider '{}'", state, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use toolhub::config::Config;

    fn manager() -> (ProviderConfigManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        (ProviderConfigManager::new(Config::new(temp_file.path())), temp_file)
    }

    fn developer() -> NewProvider {
        NewProvider {
            name: "Developer".to_string(),
            command: "developer-server".to_string(),
            args: vec!["--stdio".to_string()],
            envs: vec!["LOG_LEVEL=debug".to_string()],
            enabled: true,
        }
    }

    #[test]
    fn test_add_then_list_json() {
        let (manager, _file) = manager();
        handle_providers_add(&manager, developer()).unwrap();

        let output = handle_providers_list(&manager, "json").unwrap();
        let listing: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(listing[0]["name"], "Developer");
        assert_eq!(listing[0]["command"], "developer-server");
        assert_eq!(listing[0]["args"][0], "--stdio");
        assert_eq!(listing[0]["envs"]["LOG_LEVEL"], "debug");
        assert_eq!(listing[0]["enabled"], true);
    }

    #[test]
    fn test_list_text_shows_state() {
        let (manager, _file) = manager();
        assert!(handle_providers_list(&manager, "text")
            .unwrap()
            .contains("No tool providers configured"));

        handle_providers_add(&manager, developer()).unwrap();
        handle_providers_toggle(&manager, "developer", false).unwrap();

        let output = handle_providers_list(&manager, "text").unwrap();
        assert!(output.contains("Developer"));
        assert!(output.contains("disabled"));
        assert!(output.contains("developer-server --stdio"));
        assert!(output.contains("env: LOG_LEVEL"));
    }

    #[test]
    fn test_bad_env_pair_is_rejected() {
        let (manager, _file) = manager();
        let mut provider = developer();
        provider.envs = vec!["NOVALUE".to_string()];

        assert!(handle_providers_add(&manager, provider).is_err());
        assert!(manager.load().unwrap().is_empty());
    }

    #[test]
    fn test_remove_and_toggle_missing() {
        let (manager, _file) = manager();
        handle_providers_add(&manager, developer()).unwrap();

        assert!(handle_providers_remove(&manager, "Developer").is_ok());
        assert!(handle_providers_remove(&manager, "Developer").is_err());
        assert!(handle_providers_toggle(&manager, "Developer", true).is_err());
    }

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("TOKEN=a=b").unwrap(),
            ("TOKEN".to_string(), "a=b".to_string())
        );
        assert!(parse_env("=value").is_err());
    }
}
