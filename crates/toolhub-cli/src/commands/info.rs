use anyhow::Result;
use console::style;
use std::fmt::Write;

use toolhub::config::{Config, ProviderConfigManager, ProviderConfigStore};
use toolhub::registry::RegistrySettings;
use toolhub::session::storage::session_dir;
use toolhub::session::SessionDefaults;

use crate::logging::log_dir;

fn row(output: &mut String, label: &str, value: impl std::fmt::Display) -> std::fmt::Result {
    writeln!(output, "  {:<24} {}", label, value)
}

/// Render paths and the settings a session would start with
pub fn render_info(config: &Config, verbose: bool) -> Result<String> {
    let mut output = String::new();

    writeln!(output, "{}", style("toolhub").cyan().bold())?;
    row(&mut output, "Version:", env!("CARGO_PKG_VERSION"))?;

    writeln!(output, "\n{}", style("Locations").bold())?;
    row(&mut output, "Config file:", config.path().display())?;
    row(&mut output, "Sessions:", session_dir()?.display())?;
    row(&mut output, "Logs:", log_dir()?.display())?;

    let registry = RegistrySettings::from_config(config);
    let defaults = SessionDefaults::from_config(config);
    let providers = ProviderConfigManager::new(config.clone()).load()?;
    let enabled = providers.values().filter(|p| p.enabled).count();

    writeln!(output, "\n{}", style("Settings").bold())?;
    row(
        &mut output,
        "Providers:",
        format!("{} configured, {} enabled", providers.len(), enabled),
    )?;
    row(
        &mut output,
        "Connect timeout:",
        registry
            .connect_timeout
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "none".to_string()),
    )?;
    row(&mut output, "Ungrouped label:", &registry.ungrouped_label)?;
    row(&mut output, "Temperature:", defaults.temperature)?;
    row(&mut output, "Max response tokens:", defaults.max_response_tokens)?;
    row(&mut output, "Instructions:", &defaults.instructions)?;

    if verbose {
        writeln!(output, "\n{}", style("config.yaml").bold())?;
        if config.exists() {
            let values = config.load_values()?;
            writeln!(output, "{}", serde_json::to_string_pretty(&values)?)?;
        } else {
            writeln!(output, "  (file not found)")?;
        }
    }

    Ok(output)
}

pub fn handle_info(config: &Config, verbose: bool) -> Result<()> {
    print!("{}", render_info(config, verbose)?);
    Ok(())
}
