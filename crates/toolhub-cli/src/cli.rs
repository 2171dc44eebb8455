use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use toolhub::config::{Config, ProviderConfigManager};

use crate::commands::info::handle_info;
use crate::commands::providers::{
    handle_providers_add, handle_providers_list, handle_providers_remove, handle_providers_toggle,
    NewProvider,
};
use crate::logging::setup_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum ProvidersCommand {
    #[command(about = "List configured tool providers")]
    List {
        #[arg(
            short,
            long,
            help = "Output format (text, json)",
            default_value = "text"
        )]
        format: String,
    },

    /// Register a provider process
    #[command(about = "Add or replace a tool provider")]
    Add {
        #[arg(help = "Display name for the provider (e.g., 'Developer Tools')")]
        name: String,

        #[arg(
            short,
            long,
            value_name = "COMMAND",
            help = "Executable that starts the provider"
        )]
        command: String,

        #[arg(
            long = "arg",
            value_name = "ARG",
            help = "Argument passed to the command; repeat for several",
            allow_hyphen_values = true
        )]
        args: Vec<String>,

        #[arg(
            long = "env",
            value_name = "KEY=VALUE",
            help = "Environment variable for the provider process; repeat for several"
        )]
        envs: Vec<String>,

        #[arg(long, help = "Store the provider without enabling it")]
        disabled: bool,
    },

    #[command(about = "Remove a tool provider")]
    Remove {
        #[arg(help = "Name of the provider to remove")]
        name: String,
    },

    #[command(about = "Enable a configured tool provider")]
    Enable {
        #[arg(help = "Name of the provider to enable")]
        name: String,
    },

    #[command(about = "Disable a tool provider without removing it")]
    Disable {
        #[arg(help = "Name of the provider to disable")]
        name: String,
    },
}

#[derive(Subcommand)]
enum Command {
    /// Manage the configured tool providers
    #[command(about = "Manage tool providers", visible_alias = "p")]
    Providers {
        #[command(subcommand)]
        command: ProvidersCommand,
    },

    /// Display configuration paths and effective settings
    #[command(about = "Display toolhub information")]
    Info {
        #[arg(short, long, help = "Show verbose information including config.yaml")]
        verbose: bool,
    },
}

pub async fn cli() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging()?;

    let config = Config::global();
    let manager = ProviderConfigManager::new(config.clone());

    match cli.command {
        Some(Command::Providers { command }) => match command {
            ProvidersCommand::List { format } => {
                print!("{}", handle_providers_list(&manager, &format)?);
            }
            ProvidersCommand::Add {
                name,
                command,
                args,
                envs,
                disabled,
            } => {
                let provider = NewProvider {
                    name,
                    command,
                    args,
                    envs,
                    enabled: !disabled,
                };
                println!("{}", handle_providers_add(&manager, provider)?);
            }
            ProvidersCommand::Remove { name } => {
                println!("{}", handle_providers_remove(&manager, &name)?);
            }
            ProvidersCommand::Enable { name } => {
                println!("{}", handle_providers_toggle(&manager, &name, true)?);
            }
            ProvidersCommand::Disable { name } => {
                println!("{}", handle_providers_toggle(&manager, &name, false)?);
            }
        },
        Some(Command::Info { verbose }) => {
            handle_info(config, verbose)?;
        }
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }
    Ok(())
}
