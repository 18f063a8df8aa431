//! modctl: manage modules and feature flags of a modular host
//!
//! One-shot commands build a host from the config (no watcher, no
//! auto-start), perform the operation, and shut the host down again.
//! Modules live only as long as the host, so a one-shot `start` or `restart`
//! checks that the start hooks succeed and the modules are stopped on exit.
//! `run` keeps the host alive until SIGINT/SIGTERM.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use modular_host::flags::permissions::is_allowed;
use modular_host::flags::{Access, FlagEntry};
use modular_host::modules::builtin_modules;
use modular_host::utils::{init_logging, init_logging_from_config, wait_for_shutdown_signal};
use modular_host::{HostConfig, ModuleHost};

/// Manage modules and feature flags
#[derive(Parser, Debug)]
#[command(name = "modctl")]
#[command(about = "Module lifecycle and feature flag control")]
struct Cli {
    /// Host configuration file (.json or .toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered modules
    List,
    /// Show details of one module
    Info { module: String },
    /// Allow a module to be started
    Enable { module: String },
    /// Prevent a module from being started
    Disable { module: String },
    /// Start a module and its dependencies, then stop them on exit
    Start { module: String },
    /// Stop a module
    Stop { module: String },
    /// Stop then start a module, then stop it on exit
    Restart { module: String },
    /// Acknowledge a module in ERROR
    Reset { module: String },
    /// Turn auto-start on or off
    Autostart { module: String, mode: Toggle },
    /// Summary of module states
    Status,
    /// Feature flag operations
    Flags {
        #[command(subcommand)]
        command: FlagCommand,
    },
    /// Run the host until interrupted
    Run,
}

#[derive(Subcommand, Debug)]
enum FlagCommand {
    /// List flags
    List {
        /// Hide values the requester may not read
        #[arg(long = "as")]
        requester: Option<String>,
    },
    /// Read a flag
    Get {
        name: String,
        #[arg(long = "as", default_value = "modctl")]
        requester: String,
    },
    /// Write a flag
    Set {
        name: String,
        value: String,
        #[arg(long = "as", default_value = "modctl")]
        requester: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HostConfig> {
    match path {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(HostConfig::default()),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let long_running = matches!(cli.command, Command::Run);

    match &config.logging {
        Some(logging) => init_logging_from_config(Some(logging)),
        None => init_logging(Some(if long_running { "info" } else { "warn" })),
    }

    let mut builder = ModuleHost::builder(config).with_modules(builtin_modules());
    if !long_running {
        builder = builder.with_watcher(false).with_auto_start(false);
    }
    let host = builder.init().await?;

    let result = execute(&host, cli.command).await;
    let shutdown = host.shutdown().await;
    result.and(shutdown)
}

async fn execute(host: &ModuleHost, command: Command) -> anyhow::Result<()> {
    let manager = host.manager();
    match command {
        Command::List => {
            println!(
                "{:<20} {:<10} {:<8} {:<10} {}",
                "MODULE", "STATE", "ENABLED", "AUTOSTART", "VERSION"
            );
            for info in manager.list().await {
                println!(
                    "{:<20} {:<10} {:<8} {:<10} {}",
                    info.name,
                    info.state.to_string(),
                    info.enabled,
                    info.auto_start,
                    info.version
                );
            }
        }
        Command::Info { module } => {
            let info = manager.info(&module).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Enable { module } => {
            manager.set_enabled(&module, true).await?;
            println!("Module {} enabled", module);
        }
        Command::Disable { module } => {
            manager.set_enabled(&module, false).await?;
            println!("Module {} disabled", module);
        }
        Command::Start { module } => {
            manager.start(&module).await?;
            println!(
                "Module {} started; stopping it on exit (use `modctl run` to keep modules running)",
                module
            );
        }
        Command::Stop { module } => {
            manager.stop(&module).await?;
            println!("Module {} stopped", module);
        }
        Command::Restart { module } => {
            manager.restart(&module).await?;
            println!(
                "Module {} restarted; stopping it on exit (use `modctl run` to keep modules running)",
                module
            );
        }
        Command::Reset { module } => {
            manager.reset(&module).await?;
            println!("Module {} reset", module);
        }
        Command::Autostart { module, mode } => {
            let on = matches!(mode, Toggle::On);
            manager.set_auto_start(&module, on).await?;
            println!(
                "Module {} auto-start {}",
                module,
                if on { "on" } else { "off" }
            );
        }
        Command::Status => {
            let status = manager.status().await;
            println!("Modules: {} total", status.total);
            println!(
                "  active: {}  inactive: {}  error: {}  starting: {}  stopping: {}",
                status.active, status.inactive, status.error, status.starting, status.stopping
            );
            println!(
                "  enabled: {}  auto-start: {}",
                status.enabled, status.auto_start
            );
            println!(
                "Flags: {} (version {})",
                status.flags, status.flags_version
            );
        }
        Command::Flags { command } => flag_command(host, command).await?,
        Command::Run => {
            println!("Host running, press Ctrl+C to stop");
            let signal = wait_for_shutdown_signal()
                .await
                .context("failed to install shutdown signal handlers")?;
            println!("Received {}, stopping modules", signal);
        }
    }
    Ok(())
}

async fn flag_command(host: &ModuleHost, command: FlagCommand) -> anyhow::Result<()> {
    let store = host.flags();
    match command {
        FlagCommand::List { requester } => {
            println!(
                "{:<28} {:<24} {:<16} {:<14} {:<12} {}",
                "FLAG", "TYPE", "VALUE", "OWNER", "PERMISSION", "MODIFIED BY"
            );
            for entry in store.list().await {
                println!(
                    "{:<28} {:<24} {:<16} {:<14} {:<12} {}",
                    entry.flag.name,
                    entry.flag.value_type.to_string(),
                    visible_value(&entry, requester.as_deref()),
                    entry.owner,
                    entry.permission.to_string(),
                    entry.last_modified_by
                );
            }
        }
        FlagCommand::Get { name, requester } => {
            let value = store.get_value(&name, &requester).await?;
            println!("{}", value);
        }
        FlagCommand::Set {
            name,
            value,
            requester,
        } => {
            let value_type = store
                .snapshot()
                .await
                .get(&name)
                .map(|e| e.flag.value_type.clone())
                .ok_or_else(|| anyhow!("Flag not found: {}", name))?;
            let parsed = value_type
                .parse_value(&value)
                .ok_or_else(|| anyhow!("{:?} is not a valid {} value", value, value_type))?;
            let change = store.set_value(&name, parsed, &requester).await?;
            println!(
                "{}: {} -> {}",
                change.name, change.old_value, change.new_value
            );
        }
    }
    Ok(())
}

fn visible_value(entry: &FlagEntry, requester: Option<&str>) -> String {
    match requester {
        Some(requester)
            if !is_allowed(entry.permission, &entry.owner, requester, Access::Read) =>
        {
            "<hidden>".to_string()
        }
        _ => entry.value.to_string(),
    }
}
