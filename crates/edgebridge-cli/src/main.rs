//! Command-line interface for the edgebridge device bridge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgebridge_core::config::{env_vars, DEFAULT_RELAY_ID};
use edgebridge_core::{AliasTemplate, BridgeConfig};
use edgebridge_devices::{DeviceMapper, MappingRegistry, Operation, Resolution};
use serde_json::json;

#[cfg(feature = "simulator")]
mod simulate;

/// edgebridge - mirror local bus devices onto an Edge endpoint.
#[derive(Parser, Debug)]
#[command(name = "edgebridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Bridge configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List the capability mappings the bridge knows.
    Mappings {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the Edge binding a device with the given capabilities gets.
    Resolve {
        /// Bus device id.
        device_id: String,
        /// Capabilities the device advertises, e.g. Facades/Dimmable.
        #[arg(required = true)]
        capabilities: Vec<String>,
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file.
    CheckConfig {
        /// Path to the configuration file.
        path: PathBuf,
    },
    /// Run the bridge against simulated devices and print the device map.
    #[cfg(feature = "simulator")]
    Simulate {
        /// Number of simulated lamps.
        #[arg(long, default_value_t = 2)]
        lamps: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Mappings { json } => {
            let config = load_config(args.config.as_deref())?;
            list_mappings(&config, json)
        }
        Command::Resolve {
            device_id,
            capabilities,
            json,
        } => {
            let config = load_config(args.config.as_deref())?;
            resolve(&config, &device_id, &capabilities, json)
        }
        Command::CheckConfig { path } => check_config(&path),
        #[cfg(feature = "simulator")]
        Command::Simulate { lamps } => {
            let config = load_config(args.config.as_deref())?;
            simulate::simulate(config, lamps).await
        }
    }
}

fn init_logging(verbose: bool) {
    // Check if JSON logging is requested (for production/container environments)
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "edgebridge=debug" } else { "edgebridge=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let mut config = BridgeConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

fn load_mappings(config: &BridgeConfig) -> Result<MappingRegistry> {
    let mut registry = MappingRegistry::builtin();
    if let Some(path) = &config.mapping_rules {
        registry
            .extend_from_json_file(path)
            .with_context(|| format!("Failed to load mapping rules from {}", path.display()))?;
    }
    Ok(registry)
}

fn list_mappings(config: &BridgeConfig, as_json: bool) -> Result<()> {
    let registry = load_mappings(config)?;
    let rows: Vec<_> = registry
        .capabilities()
        .into_iter()
        .filter_map(|name| registry.lookup(name))
        .collect();

    if as_json {
        let out: Vec<_> = rows
            .iter()
            .map(|m| {
                json!({
                    "capability": m.capability,
                    "state": m.state,
                    "event": m.event,
                    "paths": m.path_count(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for mapping in &rows {
        let name = mapping
            .state
            .as_deref()
            .or(mapping.event.as_deref())
            .unwrap_or("-");
        println!("{:<48} {:<28} {} paths", mapping.capability, name, mapping.path_count());
    }
    println!("{} capabilities", rows.len());
    Ok(())
}

fn resolve(config: &BridgeConfig, device_id: &str, capabilities: &[String], as_json: bool) -> Result<()> {
    let registry = Arc::new(load_mappings(config)?);
    let mapper = DeviceMapper::from_config(registry, config);

    let binding = match mapper.resolve(device_id, capabilities)? {
        Resolution::Bound(binding) => binding,
        Resolution::NothingToBridge => {
            println!("{}: nothing to bridge", device_id);
            return Ok(());
        }
    };

    for issue in binding.issues() {
        eprintln!("warning: {}", issue);
    }

    if as_json {
        let out = json!({
            "device_id": binding.device_id(),
            "edge_alias": binding.edge_alias(),
            "capabilities": binding.capabilities(),
            "resources": binding.resources(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Edge alias: {}", binding.edge_alias());
    for resource in binding.resources() {
        let ops: Vec<&str> = resource.operations.iter().map(Operation::as_str).collect();
        println!("  {:<16} {:<14} {}", resource.path, ops.join(","), resource.value);
    }
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = BridgeConfig::load(path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;
    let template = AliasTemplate::parse(config.endpoint_template.clone())
        .context("Invalid endpoint_template")?;
    let mappings = load_mappings(&config)?;

    println!("Configuration OK: {}", path.display());
    println!("  relay_id:     {}", config.relay_id);
    println!("  example alias: {}", template.render(&config.relay_id, "device-id"));
    println!("  ignored ids:  {}", config.ignored_ids().len());
    println!("  whitelisted:  {}", config.whitelisted_ids().len());
    println!("  mappings:     {}", mappings.len());
    if config.relay_id == DEFAULT_RELAY_ID {
        println!("  note: relay_id is still {}", DEFAULT_RELAY_ID);
    }
    Ok(())
}
