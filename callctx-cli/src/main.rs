//! callctx CLI Application

use anyhow::{Context, Result};
use callctx_core::testing::ScriptedEngineFactory;
use callctx_core::{CallContext, CallContextConfig, CallLogs};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod simulate;
#[cfg(test)]
mod cli_tests;

use simulate::SimulationOptions;

#[derive(Parser)]
#[command(author, version, about)]
pub(crate) struct Cli {
    /// Account directory holding the `calls` log directory
    #[arg(short, long, env = "CALLCTX_BASE_PATH")]
    pub(crate) base_path: Option<PathBuf>,

    /// JSON call context configuration file
    #[arg(short, long, env = "CALLCTX_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// Always run the legacy engine at its known-good version
    #[arg(long, env = "CALLCTX_FORCE_LEGACY")]
    pub(crate) force_legacy: bool,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List versions advertised during call negotiation
    Versions {
        /// Include reference implementation versions
        #[arg(long)]
        include_reference: bool,

        /// Include experimental versions
        #[arg(long)]
        include_experimental: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the calls-log directory
    Logs {
        #[command(subcommand)]
        command: LogsCommand,
    },

    /// Run a full call against the scripted engine
    Simulate {
        /// Negotiated version
        #[arg(long, default_value = "5.0.0")]
        version: String,

        /// Server call id; enables stats publication on stop
        #[arg(long)]
        call_id: Option<i64>,

        /// Submit the stats log to the account on stop
        #[arg(long)]
        send_debug_logs: bool,

        /// Number of debug info samples to take
        #[arg(long, default_value_t = 3)]
        debug_samples: usize,

        /// Make the engine report a failure mid-call
        #[arg(long)]
        fail: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum LogsCommand {
    /// List call logs, newest first
    List,

    /// Find the log of a call id
    Find {
        /// Server call id
        id: i64,
    },

    /// Enforce the retention limit once
    Cleanup {
        /// Maximum number of files to keep
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("callctx=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.force_legacy)?;
    let base_path = match cli.base_path {
        Some(path) => path,
        None => default_base_path()?,
    };

    match cli.command {
        Commands::Versions {
            include_reference,
            include_experimental,
            json,
        } => handle_versions(&config, include_experimental, include_reference, json),
        Commands::Logs { command } => handle_logs(&base_path, &config, command),
        Commands::Simulate {
            version,
            call_id,
            send_debug_logs,
            debug_samples,
            fail,
        } => {
            let options = SimulationOptions {
                version,
                call_id,
                send_debug_logs,
                debug_samples,
                fail,
            };
            handle_simulate(&base_path, config, options).await
        }
    }
}

/// Read the optional JSON config and apply flag overrides
pub(crate) fn load_config(path: Option<&Path>, force_legacy: bool) -> Result<CallContextConfig> {
    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            CallContextConfig::from_json(&json)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => CallContextConfig::default(),
    };
    if force_legacy {
        config.force_legacy_version = true;
    }
    Ok(config)
}

fn default_base_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "callctx", "callctx")
        .context("Could not determine data directory")?;
    Ok(proj_dirs.data_dir().to_path_buf())
}

fn handle_versions(
    config: &CallContextConfig,
    include_experimental: bool,
    include_reference: bool,
    json: bool,
) -> Result<()> {
    let engines = ScriptedEngineFactory::new();
    let versions = CallContext::versions(&engines, include_experimental, include_reference, config);
    if json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(());
    }

    println!("📞 Supported versions (max layer {})", CallContext::max_layer(&engines));
    for version in versions {
        let media = if version.supports_video { "audio+video" } else { "audio" };
        println!("   {:<10} {}", version.version, media);
    }
    Ok(())
}

fn handle_logs(base_path: &Path, config: &CallContextConfig, command: LogsCommand) -> Result<()> {
    let logs = CallLogs::new(base_path);
    match command {
        LogsCommand::List => {
            let entries = logs.list();
            if entries.is_empty() {
                println!("No call logs in {}", logs.dir().display());
            }
            for entry in entries {
                println!(
                    "{}  {:>8}  {}",
                    entry.modified.format("%Y-%m-%d %H:%M:%S"),
                    entry.size,
                    entry.name
                );
            }
        }
        LogsCommand::Find { id } => match logs.log_name_for_id(id) {
            Some(name) => println!("{}", logs.dir().join(name).display()),
            None => anyhow::bail!("No call log for call {id}"),
        },
        LogsCommand::Cleanup { limit } => {
            let limit = limit.unwrap_or(config.call_logs_limit);
            match logs.cleanup(limit) {
                Some(path) => println!("🧹 Evicted {}", path.display()),
                None => println!("✅ Within limit ({limit})"),
            }
        }
    }
    Ok(())
}

async fn handle_simulate(
    base_path: &Path,
    config: CallContextConfig,
    options: SimulationOptions,
) -> Result<()> {
    println!("📞 Simulating call at version {}", options.version);
    let summary = simulate::run(base_path, config, options).await?;

    println!(
        "   Engine: {} ({})",
        if summary.modern { "modern" } else { "legacy" },
        summary.version
    );
    for state in &summary.states {
        println!("   State: {state:?}");
    }
    if let Some(bars) = summary.reception {
        println!("   Reception: {bars}/4");
    }
    for sample in &summary.debug_info {
        println!("   Debug [{}]: {}", sample.version, sample.info);
    }
    println!("   Signaling sent: {}", summary.signaling_sent);
    if summary.reported_video {
        println!("   Call reported as video");
    }

    match &summary.report {
        Some(report) => {
            println!(
                "✅ Stopped: wifi {}↓/{}↑ bytes, cellular {}↓/{}↑ bytes",
                report.usage.wifi.incoming,
                report.usage.wifi.outgoing,
                report.usage.cellular.incoming,
                report.usage.cellular.outgoing
            );
            if let Some(path) = &report.log_path {
                println!("   Log: {}", path.display());
            }
            if let Some(path) = &report.stats_path {
                println!("   Stats: {}", path.display());
            }
        }
        None => println!("⚠️  Stop did not complete"),
    }
    if let Some(log) = &summary.published_log {
        println!("   Published stats: {log}");
    }
    Ok(())
}
