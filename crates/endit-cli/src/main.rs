//! # endit CLI
//!
//! Drives single flush, stage and remove requests against an agent
//! directory tree. Handy for testing an agent installation by hand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use endit_config::{init_logging, Config, LogLevel};
use endit_provider::remove::write_removal;
use endit_provider::{
    Engine, FileId, FlushRequest, Locator, NotifySource, Outcome, StageRequest, StorageInfo,
    TaskFuture,
};
use tracing::{info, warn};

/// Endit nearline storage provider
#[derive(Parser)]
#[command(name = "endit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, layered over ~/.endit/config.toml
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a pool file to tape and print its locator
    Flush {
        /// Pool file identifier
        #[arg(long)]
        id: FileId,
        /// Storage attribute handed to the agent, repeatable
        #[arg(long = "attr", value_name = "KEY=VALUE", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
        /// Namespace path of the file
        #[arg(long)]
        path: Option<String>,
    },
    /// Bring a file back from tape into the pool
    Stage {
        /// Pool file identifier
        #[arg(long)]
        id: FileId,
        /// Expected size in bytes
        #[arg(long)]
        size: u64,
        /// Where the staged replica goes
        #[arg(long, value_name = "POOL PATH")]
        target: PathBuf,
    },
    /// Ask the agent to purge tape copies
    Remove {
        #[arg(value_name = "LOCATOR", required = true)]
        locators: Vec<Locator>,
    },
    /// Print the effective configuration
    Config,
}

fn parse_attr(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(config.logging.level);

    match cli.command {
        Commands::Flush { id, attrs, path } => {
            let mut storage_info = StorageInfo::new();
            for (key, value) in attrs {
                storage_info.insert(key, value);
            }
            let request = FlushRequest {
                id,
                storage_info,
                path,
            };
            let outcome = run(&config, |engine| engine.submit_flush(request)).await?;
            if let Some(locator) = outcome.locator() {
                println!("{locator}");
            }
        }
        Commands::Stage { id, size, target } => {
            let request = StageRequest {
                id,
                size,
                replica: target.clone(),
            };
            run(&config, |engine| engine.submit_stage(request)).await?;
            println!("{}", target.display());
        }
        Commands::Remove { locators } => {
            let trash = config.directories.resolve().trash;
            for locator in &locators {
                let file = write_removal(&trash, locator)
                    .with_context(|| format!("Failed to request removal of {locator}"))?;
                println!("{}", file.display());
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml().context("Failed to render config")?);
        }
    }

    Ok(())
}

/// Start an engine, submit one task and wait for it. Ctrl-C cancels.
async fn run(config: &Config, submit: impl FnOnce(&Engine) -> TaskFuture) -> Result<Outcome> {
    let engine = Engine::start(config, NotifySource::new()).context("Failed to start engine")?;
    let future = submit(&engine);
    info!(id = %future.id(), kind = %future.kind(), "Waiting for agent");

    let result = tokio::select! {
        result = future.wait() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, cancelling");
            if !future.cancel() {
                warn!(id = %future.id(), "Nothing to withdraw yet, shutting down");
            }
            // resolves whatever is still pending
            engine.shutdown().await;
            future.wait().await
        }
    };

    engine.shutdown().await;
    result.with_context(|| format!("{} {} did not complete", future.kind(), future.id()))
}
