//! dogpile CLI
//!
//! Inspect, fill and unlock keys of a dogpile cache from the command line.

mod commands;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dogpile_cache::CacheClient;
use dogpile_cache_redis::RedisProvisioner;
use tracing_subscriber::{EnvFilter, fmt};

use crate::settings::Settings;

/// dogpile CLI: work with a stampede-safe Redis cache.
#[derive(Parser, Debug)]
#[command(name = "dogpile", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        long,
        short,
        env = "DOGPILE_CONFIG",
        default_value = "dogpile.toml",
        global = true
    )]
    config: PathBuf,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a key.
    Get(commands::get::GetArgs),
    /// Store a value under the lock unless the key is already filled.
    Fill(commands::fill::FillArgs),
    /// Clear a key's lock and wake its waiters.
    Release(commands::release::ReleaseArgs),
    /// Check that the cache is reachable.
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    let provisioner = RedisProvisioner::new(settings.pool.clone());
    let client = CacheClient::from_config(&settings.cache, Arc::new(provisioner))?;

    match cli.command {
        Command::Get(args) => commands::get::run(&client, &args, &cli.format).await,
        Command::Fill(args) => commands::fill::run(&client, &args, &cli.format).await,
        Command::Release(args) => commands::release::run(&client, &args).await,
        Command::Ping => commands::ping::run(&client, &cli.format).await,
    }
}
