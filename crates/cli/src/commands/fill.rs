use std::time::Duration;

use clap::Args;
use dogpile_cache::{CacheClient, Lookup};
use serde::Serialize;

use super::{display, emit};
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct FillArgs {
    /// Cache key to fill.
    pub key: String,
    /// Value to store if the key is empty.
    pub value: String,
    /// Expiry for the stored value, in seconds.
    #[arg(long)]
    pub ttl: Option<u64>,
}

#[derive(Serialize)]
struct FillReport<'a> {
    key: &'a str,
    outcome: &'static str,
    value: Option<String>,
}

/// Store a value the way an application would: take the lock, store, then
/// release. If someone else filled the key first, their value is reported.
pub async fn run(client: &CacheClient, args: &FillArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let ttl = args.ttl.map(Duration::from_secs);

    let (outcome, value) = match client.get_or_lock(&args.key).await? {
        Lookup::Hit(existing) => ("cached", Some(display(&existing))),
        Lookup::Acquired(guard) => {
            let stored = client.set(&args.key, args.value.as_bytes(), ttl).await;
            guard.release().await?;
            stored?;
            ("stored", Some(args.value.clone()))
        }
        Lookup::Miss | Lookup::Degraded => ("unavailable", None),
    };
    tracing::debug!(key = %args.key, outcome, "fill finished");

    let report = FillReport {
        key: &args.key,
        outcome,
        value,
    };
    emit(format, &report, |r| match (r.outcome, &r.value) {
        ("stored", _) => println!("{}: stored", r.key),
        ("cached", Some(value)) => println!("{}: already cached: {value}", r.key),
        _ => println!("{}: cache unavailable, nothing stored", r.key),
    })
}
