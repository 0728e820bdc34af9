use clap::Args;
use dogpile_cache::CacheClient;
use serde::Serialize;

use super::{display, emit};
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Cache key to read.
    pub key: String,
}

#[derive(Serialize)]
struct GetReport<'a> {
    key: &'a str,
    hit: bool,
    value: Option<String>,
}

pub async fn run(client: &CacheClient, args: &GetArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let value = client.get(&args.key).await?;
    let report = GetReport {
        key: &args.key,
        hit: value.is_some(),
        value: value.map(|v| display(&v)),
    };

    emit(format, &report, |r| match &r.value {
        Some(value) => println!("{value}"),
        None => println!("{}: miss", r.key),
    })
}
