use std::time::{Duration, Instant};

use dogpile_cache::CacheClient;
use serde::Serialize;

use super::emit;
use crate::OutputFormat;

const PING_KEY: &str = "dogpile:ping";

#[derive(Serialize)]
struct PingReport {
    ok: bool,
    round_trip_ms: f64,
}

/// Write, read back and delete a throwaway key.
pub async fn run(client: &CacheClient, format: &OutputFormat) -> anyhow::Result<()> {
    let started = Instant::now();
    client
        .set(PING_KEY, b"pong", Some(Duration::from_secs(10)))
        .await?;
    let echoed = client.get(PING_KEY).await?;
    client.delete(PING_KEY).await?;

    let report = PingReport {
        ok: echoed.as_deref() == Some(&b"pong"[..]),
        round_trip_ms: started.elapsed().as_secs_f64() * 1000.0,
    };
    emit(format, &report, |r| {
        if r.ok {
            println!("cache is reachable ({:.1} ms)", r.round_trip_ms);
        } else {
            println!("cache did not echo the test value (degraded?)");
        }
    })?;

    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}
