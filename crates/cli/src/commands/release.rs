use clap::Args;
use dogpile_cache::CacheClient;

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    /// Cache key whose lock should be cleared.
    pub key: String,
}

/// Clear a stuck lock and wake its waiters. Stored values are left alone.
pub async fn run(client: &CacheClient, args: &ReleaseArgs) -> anyhow::Result<()> {
    client.release(&args.key).await?;
    println!("{}: released", args.key);
    Ok(())
}
