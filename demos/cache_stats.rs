//! Connects, waits for every guild listed in `READY` to resolve, then prints
//! cache statistics as JSON.
//!
//! ```sh
//! GATEWAY_BOT_TOKEN=... cargo run --example cache_stats
//! ```

use std::time::Duration;

use futures::future::join_all;
use realtime_gateway_sdk::client::{Client, Config};

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = Client::new(Config::from_env()?)?;
    client.connect().await?;

    let cache = client.cache();
    let waits = cache.guild_ids().into_iter().map(|id| cache.wait_guild(id));
    let resolved = tokio::time::timeout(RESOLVE_TIMEOUT, join_all(waits))
        .await
        .unwrap_or_default();

    let names: Vec<String> = resolved.into_iter().flatten().map(|g| g.name.clone()).collect();
    println!("{}", serde_json::to_string_pretty(&names)?);
    println!("{}", serde_json::to_string_pretty(&cache.stats())?);

    client.disconnect().await;
    Ok(())
}
