//! Replies `pong` to every `!ping` and logs guild availability.
//!
//! Run with tracing enabled:
//! ```sh
//! GATEWAY_BOT_TOKEN=... RUST_LOG=info,hyper_util=off,hyper=off,reqwest=off,rustls=off cargo run --example echo_bot --features tracing
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt as _;
use realtime_gateway_sdk::cache::Cache;
use realtime_gateway_sdk::client::{Client, Config};
use realtime_gateway_sdk::event::{Event, Interest, Listener};
use realtime_gateway_sdk::gateway::payload::{Activity, OnlineStatus};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

struct GuildLog;

#[async_trait]
impl Listener for GuildLog {
    fn interest(&self) -> Interest {
        Interest::GUILD | Interest::SESSION
    }

    async fn on_event(&self, event: Arc<Event>, cache: Arc<Cache>) {
        match event.as_ref() {
            Event::Ready { user, guilds, .. } => {
                info!(user = %user.tag(), guilds = guilds.len(), "Ready");
            }
            Event::GuildAvailable(guild) | Event::GuildJoin(guild) => {
                info!(
                    guild = %guild.name,
                    channels = guild.channels.len(),
                    pending = cache.stats().pending_guilds,
                    "Guild available"
                );
            }
            Event::GuildUnavailable { id } => warn!(%id, "Guild outage"),
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client = Client::new(Config::from_env()?)?;
    client.add_listener(GuildLog);
    client.connect().await?;
    client.update_status(OnlineStatus::Online, Some(Activity::playing("!ping")))?;

    let mut errors = client.errors();
    let mut events = Box::pin(client.events());

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Missed events");
                        continue;
                    }
                };

                if let Event::MessageCreate(message) = event.as_ref()
                    && message.content.trim() == "!ping"
                    && let Err(e) = client.send_message(message.channel_id, "pong").await
                {
                    error!(error = %e, "Reply failed");
                }
            }
            changed = errors.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(e) = errors.borrow_and_update().as_ref() {
                    error!(error = %e, "Session ended");
                    break;
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
