//! broadcast-tail entry point.
//!
//! Connects to the configured broadcasting server, consumes the
//! subscriptions listed in `BROADCAST_SUBSCRIPTIONS` and logs every message
//! and connection change until interrupted.

use broadcast_tunnel::config::ClientConfig;
use broadcast_tunnel::domain::{ChannelSubscription, SubscriptionToken};
use broadcast_tunnel::service::BroadcastingManager;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ClientConfig::from_env().map_err(|err| anyhow::anyhow!("{err}"))?;
    tracing::info!(
        server = %config.server_url,
        subscriptions = config.subscriptions.len(),
        "starting broadcast-tail"
    );
    if config.subscriptions.is_empty() {
        tracing::warn!("BROADCAST_SUBSCRIPTIONS is empty, nothing to tail");
    }

    tail(config).await
}

async fn tail(config: ClientConfig) -> anyhow::Result<()> {
    let mut manager = BroadcastingManager::from_config(&config)?;
    let consumer = manager.consumer();

    consumer.on_connection_lost(|| tracing::warn!("connection lost, reconnecting"));
    consumer.on_connection_regained(|| tracing::info!("connection regained"));

    for (channel, token) in &config.subscriptions {
        let subscription =
            ChannelSubscription::new(channel.as_str(), SubscriptionToken::new(token.as_str()));
        consumer.from_subscription(subscription)?.otherwise(|message| {
            tracing::info!(
                channel = %message.channel_name,
                message_type = %message.declared_type,
                payload = %message.payload,
                "message"
            );
        });
    }
    consumer.settle();

    tokio::select! {
        () = manager.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupted, shutting down");
        }
    }

    consumer.release();
    manager.dispose();
    Ok(())
}
