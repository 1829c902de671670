//! Review event consumer: logs every notification published on the event channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::Context;

use prodreview_events::EventBus;
use prodreview_infra::ServiceConfig;
use prodreview_infra::event_bus::RedisPubSubEventBus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prodreview_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let redis_url = config
        .redis_url
        .context("REDIS_URL must be set to consume review events")?;

    let bus = RedisPubSubEventBus::new(&redis_url, config.event_channel.clone())?;
    let subscription = bus.subscribe();
    tracing::info!(channel = %config.event_channel, "consuming review events");

    let running = Arc::new(AtomicBool::new(true));
    let mut worker = {
        let running = running.clone();
        tokio::task::spawn_blocking(move || {
            while running.load(Ordering::Relaxed) {
                match subscription.recv_timeout(Duration::from_millis(500)) {
                    Ok(message) => tracing::info!(%message, "review event received"),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return Err(anyhow::anyhow!("event subscription closed")),
                }
            }
            Ok(())
        })
    };

    tokio::select! {
        _ = prodreview_api::shutdown::signal() => {
            running.store(false, Ordering::Relaxed);
            (&mut worker).await.context("consumer worker panicked")??;
        }
        result = &mut worker => {
            result.context("consumer worker panicked")??;
        }
    }

    tracing::info!("consumer stopped");
    Ok(())
}
