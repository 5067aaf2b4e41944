use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;

use productsvc_events::{EventBus, EventEnvelope, InMemoryEventBus};
use productsvc_infra::config::ServiceConfig;

use productsvc_api::app::{self, services::AppServices};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    productsvc_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(AppServices::from_config(&config).await?);

    // No broker is wired in; delivered events are logged so the outbox drains.
    let bus: Arc<InMemoryEventBus<EventEnvelope<Value>>> = Arc::new(InMemoryEventBus::new());
    let subscription = bus.subscribe();
    std::thread::spawn(move || {
        while let Ok(envelope) = subscription.recv() {
            tracing::info!(
                event_id = %envelope.event_id(),
                event_type = envelope.event_type(),
                aggregate_id = envelope.aggregate_id(),
                "event delivered"
            );
        }
    });
    let relay = services.spawn_relay(bus, config.relay_interval, config.relay_batch);

    let router = app::build_app(services);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    relay.shutdown().await;
    Ok(())
}
