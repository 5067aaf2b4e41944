//! Outbox relay: committed outbox rows → event bus.
//!
//! One pass reads pending rows in creation order, publishes each as an
//! [`EventEnvelope`], and marks the published ones delivered. A publish failure
//! ends the pass; the failed row and everything after it stay pending for the
//! next pass. A row whose payload is not JSON can never be published and is
//! marked failed instead, so it does not hold up the rows behind it.
//! There is no retry or backoff here: a crash between publish and
//! `mark_delivered` re-publishes on the next pass, which is why delivery is
//! at-least-once.

use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use productsvc_events::{EventBus, EventEnvelope};

use crate::store::{OutboxSource, StoreError};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("publish failed after {delivered} deliveries: {reason}")]
    Publish { delivered: usize, reason: String },
}

#[derive(Debug, Clone)]
pub struct OutboxRelay<S, B> {
    source: S,
    bus: B,
}

impl<S, B> OutboxRelay<S, B>
where
    S: OutboxSource,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(source: S, bus: B) -> Self {
        Self { source, bus }
    }

    /// Run one relay pass over at most `limit` pending rows. Returns how many
    /// were delivered.
    #[instrument(skip(self), err)]
    pub async fn relay_pending(&self, limit: usize) -> Result<usize, RelayError> {
        let pending = self.source.pending(limit).await?;
        let mut delivered = Vec::with_capacity(pending.len());
        let mut undeliverable = Vec::new();
        let mut failure = None;

        for record in pending {
            let payload: JsonValue = match serde_json::from_str(&record.payload) {
                Ok(v) => v,
                Err(e) => {
                    error!(event_id = %record.id, error = %e, "outbox payload is not valid JSON");
                    undeliverable.push(record.id);
                    continue;
                }
            };
            let envelope = EventEnvelope::new(
                *record.id.as_uuid(),
                record.event_type,
                record.aggregate_id,
                record.created_at,
                payload,
            );

            if let Err(e) = self.bus.publish(envelope) {
                failure = Some(RelayError::Publish {
                    delivered: delivered.len(),
                    reason: format!("{e:?}"),
                });
                break;
            }
            delivered.push(record.id);
        }

        if !delivered.is_empty() {
            self.source.mark_delivered(&delivered).await?;
            debug!(count = delivered.len(), "outbox records delivered");
        }
        if !undeliverable.is_empty() {
            self.source.mark_failed(&undeliverable).await?;
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(delivered.len()),
        }
    }
}

/// Handle to stop a spawned relay loop.
#[derive(Debug)]
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RelayHandle {
    /// Request shutdown and wait for the loop to finish its current pass.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "outbox relay task ended abnormally");
        }
    }
}

impl<S, B> OutboxRelay<S, B>
where
    S: OutboxSource + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    /// Spawn a loop running one pass every `interval`.
    ///
    /// A zero `interval` is clamped to one millisecond.
    pub fn spawn(self, interval: Duration, batch: usize) -> RelayHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.relay_pending(batch).await {
                            warn!(error = %err, "outbox relay pass failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        RelayHandle { shutdown, join }
    }
}
