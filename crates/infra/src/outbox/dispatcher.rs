use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use productsvc_events::{DispatchError, Event, EventDispatcher};
use productsvc_products::ProductEvent;

use crate::store::OutboxWriter;

use super::OutboxRecord;
use super::serializer::serialize_event;

/// [`EventDispatcher`] that records each event as a pending outbox row in the
/// writer's transaction.
#[derive(Debug, Clone)]
pub struct OutboxEventDispatcher<W> {
    writer: W,
}

impl<W> OutboxEventDispatcher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W> EventDispatcher<ProductEvent> for OutboxEventDispatcher<W>
where
    W: OutboxWriter,
{
    async fn dispatch(&self, event: ProductEvent) -> Result<(), DispatchError> {
        let payload = serialize_event(&event)?;
        let record =
            OutboxRecord::pending(event.event_type(), event.aggregate_id(), payload, Utc::now());
        let id = record.id;

        self.writer
            .append(record)
            .await
            .map_err(|e| DispatchError::Append(e.to_string()))?;

        debug!(event_id = %id, event_type = event.event_type(), "event appended to outbox");
        Ok(())
    }
}
