//! Transactional outbox.
//!
//! Domain events are written as rows in the same transaction as the state
//! change they describe ([`OutboxEventDispatcher`]). Nothing is published while
//! the transaction is open; the [`OutboxRelay`] later reads committed pending
//! rows and publishes them to a bus, at least once.

pub mod dispatcher;
pub mod relay;
pub mod serializer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use productsvc_core::EventId;

pub use dispatcher::OutboxEventDispatcher;
pub use relay::{OutboxRelay, RelayError};
pub use serializer::serialize_event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    /// Payload could not be decoded; the relay skips it for good.
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// One serialized event awaiting (or past) delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: EventId,
    pub event_type: String,
    pub aggregate_id: String,
    /// JSON text produced by [`serialize_event`].
    pub payload: String,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    pub fn pending(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            status: DeliveryStatus::Pending,
            created_at,
        }
    }
}
