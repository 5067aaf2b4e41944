//! Domain-facing event sink.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Event;

/// Failure to hand an event on.
///
/// Both variants are infrastructure failures: the surrounding unit of work must
/// roll back so that no state change survives without its event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("event serialization failed: {0}")]
    Serialize(String),

    #[error("event append failed: {0}")]
    Append(String),
}

/// Receives each event produced by a successful mutation.
///
/// Called once per mutation, from inside the still-open transaction.
/// Implementations must not publish to an external channel synchronously; they
/// record the event so that it commits (or rolls back) with the state change.
#[async_trait]
pub trait EventDispatcher<E: Event>: Send + Sync {
    async fn dispatch(&self, event: E) -> Result<(), DispatchError>;
}

#[async_trait]
impl<E, D> EventDispatcher<E> for std::sync::Arc<D>
where
    E: Event,
    D: EventDispatcher<E> + ?Sized,
{
    async fn dispatch(&self, event: E) -> Result<(), DispatchError> {
        (**self).dispatch(event).await
    }
}
