//! Domain events and the mechanics for handing them on.
//!
//! - [`Event`]: what every domain event exposes (type tag, version, time).
//! - [`EventDispatcher`]: the sink a domain service emits into while a unit of
//!   work is still open.
//! - [`EventEnvelope`] / [`EventBus`]: what the outbox relay publishes after
//!   commit.

pub mod bus;
pub mod dispatcher;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use dispatcher::{DispatchError, EventDispatcher};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
