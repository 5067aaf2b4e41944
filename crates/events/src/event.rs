use chrono::{DateTime, Utc};

/// A domain event.
///
/// Events are immutable facts about a transition that has already been
/// validated. They are owned by the unit of work that produced them and only
/// live long enough to be handed to an [`EventDispatcher`](crate::EventDispatcher).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "product_created").
    fn event_type(&self) -> &'static str;

    /// When the transition happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Canonical string form of the entity the event is about.
    fn aggregate_id(&self) -> String;
}
