//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one. A product's price is a value object; the product itself is
/// an [`Entity`](crate::Entity).
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// struct Price(i64);
///
/// impl ValueObject for Price {}
///
/// assert_eq!(Price(300), Price(300));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
