//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. Two `Quantity`
/// values of `2.500` are interchangeable; there is no meaningful identity.
/// To "modify" a value object, construct a new one — which routes every
/// derived value back through the validated constructors.
///
/// The bounds are deliberately small:
/// - **Clone**: values are cheap to copy
/// - **PartialEq**: compared by attribute values
/// - **Debug**: debuggable in logs and test failures
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
