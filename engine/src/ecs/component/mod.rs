//! Component types and their runtime registration.
//!
//! Components are plain value records attached to entities. Each distinct
//! component type observed at runtime is interned into a [`TypeRegistry`],
//! which hands out the small integer [`TypeId`] the storage layer keys its
//! columns by. A [`Signature`] is a canonical set of those ids and acts as the
//! identity of an archetype.

mod registry;
mod signature;

pub use registry::{TypeId, TypeInfo, TypeRegistry};
pub use signature::{IntoSignature, Signature};

/// A trait representing a component in the ECS.
///
/// Components must be `Default` because entities created directly into an
/// archetype start with every column default-initialized, and the set
/// listeners observe `C::default()` as the old value when a set migrates an
/// entity into a column it did not previously have.
pub trait Component: 'static + Sized + Default {}
