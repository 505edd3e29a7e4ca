//! Colonnade is an archetype-based entity component system (ECS).
//!
//! Entities are opaque handles that aggregate plain-value components. Entities
//! carrying the same set of component types share an archetype whose storage is
//! columnar, so queries iterate cache-coherent arrays rather than chasing
//! per-entity allocations.

// Allow the derive macros to refer to `::colonnade::...` from inside this crate.
extern crate self as colonnade;

pub mod ecs;

pub use ecs::{
    Archetype, Component, Entity, Error, Query, RemoveListener, Result, SetListener, World,
};
