pub mod archetype;
pub mod component;
pub mod entity;
pub mod error;
pub mod query;
pub(crate) mod storage;
pub(crate) mod util;
pub mod world;

pub(crate) mod command;

pub use archetype::Archetype;
pub use component::{Component, IntoSignature, Signature, TypeId, TypeRegistry};
pub use entity::Entity;
pub use error::{Error, Result};
pub use query::Query;
pub use world::{
    Deferred, Id as WorldId, RemoveListener, RemoveShape, SetListener, SetShape, World,
};

/// Re-export of the `#[derive(Component)]` macro.
pub use colonnade_macros::Component;
