//! The World: the top-level container of the ECS.
//!
//! A `World` owns the entity directory, the archetype directory with its
//! columnar tables, the per-component-type state (world data, listeners,
//! pending deferred values), and the deferred command queue. All operations
//! take the world explicitly; [`Entity`] and [`Archetype`] handles are plain
//! `(world, index, version)` values that the world validates on every use,
//! so a stale or foreign handle is inert rather than dangerous.
//!
//! # Example
//!
//! ```ignore
//! use colonnade::ecs::World;
//! use colonnade_macros::Component;
//!
//! #[derive(Component, Default)]
//! struct Position { x: f32, y: f32 }
//!
//! let mut world = World::new("main");
//! let archetype = world.archetype::<Position>();
//! let entity = world.create_entity(archetype);
//! world.set(entity, Position { x: 1.0, y: 2.0 });
//! ```

mod pool;
mod state;
mod structural;

use std::{marker::PhantomData, sync::Arc};

use log::debug;

pub use state::{RemoveListener, RemoveShape, SetListener, SetShape};
pub use structural::Deferred;

use crate::ecs::{
    archetype::{Archetype, ArchetypeDirectory},
    command::CommandQueue,
    component::{Component, IntoSignature, Signature, TypeRegistry},
    entity::{Entity, EntityDirectory, NO_ARCHETYPE},
    error::{Error, Result},
    world::state::PerTypeStates,
};

/// A world identifier, allocated from the process-level id pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    /// Create an id from a raw value.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Id(id)
    }

    /// Get the raw id value.
    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

/// The central container for entities, components, and archetypes.
///
/// Worlds are single-threaded: all operations assume exclusive access, and
/// the type is `!Send` so it stays on the thread that created it. The only
/// cross-world state is the id pool consulted at creation and destruction.
pub struct World {
    /// This world's id.
    id: Id,

    /// A debug name, carried in log events.
    name: String,

    /// The component type registry. Shareable between worlds via `Arc` so
    /// their type ids agree.
    registry: Arc<TypeRegistry>,

    /// The entity record directory.
    pub(crate) entities: EntityDirectory,

    /// The archetype slot directory.
    pub(crate) archetypes: ArchetypeDirectory,

    /// Per-component-type state: world data, listeners, pending set values.
    pub(crate) per_type: PerTypeStates,

    /// Deferred structural commands.
    pub(crate) commands: CommandQueue,

    /// Reusable scratch signature for hot structural paths.
    scratch: Signature,

    /// Reference count of active deferral regions.
    pub(crate) deferral_depth: u32,

    /// Number of entities attached to archetypes.
    pub(crate) entity_count: usize,

    /// Bumped on every archetype creation, destruction, and slot reuse.
    /// Queries key their match caches on it.
    pub(crate) structure_counter: u64,

    /// Deferred creates dropped because their target archetype died before
    /// the drain.
    pub(crate) dropped_creates: u64,

    /// Worlds stay on the thread that created them.
    _not_send: PhantomData<*mut ()>,
}

impl World {
    /// Create a world with its own fresh type registry.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_registry(name, Arc::new(TypeRegistry::new()))
    }

    /// Create a world sharing an existing type registry, so its component
    /// ids agree with other worlds built from the same registry.
    pub fn with_registry(name: impl Into<String>, registry: Arc<TypeRegistry>) -> Self {
        let id = pool::acquire();
        let name = name.into();
        debug!("created world '{name}' (id {})", id.raw());
        Self {
            id,
            name,
            registry,
            entities: EntityDirectory::new(),
            archetypes: ArchetypeDirectory::new(),
            per_type: PerTypeStates::new(),
            commands: CommandQueue::new(),
            scratch: Signature::new(),
            deferral_depth: 0,
            entity_count: 0,
            structure_counter: 0,
            dropped_creates: 0,
            _not_send: PhantomData,
        }
    }

    /// Whether a world with this id currently exists anywhere in the process.
    pub fn is_alive(id: Id) -> bool {
        pool::is_alive(id)
    }

    /// Destroy this world, draining every archetype.
    ///
    /// Equivalent to dropping it: entities are version-bumped, remove
    /// listeners fire per column in row order, and the world id returns to
    /// the pool.
    pub fn destroy(self) {}

    /// This world's id.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// This world's debug name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The component type registry.
    #[inline]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// The number of entities currently attached to archetypes.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    /// The structure counter: strictly increases on every archetype
    /// creation, destruction, and free-slot reuse.
    #[inline]
    pub fn structure_counter(&self) -> u64 {
        self.structure_counter
    }

    /// How many deferred creates were dropped because their target archetype
    /// was destroyed before the drain.
    #[inline]
    pub fn dropped_create_count(&self) -> u64 {
        self.dropped_creates
    }

    /// Get the archetype for a component type set, creating it on first use.
    ///
    /// ```ignore
    /// let archetype = world.archetype::<(Position, Velocity)>();
    /// ```
    pub fn archetype<S: IntoSignature>(&mut self) -> Archetype {
        self.scratch.clear();
        S::write_signature(&self.registry, &mut self.scratch);
        let slot = {
            let Self {
                archetypes,
                scratch,
                registry,
                structure_counter,
                ..
            } = self;
            archetypes.get_or_create(scratch, registry, structure_counter)
        };
        self.archetype_handle(slot)
    }

    /// Whether an entity handle currently resolves in this world.
    pub fn is_valid(&self, entity: Entity) -> bool {
        entity.world() == self.id
            && entity.index() < self.entities.len()
            && self.entities.record(entity.index()).version == entity.version()
    }

    /// Whether the entity currently has component `C`.
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        if !self.is_valid(entity) {
            return false;
        }
        let id = self.registry.id_of::<C>();
        let record = self.entities.record(entity.index());
        if record.archetype == NO_ARCHETYPE {
            return false;
        }
        self.archetypes
            .table(record.archetype)
            .is_some_and(|table| table.has_column(id))
    }

    /// Get a mutable reference to the entity's `C` component.
    ///
    /// # Errors
    /// - [`Error::InvalidHandle`] if the handle does not resolve here
    /// - [`Error::MissingComponent`] if the entity's archetype lacks `C`
    pub fn get<C: Component>(&mut self, entity: Entity) -> Result<&mut C> {
        if !self.is_valid(entity) {
            return Err(Error::InvalidHandle);
        }
        let id = self.registry.id_of::<C>();
        let record = *self.entities.record(entity.index());
        let missing = Error::MissingComponent {
            type_name: std::any::type_name::<C>(),
        };
        if record.archetype == NO_ARCHETYPE {
            return Err(missing);
        }
        let Some(table) = self.archetypes.table_mut(record.archetype) else {
            return Err(Error::FrameworkInvariant(
                "entity record points at an empty archetype slot",
            ));
        };
        let Some(position) = table.column_position(id) else {
            if table.signature().contains(id) {
                return Err(Error::FrameworkInvariant(
                    "column index lost a signature type",
                ));
            }
            return Err(missing);
        };
        // SAFETY: the record's row is initialized and the column's type
        // check guards the downcast.
        Ok(unsafe { table.column_mut(position).get_mut::<C>(record.row as usize) })
    }

    /// Get a reference to the entity's `C` component, or `None` if the
    /// handle is invalid or the component is missing.
    pub fn try_get<C: Component>(&self, entity: Entity) -> Option<&C> {
        if !self.is_valid(entity) {
            return None;
        }
        let id = self.registry.id_of::<C>();
        let record = self.entities.record(entity.index());
        if record.archetype == NO_ARCHETYPE {
            return None;
        }
        let table = self.archetypes.table(record.archetype)?;
        let position = table.column_position(id)?;
        // SAFETY: as in `get`.
        Some(unsafe { table.column(position).get::<C>(record.row as usize) })
    }

    /// The archetype the entity currently lives in, if any.
    pub fn archetype_of(&self, entity: Entity) -> Option<Archetype> {
        if !self.is_valid(entity) {
            return None;
        }
        let record = self.entities.record(entity.index());
        if record.archetype == NO_ARCHETYPE {
            return None;
        }
        Some(self.archetype_handle(record.archetype))
    }

    /// The number of components attached to the entity.
    pub fn component_count(&self, entity: Entity) -> usize {
        self.archetype_of(entity)
            .and_then(|archetype| self.archetype_signature(archetype))
            .map(Signature::len)
            .unwrap_or(0)
    }

    /// Whether an archetype handle currently resolves in this world.
    pub fn archetype_is_valid(&self, archetype: Archetype) -> bool {
        self.resolve_archetype(archetype).is_some()
    }

    /// The number of entities stored in the archetype (0 for stale handles).
    pub fn archetype_entity_count(&self, archetype: Archetype) -> usize {
        self.resolve_archetype(archetype)
            .and_then(|slot| self.archetypes.table(slot))
            .map(|table| table.count())
            .unwrap_or(0)
    }

    /// The archetype's component type set.
    pub fn archetype_signature(&self, archetype: Archetype) -> Option<&Signature> {
        let slot = self.resolve_archetype(archetype)?;
        Some(self.archetypes.table(slot)?.signature())
    }

    /// A copy of the archetype's entities, in row order.
    pub fn archetype_entities(&self, archetype: Archetype) -> Vec<Entity> {
        self.entity_buffer(archetype)
            .map(<[Entity]>::to_vec)
            .unwrap_or_default()
    }

    /// A view of the archetype's entity column, of length `count`.
    pub fn entity_buffer(&self, archetype: Archetype) -> Option<&[Entity]> {
        let slot = self.resolve_archetype(archetype)?;
        Some(self.archetypes.table(slot)?.entities())
    }

    /// A view of the archetype's `C` column, of length `count`, or `None`
    /// if the handle is stale or the archetype does not store `C`.
    pub fn component_buffer<C: Component>(&self, archetype: Archetype) -> Option<&[C]> {
        let slot = self.resolve_archetype(archetype)?;
        let id = self.registry.id_of::<C>();
        self.archetypes.table(slot)?.component_slice::<C>(id)
    }

    /// Set this world's data singleton for type `C`, replacing any prior
    /// value.
    pub fn set_data<C: Component>(&mut self, value: C) {
        let id = self.registry.id_of::<C>();
        self.per_type.state_mut(id).data = Some(Box::new(value));
    }

    /// Get this world's data singleton for type `C`.
    pub fn data<C: Component>(&self) -> Option<&C> {
        let id = self.registry.id_of::<C>();
        self.per_type.state(id)?.data.as_ref()?.downcast_ref::<C>()
    }

    /// Get this world's data singleton for type `C`, mutably.
    pub fn data_mut<C: Component>(&mut self) -> Option<&mut C> {
        let id = self.registry.id_of::<C>();
        self.per_type
            .state_mut(id)
            .data
            .as_mut()?
            .downcast_mut::<C>()
    }

    /// Take this world's data singleton for type `C` out.
    pub fn remove_data<C: Component>(&mut self) -> Option<C> {
        let id = self.registry.id_of::<C>();
        let boxed = self.per_type.state_mut(id).data.take()?;
        match boxed.downcast::<C>() {
            Ok(value) => Some(*value),
            Err(other) => {
                // Different type under this id cannot happen; restore it.
                self.per_type.state_mut(id).data = Some(other);
                None
            }
        }
    }

    /// Register a set listener for component type `C` into its shape's slot,
    /// replacing any previous listener of that shape.
    pub fn on_set<C: Component>(&mut self, listener: SetListener<C>) {
        let id = self.registry.id_of::<C>();
        self.per_type.state_mut(id).install_set(listener);
    }

    /// Unregister the set listener of the given shape for component `C`.
    pub fn clear_set_listener<C: Component>(&mut self, shape: SetShape) {
        let id = self.registry.id_of::<C>();
        self.per_type.state_mut(id).clear_set(shape);
    }

    /// Register a remove listener for component type `C` into its shape's
    /// slot, replacing any previous listener of that shape.
    pub fn on_remove<C: Component>(&mut self, listener: RemoveListener<C>) {
        let id = self.registry.id_of::<C>();
        self.per_type.state_mut(id).install_remove(listener);
    }

    /// Unregister the remove listener of the given shape for component `C`.
    pub fn clear_remove_listener<C: Component>(&mut self, shape: RemoveShape) {
        let id = self.registry.id_of::<C>();
        self.per_type.state_mut(id).clear_remove(shape);
    }

    /// Mint a handle for an archetype slot at its current version.
    pub(crate) fn archetype_handle(&self, slot: u32) -> Archetype {
        let version = self.archetypes.slot_version(slot).unwrap_or(0);
        Archetype::new(self.id, slot, version)
    }

    /// Resolve an archetype handle to its live slot, or `None` if the handle
    /// is foreign, stale, or the slot is empty.
    pub(crate) fn resolve_archetype(&self, archetype: Archetype) -> Option<u32> {
        if archetype.world() != self.id {
            return None;
        }
        let slot = archetype.index() as u32;
        if self.archetypes.slot_version(slot)? != archetype.version() {
            return None;
        }
        self.archetypes.table(slot)?;
        Some(slot)
    }

    /// Resolve the archetype slot for the signature currently held in the
    /// reusable scratch, creating it if needed. Structural paths rebuild the
    /// scratch immediately before calling this.
    pub(crate) fn archetype_slot_for_scratch(&mut self) -> u32 {
        let Self {
            archetypes,
            scratch,
            registry,
            structure_counter,
            ..
        } = self;
        archetypes.get_or_create(scratch, registry, structure_counter)
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.teardown();
        pool::release(self.id);
        debug!("destroyed world '{}' (id {})", self.name, self.id.raw());
    }
}

// World is intentionally !Send and !Sync: it assumes exclusive single-thread
// access, and listener closures need not be Send. The PhantomData<*mut ()>
// marker enforces both.
