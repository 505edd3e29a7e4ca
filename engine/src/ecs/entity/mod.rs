//! Entity handles and the per-world entity directory.
//!
//! An [`Entity`] is an opaque `(world, index, version)` triple. The index
//! addresses a record in its world's entity directory; the version detects
//! stale handles. When an entity is destroyed its record's version is bumped,
//! so every handle minted before the destruction stops validating. Freed
//! indices are recycled through a FIFO, which keeps the index space compact
//! for the archetype row bookkeeping that is keyed on it.
//!
//! Index 0 is reserved: its record is created with version 1, so the default
//! (all-zero) handle can never validate against any world.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use crate::ecs::{
    archetype::Archetype,
    component::Component,
    error::Result,
    world::{self, World},
};

/// An entity handle.
///
/// Handles are plain values: copying is free, equality is triple-wise, and
/// the hash uses the index alone (two versions of the same slot are unequal
/// but collide, which is the useful behavior for generation-churning maps).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    /// The world this entity belongs to.
    world: world::Id,

    /// The record index within the world's entity directory.
    index: u32,

    /// The directory version this handle was minted against.
    version: u32,
}

impl Entity {
    /// Construct a handle. Only the world mints handles.
    #[inline]
    pub(crate) const fn new(world: world::Id, index: u32, version: u32) -> Self {
        Self {
            world,
            index,
            version,
        }
    }

    /// The id of the world this entity belongs to.
    #[inline]
    pub fn world(&self) -> world::Id {
        self.world
    }

    /// The directory index, for use in indexable storage.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// The version this handle was minted against.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether this handle currently resolves in the given world.
    #[inline]
    pub fn is_valid(&self, world: &World) -> bool {
        world.is_valid(*self)
    }

    /// Whether this entity currently has component `C`.
    #[inline]
    pub fn has<C: Component>(&self, world: &World) -> bool {
        world.has::<C>(*self)
    }

    /// Get a mutable reference to this entity's `C` component.
    #[inline]
    pub fn get<'w, C: Component>(&self, world: &'w mut World) -> Result<&'w mut C> {
        world.get::<C>(*self)
    }

    /// Get a reference to this entity's `C` component, if present.
    #[inline]
    pub fn try_get<'w, C: Component>(&self, world: &'w World) -> Option<&'w C> {
        world.try_get::<C>(*self)
    }

    /// Set component `C` on this entity. Structural; no-op if stale.
    #[inline]
    pub fn set<C: Component>(&self, world: &mut World, value: C) {
        world.set(*self, value);
    }

    /// Remove component `C` from this entity. Structural; no-op if stale.
    #[inline]
    pub fn remove<C: Component>(&self, world: &mut World) {
        world.remove::<C>(*self);
    }

    /// Destroy this entity. Structural; no-op if stale.
    #[inline]
    pub fn destroy(&self, world: &mut World) {
        world.destroy(*self);
    }

    /// The archetype this entity currently lives in, if any.
    #[inline]
    pub fn archetype(&self, world: &World) -> Option<Archetype> {
        world.archetype_of(*self)
    }

    /// The number of components attached to this entity.
    #[inline]
    pub fn component_count(&self, world: &World) -> usize {
        world.component_count(*self)
    }
}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.index);
    }
}

/// Marker for a record not attached to any archetype.
pub(crate) const NO_ARCHETYPE: u32 = u32::MAX;

/// A world-internal entity record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntityRecord {
    /// Current version of this slot. Bumped on destroy.
    pub version: u32,

    /// Archetype directory slot, or [`NO_ARCHETYPE`].
    pub archetype: u32,

    /// Row within the archetype's columns.
    pub row: u32,
}

/// The per-world directory of entity records.
///
/// Allocation reuses freed indices from a FIFO before extending the
/// directory. Records are never removed; destruction bumps the version and
/// queues the index for reuse.
pub(crate) struct EntityDirectory {
    /// The records, indexed by entity index.
    records: Vec<EntityRecord>,

    /// Freed indices awaiting reuse, oldest first.
    free: VecDeque<u32>,
}

impl EntityDirectory {
    /// Create a directory with the reserved index 0 in place.
    pub fn new() -> Self {
        let mut records = Vec::with_capacity(1024);
        // Index 0 starts at version 1 so the default handle never validates.
        records.push(EntityRecord {
            version: 1,
            archetype: NO_ARCHETYPE,
            row: 0,
        });
        Self {
            records,
            free: VecDeque::new(),
        }
    }

    /// Allocate an index, reusing a freed one when available.
    ///
    /// Returns the index and the version a handle for it must carry.
    pub fn allocate(&mut self) -> (u32, u32) {
        if let Some(index) = self.free.pop_front() {
            let record = &self.records[index as usize];
            debug_assert_eq!(record.archetype, NO_ARCHETYPE);
            return (index, record.version);
        }
        let index = self.records.len() as u32;
        self.records.push(EntityRecord {
            version: 0,
            archetype: NO_ARCHETYPE,
            row: 0,
        });
        (index, 0)
    }

    /// Bump the record's version and queue the index for reuse.
    ///
    /// Every handle minted before this call stops validating.
    pub fn free(&mut self, index: u32) {
        let record = &mut self.records[index as usize];
        record.version += 1;
        record.archetype = NO_ARCHETYPE;
        self.free.push_back(index);
    }

    /// Get a record.
    #[inline]
    pub fn record(&self, index: usize) -> &EntityRecord {
        &self.records[index]
    }

    /// Get a mutable record.
    #[inline]
    pub fn record_mut(&mut self, index: usize) -> &mut EntityRecord {
        &mut self.records[index]
    }

    /// The number of records, including reserved and freed slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_skips_the_reserved_index() {
        // Given
        let mut directory = EntityDirectory::new();

        // When
        let (index, version) = directory.allocate();

        // Then
        assert_eq!(index, 1);
        assert_eq!(version, 0);
    }

    #[test]
    fn allocation_produces_unique_indices() {
        // Given
        let mut directory = EntityDirectory::new();

        // When
        let mut indices: Vec<u32> = (0..200).map(|_| directory.allocate().0).collect();

        // Then - no duplicates
        let before = indices.len();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(before, indices.len());
    }

    #[test]
    fn freed_indices_are_reused_fifo_with_bumped_versions() {
        // Given
        let mut directory = EntityDirectory::new();
        let (first, _) = directory.allocate();
        let (second, _) = directory.allocate();

        // When - free both, then reallocate
        directory.free(first);
        directory.free(second);
        let (reused_a, version_a) = directory.allocate();
        let (reused_b, version_b) = directory.allocate();

        // Then - oldest freed index comes back first, versions bumped
        assert_eq!(reused_a, first);
        assert_eq!(reused_b, second);
        assert_eq!(version_a, 1);
        assert_eq!(version_b, 1);
    }

    #[test]
    fn versions_increase_across_repeated_reuse() {
        // Given
        let mut directory = EntityDirectory::new();
        let (index, _) = directory.allocate();

        // When - cycle the same slot three times
        let mut versions = Vec::new();
        for _ in 0..3 {
            directory.free(index);
            let (reused, version) = directory.allocate();
            assert_eq!(reused, index);
            versions.push(version);
        }

        // Then - strictly increasing
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn default_handle_is_never_valid_against_the_directory() {
        // Given
        let directory = EntityDirectory::new();
        let handle = Entity::default();

        // Then - the reserved record's version already differs
        assert_ne!(directory.record(0).version, handle.version());
    }

    #[test]
    fn entity_hash_uses_the_index_alone() {
        use std::collections::hash_map::DefaultHasher;

        fn hash_of(entity: &Entity) -> u64 {
            let mut hasher = DefaultHasher::new();
            entity.hash(&mut hasher);
            hasher.finish()
        }

        // Given - same index, different versions and worlds
        let a = Entity::new(world::Id::new(1), 7, 0);
        let b = Entity::new(world::Id::new(2), 7, 3);
        let c = Entity::new(world::Id::new(1), 8, 0);

        // Then
        assert_ne!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(hash_of(&a), hash_of(&c));
    }
}
