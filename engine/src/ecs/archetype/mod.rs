//! Archetype handles and the per-world archetype directory.
//!
//! An archetype is a table of all entities sharing one component type set.
//! The directory owns the tables in versioned slots: destroying an archetype
//! bumps its slot version and pushes the slot onto a free stack, and the next
//! signature that needs a table may reuse the slot. Handles carry the slot
//! version they were minted against, so handles to a destroyed archetype stop
//! validating even when the slot is reused.

use std::collections::HashMap;

use log::trace;

use crate::ecs::{
    component::{Signature, TypeRegistry},
    entity::Entity,
    storage::Table,
    world::{self, World},
};

/// An archetype handle: an opaque `(world, index, version)` triple.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Archetype {
    /// The world this archetype belongs to.
    world: world::Id,

    /// The slot index within the world's archetype directory.
    index: u32,

    /// The slot version this handle was minted against.
    version: u32,
}

impl Archetype {
    /// Construct a handle. Only the world mints handles.
    #[inline]
    pub(crate) const fn new(world: world::Id, index: u32, version: u32) -> Self {
        Self {
            world,
            index,
            version,
        }
    }

    /// The id of the world this archetype belongs to.
    #[inline]
    pub fn world(&self) -> world::Id {
        self.world
    }

    /// The directory slot index.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// The slot version this handle was minted against.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether this handle currently resolves in the given world.
    #[inline]
    pub fn is_valid(&self, world: &World) -> bool {
        world.archetype_is_valid(*self)
    }

    /// The number of entities currently stored in this archetype.
    #[inline]
    pub fn entity_count(&self, world: &World) -> usize {
        world.archetype_entity_count(*self)
    }

    /// Create an entity in this archetype, components default-initialized.
    /// Structural; returns the invalid handle if this handle is stale.
    #[inline]
    pub fn create_entity(&self, world: &mut World) -> Entity {
        world.create_entity(*self)
    }

    /// Destroy this archetype and everything in it. Structural; no-op if
    /// stale.
    #[inline]
    pub fn destroy(&self, world: &mut World) {
        world.destroy_archetype(*self);
    }

    /// Re-shrink this archetype's backing arrays. Structural; no-op if
    /// stale.
    #[inline]
    pub fn resize_backing_arrays(&self, world: &mut World) {
        world.resize_backing(*self);
    }
}

/// One directory slot: a version and, while live, the table it holds.
pub(crate) struct Slot {
    /// Bumped whenever the slot's archetype is destroyed.
    pub version: u32,

    /// The archetype's table, present while the slot is live.
    pub table: Option<Table>,
}

/// The per-world directory of archetype slots.
pub(crate) struct ArchetypeDirectory {
    /// The slots. Never shrinks; the length is the scan bound for queries.
    slots: Vec<Slot>,

    /// Destroyed slots available for reuse, most recent first.
    free: Vec<u32>,

    /// Index from signature to live slot.
    by_signature: HashMap<Signature, u32>,
}

impl ArchetypeDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_signature: HashMap::new(),
        }
    }

    /// The slot count, bounding every slot index ever handed out.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// The current version of a slot.
    #[inline]
    pub fn slot_version(&self, slot: u32) -> Option<u32> {
        self.slots.get(slot as usize).map(|s| s.version)
    }

    /// The table in a slot, if the slot is live.
    #[inline]
    pub fn table(&self, slot: u32) -> Option<&Table> {
        self.slots.get(slot as usize)?.table.as_ref()
    }

    /// The mutable table in a slot, if the slot is live.
    #[inline]
    pub fn table_mut(&mut self, slot: u32) -> Option<&mut Table> {
        self.slots.get_mut(slot as usize)?.table.as_mut()
    }

    /// Split-borrow two distinct live slots' tables, for migration.
    ///
    /// # Panics
    /// Panics if the slots are equal or either is empty; both are internal
    /// invariant violations.
    pub fn two_tables_mut(&mut self, a: u32, b: u32) -> (&mut Table, &mut Table) {
        assert_ne!(a, b, "cannot split-borrow one archetype slot twice");
        let (low, high) = if a < b {
            (a as usize, b as usize)
        } else {
            (b as usize, a as usize)
        };
        let (left, right) = self.slots.split_at_mut(high);
        let low_table = left[low]
            .table
            .as_mut()
            .expect("migration touched an empty archetype slot");
        let high_table = right[0]
            .table
            .as_mut()
            .expect("migration touched an empty archetype slot");
        if a < b {
            (low_table, high_table)
        } else {
            (high_table, low_table)
        }
    }

    /// Find the live slot holding a signature.
    #[inline]
    pub fn slot_by_signature(&self, signature: &Signature) -> Option<u32> {
        self.by_signature.get(signature).copied()
    }

    /// Get the slot for a signature, creating its table on a miss.
    ///
    /// A miss pops a freed slot when one is available (bumping the structure
    /// counter for the reuse) before extending the directory, then constructs
    /// the table with a freshly owned copy of the signature, since the caller
    /// may be passing the world's reusable scratch.
    pub fn get_or_create(
        &mut self,
        signature: &Signature,
        registry: &TypeRegistry,
        structure_counter: &mut u64,
    ) -> u32 {
        if let Some(slot) = self.slot_by_signature(signature) {
            return slot;
        }

        let slot = if let Some(slot) = self.free.pop() {
            *structure_counter += 1;
            trace!("reusing archetype slot {slot}");
            slot
        } else {
            let slot = self.slots.len() as u32;
            self.slots.push(Slot {
                version: 0,
                table: None,
            });
            slot
        };

        let owned = signature.clone();
        self.by_signature.insert(owned.clone(), slot);
        self.slots[slot as usize].table = Some(Table::new(owned, registry));
        *structure_counter += 1;
        slot
    }

    /// Retire a slot: take its table out, bump the version, unindex the
    /// signature, and push the slot onto the free stack.
    ///
    /// Returns the taken table so the caller can run remove listeners against
    /// its rows before dropping it.
    pub fn destroy_slot(&mut self, slot: u32) -> Option<Table> {
        let entry = self.slots.get_mut(slot as usize)?;
        let table = entry.table.take()?;
        entry.version += 1;
        self.by_signature.remove(table.signature());
        self.free.push(slot);
        Some(table)
    }
}
