//! The structural mutation engine.
//!
//! Structural operations (create, set, remove, destroy, archetype
//! destruction, backing resize) may move entities between archetypes or
//! change archetype membership. Each one consults the world's deferral depth:
//! at depth zero it executes immediately; above zero it is recorded on the
//! command queue and replayed, in enqueue order and at depth zero, when the
//! depth drains back down. Query iteration raises the depth for the span of
//! its loop, so structural calls made inside a loop body can never invalidate
//! the columns the loop is walking.
//!
//! Migration is swap-remove in the source table plus append in the
//! destination, matching columns by type id. The entity that gets swapped
//! into the vacated row has its directory record fixed up, which preserves
//! the invariant that every row points back at its record and vice versa.
//! Storage is always consistent before any listener runs.

use log::{trace, warn};

use crate::ecs::{
    archetype::Archetype,
    command::{Command, CommandQueue},
    component::{Component, TypeId, TypeRegistry},
    entity::{Entity, EntityDirectory, NO_ARCHETYPE},
    storage::{ErasedValue, Row, Table},
    world::{World, state::PerTypeStates},
};

impl World {
    /// Create an entity in the given archetype, every component
    /// default-initialized.
    ///
    /// Structural. When deferred, the entity index is pre-allocated so the
    /// returned handle is immediately observable; the archetype attachment
    /// happens at drain. Returns the invalid default handle if the archetype
    /// handle is stale (immediate mode only; a deferred create against an
    /// archetype that dies before the drain is dropped and counted).
    pub fn create_entity(&mut self, archetype: Archetype) -> Entity {
        if self.deferral_depth > 0 {
            let (_, mut ops) = self.split_deferred();
            return ops.create_entity(archetype);
        }
        let Some(slot) = self.resolve_archetype(archetype) else {
            return Entity::default();
        };
        let (index, version) = self.entities.allocate();
        let entity = Entity::new(self.id(), index, version);
        self.attach(entity, slot);
        entity
    }

    /// Set component `C` on the entity, overwriting in place or migrating
    /// the entity to the archetype that also stores `C`.
    ///
    /// Structural. Silent no-op on an invalid handle.
    pub fn set<C: Component>(&mut self, entity: Entity, value: C) {
        if self.deferral_depth > 0 {
            let (_, mut ops) = self.split_deferred();
            ops.set(entity, value);
            return;
        }
        self.set_now(entity, value);
    }

    /// Remove component `C` from the entity, migrating it to the archetype
    /// without `C`.
    ///
    /// Structural. Silent no-op on an invalid handle or absent component.
    pub fn remove<C: Component>(&mut self, entity: Entity) {
        if self.deferral_depth > 0 {
            let (_, mut ops) = self.split_deferred();
            ops.remove::<C>(entity);
            return;
        }
        self.remove_now::<C>(entity);
    }

    /// Destroy the entity, removing it from its archetype and invalidating
    /// every handle to it.
    ///
    /// Structural. Silent no-op on an invalid handle.
    pub fn destroy(&mut self, entity: Entity) {
        if self.deferral_depth > 0 {
            self.commands.push(Command::Destroy { entity });
            return;
        }
        self.destroy_now(entity);
    }

    /// Destroy the archetype and every entity in it.
    ///
    /// Structural. Silent no-op on a stale handle.
    pub fn destroy_archetype(&mut self, archetype: Archetype) {
        if self.deferral_depth > 0 {
            self.commands.push(Command::DestroyArchetype { archetype });
            return;
        }
        if let Some(slot) = self.resolve_archetype(archetype) {
            self.destroy_archetype_now(slot);
        }
    }

    /// Re-shrink the archetype's backing arrays to the smallest power of two
    /// that still holds its entities.
    ///
    /// Structural. Silent no-op on a stale handle.
    pub fn resize_backing(&mut self, archetype: Archetype) {
        if self.deferral_depth > 0 {
            self.commands.push(Command::ResizeBacking { archetype });
            return;
        }
        if let Some(slot) = self.resolve_archetype(archetype) {
            if let Some(table) = self.archetypes.table_mut(slot) {
                table.shrink_to_fit();
            }
        }
    }

    /// Enter or leave a structural-deferral region.
    ///
    /// Reference-counted, not a flag: nested enable/disable pairs compose.
    /// When the depth returns to zero the command queue drains synchronously,
    /// replaying every deferred operation in enqueue order.
    pub fn cache_structural_events(&mut self, enable: bool) {
        if enable {
            self.deferral_depth += 1;
            return;
        }
        debug_assert!(
            self.deferral_depth > 0,
            "unbalanced cache_structural_events(false)"
        );
        if self.deferral_depth == 0 {
            return;
        }
        self.deferral_depth -= 1;
        if self.deferral_depth == 0 {
            self.drain_commands();
        }
    }

    /// Split this world into the archetype directory and a [`Deferred`]
    /// operations handle over the remaining state. The two sides borrow
    /// disjoint fields, which is what lets a query iterate columns while the
    /// loop body records structural operations.
    pub(crate) fn split_deferred(
        &mut self,
    ) -> (&mut crate::ecs::archetype::ArchetypeDirectory, Deferred<'_>) {
        let World {
            id,
            ref registry,
            entities,
            archetypes,
            per_type,
            commands,
            ..
        } = self;
        (
            archetypes,
            Deferred {
                world: *id,
                entities,
                per_type,
                commands,
                registry: registry.as_ref(),
            },
        )
    }

    /// Attach an allocated entity to a live archetype slot.
    fn attach(&mut self, entity: Entity, slot: u32) {
        let table = self
            .archetypes
            .table_mut(slot)
            .expect("attach targeted an empty archetype slot");
        let row = table.push_default_row(entity);
        let record = self.entities.record_mut(entity.index());
        record.archetype = slot;
        record.row = row.raw();
        self.entity_count += 1;
    }

    /// Immediate set: overwrite in place, or migrate up into `∪ {C}`.
    pub(crate) fn set_now<C: Component>(&mut self, entity: Entity, value: C) {
        if !self.is_valid(entity) {
            return;
        }
        let id = self.registry().id_of::<C>();
        let record = *self.entities.record(entity.index());
        if record.archetype == NO_ARCHETYPE {
            return;
        }
        let position = self
            .archetypes
            .table(record.archetype)
            .and_then(|table| table.column_position(id));
        match position {
            Some(position) => self.overwrite(entity, record.archetype, record.row, id, position, value),
            None => self.migrate_add(entity, record.archetype, record.row, id, value),
        }
    }

    /// Overwrite the existing `C` cell, firing set listeners with the
    /// replaced value.
    fn overwrite<C: Component>(
        &mut self,
        entity: Entity,
        slot: u32,
        row: u32,
        id: TypeId,
        position: usize,
        value: C,
    ) {
        let has_listeners = self.per_type.has_set(id);
        let World {
            archetypes,
            per_type,
            ..
        } = self;
        let Some(table) = archetypes.table_mut(slot) else {
            return;
        };
        let column = table.column_mut(position);
        // SAFETY: the record's row is initialized and the column's type
        // check guards the downcast.
        let old = unsafe { column.replace::<C>(row as usize, value) };
        if has_listeners {
            let new_value = unsafe { column.get_mut::<C>(row as usize) };
            per_type.invoke_set::<C>(id, entity, &old, new_value);
        }
    }

    /// Migrate the entity into `current ∪ {C}` and write the new value.
    fn migrate_add<C: Component>(
        &mut self,
        entity: Entity,
        source_slot: u32,
        source_row: u32,
        id: TypeId,
        value: C,
    ) {
        {
            let World {
                archetypes, scratch, ..
            } = self;
            let Some(source) = archetypes.table(source_slot) else {
                return;
            };
            scratch.copy_from(source.signature());
            scratch.add(id);
        }
        let target = self.archetype_slot_for_scratch();

        let World {
            archetypes,
            entities,
            per_type,
            ..
        } = self;
        let (source, destination) = archetypes.two_tables_mut(source_slot, target);
        let (new_row, moved) = Table::migrate_row(source, Row::new(source_row), destination);
        let position = destination
            .column_position(id)
            .expect("destination archetype missing the added component");
        // SAFETY: migration left the destination's `C` cell uninitialized.
        unsafe {
            destination
                .column_mut(position)
                .write::<C>(new_row.index(), value);
        }

        if let Some(moved) = moved {
            entities.record_mut(moved.index()).row = source_row;
        }
        let record = entities.record_mut(entity.index());
        record.archetype = target;
        record.row = new_row.raw();

        if per_type.has_set(id) {
            let old = C::default();
            let new_value = unsafe {
                destination
                    .column_mut(position)
                    .get_mut::<C>(new_row.index())
            };
            per_type.invoke_set::<C>(id, entity, &old, new_value);
        }
    }

    /// Immediate remove: migrate down into `current ∖ {C}`, firing remove
    /// listeners with the removed value.
    pub(crate) fn remove_now<C: Component>(&mut self, entity: Entity) {
        if !self.is_valid(entity) {
            return;
        }
        let id = self.registry().id_of::<C>();
        let record = *self.entities.record(entity.index());
        if record.archetype == NO_ARCHETYPE {
            return;
        }

        let old: C;
        {
            let World {
                archetypes, scratch, ..
            } = self;
            let Some(source) = archetypes.table_mut(record.archetype) else {
                return;
            };
            let Some(position) = source.column_position(id) else {
                return;
            };
            scratch.copy_from(source.signature());
            scratch.remove(id);
            // SAFETY: the row is initialized; migration retires the cell
            // without dropping, so ownership moves into `old` exactly once.
            old = unsafe {
                source
                    .column_mut(position)
                    .read::<C>(record.row as usize)
            };
        }
        let target = self.archetype_slot_for_scratch();

        let World {
            archetypes,
            entities,
            per_type,
            ..
        } = self;
        let (source, destination) = archetypes.two_tables_mut(record.archetype, target);
        let (new_row, moved) = Table::migrate_row(source, Row::new(record.row), destination);

        if let Some(moved) = moved {
            entities.record_mut(moved.index()).row = record.row;
        }
        let entry = entities.record_mut(entity.index());
        entry.archetype = target;
        entry.row = new_row.raw();

        if per_type.has_remove(id) {
            per_type.invoke_remove_typed::<C>(id, entity, &old);
        }
    }

    /// Immediate destroy.
    pub(crate) fn destroy_now(&mut self, entity: Entity) {
        if !self.is_valid(entity) {
            return;
        }
        let record = *self.entities.record(entity.index());
        if record.archetype == NO_ARCHETYPE {
            // Pre-allocated but never attached: just retire the index.
            self.entities.free(entity.index() as u32);
            return;
        }

        // Capture the removed values for every component type that has a
        // remove listener, then take the row out in one pass.
        let mut captured: Vec<(TypeId, ErasedValue)> = Vec::new();
        {
            let World {
                archetypes,
                entities,
                per_type,
                ..
            } = self;
            let table = archetypes
                .table_mut(record.archetype)
                .expect("entity record points at an empty archetype slot");

            for position in 0..table.signature().len() {
                let column = table.column(position);
                let id = column.info().id();
                if per_type.has_remove(id) {
                    // SAFETY: the row is initialized; the sparing removal
                    // below retires these cells without dropping.
                    let value = unsafe {
                        ErasedValue::capture(column.ptr_at(record.row as usize), *column.info())
                    };
                    captured.push((id, value));
                }
            }

            let spared: Vec<TypeId> = captured.iter().map(|(id, _)| *id).collect();
            let moved = table.swap_remove_row_sparing(Row::new(record.row), &spared);
            if let Some(moved) = moved {
                entities.record_mut(moved.index()).row = record.row;
            }
            entities.free(entity.index() as u32);
        }
        self.entity_count -= 1;

        // Storage is consistent; fire the listeners with the captured values.
        for (id, value) in captured {
            let state = self.per_type.state_mut(id);
            if let Some(invoke) = state.invoke_remove {
                // SAFETY: the captured value is an initialized instance of
                // the type registered under `id`.
                unsafe {
                    invoke(state, entity, value.as_ptr());
                }
            }
        }
    }

    /// Immediate archetype destruction of a live slot.
    pub(crate) fn destroy_archetype_now(&mut self, slot: u32) {
        let Some(table) = self.archetypes.destroy_slot(slot) else {
            return;
        };
        self.structure_counter += 1;
        self.entity_count -= table.count();

        // Version-bump every contained entity and recycle its index.
        for &entity in table.entities() {
            self.entities.free(entity.index() as u32);
        }

        // For each column with a remove listener, invoke it per entity in
        // row order against the detached table's still-live values.
        for position in 0..table.signature().len() {
            let column = table.column(position);
            let id = column.info().id();
            if !self.per_type.has_remove(id) {
                continue;
            }
            let state = self.per_type.state_mut(id);
            let Some(invoke) = state.invoke_remove else {
                continue;
            };
            for row in 0..table.count() {
                let entity = table.entities()[row];
                // SAFETY: rows of the detached table remain initialized
                // until it drops below.
                unsafe {
                    invoke(state, entity, column.ptr_at(row));
                }
            }
        }
        // Dropping the table drops the remaining component values.
    }

    /// Replay every deferred command, in enqueue order, at depth zero.
    fn drain_commands(&mut self) {
        debug_assert_eq!(self.deferral_depth, 0);
        while let Some(command) = self.commands.pop() {
            match command {
                Command::Create { entity, archetype } => {
                    if !self.is_valid(entity) {
                        continue;
                    }
                    match self.resolve_archetype(archetype) {
                        Some(slot) => self.attach(entity, slot),
                        None => {
                            // The target died during the deferral region:
                            // drop the pre-allocated entity and keep going.
                            self.entities.free(entity.index() as u32);
                            self.dropped_creates += 1;
                            warn!(
                                "deferred create targeted a destroyed archetype; dropped entity {}",
                                entity.index()
                            );
                        }
                    }
                }
                Command::Set { entity, type_id } => {
                    let apply = self.per_type.state(type_id).and_then(|state| state.apply_set);
                    if let Some(apply) = apply {
                        apply(self, entity);
                    } else {
                        debug_assert!(false, "deferred set without an apply shim");
                    }
                }
                Command::Remove { entity, type_id } => {
                    let apply = self
                        .per_type
                        .state(type_id)
                        .and_then(|state| state.apply_remove);
                    if let Some(apply) = apply {
                        apply(self, entity);
                    } else {
                        debug_assert!(false, "deferred remove without an apply shim");
                    }
                }
                Command::Destroy { entity } => self.destroy_now(entity),
                Command::DestroyArchetype { archetype } => {
                    if let Some(slot) = self.resolve_archetype(archetype) {
                        self.destroy_archetype_now(slot);
                    }
                }
                Command::ResizeBacking { archetype } => {
                    if let Some(slot) = self.resolve_archetype(archetype) {
                        if let Some(table) = self.archetypes.table_mut(slot) {
                            table.shrink_to_fit();
                        }
                    }
                }
            }
        }
    }

    /// Drain every archetype on the way out. Remove listeners fire per
    /// column; commands deferred past the world's end are discarded.
    pub(crate) fn teardown(&mut self) {
        if !self.commands.is_empty() {
            trace!(
                "discarding {} commands deferred past world teardown",
                self.commands.len()
            );
            while self.commands.pop().is_some() {}
        }
        for slot in 0..self.archetypes.len() as u32 {
            self.destroy_archetype_now(slot);
        }
        debug_assert_eq!(self.entity_count, 0);
    }
}

/// Structural operations recorded against a deferral region.
///
/// Handed to query iteration closures (and used internally by the world's
/// own deferred paths). Every operation appends to the command queue; a
/// `create_entity` additionally pre-allocates the entity index so the handle
/// it returns is observable before the drain, and a `set` parks its value in
/// the per-type FIFO so the queue itself stays untyped.
pub struct Deferred<'w> {
    world: super::Id,
    entities: &'w mut EntityDirectory,
    per_type: &'w mut PerTypeStates,
    commands: &'w CommandQueue,
    registry: &'w TypeRegistry,
}

impl Deferred<'_> {
    /// Record an entity creation; the returned handle is already valid.
    pub fn create_entity(&mut self, archetype: Archetype) -> Entity {
        let (index, version) = self.entities.allocate();
        let entity = Entity::new(self.world, index, version);
        self.commands.push(Command::Create { entity, archetype });
        entity
    }

    /// Record a set; the value is parked in the per-type FIFO.
    pub fn set<C: Component>(&mut self, entity: Entity, value: C) {
        let id = self.registry.id_of::<C>();
        let info = self
            .registry
            .info(id)
            .expect("freshly interned type has no info");
        let state = self.per_type.state_mut(id);
        state.pending.push_back(ErasedValue::new(value, info));
        state.apply_set = Some(apply_pending_set::<C>);
        self.commands.push(Command::Set { entity, type_id: id });
    }

    /// Record a remove.
    pub fn remove<C: Component>(&mut self, entity: Entity) {
        let id = self.registry.id_of::<C>();
        self.per_type.state_mut(id).apply_remove = Some(apply_remove::<C>);
        self.commands.push(Command::Remove { entity, type_id: id });
    }

    /// Record an entity destruction.
    pub fn destroy(&mut self, entity: Entity) {
        self.commands.push(Command::Destroy { entity });
    }

    /// Record an archetype destruction.
    pub fn destroy_archetype(&mut self, archetype: Archetype) {
        self.commands.push(Command::DestroyArchetype { archetype });
    }

    /// Record a backing resize.
    pub fn resize_backing(&mut self, archetype: Archetype) {
        self.commands.push(Command::ResizeBacking { archetype });
    }
}

/// Drain-time shim: pop the front pending value of type `C` and apply it as
/// an immediate set.
fn apply_pending_set<C: Component>(world: &mut World, entity: Entity) {
    let id = world.registry().id_of::<C>();
    let Some(value) = world.per_type.state_mut(id).pending.pop_front() else {
        debug_assert!(false, "set command without a pending value");
        return;
    };
    world.set_now(entity, value.take::<C>());
}

/// Drain-time shim: apply a deferred remove of type `C`.
fn apply_remove<C: Component>(world: &mut World, entity: Entity) {
    world.remove_now::<C>(entity);
}
