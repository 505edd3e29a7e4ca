use crate::ecs::{
    component::{Component, Signature, TypeId, TypeRegistry},
    entity::Entity,
    storage::{Column, ColumnIndex, Row},
};

/// The smallest backing capacity a table ever has.
pub const MIN_CAPACITY: usize = 8;

/// Columnar storage for one archetype.
///
/// A table stores all entities whose component type set equals its signature.
/// Each component type gets one [`Column`]; the entity array and every column
/// share row indices, and a single `count`/`capacity` pair governs them all.
/// Capacity is always a power of two of at least [`MIN_CAPACITY`] and doubles
/// on growth.
///
/// # Invariants
/// - `entities.len() == count <= capacity`
/// - `capacity` is a power of two `>= MIN_CAPACITY`
/// - rows `[0, count)` of every column are initialized
/// - the owning world keeps the entity directory's `(archetype, row)` records
///   pointing back at these rows
pub struct Table {
    /// The component type set stored here. Owned by the table.
    signature: Signature,

    /// The entities stored in this table, one per row.
    entities: Vec<Entity>,

    /// The component columns, positioned by the column index.
    columns: Box<[Column]>,

    /// O(1) lookup from component type id to column position.
    index: ColumnIndex,

    /// Number of occupied rows.
    count: usize,

    /// Number of allocated rows in every column.
    capacity: usize,
}

impl Table {
    /// Create an empty table for a signature.
    ///
    /// # Panics
    /// Panics if a signature id is not registered in the provided registry.
    pub fn new(signature: Signature, registry: &TypeRegistry) -> Self {
        let index = ColumnIndex::new(&signature);
        let columns: Vec<Column> = (0..index.len())
            .filter_map(|slot| {
                let id = index.slot_type(slot);
                if id.is_none() {
                    return None;
                }
                let info = registry
                    .info(id)
                    .expect("signature contains an unregistered type id");
                Some(Column::new(info, MIN_CAPACITY))
            })
            .collect();
        debug_assert_eq!(columns.len(), signature.len());

        Self {
            signature,
            entities: Vec::with_capacity(MIN_CAPACITY),
            columns: columns.into_boxed_slice(),
            index,
            count: 0,
            capacity: MIN_CAPACITY,
        }
    }

    /// The signature of this table.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The number of occupied rows.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// The allocated row capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The entities stored in this table, one per row.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Find the column position for a component type id.
    #[inline]
    pub fn column_position(&self, id: TypeId) -> Option<usize> {
        self.index.position(id)
    }

    /// Whether this table stores the given component type.
    #[inline]
    pub fn has_column(&self, id: TypeId) -> bool {
        self.index.contains(id)
    }

    /// Get a column by position.
    #[inline]
    pub fn column(&self, position: usize) -> &Column {
        &self.columns[position]
    }

    /// Get a mutable column by position.
    #[inline]
    pub fn column_mut(&mut self, position: usize) -> &mut Column {
        &mut self.columns[position]
    }

    /// Split-borrow the entity array together with one mutable column, for
    /// iteration that reads entities while writing component values.
    #[inline]
    pub fn entities_and_column_mut(&mut self, position: usize) -> (&[Entity], &mut Column) {
        (&self.entities, &mut self.columns[position])
    }

    /// View one component column as a typed slice of length `count`.
    pub fn component_slice<C: Component>(&self, id: TypeId) -> Option<&[C]> {
        let position = self.column_position(id)?;
        // SAFETY: rows [0, count) are initialized; the column's ensure_type
        // guards the downcast.
        Some(unsafe { self.columns[position].as_slice::<C>(self.count) })
    }

    /// Append a row with every column default-initialized.
    pub fn push_default_row(&mut self, entity: Entity) -> Row {
        self.ensure_capacity(self.count + 1);
        for column in self.columns.iter_mut() {
            // SAFETY: count < capacity after ensure_capacity; the slot is
            // uninitialized.
            unsafe {
                column.write_default(self.count);
            }
        }
        self.commit_row(entity)
    }

    /// Append a row whose column cells are left uninitialized.
    ///
    /// The caller must write every column at the returned row before any
    /// operation that reads, drops, or moves rows. Used by migration, which
    /// fills the cells by copying from the source table.
    pub fn allocate_row(&mut self, entity: Entity) -> Row {
        self.ensure_capacity(self.count + 1);
        self.commit_row(entity)
    }

    fn commit_row(&mut self, entity: Entity) -> Row {
        let row = Row::new(self.count as u32);
        self.entities.push(entity);
        self.count += 1;
        #[cfg(debug_assertions)]
        self.verify_invariants();
        row
    }

    /// Remove the row by swap-remove, dropping its component values.
    ///
    /// Returns the entity that was moved into the vacated row, or `None` if
    /// the removed row was the last one.
    pub fn swap_remove_row(&mut self, row: Row) -> Option<Entity> {
        self.swap_remove_row_sparing(row, &[])
    }

    /// Remove the row by swap-remove, dropping its component values except
    /// for the types listed in `spare`, whose values the caller has already
    /// moved out.
    pub fn swap_remove_row_sparing(&mut self, row: Row, spare: &[TypeId]) -> Option<Entity> {
        let at = row.index();
        debug_assert!(at < self.count, "row index out of bounds");

        for column in self.columns.iter_mut() {
            // SAFETY: at < count and rows [0, count) are initialized (spared
            // cells were moved out by the caller).
            unsafe {
                if spare.contains(&column.info().id()) {
                    column.swap_remove_no_drop(at, self.count);
                } else {
                    column.swap_remove(at, self.count);
                }
            }
        }
        self.entities.swap_remove(at);
        self.count -= 1;

        #[cfg(debug_assertions)]
        self.verify_invariants();

        if at == self.count {
            None
        } else {
            Some(self.entities[at])
        }
    }

    /// Move the row's component values from `src` into a fresh row of `dst`,
    /// matching columns by type id, and swap-remove the source row.
    ///
    /// Columns of `src` that `dst` does not store must have had their values
    /// moved out by the caller beforehand (the component being removed, on
    /// the remove path). Columns of `dst` that `src` does not store are left
    /// uninitialized for the caller to fill (the component being added, on
    /// the set path).
    ///
    /// Returns the destination row and the entity moved into the vacated
    /// source row, if any.
    pub fn migrate_row(src: &mut Table, row: Row, dst: &mut Table) -> (Row, Option<Entity>) {
        let at = row.index();
        debug_assert!(at < src.count, "row index out of bounds");

        let entity = src.entities[at];
        let dst_row = dst.allocate_row(entity);

        for column in src.columns.iter() {
            if let Some(position) = dst.column_position(column.info().id()) {
                // SAFETY: source row initialized, destination row freshly
                // allocated and uninitialized, same component type.
                unsafe {
                    column.copy_row_to(at, &mut dst.columns[position], dst_row.index());
                }
            }
        }

        // Every source cell is now either owned by dst or was moved out by
        // the caller, so the row is retired without dropping.
        for column in src.columns.iter_mut() {
            unsafe {
                column.swap_remove_no_drop(at, src.count);
            }
        }
        src.entities.swap_remove(at);
        src.count -= 1;

        let moved = if at == src.count {
            None
        } else {
            Some(src.entities[at])
        };
        (dst_row, moved)
    }

    /// Shrink the backing arrays to the smallest power of two that still
    /// holds `count`, with a floor of [`MIN_CAPACITY`].
    pub fn shrink_to_fit(&mut self) {
        let target = self.count.next_power_of_two().max(MIN_CAPACITY);
        if target >= self.capacity {
            return;
        }
        for column in self.columns.iter_mut() {
            // SAFETY: count <= target, so every initialized row survives.
            unsafe {
                column.shrink(target);
            }
        }
        self.entities.shrink_to(target);
        self.capacity = target;

        #[cfg(debug_assertions)]
        self.verify_invariants();
    }

    /// Grow the backing arrays to hold at least `needed` rows, doubling.
    fn ensure_capacity(&mut self, needed: usize) {
        if needed <= self.capacity {
            return;
        }
        let new_capacity = needed.next_power_of_two().max(MIN_CAPACITY);
        for column in self.columns.iter_mut() {
            column.grow(new_capacity);
        }
        self.entities.reserve(new_capacity - self.entities.len());
        self.capacity = new_capacity;
    }

    /// Verify row bookkeeping consistency.
    #[cfg(debug_assertions)]
    fn verify_invariants(&self) {
        assert_eq!(self.entities.len(), self.count);
        assert!(self.count <= self.capacity);
        assert!(self.capacity.is_power_of_two() && self.capacity >= MIN_CAPACITY);
        for column in self.columns.iter() {
            assert_eq!(column.capacity(), self.capacity);
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        for column in self.columns.iter_mut() {
            // SAFETY: rows [0, count) are initialized and dropped exactly
            // once here; the column frees its allocation afterwards.
            unsafe {
                column.drop_range(self.count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use colonnade_macros::Component;

    use crate::ecs::world;

    use super::*;

    #[derive(Component, Default, Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Component, Default, Debug, PartialEq)]
    struct Health(i32);

    fn test_entity(index: u32) -> Entity {
        Entity::new(world::Id::new(1), index, 0)
    }

    fn table_of(registry: &TypeRegistry, ids: &[TypeId]) -> Table {
        let mut signature = Signature::new();
        for &id in ids {
            signature.add(id);
        }
        Table::new(signature, registry)
    }

    #[test]
    fn new_table_is_empty_with_floor_capacity() {
        // Given
        let registry = TypeRegistry::new();
        let pos = registry.id_of::<Position>();
        let hp = registry.id_of::<Health>();

        // When
        let table = table_of(&registry, &[pos, hp]);

        // Then
        assert_eq!(table.count(), 0);
        assert_eq!(table.capacity(), MIN_CAPACITY);
        assert!(table.has_column(pos));
        assert!(table.has_column(hp));
    }

    #[test]
    fn push_default_row_initializes_every_column() {
        // Given
        let registry = TypeRegistry::new();
        let pos = registry.id_of::<Position>();
        let hp = registry.id_of::<Health>();
        let mut table = table_of(&registry, &[pos, hp]);

        // When
        let row = table.push_default_row(test_entity(1));

        // Then
        assert_eq!(row.index(), 0);
        assert_eq!(table.count(), 1);
        assert_eq!(table.component_slice::<Position>(pos).unwrap()[0], Position::default());
        assert_eq!(table.component_slice::<Health>(hp).unwrap()[0], Health(0));
    }

    #[test]
    fn capacity_doubles_past_the_floor() {
        // Given
        let registry = TypeRegistry::new();
        let hp = registry.id_of::<Health>();
        let mut table = table_of(&registry, &[hp]);

        // When - fill past the initial capacity
        for i in 0..9 {
            table.push_default_row(test_entity(i + 1));
        }

        // Then
        assert_eq!(table.count(), 9);
        assert_eq!(table.capacity(), 16);
    }

    #[test]
    fn swap_remove_moves_the_last_entity_in() {
        // Given
        let registry = TypeRegistry::new();
        let hp = registry.id_of::<Health>();
        let mut table = table_of(&registry, &[hp]);

        for i in 0..3 {
            let row = table.push_default_row(test_entity(i + 1));
            let position = table.column_position(hp).unwrap();
            unsafe {
                *table.column_mut(position).get_mut::<Health>(row.index()) = Health(i as i32);
            }
        }

        // When - remove the first row
        let moved = table.swap_remove_row(Row::new(0));

        // Then - the last entity now occupies row 0
        assert_eq!(moved, Some(test_entity(3)));
        assert_eq!(table.count(), 2);
        assert_eq!(table.entities()[0], test_entity(3));
        assert_eq!(table.component_slice::<Health>(hp).unwrap()[0], Health(2));

        // And When - removing the tail row moves nothing
        let moved = table.swap_remove_row(Row::new(1));
        assert_eq!(moved, None);
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn migrate_row_carries_shared_columns() {
        // Given - source {Health}, destination {Health, Position}
        let registry = TypeRegistry::new();
        let hp = registry.id_of::<Health>();
        let pos = registry.id_of::<Position>();
        let mut src = table_of(&registry, &[hp]);
        let mut dst = table_of(&registry, &[hp, pos]);

        let row = src.push_default_row(test_entity(1));
        let position = src.column_position(hp).unwrap();
        unsafe {
            *src.column_mut(position).get_mut::<Health>(row.index()) = Health(13);
        }

        // When
        let (dst_row, moved) = Table::migrate_row(&mut src, row, &mut dst);

        // Then - the health value traveled; the new Position cell is filled
        // by the caller, here with a default for inspection.
        assert_eq!(moved, None);
        assert_eq!(src.count(), 0);
        assert_eq!(dst.count(), 1);
        let pos_col = dst.column_position(pos).unwrap();
        unsafe {
            dst.column_mut(pos_col).write(dst_row.index(), Position::default());
        }
        assert_eq!(dst.component_slice::<Health>(hp).unwrap()[0], Health(13));
        assert_eq!(dst.entities()[0], test_entity(1));
    }

    #[test]
    fn shrink_to_fit_returns_to_the_smallest_power_of_two() {
        // Given
        let registry = TypeRegistry::new();
        let hp = registry.id_of::<Health>();
        let mut table = table_of(&registry, &[hp]);

        for i in 0..20 {
            table.push_default_row(test_entity(i + 1));
        }
        assert_eq!(table.capacity(), 32);

        // When - drop back down to 5 rows
        while table.count() > 5 {
            table.swap_remove_row(Row::new(0));
        }
        table.shrink_to_fit();

        // Then
        assert_eq!(table.capacity(), 8);
        assert_eq!(table.count(), 5);

        // And When - empty tables keep the floor capacity
        while table.count() > 0 {
            table.swap_remove_row(Row::new(0));
        }
        table.shrink_to_fit();
        assert_eq!(table.capacity(), MIN_CAPACITY);
    }

    #[test]
    fn values_are_dropped_with_the_table() {
        // Given
        use std::rc::Rc;

        #[derive(Component, Default, Clone)]
        struct Tracked(Option<Rc<()>>);

        let registry = TypeRegistry::new();
        let id = registry.id_of::<Tracked>();
        let mut table = table_of(&registry, &[id]);
        let token = Rc::new(());

        for i in 0..4 {
            let row = table.push_default_row(test_entity(i + 1));
            let position = table.column_position(id).unwrap();
            unsafe {
                *table.column_mut(position).get_mut::<Tracked>(row.index()) =
                    Tracked(Some(token.clone()));
            }
        }
        assert_eq!(Rc::strong_count(&token), 5);

        // When
        drop(table);

        // Then
        assert_eq!(Rc::strong_count(&token), 1);
    }
}
