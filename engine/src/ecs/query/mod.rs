//! Filtered views over archetypes.
//!
//! A [`Query`] pairs an include signature with an exclude signature and keeps
//! an incrementally maintained list of matching archetype slots. The cache is
//! keyed on the world's structure counter: when the counter moved, the match
//! list is rebuilt from scratch; when it did not, only slots beyond the last
//! scanned index (none, unless the query was just reset) are examined. A
//! matching archetype is one whose signature contains every included type and
//! none of the excluded ones.
//!
//! Iteration raises the world's deferral depth for the span of the loop, so
//! structural operations made inside the body (through the [`Deferred`]
//! handle passed to the closure) are queued and replayed after the loop
//! instead of invalidating the columns being walked.
//!
//! ```ignore
//! let mut query = Query::new();
//! query.has::<(Position, Velocity)>(&world).not::<Frozen>(&world);
//! query.for_each::<Position, _>(&mut world, |ops, entity, position| {
//!     if position.y < 0.0 {
//!         ops.destroy(entity);
//!     }
//! });
//! ```

use crate::ecs::{
    archetype::Archetype,
    component::{Component, IntoSignature, Signature},
    entity::Entity,
    world::{self, Deferred, World},
};

/// A lazily matched, include/exclude-filtered view over a world's
/// archetypes.
#[derive(Default)]
pub struct Query {
    /// Types a matching archetype must contain.
    include: Signature,

    /// Types a matching archetype must not contain.
    exclude: Signature,

    /// Cached matching archetype slots.
    matched: Vec<u32>,

    /// First directory slot not yet examined.
    last_scanned: usize,

    /// The structure counter value the cache was built against.
    observed: Option<u64>,

    /// The world the cache belongs to.
    world: Option<world::Id>,
}

impl Query {
    /// Create a query matching every archetype.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the component types of `S`. Resets the match cache.
    pub fn has<S: IntoSignature>(&mut self, world: &World) -> &mut Self {
        S::write_signature(world.registry(), &mut self.include);
        self.reset();
        self
    }

    /// Exclude the component types of `S`. Resets the match cache.
    pub fn not<S: IntoSignature>(&mut self, world: &World) -> &mut Self {
        S::write_signature(world.registry(), &mut self.exclude);
        self.reset();
        self
    }

    /// Clear both filters. Resets the match cache.
    pub fn clear(&mut self) -> &mut Self {
        self.include.clear();
        self.exclude.clear();
        self.reset();
        self
    }

    fn reset(&mut self) {
        self.matched.clear();
        self.last_scanned = 0;
        self.observed = None;
    }

    /// Bring the match cache up to date with the world's structure.
    fn refresh(&mut self, world: &World) {
        if self.world != Some(world.id()) {
            self.reset();
            self.world = Some(world.id());
        }
        let counter = world.structure_counter();
        if self.observed != Some(counter) {
            self.matched.clear();
            self.last_scanned = 0;
            self.observed = Some(counter);
        }
        let bound = world.archetypes.len();
        while self.last_scanned < bound {
            let slot = self.last_scanned as u32;
            self.last_scanned += 1;
            if let Some(table) = world.archetypes.table(slot) {
                let signature = table.signature();
                if signature.has_all(&self.include) && !signature.has_any(&self.exclude) {
                    self.matched.push(slot);
                }
            }
        }
    }

    /// The currently matching archetypes.
    pub fn matching(&mut self, world: &World) -> Vec<Archetype> {
        self.refresh(world);
        self.matched
            .iter()
            .map(|&slot| world.archetype_handle(slot))
            .collect()
    }

    /// The total number of entities in matching archetypes.
    pub fn entity_count(&mut self, world: &World) -> usize {
        self.refresh(world);
        self.matched
            .iter()
            .filter_map(|&slot| world.archetypes.table(slot))
            .map(|table| table.count())
            .sum()
    }

    /// Destroy every matching archetype. Structural: inside a deferral
    /// region the destruction itself is deferred.
    pub fn destroy_matching(&mut self, world: &mut World) {
        self.refresh(world);
        let handles: Vec<Archetype> = self
            .matched
            .iter()
            .map(|&slot| world.archetype_handle(slot))
            .collect();
        for archetype in handles {
            world.destroy_archetype(archetype);
        }
    }

    /// Iterate every matching entity, binding its `C` column cell mutably.
    ///
    /// The column pointer is resolved once per archetype; archetypes that do
    /// not store `C` are skipped (cannot happen while `C` is included, but
    /// the driver guards anyway). The iteration visits exactly the rows
    /// present at loop entry: structural operations recorded through the
    /// [`Deferred`] handle take effect when the loop exits and the deferral
    /// drains.
    pub fn for_each<C: Component, F>(&mut self, world: &mut World, mut f: F)
    where
        F: FnMut(&mut Deferred<'_>, Entity, &mut C),
    {
        self.refresh(world);
        let component = world.registry().id_of::<C>();
        world.cache_structural_events(true);
        {
            let (archetypes, mut ops) = world.split_deferred();
            for &slot in &self.matched {
                let Some(table) = archetypes.table_mut(slot) else {
                    continue;
                };
                let Some(position) = table.column_position(component) else {
                    continue;
                };
                let count = table.count();
                let (entities, column) = table.entities_and_column_mut(position);
                for row in 0..count {
                    let entity = entities[row];
                    // SAFETY: row < count, and the column was resolved by
                    // C's type id.
                    let value = unsafe { column.get_mut::<C>(row) };
                    f(&mut ops, entity, value);
                }
            }
        }
        world.cache_structural_events(false);
    }

    /// Iterate every matching entity without binding a column.
    pub fn for_each_entity<F>(&mut self, world: &mut World, mut f: F)
    where
        F: FnMut(&mut Deferred<'_>, Entity),
    {
        self.refresh(world);
        world.cache_structural_events(true);
        {
            let (archetypes, mut ops) = world.split_deferred();
            for &slot in &self.matched {
                let Some(table) = archetypes.table(slot) else {
                    continue;
                };
                let count = table.count();
                for row in 0..count {
                    let entity = table.entities()[row];
                    f(&mut ops, entity);
                }
            }
        }
        world.cache_structural_events(false);
    }
}

#[cfg(test)]
mod tests {
    use colonnade_macros::Component;

    use super::*;

    #[derive(Component, Default, Debug, PartialEq, Clone, Copy)]
    struct Health(i32);

    #[derive(Component, Default, Debug, PartialEq, Clone, Copy)]
    struct Speed(f32);

    #[derive(Component, Default, Debug, PartialEq, Clone, Copy)]
    struct Frozen;

    #[derive(Component, Default, Debug, PartialEq, Clone, Copy)]
    struct DeltaTime(f32);

    #[test]
    fn include_and_exclude_filters_match_a_full_scan() {
        // Given - archetypes covering every combination
        let mut world = World::new("test");
        let plain = world.archetype::<Health>();
        let paired = world.archetype::<(Health, Speed)>();
        let frozen = world.archetype::<(Health, Speed, Frozen)>();
        let other = world.archetype::<Speed>();
        for archetype in [plain, paired, frozen, other] {
            world.create_entity(archetype);
        }

        // When
        let mut query = Query::new();
        query.has::<(Health, Speed)>(&world).not::<Frozen>(&world);
        let matching = query.matching(&world);

        // Then - exactly the archetypes a full scan would select
        assert_eq!(matching, vec![paired]);
        assert_eq!(query.entity_count(&world), 1);
    }

    #[test]
    fn empty_include_matches_everything_not_excluded() {
        // Given
        let mut world = World::new("test");
        let plain = world.archetype::<Health>();
        let frozen = world.archetype::<(Health, Frozen)>();
        world.create_entity(plain);
        world.create_entity(frozen);

        // When - no includes, one exclude
        let mut query = Query::new();
        query.not::<Frozen>(&world);

        // Then - the unfiltered archetype matches, the excluded one does not
        assert_eq!(query.matching(&world), vec![plain]);
    }

    #[test]
    fn match_cache_follows_structure_changes() {
        // Given - a query materialized before a new archetype appears
        let mut world = World::new("test");
        let first = world.archetype::<Health>();
        world.create_entity(first);

        let mut query = Query::new();
        query.has::<Health>(&world);
        assert_eq!(query.matching(&world).len(), 1);

        // When - a new matching archetype is created afterwards
        let second = world.archetype::<(Health, Speed)>();
        world.create_entity(second);

        // Then - the counter moved, so the cache rebuilds and sees it
        assert_eq!(query.matching(&world).len(), 2);

        // And When - an archetype is destroyed
        world.destroy_archetype(second);
        assert_eq!(query.matching(&world).len(), 1);
    }

    #[test]
    fn filter_mutation_resets_the_cache() {
        // Given
        let mut world = World::new("test");
        let plain = world.archetype::<Health>();
        world.create_entity(plain);
        let paired = world.archetype::<(Health, Frozen)>();
        world.create_entity(paired);

        let mut query = Query::new();
        query.has::<Health>(&world);
        assert_eq!(query.matching(&world).len(), 2);

        // When
        query.not::<Frozen>(&world);

        // Then
        assert_eq!(query.matching(&world).len(), 1);
    }

    #[test]
    fn for_each_visits_each_matching_row_once() {
        // Given - 100 entities with (Health = i, Speed = i / 2)
        let mut world = World::new("test");
        let archetype = world.archetype::<(Health, Speed)>();
        for i in 0..100 {
            let entity = world.create_entity(archetype);
            world.set(entity, Health(i));
            world.set(entity, Speed(i as f32 / 2.0));
        }

        // When - summing the Health column through the query
        let mut query = Query::new();
        query.has::<(Health, Speed)>(&world);
        let mut sum = 0;
        query.for_each::<Health, _>(&mut world, |_ops, _entity, health| {
            sum += health.0;
        });

        // Then
        assert_eq!(sum, 4950);
    }

    #[test]
    fn structural_sets_inside_for_each_are_deferred() {
        // Given - world data and one entity with Speed 0.0
        let mut world = World::new("test");
        world.set_data(DeltaTime(1.0));
        let archetype = world.archetype::<Speed>();
        let entity = world.create_entity(archetype);

        let mut query = Query::new();
        query.has::<Speed>(&world);

        // When - the body sets Speed(4.0) through the deferred handle
        let mut observed_inside = Vec::new();
        query.for_each::<Speed, _>(&mut world, |ops, entity, speed| {
            observed_inside.push(speed.0);
            ops.set(entity, Speed(4.0));
        });

        // Then - the loop body saw the pre-set value; the set applied after
        assert_eq!(observed_inside, vec![0.0]);
        assert_eq!(*world.try_get::<Speed>(entity).unwrap(), Speed(4.0));
    }

    #[test]
    fn deferred_creates_do_not_extend_the_running_loop() {
        // Given - two entities at loop entry
        let mut world = World::new("test");
        let archetype = world.archetype::<Health>();
        world.create_entity(archetype);
        world.create_entity(archetype);

        let mut query = Query::new();
        query.has::<Health>(&world);

        // When - every iteration creates another matching entity
        let mut iterations = 0;
        query.for_each::<Health, _>(&mut world, |ops, _entity, _health| {
            iterations += 1;
            ops.create_entity(archetype);
        });

        // Then - the loop ran exactly over the rows present at entry,
        // and the deferred creates landed afterwards
        assert_eq!(iterations, 2);
        assert_eq!(world.entity_count(), 4);
    }

    #[test]
    fn destroying_entities_inside_the_loop_is_safe() {
        // Given
        let mut world = World::new("test");
        let archetype = world.archetype::<Health>();
        let entities: Vec<Entity> = (0..5)
            .map(|i| {
                let entity = world.create_entity(archetype);
                world.set(entity, Health(i));
                entity
            })
            .collect();

        let mut query = Query::new();
        query.has::<Health>(&world);

        // When - destroy every even entity from inside the loop
        query.for_each::<Health, _>(&mut world, |ops, entity, health| {
            if health.0 % 2 == 0 {
                ops.destroy(entity);
            }
        });

        // Then
        assert_eq!(world.entity_count(), 2);
        assert!(!entities[0].is_valid(&world));
        assert!(entities[1].is_valid(&world));
    }

    #[test]
    fn for_each_entity_walks_matches_without_columns() {
        // Given
        let mut world = World::new("test");
        let archetype = world.archetype::<(Health, Frozen)>();
        for _ in 0..3 {
            world.create_entity(archetype);
        }

        let mut query = Query::new();
        query.has::<Frozen>(&world);

        // When
        let mut seen = 0;
        query.for_each_entity(&mut world, |_ops, entity| {
            assert!(entity.index() > 0);
            seen += 1;
        });

        // Then
        assert_eq!(seen, 3);
    }

    #[test]
    fn destroy_matching_removes_exactly_the_filtered_archetypes() {
        // Given
        let mut world = World::new("test");
        let doomed = world.archetype::<(Health, Frozen)>();
        let kept = world.archetype::<Health>();
        for _ in 0..3 {
            world.create_entity(doomed);
        }
        world.create_entity(kept);

        let mut query = Query::new();
        query.has::<Frozen>(&world);

        // When
        query.destroy_matching(&mut world);

        // Then
        assert!(!doomed.is_valid(&world));
        assert!(kept.is_valid(&world));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn queries_rebind_across_worlds() {
        // Given - the same query object used against two worlds sharing a
        // registry
        let mut first = World::new("first");
        let registry = first.registry().clone();
        let mut second = World::with_registry("second", registry);

        let in_first = first.archetype::<Health>();
        first.create_entity(in_first);

        let mut query = Query::new();
        query.has::<Health>(&first);
        assert_eq!(query.entity_count(&first), 1);

        // When - pointed at the other world
        let count = query.entity_count(&second);

        // Then - the cache rebound rather than reporting stale matches
        assert_eq!(count, 0);
        let in_second = second.archetype::<Health>();
        second.create_entity(in_second);
        assert_eq!(query.entity_count(&second), 1);
    }
}
