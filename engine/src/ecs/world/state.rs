//! Per-component-type world state.
//!
//! Each component type a world has seen gets one [`PerTypeState`] entry
//! holding everything the world scopes by type: the optional world data
//! singleton, the set/remove listener slots, the FIFO of pending deferred
//! `set` values, and the erased dispatch shims installed by the monomorphic
//! call sites. The `has_*` flags let hot structural paths skip listener and
//! capture work entirely when nothing is registered.

use std::{any::Any, collections::VecDeque, ptr::NonNull};

use crate::ecs::{
    component::{Component, TypeId},
    entity::Entity,
    storage::ErasedValue,
    world::World,
};

/// A set listener in one of its three shapes.
///
/// Listeners observe the post-mutation state: the `&mut C` they receive is
/// live in its column. On a set that migrated the entity into the column,
/// the old value is `C::default()`.
pub enum SetListener<C: Component> {
    /// Observes the new value only.
    Value(Box<dyn FnMut(&mut C)>),

    /// Observes the entity and the new value.
    WithEntity(Box<dyn FnMut(Entity, &mut C)>),

    /// Observes the entity, the old value, and the new value.
    Full(Box<dyn FnMut(Entity, &C, &mut C)>),
}

/// A remove listener in one of its two shapes.
///
/// Listeners observe the pre-mutation value; storage is already consistent
/// when they run.
pub enum RemoveListener<C: Component> {
    /// Observes the removed value only.
    Value(Box<dyn FnMut(&C)>),

    /// Observes the entity and the removed value.
    WithEntity(Box<dyn FnMut(Entity, &C)>),
}

/// Identifies one of the set listener slots for unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetShape {
    /// The value-only slot.
    Value,
    /// The entity + value slot.
    WithEntity,
    /// The full old/new slot.
    Full,
}

/// Identifies one of the remove listener slots for unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveShape {
    /// The value-only slot.
    Value,
    /// The entity + value slot.
    WithEntity,
}

/// Applies a deferred operation for a concrete component type.
pub(crate) type ApplyFn = fn(&mut World, Entity);

/// Invokes the remove listeners against an erased value pointer.
pub(crate) type InvokeRemoveFn = unsafe fn(&mut PerTypeState, Entity, NonNull<u8>);

/// World-scoped state for one component type.
#[derive(Default)]
pub(crate) struct PerTypeState {
    /// The world data singleton for this type, if set.
    pub data: Option<Box<dyn Any>>,

    /// Set listener slots, erased. Each holds a `Box<dyn FnMut(..)>` for the
    /// concrete component type behind a `Box<dyn Any>`.
    set_value: Option<Box<dyn Any>>,
    set_with_entity: Option<Box<dyn Any>>,
    set_full: Option<Box<dyn Any>>,

    /// Remove listener slots, erased the same way.
    remove_value: Option<Box<dyn Any>>,
    remove_with_entity: Option<Box<dyn Any>>,

    /// Fast flags consulted on the hot structural paths.
    pub has_set_listeners: bool,
    pub has_remove_listeners: bool,

    /// Pending values for deferred sets of this type, oldest first.
    pub pending: VecDeque<ErasedValue>,

    /// Applies the front pending value as a set. Installed on first deferral.
    pub apply_set: Option<ApplyFn>,

    /// Applies a deferred remove. Installed on first deferral.
    pub apply_remove: Option<ApplyFn>,

    /// Erased remove-listener dispatch. Installed with the first remove
    /// listener, so untyped paths (destroy, archetype teardown) can fire
    /// listeners without knowing the component type.
    pub invoke_remove: Option<InvokeRemoveFn>,
}

impl PerTypeState {
    /// Install a set listener into its shape's slot.
    pub fn install_set<C: Component>(&mut self, listener: SetListener<C>) {
        match listener {
            SetListener::Value(f) => self.set_value = Some(Box::new(f)),
            SetListener::WithEntity(f) => self.set_with_entity = Some(Box::new(f)),
            SetListener::Full(f) => self.set_full = Some(Box::new(f)),
        }
        self.has_set_listeners = true;
    }

    /// Clear one set listener slot.
    pub fn clear_set(&mut self, shape: SetShape) {
        match shape {
            SetShape::Value => self.set_value = None,
            SetShape::WithEntity => self.set_with_entity = None,
            SetShape::Full => self.set_full = None,
        }
        self.has_set_listeners =
            self.set_value.is_some() || self.set_with_entity.is_some() || self.set_full.is_some();
    }

    /// Install a remove listener into its shape's slot.
    pub fn install_remove<C: Component>(&mut self, listener: RemoveListener<C>) {
        match listener {
            RemoveListener::Value(f) => self.remove_value = Some(Box::new(f)),
            RemoveListener::WithEntity(f) => self.remove_with_entity = Some(Box::new(f)),
        }
        self.has_remove_listeners = true;
        self.invoke_remove = Some(invoke_remove_shim::<C>);
    }

    /// Clear one remove listener slot.
    pub fn clear_remove(&mut self, shape: RemoveShape) {
        match shape {
            RemoveShape::Value => self.remove_value = None,
            RemoveShape::WithEntity => self.remove_with_entity = None,
        }
        self.has_remove_listeners =
            self.remove_value.is_some() || self.remove_with_entity.is_some();
        if !self.has_remove_listeners {
            self.invoke_remove = None;
        }
    }

    /// Invoke the registered set listeners. The new value is live in its
    /// column; `old` is the replaced (or default) value.
    pub fn invoke_set<C: Component>(&mut self, entity: Entity, old: &C, new: &mut C) {
        if let Some(slot) = self.set_value.as_mut() {
            if let Some(listener) = slot.downcast_mut::<Box<dyn FnMut(&mut C)>>() {
                listener(new);
            }
        }
        if let Some(slot) = self.set_with_entity.as_mut() {
            if let Some(listener) = slot.downcast_mut::<Box<dyn FnMut(Entity, &mut C)>>() {
                listener(entity, new);
            }
        }
        if let Some(slot) = self.set_full.as_mut() {
            if let Some(listener) = slot.downcast_mut::<Box<dyn FnMut(Entity, &C, &mut C)>>() {
                listener(entity, old, new);
            }
        }
    }

    /// Invoke the registered remove listeners with the removed value.
    pub fn invoke_remove_typed<C: Component>(&mut self, entity: Entity, value: &C) {
        if let Some(slot) = self.remove_value.as_mut() {
            if let Some(listener) = slot.downcast_mut::<Box<dyn FnMut(&C)>>() {
                listener(value);
            }
        }
        if let Some(slot) = self.remove_with_entity.as_mut() {
            if let Some(listener) = slot.downcast_mut::<Box<dyn FnMut(Entity, &C)>>() {
                listener(entity, value);
            }
        }
    }
}

/// The erased remove dispatch for component type `C`. Owns the downcast, so
/// destroy paths never need the concrete type.
///
/// # Safety
/// `value` must point to an initialized `C`.
unsafe fn invoke_remove_shim<C: Component>(
    state: &mut PerTypeState,
    entity: Entity,
    value: NonNull<u8>,
) {
    let value = unsafe { value.cast::<C>().as_ref() };
    state.invoke_remove_typed(entity, value);
}

/// The per-type state table, indexed by component type id.
pub(crate) struct PerTypeStates {
    /// States indexed by raw type id. Slot 0 is unused (ids start at 1).
    states: Vec<PerTypeState>,
}

impl PerTypeStates {
    /// Create an empty table.
    pub fn new() -> Self {
        Self { states: Vec::new() }
    }

    /// Get the state for a type id, creating the entry on first use.
    pub fn state_mut(&mut self, id: TypeId) -> &mut PerTypeState {
        let index = id.raw() as usize;
        if index >= self.states.len() {
            self.states.resize_with(index + 1, PerTypeState::default);
        }
        &mut self.states[index]
    }

    /// Get the state for a type id, if one has been created.
    #[inline]
    pub fn state(&self, id: TypeId) -> Option<&PerTypeState> {
        self.states.get(id.raw() as usize)
    }

    /// Whether the type has any set listeners registered.
    #[inline]
    pub fn has_set(&self, id: TypeId) -> bool {
        self.state(id).is_some_and(|s| s.has_set_listeners)
    }

    /// Whether the type has any remove listeners registered.
    #[inline]
    pub fn has_remove(&self, id: TypeId) -> bool {
        self.state(id).is_some_and(|s| s.has_remove_listeners)
    }

    /// Invoke set listeners for `id`, which must be the id of `C`.
    pub fn invoke_set<C: Component>(&mut self, id: TypeId, entity: Entity, old: &C, new: &mut C) {
        self.state_mut(id).invoke_set(entity, old, new);
    }

    /// Invoke remove listeners for `id`, which must be the id of `C`.
    pub fn invoke_remove_typed<C: Component>(&mut self, id: TypeId, entity: Entity, value: &C) {
        self.state_mut(id).invoke_remove_typed(entity, value);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use colonnade_macros::Component;

    use super::*;

    #[derive(Component, Default, Debug, PartialEq, Clone, Copy)]
    struct Health(i32);

    #[test]
    fn set_listeners_fire_per_shape() {
        // Given
        let mut state = PerTypeState::default();
        let seen = Rc::new(Cell::new(0));

        let by_value = seen.clone();
        state.install_set::<Health>(SetListener::Value(Box::new(move |new| {
            assert_eq!(*new, Health(5));
            by_value.set(by_value.get() + 1);
        })));
        let by_full = seen.clone();
        state.install_set::<Health>(SetListener::Full(Box::new(move |_entity, old, new| {
            assert_eq!(*old, Health(1));
            assert_eq!(*new, Health(5));
            by_full.set(by_full.get() + 10);
        })));

        // When
        let mut new = Health(5);
        state.invoke_set(Entity::default(), &Health(1), &mut new);

        // Then - both registered shapes fired once
        assert_eq!(seen.get(), 11);
    }

    #[test]
    fn cleared_shapes_stop_firing_and_flags_follow() {
        // Given
        let mut state = PerTypeState::default();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        state.install_remove::<Health>(RemoveListener::Value(Box::new(move |_| {
            counter.set(counter.get() + 1);
        })));
        assert!(state.has_remove_listeners);

        // When
        state.clear_remove(RemoveShape::Value);
        state.invoke_remove_typed(Entity::default(), &Health(2));

        // Then
        assert_eq!(count.get(), 0);
        assert!(!state.has_remove_listeners);
        assert!(state.invoke_remove.is_none());
    }

    #[test]
    fn erased_remove_dispatch_reaches_the_typed_listener() {
        // Given
        let mut state = PerTypeState::default();
        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        state.install_remove::<Health>(RemoveListener::Value(Box::new(move |value| {
            sink.set(value.0);
        })));

        // When - dispatch through the erased shim, as destroy paths do
        let invoke = state.invoke_remove.unwrap();
        let value = Health(42);
        unsafe {
            invoke(
                &mut state,
                Entity::default(),
                NonNull::from(&value).cast::<u8>(),
            );
        }

        // Then
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn states_grow_on_demand() {
        // Given
        let mut states = PerTypeStates::new();
        let id = TypeId::new(5);

        // Then - nothing allocated yet
        assert!(states.state(id).is_none());
        assert!(!states.has_set(id));

        // When
        states.state_mut(id).has_set_listeners = true;

        // Then
        assert!(states.has_set(id));
        assert!(!states.has_remove(TypeId::new(2)));
    }
}
