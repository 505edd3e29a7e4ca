//! Runtime interning of component types.
//!
//! The registry assigns a stable small integer id to each distinct component
//! type it observes. Ids start at 1 and grow monotonically; 0 is reserved so
//! the storage layer can use it to mean "unused". Reads are lock-free via
//! `DashMap`; the rare first registration of a type takes a write lock.

use std::{
    alloc::Layout,
    any::TypeId as StdTypeId,
    ptr::NonNull,
    sync::{
        RwLock,
        atomic::{AtomicU32, Ordering},
    },
};

use dashmap::DashMap;

use crate::ecs::component::Component;

/// A unique identifier for a registered component type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u32);

impl TypeId {
    /// The reserved "no type" id. Never returned by the registry.
    pub(crate) const NONE: Self = Self(0);

    /// Construct an id from a raw value.
    #[inline]
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Whether this is the reserved "no type" id.
    #[inline]
    pub(crate) const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// Metadata about a registered component type.
///
/// Carries what type-erased storage needs: the memory layout, a drop
/// function, and a default-constructor used when a column cell must be
/// initialized without a caller-supplied value.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    /// The interned type id.
    id: TypeId,

    /// The Rust TypeId for runtime type checking.
    type_id: StdTypeId,

    /// The type name, for diagnostics.
    name: &'static str,

    /// The memory layout of the type.
    layout: Layout,

    /// The drop function for the type (may be a no-op).
    drop_fn: unsafe fn(NonNull<u8>),

    /// Writes `C::default()` into an uninitialized, properly aligned slot.
    default_fn: unsafe fn(NonNull<u8>),
}

impl TypeInfo {
    /// Construct TypeInfo for component type `C`.
    fn new<C: Component>(id: TypeId) -> Self {
        let drop_fn = if std::mem::needs_drop::<C>() {
            Self::drop_impl::<C>
        } else {
            Self::drop_noop
        };
        Self {
            id,
            type_id: StdTypeId::of::<C>(),
            name: std::any::type_name::<C>(),
            layout: Layout::new::<C>(),
            drop_fn,
            default_fn: Self::default_impl::<C>,
        }
    }

    /// Get the interned type id.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Get the Rust TypeId.
    #[inline]
    pub fn type_id(&self) -> StdTypeId {
        self.type_id
    }

    /// Get the type name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the memory layout.
    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Get the drop function.
    #[inline]
    pub(crate) fn drop_fn(&self) -> unsafe fn(NonNull<u8>) {
        self.drop_fn
    }

    /// Get the default-constructor function.
    #[inline]
    pub(crate) fn default_fn(&self) -> unsafe fn(NonNull<u8>) {
        self.default_fn
    }

    /// Drop implementation for types that need drop.
    unsafe fn drop_impl<C>(ptr: NonNull<u8>) {
        unsafe {
            std::ptr::drop_in_place(ptr.as_ptr() as *mut C);
        }
    }

    /// No-op drop for types that don't need drop.
    unsafe fn drop_noop(_ptr: NonNull<u8>) {}

    /// Write `C::default()` into the slot.
    unsafe fn default_impl<C: Component>(ptr: NonNull<u8>) {
        unsafe {
            ptr.as_ptr().cast::<C>().write(C::default());
        }
    }
}

/// Interns component types into stable integer ids.
///
/// Registration is idempotent: interning the same type twice returns the same
/// id. The registry never shrinks. Multiple worlds may share a registry (via
/// `Arc`) so their ids agree.
pub struct TypeRegistry {
    /// Map from Rust TypeId to interned id. Lock-free reads.
    type_map: DashMap<StdTypeId, TypeId>,

    /// Registered type metadata, indexed by `id - 1`. Writes are rare.
    infos: RwLock<Vec<TypeInfo>>,

    /// Next id to hand out. Starts at 1; 0 means "unused" downstream.
    next_id: AtomicU32,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create a new, empty type registry.
    pub fn new() -> Self {
        Self {
            type_map: DashMap::new(),
            infos: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Intern component type `C`, returning its id.
    ///
    /// Idempotent and monotonic: the first call for a type allocates the next
    /// id; every later call returns the same id.
    pub fn id_of<C: Component>(&self) -> TypeId {
        let key = StdTypeId::of::<C>();
        if let Some(id) = self.type_map.get(&key) {
            return *id;
        }

        let mut infos = self.infos.write().expect("type registry lock poisoned");
        // Re-check under the write lock: another thread may have won the race.
        if let Some(id) = self.type_map.get(&key) {
            return *id;
        }

        let id = TypeId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        infos.push(TypeInfo::new::<C>(id));
        self.type_map.insert(key, id);
        id
    }

    /// Get the metadata for a registered id, if any.
    pub fn info(&self, id: TypeId) -> Option<TypeInfo> {
        if id.is_none() {
            return None;
        }
        let infos = self.infos.read().expect("type registry lock poisoned");
        infos.get(id.raw() as usize - 1).copied()
    }

    /// The number of registered types.
    pub fn len(&self) -> usize {
        self.infos
            .read()
            .expect("type registry lock poisoned")
            .len()
    }

    /// Whether no types have been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use colonnade_macros::Component;

    use super::*;

    #[derive(Component, Default)]
    struct Comp1;

    #[derive(Component, Default)]
    struct Comp2;

    #[test]
    fn ids_start_at_one_and_grow() {
        // Given
        let registry = TypeRegistry::new();

        // When
        let id1 = registry.id_of::<Comp1>();
        let id2 = registry.id_of::<Comp2>();

        // Then
        assert_eq!(id1.raw(), 1);
        assert_eq!(id2.raw(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn interning_is_idempotent() {
        // Given
        let registry = TypeRegistry::new();

        // When
        let first = registry.id_of::<Comp1>();
        let second = registry.id_of::<Comp1>();

        // Then
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn info_round_trip() {
        // Given
        let registry = TypeRegistry::new();
        let id = registry.id_of::<Comp1>();

        // When
        let info = registry.info(id).unwrap();

        // Then
        assert_eq!(info.id(), id);
        assert_eq!(info.type_id(), StdTypeId::of::<Comp1>());
        assert_eq!(info.layout(), Layout::new::<Comp1>());
    }

    #[test]
    fn info_of_unknown_id_is_none() {
        let registry = TypeRegistry::new();
        assert!(registry.info(TypeId::NONE).is_none());
        assert!(registry.info(TypeId::new(7)).is_none());
    }
}
