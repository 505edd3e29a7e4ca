//! Canonical component type sets.
//!
//! A [`Signature`] is an order-insensitive set of component type ids stored in
//! non-increasing order so that equality and hashing are canonical. It is the
//! identity of an archetype: two entities live in the same archetype exactly
//! when their component type sets produce equal signatures.

use std::hash::{Hash, Hasher};

use crate::{
    all_tuples,
    ecs::component::{Component, TypeId, TypeRegistry},
};

/// The hash multiplier. Each id contributes `id * 53^(position + 1)`.
const HASH_BASE: u64 = 53;

/// A canonical, order-insensitive set of component type ids.
///
/// The backing array is kept in non-increasing order; [`Signature::add`] and
/// [`Signature::remove`] preserve that invariant, which keeps equality and
/// the hand-rolled polynomial hash canonical over id multisets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Signature {
    ids: Vec<TypeId>,
}

impl Signature {
    /// Create an empty signature.
    #[inline]
    pub const fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Remove every id from this signature.
    #[inline]
    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Insert an id, preserving non-increasing order.
    ///
    /// Walks the array carrying the incoming id; whenever the carried id is
    /// larger than the current slot it swaps in and continues carrying the
    /// smaller value. A carried id equal to a slot collapses as a duplicate,
    /// which makes `add` idempotent.
    pub fn add(&mut self, id: TypeId) {
        debug_assert!(!id.is_none(), "cannot add the reserved none id");
        let mut carry = id;
        for slot in self.ids.iter_mut() {
            if *slot == carry {
                return;
            }
            if carry > *slot {
                std::mem::swap(slot, &mut carry);
            }
        }
        self.ids.push(carry);
    }

    /// Remove an id, shifting later entries left. No-op if absent.
    pub fn remove(&mut self, id: TypeId) {
        if let Some(at) = self.ids.iter().position(|&slot| slot == id) {
            self.ids.remove(at);
        }
    }

    /// Determine if this signature contains the given id.
    #[inline]
    pub fn contains(&self, id: TypeId) -> bool {
        self.ids.contains(&id)
    }

    /// Determine if this signature contains every id in `other`.
    #[inline]
    pub fn has_all(&self, other: &Signature) -> bool {
        other.ids.iter().all(|&id| self.contains(id))
    }

    /// Determine if this signature contains any id in `other`.
    #[inline]
    pub fn has_any(&self, other: &Signature) -> bool {
        other.ids.iter().any(|&id| self.contains(id))
    }

    /// Replace this signature's contents with a copy of `other`.
    pub fn copy_from(&mut self, other: &Signature) {
        self.ids.clear();
        self.ids.extend_from_slice(&other.ids);
    }

    /// Get the ids in this signature, in non-increasing order.
    #[inline]
    pub fn ids(&self) -> &[TypeId] {
        &self.ids
    }

    /// The number of ids in this signature.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether this signature is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut hash: u64 = 0;
        let mut weight = HASH_BASE;
        for id in &self.ids {
            hash = hash.wrapping_add((id.raw() as u64).wrapping_mul(weight));
            weight = weight.wrapping_mul(HASH_BASE);
        }
        state.write_u64(hash);
    }
}

/// Trait for converting a type (or tuple of types) into a signature.
pub trait IntoSignature {
    /// Intern the covered component types and add their ids to `out`.
    fn write_signature(registry: &TypeRegistry, out: &mut Signature);

    /// Build a fresh signature for the covered component types.
    fn into_signature(registry: &TypeRegistry) -> Signature {
        let mut out = Signature::new();
        Self::write_signature(registry, &mut out);
        out
    }
}

/// [`IntoSignature`] implementation for the empty tuple.
impl IntoSignature for () {
    fn write_signature(_registry: &TypeRegistry, _out: &mut Signature) {}
}

/// [`IntoSignature`] implementation for single component types.
impl<C: Component> IntoSignature for C {
    fn write_signature(registry: &TypeRegistry, out: &mut Signature) {
        out.add(registry.id_of::<C>());
    }
}

/// [`IntoSignature`] implementation for tuples of other [`IntoSignature`] types.
macro_rules! tuple_signature {
    ($($name: ident),*) => {
        impl<$($name: IntoSignature),*> IntoSignature for ($($name,)*) {
            fn write_signature(registry: &TypeRegistry, out: &mut Signature) {
                $(
                    <$name>::write_signature(registry, out);
                )*
            }
        }
    }
}

// Implement the tuple -> Signature conversion for all tuples up to 26 elements.
all_tuples!(tuple_signature);

#[cfg(test)]
mod tests {
    use std::hash::{DefaultHasher, Hash, Hasher};

    use colonnade_macros::Component;

    use super::*;

    #[derive(Component, Default)]
    struct Comp1;
    #[derive(Component, Default)]
    struct Comp2;
    #[derive(Component, Default)]
    struct Comp3;

    fn hash_of(signature: &Signature) -> u64 {
        let mut hasher = DefaultHasher::new();
        signature.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn add_keeps_non_increasing_order() {
        // Given
        let mut signature = Signature::new();

        // When - inserted out of order
        signature.add(TypeId::new(2));
        signature.add(TypeId::new(5));
        signature.add(TypeId::new(3));
        signature.add(TypeId::new(1));

        // Then
        let raw: Vec<u32> = signature.ids().iter().map(|id| id.raw()).collect();
        assert_eq!(raw, vec![5, 3, 2, 1]);
    }

    #[test]
    fn add_is_idempotent() {
        // Given
        let mut signature = Signature::new();
        signature.add(TypeId::new(4));
        signature.add(TypeId::new(2));

        // When - duplicates, both at the head and mid-array
        signature.add(TypeId::new(4));
        signature.add(TypeId::new(2));

        // Then
        assert_eq!(signature.len(), 2);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        // Given
        let mut left = Signature::new();
        left.add(TypeId::new(1));
        left.add(TypeId::new(2));
        left.add(TypeId::new(3));

        let mut right = Signature::new();
        right.add(TypeId::new(3));
        right.add(TypeId::new(1));
        right.add(TypeId::new(2));

        // Then - equal and hash identically
        assert_eq!(left, right);
        assert_eq!(hash_of(&left), hash_of(&right));
    }

    #[test]
    fn different_sets_hash_differently() {
        let mut left = Signature::new();
        left.add(TypeId::new(1));

        let mut right = Signature::new();
        right.add(TypeId::new(2));

        assert_ne!(left, right);
        assert_ne!(hash_of(&left), hash_of(&right));
    }

    #[test]
    fn remove_shifts_left() {
        // Given
        let mut signature = Signature::new();
        signature.add(TypeId::new(5));
        signature.add(TypeId::new(3));
        signature.add(TypeId::new(1));

        // When
        signature.remove(TypeId::new(3));

        // Then
        let raw: Vec<u32> = signature.ids().iter().map(|id| id.raw()).collect();
        assert_eq!(raw, vec![5, 1]);

        // And When - removing an absent id is a no-op
        signature.remove(TypeId::new(3));
        assert_eq!(signature.len(), 2);
    }

    #[test]
    fn set_queries() {
        // Given
        let mut signature = Signature::new();
        signature.add(TypeId::new(1));
        signature.add(TypeId::new(2));
        signature.add(TypeId::new(3));

        let mut subset = Signature::new();
        subset.add(TypeId::new(1));
        subset.add(TypeId::new(3));

        let mut disjoint = Signature::new();
        disjoint.add(TypeId::new(9));

        // Then
        assert!(signature.contains(TypeId::new(2)));
        assert!(!signature.contains(TypeId::new(9)));
        assert!(signature.has_all(&subset));
        assert!(!subset.has_all(&signature));
        assert!(signature.has_any(&subset));
        assert!(!signature.has_any(&disjoint));
    }

    #[test]
    fn empty_signature_edge_cases() {
        let empty = Signature::new();
        let mut other = Signature::new();
        other.add(TypeId::new(1));

        // Every signature trivially has all of the empty set, and none of it.
        assert!(other.has_all(&empty));
        assert!(empty.has_all(&empty));
        assert!(!other.has_any(&empty));
        assert!(!empty.has_any(&other));
    }

    #[test]
    fn copy_from_replaces_contents() {
        // Given
        let mut source = Signature::new();
        source.add(TypeId::new(7));
        source.add(TypeId::new(4));

        let mut target = Signature::new();
        target.add(TypeId::new(1));

        // When
        target.copy_from(&source);

        // Then
        assert_eq!(target, source);
        assert_eq!(hash_of(&target), hash_of(&source));
    }

    #[test]
    fn tuple_conversion_is_canonical() {
        // Given
        let registry = TypeRegistry::new();

        // When - two orderings of the same type set
        let ab = <(Comp1, Comp2, Comp3)>::into_signature(&registry);
        let ba = <(Comp3, Comp1, Comp2)>::into_signature(&registry);

        // Then
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 3);
        assert!(ab.contains(registry.id_of::<Comp2>()));
    }

    #[test]
    fn unit_conversion_is_empty() {
        let registry = TypeRegistry::new();
        assert!(<()>::into_signature(&registry).is_empty());
    }
}
