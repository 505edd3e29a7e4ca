use crate::ecs::component::{Signature, TypeId};

/// A fixed-size open-addressed map from component type id to column slot.
///
/// The table is exactly as large as the signature (minimum one slot), so the
/// fill algorithm builds a perfect closed-address layout: ids that land on a
/// free home slot are placed directly, and the rest are chained through the
/// `next` links into whatever slots remain. Lookups probe `id % size` and
/// follow the chain, which is O(1) expected because ids are densely allocated
/// from a monotonic counter.
///
/// Column slot `i` of the owning table stores the component type recorded in
/// index slot `i`, so a successful lookup doubles as the column position.
pub struct ColumnIndex {
    slots: Box<[IndexSlot]>,
}

#[derive(Debug, Clone)]
struct IndexSlot {
    /// The component type id placed in this slot, or `TypeId::NONE`.
    type_id: TypeId,

    /// Index of the next slot in this probe chain, or -1.
    next: i32,
}

impl ColumnIndex {
    /// Build the index for a signature.
    pub fn new(signature: &Signature) -> Self {
        let size = signature.len().max(1);
        let mut slots = vec![
            IndexSlot {
                type_id: TypeId::NONE,
                next: -1,
            };
            size
        ]
        .into_boxed_slice();

        // Pass 1: place ids whose home slot is free.
        for &id in signature.ids() {
            let home = id.raw() as usize % size;
            if slots[home].type_id.is_none() {
                slots[home].type_id = id;
            }
        }

        // Pass 2: chain the displaced ids into the remaining free slots.
        for &id in signature.ids() {
            let home = id.raw() as usize % size;
            if slots[home].type_id == id {
                continue;
            }
            // Walk the home chain to its tail.
            let mut tail = home;
            while slots[tail].next >= 0 {
                tail = slots[tail].next as usize;
            }
            // Claim the first free slot and link it from the tail.
            let free = slots
                .iter()
                .position(|slot| slot.type_id.is_none())
                .expect("column index fill ran out of slots");
            slots[free].type_id = id;
            slots[tail].next = free as i32;
        }

        Self { slots }
    }

    /// Find the column slot for a type id.
    #[inline]
    pub fn position(&self, id: TypeId) -> Option<usize> {
        let size = self.slots.len();
        let mut at = id.raw() as usize % size;
        let mut probes = 0;
        loop {
            let slot = &self.slots[at];
            if slot.type_id == id {
                return Some(at);
            }
            if slot.next < 0 {
                return None;
            }
            at = slot.next as usize;
            probes += 1;
            debug_assert!(probes < size, "column index chain cycled");
        }
    }

    /// Whether the index contains a type id.
    #[inline]
    pub fn contains(&self, id: TypeId) -> bool {
        self.position(id).is_some()
    }

    /// The number of slots (equals the table's column count for non-empty
    /// signatures).
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// The type id stored in a slot (`TypeId::NONE` when unused).
    #[inline]
    pub fn slot_type(&self, slot: usize) -> TypeId {
        self.slots[slot].type_id
    }
}
