//! Deferred structural commands.
//!
//! While a world's deferral depth is above zero (inside a query's `for_each`
//! or an explicit `cache_structural_events(true)` region), structural
//! operations append a command here instead of executing. The queue drains in
//! FIFO order when the depth returns to zero, so mutations made inside a loop
//! body cannot invalidate the columns the loop is walking.
//!
//! Commands stay type-erased: a deferred `set` records only the component
//! type id, and the value itself rides the per-type pending FIFO in the world
//! state. A deferred create carries the pre-allocated entity handle so the
//! caller can observe it before the archetype attachment happens at drain.

use crossbeam::queue::SegQueue;

use crate::ecs::{archetype::Archetype, component::TypeId, entity::Entity};

/// A deferred structural operation.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    /// Attach a pre-allocated entity to its archetype.
    Create {
        /// The pre-allocated entity handle, already observable to callers.
        entity: Entity,
        /// The archetype to attach to. Checked again at drain time.
        archetype: Archetype,
    },

    /// Apply the next pending set value of the given type to the entity.
    Set {
        /// The target entity.
        entity: Entity,
        /// The component type whose pending FIFO holds the value.
        type_id: TypeId,
    },

    /// Remove a component from the entity.
    Remove {
        /// The target entity.
        entity: Entity,
        /// The component type to remove.
        type_id: TypeId,
    },

    /// Destroy the entity.
    Destroy {
        /// The target entity.
        entity: Entity,
    },

    /// Destroy the archetype and everything in it.
    DestroyArchetype {
        /// The target archetype.
        archetype: Archetype,
    },

    /// Re-shrink the archetype's backing arrays.
    ResizeBacking {
        /// The target archetype.
        archetype: Archetype,
    },
}

/// FIFO of deferred structural commands.
///
/// Backed by a lock-free queue so enqueueing needs only `&self`; that is what
/// lets the deferred-operations handle coexist with the column borrows a
/// query iteration holds.
#[derive(Default)]
pub struct CommandQueue {
    commands: SegQueue<Command>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            commands: SegQueue::new(),
        }
    }

    /// Append a command.
    #[inline]
    pub fn push(&self, command: Command) {
        self.commands.push(command);
    }

    /// Pop the oldest command, if any.
    #[inline]
    pub fn pop(&self) -> Option<Command> {
        self.commands.pop()
    }

    /// Whether the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The number of queued commands.
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_drain_in_fifo_order() {
        // Given
        let queue = CommandQueue::new();
        let entity = Entity::default();

        // When
        queue.push(Command::Destroy { entity });
        queue.push(Command::Set {
            entity,
            type_id: TypeId::new(1),
        });

        // Then
        assert_eq!(queue.len(), 2);
        assert!(matches!(queue.pop(), Some(Command::Destroy { .. })));
        assert!(matches!(queue.pop(), Some(Command::Set { .. })));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }
}
