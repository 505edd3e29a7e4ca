use std::{
    alloc::{self, Layout},
    any::TypeId as StdTypeId,
    mem::ManuallyDrop,
    ptr::NonNull,
};

use crate::ecs::component::{Component, TypeInfo};

/// A single component value boxed behind its type-erased [`TypeInfo`].
///
/// Used at the two places a component value crosses a type-erasure boundary:
/// the per-type FIFO of pending deferred `set` values, and the capture of
/// removed values handed to remove listeners during entity destruction. The
/// allocation honors the component's alignment, and an unclaimed value is
/// dropped through its `drop_fn` when the `ErasedValue` goes away.
pub struct ErasedValue {
    ptr: NonNull<u8>,
    info: TypeInfo,
}

impl ErasedValue {
    /// Box a typed value.
    pub fn new<C: Component>(value: C, info: TypeInfo) -> Self {
        assert_eq!(
            info.type_id(),
            StdTypeId::of::<C>(),
            "erased value constructed with mismatched type info"
        );
        let ptr = allocate(&info);
        // SAFETY: the slot was just allocated with C's layout.
        unsafe {
            ptr.as_ptr().cast::<C>().write(value);
        }
        Self { ptr, info }
    }

    /// Capture a value by copying its bytes out of `src`. Ownership moves to
    /// the returned `ErasedValue`.
    ///
    /// # Safety
    /// - `src` points to an initialized value described by `info`
    /// - the source slot must not be dropped afterwards (retire it with a
    ///   no-drop removal)
    pub unsafe fn capture(src: NonNull<u8>, info: TypeInfo) -> Self {
        let ptr = allocate(&info);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), info.layout().size());
        }
        Self { ptr, info }
    }

    /// Pointer to the boxed value.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Move the value back out as its concrete type.
    ///
    /// # Panics
    /// Panics if `C` is not the boxed type.
    pub fn take<C: Component>(self) -> C {
        assert_eq!(
            self.info.type_id(),
            StdTypeId::of::<C>(),
            "erased value claimed as the wrong type"
        );
        let this = ManuallyDrop::new(self);
        // SAFETY: the slot holds an initialized C; the ManuallyDrop wrapper
        // suppresses the drop_fn, and only the allocation is released below.
        let value = unsafe { this.ptr.as_ptr().cast::<C>().read() };
        release(this.ptr, &this.info);
        value
    }
}

impl Drop for ErasedValue {
    fn drop(&mut self) {
        // SAFETY: the slot holds an initialized value of the described type.
        unsafe {
            (self.info.drop_fn())(self.ptr);
        }
        release(self.ptr, &self.info);
    }
}

fn allocate(info: &TypeInfo) -> NonNull<u8> {
    let layout = info.layout();
    if layout.size() == 0 {
        // SAFETY: alignment is never zero.
        return unsafe { NonNull::new_unchecked(layout.align() as *mut u8) };
    }
    // SAFETY: layout has non-zero size.
    let raw = unsafe { alloc::alloc(layout) };
    match NonNull::new(raw) {
        Some(ptr) => ptr,
        None => alloc::handle_alloc_error(layout),
    }
}

fn release(ptr: NonNull<u8>, info: &TypeInfo) {
    let layout: Layout = info.layout();
    if layout.size() != 0 {
        // SAFETY: ptr was allocated with this layout.
        unsafe {
            alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use colonnade_macros::Component;

    use crate::ecs::component::TypeRegistry;

    use super::*;

    #[derive(Component, Default, Debug, PartialEq)]
    struct Payload(u64);

    #[test]
    fn round_trip() {
        // Given
        let registry = TypeRegistry::new();
        let info = registry.info(registry.id_of::<Payload>()).unwrap();

        // When
        let boxed = ErasedValue::new(Payload(42), info);

        // Then
        assert_eq!(boxed.take::<Payload>(), Payload(42));
    }

    #[test]
    fn unclaimed_value_is_dropped() {
        // Given
        #[derive(Component, Default, Clone)]
        struct Tracked(Option<Rc<()>>);

        let registry = TypeRegistry::new();
        let info = registry.info(registry.id_of::<Tracked>()).unwrap();
        let token = Rc::new(());

        // When
        let boxed = ErasedValue::new(Tracked(Some(token.clone())), info);
        assert_eq!(Rc::strong_count(&token), 2);
        drop(boxed);

        // Then
        assert_eq!(Rc::strong_count(&token), 1);
    }

    #[test]
    #[should_panic(expected = "wrong type")]
    fn taking_the_wrong_type_panics() {
        #[derive(Component, Default)]
        struct Other;

        let registry = TypeRegistry::new();
        let info = registry.info(registry.id_of::<Payload>()).unwrap();
        let boxed = ErasedValue::new(Payload(1), info);
        let _ = boxed.take::<Other>();
    }
}
