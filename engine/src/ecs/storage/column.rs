use std::{
    alloc::{self, Layout},
    any::TypeId as StdTypeId,
    ptr::{self, NonNull},
};

use crate::ecs::component::{Component, TypeInfo};

/// A type-erased, contiguous buffer for one component type.
///
/// Unlike `Vec<T>`, a column does not track its own length: the owning table
/// holds a single `count`/`capacity` pair shared by every column (and the
/// entity array), so all of them stay row-synchronized by construction. The
/// column only knows its element [`TypeInfo`] and mirrors the capacity it was
/// grown to so it can release its allocation on drop.
///
/// # Safety
/// The owning table maintains the invariants this type relies on:
/// - rows `[0, count)` are initialized, rows `[count, capacity)` are not
/// - elements are only accessed as the type described by `info`
/// - values are dropped exactly once (here via [`Column::swap_remove`] /
///   [`Column::drop_range`], or moved out with the `no_drop` variants)
pub struct Column {
    /// Start of the allocation (dangling for zero-sized types).
    data: NonNull<u8>,

    /// Number of element slots allocated. Kept in sync with the table.
    capacity: usize,

    /// Layout, drop and default functions for the element type.
    info: TypeInfo,
}

impl Column {
    /// Create a column with the given initial capacity.
    pub fn new(info: TypeInfo, capacity: usize) -> Self {
        let data = if info.layout().size() == 0 || capacity == 0 {
            dangling(info.layout())
        } else {
            let layout = array_layout(&info, capacity);
            // SAFETY: layout has non-zero size.
            let raw = unsafe { alloc::alloc(layout) };
            match NonNull::new(raw) {
                Some(ptr) => ptr,
                None => alloc::handle_alloc_error(layout),
            }
        };
        Self {
            data,
            capacity,
            info,
        }
    }

    /// Get the element type info.
    #[inline]
    pub fn info(&self) -> &TypeInfo {
        &self.info
    }

    /// Get the number of element slots allocated.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get a pointer to the element slot at `row`.
    ///
    /// The slot may be uninitialized; the pointer is always in-bounds for
    /// `row < capacity` (and dangling-but-aligned for zero-sized types).
    #[inline]
    pub fn ptr_at(&self, row: usize) -> NonNull<u8> {
        debug_assert!(row < self.capacity || self.info.layout().size() == 0);
        // SAFETY: row is within the allocation, so the offset cannot wrap.
        unsafe { NonNull::new_unchecked(self.data.as_ptr().add(row * self.info.layout().size())) }
    }

    /// Grow the allocation to hold `new_capacity` elements, preserving
    /// contents. No-op if the column already has that capacity.
    pub fn grow(&mut self, new_capacity: usize) {
        if new_capacity <= self.capacity {
            return;
        }
        self.realloc(new_capacity);
    }

    /// Shrink the allocation to `new_capacity` elements.
    ///
    /// # Safety
    /// The caller must ensure every initialized row is `< new_capacity`.
    pub unsafe fn shrink(&mut self, new_capacity: usize) {
        if new_capacity >= self.capacity {
            return;
        }
        self.realloc(new_capacity);
    }

    fn realloc(&mut self, new_capacity: usize) {
        let size = self.info.layout().size();
        if size == 0 {
            self.capacity = new_capacity;
            return;
        }
        let new_layout = array_layout(&self.info, new_capacity);
        let raw = if self.capacity == 0 {
            // SAFETY: new_layout has non-zero size.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = array_layout(&self.info, self.capacity);
            // SAFETY: data was allocated with old_layout; new size is non-zero.
            unsafe { alloc::realloc(self.data.as_ptr(), old_layout, new_layout.size()) }
        };
        self.data = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.capacity = new_capacity;
    }

    /// Ensure the type `C` matches this column's element type.
    ///
    /// # Panics
    /// Panics on mismatch. This is an internal invariant violation, not a
    /// recoverable condition.
    #[inline]
    pub fn ensure_type<C: Component>(&self) {
        assert!(
            StdTypeId::of::<C>() == self.info.type_id(),
            "type mismatch: attempted to use {} with a column storing {}",
            std::any::type_name::<C>(),
            self.info.name(),
        );
    }

    /// Write a value into the (possibly uninitialized) slot at `row`.
    ///
    /// # Safety
    /// - `row < capacity`
    /// - the slot must not hold an initialized value (it would leak)
    pub unsafe fn write<C: Component>(&mut self, row: usize, value: C) {
        self.ensure_type::<C>();
        unsafe {
            self.ptr_at(row).as_ptr().cast::<C>().write(value);
        }
    }

    /// Default-construct a value into the (uninitialized) slot at `row`.
    ///
    /// # Safety
    /// Same contract as [`Column::write`].
    pub unsafe fn write_default(&mut self, row: usize) {
        unsafe {
            (self.info.default_fn())(self.ptr_at(row));
        }
    }

    /// Replace the initialized value at `row`, returning the old value.
    ///
    /// # Safety
    /// - `row` must hold an initialized value of type `C`
    pub unsafe fn replace<C: Component>(&mut self, row: usize, value: C) -> C {
        self.ensure_type::<C>();
        unsafe { ptr::replace(self.ptr_at(row).as_ptr().cast::<C>(), value) }
    }

    /// Move the value out of the slot at `row`, leaving it uninitialized.
    ///
    /// # Safety
    /// - `row` must hold an initialized value of type `C`
    /// - the slot must not be read or dropped again until rewritten
    pub unsafe fn read<C: Component>(&mut self, row: usize) -> C {
        self.ensure_type::<C>();
        unsafe { self.ptr_at(row).as_ptr().cast::<C>().read() }
    }

    /// Get a reference to the initialized value at `row`.
    ///
    /// # Safety
    /// - `row` must hold an initialized value of type `C`
    pub unsafe fn get<C: Component>(&self, row: usize) -> &C {
        self.ensure_type::<C>();
        unsafe { &*self.ptr_at(row).as_ptr().cast::<C>() }
    }

    /// Get a mutable reference to the initialized value at `row`.
    ///
    /// # Safety
    /// - `row` must hold an initialized value of type `C`
    pub unsafe fn get_mut<C: Component>(&mut self, row: usize) -> &mut C {
        self.ensure_type::<C>();
        unsafe { &mut *self.ptr_at(row).as_ptr().cast::<C>() }
    }

    /// View the initialized prefix of the column as a slice.
    ///
    /// # Safety
    /// - rows `[0, count)` must be initialized values of type `C`
    pub unsafe fn as_slice<C: Component>(&self, count: usize) -> &[C] {
        self.ensure_type::<C>();
        unsafe { std::slice::from_raw_parts(self.ptr_at(0).as_ptr().cast::<C>(), count) }
    }

    /// Copy the raw bytes of `row` into `dst` at `dst_row`. Ownership of the
    /// value transfers to `dst`; the source slot must then be retired with
    /// [`Column::swap_remove_no_drop`].
    ///
    /// # Safety
    /// - both rows are in-bounds, the source row initialized, the
    ///   destination row uninitialized
    /// - both columns store the same component type
    pub unsafe fn copy_row_to(&self, row: usize, dst: &mut Column, dst_row: usize) {
        debug_assert_eq!(self.info.id(), dst.info.id(), "cross-type column copy");
        unsafe {
            ptr::copy_nonoverlapping(
                self.ptr_at(row).as_ptr(),
                dst.ptr_at(dst_row).as_ptr(),
                self.info.layout().size(),
            );
        }
    }

    /// Remove the value at `row` by overwriting it with the value at
    /// `count - 1`, dropping the removed value.
    ///
    /// # Safety
    /// - `row < count` and rows `[0, count)` are initialized
    pub unsafe fn swap_remove(&mut self, row: usize, count: usize) {
        debug_assert!(row < count);
        unsafe {
            (self.info.drop_fn())(self.ptr_at(row));
            self.move_last_into(row, count);
        }
    }

    /// Remove the slot at `row` by overwriting it with the value at
    /// `count - 1`, without dropping. Used when the value was already moved
    /// out (migration, typed read-out).
    ///
    /// # Safety
    /// - `row < count`, rows other than `row` in `[0, count)` initialized
    pub unsafe fn swap_remove_no_drop(&mut self, row: usize, count: usize) {
        debug_assert!(row < count);
        unsafe {
            self.move_last_into(row, count);
        }
    }

    /// Drop every initialized value in `[0, count)`.
    ///
    /// # Safety
    /// - rows `[0, count)` are initialized; they must not be used afterwards
    pub unsafe fn drop_range(&mut self, count: usize) {
        for row in 0..count {
            unsafe {
                (self.info.drop_fn())(self.ptr_at(row));
            }
        }
    }

    /// Overwrite `row` with the bytes of the last initialized row.
    unsafe fn move_last_into(&mut self, row: usize, count: usize) {
        let last = count - 1;
        if row != last {
            unsafe {
                ptr::copy_nonoverlapping(
                    self.ptr_at(last).as_ptr(),
                    self.ptr_at(row).as_ptr(),
                    self.info.layout().size(),
                );
            }
        }
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        // The owning table drops the initialized values; only the allocation
        // is released here.
        if self.info.layout().size() != 0 && self.capacity != 0 {
            let layout = array_layout(&self.info, self.capacity);
            // SAFETY: data was allocated with this layout.
            unsafe {
                alloc::dealloc(self.data.as_ptr(), layout);
            }
        }
    }
}

/// Layout of `capacity` contiguous elements.
fn array_layout(info: &TypeInfo, capacity: usize) -> Layout {
    let size = info
        .layout()
        .size()
        .checked_mul(capacity)
        .expect("column byte size overflow");
    Layout::from_size_align(size, info.layout().align()).expect("invalid column layout")
}

/// An aligned dangling pointer for empty or zero-sized allocations.
fn dangling(layout: Layout) -> NonNull<u8> {
    // SAFETY: alignment is never zero.
    unsafe { NonNull::new_unchecked(layout.align() as *mut u8) }
}
