//! Owning pointers for composites.
//!
//! `AlignedBox<T>` and `AlignedArray<T>` allocate through `T`'s entry points
//! and release through the matching sized entry point on drop, so the
//! resolved capability governs the whole lifetime of the object.

use crate::align::is_ptr_aligned;
use crate::dispatch::Composite;
use crate::error::AllocError;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, align_of, size_of};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

struct LayoutCheck<T>(PhantomData<T>);

impl<T: Composite> LayoutCheck<T> {
    const OK: () = assert!(
        align_of::<T>() <= T::REQUIRED_ALIGNMENT,
        "type is more aligned than its resolved capability"
    );
}

/// Hooks are trusted for the resolved alignment, but never below what `T`
/// itself needs.
fn checked_block<T: Composite>(block: Option<NonNull<u8>>, size: usize) -> Result<NonNull<T>, AllocError> {
    let block = block.ok_or(AllocError::OutOfMemory {
        size,
        alignment: T::REQUIRED_ALIGNMENT,
    })?;
    debug_assert!(
        is_ptr_aligned(block.as_ptr(), T::REQUIRED_ALIGNMENT),
        "allocator returned a block below the resolved alignment"
    );
    if !is_ptr_aligned(block.as_ptr(), align_of::<T>()) {
        return Err(AllocError::Misaligned {
            addr: block.as_ptr() as usize,
            alignment: align_of::<T>(),
        });
    }
    Ok(block.cast())
}

/// A single heap instance of a composite.
pub struct AlignedBox<T: Composite> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

// SAFETY: AlignedBox uniquely owns its T, like Box.
unsafe impl<T: Composite + Send> Send for AlignedBox<T> {}
unsafe impl<T: Composite + Sync> Sync for AlignedBox<T> {}

impl<T: Composite> AlignedBox<T> {
    pub fn new(value: T) -> Result<Self, AllocError> {
        let () = LayoutCheck::<T>::OK;
        let size = size_of::<T>();
        let ptr = if size == 0 {
            NonNull::dangling()
        } else {
            let block = T::allocate(size);
            match checked_block::<T>(block, size) {
                Ok(ptr) => ptr,
                Err(err) => {
                    if let Some(block) = block {
                        // SAFETY: block came from T::allocate just above.
                        unsafe { T::deallocate_sized(block.as_ptr(), size) };
                    }
                    return Err(err);
                }
            }
        };
        // SAFETY: ptr is valid for writes of one T and suitably aligned.
        unsafe { ptr.as_ptr().write(value) };
        Ok(Self {
            ptr,
            _owns: PhantomData,
        })
    }

    /// Address of the managed object.
    #[inline]
    pub fn as_ptr(this: &Self) -> *const T {
        this.ptr.as_ptr()
    }

    /// Give up ownership without dropping or freeing.
    pub fn into_raw(this: Self) -> *mut T {
        let ptr = this.ptr.as_ptr();
        mem::forget(this);
        ptr
    }

    /// # Safety
    /// `ptr` must come from [`AlignedBox::into_raw`] for the same `T`.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            ptr: NonNull::new_unchecked(ptr),
            _owns: PhantomData,
        }
    }

    /// Move the value out and release the allocation.
    pub fn into_inner(this: Self) -> T {
        let ptr = Self::into_raw(this);
        // SAFETY: ptr holds an initialized T that nothing else owns now.
        unsafe {
            let value = ptr::read(ptr);
            release_one::<T>(ptr);
            value
        }
    }
}

/// # Safety
/// `ptr` must come from `T::allocate` with `size_of::<T>()` bytes, or be
/// dangling for a zero-sized `T`.
unsafe fn release_one<T: Composite>(ptr: *mut T) {
    let size = size_of::<T>();
    if size != 0 {
        T::deallocate_sized(ptr.cast(), size);
    }
}

impl<T: Composite> Drop for AlignedBox<T> {
    fn drop(&mut self) {
        // SAFETY: we own an initialized T in a block from T::allocate.
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            release_one::<T>(self.ptr.as_ptr());
        }
    }
}

impl<T: Composite> Deref for AlignedBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: initialized and uniquely owned.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Composite> DerefMut for AlignedBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: initialized and uniquely owned.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: Composite + fmt::Debug> fmt::Debug for AlignedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// A fixed-length heap array of a composite, allocated through the array
/// entry points.
pub struct AlignedArray<T: Composite> {
    ptr: NonNull<T>,
    len: usize,
    _owns: PhantomData<T>,
}

// SAFETY: AlignedArray uniquely owns its elements, like Box<[T]>.
unsafe impl<T: Composite + Send> Send for AlignedArray<T> {}
unsafe impl<T: Composite + Sync> Sync for AlignedArray<T> {}

/// Drops the initialized prefix and frees the block if element
/// construction panics.
struct PartialArray<T: Composite> {
    ptr: NonNull<T>,
    initialized: usize,
    bytes: usize,
}

impl<T: Composite> Drop for PartialArray<T> {
    fn drop(&mut self) {
        // SAFETY: the first `initialized` slots were written by from_fn and
        // the block came from T::allocate_array with `bytes`.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.initialized));
            if self.bytes != 0 {
                T::deallocate_array_sized(self.ptr.as_ptr().cast(), self.bytes);
            }
        }
    }
}

impl<T: Composite> AlignedArray<T> {
    /// Build `len` elements with `f(index)`.
    pub fn from_fn(len: usize, mut f: impl FnMut(usize) -> T) -> Result<Self, AllocError> {
        let () = LayoutCheck::<T>::OK;
        let bytes = size_of::<T>()
            .checked_mul(len)
            .ok_or(AllocError::CapacityOverflow {
                len,
                elem_size: size_of::<T>(),
            })?;
        let ptr = if bytes == 0 {
            NonNull::dangling()
        } else {
            let block = T::allocate_array(bytes);
            match checked_block::<T>(block, bytes) {
                Ok(ptr) => ptr,
                Err(err) => {
                    if let Some(block) = block {
                        // SAFETY: block came from T::allocate_array just above.
                        unsafe { T::deallocate_array_sized(block.as_ptr(), bytes) };
                    }
                    return Err(err);
                }
            }
        };

        let mut guard = PartialArray::<T> {
            ptr,
            initialized: 0,
            bytes,
        };
        while guard.initialized < len {
            let value = f(guard.initialized);
            // SAFETY: index < len and the block holds len elements.
            unsafe { ptr.as_ptr().add(guard.initialized).write(value) };
            guard.initialized += 1;
        }
        mem::forget(guard);

        Ok(Self {
            ptr,
            len,
            _owns: PhantomData,
        })
    }

    pub fn filled(len: usize, value: T) -> Result<Self, AllocError>
    where
        T: Clone,
    {
        Self::from_fn(len, |_| value.clone())
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }
}

impl<T: Composite> Drop for AlignedArray<T> {
    fn drop(&mut self) {
        let bytes = size_of::<T>() * self.len;
        // SAFETY: `len` initialized elements in a block from allocate_array.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len));
            if bytes != 0 {
                T::deallocate_array_sized(self.ptr.as_ptr().cast(), bytes);
            }
        }
    }
}

impl<T: Composite> Deref for AlignedArray<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: `len` initialized elements, uniquely owned.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Composite> DerefMut for AlignedArray<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: `len` initialized elements, uniquely owned.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Composite + fmt::Debug> fmt::Debug for AlignedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AlignedBase, AllocHooks, SimdAligned};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Transform {
        m: [f32; 16],
    }
    crate::aligned_composite!(Transform: SimdAligned, AlignedBase<64>);

    #[test]
    fn boxed_value_lives_at_resolved_alignment() {
        let mut t = AlignedBox::new(Transform { m: [1.0; 16] }).unwrap();
        assert!(is_ptr_aligned(AlignedBox::as_ptr(&t), 64));
        t.m[3] = 4.0;
        assert_eq!(t.m[3], 4.0);
        let inner = AlignedBox::into_inner(t);
        assert_eq!(inner.m[0], 1.0);
    }

    #[test]
    fn raw_round_trip_keeps_ownership() {
        let b = AlignedBox::new(Transform { m: [2.0; 16] }).unwrap();
        let raw = AlignedBox::into_raw(b);
        let b = unsafe { AlignedBox::from_raw(raw) };
        assert_eq!(b.m[15], 2.0);
    }

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Tracked(#[allow(dead_code)] u64);
    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }
    crate::aligned_composite!(Tracked: SimdAligned);

    #[test]
    fn drops_contents() {
        drop(AlignedBox::new(Tracked(1)).unwrap());
        drop(AlignedArray::from_fn(5, |i| Tracked(i as u64)).unwrap());
        assert_eq!(DROPS.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn array_elements_and_alignment() {
        let arr = AlignedArray::from_fn(10, |i| Transform { m: [i as f32; 16] }).unwrap();
        assert_eq!(arr.len(), 10);
        assert!(is_ptr_aligned(arr.as_ptr(), 64));
        assert_eq!(arr[7].m[0], 7.0);

        let filled = AlignedArray::filled(3, Transform { m: [0.5; 16] }).unwrap();
        assert!(filled.iter().all(|t| t.m[8] == 0.5));
    }

    #[test]
    fn empty_and_zero_sized() {
        let empty = AlignedArray::<Transform>::from_fn(0, |_| unreachable!()).unwrap();
        assert!(empty.is_empty());

        #[derive(Debug)]
        struct Tag;
        crate::aligned_composite!(Tag: SimdAligned);
        let tag = AlignedBox::new(Tag).unwrap();
        assert_eq!(format!("{tag:?}"), "Tag");
        let tags = AlignedArray::from_fn(1000, |_| Tag).unwrap();
        assert_eq!(tags.len(), 1000);
    }

    fn always_null(_size: usize) -> Option<NonNull<u8>> {
        None
    }
    unsafe fn never_called(_ptr: *mut u8) {}

    crate::aligned_capability! {
        struct Exhausted: 128 => AllocHooks::new(always_null, never_called);
    }

    struct Upload([u8; 32]);
    crate::aligned_composite!(Upload: Exhausted, SimdAligned);

    #[test]
    fn allocation_failure_is_reported() {
        match AlignedBox::new(Upload([0; 32])) {
            Err(AllocError::OutOfMemory { size, alignment }) => {
                assert_eq!(size, 32);
                assert_eq!(alignment, 128);
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }

        // No array hooks on the winner: arrays go to the backend instead.
        let arr = AlignedArray::from_fn(4, |_| Upload([1; 32])).unwrap();
        assert!(is_ptr_aligned(arr.as_ptr(), 128));
        assert_eq!(arr[3].0[31], 1);
    }

    #[test]
    fn overflowing_length_is_rejected() {
        let err = AlignedArray::from_fn(usize::MAX, |_| Transform { m: [0.0; 16] }).unwrap_err();
        assert!(matches!(err, AllocError::CapacityOverflow { .. }));
    }

    static FRAGILE_DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Fragile;
    impl Drop for Fragile {
        fn drop(&mut self) {
            FRAGILE_DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }
    crate::aligned_composite!(Fragile: SimdAligned);

    #[test]
    fn panicking_constructor_cleans_up() {
        let result = std::panic::catch_unwind(|| {
            AlignedArray::from_fn(4, |i| {
                if i == 3 {
                    panic!("boom");
                }
                Fragile
            })
        });
        assert!(result.is_err());
        assert_eq!(FRAGILE_DROPS.load(Ordering::SeqCst), 3);
    }
}
