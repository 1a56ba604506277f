//! Allocation entry points bound to a resolved capability.
//!
//! Every entry point of a `Dispatcher<S, B>` reads the same constant
//! `S::WINNER`, so a composite can never allocate through one capability and
//! free through another. The `match` on the winner's selection is on a
//! constant and folds away; what remains is a direct call to either the
//! hook or the backend.

use crate::capability::{AllocatorSelection, CapabilityDescriptor};
use crate::platform::{AlignedAllocator, PlatformAllocator};
use crate::resolve::CapabilitySet;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Entry points for capability set `S` backed by `B`.
pub struct Dispatcher<S, B = PlatformAllocator>(PhantomData<fn() -> (S, B)>);

impl<S: CapabilitySet, B: AlignedAllocator> Dispatcher<S, B> {
    /// `S::WINNER`, checked against the backend's ceiling.
    pub const WINNER: CapabilityDescriptor = {
        let winner = S::WINNER;
        assert!(
            winner.alignment().get() <= B::MAX_ALIGNMENT,
            "resolved alignment exceeds the backend's MAX_ALIGNMENT"
        );
        winner
    };

    pub const ALIGNMENT: usize = Self::WINNER.alignment().get();

    /// Allocate one object's worth of bytes.
    pub fn allocate(size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let ptr = match Self::WINNER.selection() {
            AllocatorSelection::CustomHooks(hooks) => (hooks.allocate)(size),
            AllocatorSelection::PlatformDefault => B::allocate(size, Self::ALIGNMENT),
        };
        Self::trace_allocation("allocate", size, ptr);
        ptr
    }

    /// Allocate one contiguous block for an array. Differs from
    /// [`Dispatcher::allocate`] only in which hook is consulted.
    pub fn allocate_array(size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let ptr = match Self::WINNER.selection() {
            AllocatorSelection::CustomHooks(hooks) => match hooks.array {
                Some(array) => (array.allocate)(size),
                None => B::allocate(size, Self::ALIGNMENT),
            },
            AllocatorSelection::PlatformDefault => B::allocate(size, Self::ALIGNMENT),
        };
        Self::trace_allocation("allocate_array", size, ptr);
        ptr
    }

    /// # Safety
    /// `ptr` must be null or come from [`Dispatcher::allocate`] of this
    /// same `Dispatcher` and not have been released yet.
    pub unsafe fn deallocate(ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        match Self::WINNER.selection() {
            AllocatorSelection::CustomHooks(hooks) => (hooks.deallocate)(ptr),
            AllocatorSelection::PlatformDefault => B::free(ptr),
        }
    }

    /// Sized release. Without a sized hook the size is dropped and the
    /// unsized path of the same winner runs: neither the backend nor an
    /// unsized hook needs the size to find the block.
    ///
    /// # Safety
    /// As [`Dispatcher::deallocate`]; `size` must be the size passed to
    /// `allocate`.
    pub unsafe fn deallocate_sized(ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            return;
        }
        match Self::WINNER.selection() {
            AllocatorSelection::CustomHooks(hooks) => match hooks.deallocate_sized {
                Some(free_sized) => free_sized(ptr, size),
                None => (hooks.deallocate)(ptr),
            },
            AllocatorSelection::PlatformDefault => B::free(ptr),
        }
    }

    /// # Safety
    /// `ptr` must be null or come from [`Dispatcher::allocate_array`] of
    /// this same `Dispatcher` and not have been released yet.
    pub unsafe fn deallocate_array(ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        match Self::WINNER.selection() {
            AllocatorSelection::CustomHooks(hooks) => match hooks.array {
                Some(array) => (array.deallocate)(ptr),
                None => B::free(ptr),
            },
            AllocatorSelection::PlatformDefault => B::free(ptr),
        }
    }

    /// Sized array release, falling back to
    /// [`Dispatcher::deallocate_array`] when no sized array hook exists.
    ///
    /// # Safety
    /// As [`Dispatcher::deallocate_array`]; `size` must be the size passed
    /// to `allocate_array`.
    pub unsafe fn deallocate_array_sized(ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            return;
        }
        match Self::WINNER.selection() {
            AllocatorSelection::CustomHooks(hooks) => match hooks.array {
                Some(array) => match array.deallocate_sized {
                    Some(free_sized) => free_sized(ptr, size),
                    None => (array.deallocate)(ptr),
                },
                None => B::free(ptr),
            },
            AllocatorSelection::PlatformDefault => B::free(ptr),
        }
    }

    #[inline]
    fn trace_allocation(entry: &'static str, size: usize, ptr: Option<NonNull<u8>>) {
        match ptr {
            Some(ptr) => tracing::trace!(
                entry,
                capability = Self::WINNER.name(),
                alignment = Self::ALIGNMENT,
                size,
                ptr = ?ptr,
                "aligned allocation"
            ),
            None => tracing::debug!(
                entry,
                capability = Self::WINNER.name(),
                alignment = Self::ALIGNMENT,
                size,
                "aligned allocation failed"
            ),
        }
    }
}

/// A type whose heap instances are allocated through its capability set.
///
/// Declare with [`aligned_composite!`](crate::aligned_composite). The
/// provided functions are the type's allocation entry points; they must
/// not be overridden, or the single-winner guarantee is lost.
pub trait Composite {
    type Capabilities: CapabilitySet;
    type Backend: AlignedAllocator;

    /// Alignment every heap instance is allocated at.
    const REQUIRED_ALIGNMENT: usize = Dispatcher::<Self::Capabilities, Self::Backend>::ALIGNMENT;

    #[inline]
    fn allocate(size: usize) -> Option<NonNull<u8>> {
        Dispatcher::<Self::Capabilities, Self::Backend>::allocate(size)
    }

    #[inline]
    fn allocate_array(size: usize) -> Option<NonNull<u8>> {
        Dispatcher::<Self::Capabilities, Self::Backend>::allocate_array(size)
    }

    /// # Safety
    /// See [`Dispatcher::deallocate`].
    #[inline]
    unsafe fn deallocate(ptr: *mut u8) {
        Dispatcher::<Self::Capabilities, Self::Backend>::deallocate(ptr)
    }

    /// # Safety
    /// See [`Dispatcher::deallocate_sized`].
    #[inline]
    unsafe fn deallocate_sized(ptr: *mut u8, size: usize) {
        Dispatcher::<Self::Capabilities, Self::Backend>::deallocate_sized(ptr, size)
    }

    /// # Safety
    /// See [`Dispatcher::deallocate_array`].
    #[inline]
    unsafe fn deallocate_array(ptr: *mut u8) {
        Dispatcher::<Self::Capabilities, Self::Backend>::deallocate_array(ptr)
    }

    /// # Safety
    /// See [`Dispatcher::deallocate_array_sized`].
    #[inline]
    unsafe fn deallocate_array_sized(ptr: *mut u8, size: usize) {
        Dispatcher::<Self::Capabilities, Self::Backend>::deallocate_array_sized(ptr, size)
    }
}

/// Implement [`Composite`] for a type.
///
/// ```ignore
/// struct Mesh { /* ... */ }
/// aligned_composite!(Mesh: SimdAligned, VertexStream);
///
/// struct Upload { /* ... */ }
/// aligned_composite!(Upload: MapBufferAligned; backend = TrackingAllocator<PlatformAllocator>);
/// ```
#[macro_export]
macro_rules! aligned_composite {
    ($ty:ty : $($cap:ty),+ ; backend = $backend:ty) => {
        impl $crate::Composite for $ty {
            type Capabilities = ($($cap,)+);
            type Backend = $backend;
        }
    };
    ($ty:ty : $($cap:ty),+ $(,)?) => {
        $crate::aligned_composite!($ty : $($cap),+ ; backend = $crate::PlatformAllocator);
    };
}

/// Implement [`Composite`] and shadow its entry points with inherent ones.
///
/// Use instead of [`aligned_composite!`](crate::aligned_composite) when a
/// type reaches several capability-bearing traits (for instance it is a
/// [`Composite`] and also implements another allocation trait) and calls
/// like `T::allocate(n)` become ambiguous. Inherent associated items take
/// precedence over trait items, so `T::allocate` picks the set named here.
/// The inherent items forward to the generated `Composite` impl, so they,
/// `<T as Composite>::*`, `AlignedBox<T>` and `AlignedArray<T>` all share
/// one winner.
///
/// ```ignore
/// disambiguate_dispatch!(Terrain: Inherited<Heightfield>, MapBufferAligned);
/// ```
#[macro_export]
macro_rules! disambiguate_dispatch {
    ($ty:ty : $($cap:ty),+ ; backend = $backend:ty) => {
        $crate::aligned_composite!($ty : $($cap),+ ; backend = $backend);

        #[allow(dead_code)]
        impl $ty {
            pub const REQUIRED_ALIGNMENT: usize = <$ty as $crate::Composite>::REQUIRED_ALIGNMENT;

            #[inline]
            pub fn allocate(size: usize) -> ::core::option::Option<::core::ptr::NonNull<u8>> {
                <$ty as $crate::Composite>::allocate(size)
            }

            #[inline]
            pub fn allocate_array(size: usize) -> ::core::option::Option<::core::ptr::NonNull<u8>> {
                <$ty as $crate::Composite>::allocate_array(size)
            }

            /// # Safety
            /// See [`Dispatcher::deallocate`]($crate::Dispatcher::deallocate).
            #[inline]
            pub unsafe fn deallocate(ptr: *mut u8) {
                <$ty as $crate::Composite>::deallocate(ptr)
            }

            /// # Safety
            /// See [`Dispatcher::deallocate_sized`]($crate::Dispatcher::deallocate_sized).
            #[inline]
            pub unsafe fn deallocate_sized(ptr: *mut u8, size: usize) {
                <$ty as $crate::Composite>::deallocate_sized(ptr, size)
            }

            /// # Safety
            /// See [`Dispatcher::deallocate_array`]($crate::Dispatcher::deallocate_array).
            #[inline]
            pub unsafe fn deallocate_array(ptr: *mut u8) {
                <$ty as $crate::Composite>::deallocate_array(ptr)
            }

            /// # Safety
            /// See [`Dispatcher::deallocate_array_sized`]($crate::Dispatcher::deallocate_array_sized).
            #[inline]
            pub unsafe fn deallocate_array_sized(ptr: *mut u8, size: usize) {
                <$ty as $crate::Composite>::deallocate_array_sized(ptr, size)
            }
        }
    };
    ($ty:ty : $($cap:ty),+ $(,)?) => {
        $crate::disambiguate_dispatch!($ty : $($cap),+ ; backend = $crate::PlatformAllocator);
    };
}
