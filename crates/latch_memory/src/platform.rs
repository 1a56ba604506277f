//! Backend seam for raw aligned memory.
//!
//! Everything above this module asks an [`AlignedAllocator`] for bytes; the
//! default is [`PlatformAllocator`], which forwards to the C runtime. Swap
//! it for jemalloc, mimalloc or a tracking wrapper by implementing the trait
//! and naming it as a composite's backend.

use std::ptr::NonNull;

/// A source of raw memory at a requested alignment.
///
/// # Safety
/// Implementors must return blocks of at least `size` bytes whose address
/// is a multiple of `max(alignment, MIN_ALIGNMENT)`, must accept every
/// pointer they returned in `free`, and must be callable from any thread.
pub unsafe trait AlignedAllocator: 'static {
    /// Requests below this alignment are rounded up to it.
    const MIN_ALIGNMENT: usize;
    /// Largest alignment this backend can honour.
    const MAX_ALIGNMENT: usize;

    /// Allocate `size` bytes. Returns `None` for `size == 0` and on failure;
    /// never panics.
    fn allocate(size: usize, alignment: usize) -> Option<NonNull<u8>>;

    /// Release a block. A null `ptr` is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this backend's
    /// `allocate`.
    unsafe fn free(ptr: *mut u8);
}

/// The C runtime's aligned allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformAllocator;

/// `alignof(max_align_t)` on the targets we ship.
#[cfg(target_pointer_width = "64")]
const PLATFORM_MIN_ALIGNMENT: usize = 16;
#[cfg(not(target_pointer_width = "64"))]
const PLATFORM_MIN_ALIGNMENT: usize = 8;

// posix_memalign, _aligned_malloc and std::alloc all take any power of two;
// the ceiling only bounds what capabilities may declare.
const PLATFORM_MAX_ALIGNMENT: usize = crate::align::MAX_ALIGNMENT;

#[inline]
fn effective_alignment(alignment: usize) -> usize {
    alignment.max(PLATFORM_MIN_ALIGNMENT)
}

/* -------------------------- Unix -------------------------- */

#[cfg(unix)]
unsafe impl AlignedAllocator for PlatformAllocator {
    const MIN_ALIGNMENT: usize = PLATFORM_MIN_ALIGNMENT;
    const MAX_ALIGNMENT: usize = PLATFORM_MAX_ALIGNMENT;

    fn allocate(size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let alignment = effective_alignment(alignment);
        let mut out: *mut libc::c_void = std::ptr::null_mut();
        // SAFETY: `out` is a valid out-pointer; posix_memalign validates
        // `alignment` itself and reports EINVAL instead of faulting.
        let rc = unsafe { libc::posix_memalign(&mut out, alignment, size) };
        if rc != 0 {
            tracing::debug!(size, alignment, rc, "posix_memalign failed");
            return None;
        }
        NonNull::new(out.cast())
    }

    unsafe fn free(ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        libc::free(ptr.cast());
    }
}

/* -------------------------- Windows -------------------------- */

#[cfg(windows)]
unsafe impl AlignedAllocator for PlatformAllocator {
    const MIN_ALIGNMENT: usize = PLATFORM_MIN_ALIGNMENT;
    const MAX_ALIGNMENT: usize = PLATFORM_MAX_ALIGNMENT;

    fn allocate(size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let alignment = effective_alignment(alignment);
        // SAFETY: _aligned_malloc returns null for invalid alignments.
        let out = unsafe { libc::aligned_malloc(size, alignment) };
        if out.is_null() {
            tracing::debug!(size, alignment, "_aligned_malloc failed");
        }
        NonNull::new(out.cast())
    }

    unsafe fn free(ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        libc::aligned_free(ptr.cast());
    }
}

/* --------------------- Other / WASM / Fallbacks --------------------- */

// No aligned C allocator: go through `std::alloc` and keep the block's
// layout in a header just below the returned pointer.
#[cfg(not(any(unix, windows)))]
mod fallback {
    use crate::align::align_up;
    use std::alloc::Layout;
    use std::ptr::NonNull;

    const HEADER: usize = 2 * std::mem::size_of::<usize>();

    pub(super) fn allocate(size: usize, alignment: usize) -> Option<NonNull<u8>> {
        let offset = align_up(HEADER, alignment);
        let total = offset.checked_add(size)?;
        let layout = Layout::from_size_align(total, alignment).ok()?;
        // SAFETY: `total` is non-zero because `offset >= HEADER`.
        let base = unsafe { std::alloc::alloc(layout) };
        if base.is_null() {
            tracing::debug!(size, alignment, "std::alloc failed");
            return None;
        }
        unsafe {
            // SAFETY: `offset <= total`, and the header words sit inside the
            // block, aligned because `alignment >= align_of::<usize>()`.
            let user = base.add(offset);
            let header = user.cast::<usize>().sub(2);
            header.write(total);
            header.add(1).write(alignment);
            NonNull::new(user)
        }
    }

    pub(super) unsafe fn free(ptr: *mut u8) {
        let header = ptr.cast::<usize>().sub(2);
        let total = header.read();
        let alignment = header.add(1).read();
        let base = ptr.sub(align_up(HEADER, alignment));
        std::alloc::dealloc(base, Layout::from_size_align_unchecked(total, alignment));
    }
}

#[cfg(not(any(unix, windows)))]
unsafe impl AlignedAllocator for PlatformAllocator {
    const MIN_ALIGNMENT: usize = PLATFORM_MIN_ALIGNMENT;
    const MAX_ALIGNMENT: usize = PLATFORM_MAX_ALIGNMENT;

    fn allocate(size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size == 0 || !crate::align::is_power_of_two(alignment) {
            return None;
        }
        fallback::allocate(size, effective_alignment(alignment))
    }

    unsafe fn free(ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        fallback::free(ptr);
    }
}
