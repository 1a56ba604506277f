//! Allocation counters as a backend wrapper.
//!
//! `TrackingAllocator<B>` forwards to `B` and bumps process-wide counters.
//! Composites opt in by naming it as their backend; nothing else changes.
//! Counters are relaxed atomics: totals are exact, but a snapshot taken
//! while other threads allocate is not a consistent cut.

use crate::platform::{AlignedAllocator, PlatformAllocator};
use serde::Serialize;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static FAILED_ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);
static BYTES_REQUESTED: AtomicU64 = AtomicU64::new(0);

/// Counting wrapper around another backend.
pub struct TrackingAllocator<B = PlatformAllocator>(PhantomData<fn() -> B>);

unsafe impl<B: AlignedAllocator> AlignedAllocator for TrackingAllocator<B> {
    const MIN_ALIGNMENT: usize = B::MIN_ALIGNMENT;
    const MAX_ALIGNMENT: usize = B::MAX_ALIGNMENT;

    fn allocate(size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let ptr = B::allocate(size, alignment);
        if ptr.is_some() {
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
            BYTES_REQUESTED.fetch_add(size as u64, Ordering::Relaxed);
        } else {
            FAILED_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn free(ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        FREES.fetch_add(1, Ordering::Relaxed);
        B::free(ptr);
    }
}

/// Snapshot of the tracking counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocationStats {
    pub allocations: u64,
    pub failed_allocations: u64,
    pub frees: u64,
    pub bytes_requested: u64,
}

impl AllocationStats {
    pub fn snapshot() -> Self {
        Self {
            allocations: ALLOCATIONS.load(Ordering::Relaxed),
            failed_allocations: FAILED_ALLOCATIONS.load(Ordering::Relaxed),
            frees: FREES.load(Ordering::Relaxed),
            bytes_requested: BYTES_REQUESTED.load(Ordering::Relaxed),
        }
    }

    /// Blocks allocated and not yet freed.
    pub fn live(&self) -> u64 {
        self.allocations.saturating_sub(self.frees)
    }

    /// Counter growth since `earlier`. Fields where `earlier` is ahead
    /// read as zero.
    pub fn since(&self, earlier: &AllocationStats) -> AllocationStats {
        AllocationStats {
            allocations: self.allocations.saturating_sub(earlier.allocations),
            failed_allocations: self.failed_allocations.saturating_sub(earlier.failed_allocations),
            frees: self.frees.saturating_sub(earlier.frees),
            bytes_requested: self.bytes_requested.saturating_sub(earlier.bytes_requested),
        }
    }
}
