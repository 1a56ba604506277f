//! Latch Engine Memory
//!
//! Alignment-aware allocation for engine types:
//! - Alignment arithmetic and validated alignment values
//! - Capabilities: type-level alignment requirements with optional custom
//!   allocation routines
//! - Build-time resolution of the most aligned capability of a composite
//! - Allocation entry points bound to that capability
//!
//! ```ignore
//! use latch_memory::{aligned_capability, aligned_composite, AlignedBox, SimdAligned};
//!
//! aligned_capability! {
//!     pub struct VertexStream: 64;
//! }
//!
//! struct Mesh { positions: [f32; 12] }
//! aligned_composite!(Mesh: SimdAligned, VertexStream);
//!
//! let mesh = AlignedBox::new(Mesh { positions: [0.0; 12] })?; // 64-byte aligned
//! ```

pub mod align;
pub mod boxed;
pub mod capability;
pub mod dispatch;
pub mod error;
pub mod platform;
pub mod resolve;
#[cfg(feature = "metrics")]
pub mod tracking;

pub use align::{
    align_down, align_down_exclusive, align_up, default_alignment, is_aligned, is_power_of_two,
    is_ptr_aligned, Alignment, MAX_ALIGNMENT, MIN_MAP_BUFFER_ALIGNMENT, SIMD_ALIGNMENT,
};
pub use boxed::{AlignedArray, AlignedBox};
pub use capability::{
    AlignedBase, AllocHook, AllocHooks, AllocatorSelection, Capability, CapabilityDescriptor,
    FreeHook, Inherited, MapBufferAligned, SimdAligned, SizedFreeHook,
};
pub use dispatch::{Composite, Dispatcher};
pub use error::{AlignmentError, AllocError};
pub use platform::{AlignedAllocator, PlatformAllocator};
pub use resolve::{resolve, CapabilitySet};
#[cfg(feature = "metrics")]
pub use tracking::{AllocationStats, TrackingAllocator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
