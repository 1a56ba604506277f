//! Alignment capabilities.
//!
//! A capability is a zero-sized marker type that states "objects built from
//! me must live at alignment `A`", and optionally "allocate them with these
//! routines". Composites list their capabilities and the resolver picks the
//! most aligned one.

use crate::align::{Alignment, MIN_MAP_BUFFER_ALIGNMENT, SIMD_ALIGNMENT};
use crate::dispatch::Composite;
use crate::resolve::CapabilitySet;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Custom single-object or array allocation routine. Receives the byte size,
/// never zero.
pub type AllocHook = fn(usize) -> Option<NonNull<u8>>;
/// Custom release routine. Never receives null.
pub type FreeHook = unsafe fn(*mut u8);
/// Custom release routine that also receives the byte size of the block.
pub type SizedFreeHook = unsafe fn(*mut u8, usize);

/// Array routines. Always declared as an allocate/free pair so memory from
/// one allocator is never released through another.
#[derive(Debug, Clone, Copy)]
pub struct ArrayHooks {
    pub(crate) allocate: AllocHook,
    pub(crate) deallocate: FreeHook,
    pub(crate) deallocate_sized: Option<SizedFreeHook>,
}

/// A capability's own allocation routines.
///
/// ```ignore
/// const STAGING: AllocHooks = AllocHooks::new(staging_alloc, staging_free)
///     .with_sized(staging_free_sized);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AllocHooks {
    pub(crate) allocate: AllocHook,
    pub(crate) deallocate: FreeHook,
    pub(crate) deallocate_sized: Option<SizedFreeHook>,
    pub(crate) array: Option<ArrayHooks>,
}

impl AllocHooks {
    pub const fn new(allocate: AllocHook, deallocate: FreeHook) -> Self {
        Self {
            allocate,
            deallocate,
            deallocate_sized: None,
            array: None,
        }
    }

    pub const fn with_sized(self, deallocate_sized: SizedFreeHook) -> Self {
        Self {
            deallocate_sized: Some(deallocate_sized),
            ..self
        }
    }

    /// Route array allocations through their own pair. Without this, arrays
    /// of the owning composite go to the backend.
    pub const fn with_array(self, allocate: AllocHook, deallocate: FreeHook) -> Self {
        Self {
            array: Some(ArrayHooks {
                allocate,
                deallocate,
                deallocate_sized: None,
            }),
            ..self
        }
    }

    /// Sized release for arrays. Must follow [`AllocHooks::with_array`].
    pub const fn with_array_sized(self, deallocate_sized: SizedFreeHook) -> Self {
        let array = match self.array {
            Some(array) => ArrayHooks {
                deallocate_sized: Some(deallocate_sized),
                ..array
            },
            None => panic!("with_array_sized requires array hooks"),
        };
        Self {
            array: Some(array),
            ..self
        }
    }

    #[inline]
    pub const fn has_array_hooks(&self) -> bool {
        self.array.is_some()
    }

    #[inline]
    pub const fn has_sized_hook(&self) -> bool {
        self.deallocate_sized.is_some()
    }
}

/// Which allocator serves a capability when it wins resolution.
#[derive(Debug, Clone, Copy)]
pub enum AllocatorSelection {
    /// The composite's backend at the resolved alignment.
    PlatformDefault,
    /// The capability's own routines.
    CustomHooks(AllocHooks),
}

impl AllocatorSelection {
    #[inline]
    pub const fn hooks(&self) -> Option<&AllocHooks> {
        match self {
            AllocatorSelection::PlatformDefault => None,
            AllocatorSelection::CustomHooks(hooks) => Some(hooks),
        }
    }
}

/// Everything the resolver and dispatcher need to know about a capability.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityDescriptor {
    name: &'static str,
    alignment: Alignment,
    selection: AllocatorSelection,
}

impl CapabilityDescriptor {
    /// Panics during const evaluation if `alignment` is invalid.
    pub const fn new(name: &'static str, alignment: usize, selection: AllocatorSelection) -> Self {
        Self {
            name,
            alignment: Alignment::must(alignment),
            selection,
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub const fn alignment(&self) -> Alignment {
        self.alignment
    }

    #[inline]
    pub const fn selection(&self) -> AllocatorSelection {
        self.selection
    }

    #[inline]
    pub const fn has_custom_hooks(&self) -> bool {
        matches!(self.selection, AllocatorSelection::CustomHooks(_))
    }
}

/// A type-level alignment requirement.
///
/// Prefer [`aligned_capability!`](crate::aligned_capability) which also
/// gives the marker a matching `repr(align)` and checks the alignment at the
/// declaration site. Manual impls are checked when `DESCRIPTOR` is first
/// used by a composite.
pub trait Capability {
    /// Shown in logs and used to tell tied capabilities apart.
    const NAME: &'static str;
    const ALIGNMENT: usize;
    const SELECTION: AllocatorSelection = AllocatorSelection::PlatformDefault;

    const DESCRIPTOR: CapabilityDescriptor =
        CapabilityDescriptor::new(Self::NAME, Self::ALIGNMENT, Self::SELECTION);
}

/// Const-context check used by [`aligned_capability!`](crate::aligned_capability).
pub const fn validate_alignment(alignment: usize) {
    let _ = Alignment::must(alignment);
}

/// Platform-allocated capability at alignment `A`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignedBase<const A: usize>;

impl<const A: usize> Capability for AlignedBase<A> {
    const NAME: &'static str = "AlignedBase";
    const ALIGNMENT: usize = A;
}

/// Default capability for composites without an explicit requirement.
pub type SimdAligned = AlignedBase<SIMD_ALIGNMENT>;

/// Objects that get copied straight into mapped GPU buffers.
pub type MapBufferAligned = AlignedBase<MIN_MAP_BUFFER_ALIGNMENT>;

/// Use a composite as a capability of another composite.
///
/// Resolves to the inner composite's winner, hooks included, so a type
/// built on top of `T` allocates the way `T` does unless something else in
/// its set is more aligned.
///
/// The inner composite's `Backend` is not part of a capability and does
/// not carry over: the outer composite allocates through its own backend
/// whenever the winner has no hooks. Name the inner backend explicitly to
/// keep it:
///
/// ```ignore
/// aligned_composite!(Limb: Inherited<Body>, VertexStream; backend = <Body as Composite>::Backend);
/// ```
pub struct Inherited<T>(PhantomData<fn() -> T>);

impl<T: Composite> Capability for Inherited<T> {
    const NAME: &'static str = <T::Capabilities as CapabilitySet>::WINNER.name();
    const ALIGNMENT: usize = <T::Capabilities as CapabilitySet>::WINNER.alignment().get();
    const SELECTION: AllocatorSelection = <T::Capabilities as CapabilitySet>::WINNER.selection();
    const DESCRIPTOR: CapabilityDescriptor = <T::Capabilities as CapabilitySet>::WINNER;
}

/// Declare a capability marker.
///
/// ```ignore
/// aligned_capability! {
///     /// Vertex data streamed to the GPU.
///     pub struct VertexStream: 64;
/// }
///
/// aligned_capability! {
///     pub struct Staging: 128 => STAGING_HOOKS;
/// }
/// ```
///
/// The alignment must be a literal power of two no larger than
/// [`MAX_ALIGNMENT`](crate::MAX_ALIGNMENT); anything else fails the build.
#[macro_export]
macro_rules! aligned_capability {
    ($(#[$meta:meta])* $vis:vis struct $name:ident : $align:literal $(=> $hooks:expr)? ;) => {
        $(#[$meta])*
        #[repr(align($align))]
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        $vis struct $name;

        const _: () = $crate::capability::validate_alignment($align);

        impl $crate::Capability for $name {
            const NAME: &'static str = stringify!($name);
            const ALIGNMENT: usize = $align;
            $(
                const SELECTION: $crate::AllocatorSelection =
                    $crate::AllocatorSelection::CustomHooks($hooks);
            )?
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never(_size: usize) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn ignore(_ptr: *mut u8) {}

    unsafe fn ignore_sized(_ptr: *mut u8, _size: usize) {}

    crate::aligned_capability! {
        struct Lane: 32;
    }

    crate::aligned_capability! {
        struct Hooked: 64 => AllocHooks::new(never, ignore);
    }

    #[test]
    fn macro_declares_alignment_and_layout() {
        assert_eq!(<Lane as Capability>::ALIGNMENT, 32);
        assert_eq!(std::mem::align_of::<Lane>(), 32);
        assert_eq!(std::mem::size_of::<Lane>(), 0);
        assert_eq!(Lane::DESCRIPTOR.name(), "Lane");
        assert!(!Lane::DESCRIPTOR.has_custom_hooks());
    }

    #[test]
    fn macro_attaches_hooks() {
        let descriptor = Hooked::DESCRIPTOR;
        assert!(descriptor.has_custom_hooks());
        assert_eq!(descriptor.alignment().get(), 64);
        let hooks = descriptor.selection().hooks().copied().unwrap();
        assert!(!hooks.has_array_hooks());
        assert!(!hooks.has_sized_hook());
    }

    #[test]
    fn hook_builder_fills_optional_routines() {
        const HOOKS: AllocHooks = AllocHooks::new(never, ignore)
            .with_sized(ignore_sized)
            .with_array(never, ignore)
            .with_array_sized(ignore_sized);
        assert!(HOOKS.has_sized_hook());
        assert!(HOOKS.has_array_hooks());
        assert!(HOOKS.array.unwrap().deallocate_sized.is_some());
    }

    #[test]
    #[should_panic(expected = "with_array_sized requires array hooks")]
    fn array_sized_without_array_pair_is_rejected() {
        let _ = AllocHooks::new(never, ignore).with_array_sized(ignore_sized);
    }

    #[test]
    fn default_capabilities() {
        assert_eq!(SimdAligned::DESCRIPTOR.alignment().get(), SIMD_ALIGNMENT);
        assert_eq!(MapBufferAligned::DESCRIPTOR.alignment().get(), 64);
        assert_eq!(AlignedBase::<128>::DESCRIPTOR.alignment(), Alignment::must(128));
    }
}
