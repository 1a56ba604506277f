//! Alignment arithmetic and the validated [`Alignment`] value.
//!
//! GPU APIs only accept power-of-two alignments, so everything here assumes
//! PoT inputs. The rounding helpers do not validate their `alignment`
//! argument outside of debug builds; callers on hot paths pass constants.

use crate::error::AlignmentError;
use serde::{Deserialize, Serialize};

/// Alignment used for SIMD-friendly objects.
///
/// 16 covers SSE/NEON. The `simd-avx` and `simd-avx512` features raise it to
/// 32 and 64. Changing it changes the layout of every default-aligned
/// composite, so serialized blobs written with one setting are not
/// guaranteed to load with another.
#[cfg(feature = "simd-avx512")]
pub const SIMD_ALIGNMENT: usize = 64;
#[cfg(all(feature = "simd-avx", not(feature = "simd-avx512")))]
pub const SIMD_ALIGNMENT: usize = 32;
#[cfg(not(any(feature = "simd-avx", feature = "simd-avx512")))]
pub const SIMD_ALIGNMENT: usize = 16;

/// Minimum alignment of pointers returned by buffer mapping
/// (`GL_MIN_MAP_BUFFER_ALIGNMENT`).
pub const MIN_MAP_BUFFER_ALIGNMENT: usize = 64;

/// Highest alignment a capability may declare.
///
/// 128 by default, the largest `alignas` every supported toolchain accepts.
/// The `page-alignment` feature raises it to 4096 for page-aligned staging
/// and mapped buffers. This is also the ceiling of the default
/// [`crate::PlatformAllocator`] backend; backends with a lower limit are
/// checked separately when a composite is bound to them.
#[cfg(not(feature = "page-alignment"))]
pub const MAX_ALIGNMENT: usize = 128;
#[cfg(feature = "page-alignment")]
pub const MAX_ALIGNMENT: usize = 4096;

/// True iff `v` has exactly one bit set.
#[inline]
pub const fn is_power_of_two(v: usize) -> bool {
    v != 0 && (v & (v - 1)) == 0
}

/// Smallest multiple of `alignment` that is `>= value`.
///
/// Wraps to `0` when that multiple does not fit in `usize`.
#[inline]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(is_power_of_two(alignment));
    value.wrapping_add(alignment - 1) & !(alignment - 1)
}

/// Largest multiple of `alignment` that is `<= value`.
#[inline]
pub const fn align_down(value: usize, alignment: usize) -> usize {
    debug_assert!(is_power_of_two(alignment));
    value & !(alignment - 1)
}

/// Largest multiple of `alignment` strictly below `value`.
///
/// For an already aligned `value` this steps back a whole `alignment`.
/// `value` must be non-zero.
#[inline]
pub const fn align_down_exclusive(value: usize, alignment: usize) -> usize {
    debug_assert!(is_power_of_two(alignment));
    debug_assert!(value != 0);
    value.wrapping_sub(1) & !(alignment - 1)
}

#[inline]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(is_power_of_two(alignment));
    value & (alignment - 1) == 0
}

/// Check an address against `alignment`.
#[inline]
pub fn is_ptr_aligned<T>(ptr: *const T, alignment: usize) -> bool {
    is_aligned(ptr as usize, alignment)
}

/// Default alignment for `T`: its natural alignment, but never below
/// [`SIMD_ALIGNMENT`].
#[inline]
pub const fn default_alignment<T>() -> usize {
    let natural = std::mem::align_of::<T>();
    if natural > SIMD_ALIGNMENT {
        natural
    } else {
        SIMD_ALIGNMENT
    }
}

/// A power-of-two alignment no larger than its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct Alignment(usize);

impl Alignment {
    pub const SIMD: Alignment = Alignment::must(SIMD_ALIGNMENT);
    pub const MAP_BUFFER: Alignment = Alignment::must(MIN_MAP_BUFFER_ALIGNMENT);

    /// Validate `value` against [`MAX_ALIGNMENT`].
    pub const fn new(value: usize) -> Result<Self, AlignmentError> {
        Self::with_ceiling(value, MAX_ALIGNMENT)
    }

    /// Validate `value` against a backend-specific `ceiling`.
    pub const fn with_ceiling(value: usize, ceiling: usize) -> Result<Self, AlignmentError> {
        if !is_power_of_two(value) {
            return Err(AlignmentError::NotPowerOfTwo { value });
        }
        if value > ceiling {
            return Err(AlignmentError::ExceedsCeiling { value, ceiling });
        }
        Ok(Self(value))
    }

    /// Const-context constructor. An invalid `value` aborts const
    /// evaluation, so a bad declaration never builds.
    pub const fn must(value: usize) -> Self {
        match Self::new(value) {
            Ok(alignment) => alignment,
            Err(AlignmentError::NotPowerOfTwo { .. }) => {
                panic!("alignments must be a positive power of two")
            }
            Err(AlignmentError::ExceedsCeiling { .. }) => {
                panic!("alignment exceeds MAX_ALIGNMENT")
            }
        }
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn align_up(self, value: usize) -> usize {
        align_up(value, self.0)
    }
}

impl TryFrom<usize> for Alignment {
    type Error = AlignmentError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Alignment> for usize {
    fn from(alignment: Alignment) -> usize {
        alignment.0
    }
}

impl std::fmt::Display for Alignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_detection() {
        for v in [1usize, 2, 4, 8, 16, 32, 1 << 20, 1 << (usize::BITS - 1)] {
            assert!(is_power_of_two(v), "{v} should be PoT");
        }
        for v in [0usize, 3, 6, 12, 24, 100, usize::MAX] {
            assert!(!is_power_of_two(v), "{v} should not be PoT");
        }
    }

    #[test]
    fn align_up_bounds() {
        for alignment in [1usize, 2, 8, 16, 64, 128] {
            for value in 0..300usize {
                let up = align_up(value, alignment);
                assert_eq!(up % alignment, 0);
                assert!(up >= value);
                assert!(up - value < alignment);
            }
        }
    }

    #[test]
    fn align_up_wraps_instead_of_overflowing() {
        assert_eq!(align_up(usize::MAX, 16), 0);
        assert_eq!(align_up(usize::MAX - 15, 16), usize::MAX - 15);
        assert_eq!(align_up(usize::MAX - 14, 16), 0);
        assert_eq!(align_up(usize::MAX, 1), usize::MAX);
    }

    #[test]
    fn align_down_is_a_floor() {
        assert_eq!(align_down(0, 16), 0);
        assert_eq!(align_down(15, 16), 0);
        assert_eq!(align_down(16, 16), 16);
        assert_eq!(align_down(17, 16), 16);
        assert_eq!(align_down(130, 64), 128);
    }

    #[test]
    fn align_down_exclusive_steps_back_on_aligned_input() {
        assert_eq!(align_down_exclusive(16, 16), 0);
        assert_eq!(align_down_exclusive(17, 16), 16);
        assert_eq!(align_down_exclusive(33, 16), 32);
        assert_eq!(align_down_exclusive(64, 64), 0);
    }

    #[test]
    fn default_alignment_never_below_simd() {
        assert_eq!(default_alignment::<u8>(), SIMD_ALIGNMENT);

        #[repr(align(256))]
        struct Huge;
        assert_eq!(default_alignment::<Huge>(), 256);
    }

    #[test]
    fn alignment_validation() {
        assert_eq!(Alignment::new(64).map(Alignment::get), Ok(64));
        assert_eq!(
            Alignment::new(12),
            Err(AlignmentError::NotPowerOfTwo { value: 12 })
        );
        assert_eq!(
            Alignment::new(0),
            Err(AlignmentError::NotPowerOfTwo { value: 0 })
        );
        assert_eq!(
            Alignment::new(MAX_ALIGNMENT * 2),
            Err(AlignmentError::ExceedsCeiling { value: MAX_ALIGNMENT * 2, ceiling: MAX_ALIGNMENT })
        );
        assert!(Alignment::with_ceiling(4096, 4096).is_ok());
        assert!(Alignment::with_ceiling(64, 32).is_err());
    }

    #[cfg(not(feature = "page-alignment"))]
    #[test]
    fn default_ceiling() {
        assert_eq!(MAX_ALIGNMENT, 128);
        assert!(Alignment::new(128).is_ok());
        assert!(Alignment::new(256).is_err());
    }

    #[cfg(feature = "page-alignment")]
    #[test]
    fn page_alignment_raises_ceiling() {
        assert_eq!(MAX_ALIGNMENT, 4096);
        assert!(Alignment::new(4096).is_ok());
        assert!(Alignment::new(8192).is_err());
    }

    #[test]
    fn alignment_deserializes_with_validation() {
        let ok: Alignment = serde_json::from_str("32").unwrap();
        assert_eq!(ok.get(), 32);
        assert!(serde_json::from_str::<Alignment>("48").is_err());
        assert_eq!(serde_json::to_string(&Alignment::SIMD).unwrap(), SIMD_ALIGNMENT.to_string());
    }
}
