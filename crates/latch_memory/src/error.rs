use thiserror::Error;

/// Errors produced when an alignment is validated at runtime
/// (e.g. read from a settings file). Declared capabilities are checked
/// during const evaluation instead and never produce these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AlignmentError {
    #[error("alignment {value} is not a power of two")]
    NotPowerOfTwo { value: usize },

    #[error("alignment {value} exceeds the supported ceiling of {ceiling} bytes")]
    ExceedsCeiling { value: usize, ceiling: usize },
}

/// Failure of the owned containers in [`crate::boxed`].
///
/// The raw dispatch entry points never return this; they report failure
/// with `None` and leave the policy to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("out of memory allocating {size} bytes aligned to {alignment}")]
    OutOfMemory { size: usize, alignment: usize },

    #[error("allocator returned {addr:#x}, not aligned to {alignment}")]
    Misaligned { addr: usize, alignment: usize },

    #[error("array of {len} elements of {elem_size} bytes overflows usize")]
    CapacityOverflow { len: usize, elem_size: usize },
}
