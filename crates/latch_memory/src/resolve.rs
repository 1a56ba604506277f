//! Most-aligned capability resolution.
//!
//! The rule is a right fold: the winner of `[first, rest..]` is `first` only
//! if its alignment is strictly greater than the winner of `rest`. Equal
//! alignments therefore resolve to the later-listed capability, and that
//! order is part of the contract since it decides whose hooks run.

use crate::capability::{Capability, CapabilityDescriptor};

/// An ordered, non-empty list of capabilities. Implemented for tuples of
/// one to twelve [`Capability`] types. `()` is not a set, so an empty list
/// fails to build.
pub trait CapabilitySet {
    const LEN: usize;
    /// Members in declaration order.
    const DESCRIPTORS: &'static [CapabilityDescriptor];
    /// The resolved winner, computed during const evaluation.
    const WINNER: CapabilityDescriptor;
}

/// One reduction step.
#[inline]
pub const fn more_aligned(
    first: CapabilityDescriptor,
    rest_winner: CapabilityDescriptor,
) -> CapabilityDescriptor {
    if first.alignment().get() > rest_winner.alignment().get() {
        first
    } else {
        rest_winner
    }
}

/// Resolve a runtime list with the same rule as [`CapabilitySet::WINNER`].
/// Returns `None` for an empty slice.
pub const fn resolve(set: &[CapabilityDescriptor]) -> Option<CapabilityDescriptor> {
    let mut i = set.len();
    if i == 0 {
        return None;
    }
    i -= 1;
    let mut winner = set[i];
    while i > 0 {
        i -= 1;
        winner = more_aligned(set[i], winner);
    }
    Some(winner)
}

macro_rules! impl_capability_set {
    ($head:ident) => {
        impl<$head: Capability> CapabilitySet for ($head,) {
            const LEN: usize = 1;
            const DESCRIPTORS: &'static [CapabilityDescriptor] = &[<$head as Capability>::DESCRIPTOR];
            const WINNER: CapabilityDescriptor = <$head as Capability>::DESCRIPTOR;
        }
    };
    ($head:ident, $($tail:ident),+) => {
        impl<$head: Capability, $($tail: Capability),+> CapabilitySet for ($head, $($tail),+) {
            const LEN: usize = 1 + <($($tail,)+) as CapabilitySet>::LEN;
            const DESCRIPTORS: &'static [CapabilityDescriptor] = &[
                <$head as Capability>::DESCRIPTOR,
                $(<$tail as Capability>::DESCRIPTOR),+
            ];
            const WINNER: CapabilityDescriptor = more_aligned(
                <$head as Capability>::DESCRIPTOR,
                <($($tail,)+) as CapabilitySet>::WINNER,
            );
        }

        impl_capability_set!($($tail),+);
    };
}

impl_capability_set!(C0, C1, C2, C3, C4, C5, C6, C7, C8, C9, C10, C11);
