//! Engine-style composites and the checks run against them.

use crate::settings::ProbeSettings;
use latch_memory::{
    aligned_capability, aligned_composite, is_ptr_aligned, AlignedArray, CapabilitySet, Composite,
    Inherited, MapBufferAligned, SimdAligned, TrackingAllocator,
};
use serde::Serialize;
use thiserror::Error;

aligned_capability! {
    /// Vertex attributes fetched by the GPU in 64-byte bursts.
    pub struct VertexStream: 64;
}

aligned_capability! {
    /// Ring-buffer staging slots for texture uploads.
    pub struct UploadSlot: 128;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Transform {
    pub matrix: [f32; 16],
}
aligned_composite!(Transform: SimdAligned; backend = TrackingAllocator);

#[derive(Debug, Clone, Copy, Default)]
pub struct MeshInstance {
    pub transform: Transform,
    pub vertex_offset: u32,
}
aligned_composite!(MeshInstance: Inherited<Transform>, VertexStream; backend = TrackingAllocator);

#[derive(Debug, Clone, Copy)]
pub struct TextureUpload {
    pub texels: [u8; 256],
}
impl Default for TextureUpload {
    fn default() -> Self {
        Self { texels: [0; 256] }
    }
}
aligned_composite!(TextureUpload: MapBufferAligned, UploadSlot, SimdAligned; backend = TrackingAllocator);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{composite} resolved to {alignment}, below the required {required}")]
    BelowMinimum {
        composite: &'static str,
        alignment: usize,
        required: usize,
    },

    #[error("{composite}::{entry}({size}) returned null")]
    Exhausted {
        composite: &'static str,
        entry: &'static str,
        size: usize,
    },

    #[error("{composite}::{entry}({size}) returned {addr:#x}, expected alignment {alignment}")]
    Misaligned {
        composite: &'static str,
        entry: &'static str,
        size: usize,
        addr: usize,
        alignment: usize,
    },

    #[error(transparent)]
    Alloc(#[from] latch_memory::AllocError),
}

/// Outcome for one composite.
#[derive(Debug, Clone, Serialize)]
pub struct CompositeReport {
    pub composite: &'static str,
    pub winner: &'static str,
    pub alignment: usize,
    pub custom_hooks: bool,
    pub allocations_checked: usize,
}

pub fn run(settings: &ProbeSettings) -> Result<Vec<CompositeReport>, ProbeError> {
    Ok(vec![
        probe::<Transform>("Transform", settings)?,
        probe::<MeshInstance>("MeshInstance", settings)?,
        probe::<TextureUpload>("TextureUpload", settings)?,
    ])
}

fn probe<T: Composite + Default>(
    composite: &'static str,
    settings: &ProbeSettings,
) -> Result<CompositeReport, ProbeError> {
    let winner = <T::Capabilities as CapabilitySet>::WINNER;
    let alignment = T::REQUIRED_ALIGNMENT;
    tracing::info!(
        composite,
        winner = winner.name(),
        alignment,
        members = <T::Capabilities as CapabilitySet>::LEN,
        "resolved"
    );

    if alignment < settings.min_alignment.get() {
        return Err(ProbeError::BelowMinimum {
            composite,
            alignment,
            required: settings.min_alignment.get(),
        });
    }

    let mut checked = 0;
    for &size in settings.sizes.iter().filter(|&&s| s != 0) {
        let block = T::allocate(size).ok_or(ProbeError::Exhausted {
            composite,
            entry: "allocate",
            size,
        })?;
        let aligned = is_ptr_aligned(block.as_ptr(), alignment);
        // SAFETY: block came from T::allocate with this size.
        unsafe { T::deallocate_sized(block.as_ptr(), size) };
        check(composite, "allocate", size, block.as_ptr() as usize, alignment, aligned)?;

        let block = T::allocate_array(size).ok_or(ProbeError::Exhausted {
            composite,
            entry: "allocate_array",
            size,
        })?;
        let aligned = is_ptr_aligned(block.as_ptr(), alignment);
        // SAFETY: block came from T::allocate_array with this size.
        unsafe { T::deallocate_array_sized(block.as_ptr(), size) };
        check(composite, "allocate_array", size, block.as_ptr() as usize, alignment, aligned)?;

        checked += 2;
    }

    let array = AlignedArray::<T>::from_fn(settings.array_len, |_| T::default())?;
    if settings.array_len > 0 {
        let bytes = settings.array_len * std::mem::size_of::<T>();
        check(
            composite,
            "AlignedArray::from_fn",
            bytes,
            array.as_ptr() as usize,
            alignment,
            is_ptr_aligned(array.as_ptr(), alignment),
        )?;
        checked += 1;
    }

    Ok(CompositeReport {
        composite,
        winner: winner.name(),
        alignment,
        custom_hooks: winner.has_custom_hooks(),
        allocations_checked: checked,
    })
}

fn check(
    composite: &'static str,
    entry: &'static str,
    size: usize,
    addr: usize,
    alignment: usize,
    aligned: bool,
) -> Result<(), ProbeError> {
    if aligned {
        tracing::debug!(composite, entry, size, addr, "aligned");
        Ok(())
    } else {
        Err(ProbeError::Misaligned {
            composite,
            entry,
            size,
            addr,
            alignment,
        })
    }
}
