//! Pointer fixups: stripping spare bits and decoding reference encodings.
//!
//! Pure functions over the constant tables in [`crate::abi::arch`]. The only
//! remote I/O here is the single extra dereference an indirect weak reference
//! demands; everything else is bit arithmetic. Failures during that one read
//! degrade to a passthrough of the original address, never an error: a
//! pointer we cannot fix up is still a pointer.

use tracing::debug;

use crate::{
    abi::arch::{Architecture, PointerFixups},
    target::memory::MemoryReader,
    types::{ScratchContext, TypeIdentity, TypeShape},
};

/// How a non-trivially-managed reference is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceStrategy {
    /// Weak reference: may indirect through a runtime side table
    Weak,
    /// Unowned or other non-trivial reference: reserved low bits only
    Unowned,
}

/// Strip the architecture's spare bits from a pointer.
///
/// Returns the cleared pointer and the bits that were removed, so callers
/// that care about the auxiliary flags can still see them.
#[must_use]
pub fn mask_spare_bits(fixups: &PointerFixups, addr: u64) -> (u64, u64) {
    let masked = addr & fixups.spare_bits_mask;
    (addr & !fixups.spare_bits_mask, masked)
}

/// True when `addr` is a foreign tagged pointer on this target.
///
/// Only reference-storage (unowned) types participate: on targets with
/// foreign object-model interop, the runtime flags references to foreign
/// objects in the least significant bit.
#[must_use]
pub fn is_tagged_pointer(
    ctx: &ScratchContext,
    arch: &Architecture,
    addr: u64,
    ty: TypeIdentity,
) -> bool {
    if !arch.foreign_interop {
        return false;
    }
    match ctx.ty(ty).map(|d| &d.shape) {
        Ok(TypeShape::UnownedStorage { .. }) => (addr & 1) == 1,
        _ => false,
    }
}

/// Fix up a non-trivially-managed reference pointer.
///
/// Weak references whose marker bits match the architecture's marker value
/// indirect through a small runtime side table whose first field is the real
/// pointer; that costs one remote dereference. Other non-trivial references
/// just have their reserved low bits cleared. A failed dereference returns
/// the original address unchanged.
#[must_use]
pub fn fixup_reference(
    fixups: &PointerFixups,
    arch: &Architecture,
    reader: &MemoryReader,
    addr: u64,
    strategy: ReferenceStrategy,
) -> u64 {
    if addr == 0 {
        return addr;
    }
    // An unrecognized target has no encoding knowledge at all; leave every
    // bit alone.
    if fixups.is_passthrough() {
        return addr;
    }
    // Tagged pointers don't perform any masking.
    if arch.foreign_interop && (addr & 1) == 1 {
        return addr;
    }

    match strategy {
        ReferenceStrategy::Weak => {
            if fixups.weak_marker_mask == 0 {
                return addr;
            }
            let is_indirect = (addr & fixups.weak_marker_mask) == fixups.weak_marker_value;
            if !is_indirect {
                return addr;
            }
            // The masked value points at the runtime side table; its first
            // field is the actual pointer.
            let masked = addr & !fixups.weak_marker_mask;
            match reader.read_pointer(masked) {
                Ok(real) => real,
                Err(err) => {
                    debug!(%err, "couldn't deref masked weak pointer");
                    addr
                }
            }
        }
        ReferenceStrategy::Unowned => {
            let n = fixups.reserved_low_bits;
            let mask = (1u64 << n) | (1u64 << (n + 1));
            addr & !mask
        }
    }
}

/// Fix up a pointer value read out of a variable of type `ty`.
///
/// Foreign tagged pointers clear the discriminator bit and request one extra
/// dereference from the caller; everything else has the architecture's spare
/// bits cleared with no dereference.
#[must_use]
pub fn fixup_pointer_value(
    ctx: &ScratchContext,
    fixups: &PointerFixups,
    arch: &Architecture,
    addr: u64,
    ty: TypeIdentity,
) -> (u64, bool) {
    if is_tagged_pointer(ctx, arch, addr, ty) {
        // Clear the discriminator bit to get at the foreign object pointer.
        (addr & !1u64, true)
    } else {
        (addr & !fixups.spare_bits_mask, false)
    }
}

/// Adjust a reference address depending on the reference-storage type.
///
/// For unowned storage, peek through the reference: when the pointee turns
/// out to be a tagged encoding that demands an extra dereference, the
/// fixed-up pointee is the answer. Every failure path returns `addr`.
#[must_use]
pub fn fixup_address(
    ctx: &ScratchContext,
    fixups: &PointerFixups,
    arch: &Architecture,
    reader: &MemoryReader,
    addr: u64,
    ty: TypeIdentity,
) -> u64 {
    let Ok(desc) = ctx.ty(ty) else {
        return addr;
    };
    if let TypeShape::UnownedStorage { .. } = desc.shape {
        if let Ok(refd) = reader.read_pointer(addr) {
            let (fixed, extra_deref) = fixup_pointer_value(ctx, fixups, arch, refd, ty);
            if extra_deref {
                return fixed;
            }
        }
    }
    addr
}
