//! Target architecture enumeration and the per-target pointer fixup table.
//!
//! The runtime repurposes unused pointer bits ("spare bits") to carry
//! auxiliary flags, and encodes weak and unowned references with per-platform
//! marker bits. All of that knowledge is pure data: a handful of constant bit
//! masks selected by (CPU core, pointer width). This module holds the
//! enumeration and the lookup table; the functions that apply the masks live
//! in [`crate::abi::fixup`].
//!
//! An unrecognized core or pointer width yields the all-passthrough table.
//! Running on an exotic target must never be an error, it just means no
//! pointer bits are spare.

use strum::{Display, EnumIter};

/// CPU core family of the debugged target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum CoreKind {
    /// 32-bit ARM
    Arm,
    /// AArch64
    Arm64,
    /// 32-bit x86
    X86,
    /// x86-64
    X86_64,
    /// IBM z/Architecture
    S390x,
    /// 64-bit PowerPC (little endian)
    PowerPc64,
    /// Anything else; always treated as having no spare bits
    Other,
}

/// Pointer width of the debugged target, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum PointerWidth {
    /// 32-bit pointers
    Four,
    /// 64-bit pointers
    Eight,
}

impl PointerWidth {
    /// Construct from a byte count; anything but 4 or 8 is unsupported.
    #[must_use]
    pub fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            4 => Some(PointerWidth::Four),
            8 => Some(PointerWidth::Eight),
            _ => None,
        }
    }

    /// Width in bytes.
    #[must_use]
    pub fn bytes(self) -> u64 {
        match self {
            PointerWidth::Four => 4,
            PointerWidth::Eight => 8,
        }
    }
}

/// Byte order of the debugged target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// Architecture descriptor supplied by the target collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Architecture {
    /// CPU core family
    pub core: CoreKind,
    /// Pointer width in bytes (4 or 8; anything else disables fixups)
    pub pointer_bytes: u8,
    /// Byte order of multi-byte values in target memory
    pub byte_order: ByteOrder,
    /// Whether the target runtime interoperates with a foreign object model
    /// that uses tagged pointers and reserved low reference bits
    pub foreign_interop: bool,
}

impl Architecture {
    /// Pointer width as a checked enum, `None` for exotic widths.
    #[must_use]
    pub fn pointer_width(&self) -> Option<PointerWidth> {
        PointerWidth::from_bytes(self.pointer_bytes)
    }
}

/// Constant bit masks for one (core, pointer width) combination.
///
/// - `spare_bits_mask`: pointer bits the runtime may repurpose for flags.
/// - `weak_marker_mask`/`weak_marker_value`: a weak reference whose bits
///   under the mask equal the value indirects through a runtime side table.
/// - `reserved_low_bits`: number of low bits reserved in unowned references
///   to foreign objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerFixups {
    /// Spare bits the runtime repurposes in object pointers
    pub spare_bits_mask: u64,
    /// Marker mask for indirect weak references
    pub weak_marker_mask: u64,
    /// Marker value for indirect weak references
    pub weak_marker_value: u64,
    /// Reserved low bits in unowned-to-foreign references
    pub reserved_low_bits: u32,
}

/// The all-zero table. Every fixup becomes a passthrough.
const PASSTHROUGH: PointerFixups = PointerFixups {
    spare_bits_mask: 0,
    weak_marker_mask: 0,
    weak_marker_value: 0,
    reserved_low_bits: 0,
};

/// 32-bit targets share one layout: two alignment bits are spare.
const SPARE_BITS_32: u64 = 0x0000_0003;

impl PointerFixups {
    /// Look up the fixup constants for a (core, width) combination.
    ///
    /// Unknown cores and widths return the passthrough table; this mirrors
    /// how the masking layer behaves on a CPU it has never heard of.
    #[must_use]
    pub fn for_target(core: CoreKind, width: Option<PointerWidth>) -> PointerFixups {
        let Some(width) = width else {
            return PASSTHROUGH;
        };

        match (core, width) {
            (CoreKind::Arm | CoreKind::X86, PointerWidth::Four) => PointerFixups {
                spare_bits_mask: SPARE_BITS_32,
                weak_marker_mask: 0x1,
                weak_marker_value: 0x1,
                reserved_low_bits: 0,
            },
            (CoreKind::Arm64, PointerWidth::Eight) => PointerFixups {
                spare_bits_mask: 0xFF00_0000_0000_0007,
                weak_marker_mask: 0x1,
                weak_marker_value: 0x1,
                reserved_low_bits: 0,
            },
            (CoreKind::X86_64, PointerWidth::Eight) => PointerFixups {
                spare_bits_mask: 0xFF00_0000_0000_0007,
                weak_marker_mask: 0x1,
                weak_marker_value: 0x1,
                reserved_low_bits: 1,
            },
            (CoreKind::S390x | CoreKind::PowerPc64, PointerWidth::Eight) => PointerFixups {
                spare_bits_mask: 0x0000_0000_0000_0007,
                weak_marker_mask: 0x1,
                weak_marker_value: 0x1,
                reserved_low_bits: 0,
            },
            _ => PASSTHROUGH,
        }
    }

    /// Look up the fixup constants for a full architecture descriptor.
    #[must_use]
    pub fn for_architecture(arch: &Architecture) -> PointerFixups {
        PointerFixups::for_target(arch.core, arch.pointer_width())
    }

    /// True for the all-zero table of an unrecognized target. Callers must
    /// not touch any pointer bits then, not even reserved low bits.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        *self == PASSTHROUGH
    }
}
