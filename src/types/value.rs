//! Value descriptors: what the engine knows about one observed value.

use crate::{
    target::process::{FrameId, INVALID_ADDRESS},
    types::ty::TypeIdentity,
};

/// Where a value's data lives, from the debugger's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLocation {
    /// The value is the scalar itself (registers, computed results)
    Scalar,
    /// The value lives at a load address in the target
    LoadAddress,
    /// The value was materialized into debugger-owned host memory
    HostAddress,
}

/// Description of one value the caller wants resolved.
///
/// The caller owns the descriptor; the engine borrows it for a single
/// resolution call. For indirectly-boxed enum payloads the `parent` chain
/// carries the enclosing enum value, whose raw bytes encode the selected
/// case.
#[derive(Debug, Clone)]
pub struct ValueDescriptor {
    /// Display name, diagnostics only
    pub name: String,
    /// Declared (static) type
    pub static_type: TypeIdentity,
    /// Current value-location kind
    pub location: ValueLocation,
    /// Load address of the value's storage ([`INVALID_ADDRESS`] if none)
    pub address: u64,
    /// Scalar payload: the pointer value for pointer-like values
    pub scalar: u64,
    /// Size of the value's storage in bytes
    pub byte_size: u64,
    /// Materialized bytes, for const results and synthesized values
    pub bytes: Option<Vec<u8>>,
    /// Value was materialized into debugger-owned memory and must be treated
    /// as if its host address were a target address for recursive reads
    pub is_const_result: bool,
    /// Value is the payload slot of an indirect enum case
    pub is_indirect_enum_case: bool,
    /// Value is an inherited base-class slice of a polymorphic object
    pub is_base_class: bool,
    /// Stack frame the value was observed in, for generic binding
    pub frame: Option<FrameId>,
    /// Module the value's static type was declared in
    pub module: Option<u64>,
    /// Enclosing value, set for enum payload slots
    pub parent: Option<Box<ValueDescriptor>>,
}

impl ValueDescriptor {
    /// A minimal descriptor: a named value of a static type with no storage.
    #[must_use]
    pub fn new(name: impl Into<String>, static_type: TypeIdentity) -> Self {
        ValueDescriptor {
            name: name.into(),
            static_type,
            location: ValueLocation::Scalar,
            address: INVALID_ADDRESS,
            scalar: 0,
            byte_size: 0,
            bytes: None,
            is_const_result: false,
            is_indirect_enum_case: false,
            is_base_class: false,
            frame: None,
            module: None,
            parent: None,
        }
    }

    /// The pointer carried by this value, if it plausibly is one.
    #[must_use]
    pub fn pointer_value(&self) -> Option<u64> {
        if self.scalar == 0 || self.scalar == INVALID_ADDRESS {
            None
        } else {
            Some(self.scalar)
        }
    }

    /// The load address of this value's storage, if it has one.
    #[must_use]
    pub fn address_of(&self) -> Option<u64> {
        if self.address == INVALID_ADDRESS {
            None
        } else {
            Some(self.address)
        }
    }
}
