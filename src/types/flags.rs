//! Category flag word attached to every type descriptor.
//!
//! The resolution engine dispatches on these flags rather than on the full
//! shape of a type: the strategy precedence, the value-location table, and
//! the dynamic-type fixup rules are all written against flag combinations.

use bitflags::bitflags;

bitflags! {
    /// Category information for a type, as a flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeInfo: u32 {
        /// Belongs to the native type system (as opposed to a bridged one)
        const NATIVE = 1 << 0;
        /// A class declaration
        const CLASS = 1 << 1;
        /// A protocol / interface existential
        const PROTOCOL = 1 << 2;
        /// A free generic type parameter
        const GENERIC_PARAM = 1 << 3;
        /// A pointer type
        const POINTER = 1 << 4;
        /// A reference type
        const REFERENCE = 1 << 5;
        /// Values of this type are pointers to instance data
        const INSTANCE_IS_POINTER = 1 << 6;
        /// A compiler built-in
        const BUILTIN = 1 << 7;
        /// Carries a value payload (pointer-with-value built-ins)
        const HAS_VALUE = 1 << 8;
        /// A struct / record
        const STRUCT = 1 << 9;
        /// An enumeration
        const ENUMERATION = 1 << 10;
        /// A tuple
        const TUPLE = 1 << 11;
        /// The error-protocol existential
        const ERROR_TYPE = 1 << 12;
        /// Imported from a foreign (bridged) type system
        const FOREIGN = 1 << 13;
        /// Synthesized at runtime rather than declared in a module
        const RUNTIME_GENERATED = 1 << 14;
        /// An opaque result type hidden behind a descriptor
        const OPAQUE = 1 << 15;
    }
}

impl TypeInfo {
    /// True when every flag in `other` is set.
    #[must_use]
    pub fn all_set(self, other: TypeInfo) -> bool {
        self.contains(other)
    }

    /// True when at least one flag in `other` is set.
    #[must_use]
    pub fn any_set(self, other: TypeInfo) -> bool {
        self.intersects(other)
    }

    /// True when no flag in `other` is set.
    #[must_use]
    pub fn all_clear(self, other: TypeInfo) -> bool {
        !self.intersects(other)
    }
}
