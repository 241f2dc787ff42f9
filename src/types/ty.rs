//! Type descriptors and the stable handles used as cache keys.

use crate::types::flags::TypeInfo;

/// A canonical, hashable handle to a type within one semantic context.
///
/// The handle is stable for the owning context's lifetime and becomes invalid
/// when that context is torn down; the embedded context generation lets every
/// consumer detect a stale handle instead of resolving against the wrong
/// arena. Used as the key half of both caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIdentity {
    /// Generation id of the owning [`crate::types::ScratchContext`]
    pub context: u64,
    /// Slot index within the owning context's arena
    pub index: u32,
}

/// How the runtime stores a value of this type inside a generic or
/// existential slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationStrategy {
    /// Not known without asking the target
    #[default]
    Unknown,
    /// Decided at runtime per instantiation
    Dynamic,
    /// Stored inline in the slot's buffer
    Inline,
    /// Stored out of line, the slot holds a pointer
    Pointer,
}

/// A stored member of a struct or class declaration.
#[derive(Debug, Clone)]
pub struct MemberDecl {
    /// Member name
    pub name: String,
    /// Declared type, when the declaration resolved it
    pub ty: Option<TypeIdentity>,
    /// Statically known byte offset, when the layout is fixed
    pub offset: Option<u64>,
    /// Whether the member's variable binding pattern survived import.
    ///
    /// A member without a binding pattern marks the whole declaration as
    /// import-damaged; semantic resolution must refuse such types.
    pub has_binding_pattern: bool,
}

/// One case of an enumeration declaration.
#[derive(Debug, Clone)]
pub struct CaseDecl {
    /// Case name
    pub name: String,
    /// Payload type, for payload-carrying cases
    pub payload: Option<TypeIdentity>,
    /// Whether the payload is heap-boxed rather than stored inline
    pub indirect: bool,
}

/// Shape-specific data of a type descriptor.
#[derive(Debug, Clone)]
pub enum TypeShape {
    /// Compiler built-in with a fixed size
    Builtin {
        /// Size in bytes
        size: u64,
    },
    /// Record with stored members
    Struct {
        /// Stored members in declaration order
        members: Vec<MemberDecl>,
    },
    /// Class with stored members; instances live behind a pointer
    Class {
        /// Stored members in declaration order
        members: Vec<MemberDecl>,
    },
    /// Enumeration
    Enumeration {
        /// Cases in declaration order; the selected case is encoded in the
        /// value's leading tag byte
        cases: Vec<CaseDecl>,
    },
    /// Tuple of element types
    Tuple {
        /// Element types in order
        elements: Vec<TypeIdentity>,
    },
    /// Protocol existential
    Protocol {
        /// Class-constrained protocols store a single instance pointer
        class_constrained: bool,
        /// Number of inline payload words in the existential container
        num_storage_words: u64,
    },
    /// Free generic type parameter
    GenericParam {
        /// Nesting depth of the generic signature
        depth: u32,
        /// Index within the signature at that depth
        index: u32,
    },
    /// Opaque result type, concrete identity hidden behind a descriptor
    Opaque {
        /// Mangled name of the descriptor symbol in the target
        descriptor_symbol: String,
        /// Ordinal of the opaque result within the descriptor
        ordinal: u32,
    },
    /// Pointer to a pointee (or a raw pointer when `None`)
    Pointer {
        /// Pointee type
        pointee: Option<TypeIdentity>,
    },
    /// Reference to a referent
    Reference {
        /// Referent type
        referent: TypeIdentity,
    },
    /// Unowned reference-storage wrapper
    UnownedStorage {
        /// Referent type
        referent: TypeIdentity,
    },
    /// Weak reference-storage wrapper
    WeakStorage {
        /// Referent type
        referent: TypeIdentity,
    },
}

/// A type as one semantic context describes it.
#[derive(Debug, Clone)]
pub struct TypeDesc {
    /// Display name
    pub name: String,
    /// Canonical mangled name; the key shared with reflection metadata
    pub mangled: String,
    /// Category flags
    pub info: TypeInfo,
    /// Shape-specific declaration data
    pub shape: TypeShape,
    /// Storage strategy the runtime uses for this type in abstract slots
    pub alloc: AllocationStrategy,
}

impl TypeDesc {
    /// Display name for a free generic parameter, matching the names the
    /// compiler materializes in frame variables (`τ_<depth>_<index>`).
    #[must_use]
    pub fn generic_param_name(depth: u32, index: u32) -> String {
        format!("\u{03C4}_{depth}_{index}")
    }

    /// Stored members, for shapes that have them.
    #[must_use]
    pub fn members(&self) -> Option<&[MemberDecl]> {
        match &self.shape {
            TypeShape::Struct { members } | TypeShape::Class { members } => Some(members),
            _ => None,
        }
    }
}
