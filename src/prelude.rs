//! # dynscope Prelude
//!
//! Convenient re-exports of the types needed for typical resolution work:
//! the runtime facade, value and type descriptors, and the error type.

/// The main error type for all dynscope operations
pub use crate::Error;

/// The result type used throughout dynscope
pub use crate::Result;

/// The runtime facade and its foreign-runtime hook
pub use crate::{ForeignRuntime, LanguageRuntime};

/// Resolution engine inputs and outputs
pub use crate::{DynamicValuePolicy, Resolution};

/// The target collaborator interface and remote reader
pub use crate::target::{
    FrameId, MemoryReader, ModuleImage, SymbolCandidate, TargetProcess, INVALID_ADDRESS,
};

/// Architecture descriptors and pointer fixups
pub use crate::abi::{Architecture, ByteOrder, CoreKind, PointerFixups, PointerWidth};

/// The semantic type model
pub use crate::types::{
    AllocationStrategy, CaseDecl, MemberDecl, ScratchContext, TypeDesc, TypeIdentity, TypeInfo,
    TypeShape, ValueDescriptor, ValueLocation,
};

/// Reflection layout descriptors
pub use crate::reflection::{FieldLayout, RecordKind, ReflectionContext, TypeLayout};

/// Scratch context access guards
pub use crate::lock::{ScratchCell, ScratchReader, ScratchWriter};
