//! The target collaborator interface and the remote memory reader built on
//! top of it.

pub(crate) mod memory;
pub(crate) mod process;

pub use memory::{MemoryReader, DEFAULT_MAX_READ_SIZE, MAX_CSTRING_SCAN};
pub use process::{
    FrameId, ModuleImage, SymbolCandidate, TargetProcess, INVALID_ADDRESS,
};
