//! The process/target collaborator interface.
//!
//! dynscope never owns the debugged process. Everything it knows about the
//! target arrives through [`TargetProcess`]: raw memory by address and
//! length, symbol table lookups, the architecture descriptor, loaded module
//! images, and the generic-parameter bindings visible from a stack frame.
//! Live process plugins, core-file readers, and the synthetic targets used in
//! tests all implement this one trait.

use crate::abi::Architecture;

/// Reserved sentinel for "no address". Never a valid target address.
pub const INVALID_ADDRESS: u64 = u64::MAX;

/// Identifies a stack frame within the target's current stop state.
pub type FrameId = u64;

/// One candidate definition of a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolCandidate {
    /// Load address of the definition
    pub address: u64,
    /// `false` for import-table stubs and other undefined entries; those are
    /// filtered out before ambiguity is judged
    pub defined: bool,
}

/// A loaded module image as the target collaborator describes it.
///
/// Modules may or may not carry a reflection section; a module without one is
/// simply skipped by the reflection index.
#[derive(Debug, Clone)]
pub struct ModuleImage {
    /// Stable module identifier for the lifetime of the target
    pub id: u64,
    /// Display name, for diagnostics only
    pub name: String,
    /// Address and byte length of the module's type-layout reflection
    /// section in target memory, if the module has one
    pub reflection_section: Option<(u64, u64)>,
}

/// Pull-based access to the debugged target.
///
/// Implementations service synchronous, blocking reads; dynscope performs no
/// internal threading and has no read cancellation. A hung target hangs the
/// calling thread.
pub trait TargetProcess: Send + Sync {
    /// Architecture descriptor of the target.
    fn architecture(&self) -> Architecture;

    /// Read up to `buf.len()` bytes at `address` into `buf`, returning the
    /// number of bytes actually read. Errors are reported as a string; the
    /// memory reader wraps them into [`crate::Error::TargetError`].
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> std::result::Result<usize, String>;

    /// All symbol-table candidates for `name`, defined or not.
    fn symbols(&self, name: &str) -> Vec<SymbolCandidate>;

    /// The pointer-sized value of the frame variable `name` in `frame`, if
    /// such a variable exists and has a value. Used for the `$<name>` type
    /// metadata pointers the compiler materializes for generic frames.
    fn frame_variable(&self, frame: FrameId, name: &str) -> Option<u64>;
}
