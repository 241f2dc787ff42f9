use thiserror::Error;

/// The generic Error type, covering every failure this library can surface.
///
/// All expected failures in dynscope are ordinary return-path outcomes: remote
/// reads that come up short, symbols that cannot be resolved, types whose
/// declarations turned out to be damaged, and so on. Nothing in this crate
/// panics for an expected failure.
///
/// # Error Categories
///
/// ## Remote I/O
/// - [`Error::OutOfBounds`] - Access outside a local buffer or address overflow
/// - [`Error::ShortRead`] - The target returned fewer bytes than requested
/// - [`Error::ReadTooLarge`] - Request exceeded the configured read ceiling
/// - [`Error::TargetError`] - The target process reported a read failure
///
/// ## Symbols
/// - [`Error::SymbolNotFound`] - No defined symbol with the given name
/// - [`Error::SymbolAmbiguous`] - Multiple definitions that disagree in memory
///
/// ## Type System
/// - [`Error::TypeNotFound`] - No type registered for a metadata address or name
/// - [`Error::IncompleteType`] - Structurally damaged declaration, semantic
///   resolution refused
/// - [`Error::FatalContext`] - The scratch context is permanently poisoned
/// - [`Error::AmbiguousOpaque`] - Opaque descriptor candidates disagree
///
/// ## Resolution
/// - [`Error::NoDynamicType`] - The value cannot have a dynamic type
/// - [`Error::TupleIndexOutOfBounds`] - Tuple member index past the element count
/// - [`Error::MemberNotFound`] - No member with the given name
/// - [`Error::InstanceRequired`] - Dynamic dispatch needs an instance metadata
///   address that was not supplied
#[derive(Error, Debug)]
pub enum Error {
    /// An out of bound access was attempted.
    ///
    /// Raised when a read range overflows the address space or falls partially
    /// outside an active local-buffer override.
    #[error("Out of bound access would have occurred")]
    OutOfBounds,

    /// The target returned fewer bytes than were requested.
    #[error("Short read: requested {requested} bytes, target returned {got}")]
    ShortRead {
        /// Number of bytes the caller asked for
        requested: u64,
        /// Number of bytes the target actually produced
        got: u64,
    },

    /// The requested read exceeds the configured maximum.
    ///
    /// The read ceiling is the only backpressure mechanism against a
    /// misbehaving or hostile target; oversized requests fail fast instead of
    /// issuing unbounded remote I/O.
    #[error("Read of {requested} bytes exceeds the {limit} byte ceiling")]
    ReadTooLarge {
        /// Number of bytes the caller asked for
        requested: u64,
        /// Configured maximum read size
        limit: u64,
    },

    /// The target process reported an error while servicing a read.
    #[error("Target error: {0}")]
    TargetError(String),

    /// No defined symbol with the given name exists in the target.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Several definitions of the symbol survive filtering and their in-memory
    /// values disagree, so no single address can be trusted.
    #[error("Symbol is ambiguous: {0}")]
    SymbolAmbiguous(String),

    /// No type is registered for the given metadata address or mangled name.
    #[error("No type registered for {0}")]
    TypeNotFound(String),

    /// The type declaration is structurally incomplete.
    ///
    /// Detected by walking the declaration for empty variable binding
    /// patterns, which appear when a cross-module import failed to resolve a
    /// member's type. Callers fall back to the reflection resolver.
    #[error("Type declaration is incomplete")]
    IncompleteType,

    /// The shared scratch context is in its permanent fatal state.
    ///
    /// A poisoned context is never repaired; the resolution engine answers
    /// this with a single bounded retry in per-module fallback mode.
    #[error("Scratch context has fatal errors")]
    FatalContext,

    /// Multiple opaque type descriptor symbols produced disagreeing
    /// underlying types. The opaque type stays unresolved rather than guessing.
    #[error("Opaque type resolution is ambiguous: {0}")]
    AmbiguousOpaque(String),

    /// A tuple member was addressed by an index past the element count.
    #[error("Tuple index {index} out of bounds ({count} elements)")]
    TupleIndexOutOfBounds {
        /// The parsed index
        index: usize,
        /// Number of elements the tuple actually has
        count: usize,
    },

    /// The type has no member with the requested name.
    #[error("No member named '{member}' on {type_name}")]
    MemberNotFound {
        /// Display name of the type that was searched
        type_name: String,
        /// The member name that failed to resolve
        member: String,
    },

    /// Resolving the member offset requires dynamic dispatch, which needs the
    /// instance's metadata address.
    #[error("Member offset requires an instance metadata address")]
    InstanceRequired,

    /// The value cannot have a dynamic type.
    ///
    /// This is the expected, non-diagnostic outcome for values whose static
    /// type is concrete, and for base-class sub-objects where dynamic
    /// resolution would recurse forever.
    #[error("Value has no dynamic type")]
    NoDynamicType,

    /// The memory reader's local buffer override was used out of discipline
    /// (double push, or pop without an active override).
    #[error("Local buffer override misuse: {0}")]
    LocalBufferMisuse(&'static str),

    /// Generic error for miscellaneous resolution failures.
    #[error("{0}")]
    Resolution(String),
}

/// Convenience `Result` type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
