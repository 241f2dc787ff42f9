//! Semantic-context side of type resolution.
//!
//! The [`SemanticRemoteResolver`] answers dynamic-type and layout questions
//! by pairing a [`crate::types::ScratchContext`]'s declarations with remote
//! reads. The promise and offset caches memoize the expensive parts; both
//! are keyed on context generation so a replaced context starts cold.

mod offsets;
mod promise;
mod resolver;

pub use offsets::MemberOffsetCache;
pub use promise::{MetadataPromise, PromiseCache};
pub use resolver::SemanticRemoteResolver;
