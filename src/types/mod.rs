//! The semantic type model: descriptors, flags, values, and the shared
//! scratch context they live in.
//!
//! # Key Components
//!
//! - [`TypeDesc`] / [`TypeIdentity`] - type descriptors and their stable,
//!   hashable handles (the cache keys)
//! - [`TypeInfo`] - the category flag word the engine dispatches on
//! - [`ScratchContext`] - the shared, replaceable semantic context
//! - [`ValueDescriptor`] / [`ValueLocation`] - what the engine is told about
//!   one observed value

mod context;
mod flags;
mod ty;
mod value;

pub use context::ScratchContext;
pub use flags::TypeInfo;
pub use ty::{AllocationStrategy, CaseDecl, MemberDecl, TypeDesc, TypeIdentity, TypeShape};
pub use value::{ValueDescriptor, ValueLocation};
