//! Reflection-metadata side of type resolution.
//!
//! Modules in a target carry a compact binary section describing type
//! layouts and metadata bindings. This module parses those sections
//! ([`blob`]), models the recovered layouts ([`TypeLayout`]), and indexes
//! them per process ([`ReflectionContext`]). Everything here operates on
//! binary truth alone and stays available even when the semantic context
//! has failed.

pub mod blob;
mod context;
mod layout;

pub use context::ReflectionContext;
pub use layout::{FieldLayout, RecordKind, TypeLayout};
