//! Append-only index over the reflection metadata of loaded modules.
//!
//! The index is built lazily, per process: modules announced through
//! [`ReflectionContext::add_module`] sit in a pending queue until the next
//! query, which merges them in first. The index only ever grows; modules are
//! never removed. A module without a reflection section is skipped silently,
//! and a module whose section fails to parse is skipped with a warning;
//! neither condition fails a query.

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use crossbeam_skiplist::SkipMap;
use tracing::{debug, warn};

use crate::{
    reflection::{blob, layout::TypeLayout},
    target::{MemoryReader, ModuleImage},
};

/// Parsed reflection data of one module.
struct ModuleReflection {
    name: String,
    layouts: HashMap<String, TypeLayout>,
    bindings: HashMap<u64, String>,
}

/// The reflection-metadata resolver: answers layout questions from binary
/// reflection alone, with no semantic context involved.
pub struct ReflectionContext {
    modules: SkipMap<u64, Arc<ModuleReflection>>,
    pending: boxcar::Vec<ModuleImage>,
    // Guards the merge cursor, not the index: merging is serialized, queries
    // against the SkipMap are not.
    merged: Mutex<usize>,
}

impl ReflectionContext {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        ReflectionContext {
            modules: SkipMap::new(),
            pending: boxcar::Vec::new(),
            merged: Mutex::new(0),
        }
    }

    /// Queue a loaded module for indexing. Merged in before the next query.
    pub fn add_module(&self, image: ModuleImage) {
        self.pending.push(image);
    }

    /// Merge all queued modules into the index.
    fn merge_pending(&self, reader: &MemoryReader) {
        let mut merged = self.merged.lock().unwrap();
        while *merged < self.pending.count() {
            let Some(image) = self.pending.get(*merged) else {
                break;
            };
            *merged += 1;

            let Some((address, len)) = image.reflection_section else {
                // No reflection data in this module; nothing to index.
                continue;
            };
            let bytes = match reader.read_bytes(address, len) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(module = %image.name, %err, "couldn't read reflection section");
                    continue;
                }
            };
            let section = match blob::parse_section(&bytes) {
                Ok(section) => section,
                Err(err) => {
                    warn!(module = %image.name, %err, "couldn't parse reflection section");
                    continue;
                }
            };

            debug!(
                module = %image.name,
                layouts = section.layouts.len(),
                bindings = section.bindings.len(),
                "indexed reflection section"
            );
            self.modules.insert(
                image.id,
                Arc::new(ModuleReflection {
                    name: image.name.clone(),
                    layouts: section.layouts.into_iter().collect(),
                    bindings: section.bindings.into_iter().collect(),
                }),
            );
        }
    }

    /// Layout of the type with the given canonical mangled name.
    #[must_use]
    pub fn layout_of(&self, mangled: &str, reader: &MemoryReader) -> Option<TypeLayout> {
        self.merge_pending(reader);
        for entry in self.modules.iter() {
            if let Some(layout) = entry.value().layouts.get(mangled) {
                return Some(layout.clone());
            }
        }
        None
    }

    /// The mangled name bound to a runtime metadata address, if any module
    /// declared one.
    #[must_use]
    pub fn binding_for_metadata(&self, metadata_address: u64, reader: &MemoryReader) -> Option<String> {
        self.merge_pending(reader);
        for entry in self.modules.iter() {
            if let Some(name) = entry.value().bindings.get(&metadata_address) {
                return Some(name.clone());
            }
        }
        None
    }

    /// In-memory layout of a live object: reads the instance's metadata
    /// pointer and resolves the layout bound to that metadata.
    #[must_use]
    pub fn instance_layout(&self, instance_address: u64, reader: &MemoryReader) -> Option<TypeLayout> {
        let metadata = reader.read_pointer(instance_address).ok()?;
        let mangled = self.binding_for_metadata(metadata, reader)?;
        self.layout_of(&mangled, reader)
    }

    /// Whether a value of this type is stored inline in abstract slots:
    /// bitwise movable and at most three pointer-sized words. Types with no
    /// layout information default to inline, matching the runtime's own
    /// assumption for trivial types.
    #[must_use]
    pub fn is_stored_inline(&self, mangled: &str, reader: &MemoryReader) -> bool {
        match self.layout_of(mangled, reader) {
            Some(layout) => layout.bitwise_takable && layout.size <= 3 * reader.pointer_size(),
            None => true,
        }
    }

    /// Name of the module that declared a mangled name; diagnostics only.
    #[must_use]
    pub fn declaring_module(&self, mangled: &str, reader: &MemoryReader) -> Option<String> {
        self.merge_pending(reader);
        for entry in self.modules.iter() {
            if entry.value().layouts.contains_key(mangled) {
                return Some(entry.value().name.clone());
            }
        }
        None
    }
}

impl Default for ReflectionContext {
    fn default() -> Self {
        ReflectionContext::new()
    }
}
