//! The shared "scratch" semantic context.
//!
//! All expression evaluation and dynamic type resolution happen against a
//! single shared, mutable semantic context. Interning new types is legal
//! while only the shared lock is held (the arena is append-only), but a
//! failed cross-module import poisons the context permanently: a fatal
//! context is never repaired, only replaced wholesale by the maintenance path
//! that polls the scratch lock's writer side.
//!
//! Each context carries a process-unique generation id. Type handles, cache
//! keys, and resolver bindings embed that id so stale state from a torn-down
//! context can never be confused with the replacement's.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::warn;

use crate::{
    types::{
        flags::TypeInfo,
        ty::{CaseDecl, TypeDesc, TypeIdentity, TypeShape},
    },
    Error, Result,
};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// A semantic type-system context: an append-only arena of type descriptors
/// plus the runtime registry mapping remote metadata addresses to types.
pub struct ScratchContext {
    generation: u64,
    types: boxcar::Vec<TypeDesc>,
    by_mangled: DashMap<String, TypeIdentity>,
    metadata_registry: DashMap<u64, TypeIdentity>,
    poisoned_imports: DashMap<String, ()>,
    fatal: AtomicBool,
}

impl ScratchContext {
    /// Create an empty context with a fresh generation id.
    #[must_use]
    pub fn new() -> Self {
        ScratchContext {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            types: boxcar::Vec::new(),
            by_mangled: DashMap::new(),
            metadata_registry: DashMap::new(),
            poisoned_imports: DashMap::new(),
            fatal: AtomicBool::new(false),
        }
    }

    /// Process-unique generation id of this context. Embedded in every
    /// [`TypeIdentity`] and cache key derived from it.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this context has entered its permanent fatal state.
    #[must_use]
    pub fn has_fatal_errors(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    /// Enter the permanent fatal state. There is deliberately no way back;
    /// a poisoned context must be replaced, never repaired.
    pub fn set_fatal(&self) {
        self.fatal.store(true, Ordering::Release);
    }

    /// Intern a type descriptor, returning its stable handle.
    ///
    /// A descriptor whose mangled name is already interned returns the
    /// existing handle instead of allocating a duplicate slot.
    pub fn intern(&self, desc: TypeDesc) -> TypeIdentity {
        if !desc.mangled.is_empty() {
            if let Some(existing) = self.by_mangled.get(&desc.mangled) {
                return *existing;
            }
        }
        let mangled = desc.mangled.clone();
        let index = self.types.push(desc) as u32;
        let id = TypeIdentity {
            context: self.generation,
            index,
        };
        if !mangled.is_empty() {
            self.by_mangled.insert(mangled, id);
        }
        id
    }

    /// Resolve a handle to its descriptor. Fails for handles minted by a
    /// different (possibly torn down) context.
    pub fn ty(&self, id: TypeIdentity) -> Result<&TypeDesc> {
        if id.context != self.generation {
            return Err(Error::TypeNotFound(format!(
                "type handle {}:{} from foreign context",
                id.context, id.index
            )));
        }
        self.types
            .get(id.index as usize)
            .ok_or_else(|| Error::TypeNotFound(format!("type slot {}", id.index)))
    }

    /// Category flags of a type; empty flags for a stale handle.
    #[must_use]
    pub fn type_info(&self, id: TypeIdentity) -> TypeInfo {
        self.ty(id).map(|d| d.info).unwrap_or(TypeInfo::empty())
    }

    /// Look up a type by its canonical mangled name.
    #[must_use]
    pub fn lookup_mangled(&self, mangled: &str) -> Option<TypeIdentity> {
        self.by_mangled.get(mangled).map(|r| *r)
    }

    /// Register the type a remote metadata record describes.
    ///
    /// Populated while modules load; queried by class-instance and
    /// existential resolution and by metadata promises.
    pub fn register_metadata(&self, metadata_address: u64, id: TypeIdentity) {
        self.metadata_registry.insert(metadata_address, id);
    }

    /// The type registered for a remote metadata address, if any.
    #[must_use]
    pub fn type_for_metadata(&self, metadata_address: u64) -> Option<TypeIdentity> {
        self.metadata_registry.get(&metadata_address).map(|r| *r)
    }

    /// Mark a mangled name as poisonous to import.
    ///
    /// Stands in for the damaged-module condition: importing a declaration
    /// from such a module permanently poisons the importing context.
    pub fn poison_import(&self, mangled: &str) {
        self.poisoned_imports.insert(mangled.to_string(), ());
    }

    /// Import a type from another context into this one, by structure.
    ///
    /// Handles already owned by this context pass through. A name that was
    /// marked poisonous sets the fatal state and fails; referenced types are
    /// imported recursively.
    pub fn import_type(&self, source: &ScratchContext, id: TypeIdentity) -> Result<TypeIdentity> {
        if id.context == self.generation {
            return Ok(id);
        }
        if self.has_fatal_errors() {
            return Err(Error::FatalContext);
        }

        let desc = source.ty(id)?;
        if self.poisoned_imports.contains_key(&desc.mangled) {
            warn!(mangled = %desc.mangled, "cross-module import failed; poisoning scratch context");
            self.set_fatal();
            return Err(Error::FatalContext);
        }
        if let Some(existing) = self.lookup_mangled(&desc.mangled) {
            return Ok(existing);
        }

        let mut imported = desc.clone();
        imported.shape = self.import_shape(source, &desc.shape)?;
        Ok(self.intern(imported))
    }

    fn import_shape(&self, source: &ScratchContext, shape: &TypeShape) -> Result<TypeShape> {
        let mut shape = shape.clone();
        match &mut shape {
            TypeShape::Struct { members } | TypeShape::Class { members } => {
                for member in members {
                    if let Some(ty) = member.ty {
                        member.ty = Some(self.import_type(source, ty)?);
                    }
                }
            }
            TypeShape::Enumeration { cases } => {
                for case in cases {
                    if let Some(payload) = case.payload {
                        case.payload = Some(self.import_type(source, payload)?);
                    }
                }
            }
            TypeShape::Tuple { elements } => {
                for element in elements {
                    *element = self.import_type(source, *element)?;
                }
            }
            TypeShape::Pointer { pointee: Some(pointee) } => {
                *pointee = self.import_type(source, *pointee)?;
            }
            TypeShape::Reference { referent }
            | TypeShape::UnownedStorage { referent }
            | TypeShape::WeakStorage { referent } => {
                *referent = self.import_type(source, *referent)?;
            }
            _ => {}
        }
        Ok(shape)
    }

    /// Import a class name vended by the foreign runtime, wrapped the way
    /// bridged dynamic results are always expressed: as an optional of the
    /// foreign class.
    pub fn import_foreign_class(&self, name: &str) -> Result<TypeIdentity> {
        if self.has_fatal_errors() {
            return Err(Error::FatalContext);
        }

        let class_mangled = format!("$sSo{}{}C", name.len(), name);
        let class_id = self.intern(TypeDesc {
            name: name.to_string(),
            mangled: class_mangled.clone(),
            info: TypeInfo::NATIVE
                | TypeInfo::CLASS
                | TypeInfo::FOREIGN
                | TypeInfo::INSTANCE_IS_POINTER,
            shape: TypeShape::Class { members: Vec::new() },
            alloc: Default::default(),
        });

        Ok(self.intern(TypeDesc {
            name: format!("{name}?"),
            mangled: format!("{class_mangled}Sg"),
            info: TypeInfo::NATIVE | TypeInfo::ENUMERATION | TypeInfo::HAS_VALUE,
            shape: TypeShape::Enumeration {
                cases: vec![
                    CaseDecl {
                        name: "some".into(),
                        payload: Some(class_id),
                        indirect: false,
                    },
                    CaseDecl {
                        name: "none".into(),
                        payload: None,
                        indirect: false,
                    },
                ],
            },
            alloc: Default::default(),
        }))
    }

    /// Decode which enumeration case a value's bytes select.
    ///
    /// The leading tag byte indexes the case list in declaration order.
    pub fn selected_enum_case(&self, enum_ty: TypeIdentity, bytes: &[u8]) -> Result<CaseDecl> {
        let desc = self.ty(enum_ty)?;
        let TypeShape::Enumeration { cases } = &desc.shape else {
            return Err(Error::Resolution(format!(
                "{} is not an enumeration",
                desc.name
            )));
        };
        let tag = *bytes.first().ok_or(Error::OutOfBounds)? as usize;
        cases.get(tag).cloned().ok_or_else(|| {
            Error::Resolution(format!("case tag {tag} out of range for {}", desc.name))
        })
    }

    /// Structural completeness check for semantic resolution.
    ///
    /// Walks the declaration (members, payloads, elements, referents); any
    /// stored member whose variable binding pattern is missing marks the
    /// whole type as import-damaged. Such types must be resolved through
    /// reflection instead.
    #[must_use]
    pub fn is_complete(&self, id: TypeIdentity) -> bool {
        let mut visited = Vec::new();
        self.walk_complete(id, &mut visited)
    }

    fn walk_complete(&self, id: TypeIdentity, visited: &mut Vec<u32>) -> bool {
        if visited.contains(&id.index) {
            return true;
        }
        visited.push(id.index);

        let Ok(desc) = self.ty(id) else {
            return false;
        };
        match &desc.shape {
            TypeShape::Struct { members } | TypeShape::Class { members } => {
                members.iter().all(|m| {
                    m.has_binding_pattern
                        && m.ty.is_none_or(|ty| self.walk_complete(ty, visited))
                })
            }
            TypeShape::Enumeration { cases } => cases
                .iter()
                .all(|c| c.payload.is_none_or(|ty| self.walk_complete(ty, visited))),
            TypeShape::Tuple { elements } => {
                elements.iter().all(|&ty| self.walk_complete(ty, visited))
            }
            TypeShape::Pointer { pointee } => {
                pointee.is_none_or(|ty| self.walk_complete(ty, visited))
            }
            TypeShape::Reference { referent }
            | TypeShape::UnownedStorage { referent }
            | TypeShape::WeakStorage { referent } => self.walk_complete(*referent, visited),
            _ => true,
        }
    }
}

impl Default for ScratchContext {
    fn default() -> Self {
        ScratchContext::new()
    }
}
