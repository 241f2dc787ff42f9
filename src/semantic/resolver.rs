//! The semantic remote resolver.
//!
//! One resolver is bound to one [`ScratchContext`] for that context's whole
//! lifetime; the runtime's resolver map owns the pairing and tears the
//! resolver down before the context. Every operation here answers a question
//! about live target state (an object's actual class, an existential's
//! current inhabitant, a member's byte offset) by combining remote reads
//! with the context's declarations.

use std::sync::Arc;

use tracing::debug;

use crate::{
    abi::{mask_spare_bits, Architecture, PointerFixups},
    target::MemoryReader,
    types::{AllocationStrategy, ScratchContext, TypeIdentity, TypeShape},
    Error, Result,
};

/// Resolves dynamic types and member offsets against one semantic context.
pub struct SemanticRemoteResolver {
    ctx: Arc<ScratchContext>,
    arch: Architecture,
    fixups: PointerFixups,
}

impl SemanticRemoteResolver {
    /// Bind a resolver to a context and the target's architecture.
    #[must_use]
    pub fn new(ctx: Arc<ScratchContext>, arch: Architecture) -> Self {
        let fixups = PointerFixups::for_architecture(&arch);
        SemanticRemoteResolver { ctx, arch, fixups }
    }

    /// The context this resolver is bound to.
    #[must_use]
    pub fn context(&self) -> &Arc<ScratchContext> {
        &self.ctx
    }

    /// Generation of the bound context.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.ctx.generation()
    }

    /// Whether a type's declaration is sound enough for semantic resolution.
    ///
    /// Damaged declarations (missing variable binding patterns after a failed
    /// cross-module import) and poisoned contexts both disqualify; callers
    /// fall back to reflection.
    #[must_use]
    pub fn is_safe_for_semantic_resolution(&self, ty: TypeIdentity) -> bool {
        !self.ctx.has_fatal_errors() && self.ctx.is_complete(ty)
    }

    /// The dynamic type of a class instance.
    ///
    /// Masks the architecture's spare bits off the object address, reads the
    /// heap metadata pointer stored in the instance's first word, and looks
    /// it up in the context's metadata registry.
    pub fn dynamic_type_of_class_instance(
        &self,
        reader: &MemoryReader,
        instance_address: u64,
    ) -> Result<TypeIdentity> {
        if instance_address == 0 {
            return Err(Error::NoDynamicType);
        }
        let (masked, _) = mask_spare_bits(&self.fixups, instance_address);
        let metadata = reader.read_pointer(masked)?;
        self.ctx
            .type_for_metadata(metadata)
            .ok_or_else(|| Error::TypeNotFound(format!("metadata at {metadata:#x}")))
    }

    /// The dynamic type and payload address of a protocol existential.
    ///
    /// Class-constrained existentials hold a single instance pointer; the
    /// payload is the instance itself. Opaque existentials hold the payload
    /// words followed by the metadata word; a non-inline inhabitant lives in
    /// a heap box behind word zero, past the box's two-word header. Reads go
    /// through the supplied reader, so an active local-buffer override (the
    /// const-result case) is honored transparently.
    pub fn dynamic_type_of_existential(
        &self,
        reader: &MemoryReader,
        container_address: u64,
        static_ty: TypeIdentity,
    ) -> Result<(TypeIdentity, u64)> {
        let desc = self.ctx.ty(static_ty)?;
        let TypeShape::Protocol {
            class_constrained,
            num_storage_words,
        } = desc.shape
        else {
            return Err(Error::Resolution(format!(
                "{} is not an existential",
                desc.name
            )));
        };
        let ptr = reader.pointer_size();

        if class_constrained {
            let instance = reader.read_pointer(container_address)?;
            let (instance, _) = mask_spare_bits(&self.fixups, instance);
            let dynamic = self.dynamic_type_of_class_instance(reader, instance)?;
            return Ok((dynamic, instance));
        }

        let metadata = reader.read_pointer(container_address + num_storage_words * ptr)?;
        let dynamic = self
            .ctx
            .type_for_metadata(metadata)
            .ok_or_else(|| Error::TypeNotFound(format!("metadata at {metadata:#x}")))?;

        let payload = if self.is_inlined_in_container(dynamic) {
            container_address
        } else {
            // Out-of-line inhabitant: word zero points at a heap box whose
            // payload follows the two-word header.
            reader.read_pointer(container_address)? + 2 * ptr
        };
        debug!(
            container = format_args!("{container_address:#x}"),
            payload = format_args!("{payload:#x}"),
            "resolved existential"
        );
        Ok((dynamic, payload))
    }

    fn is_inlined_in_container(&self, ty: TypeIdentity) -> bool {
        match self.ctx.ty(ty) {
            Ok(desc) => match desc.alloc {
                AllocationStrategy::Inline => true,
                AllocationStrategy::Pointer | AllocationStrategy::Dynamic => false,
                AllocationStrategy::Unknown => matches!(
                    desc.shape,
                    TypeShape::Builtin { size } if size <= 3 * u64::from(self.arch.pointer_bytes)
                ),
            },
            Err(_) => false,
        }
    }

    /// Byte offset of a member within a value of type `ty`.
    ///
    /// Tuple members are addressed by decimal element index. Class members
    /// without a statically known offset need dynamic dispatch, which reads
    /// the concrete subclass out of the instance's metadata; callers that
    /// have no instance get [`Error::InstanceRequired`].
    pub fn offset_of_member(
        &self,
        reader: &MemoryReader,
        ty: TypeIdentity,
        instance_address: Option<u64>,
        member: &str,
    ) -> Result<u64> {
        let desc = self.ctx.ty(ty)?;
        match &desc.shape {
            TypeShape::Tuple { elements } => {
                let index: usize = member.parse().map_err(|_| Error::MemberNotFound {
                    type_name: desc.name.clone(),
                    member: member.to_string(),
                })?;
                if index >= elements.len() {
                    return Err(Error::TupleIndexOutOfBounds {
                        index,
                        count: elements.len(),
                    });
                }
                self.tuple_element_offset(elements, index)
            }
            TypeShape::Struct { members } => {
                let decl = members.iter().find(|m| m.name == member).ok_or_else(|| {
                    Error::MemberNotFound {
                        type_name: desc.name.clone(),
                        member: member.to_string(),
                    }
                })?;
                decl.offset.ok_or_else(|| {
                    Error::Resolution(format!(
                        "no static offset for {}.{member}",
                        desc.name
                    ))
                })
            }
            TypeShape::Class { members } => {
                if let Some(decl) = members.iter().find(|m| m.name == member) {
                    if let Some(offset) = decl.offset {
                        return Ok(offset);
                    }
                }
                // Not statically laid out: ask the concrete subclass.
                let instance = instance_address.ok_or(Error::InstanceRequired)?;
                let dynamic = self.dynamic_type_of_class_instance(reader, instance)?;
                if dynamic == ty {
                    return Err(Error::MemberNotFound {
                        type_name: desc.name.clone(),
                        member: member.to_string(),
                    });
                }
                self.offset_of_member(reader, dynamic, None, member)
            }
            _ => Err(Error::MemberNotFound {
                type_name: desc.name.clone(),
                member: member.to_string(),
            }),
        }
    }

    /// Packed tuple layout: each element aligned to its natural alignment,
    /// capped at the machine word.
    fn tuple_element_offset(&self, elements: &[TypeIdentity], index: usize) -> Result<u64> {
        let word = u64::from(self.arch.pointer_bytes);
        let mut offset = 0u64;
        for (i, &element) in elements.iter().enumerate() {
            let size = self.static_byte_size(element)?;
            let align = size.next_power_of_two().min(word).max(1);
            offset = offset.div_ceil(align) * align;
            if i == index {
                return Ok(offset);
            }
            offset += size;
        }
        unreachable!("index was bounds-checked");
    }

    fn static_byte_size(&self, ty: TypeIdentity) -> Result<u64> {
        let desc = self.ctx.ty(ty)?;
        match desc.shape {
            TypeShape::Builtin { size } => Ok(size),
            TypeShape::Class { .. }
            | TypeShape::Pointer { .. }
            | TypeShape::Reference { .. }
            | TypeShape::UnownedStorage { .. }
            | TypeShape::WeakStorage { .. } => Ok(u64::from(self.arch.pointer_bytes)),
            _ => Err(Error::Resolution(format!(
                "size of {} is not statically known",
                desc.name
            ))),
        }
    }

    /// The concrete type hidden behind an opaque type descriptor.
    ///
    /// The descriptor symbol may be defined in several images. Every
    /// candidate that yields an answer must yield the same one; a
    /// disagreement leaves the opaque type unresolved rather than guessing.
    pub fn underlying_type_of_opaque(
        &self,
        reader: &MemoryReader,
        descriptor_symbol: &str,
        ordinal: u32,
    ) -> Result<TypeIdentity> {
        let candidates = reader.defined_symbols(descriptor_symbol);
        if candidates.is_empty() {
            return Err(Error::SymbolNotFound(descriptor_symbol.to_string()));
        }

        let slot = u64::from(ordinal) * reader.pointer_size();
        let mut agreed: Option<TypeIdentity> = None;
        for candidate in candidates {
            let Ok(metadata) = reader.read_pointer(candidate + slot) else {
                continue;
            };
            let Some(id) = self.ctx.type_for_metadata(metadata) else {
                continue;
            };
            match agreed {
                None => agreed = Some(id),
                Some(prev) if prev == id => {}
                Some(_) => {
                    return Err(Error::AmbiguousOpaque(descriptor_symbol.to_string()));
                }
            }
        }
        agreed.ok_or_else(|| Error::TypeNotFound(descriptor_symbol.to_string()))
    }
}
