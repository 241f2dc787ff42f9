//! The dynamic type resolution engine.
//!
//! Strategy dispatch over a value's static type category, in fixed
//! precedence: foreign-bridged delegation, the eligibility short-circuit,
//! indirect enum payloads, class instances, protocol existentials, and
//! finally archetype binding with re-dispatch on the bound type. The final
//! value-location kind comes from an exact lookup table over the static and
//! dynamic type flags; getting a row wrong mislocates the value's bytes.
//!
//! Every entry point requires the caller to hold the scratch cell's shared
//! side for the whole call, passed in as a [`ScratchReader`] proof token.
//! The engine never acquires the lock itself; acquisition and resolution
//! must be atomic from the context-replacement path's point of view.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    abi::mask_spare_bits,
    lock::ScratchReader,
    runtime::LanguageRuntime,
    types::{
        AllocationStrategy, ScratchContext, TypeDesc, TypeIdentity, TypeInfo, TypeShape,
        ValueDescriptor, ValueLocation,
    },
    Error, Result,
};

/// How much dynamic typing the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicValuePolicy {
    /// Static types only; resolution is refused outright
    NoDynamicValues,
    /// Full dynamic resolution, including remote reads
    DynamicCanRunTarget,
}

/// Outcome of one successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// The value's true runtime type
    pub ty: TypeIdentity,
    /// Address of the value's data after all fixups
    pub address: u64,
    /// Where the data lives from the debugger's point of view
    pub location: ValueLocation,
}

/// Bound on the opaque-type fixpoint loop; a descriptor chain longer than
/// this is a cycle.
const MAX_OPAQUE_DEPTH: usize = 16;

impl LanguageRuntime {
    /// Resolve a value's dynamic type and the address of its data.
    ///
    /// `guard` proves the scratch cell's shared side is held for the whole
    /// call. When the context is fatal, the engine switches the process to
    /// per-module fallback contexts and retries the whole resolution exactly
    /// once; a failure in fallback mode is final.
    pub fn resolve_dynamic_type_and_address(
        &self,
        value: &ValueDescriptor,
        policy: DynamicValuePolicy,
        guard: &ScratchReader<'_>,
    ) -> Result<Resolution> {
        if policy == DynamicValuePolicy::NoDynamicValues {
            return Err(Error::NoDynamicType);
        }

        let ctx = self.resolution_context(value, guard);
        match self.resolve_once(value, &ctx) {
            Ok(resolution) => Ok(resolution),
            Err(err) => {
                let fatal = matches!(err, Error::FatalContext) || ctx.has_fatal_errors();
                if fatal && self.enable_fallback_mode() {
                    warn!(value = %value.name, "retrying resolution under fallback contexts");
                    let ctx = self.resolution_context(value, guard);
                    self.resolve_once(value, &ctx)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// The context this resolution runs against: the module's private one in
    /// fallback mode, otherwise the guard's pinned shared context.
    fn resolution_context(
        &self,
        value: &ValueDescriptor,
        guard: &ScratchReader<'_>,
    ) -> Arc<ScratchContext> {
        match value.module {
            Some(module) if self.in_fallback_mode() => self.module_context(module),
            _ => guard.context().clone(),
        }
    }

    fn resolve_once(
        &self,
        value: &ValueDescriptor,
        ctx: &Arc<ScratchContext>,
    ) -> Result<Resolution> {
        if ctx.has_fatal_errors() {
            return Err(Error::FatalContext);
        }
        let desc = ctx.ty(value.static_type)?.clone();

        if desc.info.any_set(TypeInfo::FOREIGN) {
            return self.resolve_foreign(value, ctx);
        }
        if !could_have_dynamic_value(value, desc.info) {
            return Err(Error::NoDynamicType);
        }
        if value.is_indirect_enum_case {
            return self.resolve_indirect_enum(value, ctx);
        }
        if is_class_pointer(desc.info) {
            return self.resolve_class(value, ctx);
        }
        if desc.info.any_set(TypeInfo::PROTOCOL) {
            return self.resolve_existential(value, ctx);
        }
        if desc.info.any_set(TypeInfo::GENERIC_PARAM | TypeInfo::OPAQUE) {
            return self.resolve_archetype(value, ctx);
        }
        Err(Error::NoDynamicType)
    }

    /// Strategy 1: the static type belongs to the bridged type system.
    ///
    /// The foreign runtime names the instance's class; names matching its
    /// internal value-type conventions are rejected as not a genuine dynamic
    /// type. A recognized name is imported into the context wrapped as an
    /// optional of the foreign class.
    fn resolve_foreign(
        &self,
        value: &ValueDescriptor,
        ctx: &Arc<ScratchContext>,
    ) -> Result<Resolution> {
        let hook = self.foreign_runtime().ok_or(Error::NoDynamicType)?;
        let instance = value.pointer_value().ok_or(Error::NoDynamicType)?;
        let (masked, _) = mask_spare_bits(self.fixups(), instance);

        let name = hook
            .dynamic_class_name(self.reader(), masked)
            .ok_or(Error::NoDynamicType)?;
        if is_foreign_internal_name(&name) {
            debug!(%name, "foreign class name is runtime-internal, not a dynamic type");
            return Err(Error::NoDynamicType);
        }

        let ty = ctx.import_foreign_class(&name)?;
        Ok(Resolution {
            ty,
            address: masked,
            location: ValueLocation::LoadAddress,
        })
    }

    /// Strategy 3: the value is the payload slot of an indirect enum case.
    ///
    /// The parent enum's bytes select the case; an indirect payload lives in
    /// a heap box. The box header points at a box metadata record whose
    /// second field is the payload's byte offset within the box. The
    /// returned address is always the box's own address, never the
    /// payload's: the caller re-reads through the box on every access.
    fn resolve_indirect_enum(
        &self,
        value: &ValueDescriptor,
        ctx: &Arc<ScratchContext>,
    ) -> Result<Resolution> {
        let parent = value
            .parent
            .as_deref()
            .ok_or_else(|| Error::Resolution("indirect enum payload without a parent".into()))?;
        let parent_bytes = match &parent.bytes {
            Some(bytes) => bytes.clone(),
            None => {
                let address = parent.address_of().ok_or(Error::NoDynamicType)?;
                self.reader().read_bytes(address, parent.byte_size.max(1))?
            }
        };
        let case = ctx.selected_enum_case(parent.static_type, &parent_bytes)?;
        let payload = case.payload.ok_or(Error::NoDynamicType)?;

        if !case.indirect {
            let address = value.address_of().ok_or(Error::NoDynamicType)?;
            return Ok(Resolution {
                ty: payload,
                address,
                location: ValueLocation::LoadAddress,
            });
        }

        let raw_box = value.pointer_value().ok_or(Error::NoDynamicType)?;
        let (box_addr, _) = mask_spare_bits(self.fixups(), raw_box);
        let box_location = self.reader().read_pointer(box_addr)?;
        let (box_location, _) = mask_spare_bits(self.fixups(), box_location);

        // Box metadata record: a pointer-sized kind word, then the payload
        // offset as a u32.
        let offset = u64::from(
            self.reader()
                .read_u32(box_location + self.reader().pointer_size())?,
        );
        let box_value = box_addr + offset;

        // One byte peek to confirm the payload is reachable at all.
        self.reader().read_bytes(box_value, 1)?;

        let payload_desc = ctx.ty(payload)?.clone();
        if is_class_pointer(payload_desc.info) {
            let mut child = ValueDescriptor::new(value.name.clone(), payload);
            child.location = ValueLocation::LoadAddress;
            child.address = box_value;
            child.scalar = self.reader().read_pointer(box_value)?;
            child.frame = value.frame;
            child.module = value.module;
            let inner = self.resolve_once(&child, ctx)?;
            return Ok(Resolution {
                ty: inner.ty,
                address: box_value,
                location: ValueLocation::LoadAddress,
            });
        }
        if payload_desc.info.any_set(TypeInfo::PROTOCOL) {
            let resolver = self.resolver_for(ctx);
            let (dynamic, _) =
                resolver.dynamic_type_of_existential(self.reader(), box_value, payload)?;
            return Ok(Resolution {
                ty: dynamic,
                address: box_value,
                location: ValueLocation::LoadAddress,
            });
        }
        Ok(Resolution {
            ty: payload,
            address: box_value,
            location: ValueLocation::LoadAddress,
        })
    }

    /// Strategy 4: a class instance (or pointer-with-value built-in).
    ///
    /// The semantic resolver answers when the static declaration passes the
    /// completeness check; an import-damaged declaration falls back to the
    /// reflection index's metadata bindings.
    fn resolve_class(
        &self,
        value: &ValueDescriptor,
        ctx: &Arc<ScratchContext>,
    ) -> Result<Resolution> {
        let instance = match value.pointer_value() {
            Some(pointer) => pointer,
            None => {
                let address = value.address_of().ok_or(Error::NoDynamicType)?;
                self.reader().read_pointer(address)?
            }
        };
        let (masked, _) = mask_spare_bits(self.fixups(), instance);

        let resolver = self.resolver_for(ctx);
        let dynamic = if resolver.is_safe_for_semantic_resolution(value.static_type) {
            resolver.dynamic_type_of_class_instance(self.reader(), masked)?
        } else {
            debug!(value = %value.name, "declaration is import-damaged, using reflection bindings");
            let metadata = self.reader().read_pointer(masked)?;
            let mangled = self
                .reflection()
                .binding_for_metadata(metadata, self.reader())
                .ok_or(Error::IncompleteType)?;
            ctx.lookup_mangled(&mangled)
                .ok_or(Error::TypeNotFound(mangled))?
        };

        let location = self.dynamic_value_location(ctx, value, dynamic);
        Ok(Resolution {
            ty: dynamic,
            address: masked,
            location,
        })
    }

    /// Strategy 5: a protocol existential.
    ///
    /// Const results were materialized into debugger memory; their bytes are
    /// pushed as the reader's local-buffer override so the resolver's reads
    /// land on host memory transparently.
    fn resolve_existential(
        &self,
        value: &ValueDescriptor,
        ctx: &Arc<ScratchContext>,
    ) -> Result<Resolution> {
        let container = value.address_of().ok_or(Error::NoDynamicType)?;
        let resolver = self.resolver_for(ctx);

        let (dynamic, payload) = if value.is_const_result {
            let bytes = value.bytes.clone().ok_or(Error::NoDynamicType)?;
            self.reader().with_local_buffer(container, bytes, |reader| {
                resolver.dynamic_type_of_existential(reader, container, value.static_type)
            })?
        } else {
            resolver.dynamic_type_of_existential(self.reader(), container, value.static_type)?
        };

        let location = self.dynamic_value_location(ctx, value, dynamic);
        Ok(Resolution {
            ty: dynamic,
            address: payload,
            location,
        })
    }

    /// Strategy 6: archetype binding for generic parameters and opaque
    /// result types, then re-dispatch on the bound type's category.
    fn resolve_archetype(
        &self,
        value: &ValueDescriptor,
        ctx: &Arc<ScratchContext>,
    ) -> Result<Resolution> {
        let bound = self.bind_abstract_type(value, ctx)?;
        if bound == value.static_type {
            return Err(Error::NoDynamicType);
        }
        let bound_info = ctx.type_info(bound);

        let mut bound_value = value.clone();
        bound_value.static_type = bound;
        if is_class_pointer(bound_info) {
            return self.resolve_class(&bound_value, ctx);
        }
        if bound_info.any_set(TypeInfo::PROTOCOL) {
            return self.resolve_existential(&bound_value, ctx);
        }

        // A plain value: its data is wherever the value already is.
        let address = value.address_of().ok_or(Error::NoDynamicType)?;
        let location = self.dynamic_value_location(ctx, value, bound);
        Ok(Resolution {
            ty: bound,
            address,
            location,
        })
    }

    /// Substitute free generic parameters from the frame's binding table and
    /// resolve opaque descriptors to a fixpoint.
    ///
    /// A descriptor whose candidate symbols disagree leaves the type
    /// unresolved: guessing between two underlying types would be worse than
    /// reporting no dynamic type at all.
    fn bind_abstract_type(
        &self,
        value: &ValueDescriptor,
        ctx: &Arc<ScratchContext>,
    ) -> Result<TypeIdentity> {
        let mut current = value.static_type;
        for _ in 0..MAX_OPAQUE_DEPTH {
            let shape = ctx.ty(current)?.shape.clone();
            match shape {
                TypeShape::GenericParam { depth, index } => {
                    let frame = value.frame.ok_or(Error::NoDynamicType)?;
                    current = self.bind_generic_param(ctx, frame, depth, index)?;
                }
                TypeShape::Opaque {
                    descriptor_symbol,
                    ordinal,
                } => {
                    let resolver = self.resolver_for(ctx);
                    match resolver.underlying_type_of_opaque(
                        self.reader(),
                        &descriptor_symbol,
                        ordinal,
                    ) {
                        Ok(next) if next != current => current = next,
                        Ok(_) => return Ok(current),
                        Err(Error::AmbiguousOpaque(symbol)) => {
                            debug!(%symbol, "opaque descriptor candidates disagree, leaving unresolved");
                            return Err(Error::NoDynamicType);
                        }
                        Err(err) => return Err(err),
                    }
                }
                _ => return Ok(current),
            }
        }
        Err(Error::Resolution("opaque descriptor chain does not converge".into()))
    }

    /// The final value-location kind, from the lookup table over static and
    /// dynamic type flags. The rows encode the runtime's storage-strategy
    /// ABI; they are matched in order and the first hit wins.
    fn dynamic_value_location(
        &self,
        ctx: &Arc<ScratchContext>,
        value: &ValueDescriptor,
        dynamic: TypeIdentity,
    ) -> ValueLocation {
        let s = ctx.type_info(value.static_type);
        if s.any_set(TypeInfo::ERROR_TYPE) {
            return ValueLocation::LoadAddress;
        }
        let Ok(d) = ctx.ty(dynamic) else {
            return ValueLocation::Scalar;
        };

        if s.any_set(TypeInfo::PROTOCOL | TypeInfo::GENERIC_PARAM) {
            match d.alloc {
                AllocationStrategy::Inline => return value.location,
                AllocationStrategy::Pointer => return ValueLocation::LoadAddress,
                AllocationStrategy::Dynamic | AllocationStrategy::Unknown => {}
            }
        }
        if s.any_set(TypeInfo::GENERIC_PARAM)
            && d.info.all_clear(
                TypeInfo::POINTER | TypeInfo::REFERENCE | TypeInfo::INSTANCE_IS_POINTER,
            )
        {
            return ValueLocation::LoadAddress;
        }
        if (s.any_set(TypeInfo::POINTER)
            && s.all_clear(TypeInfo::GENERIC_PARAM | TypeInfo::BUILTIN))
            || value.is_indirect_enum_case
        {
            return ValueLocation::LoadAddress;
        }
        if s.any_set(TypeInfo::NATIVE)
            && d.info.any_set(TypeInfo::NATIVE)
            && d.info.all_clear(TypeInfo::POINTER | TypeInfo::INSTANCE_IS_POINTER)
        {
            return value.location;
        }
        ValueLocation::Scalar
    }

    /// Adjust a computed dynamic type's pointer/reference wrapping to match
    /// the static value's shape.
    pub fn fixup_dynamic_type(
        &self,
        dynamic: TypeIdentity,
        static_value: &ValueDescriptor,
        guard: &ScratchReader<'_>,
    ) -> Result<TypeIdentity> {
        let ctx = guard.context().as_ref();
        let s = ctx.type_info(static_value.static_type);
        let d = ctx.type_info(dynamic);

        if s.any_set(TypeInfo::POINTER)
            && s.all_clear(TypeInfo::GENERIC_PARAM | TypeInfo::BUILTIN)
            && !static_value.is_indirect_enum_case
        {
            return pointer_wrap(ctx, dynamic);
        }
        if s.any_set(TypeInfo::INSTANCE_IS_POINTER) && d.all_clear(TypeInfo::NATIVE) {
            return pointer_wrap(ctx, dynamic);
        }
        if s.any_set(TypeInfo::REFERENCE) {
            return reference_wrap(ctx, dynamic);
        }
        if s.any_set(TypeInfo::PROTOCOL)
            && d.any_set(TypeInfo::RUNTIME_GENERATED)
            && d.all_clear(TypeInfo::POINTER)
        {
            return pointer_wrap(ctx, dynamic);
        }
        Ok(dynamic)
    }
}

/// Guard against resolving values that cannot possibly have a dynamic type,
/// including base-class sub-objects of polymorphic instances (recursing into
/// those never terminates).
fn could_have_dynamic_value(value: &ValueDescriptor, info: TypeInfo) -> bool {
    if value.is_indirect_enum_case {
        return true;
    }
    if info.any_set(TypeInfo::INSTANCE_IS_POINTER) {
        return !value.is_base_class;
    }
    info.any_set(TypeInfo::PROTOCOL | TypeInfo::GENERIC_PARAM | TypeInfo::OPAQUE)
}

fn is_class_pointer(info: TypeInfo) -> bool {
    info.any_set(TypeInfo::INSTANCE_IS_POINTER)
        || info.all_set(TypeInfo::BUILTIN | TypeInfo::POINTER | TypeInfo::HAS_VALUE)
}

/// Names the foreign runtime uses for its own value-type plumbing; never a
/// genuine dynamic type.
fn is_foreign_internal_name(name: &str) -> bool {
    name.starts_with("__NS") || name.starts_with("_TtF")
}

fn pointer_wrap(ctx: &ScratchContext, pointee: TypeIdentity) -> Result<TypeIdentity> {
    let desc = ctx.ty(pointee)?;
    Ok(ctx.intern(TypeDesc {
        name: format!("{}*", desc.name),
        mangled: format!("{}Sp", desc.mangled),
        info: TypeInfo::NATIVE | TypeInfo::POINTER | TypeInfo::HAS_VALUE,
        shape: TypeShape::Pointer {
            pointee: Some(pointee),
        },
        alloc: AllocationStrategy::Pointer,
    }))
}

fn reference_wrap(ctx: &ScratchContext, referent: TypeIdentity) -> Result<TypeIdentity> {
    let desc = ctx.ty(referent)?;
    Ok(ctx.intern(TypeDesc {
        name: format!("{}&", desc.name),
        mangled: format!("{}Xr", desc.mangled),
        info: TypeInfo::NATIVE | TypeInfo::REFERENCE,
        shape: TypeShape::Reference { referent },
        alloc: AllocationStrategy::Pointer,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_value(ty: TypeIdentity) -> ValueDescriptor {
        ValueDescriptor::new("v", ty)
    }

    #[test]
    fn eligibility_guard() {
        let ty = TypeIdentity { context: 1, index: 0 };

        let mut indirect = base_value(ty);
        indirect.is_indirect_enum_case = true;
        assert!(could_have_dynamic_value(&indirect, TypeInfo::empty()));

        let mut base_slice = base_value(ty);
        base_slice.is_base_class = true;
        assert!(!could_have_dynamic_value(
            &base_slice,
            TypeInfo::INSTANCE_IS_POINTER
        ));
        assert!(could_have_dynamic_value(
            &base_value(ty),
            TypeInfo::INSTANCE_IS_POINTER
        ));

        assert!(could_have_dynamic_value(&base_value(ty), TypeInfo::PROTOCOL));
        assert!(could_have_dynamic_value(
            &base_value(ty),
            TypeInfo::GENERIC_PARAM
        ));
        assert!(!could_have_dynamic_value(
            &base_value(ty),
            TypeInfo::NATIVE | TypeInfo::STRUCT
        ));
    }

    #[test]
    fn foreign_internal_names_are_rejected() {
        assert!(is_foreign_internal_name("__NSCFString"));
        assert!(is_foreign_internal_name("_TtFSomething"));
        assert!(!is_foreign_internal_name("NSString"));
    }
}
