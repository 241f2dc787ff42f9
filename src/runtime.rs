//! The language runtime facade.
//!
//! [`LanguageRuntime`] is what the debugger's formatting and expression
//! collaborators talk to. It owns the memory reader, the reflection index,
//! both caches, the per-context resolver map, and the scratch cell, and it
//! carries the process-wide fallback flag that the resolution engine flips
//! when the shared context goes fatal. The engine itself (strategy dispatch
//! and the retry policy) lives in [`crate::engine`] as a second impl block.
//!
//! Teardown ordering: a resolver is always unbound before its context's
//! cached state is purged, and the purge happens before the context handle
//! is dropped.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    abi::{fixup_address, fixup_pointer_value, mask_spare_bits, Architecture, PointerFixups},
    lock::ScratchCell,
    reflection::{RecordKind, ReflectionContext},
    semantic::{MemberOffsetCache, PromiseCache, SemanticRemoteResolver},
    target::{FrameId, MemoryReader, ModuleImage, TargetProcess},
    types::{ScratchContext, TypeDesc, TypeIdentity, TypeShape, ValueDescriptor},
    Error, Result,
};

/// Hook into a foreign (bridged) object runtime.
///
/// When a value's static type belongs to the bridged type system, the
/// engine asks this hook for the instance's dynamic class name before
/// trying anything native.
pub trait ForeignRuntime: Send + Sync {
    /// Dynamic class name of the instance at `address`, if the foreign
    /// runtime recognizes it.
    fn dynamic_class_name(&self, reader: &MemoryReader, address: u64) -> Option<String>;
}

/// The facade over dynamic type resolution for one target process.
pub struct LanguageRuntime {
    process: Arc<dyn TargetProcess>,
    reader: MemoryReader,
    arch: Architecture,
    fixups: PointerFixups,
    scratch: ScratchCell,
    module_contexts: DashMap<u64, Arc<ScratchContext>>,
    fallback_mode: AtomicBool,
    promises: PromiseCache,
    member_offsets: MemberOffsetCache,
    resolvers: DashMap<u64, Arc<SemanticRemoteResolver>>,
    reflection: ReflectionContext,
    foreign: Option<Arc<dyn ForeignRuntime>>,
}

impl LanguageRuntime {
    /// Create a runtime for a target with no foreign-runtime hook.
    #[must_use]
    pub fn new(process: Arc<dyn TargetProcess>) -> Self {
        LanguageRuntime::with_foreign_runtime(process, None)
    }

    /// Create a runtime with an optional foreign-runtime hook.
    #[must_use]
    pub fn with_foreign_runtime(
        process: Arc<dyn TargetProcess>,
        foreign: Option<Arc<dyn ForeignRuntime>>,
    ) -> Self {
        let arch = process.architecture();
        let fixups = PointerFixups::for_architecture(&arch);
        let reader = MemoryReader::new(process.clone());
        LanguageRuntime {
            process,
            reader,
            arch,
            fixups,
            scratch: ScratchCell::new(),
            module_contexts: DashMap::new(),
            fallback_mode: AtomicBool::new(false),
            promises: PromiseCache::new(),
            member_offsets: MemberOffsetCache::new(),
            resolvers: DashMap::new(),
            reflection: ReflectionContext::new(),
            foreign,
        }
    }

    /// The shared memory reader.
    #[must_use]
    pub fn reader(&self) -> &MemoryReader {
        &self.reader
    }

    /// The scratch cell; callers take the shared side around resolution work.
    #[must_use]
    pub fn scratch(&self) -> &ScratchCell {
        &self.scratch
    }

    /// The reflection-metadata index.
    #[must_use]
    pub fn reflection(&self) -> &ReflectionContext {
        &self.reflection
    }

    /// The target's architecture descriptor.
    #[must_use]
    pub fn architecture(&self) -> &Architecture {
        &self.arch
    }

    pub(crate) fn fixups(&self) -> &PointerFixups {
        &self.fixups
    }

    pub(crate) fn foreign_runtime(&self) -> Option<&Arc<dyn ForeignRuntime>> {
        self.foreign.as_ref()
    }

    /// Announce a newly loaded module to the reflection index.
    pub fn add_module(&self, image: ModuleImage) {
        self.reflection.add_module(image);
    }

    /// The resolver bound to a context, created on first use.
    pub(crate) fn resolver_for(&self, ctx: &Arc<ScratchContext>) -> Arc<SemanticRemoteResolver> {
        self.resolvers
            .entry(ctx.generation())
            .or_insert_with(|| Arc::new(SemanticRemoteResolver::new(ctx.clone(), self.arch)))
            .clone()
    }

    /// Tear down everything bound to a context generation.
    ///
    /// The resolver binding goes first, then the promise and offset caches.
    pub fn teardown_context(&self, generation: u64) {
        self.resolvers.remove(&generation);
        self.promises.purge_generation(generation);
        self.member_offsets.purge_generation(generation);
        debug!(generation, "tore down context bindings");
    }

    /// Whether per-module fallback contexts are in effect.
    #[must_use]
    pub fn in_fallback_mode(&self) -> bool {
        self.fallback_mode.load(Ordering::Acquire)
    }

    /// Switch the process to per-module fallback contexts.
    ///
    /// Returns true if this call performed the switch. The switch is
    /// irreversible; there is no path back to the shared context.
    pub(crate) fn enable_fallback_mode(&self) -> bool {
        let switched = !self.fallback_mode.swap(true, Ordering::AcqRel);
        if switched {
            warn!("scratch context is fatal; switching to per-module fallback contexts");
        }
        switched
    }

    /// The private context of a module, created on first use.
    ///
    /// Resolution only consults these in fallback mode, but module loading
    /// may populate them ahead of time.
    pub fn module_context(&self, module_id: u64) -> Arc<ScratchContext> {
        self.module_contexts
            .entry(module_id)
            .or_insert_with(|| Arc::new(ScratchContext::new()))
            .clone()
    }

    /// Resolve a free generic parameter to its bound concrete type using the
    /// frame's materialized metadata-pointer variable.
    pub(crate) fn bind_generic_param(
        &self,
        ctx: &Arc<ScratchContext>,
        frame: FrameId,
        depth: u32,
        index: u32,
    ) -> Result<TypeIdentity> {
        let variable = format!("${}", TypeDesc::generic_param_name(depth, index));
        let metadata = self
            .process
            .frame_variable(frame, &variable)
            .ok_or_else(|| Error::TypeNotFound(variable.clone()))?;
        let promise = self
            .promises
            .promise_for(ctx, metadata)
            .ok_or(Error::NoDynamicType)?;
        promise.fulfill(ctx)
    }

    /// The concrete type bound to an abstract type name in a frame.
    ///
    /// The compiler materializes `$<name>` metadata-pointer variables for
    /// the frame's generic environment; resolving one goes through the
    /// promise cache like any other metadata address.
    pub fn concrete_type_for_name(&self, frame: FrameId, name: &str) -> Result<TypeIdentity> {
        let variable = if name.starts_with('$') {
            name.to_string()
        } else {
            format!("${name}")
        };
        let metadata = self
            .process
            .frame_variable(frame, &variable)
            .ok_or_else(|| Error::TypeNotFound(variable))?;
        let ctx = self.scratch.current();
        let promise = self
            .promises
            .promise_for(&ctx, metadata)
            .ok_or(Error::NoDynamicType)?;
        promise.fulfill(&ctx)
    }

    /// Whether a value name is runtime-internal bookkeeping rather than a
    /// user variable.
    #[must_use]
    pub fn is_runtime_internal_name(&self, name: &str) -> bool {
        name == "self" || name.starts_with('$')
    }

    /// Whether a value plausibly is a boxed error existential: the box
    /// layout keeps a metadata pointer at a fixed two-word offset, so a
    /// readable nonzero word there is the cheapest validity probe.
    #[must_use]
    pub fn is_valid_error_value(&self, value: &ValueDescriptor) -> bool {
        let Some(instance) = value.pointer_value() else {
            return false;
        };
        let (masked, _) = mask_spare_bits(&self.fixups, instance);
        matches!(
            self.reader.read_pointer(masked + 2 * self.reader.pointer_size()),
            Ok(metadata) if metadata != 0
        )
    }

    /// Byte offset of a member within a value of type `ty`.
    ///
    /// Generic parameters are re-keyed on their bound type first when a
    /// frame is supplied. The semantic resolver answers when the declaration
    /// passes the completeness check; otherwise reflection layout does.
    /// Either way the answer lands in the offset cache.
    pub fn member_offset(
        &self,
        ty: TypeIdentity,
        instance_address: Option<u64>,
        member: &str,
        frame: Option<FrameId>,
    ) -> Result<u64> {
        let ctx = self.scratch.current();

        let ty = match (ctx.ty(ty).map(|d| d.shape.clone()), frame) {
            (Ok(TypeShape::GenericParam { depth, index }), Some(frame)) => self
                .bind_generic_param(&ctx, frame, depth, index)
                .unwrap_or(ty),
            _ => ty,
        };

        if let Some(offset) = self.member_offsets.get(ty, member) {
            return Ok(offset);
        }

        let resolver = self.resolver_for(&ctx);
        if resolver.is_safe_for_semantic_resolution(ty) {
            match resolver.offset_of_member(&self.reader, ty, instance_address, member) {
                Ok(offset) => {
                    self.member_offsets.insert(ty, member, offset);
                    return Ok(offset);
                }
                Err(
                    err @ (Error::TupleIndexOutOfBounds { .. } | Error::InstanceRequired),
                ) => return Err(err),
                Err(err) => {
                    debug!(member, %err, "semantic member offset failed, trying reflection");
                }
            }
        }

        let desc = ctx.ty(ty)?;
        let layout = self
            .reflection
            .layout_of(&desc.mangled, &self.reader)
            .ok_or_else(|| Error::MemberNotFound {
                type_name: desc.name.clone(),
                member: member.to_string(),
            })?;
        if layout.kind == RecordKind::Tuple {
            if let Ok(index) = member.parse::<usize>() {
                if index >= layout.fields.len() {
                    return Err(Error::TupleIndexOutOfBounds {
                        index,
                        count: layout.fields.len(),
                    });
                }
            }
        }
        let offset = layout
            .field_offset(member)
            .ok_or_else(|| Error::MemberNotFound {
                type_name: desc.name.clone(),
                member: member.to_string(),
            })?;
        self.member_offsets.insert(ty, member, offset);
        Ok(offset)
    }

    /// Size of a type in bits.
    pub fn bit_size(&self, ty: TypeIdentity) -> Result<u64> {
        self.layout_quantity(ty, |layout| layout.bit_size(), |size| size * 8)
    }

    /// Stride of a type in bytes.
    pub fn byte_stride(&self, ty: TypeIdentity) -> Result<u64> {
        self.layout_quantity(ty, |layout| layout.stride, |size| size)
    }

    /// Alignment of a type in bits.
    pub fn bit_alignment(&self, ty: TypeIdentity) -> Result<u64> {
        let word = self.reader.pointer_size();
        self.layout_quantity(
            ty,
            |layout| layout.bit_alignment(),
            move |size| size.next_power_of_two().min(word).max(1) * 8,
        )
    }

    fn layout_quantity(
        &self,
        ty: TypeIdentity,
        from_layout: impl Fn(&crate::reflection::TypeLayout) -> u64,
        from_builtin: impl Fn(u64) -> u64,
    ) -> Result<u64> {
        let ctx = self.scratch.current();
        let desc = ctx.ty(ty)?;
        if let Some(layout) = self.reflection.layout_of(&desc.mangled, &self.reader) {
            return Ok(from_layout(&layout));
        }
        match desc.shape {
            TypeShape::Builtin { size } => Ok(from_builtin(size)),
            _ => Err(Error::TypeNotFound(desc.name.clone())),
        }
    }

    /// Whether values of this type are stored inline in abstract slots.
    #[must_use]
    pub fn is_stored_inline(&self, ty: TypeIdentity) -> bool {
        let ctx = self.scratch.current();
        match ctx.ty(ty) {
            Ok(desc) => self.reflection.is_stored_inline(&desc.mangled, &self.reader),
            Err(_) => false,
        }
    }

    /// Adjust a reference address for reference-storage types.
    #[must_use]
    pub fn fixup_address(&self, address: u64, ty: TypeIdentity) -> u64 {
        let ctx = self.scratch.current();
        fixup_address(&ctx, &self.fixups, &self.arch, &self.reader, address, ty)
    }

    /// Fix up a pointer value read out of a variable of type `ty`.
    #[must_use]
    pub fn fixup_pointer_value(&self, address: u64, ty: TypeIdentity) -> (u64, bool) {
        let ctx = self.scratch.current();
        fixup_pointer_value(&ctx, &self.fixups, &self.arch, address, ty)
    }
}
