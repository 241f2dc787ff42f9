//! End-to-end resolution scenarios over a synthetic target.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use dynscope::prelude::*;

/// In-memory stand-in for a debugged process: sparse memory regions, a
/// symbol table, and frame variables, with a counter over remote reads.
#[derive(Default)]
struct SyntheticTarget {
    memory: HashMap<u64, Vec<u8>>,
    symbols: HashMap<String, Vec<SymbolCandidate>>,
    frame_variables: HashMap<(FrameId, String), u64>,
    reads: AtomicUsize,
}

impl SyntheticTarget {
    fn new() -> Self {
        SyntheticTarget::default()
    }

    fn word(mut self, address: u64, word: u64) -> Self {
        self.memory.insert(address, word.to_le_bytes().to_vec());
        self
    }

    fn bytes(mut self, address: u64, bytes: Vec<u8>) -> Self {
        self.memory.insert(address, bytes);
        self
    }

    fn frame_var(mut self, frame: FrameId, name: &str, value: u64) -> Self {
        self.frame_variables.insert((frame, name.to_string()), value);
        self
    }

    fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl TargetProcess for SyntheticTarget {
    fn architecture(&self) -> Architecture {
        Architecture {
            core: CoreKind::X86_64,
            pointer_bytes: 8,
            byte_order: ByteOrder::Little,
            foreign_interop: false,
        }
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> std::result::Result<usize, String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        for (&base, bytes) in &self.memory {
            let end = base + bytes.len() as u64;
            if address >= base && address + buf.len() as u64 <= end {
                let start = (address - base) as usize;
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
                return Ok(buf.len());
            }
        }
        Err(format!("unmapped address {address:#x}"))
    }

    fn symbols(&self, name: &str) -> Vec<SymbolCandidate> {
        self.symbols.get(name).cloned().unwrap_or_default()
    }

    fn frame_variable(&self, frame: FrameId, name: &str) -> Option<u64> {
        self.frame_variables.get(&(frame, name.to_string())).copied()
    }
}

fn builtin(ctx: &ScratchContext, name: &str, mangled: &str, size: u64) -> TypeIdentity {
    ctx.intern(TypeDesc {
        name: name.into(),
        mangled: mangled.into(),
        info: TypeInfo::NATIVE | TypeInfo::BUILTIN,
        shape: TypeShape::Builtin { size },
        alloc: AllocationStrategy::Inline,
    })
}

fn class(ctx: &ScratchContext, name: &str, members: Vec<MemberDecl>) -> TypeIdentity {
    ctx.intern(TypeDesc {
        name: name.into(),
        mangled: format!("$s4Test{}{name}CD", name.len()),
        info: TypeInfo::NATIVE | TypeInfo::CLASS | TypeInfo::INSTANCE_IS_POINTER,
        shape: TypeShape::Class { members },
        alloc: AllocationStrategy::Pointer,
    })
}

fn member(name: &str, offset: Option<u64>) -> MemberDecl {
    MemberDecl {
        name: name.into(),
        ty: None,
        offset,
        has_binding_pattern: true,
    }
}

fn load_value(name: &str, ty: TypeIdentity) -> ValueDescriptor {
    let mut value = ValueDescriptor::new(name, ty);
    value.location = ValueLocation::LoadAddress;
    value
}

#[test]
fn class_instance_resolves_to_its_subclass() {
    let target = Arc::new(SyntheticTarget::new().word(0x2000, 0x8000));
    let runtime = LanguageRuntime::new(target.clone());

    let ctx = runtime.scratch().current();
    let base = class(&ctx, "Base", Vec::new());
    let derived = class(&ctx, "Derived", Vec::new());
    ctx.register_metadata(0x8000, derived);

    let mut value = load_value("obj", base);
    value.address = 0x1000;
    value.scalar = 0xFF00_0000_0000_2000 | 0x4; // spare bits set

    let guard = runtime.scratch().read();
    let resolved = runtime
        .resolve_dynamic_type_and_address(&value, DynamicValuePolicy::DynamicCanRunTarget, &guard)
        .unwrap();

    assert_eq!(resolved.ty, derived);
    assert_eq!(resolved.address, 0x2000);
    // The dynamic type is instance-is-pointer, so the location table falls
    // through every keep-static row and lands on Scalar.
    assert_eq!(resolved.location, ValueLocation::Scalar);
    assert!(target.read_count() >= 1);
}

#[test]
fn no_dynamic_values_policy_refuses() {
    let target = Arc::new(SyntheticTarget::new());
    let runtime = LanguageRuntime::new(target);

    let ctx = runtime.scratch().current();
    let base = class(&ctx, "Base", Vec::new());
    let value = load_value("obj", base);

    let guard = runtime.scratch().read();
    assert!(runtime
        .resolve_dynamic_type_and_address(&value, DynamicValuePolicy::NoDynamicValues, &guard)
        .is_err());
}

#[test]
fn base_class_slices_are_ineligible() {
    let target = Arc::new(SyntheticTarget::new().word(0x2000, 0x8000));
    let runtime = LanguageRuntime::new(target);

    let ctx = runtime.scratch().current();
    let base = class(&ctx, "Base", Vec::new());
    ctx.register_metadata(0x8000, base);

    let mut value = load_value("obj", base);
    value.scalar = 0x2000;
    value.is_base_class = true;

    let guard = runtime.scratch().read();
    assert!(matches!(
        runtime.resolve_dynamic_type_and_address(
            &value,
            DynamicValuePolicy::DynamicCanRunTarget,
            &guard
        ),
        Err(Error::NoDynamicType)
    ));
}

#[test]
fn indirect_enum_box_with_offset_zero_reports_the_box_address() {
    // Box at 0x4000 -> metadata record at 0x9000, whose offset field (u32 at
    // word offset 1) is zero. The payload is class typed, so resolution
    // recurses one level; the reported address must be the box's own.
    let target = Arc::new(
        SyntheticTarget::new()
            .word(0x4000, 0x9000)
            .word(0x9000, 0x8000)
            .word(0x9008, 0),
    );
    let runtime = LanguageRuntime::new(target);

    let ctx = runtime.scratch().current();
    let payload_class = class(&ctx, "Payload", Vec::new());
    let derived = class(&ctx, "Concrete", Vec::new());
    ctx.register_metadata(0x8000, derived);
    let enum_ty = ctx.intern(TypeDesc {
        name: "Wrapper".into(),
        mangled: "$s4Test7WrapperOD".into(),
        info: TypeInfo::NATIVE | TypeInfo::ENUMERATION | TypeInfo::HAS_VALUE,
        shape: TypeShape::Enumeration {
            cases: vec![
                CaseDecl {
                    name: "none".into(),
                    payload: None,
                    indirect: false,
                },
                CaseDecl {
                    name: "boxed".into(),
                    payload: Some(payload_class),
                    indirect: true,
                },
            ],
        },
        alloc: AllocationStrategy::Inline,
    });

    let mut parent = load_value("wrapper", enum_ty);
    parent.bytes = Some(vec![1]); // selects the indirect case

    let mut value = load_value("wrapper.boxed", payload_class);
    value.is_indirect_enum_case = true;
    value.scalar = 0x4000;
    value.parent = Some(Box::new(parent));

    let guard = runtime.scratch().read();
    let resolved = runtime
        .resolve_dynamic_type_and_address(&value, DynamicValuePolicy::DynamicCanRunTarget, &guard)
        .unwrap();

    assert_eq!(resolved.ty, derived);
    assert_eq!(resolved.address, 0x4000);
    assert_eq!(resolved.location, ValueLocation::LoadAddress);
}

#[test]
fn const_result_existential_reads_host_memory() {
    // Nothing is mapped in the target at all: every byte the resolver needs
    // must come from the materialized buffer.
    let target = Arc::new(SyntheticTarget::new());
    let runtime = LanguageRuntime::new(target.clone());

    let ctx = runtime.scratch().current();
    let proto = ctx.intern(TypeDesc {
        name: "any Shape".into(),
        mangled: "$s4Test5Shape_pD".into(),
        info: TypeInfo::NATIVE | TypeInfo::PROTOCOL,
        shape: TypeShape::Protocol {
            class_constrained: false,
            num_storage_words: 3,
        },
        alloc: AllocationStrategy::Dynamic,
    });
    let point = ctx.intern(TypeDesc {
        name: "Point".into(),
        mangled: "$s4Test5PointVD".into(),
        info: TypeInfo::NATIVE | TypeInfo::STRUCT | TypeInfo::HAS_VALUE,
        shape: TypeShape::Struct { members: Vec::new() },
        alloc: AllocationStrategy::Inline,
    });
    ctx.register_metadata(0x8000, point);

    let mut container = vec![0u8; 32];
    container[24..32].copy_from_slice(&0x8000u64.to_le_bytes());

    let mut value = load_value("shape", proto);
    value.location = ValueLocation::HostAddress;
    value.address = 0x7000;
    value.byte_size = 32;
    value.bytes = Some(container);
    value.is_const_result = true;

    let guard = runtime.scratch().read();
    let resolved = runtime
        .resolve_dynamic_type_and_address(&value, DynamicValuePolicy::DynamicCanRunTarget, &guard)
        .unwrap();

    assert_eq!(resolved.ty, point);
    assert_eq!(resolved.address, 0x7000);
    // Inline allocation keeps the static location kind.
    assert_eq!(resolved.location, ValueLocation::HostAddress);
    assert_eq!(target.read_count(), 0);
}

#[test]
fn generic_parameter_binds_through_the_frame() {
    let frame: FrameId = 3;
    let target = Arc::new(
        SyntheticTarget::new()
            .word(0x2000, 0x8000)
            .frame_var(frame, "$\u{03C4}_0_0", 0x8000),
    );
    let runtime = LanguageRuntime::new(target);

    let ctx = runtime.scratch().current();
    let param = ctx.intern(TypeDesc {
        name: TypeDesc::generic_param_name(0, 0),
        mangled: "$sxD".into(),
        info: TypeInfo::NATIVE | TypeInfo::GENERIC_PARAM,
        shape: TypeShape::GenericParam { depth: 0, index: 0 },
        alloc: AllocationStrategy::Dynamic,
    });
    let concrete = class(&ctx, "Concrete", Vec::new());
    ctx.register_metadata(0x8000, concrete);

    let mut value = load_value("generic", param);
    value.scalar = 0x2000;
    value.frame = Some(frame);

    let guard = runtime.scratch().read();
    let resolved = runtime
        .resolve_dynamic_type_and_address(&value, DynamicValuePolicy::DynamicCanRunTarget, &guard)
        .unwrap();

    assert_eq!(resolved.ty, concrete);
    assert_eq!(resolved.address, 0x2000);
}

#[test]
fn three_offset_lookups_cost_one_remote_computation() {
    let target = Arc::new(SyntheticTarget::new().word(0x2000, 0x8000));
    let runtime = LanguageRuntime::new(target.clone());

    let ctx = runtime.scratch().current();
    let base = class(&ctx, "Base", vec![member("count", None)]);
    let derived = class(&ctx, "Derived", vec![member("count", Some(16))]);
    ctx.register_metadata(0x8000, derived);

    let offsets: Vec<u64> = (0..3)
        .map(|_| {
            runtime
                .member_offset(base, Some(0x2000), "count", None)
                .unwrap()
        })
        .collect();

    assert_eq!(offsets, vec![16, 16, 16]);
    // Dynamic dispatch reads the instance's metadata pointer exactly once;
    // the second and third lookups are cache hits.
    assert_eq!(target.read_count(), 1);
}

#[test]
fn tuple_offsets_via_the_runtime_cache() {
    let target = Arc::new(SyntheticTarget::new());
    let runtime = LanguageRuntime::new(target);

    let ctx = runtime.scratch().current();
    let int = builtin(&ctx, "Int", "$sSiD", 8);
    let tuple = ctx.intern(TypeDesc {
        name: "(Int, Int)".into(),
        mangled: "$sSi_SitD".into(),
        info: TypeInfo::NATIVE | TypeInfo::TUPLE | TypeInfo::HAS_VALUE,
        shape: TypeShape::Tuple { elements: vec![int, int] },
        alloc: AllocationStrategy::Inline,
    });

    assert_eq!(runtime.member_offset(tuple, None, "1", None).unwrap(), 8);
    assert!(matches!(
        runtime.member_offset(tuple, None, "5", None),
        Err(Error::TupleIndexOutOfBounds { index: 5, count: 2 })
    ));
}

#[test]
fn fatal_context_retries_exactly_once_in_fallback_mode() {
    let module_id = 77;
    let target = Arc::new(SyntheticTarget::new().word(0x2000, 0x8000));
    let runtime = LanguageRuntime::new(target);

    // The shared context is poisoned before any resolution runs.
    runtime.scratch().current().set_fatal();

    // The module's private context already knows the types.
    let module_ctx = runtime.module_context(module_id);
    let base = class(&module_ctx, "Base", Vec::new());
    let derived = class(&module_ctx, "Derived", Vec::new());
    module_ctx.register_metadata(0x8000, derived);

    let mut value = load_value("obj", base);
    value.scalar = 0x2000;
    value.module = Some(module_id);

    assert!(!runtime.in_fallback_mode());

    let guard = runtime.scratch().read();
    let resolved = runtime
        .resolve_dynamic_type_and_address(&value, DynamicValuePolicy::DynamicCanRunTarget, &guard)
        .unwrap();
    assert_eq!(resolved.ty, derived);
    assert!(runtime.in_fallback_mode());

    // A fatal failure while already in fallback mode is final.
    module_ctx.set_fatal();
    assert!(runtime
        .resolve_dynamic_type_and_address(&value, DynamicValuePolicy::DynamicCanRunTarget, &guard)
        .is_err());
    assert!(runtime.in_fallback_mode());
}

#[test]
fn reflection_answers_layout_queries() {
    use dynscope::reflection::blob;

    let layout = TypeLayout {
        kind: RecordKind::Struct,
        size: 16,
        stride: 16,
        alignment: 8,
        bitwise_takable: true,
        fields: vec![
            FieldLayout { name: "x".into(), offset: 0 },
            FieldLayout { name: "y".into(), offset: 8 },
        ],
    };
    let section = blob::build_section(
        &[("$s4Test5PointVD".into(), layout)],
        &[(0x8000, "$s4Test5PointVD".into())],
    );
    let section_len = section.len() as u64;

    let target = Arc::new(SyntheticTarget::new().bytes(0x6000, section));
    let runtime = LanguageRuntime::new(target);
    runtime.add_module(ModuleImage {
        id: 1,
        name: "Test".into(),
        reflection_section: Some((0x6000, section_len)),
    });

    let ctx = runtime.scratch().current();
    let point = ctx.intern(TypeDesc {
        name: "Point".into(),
        mangled: "$s4Test5PointVD".into(),
        info: TypeInfo::NATIVE | TypeInfo::STRUCT | TypeInfo::HAS_VALUE,
        // Import-damaged declaration: semantic resolution must refuse it and
        // reflection must answer instead.
        shape: TypeShape::Struct {
            members: vec![MemberDecl {
                name: "y".into(),
                ty: None,
                offset: None,
                has_binding_pattern: false,
            }],
        },
        alloc: AllocationStrategy::Inline,
    });

    assert_eq!(runtime.bit_size(point).unwrap(), 128);
    assert_eq!(runtime.byte_stride(point).unwrap(), 16);
    assert_eq!(runtime.bit_alignment(point).unwrap(), 64);
    assert!(runtime.is_stored_inline(point));
    assert_eq!(runtime.member_offset(point, None, "y", None).unwrap(), 8);
}

#[test]
fn foreign_values_delegate_to_the_hook() {
    struct NameTable;

    impl ForeignRuntime for NameTable {
        fn dynamic_class_name(&self, _reader: &MemoryReader, address: u64) -> Option<String> {
            match address {
                0x2000 => Some("NSString".into()),
                0x3000 => Some("__NSCFString".into()),
                _ => None,
            }
        }
    }

    let target = Arc::new(SyntheticTarget::new());
    let runtime = LanguageRuntime::with_foreign_runtime(target, Some(Arc::new(NameTable)));

    let ctx = runtime.scratch().current();
    let bridged = ctx.intern(TypeDesc {
        name: "AnyObject".into(),
        mangled: "$s9AnyObjectD".into(),
        info: TypeInfo::FOREIGN | TypeInfo::CLASS | TypeInfo::INSTANCE_IS_POINTER,
        shape: TypeShape::Class { members: Vec::new() },
        alloc: AllocationStrategy::Pointer,
    });

    let guard = runtime.scratch().read();

    let mut value = load_value("s", bridged);
    value.scalar = 0x2000;
    let resolved = runtime
        .resolve_dynamic_type_and_address(&value, DynamicValuePolicy::DynamicCanRunTarget, &guard)
        .unwrap();
    let resolved_desc = ctx.ty(resolved.ty).unwrap().clone();
    assert_eq!(resolved_desc.name, "NSString?");

    // Internal foreign value-type names are not genuine dynamic types.
    let mut internal = load_value("s", bridged);
    internal.scalar = 0x3000;
    assert!(matches!(
        runtime.resolve_dynamic_type_and_address(
            &internal,
            DynamicValuePolicy::DynamicCanRunTarget,
            &guard
        ),
        Err(Error::NoDynamicType)
    ));
}

#[test]
fn fixup_dynamic_type_matches_the_static_shape() {
    let target = Arc::new(SyntheticTarget::new());
    let runtime = LanguageRuntime::new(target);

    let ctx = runtime.scratch().current();
    let concrete = class(&ctx, "Concrete", Vec::new());
    let pointer_static = ctx.intern(TypeDesc {
        name: "UnsafePointer".into(),
        mangled: "$sSPD".into(),
        info: TypeInfo::NATIVE | TypeInfo::POINTER,
        shape: TypeShape::Pointer { pointee: None },
        alloc: AllocationStrategy::Pointer,
    });
    let reference_static = ctx.intern(TypeDesc {
        name: "inout Concrete".into(),
        mangled: "$s4Test8ConcreteCzD".into(),
        info: TypeInfo::NATIVE | TypeInfo::REFERENCE,
        shape: TypeShape::Reference { referent: concrete },
        alloc: AllocationStrategy::Pointer,
    });

    let guard = runtime.scratch().read();

    let wrapped = runtime
        .fixup_dynamic_type(concrete, &load_value("p", pointer_static), &guard)
        .unwrap();
    assert!(matches!(
        ctx.ty(wrapped).unwrap().shape,
        TypeShape::Pointer { pointee: Some(p) } if p == concrete
    ));

    let wrapped = runtime
        .fixup_dynamic_type(concrete, &load_value("r", reference_static), &guard)
        .unwrap();
    assert!(matches!(
        ctx.ty(wrapped).unwrap().shape,
        TypeShape::Reference { referent } if referent == concrete
    ));

    // A plain class static type needs no wrapping.
    let base = class(&ctx, "Base", Vec::new());
    let unwrapped = runtime
        .fixup_dynamic_type(concrete, &load_value("v", base), &guard)
        .unwrap();
    assert_eq!(unwrapped, concrete);
}

#[test]
fn error_values_probe_the_box_metadata_word() {
    let target = Arc::new(SyntheticTarget::new().word(0x2010, 0x8000));
    let runtime = LanguageRuntime::new(target);

    let ctx = runtime.scratch().current();
    let error_ty = ctx.intern(TypeDesc {
        name: "any Error".into(),
        mangled: "$ss5Error_pD".into(),
        info: TypeInfo::NATIVE | TypeInfo::PROTOCOL | TypeInfo::ERROR_TYPE,
        shape: TypeShape::Protocol {
            class_constrained: false,
            num_storage_words: 3,
        },
        alloc: AllocationStrategy::Dynamic,
    });

    let mut value = load_value("err", error_ty);
    value.scalar = 0x2000;
    assert!(runtime.is_valid_error_value(&value));

    let mut unmapped = load_value("err", error_ty);
    unmapped.scalar = 0x9000;
    assert!(!runtime.is_valid_error_value(&unmapped));
}

#[test]
fn concrete_type_for_name_uses_frame_promises() {
    let frame: FrameId = 1;
    let target = Arc::new(SyntheticTarget::new().frame_var(frame, "$T", 0x8000));
    let runtime = LanguageRuntime::new(target);

    let ctx = runtime.scratch().current();
    let concrete = class(&ctx, "Concrete", Vec::new());
    ctx.register_metadata(0x8000, concrete);

    assert_eq!(runtime.concrete_type_for_name(frame, "T").unwrap(), concrete);
    assert!(runtime.concrete_type_for_name(frame, "U").is_err());

    assert!(runtime.is_runtime_internal_name("self"));
    assert!(runtime.is_runtime_internal_name("$T"));
    assert!(!runtime.is_runtime_internal_name("count"));
}
