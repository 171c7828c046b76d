//! End-to-end tests of the generator: build an interface model, generate
//! both modules, and match the emitted items.

mod common;

use common::*;
use thunkgen_generate::{
    generate, Annotation, CallbackRegistration, ConfigValue, FunctionConfig, FunctionDecl,
    GenerateError, GuestAbi, Library, Member, Scalar, StructDef, Type, TypeConfig,
};

const BOTH_ABIS: [GuestAbi; 2] = [GuestAbi::X86_32, GuestAbi::X86_64];

fn libtest() -> Library {
    Library::new("libtest")
}

fn declare(lib: &mut Library, name: &str, ret: &str, params: &[&str]) {
    let ret = lib.parse_type(ret).unwrap();
    let params = params.iter().map(|p| lib.parse_type(p).unwrap()).collect();
    lib.declare_function(FunctionDecl::new(name, ret, params));
}

fn export(lib: &mut Library, name: &str) {
    lib.export_function(name, FunctionConfig::new()).unwrap();
}

fn export_with(lib: &mut Library, name: &str, config: FunctionConfig) {
    lib.export_function(name, config).unwrap();
}

#[test]
fn trivial() {
    let mut lib = libtest();
    declare(&mut lib, "func", "void", &[]);
    export(&mut lib, "func");
    let out = run(&lib, GuestAbi::X86_64);

    // The public symbol and the packer, with the original (empty) signature.
    assert!(find_fn(&out.guest, "func").is_some());
    let pack = expect_fn(&out.guest, "fexfn_pack_func");
    assert!(param_types(pack).is_empty());
    assert_eq!(return_type(pack), "");

    // One real export plus the null terminator.
    assert_eq!(static_array_len(&out.host, "exports"), 2);
}

#[test]
fn unknown_annotation() {
    assert!(matches!(
        Annotation::from_name("invalid_annotation"),
        Err(GenerateError::UnknownAnnotation(_))
    ));

    let mut config = FunctionConfig::new();
    assert!(matches!(
        config.set_field("func", "invalid_field_annotation", ConfigValue::Int(0)),
        Err(GenerateError::UnknownConfigField { .. })
    ));
}

#[test]
fn versioned_library() {
    let mut lib = libtest();
    lib.set_version(123);
    let out = run(&lib, GuestAbi::X86_64);
    assert!(out.host_text.contains("\"libtest.so.123\""));

    let plain = run(&libtest(), GuestAbi::X86_64);
    assert!(plain.host_text.contains("\"libtest.so\""));
}

#[test]
fn version_via_function_config() {
    let mut lib = libtest();
    declare(&mut lib, "func", "void", &[]);
    let mut config = FunctionConfig::new();
    config.set_field("func", "version", ConfigValue::Int(123)).unwrap();
    export_with(&mut lib, "func", config);
    let out = run(&lib, GuestAbi::X86_64);
    assert!(out.host_text.contains("\"libtest.so.123\""));
}

#[test]
fn function_pointer_via_type() {
    let mut lib = libtest();
    lib.register_callback(CallbackRegistration {
        signature: thunkgen_generate::Signature::parse("int (char, char)").unwrap(),
        params: Default::default(),
    });
    let out = run(&lib, GuestAbi::X86_64);

    // Guest marker carries the signature.
    let markers = macro_invocations(&out.guest, "make_callback_thunk");
    assert_eq!(markers.len(), 1);
    assert!(markers[0].contains(&tokens(r#"unsafe extern "C" fn(c_char, c_char) -> c_int"#)));

    // Host exports the generic wrapper specialization for it.
    assert_eq!(static_array_len(&out.host, "exports"), 2);
    assert!(out.host_text.contains(&tokens(
        r#"GuestWrapperForHostFunction::<unsafe extern "C" fn(c_char, c_char) -> c_int>::call"#
    )));
}

#[test]
fn function_pointer_parameter() {
    let mut lib = libtest();
    declare(&mut lib, "func", "void", &["int (*)(char, char)"]);
    export(&mut lib, "func");
    let out = run(&lib, GuestAbi::X86_64);

    let pack = expect_fn(&out.guest, "fexfn_pack_func");
    assert_eq!(
        param_types(pack),
        vec![tokens(r#"unsafe extern "C" fn(c_char, c_char) -> c_int"#)]
    );

    // The record slot keeps the signature, and the unpacker finalizes the
    // trampoline before forwarding.
    let record = expect_struct(&out.host, "fexfn_packed_args_libtest_func");
    assert_eq!(
        field_types(record),
        vec![(
            "a_0".to_string(),
            tokens(r#"GuestPtr<unsafe extern "C" fn(c_char, c_char) -> c_int>"#)
        )]
    );
    let unpack = expect_fn(&out.host, "fexfn_unpack_libtest_func");
    assert!(body_contains(
        unpack,
        "FinalizeHostTrampolineForGuestFunction(args.a_0, fexfn_guestcall_packer_0 as usize as *const c_void,)"
    ));

    // func + callback signature + terminator.
    assert_eq!(static_array_len(&out.host, "exports"), 3);
}

#[test]
fn multiple_parameters() {
    let mut lib = libtest();
    lib.declare_struct(StructDef::new(
        "TestStruct",
        vec![Member::new("member", Type::Scalar(Scalar::Int))],
    ));
    declare(&mut lib, "func", "void", &["int", "char", "unsigned long", "TestStruct"]);
    export(&mut lib, "func");
    let out = run(&lib, GuestAbi::X86_64);

    assert!(find_fn(&out.guest, "func").is_some());
    let pack = expect_fn(&out.guest, "fexfn_pack_func");
    assert_eq!(
        param_types(pack),
        vec![tokens("c_int"), tokens("c_char"), tokens("c_ulong"), tokens("TestStruct")]
    );
    assert_eq!(return_type(pack), "");

    assert_eq!(static_array_len(&out.host, "exports"), 2);

    // The unpacker takes one pointer to the packed record, whose slots are
    // guest images of each parameter (the struct is bit-identical here).
    let unpack = expect_fn(&out.host, "fexfn_unpack_libtest_func");
    assert_eq!(param_types(unpack), vec![tokens("*mut fexfn_packed_args_libtest_func")]);
    let record = expect_struct(&out.host, "fexfn_packed_args_libtest_func");
    assert_eq!(
        field_types(record),
        vec![
            ("a_0".to_string(), tokens("GuestScalar<c_int>")),
            ("a_1".to_string(), tokens("GuestScalar<c_char>")),
            ("a_2".to_string(), tokens("GuestScalar<c_ulong>")),
            ("a_3".to_string(), tokens("TestStruct")),
        ]
    );
}

#[test]
fn return_function_pointer_requires_annotation() {
    let mut lib = libtest();
    declare(&mut lib, "func", "void (*)(char, char)", &["int"]);
    export(&mut lib, "func");
    assert!(matches!(
        generate(&lib, GuestAbi::X86_64),
        Err(GenerateError::ReturnsFunctionPointer(name)) if name == "func"
    ));

    let mut lib = libtest();
    declare(&mut lib, "func", "void (*)(char, char)", &["int"]);
    let mut config = FunctionConfig::new();
    config.annotate(Annotation::ReturnsGuestPointer).unwrap();
    export_with(&mut lib, "func", config);
    assert!(generate(&lib, GuestAbi::X86_64).is_ok());
}

#[test]
fn variadic_function() {
    let mut lib = libtest();
    lib.declare_function(
        FunctionDecl::new("func", Type::Void, vec![Type::Scalar(Scalar::Int)]).variadic(),
    );
    let mut config = FunctionConfig::new();
    config
        .set_field("func", "uniform_va_type", ConfigValue::Type(Type::Scalar(Scalar::Char)))
        .unwrap();
    export_with(&mut lib, "func", config);
    let out = run(&lib, GuestAbi::X86_64);

    // The count slot precedes the materialized argument array.
    let pack = expect_fn(&out.guest, "fexfn_pack_func_internal");
    assert_eq!(
        param_types(pack),
        vec![tokens("c_int"), tokens("c_ulong"), tokens("*mut c_char")]
    );
    assert_eq!(return_type(pack), "");
    // Rust cannot define the public variadic symbol; only the internal
    // packer is emitted.
    assert!(find_fn(&out.guest, "func").is_none());
}

#[test]
fn variadic_function_without_annotation() {
    let mut lib = libtest();
    lib.declare_function(
        FunctionDecl::new("func", Type::Void, vec![Type::Scalar(Scalar::Int)]).variadic(),
    );
    export(&mut lib, "func");
    assert!(matches!(
        generate(&lib, GuestAbi::X86_64),
        Err(GenerateError::VariadicWithoutAnnotation(name)) if name == "func"
    ));
}

fn wrapper_lib(host_members: Vec<Member>, guest_members: Option<Vec<Member>>) -> Library {
    let mut lib = libtest();
    let mut def = StructDef::new("A", host_members);
    if let Some(guest) = guest_members {
        def = def.with_guest_members(guest);
    }
    lib.declare_struct(def);
    lib.register_type("A", TypeConfig::new()).unwrap();
    lib
}

fn int_members(names: &[&str]) -> Vec<Member> {
    names.iter().map(|n| Member::new(n, Type::Scalar(Scalar::Int))).collect()
}

#[test]
fn layout_wrappers_fully_compatible() {
    for abi in BOTH_ABIS {
        let lib = wrapper_lib(int_members(&["a", "b"]), None);
        let out = run(&lib, abi);
        // The host struct is its own guest image.
        assert_eq!(guest_transfer_repr(&out.host, "A"), Some(tokens("A")));
        assert!(find_struct(&out.host, "GuestA").is_none());
    }
}

#[test]
fn layout_wrappers_repackable() {
    for abi in BOTH_ABIS {
        let lib = wrapper_lib(int_members(&["a", "b"]), Some(int_members(&["b", "a"])));
        let out = run(&lib, abi);
        assert_eq!(guest_transfer_repr(&out.host, "A"), Some(tokens("GuestA")));
        let guest_view = expect_struct(&out.host, "GuestA");
        assert_eq!(
            field_types(guest_view),
            vec![
                ("b".to_string(), tokens("GuestScalar<c_int>")),
                ("a".to_string(), tokens("GuestScalar<c_int>")),
            ]
        );
    }
}

#[test]
fn layout_wrappers_incompatible_unannotated() {
    for abi in BOTH_ABIS {
        let lib = wrapper_lib(int_members(&["a", "b"]), Some(int_members(&["c", "d"])));
        let out = run(&lib, abi);
        // Neither the wrapper type nor the conversion exists; any use of the
        // type across the boundary refuses to compile.
        assert!(find_struct(&out.host, "GuestA").is_none());
        assert_eq!(guest_transfer_repr(&out.host, "A"), None);
    }
}

#[test]
fn layout_wrappers_incompatible_annotated() {
    for abi in BOTH_ABIS {
        let mut lib = libtest();
        lib.declare_struct(
            StructDef::new("B", int_members(&["a"]))
                .with_guest_members(int_members(&["b"])),
        );
        lib.declare_struct(StructDef::new(
            "A",
            vec![
                Member::new("a", Type::Pointer(Box::new(Type::Struct("B".into())))),
                Member::new("b", Type::Scalar(Scalar::Int)),
            ],
        ));
        let mut config = TypeConfig::new();
        config.annotate(Annotation::EmitLayoutWrappers).unwrap();
        lib.register_type("A", config).unwrap();
        let out = run(&lib, abi);

        // Forced wrappers: pointer members surface shallowly.
        assert_eq!(guest_transfer_repr(&out.host, "A"), Some(tokens("GuestA")));
        let guest_view = expect_struct(&out.host, "GuestA");
        assert_eq!(
            field_types(guest_view),
            vec![
                ("a".to_string(), tokens("GuestPtr<B>")),
                ("b".to_string(), tokens("GuestScalar<c_int>")),
            ]
        );
        // B itself stays unconverted.
        assert!(find_struct(&out.host, "GuestB").is_none());
    }
}

#[test]
fn emit_layout_wrappers_requires_consistent_member_names() {
    // A field-wise conversion keyed by name cannot be forced onto a type
    // whose two views disagree on the member set; generation must abort
    // instead of emitting an impl that would not compile.
    for abi in BOTH_ABIS {
        let mut lib = libtest();
        lib.declare_struct(
            StructDef::new("A", int_members(&["a", "b"]))
                .with_guest_members(int_members(&["c", "d"])),
        );
        let mut config = TypeConfig::new();
        config.annotate(Annotation::EmitLayoutWrappers).unwrap();
        lib.register_type("A", config).unwrap();
        assert!(matches!(
            generate(&lib, abi),
            Err(GenerateError::IncompatibleType { ty, member }) if ty == "A" && member == "c"
        ));
    }
}

fn pointer_param_lib(pointee: StructDef) -> Library {
    let mut lib = libtest();
    lib.declare_struct(pointee);
    declare(&mut lib, "func", "void", &["A *"]);
    let mut config = FunctionConfig::new();
    config.annotate(Annotation::CustomHostImpl).unwrap();
    lib.export_function("func", config).unwrap();
    lib
}

#[test]
fn struct_repacking_consistent_pointee() {
    for abi in BOTH_ABIS {
        let lib = pointer_param_lib(StructDef::new("A", int_members(&["a"])));
        assert!(generate(&lib, abi).is_ok());
    }
}

#[test]
fn struct_repacking_inconsistent_pointer_member() {
    let build = |passthrough: bool| {
        let mut lib = libtest();
        lib.declare_struct(
            StructDef::new("B", int_members(&["a"]))
                .with_guest_members(int_members(&["b"])),
        );
        lib.declare_struct(StructDef::new(
            "A",
            vec![Member::new("a", Type::Pointer(Box::new(Type::Struct("B".into()))))],
        ));
        declare(&mut lib, "func", "void", &["A *"]);
        let mut config = FunctionConfig::new();
        config.annotate(Annotation::CustomHostImpl).unwrap();
        if passthrough {
            config.annotate_param(0, Annotation::PtrPassthrough).unwrap();
        }
        lib.export_function("func", config).unwrap();
        lib
    };

    for abi in BOTH_ABIS {
        // Unannotated: the incompatible pointee contaminates A.
        assert!(matches!(
            generate(&build(false), abi),
            Err(GenerateError::IncompatibleType { .. })
        ));
        // Annotated as ptr_passthrough: only the address crosses.
        assert!(generate(&build(true), abi).is_ok());
    }
}

#[test]
fn struct_repacking_opaque_pointee_member() {
    for abi in BOTH_ABIS {
        let mut lib = libtest();
        lib.declare_struct(StructDef::opaque("B"));
        lib.declare_struct(StructDef::new(
            "A",
            vec![Member::new("a", Type::Pointer(Box::new(Type::Struct("B".into()))))],
        ));
        declare(&mut lib, "func", "void", &["A *"]);
        export(&mut lib, "func");
        let err = generate(&lib, abi).unwrap_err();
        assert!(err.to_string().contains("incomplete type"), "got: {err}");
    }
}

#[test]
fn void_pointer_parameter() {
    // Unannotated: fine on matching pointer widths, refused on 32-bit.
    let mut lib = libtest();
    declare(&mut lib, "func", "void", &["void *"]);
    export(&mut lib, "func");
    assert!(generate(&lib, GuestAbi::X86_64).is_ok());
    let err = generate(&lib, GuestAbi::X86_32).unwrap_err();
    assert!(err.to_string().contains("unsupported parameter type"), "got: {err}");

    for abi in BOTH_ABIS {
        // Passthrough.
        let mut lib = libtest();
        declare(&mut lib, "func", "void", &["void *"]);
        let mut config = FunctionConfig::new();
        config.annotate(Annotation::CustomHostImpl).unwrap();
        config.annotate_param(0, Annotation::PtrPassthrough).unwrap();
        lib.export_function("func", config).unwrap();
        assert!(generate(&lib, abi).is_ok());

        // Assumed compatible.
        let mut lib = libtest();
        declare(&mut lib, "func", "void", &["void *"]);
        let mut config = FunctionConfig::new();
        config.annotate_param(0, Annotation::AssumeCompatibleDataLayout).unwrap();
        lib.export_function("func", config).unwrap();
        assert!(generate(&lib, abi).is_ok());
    }
}

#[test]
fn void_pointer_member() {
    let member = vec![Member::new("a", Type::Pointer(Box::new(Type::Void)))];
    let mut lib = libtest();
    lib.declare_struct(StructDef::new("A", member));
    declare(&mut lib, "func", "void", &["A *"]);
    export(&mut lib, "func");

    assert!(generate(&lib, GuestAbi::X86_64).is_ok());
    let err = generate(&lib, GuestAbi::X86_32).unwrap_err();
    assert!(err.to_string().contains("unsupported parameter type"), "got: {err}");
}

#[test]
fn pointer_repack_round_trips_through_a_temporary() {
    let mut lib = libtest();
    lib.declare_struct(
        StructDef::new("A", int_members(&["a", "b"]))
            .with_guest_members(int_members(&["b", "a"])),
    );
    declare(&mut lib, "func", "void", &["A *"]);
    export(&mut lib, "func");
    let out = run(&lib, GuestAbi::X86_64);

    let unpack = expect_fn(&out.host, "fexfn_unpack_libtest_func");
    assert!(body_contains(unpack, "GuestTransfer::from_guest((*a_0_guest))"));
    assert!(body_contains(unpack, "*a_0_guest = GuestTransfer::to_guest(a_0_host);"));
}

#[test]
fn exports_count_functions_callbacks_and_terminator() {
    let mut lib = libtest();
    declare(&mut lib, "first", "void", &["int (*)(char, char)"]);
    declare(&mut lib, "second", "void", &["int (*)(char, char)", "int"]);
    export(&mut lib, "first");
    export(&mut lib, "second");
    let out = run(&lib, GuestAbi::X86_64);

    // Two functions, one distinct callback signature, one terminator.
    assert_eq!(static_array_len(&out.host, "exports"), 4);
    assert!(out.host_text.contains(&tokens("ExportEntry { sha256: None, invoke: None }")));
}

#[test]
fn signature_preservation() {
    let mut lib = libtest();
    lib.declare_struct(StructDef::new("TestStruct", int_members(&["member"])));
    declare(
        &mut lib,
        "func",
        "int",
        &["unsigned long long", "TestStruct *", "double"],
    );
    export(&mut lib, "func");
    let out = run(&lib, GuestAbi::X86_64);

    let public = expect_fn(&out.guest, "func");
    let pack = expect_fn(&out.guest, "fexfn_pack_func");
    assert_eq!(param_types(public), param_types(pack));
    assert_eq!(return_type(public), tokens("c_int"));
    assert_eq!(return_type(pack), tokens("c_int"));
    assert_eq!(
        param_types(pack),
        vec![tokens("c_ulonglong"), tokens("*mut TestStruct"), tokens("c_double")]
    );
}

#[test]
fn generation_is_deterministic() {
    let mut lib = libtest();
    lib.declare_struct(
        StructDef::new("A", int_members(&["a", "b"]))
            .with_guest_members(int_members(&["b", "a"])),
    );
    declare(&mut lib, "func", "int", &["A *", "int (*)(char, char)", "unsigned long"]);
    export(&mut lib, "func");

    for abi in BOTH_ABIS {
        let first = generate(&lib, abi).unwrap();
        let second = generate(&lib, abi).unwrap();
        assert_eq!(first.guest, second.guest);
        assert_eq!(first.host, second.host);
    }
}

#[test]
fn width_changing_scalars_on_32bit_guests() {
    let mut lib = libtest();
    declare(&mut lib, "func", "long", &["unsigned long", "size_t"]);
    export(&mut lib, "func");
    let out = run(&lib, GuestAbi::X86_32);

    // Slots are guest-width; the unpacker widens on extraction and narrows
    // the result on the way back.
    let record = expect_struct(&out.host, "fexfn_packed_args_libtest_func");
    assert_eq!(
        field_types(record),
        vec![
            ("rv".to_string(), tokens("GuestScalar<i32>")),
            ("a_0".to_string(), tokens("GuestScalar<u32>")),
            ("a_1".to_string(), tokens("GuestScalar<u32>")),
        ]
    );
    let unpack = expect_fn(&out.host, "fexfn_unpack_libtest_func");
    assert!(body_contains(unpack, "args.a_0.get() as c_ulong"));
    assert!(body_contains(unpack, "GuestScalar::new(rv as i32)"));
}

#[test]
fn loader_and_accessor_shape() {
    let mut lib = libtest();
    declare(&mut lib, "func", "void", &[]);
    export(&mut lib, "func");
    let out = run(&lib, GuestAbi::X86_64);

    let init = expect_fn(&out.host, "fexldr_init_libtest");
    assert!(body_contains(init, r#"open_host_library("libtest.so")"#));
    assert!(body_contains(init, r#"fexldr_ptr_libtest_func.resolve(&lib, "func")"#));

    let accessor = expect_fn(&out.host, "fexthunks_exports_libtest");
    assert_eq!(return_type(accessor), tokens("*const ExportEntry"));
    assert!(body_contains(accessor, "fexldr_init_libtest()"));
}

#[test]
fn custom_host_impl_suppresses_generated_body() {
    let mut lib = libtest();
    declare(&mut lib, "func", "int", &["void *"]);
    let mut config = FunctionConfig::new();
    config.annotate(Annotation::CustomHostImpl).unwrap();
    config.annotate_param(0, Annotation::PtrPassthrough).unwrap();
    lib.export_function("func", config).unwrap();
    let out = run(&lib, GuestAbi::X86_64);

    // The unpacker calls the user-provided implementation with the raw
    // guest pointer, and the loader does not resolve the symbol.
    let unpack = expect_fn(&out.host, "fexfn_unpack_libtest_func");
    assert!(body_contains(unpack, "fexfn_impl_libtest_func(args.a_0)"));
    assert!(out.host_text.contains(&tokens("fn fexfn_impl_libtest_func(a_0: GuestPtr<c_void>) -> c_int")));
    let init = expect_fn(&out.host, "fexldr_init_libtest");
    assert!(!body_contains(init, "resolve"));
}

#[test]
fn annotated_callback_parameters_get_a_dedicated_unpacker() {
    let mut lib = libtest();
    lib.declare_struct(StructDef::opaque("B"));
    let mut params = std::collections::BTreeMap::new();
    let mut config = FunctionConfig::new();
    config.annotate_param(0, Annotation::PtrPassthrough).unwrap();
    params.insert(0, config.param(0));
    lib.register_callback(CallbackRegistration {
        signature: thunkgen_generate::Signature::parse("void (B *)").unwrap(),
        params,
    });
    let out = run(&lib, GuestAbi::X86_64);

    // The projection decision happens at generation time: a passthrough
    // parameter disqualifies the generic wrapper.
    let unpack = expect_fn(&out.host, "fexfn_unpack_callback_0");
    assert!(body_contains(unpack, "GuestPtr<B>"));
    assert!(!out.host_text.contains(&tokens("GuestWrapperForHostFunction::<")));
    assert_eq!(static_array_len(&out.host, "exports"), 2);
}

#[test]
fn record_offsets_are_asserted() {
    let mut lib = libtest();
    declare(&mut lib, "func", "int", &["char", "long long"]);
    export(&mut lib, "func");

    // i386: the 8-byte slot aligns to 4 right after rv + char + padding.
    let out = run(&lib, GuestAbi::X86_32);
    assert!(out.host_text.contains(&tokens(
        "assert!(core::mem::offset_of!(fexfn_packed_args_libtest_func, a_1) == 8);"
    )));
    assert!(out
        .guest_text
        .contains(&tokens("assert!(core::mem::offset_of!(PackedArgs, a_1) == 8);")));
}