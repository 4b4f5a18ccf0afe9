use relift_abi::{FunctionDecl, GlobalVarDecl, ValueDecl};
use relift_ir::{
    builder::test_util::*, module::FuncRef, GlobalVariableData, InstData, Linkage, Module,
    Signature, Type,
};
use relift_recovery::{
    recover, AddressSpace, ByteKind, RecoveryConfig, RecoveryError, RecoveryStats,
};

fn space() -> AddressSpace {
    let mut space = AddressSpace::new();
    space.map(0x1000, 0x1000, ByteKind::Code);
    space.map(0x2000, 0x1000, ByteKind::Global);
    space.map(0x7000, 0x1000, ByteKind::Stack);
    space
}

fn insts(module: &Module, func: FuncRef) -> Vec<InstData> {
    let function = &module.funcs[func];
    function
        .layout
        .iter_block()
        .flat_map(|block| function.layout.iter_inst(block))
        .map(|inst| function.dfg.inst(inst).clone())
        .collect()
}

fn function_decl(name: &str, address: u64) -> FunctionDecl {
    FunctionDecl {
        address,
        sig: Signature::new(name, Linkage::External, &[], Type::Unit),
        return_address: ValueDecl::memory("rsp", 0, Type::I64),
        return_stack_pointer: "rsp".to_string(),
        return_stack_pointer_offset: 8,
        params: vec![],
        returns: vec![],
        num_bytes_in_redzone: 128,
    }
}

#[test]
fn displacement_folds_into_array_index() {
    let mut mb = TestModuleBuilder::new();
    let arr = mb.module_builder.declare_array_type(Type::I32, 10);
    let table = mb.module_builder.make_global(GlobalVariableData::new(
        "table".to_string(),
        arr,
        Linkage::External,
        false,
    ));

    let mut builder = mb.func_builder(&[], Type::I32);
    let b0 = builder.append_block();
    builder.switch_to_block(b0);
    let base = builder.make_global_value(table);
    let int = builder.ptr_to_int(base, Type::I64);
    let disp = builder.make_imm_value(24i64);
    let sum = builder.add(int, disp);
    let ptr_ty = builder.ptr_type(Type::I32);
    let ptr = builder.int_to_ptr(sum, ptr_ty);
    let v = builder.load(ptr, Type::I32);
    builder.ret(Some(v));
    let func = builder.func_ref();
    builder.finish();

    let mut module = mb.build();
    let mut space = space();
    space.add_variable(GlobalVarDecl::new("table", arr, 0x2000));

    let stats = recover(&space, &mut module, &RecoveryConfig::default()).unwrap();
    assert_eq!(stats.rewrites, 1);
    assert_eq!(stats.globals_created, 0);

    // The address the displacement was added to is no longer computed.
    assert_eq!(
        dump_func(&module, func),
        "func public %test_func() -> i32 {
    block0:
        v8.*i32 = gep %table 0.i64 6.i64;
        v9.i64 = ptrtoint v8;
        v4.*i32 = inttoptr v9;
        v5.i32 = load v4;
        return v5;
}
"
    );
}

#[test]
fn frame_globals_and_intrinsics() {
    let mut mb = TestModuleBuilder::new();
    let mem_ty = mb.module_builder.ptr_type(Type::I8);
    let read = mb.declare("__relift_read_memory_32", &[mem_ty, Type::I64], Type::I32);
    let write = mb.declare(
        "__relift_write_memory_64",
        &[mem_ty, Type::I64, Type::I64],
        mem_ty,
    );

    let mut builder = mb.func_builder(&[mem_ty], mem_ty);
    let b0 = builder.append_block();
    builder.switch_to_block(b0);
    let mem = builder.args()[0];
    let slot = builder.make_imm_value(0x7ff8i64);
    let global = builder.make_imm_value(0x2000i64);
    let v = builder.call(read, &[mem, slot]).unwrap();
    let v64 = builder.zext(v, Type::I64);
    let mem = builder.call(write, &[mem, global, v64]).unwrap();
    builder.ret(Some(mem));
    let func = builder.func_ref();
    builder.finish();

    let mut module = mb.build();
    let mut space = space();
    space.set_initial_stack_pointer(0x8000);
    let config = RecoveryConfig::default();

    let stats = recover(&space, &mut module, &config).unwrap();
    assert_eq!(
        stats,
        RecoveryStats {
            cells: 2,
            frames: 1,
            globals_created: 1,
            intrinsics_lowered: 2,
            rewrites: 0,
        }
    );

    // The frame spans the redzone below the slot up to the entry stack pointer.
    let frame = module.types.lookup_struct("test_func.frame").unwrap();
    let redzone = module.types.make_array(Type::I8, 128);
    let tail = module.types.make_array(Type::I8, 4);
    let def = module.types.struct_def(frame).unwrap();
    assert!(def.packed);
    assert_eq!(def.fields, vec![redzone, Type::I32, tail]);

    let gv = module.gvs.gv_by_symbol("gvar_2000").unwrap();
    let def = module.types.struct_def(module.gvs.ty(gv)).unwrap();
    assert_eq!(def.fields, vec![Type::I64]);
    assert!(!def.packed);

    let insts = insts(&module, func);
    assert!(!insts.iter().any(|inst| matches!(inst, InstData::Call { .. })));
    assert_eq!(
        insts
            .iter()
            .filter(|inst| matches!(inst, InstData::Load { .. }))
            .count(),
        1
    );
    assert_eq!(
        insts
            .iter()
            .filter(|inst| matches!(inst, InstData::Store { .. }))
            .count(),
        1
    );
    // Lowering reads the variable through its pointer, so the integer
    // address placed for the cell is swept.
    let dump = dump_func(&module, func);
    assert!(dump.contains("bitcast %gvar_2000"));
    assert!(!dump.contains("ptrtoint"));

    // Nothing is left to recover.
    let stats = recover(&space, &mut module, &config).unwrap();
    assert_eq!(stats, RecoveryStats::default());
}

#[test]
fn declared_variables_are_shared() {
    let mut mb = TestModuleBuilder::new();
    let ptr_ty = mb.module_builder.ptr_type(Type::I32);
    let mut funcs = vec![];
    for name in ["f", "g"] {
        let mut builder = mb.named_func_builder(name, &[], Type::I32);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let counter = builder.make_imm_value(0x2000i64);
        let flag = builder.make_imm_value(0x2100i64);
        let p = builder.int_to_ptr(counter, ptr_ty);
        let v = builder.load(p, Type::I32);
        let q = builder.int_to_ptr(flag, ptr_ty);
        builder.store(q, v);
        builder.ret(Some(v));
        funcs.push(builder.func_ref());
        builder.finish();
    }

    let mut module = mb.build();
    let mut space = space();
    space.add_variable(GlobalVarDecl::new("counter", Type::I32, 0x2000));
    space.add_variable(GlobalVarDecl::new("flag", Type::I8, 0x2100));

    let stats = recover(&space, &mut module, &RecoveryConfig::default()).unwrap();
    assert_eq!(stats.cells, 4);
    assert_eq!(stats.globals_created, 0);
    assert_eq!(module.gvs.gv_by_symbol("gvar_2000"), None);

    for func in funcs {
        let dump = dump_func(&module, func);
        assert!(dump.contains("ptrtoint %counter"));
        assert!(dump.contains("ptrtoint %flag"));
    }

    // `flag` is accessed wider than declared and takes the accessed layout.
    let flag = module.gvs.gv_by_symbol("flag").unwrap();
    let def = module.types.struct_def(module.gvs.ty(flag)).unwrap();
    assert_eq!(def.fields, vec![Type::I32]);
}

#[test]
fn function_addresses_resolve_to_functions() {
    let mut mb = TestModuleBuilder::new();
    let fn_ty = mb.module_builder.declare_func_type(&[], Type::Unit);
    let fn_ptr = mb.module_builder.ptr_type(fn_ty);

    let mut builder = mb.func_builder(&[], Type::I64);
    let b0 = builder.append_block();
    builder.switch_to_block(b0);
    let addr = builder.make_imm_value(0x1100i64);
    let p = builder.int_to_ptr(addr, fn_ptr);
    let int = builder.ptr_to_int(p, Type::I64);
    builder.ret(Some(int));
    let func = builder.func_ref();
    builder.finish();

    let mut module = mb.build();
    let mut space = space();
    space.add_function(function_decl("callee", 0x1100));

    let stats = recover(&space, &mut module, &RecoveryConfig::default()).unwrap();
    assert_eq!(stats.cells, 1);
    assert_eq!(stats.globals_created, 0);
    assert!(module.lookup_func("callee").is_some());
    assert!(dump_func(&module, func).contains("ptrtoint %callee"));
}

#[test]
fn stack_access_needs_stack_pointer() {
    let mut mb = TestModuleBuilder::new();
    let mut builder = mb.func_builder(&[], Type::I32);
    let b0 = builder.append_block();
    builder.switch_to_block(b0);
    let slot = builder.make_imm_value(0x7ff0i64);
    let ptr_ty = builder.ptr_type(Type::I32);
    let p = builder.int_to_ptr(slot, ptr_ty);
    let v = builder.load(p, Type::I32);
    builder.ret(Some(v));
    builder.finish();

    let mut module = mb.build();
    let err = recover(&space(), &mut module, &RecoveryConfig::default()).unwrap_err();
    assert_eq!(
        err,
        RecoveryError::MissingStackPointer("test_func".to_string())
    );
}

#[test]
fn unsized_variable_is_fatal() {
    let mut module = TestModuleBuilder::new().build();
    let mut space = space();
    space.add_variable(GlobalVarDecl::new("opaque", Type::Unit, 0x2000));

    let err = recover(&space, &mut module, &RecoveryConfig::default()).unwrap_err();
    assert_eq!(
        err,
        RecoveryError::UnsizedVariable {
            name: "opaque".to_string(),
            ty: "unit".to_string(),
        }
    );
}

#[test]
fn access_wrapping_the_address_space() {
    let mut mb = TestModuleBuilder::new();
    let mut builder = mb.func_builder(&[], Type::I64);
    let b0 = builder.append_block();
    builder.switch_to_block(b0);
    let top = builder.make_imm_value(-4i64);
    let ptr_ty = builder.ptr_type(Type::I64);
    let p = builder.int_to_ptr(top, ptr_ty);
    let v = builder.load(p, Type::I64);
    builder.ret(Some(v));
    builder.finish();

    let mut module = mb.build();
    let mut space = space();
    space.map(0xffff_ffff_ffff_f000, 0x1000, ByteKind::Global);

    let err = recover(&space, &mut module, &RecoveryConfig::default()).unwrap_err();
    assert_eq!(
        err,
        RecoveryError::AddressOverflow {
            address: 0xffff_ffff_ffff_fffc,
            size: 8,
        }
    );
}

#[test]
fn address_phis_become_pointer_phis() {
    let mut mb = TestModuleBuilder::new();
    let ptr_i32 = mb.module_builder.ptr_type(Type::I32);

    let mut builder = mb.func_builder(&[Type::I1, ptr_i32, ptr_i32], Type::I32);
    let entry = builder.append_block();
    let then = builder.append_block();
    let merge = builder.append_block();
    let [cond, a, b] = [builder.args()[0], builder.args()[1], builder.args()[2]];

    builder.switch_to_block(entry);
    let a_int = builder.ptr_to_int(a, Type::I64);
    builder.br(cond, then, merge);

    builder.switch_to_block(then);
    let b_int = builder.ptr_to_int(b, Type::I64);
    builder.jump(merge);

    builder.switch_to_block(merge);
    let phi = builder.phi(Type::I64, &[(a_int, entry), (b_int, then)]);
    let p = builder.int_to_ptr(phi, ptr_i32);
    let v = builder.load(p, Type::I32);
    builder.ret(Some(v));
    let func = builder.func_ref();
    builder.finish();

    // Neither argument is known to recovery as a pointer into a placed entity.
    let mut module = mb.build();
    let stats = recover(&space(), &mut module, &RecoveryConfig::default()).unwrap();
    assert_eq!(stats.rewrites, 1);

    assert_eq!(
        dump_func(&module, func),
        "func public %test_func(v0.i1, v1.*i32, v2.*i32) -> i32 {
    block0:
        br v0 block1 block2;

    block1:
        jump block2;

    block2:
        v8.*i32 = phi (v1 block0) (v2 block1);
        v9.i64 = ptrtoint v8;
        v6.*i32 = inttoptr v9;
        v7.i32 = load v6;
        return v7;
}
"
    );
}
