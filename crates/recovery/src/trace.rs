//! Backward walk from address values to the integer constants they are
//! computed from.
use relift_ir::{
    BinaryOp, CastOp, DataFlowGraph, InstData, InstId, Type, TypeStore, Value, ValueId,
};
use rustc_hash::FxHashSet;

/// Returns every `(user, constant)` pair that `value`, as used by `user`,
/// originates from.
///
/// The walk passes through address casts, `sext`/`zext`, the base of a
/// `gep`, the first operand of an `add`/`sub` with exactly one constant
/// operand, and every incoming value of a phi. Chains that reach anything
/// else contribute nothing.
pub fn trace_constant_bases(
    dfg: &DataFlowGraph,
    user: InstId,
    value: ValueId,
) -> Vec<(InstId, ValueId)> {
    let mut found = Vec::new();
    let mut visited = FxHashSet::default();
    let mut worklist = vec![(user, value)];

    while let Some((user, value)) = worklist.pop() {
        if !visited.insert((user, value)) {
            continue;
        }

        let inst = match dfg.value(value) {
            Value::Immediate { .. } => {
                found.push((user, value));
                continue;
            }
            Value::Inst { inst, .. } => *inst,
            _ => continue,
        };

        match dfg.inst(inst) {
            InstData::Cast { code, args, .. }
                if matches!(
                    code,
                    CastOp::Bitcast
                        | CastOp::IntToPtr
                        | CastOp::PtrToInt
                        | CastOp::Sext
                        | CastOp::Zext
                ) =>
            {
                worklist.push((inst, args[0]));
            }

            InstData::Gep { args } => worklist.push((inst, args[0])),

            InstData::Binary {
                code: BinaryOp::Add | BinaryOp::Sub,
                args,
            } if dfg.is_imm(args[0]) != dfg.is_imm(args[1]) => {
                worklist.push((inst, args[0]));
            }

            InstData::Phi { values, .. } => {
                worklist.extend(values.iter().map(|&incoming| (inst, incoming)));
            }

            _ => {}
        }
    }

    found
}

/// Type a value is reinterpreted as by its first `bitcast`/`inttoptr` user.
pub fn downstream_type(dfg: &DataFlowGraph, value: ValueId) -> Option<Type> {
    dfg.users(value).find_map(|&user| match dfg.inst(user) {
        InstData::Cast {
            code: CastOp::Bitcast | CastOp::IntToPtr,
            ty,
            ..
        } => Some(*ty),
        _ => None,
    })
}

/// Type of `value` before it went through reinterpreting casts.
pub fn upstream_type(dfg: &DataFlowGraph, mut value: ValueId) -> Type {
    while let Some((code, arg)) = dfg.cast_of(value) {
        if !is_reinterpreting(code) {
            break;
        }
        value = arg;
    }
    dfg.value_ty(value)
}

/// The outermost pointer type `value` had before it went through
/// reinterpreting casts.
pub fn upstream_ptr_type(
    dfg: &DataFlowGraph,
    types: &TypeStore,
    mut value: ValueId,
) -> Option<Type> {
    let mut found = None;
    loop {
        let ty = dfg.value_ty(value);
        if types.is_ptr(ty) {
            found = Some(ty);
        }

        match dfg.cast_of(value) {
            Some((code, arg)) if is_reinterpreting(code) => value = arg,
            _ => return found,
        }
    }
}

fn is_reinterpreting(code: CastOp) -> bool {
    matches!(code, CastOp::Bitcast | CastOp::IntToPtr | CastOp::PtrToInt)
}

#[cfg(test)]
mod tests {
    use relift_ir::{builder::test_util::*, InstData, Type};

    use super::*;

    #[test]
    fn through_casts_and_arith() {
        let mut mb = TestModuleBuilder::new();
        let mut builder = mb.func_builder(&[Type::I64], Type::Unit);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);

        let base = builder.make_imm_value(0x2000i64);
        let index = builder.args()[0];
        let add = builder.add(base, index);
        let ptr_ty = builder.ptr_type(Type::I32);
        let ptr = builder.int_to_ptr(add, ptr_ty);
        let loaded = builder.load(ptr, Type::I32);

        // Both operands vary, so the chain is lost.
        let dyn_add = builder.add(index, index);
        let dyn_ptr = builder.int_to_ptr(dyn_add, ptr_ty);
        builder.ret(None);
        builder.finish();

        let module = mb.build();
        let func = &module.funcs[module.lookup_func("test_func").unwrap()];
        let dfg = &func.dfg;

        let load = dfg.value_inst(loaded).unwrap();
        let add_inst = dfg.value_inst(add).unwrap();
        assert_eq!(trace_constant_bases(dfg, load, ptr), vec![(add_inst, base)]);

        let dyn_ptr_inst = dfg.value_inst(dyn_ptr).unwrap();
        assert!(trace_constant_bases(dfg, dyn_ptr_inst, dyn_add).is_empty());
    }

    #[test]
    fn through_phis_with_cycle() {
        let mut mb = TestModuleBuilder::new();
        let mut builder = mb.func_builder(&[Type::I1], Type::Unit);
        let entry = builder.append_block();
        let header = builder.append_block();
        let exit = builder.append_block();

        builder.switch_to_block(entry);
        let c0 = builder.make_imm_value(0x1000i64);
        let c1 = builder.make_imm_value(0x3000i64);
        builder.jump(header);

        builder.switch_to_block(header);
        let phi = builder.phi(Type::I64, &[(c0, entry)]);
        let step = builder.make_imm_value(4i64);
        let next = builder.add(phi, step);
        builder.append_phi_arg(phi, next, header);
        builder.append_phi_arg(phi, c1, header);
        let cond = builder.args()[0];
        builder.br(cond, header, exit);

        builder.switch_to_block(exit);
        builder.ret(None);
        builder.finish();

        let module = mb.build();
        let func = &module.funcs[module.lookup_func("test_func").unwrap()];
        let dfg = &func.dfg;
        let phi_inst = dfg.value_inst(phi).unwrap();
        let add_inst = dfg.value_inst(next).unwrap();

        let mut found = trace_constant_bases(dfg, add_inst, phi);
        found.sort();
        let mut expected = vec![(phi_inst, c0), (phi_inst, c1)];
        expected.sort();
        assert_eq!(found, expected);
        assert!(matches!(dfg.inst(phi_inst), InstData::Phi { .. }));
    }

    #[test]
    fn up_and_downstream_types() {
        let mut mb = TestModuleBuilder::new();
        let mut builder = mb.func_builder(&[], Type::Unit);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);

        let addr = builder.make_imm_value(0x2000i64);
        let ptr_i32 = builder.ptr_type(Type::I32);
        let ptr_i8 = builder.ptr_type(Type::I8);
        let p = builder.int_to_ptr(addr, ptr_i32);
        let q = builder.bitcast(p, ptr_i8);
        let r = builder.ptr_to_int(q, Type::I64);
        builder.ret(None);
        builder.finish();

        let module = mb.build();
        let func = &module.funcs[module.lookup_func("test_func").unwrap()];
        let dfg = &func.dfg;

        assert_eq!(upstream_type(dfg, r), Type::I64);
        assert_eq!(upstream_ptr_type(dfg, &module.types, r), Some(ptr_i32));
        assert_eq!(upstream_ptr_type(dfg, &module.types, addr), None);
        assert_eq!(downstream_type(dfg, addr), Some(ptr_i32));
        assert_eq!(downstream_type(dfg, p), Some(ptr_i8));
        assert_eq!(downstream_type(dfg, r), None);
    }
}
