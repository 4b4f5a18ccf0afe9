//! Replaces memory and barrier intrinsics with native loads and stores.
use relift_ir::{
    func_cursor::insert_before, module::FuncRef, CastOp, Function, InstData, InstId, Module, Type,
    ValueId,
};
use tracing::debug;

use crate::{
    error::RecoveryError,
    intrinsic::{AccessWidth, Intrinsic},
};

#[derive(Debug, Default)]
pub struct Lowering {
    pub lowered: usize,
    /// Typed pointers recovered from `ptrtoint` address operands.
    pub pointers: Vec<(FuncRef, ValueId)>,
}

pub fn lower_intrinsics(module: &mut Module, prefix: &str) -> Result<Lowering, RecoveryError> {
    let mut calls = Vec::new();
    for func in module.iter_functions() {
        let function = &module.funcs[func];
        for block in function.layout.iter_block() {
            for inst in function.layout.iter_inst(block) {
                let Some(callee) = function.dfg.inst(inst).callee() else {
                    continue;
                };
                let callee = &module.funcs[callee];
                let Some(intrinsic) = Intrinsic::parse(callee.sig.name(), prefix) else {
                    continue;
                };
                if !intrinsic.is_lowered() {
                    continue;
                }
                if callee.has_body() {
                    return Err(RecoveryError::IntrinsicHasBody(callee.sig.name().to_string()));
                }
                let args = function.dfg.inst(inst).args().len();
                if args < intrinsic.arity() {
                    return Err(RecoveryError::MalformedIntrinsic {
                        name: callee.sig.name().to_string(),
                        args,
                        expected: intrinsic.arity(),
                    });
                }
                calls.push((func, inst, intrinsic));
            }
        }
    }

    let mut lowering = Lowering::default();
    for (func, call, intrinsic) in calls {
        match intrinsic {
            Intrinsic::ReadMemory(width) => lower_read(module, func, call, width, &mut lowering),
            Intrinsic::WriteMemory(width) => lower_write(module, func, call, width, &mut lowering),
            _ => forward_memory(&mut module.funcs[func], call),
        }

        let function = &mut module.funcs[func];
        function.dfg.untrack_inst(call);
        function.layout.remove_inst(call);
        lowering.lowered += 1;
    }

    debug!("{} intrinsic calls lowered", lowering.lowered);
    Ok(lowering)
}

fn lower_read(
    module: &mut Module,
    func: FuncRef,
    call: InstId,
    width: AccessWidth,
    lowering: &mut Lowering,
) {
    let value_ty = width.ty();
    let ptr = address_operand(module, func, call, value_ty, lowering);

    let function = &mut module.funcs[func];
    let mut loaded = insert_before(function, call, InstData::load(ptr, value_ty), value_ty);
    let Some(result) = function.dfg.inst_result(call) else {
        return;
    };

    let ret_ty = function.dfg.value_ty(result);
    if width == AccessWidth::F80 && ret_ty != Type::F80 {
        let trunc = InstData::cast(CastOp::FpTrunc, loaded, ret_ty);
        loaded = insert_before(function, call, trunc, ret_ty);
    }
    function.dfg.change_to_alias(result, loaded);
}

fn lower_write(
    module: &mut Module,
    func: FuncRef,
    call: InstId,
    width: AccessWidth,
    lowering: &mut Lowering,
) {
    let value_ty = width.ty();
    let ptr = address_operand(module, func, call, value_ty, lowering);

    let function = &mut module.funcs[func];
    let mut value = function.dfg.inst(call).args()[2];
    if width == AccessWidth::F80 && function.dfg.value_ty(value) != Type::F80 {
        let ext = InstData::cast(CastOp::FpExt, value, Type::F80);
        value = insert_before(function, call, ext, Type::F80);
    }

    let store = function.dfg.make_inst(InstData::store(ptr, value));
    function.layout.insert_inst_before(store, call);
    forward_memory(function, call);
}

/// Replaces the memory state produced by `call` with the one it consumes.
fn forward_memory(function: &mut Function, call: InstId) {
    let mem = function.dfg.inst(call).args()[0];
    if let Some(result) = function.dfg.inst_result(call) {
        function.dfg.change_to_alias(result, mem);
    }
}

/// Returns a pointer to `value_ty` for the address operand of `call`.
fn address_operand(
    module: &mut Module,
    func: FuncRef,
    call: InstId,
    value_ty: Type,
    lowering: &mut Lowering,
) -> ValueId {
    let ptr_ty = module.types.make_ptr(value_ty);
    let function = &mut module.funcs[func];
    let addr = function.dfg.inst(call).args()[1];

    match function.dfg.cast_of(addr) {
        Some((CastOp::PtrToInt, ptr)) => {
            lowering.pointers.push((func, ptr));
            if function.dfg.value_ty(ptr) == ptr_ty {
                ptr
            } else {
                let cast = InstData::cast(CastOp::Bitcast, ptr, ptr_ty);
                insert_before(function, call, cast, ptr_ty)
            }
        }
        _ => {
            let cast = InstData::cast(CastOp::IntToPtr, addr, ptr_ty);
            insert_before(function, call, cast, ptr_ty)
        }
    }
}
