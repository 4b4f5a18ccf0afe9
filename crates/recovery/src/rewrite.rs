//! Pointer-arithmetic rewriting.
//!
//! Integer arithmetic on the address of a typed pointer is turned back into
//! `gep`s through the pointee type, and integer phis of addresses become
//! pointer phis. Displacements are only folded for pointers in the frontier;
//! every pointer a rewrite produces joins it, so the rewriter is run until
//! no rewrite fires. Every round ends by removing side-effect-free
//! instructions whose results are unused.
use indexmap::IndexSet;
use relift_ir::{
    func_cursor::insert_before, module::FuncRef, BinaryOp, CastOp, Function, InstData, InstId,
    Module, Type, ValueId,
};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::{entry::offset_value, trace::downstream_type};

#[derive(Debug)]
pub struct PtrArithRewriter {
    frontier: IndexSet<(FuncRef, ValueId)>,
    max_rounds: usize,
}

impl PtrArithRewriter {
    pub fn new(max_rounds: usize) -> Self {
        Self {
            frontier: IndexSet::default(),
            max_rounds,
        }
    }

    pub fn insert(&mut self, func: FuncRef, ptr: ValueId) {
        self.frontier.insert((func, ptr));
    }

    pub fn seed(&mut self, pointers: impl IntoIterator<Item = (FuncRef, ValueId)>) {
        self.frontier.extend(pointers);
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    /// Rewrites until a fixpoint or the round limit. Returns the number of
    /// rewrites.
    pub fn run(&mut self, module: &mut Module) -> usize {
        let mut total = 0;
        for round in 0..self.max_rounds {
            let rewrites = self.round(module);
            debug!("rewrite round {round}: {rewrites} rewrites");
            if rewrites == 0 {
                return total;
            }
            total += rewrites;
        }

        warn!(
            "pointer rewriting stopped after {} rounds without a fixpoint",
            self.max_rounds
        );
        total
    }

    fn round(&mut self, module: &mut Module) -> usize {
        let mut rewrites = 0;
        let mut idx = 0;
        // Pointers added while iterating are visited in the same round.
        while let Some(&(func, ptr)) = self.frontier.get_index(idx) {
            for (add, ptr_int) in displaced_addresses(&module.funcs[func], ptr) {
                if let Some(new_ptrs) = fold_displacement(module, func, ptr, ptr_int, add) {
                    self.frontier.extend(new_ptrs.into_iter().map(|p| (func, p)));
                    rewrites += 1;
                }
            }
            idx += 1;
        }

        let funcs: Vec<_> = module
            .iter_functions()
            .filter(|&func| module.funcs[func].has_body())
            .collect();
        for &func in &funcs {
            for phi in sinkable_phis(module, func) {
                if let Some(new_phi) = sink_phi(module, func, phi) {
                    self.frontier.insert((func, new_phi));
                    rewrites += 1;
                }
            }
        }

        for func in funcs {
            let removed = remove_dead_insts(&mut module.funcs[func]);
            if removed > 0 {
                debug!(
                    "`{}`: {removed} dead instructions removed",
                    module.funcs[func].sig.name()
                );
            }
        }

        rewrites
    }
}

/// Results of `ptrtoint ptr` that are used by instructions in the layout.
fn address_ints(function: &Function, ptr: ValueId) -> SmallVec<[ValueId; 4]> {
    let dfg = &function.dfg;
    dfg.users(ptr)
        .filter(|&&user| function.layout.is_inst_inserted(user))
        .filter(|&&user| dfg.inst(user).cast_code() == Some(CastOp::PtrToInt))
        .filter_map(|&user| dfg.inst_result(user))
        .collect()
}

/// Returns `(add, ptrtoint result)` for every `add(ptrtoint ptr, C)` with a
/// non-negative constant `C`.
fn displaced_addresses(function: &Function, ptr: ValueId) -> Vec<(InstId, ValueId)> {
    let dfg = &function.dfg;
    let mut found = Vec::new();
    for int in address_ints(function, ptr) {
        for &user in dfg.users(int) {
            if !function.layout.is_inst_inserted(user) {
                continue;
            }
            let InstData::Binary {
                code: BinaryOp::Add,
                args,
            } = dfg.inst(user)
            else {
                continue;
            };
            let other = if args[0] == int { args[1] } else { args[0] };
            if dfg.value_imm(other).is_some_and(|imm| imm.as_i128() >= 0) {
                found.push((user, int));
            }
        }
    }
    found
}

/// Replaces `add` with the address of a `gep` from `ptr`. Returns the new
/// pointers, or `None` if the pointee of `ptr` has no layout.
fn fold_displacement(
    module: &mut Module,
    func: FuncRef,
    ptr: ValueId,
    ptr_int: ValueId,
    add: InstId,
) -> Option<SmallVec<[ValueId; 2]>> {
    let dl = module.isa.data_layout();
    let function = &module.funcs[func];
    let args = function.dfg.inst(add).args();
    let disp = if args[0] == ptr_int { args[1] } else { args[0] };
    let disp = function.dfg.value_imm(disp)?.as_i128() as u64;
    let sum = function.dfg.inst_result(add)?;
    let int_ty = function.dfg.value_ty(sum);
    let down_ty = downstream_type(&function.dfg, sum);

    let types = &module.types;
    let pointee = types.deref(function.dfg.value_ty(ptr))?;
    let size = dl.alloc_size(pointee, types).ok()? as u64;

    let (first, mut rem) = if size == 0 {
        (0, disp)
    } else {
        (disp / size, disp % size)
    };
    let mut path = vec![first];
    let mut cur = pointee;
    while rem > 0 {
        if let Some((elem, len)) = types.array_def(cur).or_else(|| types.vector_def(cur)) {
            let elem_size = dl.alloc_size(elem, types).ok()? as u64;
            if elem_size == 0 || rem / elem_size >= len as u64 {
                break;
            }
            path.push(rem / elem_size);
            rem %= elem_size;
            cur = elem;
        } else if let Some(def) = types.struct_def(cur) {
            let mut field = None;
            for idx in (0..def.fields.len()).rev() {
                let offset = dl.field_offset(cur, idx, types).ok()? as u64;
                if offset <= rem {
                    field = Some((idx, offset, def.fields[idx]));
                    break;
                }
            }
            let Some((idx, offset, field_ty)) = field else {
                break;
            };
            path.push(idx as u64);
            rem -= offset;
            cur = field_ty;
        } else {
            break;
        }
    }

    // Remainders are indexed through the pointer type the sum is cast to if
    // its pointee divides the remainder, otherwise byte-wise.
    let rem_step = down_ty.and_then(|ty| {
        let size = dl.alloc_size(types.deref(ty)?, types).ok()? as u64;
        (size > 0 && rem % size == 0).then_some((ty, size))
    });

    let mut gep_args = vec![ptr];
    for idx in path {
        gep_args.push(offset_value(module, func, idx as i64));
    }
    let gep_ty = module.types.make_ptr(cur);
    let function = &mut module.funcs[func];
    let gep = insert_before(function, add, InstData::gep(&gep_args), gep_ty);
    let mut new_ptrs = SmallVec::from_slice(&[gep]);

    let mut result = gep;
    if rem > 0 {
        let (rem_ptr_ty, elem_size) = match rem_step {
            Some(step) => step,
            None => (module.types.make_ptr(Type::I8), 1),
        };
        let function = &mut module.funcs[func];
        let cast = InstData::cast(CastOp::Bitcast, gep, rem_ptr_ty);
        let base = insert_before(function, add, cast, rem_ptr_ty);
        let index = offset_value(module, func, (rem / elem_size) as i64);
        let function = &mut module.funcs[func];
        result = insert_before(function, add, InstData::gep(&[base, index]), rem_ptr_ty);
        new_ptrs.push(result);
    }

    let function = &mut module.funcs[func];
    let cast = InstData::cast(CastOp::PtrToInt, result, int_ty);
    let int = insert_before(function, add, cast, int_ty);
    function.dfg.change_to_alias(sum, int);
    function.dfg.untrack_inst(add);
    function.layout.remove_inst(add);

    Some(new_ptrs)
}

/// Pointer-width integer phis with uses whose incoming values are all
/// `ptrtoint` casts.
fn sinkable_phis(module: &Module, func: FuncRef) -> Vec<InstId> {
    let function = &module.funcs[func];
    let dfg = &function.dfg;
    let int_ty = module.isa.data_layout().pointer_repl();

    let mut phis = Vec::new();
    for block in function.layout.iter_block() {
        for inst in function.layout.iter_inst(block) {
            let Some(mut incoming) = dfg.inst(inst).phi_args() else {
                continue;
            };
            let Some(result) = dfg.inst_result(inst) else {
                continue;
            };
            if dfg.value_ty(result) != int_ty || dfg.users_num(result) == 0 {
                continue;
            }
            if incoming.all(|(value, _)| matches!(dfg.cast_of(value), Some((CastOp::PtrToInt, _))))
            {
                phis.push(inst);
            }
        }
    }
    phis
}

/// Replaces an integer phi of addresses with a pointer phi. Returns the new
/// phi.
fn sink_phi(module: &mut Module, func: FuncRef, phi: InstId) -> Option<ValueId> {
    let function = &module.funcs[func];
    let dfg = &function.dfg;
    let old = dfg.inst_result(phi)?;
    let incoming: Vec<_> = dfg
        .inst(phi)
        .phi_args()
        .into_iter()
        .flatten()
        .filter_map(|(value, block)| Some((dfg.cast_of(value)?.1, block)))
        .collect();

    let types = &module.types;
    let down_ty = downstream_type(dfg, old).filter(|&ty| types.is_ptr(ty));
    let last_ty = incoming.last().map(|&(ptr, _)| dfg.value_ty(ptr));
    let ptr_ty = down_ty.or(last_ty)?;
    let int_ty = dfg.value_ty(old);
    let block = function.layout.inst_block(phi);

    let function = &mut module.funcs[func];
    let mut data = InstData::phi(ptr_ty);
    for (ptr, pred) in incoming {
        let ptr = if function.dfg.value_ty(ptr) == ptr_ty {
            ptr
        } else {
            let term = function.layout.last_inst_of(pred)?;
            let cast = InstData::cast(CastOp::Bitcast, ptr, ptr_ty);
            insert_before(function, term, cast, ptr_ty)
        };
        data.append_phi_arg(ptr, pred);
    }

    let new_phi = function.dfg.make_inst(data);
    function.layout.prepend_inst(new_phi, block);
    let new_ptr = function.dfg.make_result(new_phi, ptr_ty);

    let dfg = &function.dfg;
    let first_non_phi = function
        .layout
        .first_non_phi_of(block, |inst| dfg.is_phi(inst))?;
    let cast = InstData::cast(CastOp::PtrToInt, new_ptr, int_ty);
    let int = insert_before(function, first_non_phi, cast, int_ty);
    function.dfg.change_to_alias(old, int);
    function.dfg.untrack_inst(phi);
    function.layout.remove_inst(phi);

    Some(new_ptr)
}

/// Removes casts, arithmetic, `gep`s and phis whose results are unused,
/// including the operands that become unused in turn. Returns the number of
/// removed instructions.
fn remove_dead_insts(function: &mut Function) -> usize {
    let mut worklist: Vec<InstId> = function
        .layout
        .iter_block()
        .flat_map(|block| function.layout.iter_inst(block))
        .collect();

    let mut removed = 0;
    while let Some(inst) = worklist.pop() {
        if !function.layout.is_inst_inserted(inst) || !is_dead(function, inst) {
            continue;
        }
        let args = SmallVec::<[ValueId; 8]>::from_slice(function.dfg.inst(inst).args());
        function.dfg.untrack_inst(inst);
        function.layout.remove_inst(inst);
        removed += 1;
        worklist.extend(args.into_iter().filter_map(|arg| function.dfg.value_inst(arg)));
    }
    removed
}

fn is_dead(function: &Function, inst: InstId) -> bool {
    let dfg = &function.dfg;
    let pure = matches!(
        dfg.inst(inst),
        InstData::Cast { .. }
            | InstData::Unary { .. }
            | InstData::Binary { .. }
            | InstData::Gep { .. }
            | InstData::Phi { .. }
    );
    pure && dfg
        .inst_result(inst)
        .is_some_and(|result| dfg.users_num(result) == 0)
}

#[cfg(test)]
mod tests {
    use relift_ir::builder::test_util::*;

    use super::*;

    #[test]
    fn folds_struct_and_array_displacement() {
        let mut mb = TestModuleBuilder::new();
        let arr = mb.module_builder.declare_array_type(Type::I16, 4);
        let rec = mb
            .module_builder
            .declare_struct_type("rec", &[Type::I64, arr], false);
        let ptr_rec = mb.module_builder.ptr_type(rec);

        let mut builder = mb.func_builder(&[ptr_rec], Type::I16);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let p = builder.args()[0];
        let int = builder.ptr_to_int(p, Type::I64);
        let disp = builder.make_imm_value(44i64);
        let sum = builder.add(int, disp);
        let ptr_i16 = builder.ptr_type(Type::I16);
        let q = builder.int_to_ptr(sum, ptr_i16);
        let v = builder.load(q, Type::I16);
        builder.ret(Some(v));
        let func = builder.func_ref();
        builder.finish();

        let mut module = mb.build();
        let mut rewriter = PtrArithRewriter::new(8);
        rewriter.insert(func, p);
        assert_eq!(rewriter.run(&mut module), 1);
        assert_eq!(rewriter.run(&mut module), 0);

        // 44 is the third element of the array in `rec[2]`.
        assert_eq!(
            dump_func(&module, func),
            "func public %test_func(v0.*@rec) -> i16 {
    block0:
        v8.*i16 = gep v0 2.i64 1.i64 2.i64;
        v9.i64 = ptrtoint v8;
        v4.*i16 = inttoptr v9;
        v5.i16 = load v4;
        return v5;
}
"
        );
    }

    #[test]
    fn remainder_through_downstream_type() {
        let mut mb = TestModuleBuilder::new();
        let pair = mb
            .module_builder
            .declare_struct_type("pair", &[Type::I32, Type::I32], false);
        let ptr_pair = mb.module_builder.ptr_type(pair);

        let mut builder = mb.func_builder(&[ptr_pair], Type::Unit);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let p = builder.args()[0];
        let int = builder.ptr_to_int(p, Type::I64);
        let disp = builder.make_imm_value(6i64);
        let sum = builder.add(int, disp);
        let ptr_i16 = builder.ptr_type(Type::I16);
        let q = builder.int_to_ptr(sum, ptr_i16);
        let zero = builder.make_imm_value(0i16);
        builder.store(q, zero);
        builder.ret(None);
        let func = builder.func_ref();
        builder.finish();

        let mut module = mb.build();
        let mut rewriter = PtrArithRewriter::new(8);
        rewriter.insert(func, p);
        assert_eq!(rewriter.run(&mut module), 1);

        assert_eq!(
            dump_func(&module, func),
            "func public %test_func(v0.*@pair) -> unit {
    block0:
        v8.*i32 = gep v0 0.i64 1.i64;
        v9.*i16 = bitcast v8;
        v10.*i16 = gep v9 1.i64;
        v11.i64 = ptrtoint v10;
        v4.*i16 = inttoptr v11;
        store v4 0.i16;
        return;
}
"
        );
    }

    #[test]
    fn sinks_address_phi() {
        let mut mb = TestModuleBuilder::new();
        let ptr_i32 = mb.module_builder.ptr_type(Type::I32);
        let ptr_i8 = mb.module_builder.ptr_type(Type::I8);

        let mut builder = mb.func_builder(&[Type::I1, ptr_i32, ptr_i8], Type::I32);
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
        let q = builder.int_to_ptr(phi, ptr_i32);
        let v = builder.load(q, Type::I32);
        builder.ret(Some(v));
        let func = builder.func_ref();
        builder.finish();

        let mut module = mb.build();
        let mut rewriter = PtrArithRewriter::new(8);
        rewriter.insert(func, a);
        assert_eq!(rewriter.run(&mut module), 1);
        assert_eq!(rewriter.frontier_len(), 2);

        assert_eq!(
            dump_func(&module, func),
            "func public %test_func(v0.i1, v1.*i32, v2.*i8) -> i32 {
    block0:
        br v0 block1 block2;

    block1:
        v8.*i32 = bitcast v2;
        jump block2;

    block2:
        v9.*i32 = phi (v1 block0) (v8 block1);
        v10.i64 = ptrtoint v9;
        v6.*i32 = inttoptr v10;
        v7.i32 = load v6;
        return v7;
}
"
        );
    }
}
