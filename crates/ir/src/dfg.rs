//! This module contains the IR data flow graph.
use std::collections::BTreeSet;

use cranelift_entity::{entity_impl, packed_option::PackedOption, PrimaryMap, SecondaryMap};
use rustc_hash::FxHashMap;

use crate::{
    inst::{CastOp, InstData, InstId},
    module::FuncRef,
    ConstExpr, GlobalVariable, Immediate, Type, Value, ValueId,
};

#[derive(Debug, Default)]
pub struct DataFlowGraph {
    #[doc(hidden)]
    pub blocks: PrimaryMap<BlockId, Block>,
    #[doc(hidden)]
    pub values: PrimaryMap<ValueId, Value>,
    insts: PrimaryMap<InstId, InstData>,
    inst_results: SecondaryMap<InstId, PackedOption<ValueId>>,
    #[doc(hidden)]
    pub immediates: FxHashMap<Immediate, ValueId>,
    globals: FxHashMap<GlobalVariable, ValueId>,
    funcs: FxHashMap<FuncRef, ValueId>,
    users: SecondaryMap<ValueId, BTreeSet<InstId>>,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_block(&mut self) -> BlockId {
        self.blocks.push(Block::new())
    }

    pub fn make_value(&mut self, value: Value) -> ValueId {
        self.values.push(value)
    }

    pub fn make_inst(&mut self, data: InstData) -> InstId {
        let inst_id = self.insts.push(data);
        self.attach_user(inst_id);
        inst_id
    }

    pub fn make_imm_value<Imm>(&mut self, imm: Imm) -> ValueId
    where
        Imm: Into<Immediate>,
    {
        let imm: Immediate = imm.into();
        if let Some(&value) = self.immediates.get(&imm) {
            return value;
        }

        let ty = imm.ty();
        let value_data = Value::Immediate { imm, ty };
        let value = self.make_value(value_data);
        self.immediates.insert(imm, value);
        value
    }

    /// Returns the value that refers to the address of `gv`. `ty` must be
    /// the pointer type of the variable.
    pub fn make_global_value(&mut self, gv: GlobalVariable, ty: Type) -> ValueId {
        if let Some(&value) = self.globals.get(&gv) {
            return value;
        }

        let value = self.make_value(Value::Global { gv, ty });
        self.globals.insert(gv, value);
        value
    }

    /// Returns the address value of `gv` if one was made in this graph.
    pub fn global_value_of(&self, gv: GlobalVariable) -> Option<ValueId> {
        self.globals.get(&gv).copied()
    }

    /// Returns the value that refers to the address of `func`.
    pub fn make_func_value(&mut self, func: FuncRef, ty: Type) -> ValueId {
        if let Some(&value) = self.funcs.get(&func) {
            return value;
        }

        let value = self.make_value(Value::Func { func, ty });
        self.funcs.insert(func, value);
        value
    }

    pub fn make_expr_value(&mut self, expr: ConstExpr, ty: Type) -> ValueId {
        self.make_value(Value::Expr { expr, ty })
    }

    pub fn make_arg_value(&mut self, ty: Type, idx: usize) -> ValueId {
        self.make_value(Value::Arg { ty, idx })
    }

    /// Makes the result value of `inst_id` and attaches it.
    pub fn make_result(&mut self, inst_id: InstId, ty: Type) -> ValueId {
        let value = self.make_value(Value::Inst { inst: inst_id, ty });
        self.attach_result(inst_id, value);
        value
    }

    pub fn replace_inst(&mut self, inst_id: InstId, new: InstData) {
        self.untrack_inst(inst_id);
        self.insts[inst_id] = new;
        self.attach_user(inst_id);
    }

    pub fn attach_result(&mut self, inst_id: InstId, value_id: ValueId) {
        debug_assert!(self.inst_results[inst_id].is_none());
        self.inst_results[inst_id] = value_id.into();
    }

    pub fn inst(&self, inst_id: InstId) -> &InstData {
        &self.insts[inst_id]
    }

    pub fn value(&self, value_id: ValueId) -> &Value {
        &self.values[value_id]
    }

    pub fn value_ty(&self, value_id: ValueId) -> Type {
        self.values[value_id].ty()
    }

    /// Changes the type recorded for a global address value.
    pub fn retype_global_value(&mut self, gv: GlobalVariable, ty: Type) {
        if let Some(&value) = self.globals.get(&gv) {
            self.values[value] = Value::Global { gv, ty };
        }
    }

    pub fn value_imm(&self, value_id: ValueId) -> Option<Immediate> {
        match self.values[value_id] {
            Value::Immediate { imm, .. } => Some(imm),
            _ => None,
        }
    }

    pub fn is_imm(&self, value_id: ValueId) -> bool {
        self.values[value_id].is_imm()
    }

    pub fn value_inst(&self, value_id: ValueId) -> Option<InstId> {
        match self.values[value_id] {
            Value::Inst { inst, .. } => Some(inst),
            _ => None,
        }
    }

    /// Returns the cast code and operand if `value_id` is produced by a cast.
    pub fn cast_of(&self, value_id: ValueId) -> Option<(CastOp, ValueId)> {
        let inst = self.value_inst(value_id)?;
        match self.inst(inst) {
            InstData::Cast { code, args, .. } => Some((*code, args[0])),
            _ => None,
        }
    }

    pub fn attach_user(&mut self, inst_id: InstId) {
        let inst = &self.insts[inst_id];
        for &value in inst.args() {
            self.users[value].insert(inst_id);
        }
    }

    pub fn untrack_inst(&mut self, inst_id: InstId) {
        let inst = &self.insts[inst_id];
        for &value in inst.args() {
            self.users[value].remove(&inst_id);
        }
    }

    /// Returns the all instructions that use the `value_id`.
    pub fn users(&self, value_id: ValueId) -> impl Iterator<Item = &InstId> {
        self.users[value_id].iter()
    }

    /// Returns the number of instructions that use the `value_id`.
    pub fn users_num(&self, value_id: ValueId) -> usize {
        self.users[value_id].len()
    }

    pub fn inst_result(&self, inst_id: InstId) -> Option<ValueId> {
        self.inst_results[inst_id].expand()
    }

    pub fn is_terminator(&self, inst: InstId) -> bool {
        self.inst(inst).is_terminator()
    }

    pub fn is_phi(&self, inst: InstId) -> bool {
        self.inst(inst).is_phi()
    }

    pub fn append_phi_arg(&mut self, inst_id: InstId, value: ValueId, block: BlockId) {
        self.insts[inst_id].append_phi_arg(value, block);
        self.users[value].insert(inst_id);
    }

    /// Replaces operands of `inst_id` that are `from` with `to`.
    pub fn replace_inst_value(&mut self, inst_id: InstId, from: ValueId, to: ValueId) {
        if self.insts[inst_id].replace_value(from, to) {
            self.users[from].remove(&inst_id);
            self.users[to].insert(inst_id);
        }
    }

    /// Replaces all uses of `value` with `alias`.
    pub fn change_to_alias(&mut self, value: ValueId, alias: ValueId) {
        let mut users = std::mem::take(&mut self.users[value]);
        for inst in &users {
            self.insts[*inst].replace_value(value, alias);
        }
        self.users[alias].append(&mut users);
    }
}

/// An opaque reference to [`Block`]
#[derive(Clone, PartialEq, Eq, Copy, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);
entity_impl!(BlockId, "block");

/// A block data definition.
/// A Block data doesn't hold any information for layout of a program. It is managed by
/// [`super::layout::Layout`].
#[derive(Debug, Clone, Default)]
pub struct Block {}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::BinaryOp;

    #[test]
    fn users_follow_operand_changes() {
        let mut dfg = DataFlowGraph::new();
        let v0 = dfg.make_imm_value(1i64);
        let v1 = dfg.make_imm_value(2i64);
        let v2 = dfg.make_imm_value(3i64);

        let add = dfg.make_inst(InstData::binary(BinaryOp::Add, v0, v1));
        let sub = dfg.make_inst(InstData::binary(BinaryOp::Sub, v0, v0));
        assert_eq!(dfg.users_num(v0), 2);
        assert_eq!(dfg.users_num(v1), 1);

        dfg.replace_inst_value(add, v1, v2);
        assert_eq!(dfg.users_num(v1), 0);
        assert_eq!(dfg.users(v2).copied().collect::<Vec<_>>(), vec![add]);

        dfg.change_to_alias(v0, v2);
        assert_eq!(dfg.users_num(v0), 0);
        assert_eq!(dfg.users_num(v2), 2);
        assert_eq!(dfg.inst(sub).args(), &[v2, v2]);

        dfg.untrack_inst(sub);
        assert_eq!(dfg.users(v2).copied().collect::<Vec<_>>(), vec![add]);
    }

    #[test]
    fn immediates_are_interned() {
        let mut dfg = DataFlowGraph::new();
        let v0 = dfg.make_imm_value(7i32);
        let v1 = dfg.make_imm_value(7i32);
        let v2 = dfg.make_imm_value(7i64);
        assert_eq!(v0, v1);
        assert_ne!(v0, v2);
        assert_eq!(dfg.value_imm(v2), Some(Immediate::I64(7)));
    }
}
