//! Placement of values that must dominate every use in a function.
use relift_ir::{
    func_cursor::{CursorLocation, FuncCursor, InstInserter},
    module::FuncRef,
    InstData, InstId, Module, Type, ValueId,
};
use rustc_hash::FxHashMap;

use crate::error::RecoveryError;

/// Inserts instructions at the top of entry blocks, keeping them in the order
/// they were inserted.
#[derive(Debug, Default)]
pub struct EntryInserter {
    last: FxHashMap<FuncRef, InstId>,
}

impl EntryInserter {
    pub fn insert(
        &mut self,
        module: &mut Module,
        func: FuncRef,
        data: InstData,
        ty: Type,
    ) -> Result<ValueId, RecoveryError> {
        let function = &mut module.funcs[func];
        let loc = match self.last.get(&func) {
            Some(&inst) => CursorLocation::At(inst),
            None => match function.layout.entry_block() {
                Some(entry) => CursorLocation::BlockTop(entry),
                None => return Err(RecoveryError::MissingBody(function.sig.name().to_string())),
            },
        };

        let mut cursor = InstInserter::at_location(loc);
        let value = cursor.insert_inst_with_result(function, data, ty);
        self.last.insert(func, cursor.expect_inst());
        Ok(value)
    }
}

/// Makes a pointer-sized integer constant.
pub fn offset_value(module: &mut Module, func: FuncRef, offset: i64) -> ValueId {
    let dfg = &mut module.funcs[func].dfg;
    if module.isa.data_layout().pointer_bytes() == 4 {
        dfg.make_imm_value(offset as i32)
    } else {
        dfg.make_imm_value(offset)
    }
}

#[cfg(test)]
mod tests {
    use relift_ir::{builder::test_util::*, BinaryOp};

    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let mut mb = TestModuleBuilder::new();
        let mut builder = mb.func_builder(&[], Type::I64);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let one = builder.make_imm_value(1i64);
        builder.ret(Some(one));
        let func = builder.func_ref();
        builder.finish();

        let mut module = mb.build();
        let mut entry = EntryInserter::default();
        let two = offset_value(&mut module, func, 2);
        let a = entry
            .insert(&mut module, func, InstData::binary(BinaryOp::Add, one, two), Type::I64)
            .unwrap();
        entry
            .insert(&mut module, func, InstData::binary(BinaryOp::Mul, a, a), Type::I64)
            .unwrap();

        assert_eq!(
            dump_func(&module, func),
            "func public %test_func() -> i64 {
    block0:
        v2.i64 = add 1.i64 2.i64;
        v3.i64 = mul v2 v2;
        return 1.i64;
}
"
        );
    }

    #[test]
    fn declaration_has_no_entry() {
        let mut mb = TestModuleBuilder::new();
        let func = mb.declare("ext", &[], Type::Unit);
        let mut module = mb.build();
        let one = offset_value(&mut module, func, 1);

        let err = EntryInserter::default()
            .insert(&mut module, func, InstData::binary(BinaryOp::Add, one, one), Type::I64)
            .unwrap_err();
        assert_eq!(err, RecoveryError::MissingBody("ext".to_string()));
    }
}
