use crate::{BlockId, Function, InstData, InstId, Type, ValueId};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorLocation {
    At(InstId),
    BlockTop(BlockId),
    BlockBottom(BlockId),
    #[default]
    NoWhere,
}

pub trait FuncCursor {
    fn at_location(loc: CursorLocation) -> Self;
    fn set_location(&mut self, loc: CursorLocation);
    fn loc(&self) -> CursorLocation;

    /// Inserts `inst` at the cursor. `At` inserts after the pointed
    /// instruction, `BlockTop` prepends and `BlockBottom` appends.
    fn insert_inst(&mut self, func: &mut Function, inst: InstId) {
        match self.loc() {
            CursorLocation::At(at) => func.layout.insert_inst_after(inst, at),
            CursorLocation::BlockTop(block) => func.layout.prepend_inst(inst, block),
            CursorLocation::BlockBottom(block) => func.layout.append_inst(inst, block),
            CursorLocation::NoWhere => panic!("cursor loc points to `NoWhere`"),
        }
    }

    fn insert_inst_data(&mut self, func: &mut Function, data: InstData) -> InstId {
        let inst = func.dfg.make_inst(data);
        self.insert_inst(func, inst);
        inst
    }

    /// Inserts `data` at the cursor, attaches a result of `ty` and moves the
    /// cursor to the new instruction.
    fn insert_inst_with_result(&mut self, func: &mut Function, data: InstData, ty: Type) -> ValueId {
        let inst = self.insert_inst_data(func, data);
        self.set_location(CursorLocation::At(inst));
        func.dfg.make_result(inst, ty)
    }

    fn make_block(&mut self, func: &mut Function) -> BlockId {
        func.dfg.make_block()
    }

    fn append_block(&mut self, func: &mut Function, block: BlockId) {
        func.layout.append_block(block);
    }

    fn inst(&self) -> Option<InstId> {
        if let CursorLocation::At(inst) = self.loc() {
            Some(inst)
        } else {
            None
        }
    }

    fn expect_inst(&self) -> InstId {
        self.inst()
            .expect("current cursor location doesn't point to inst")
    }
}

#[derive(Debug)]
pub struct InstInserter {
    loc: CursorLocation,
}

impl FuncCursor for InstInserter {
    fn at_location(loc: CursorLocation) -> Self {
        Self { loc }
    }

    fn set_location(&mut self, loc: CursorLocation) {
        self.loc = loc;
    }

    fn loc(&self) -> CursorLocation {
        self.loc
    }
}

/// Places instructions before a fixed instruction, keeping their relative
/// order. Used to materialize values right before their user.
pub fn insert_before(func: &mut Function, before: InstId, data: InstData, ty: Type) -> ValueId {
    let inst = func.dfg.make_inst(data);
    func.layout.insert_inst_before(inst, before);
    func.dfg.make_result(inst, ty)
}
