//! Block order and instruction order of a function, kept as doubly linked
//! lists threaded through secondary maps.
use cranelift_entity::SecondaryMap;

use super::{BlockId, InstId};

#[derive(Debug, Clone, Default)]
pub struct Layout {
    blocks: SecondaryMap<BlockId, BlockNode>,
    insts: SecondaryMap<InstId, InstNode>,
    entry_block: Option<BlockId>,
    last_block: Option<BlockId>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.entry_block
    }

    pub fn is_block_inserted(&self, block: BlockId) -> bool {
        self.blocks[block].inserted
    }

    pub fn is_inst_inserted(&self, inst: InstId) -> bool {
        self.insts[inst].block.is_some()
    }

    pub fn last_inst_of(&self, block: BlockId) -> Option<InstId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].last_inst
    }

    /// # Panic
    /// Panics if `inst` is not inserted in the layout.
    pub fn inst_block(&self, inst: InstId) -> BlockId {
        match self.insts[inst].block {
            Some(block) => block,
            None => panic!("{inst:?} is not inserted in the layout"),
        }
    }

    pub fn iter_block(&self) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.entry_block, |&block| self.blocks[block].next)
    }

    pub fn iter_inst(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        debug_assert!(self.is_block_inserted(block));
        std::iter::successors(self.blocks[block].first_inst, |&inst| self.insts[inst].next)
    }

    /// Returns the first instruction of `block` that isn't a phi, given a
    /// predicate telling phis apart.
    pub fn first_non_phi_of(
        &self,
        block: BlockId,
        is_phi: impl Fn(InstId) -> bool,
    ) -> Option<InstId> {
        self.iter_inst(block).find(|&inst| !is_phi(inst))
    }

    pub fn append_block(&mut self, block: BlockId) {
        debug_assert!(!self.is_block_inserted(block));

        self.blocks[block] = BlockNode {
            prev: self.last_block,
            inserted: true,
            ..BlockNode::default()
        };
        match self.last_block {
            Some(last) => self.blocks[last].next = Some(block),
            None => self.entry_block = Some(block),
        }
        self.last_block = Some(block);
    }

    pub fn append_inst(&mut self, inst: InstId, block: BlockId) {
        let last = self.blocks[block].last_inst;
        self.link(inst, block, last, None);
    }

    pub fn prepend_inst(&mut self, inst: InstId, block: BlockId) {
        let first = self.blocks[block].first_inst;
        self.link(inst, block, None, first);
    }

    pub fn insert_inst_before(&mut self, inst: InstId, before: InstId) {
        let block = self.inst_block(before);
        let prev = self.insts[before].prev;
        self.link(inst, block, prev, Some(before));
    }

    pub fn insert_inst_after(&mut self, inst: InstId, after: InstId) {
        let block = self.inst_block(after);
        let next = self.insts[after].next;
        self.link(inst, block, Some(after), next);
    }

    pub fn remove_inst(&mut self, inst: InstId) {
        let block = self.inst_block(inst);
        let InstNode { prev, next, .. } = std::mem::take(&mut self.insts[inst]);
        match prev {
            Some(prev) => self.insts[prev].next = next,
            None => self.blocks[block].first_inst = next,
        }
        match next {
            Some(next) => self.insts[next].prev = prev,
            None => self.blocks[block].last_inst = prev,
        }
    }

    /// Links `inst` into `block` between the adjacent `prev` and `next`.
    fn link(&mut self, inst: InstId, block: BlockId, prev: Option<InstId>, next: Option<InstId>) {
        debug_assert!(self.is_block_inserted(block));
        debug_assert!(!self.is_inst_inserted(inst));

        match prev {
            Some(prev) => self.insts[prev].next = Some(inst),
            None => self.blocks[block].first_inst = Some(inst),
        }
        match next {
            Some(next) => self.insts[next].prev = Some(inst),
            None => self.blocks[block].last_inst = Some(inst),
        }
        self.insts[inst] = InstNode {
            block: Some(block),
            prev,
            next,
        };
    }
}

#[derive(Default, Debug, Clone)]
struct BlockNode {
    prev: Option<BlockId>,
    next: Option<BlockId>,
    first_inst: Option<InstId>,
    last_inst: Option<InstId>,
    inserted: bool,
}

#[derive(Default, Debug, Clone)]
struct InstNode {
    /// `None` while the instruction is detached.
    block: Option<BlockId>,
    prev: Option<InstId>,
    next: Option<InstId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dfg::DataFlowGraph, inst::InstData};

    fn ret(dfg: &mut DataFlowGraph) -> InstId {
        dfg.make_inst(InstData::Return { args: None })
    }

    #[test]
    fn blocks_in_append_order() {
        let mut layout = Layout::new();
        let mut dfg = DataFlowGraph::new();
        assert_eq!(layout.entry_block(), None);

        let blocks: Vec<_> = (0..3).map(|_| dfg.make_block()).collect();
        for &block in &blocks {
            layout.append_block(block);
        }
        assert_eq!(layout.entry_block(), Some(blocks[0]));
        assert_eq!(layout.iter_block().collect::<Vec<_>>(), blocks);
    }

    #[test]
    fn link_and_unlink() {
        let mut layout = Layout::new();
        let mut dfg = DataFlowGraph::new();
        let b0 = dfg.make_block();
        let b1 = dfg.make_block();
        layout.append_block(b0);
        layout.append_block(b1);

        let [a, b, c, d, e] = [(); 5].map(|_| ret(&mut dfg));
        layout.append_inst(b, b0);
        layout.prepend_inst(a, b0);
        layout.insert_inst_after(d, b);
        layout.insert_inst_before(c, d);
        layout.append_inst(e, b1);
        assert_eq!(layout.iter_inst(b0).collect::<Vec<_>>(), vec![a, b, c, d]);
        assert_eq!(layout.inst_block(c), b0);
        assert_eq!(layout.inst_block(e), b1);

        layout.remove_inst(a);
        layout.remove_inst(d);
        assert_eq!(layout.iter_inst(b0).collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(layout.last_inst_of(b0), Some(c));
        assert!(!layout.is_inst_inserted(a));

        // A removed instruction can be linked again.
        layout.prepend_inst(d, b0);
        assert_eq!(layout.iter_inst(b0).collect::<Vec<_>>(), vec![d, b, c]);

        layout.remove_inst(e);
        assert_eq!(layout.iter_inst(b1).next(), None);
        assert_eq!(layout.last_inst_of(b1), None);
    }
}
