//! The view of the original program that recovery consults.
use std::collections::BTreeMap;

use relift_abi::{FunctionDecl, GlobalVarDecl};

/// What a byte of the original program's address space holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteKind {
    Stack,
    Global,
    Code,
    Unknown,
}

pub trait Program {
    fn find_byte(&self, addr: u64) -> ByteKind;

    /// Value of the stack pointer on entry to every function.
    fn initial_stack_pointer(&self) -> Option<u64>;

    fn for_each_function(&self, f: &mut dyn FnMut(&FunctionDecl));

    fn for_each_variable(&self, f: &mut dyn FnMut(&GlobalVarDecl));
}

/// A [`Program`] made of address ranges and declaration lists.
#[derive(Debug, Default)]
pub struct AddressSpace {
    /// Range start to `(end, kind)`. Ranges never overlap.
    ranges: BTreeMap<u64, (u64, ByteKind)>,
    initial_stack_pointer: Option<u64>,
    functions: Vec<FunctionDecl>,
    variables: Vec<GlobalVarDecl>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `[start, start + len)` as `kind`. The range is clipped at the
    /// top of the address space.
    ///
    /// # Panic
    /// Panics if the range overlaps an already mapped one.
    pub fn map(&mut self, start: u64, len: u64, kind: ByteKind) {
        let end = start.saturating_add(len);
        if let Some((&prev_start, &(prev_end, _))) = self.ranges.range(..end).next_back() {
            assert!(
                prev_end <= start,
                "range {start:#x}..{end:#x} overlaps {prev_start:#x}..{prev_end:#x}"
            );
        }
        self.ranges.insert(start, (end, kind));
    }

    pub fn set_initial_stack_pointer(&mut self, sp: u64) {
        self.initial_stack_pointer = Some(sp);
    }

    pub fn add_function(&mut self, decl: FunctionDecl) {
        self.functions.push(decl);
    }

    pub fn add_variable(&mut self, decl: GlobalVarDecl) {
        self.variables.push(decl);
    }
}

impl Program for AddressSpace {
    fn find_byte(&self, addr: u64) -> ByteKind {
        match self.ranges.range(..=addr).next_back() {
            Some((_, &(end, kind))) if addr < end => kind,
            _ => ByteKind::Unknown,
        }
    }

    fn initial_stack_pointer(&self) -> Option<u64> {
        self.initial_stack_pointer
    }

    fn for_each_function(&self, f: &mut dyn FnMut(&FunctionDecl)) {
        self.functions.iter().for_each(f);
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&GlobalVarDecl)) {
        self.variables.iter().for_each(f);
    }
}

#[cfg(test)]
mod tests {
    use relift_ir::Type;

    use super::*;

    #[test]
    fn classify_bytes() {
        let mut space = AddressSpace::new();
        space.map(0x1000, 0x100, ByteKind::Code);
        space.map(0x2000, 0x10, ByteKind::Global);
        space.map(0x8000, 0x1000, ByteKind::Stack);

        assert_eq!(space.find_byte(0x1000), ByteKind::Code);
        assert_eq!(space.find_byte(0x10ff), ByteKind::Code);
        assert_eq!(space.find_byte(0x1100), ByteKind::Unknown);
        assert_eq!(space.find_byte(0x200f), ByteKind::Global);
        assert_eq!(space.find_byte(0x8800), ByteKind::Stack);
        assert_eq!(space.find_byte(0), ByteKind::Unknown);
    }

    #[test]
    #[should_panic]
    fn overlapping_ranges() {
        let mut space = AddressSpace::new();
        space.map(0x1000, 0x100, ByteKind::Code);
        space.map(0x10f0, 0x100, ByteKind::Global);
    }

    #[test]
    fn declarations() {
        let mut space = AddressSpace::new();
        space.add_variable(GlobalVarDecl::new("a", Type::I32, 0x10));
        space.add_variable(GlobalVarDecl::new("b", Type::I64, 0x20));

        let mut names = vec![];
        space.for_each_variable(&mut |decl| names.push(decl.name.clone()));
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(space.initial_stack_pointer(), None);
    }
}
