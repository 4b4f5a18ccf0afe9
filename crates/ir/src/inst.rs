//! This module contains IR instructions definitions.
use std::fmt;

use smallvec::SmallVec;

use crate::{module::FuncRef, BlockId, Type, ValueId};

/// An opaque reference to [`InstData`]
#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);
cranelift_entity::entity_impl!(InstId);

/// An instruction data definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstData {
    /// Unary instructions.
    Unary { code: UnaryOp, args: [ValueId; 1] },

    /// Binary instructions.
    Binary { code: BinaryOp, args: [ValueId; 2] },

    /// Cast operations.
    Cast {
        code: CastOp,
        args: [ValueId; 1],
        ty: Type,
    },

    /// Load a value from memory.
    Load { args: [ValueId; 1], ty: Type },

    /// Store a value to memory. `args` are `[addr, value]`.
    Store { args: [ValueId; 2] },

    /// Allocate a stack slot of `ty`.
    Alloca { ty: Type },

    /// Compute an address from a base pointer and an index path.
    /// `args[0]` is the base pointer.
    Gep { args: SmallVec<[ValueId; 8]> },

    /// Call a function.
    Call {
        func: FuncRef,
        args: SmallVec<[ValueId; 8]>,
        ret_ty: Type,
    },

    /// Unconditional jump instruction.
    Jump { dests: [BlockId; 1] },

    /// Conditional jump instruction.
    Branch {
        args: [ValueId; 1],
        dests: [BlockId; 2],
    },

    /// Return.
    Return { args: Option<ValueId> },

    /// Phi function.
    Phi {
        values: SmallVec<[ValueId; 8]>,
        blocks: SmallVec<[BlockId; 8]>,
        ty: Type,
    },
}

impl InstData {
    pub fn binary(code: BinaryOp, lhs: ValueId, rhs: ValueId) -> Self {
        Self::Binary {
            code,
            args: [lhs, rhs],
        }
    }

    pub fn cast(code: CastOp, arg: ValueId, ty: Type) -> Self {
        Self::Cast {
            code,
            args: [arg],
            ty,
        }
    }

    pub fn load(addr: ValueId, ty: Type) -> Self {
        Self::Load { args: [addr], ty }
    }

    pub fn store(addr: ValueId, value: ValueId) -> Self {
        Self::Store {
            args: [addr, value],
        }
    }

    pub fn gep(args: &[ValueId]) -> Self {
        Self::Gep { args: args.into() }
    }

    pub fn call(func: FuncRef, args: &[ValueId], ret_ty: Type) -> Self {
        Self::Call {
            func,
            args: args.into(),
            ret_ty,
        }
    }

    pub fn jump(dest: BlockId) -> Self {
        Self::Jump { dests: [dest] }
    }

    pub fn phi(ty: Type) -> Self {
        Self::Phi {
            values: SmallVec::new(),
            blocks: SmallVec::new(),
            ty,
        }
    }

    pub fn args(&self) -> &[ValueId] {
        match self {
            Self::Binary { args, .. } | Self::Store { args, .. } => args,
            Self::Unary { args, .. }
            | Self::Cast { args, .. }
            | Self::Load { args, .. }
            | Self::Branch { args, .. } => args,
            Self::Gep { args } | Self::Call { args, .. } | Self::Phi { values: args, .. } => args,
            Self::Return { args } => args.as_slice(),
            Self::Alloca { .. } | Self::Jump { .. } => &[],
        }
    }

    pub fn args_mut(&mut self) -> &mut [ValueId] {
        match self {
            Self::Binary { args, .. } | Self::Store { args, .. } => args,
            Self::Unary { args, .. }
            | Self::Cast { args, .. }
            | Self::Load { args, .. }
            | Self::Branch { args, .. } => args,
            Self::Gep { args } | Self::Call { args, .. } | Self::Phi { values: args, .. } => args,
            Self::Return { args } => args.as_mut_slice(),
            Self::Alloca { .. } | Self::Jump { .. } => &mut [],
        }
    }

    /// Replaces every occurrence of `from` with `to`. Returns `true` if any
    /// operand changed.
    pub fn replace_value(&mut self, from: ValueId, to: ValueId) -> bool {
        let mut changed = false;
        for arg in self.args_mut() {
            if *arg == from {
                *arg = to;
                changed = true;
            }
        }
        changed
    }

    pub fn append_phi_arg(&mut self, value: ValueId, block: BlockId) {
        match self {
            Self::Phi { values, blocks, .. } => {
                values.push(value);
                blocks.push(block)
            }
            _ => panic!("Expects `InstData::Phi` but got `{:?}`", self),
        }
    }

    /// Returns the incoming `(value, block)` pairs of a phi.
    pub fn phi_args(&self) -> Option<impl Iterator<Item = (ValueId, BlockId)> + '_> {
        match self {
            Self::Phi { values, blocks, .. } => {
                Some(values.iter().copied().zip(blocks.iter().copied()))
            }
            _ => None,
        }
    }

    pub fn dests(&self) -> &[BlockId] {
        match self {
            Self::Jump { dests } => dests,
            Self::Branch { dests, .. } => dests,
            _ => &[],
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. } | Self::Branch { .. } | Self::Return { .. }
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi { .. })
    }

    pub fn cast_code(&self) -> Option<CastOp> {
        match self {
            Self::Cast { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn callee(&self) -> Option<FuncRef> {
        match self {
            Self::Call { func, .. } => Some(*func),
            _ => None,
        }
    }
}

/// Unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Not => "not",
            Self::Neg => "neg",
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Udiv,
    Sdiv,
    Shl,
    Lshr,
    Eq,
    Ne,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Udiv => "udiv",
            Self::Sdiv => "sdiv",
            Self::Shl => "shl",
            Self::Lshr => "lshr",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Sext,
    Zext,
    Trunc,
    Bitcast,
    IntToPtr,
    PtrToInt,
    FpTrunc,
    FpExt,
}

impl CastOp {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Sext => "sext",
            Self::Zext => "zext",
            Self::Trunc => "trunc",
            Self::Bitcast => "bitcast",
            Self::IntToPtr => "inttoptr",
            Self::PtrToInt => "ptrtoint",
            Self::FpTrunc => "fptrunc",
            Self::FpExt => "fpext",
        }
    }
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
