//! This module contains the IR value definition.
use std::fmt;

use crate::{
    inst::{BinaryOp, CastOp, InstId},
    module::FuncRef,
    GlobalVariable, Type,
};

/// An opaque reference to [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Copy, Hash)]
pub struct ValueId(pub u32);
cranelift_entity::entity_impl!(ValueId);

/// An value data definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// The value is defined by an instruction.
    Inst { inst: InstId, ty: Type },

    /// The value is a function argument.
    Arg { ty: Type, idx: usize },

    /// The value is immediate value.
    Immediate { imm: Immediate, ty: Type },

    /// The value is the address of a global variable.
    Global { gv: GlobalVariable, ty: Type },

    /// The value is the address of a function.
    Func { func: FuncRef, ty: Type },

    /// The value is a constant expression embedded in an operand.
    Expr { expr: ConstExpr, ty: Type },
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Self::Inst { ty, .. }
            | Self::Arg { ty, .. }
            | Self::Immediate { ty, .. }
            | Self::Global { ty, .. }
            | Self::Func { ty, .. }
            | Self::Expr { ty, .. } => *ty,
        }
    }

    pub fn is_imm(&self) -> bool {
        matches!(self, Self::Immediate { .. })
    }
}

/// A constant expression over other constant values.
///
/// The collector materializes these into ordinary instructions before any
/// rewrite, so that every traced constant has exactly one def-site user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstExpr {
    Cast { code: CastOp, arg: ValueId },
    Binary { code: BinaryOp, args: [ValueId; 2] },
}

impl ConstExpr {
    pub fn args(&self) -> &[ValueId] {
        match self {
            Self::Cast { arg, .. } => std::slice::from_ref(arg),
            Self::Binary { args, .. } => args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Immediate {
    I1(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    I128(i128),
}

impl Immediate {
    pub fn ty(&self) -> Type {
        match self {
            Self::I1(..) => Type::I1,
            Self::I8(..) => Type::I8,
            Self::I16(..) => Type::I16,
            Self::I32(..) => Type::I32,
            Self::I64(..) => Type::I64,
            Self::I128(..) => Type::I128,
        }
    }

    /// Returns the sign-extended value of the immediate.
    pub fn as_i128(&self) -> i128 {
        match *self {
            Self::I1(v) => v as i128,
            Self::I8(v) => v as i128,
            Self::I16(v) => v as i128,
            Self::I32(v) => v as i128,
            Self::I64(v) => v as i128,
            Self::I128(v) => v,
        }
    }

    /// Returns the zero-extended bit pattern of the immediate truncated to 64
    /// bits. Addresses are read this way.
    pub fn as_u64(&self) -> u64 {
        match *self {
            Self::I1(v) => v as u64,
            Self::I8(v) => v as u8 as u64,
            Self::I16(v) => v as u16 as u64,
            Self::I32(v) => v as u32 as u64,
            Self::I64(v) => v as u64,
            Self::I128(v) => v as u64,
        }
    }

    /// Makes an immediate of the integer type `ty`, truncating `value`.
    pub fn from_i128(value: i128, ty: Type) -> Option<Self> {
        let imm = match ty {
            Type::I1 => Self::I1(value & 1 != 0),
            Type::I8 => Self::I8(value as i8),
            Type::I16 => Self::I16(value as i16),
            Type::I32 => Self::I32(value as i32),
            Type::I64 => Self::I64(value as i64),
            Type::I128 => Self::I128(value),
            _ => return None,
        };
        Some(imm)
    }
}

impl From<bool> for Immediate {
    fn from(imm: bool) -> Self {
        Self::I1(imm)
    }
}

impl From<i8> for Immediate {
    fn from(imm: i8) -> Self {
        Self::I8(imm)
    }
}

impl From<i16> for Immediate {
    fn from(imm: i16) -> Self {
        Self::I16(imm)
    }
}

impl From<i32> for Immediate {
    fn from(imm: i32) -> Self {
        Self::I32(imm)
    }
}

impl From<i64> for Immediate {
    fn from(imm: i64) -> Self {
        Self::I64(imm)
    }
}

impl From<i128> for Immediate {
    fn from(imm: i128) -> Self {
        Self::I128(imm)
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::I1(v) => write!(f, "{}", *v as u8),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::I128(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_widths() {
        let imm = Immediate::from(-1i32);
        assert_eq!(imm.as_i128(), -1);
        assert_eq!(imm.as_u64(), 0xffff_ffff);

        let imm = Immediate::from_i128(0x1_0000_0010, Type::I32).unwrap();
        assert_eq!(imm, Immediate::I32(0x10));
        assert_eq!(Immediate::from_i128(1, Type::F32), None);
    }
}
