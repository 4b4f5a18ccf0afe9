//! Register constraints and the allocation function that consumes them.
use std::ops::BitOr;

use relift_ir::{DataLayout, Type, TypeStore};

/// Set of value widths a register variant accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SizeConstraint(u8);

impl SizeConstraint {
    pub const BIT_8: Self = Self(1 << 0);
    pub const BIT_16: Self = Self(1 << 1);
    pub const BIT_32: Self = Self(1 << 2);
    pub const BIT_64: Self = Self(1 << 3);
    pub const BIT_80: Self = Self(1 << 4);
    pub const BIT_128: Self = Self(1 << 5);

    /// Every width up to and including 32 bits.
    pub const MAX_32: Self = Self(Self::BIT_8.0 | Self::BIT_16.0 | Self::BIT_32.0);
    /// Every width up to and including 64 bits.
    pub const MAX_64: Self = Self(Self::MAX_32.0 | Self::BIT_64.0);

    /// Returns the size class of a value that is `bits` wide, rounding up to
    /// the next class.
    pub fn of_bits(bits: usize) -> Option<Self> {
        let class = match bits {
            1..=8 => Self::BIT_8,
            9..=16 => Self::BIT_16,
            17..=32 => Self::BIT_32,
            33..=64 => Self::BIT_64,
            65..=80 => Self::BIT_80,
            81..=128 => Self::BIT_128,
            _ => return None,
        };
        Some(class)
    }

    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for SizeConstraint {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Set of value kinds a register variant accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeConstraint(u8);

impl TypeConstraint {
    pub const INT: Self = Self(1 << 0);
    pub const PTR: Self = Self(1 << 1);
    pub const FLOAT: Self = Self(1 << 2);
    pub const VECTOR: Self = Self(1 << 3);

    pub const INTEGRAL: Self = Self(Self::INT.0 | Self::PTR.0);

    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for TypeConstraint {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Size and kind of a single value, as seen by register allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueClass {
    pub size: SizeConstraint,
    pub kind: TypeConstraint,
}

/// Classifies a scalar, pointer or vector type. Returns `None` for types that
/// no single register can hold.
pub fn classify(ty: Type, types: &TypeStore, dl: &DataLayout) -> Option<ValueClass> {
    let (bits, kind) = match ty {
        Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::I128 => {
            (ty.bits()?, TypeConstraint::INT)
        }
        Type::F32 | Type::F64 | Type::F80 => (ty.bits()?, TypeConstraint::FLOAT),
        Type::Compound(_) if types.is_ptr(ty) => (dl.pointer_bytes() * 8, TypeConstraint::PTR),
        Type::Compound(_) if types.is_vector(ty) => {
            (dl.size_of(ty, types).ok()? * 8, TypeConstraint::VECTOR)
        }
        _ => return None,
    };

    Some(ValueClass {
        size: SizeConstraint::of_bits(bits)?,
        kind,
    })
}

/// One way of using a register slot: the register name and the values it can
/// carry under that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantConstraint {
    pub register: String,
    pub sizes: SizeConstraint,
    pub kinds: TypeConstraint,
}

impl VariantConstraint {
    pub fn new(register: &str, kinds: TypeConstraint, sizes: SizeConstraint) -> Self {
        Self {
            register: register.to_string(),
            sizes,
            kinds,
        }
    }

    pub fn accepts(&self, class: ValueClass) -> bool {
        self.sizes.contains(class.size) && self.kinds.contains(class.kind)
    }
}

/// A single register slot. Variants are ordered narrowest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterConstraint {
    pub variants: Vec<VariantConstraint>,
}

impl RegisterConstraint {
    pub fn new(variants: Vec<VariantConstraint>) -> Self {
        Self { variants }
    }

    pub fn select(&self, class: ValueClass) -> Option<&VariantConstraint> {
        self.variants.iter().find(|variant| variant.accepts(class))
    }
}

/// Finds the first unreserved slot that can carry `class`. Returns its index
/// and the register name of the matching variant.
pub fn try_register_allocate<'a>(
    constraints: &'a [RegisterConstraint],
    reserved: &[bool],
    class: ValueClass,
) -> Option<(usize, &'a str)> {
    constraints
        .iter()
        .enumerate()
        .filter(|(idx, _)| !reserved.get(*idx).copied().unwrap_or(false))
        .find_map(|(idx, constraint)| {
            constraint
                .select(class)
                .map(|variant| (idx, variant.register.as_str()))
        })
}

/// Reservation state over one constraint list.
#[derive(Debug, Clone)]
pub struct AllocationState<'a> {
    constraints: &'a [RegisterConstraint],
    reserved: Vec<bool>,
}

impl<'a> AllocationState<'a> {
    pub fn new(constraints: &'a [RegisterConstraint]) -> Self {
        Self {
            constraints,
            reserved: vec![false; constraints.len()],
        }
    }

    /// Reserves a slot for `class` and returns the register to use.
    pub fn try_allocate(&mut self, class: ValueClass) -> Option<&'a str> {
        let (idx, register) = try_register_allocate(self.constraints, &self.reserved, class)?;
        self.reserved[idx] = true;
        Some(register)
    }

    pub fn num_reserved(&self) -> usize {
        self.reserved.iter().filter(|r| **r).count()
    }
}
