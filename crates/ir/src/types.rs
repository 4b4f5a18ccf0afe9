//! This module contains the IR type definitions.
use std::fmt;

use cranelift_entity::PrimaryMap;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

#[derive(Debug, Default)]
pub struct TypeStore {
    compounds: PrimaryMap<CompoundTypeRef, CompoundType>,
    rev_types: FxHashMap<CompoundType, CompoundTypeRef>,
    struct_types: IndexMap<String, CompoundTypeRef>,
}

impl TypeStore {
    pub fn make_ptr(&mut self, ty: Type) -> Type {
        let ty = self.make_compound(CompoundType::Ptr(ty));
        Type::Compound(ty)
    }

    pub fn make_array(&mut self, elem: Type, len: usize) -> Type {
        let ty = self.make_compound(CompoundType::Array { elem, len });
        Type::Compound(ty)
    }

    pub fn make_vector(&mut self, elem: Type, len: usize) -> Type {
        let ty = self.make_compound(CompoundType::Vector { elem, len });
        Type::Compound(ty)
    }

    /// Declares a named struct type.
    ///
    /// # Panic
    /// Panics if another struct with the same name but a different body is
    /// already declared. Use [`Self::unique_struct_name`] to pick a free name.
    pub fn make_struct(&mut self, name: &str, fields: &[Type], packed: bool) -> Type {
        let compound_data = CompoundType::Struct(StructData {
            name: name.to_string(),
            fields: fields.to_vec(),
            packed,
        });

        let cmpd_ref = self.make_compound(compound_data);
        Type::Compound(cmpd_ref)
    }

    pub fn make_func(&mut self, args: &[Type], ret_ty: Type) -> Type {
        let cmpd_ref = self.make_compound(CompoundType::Func {
            args: args.into(),
            ret_ty,
        });
        Type::Compound(cmpd_ref)
    }

    /// Returns `base` itself if no struct is named `base` yet, otherwise the
    /// first `base.N` that is free.
    pub fn unique_struct_name(&self, base: &str) -> String {
        if !self.struct_types.contains_key(base) {
            return base.to_string();
        }

        let mut n = 1;
        loop {
            let name = format!("{base}.{n}");
            if !self.struct_types.contains_key(&name) {
                return name;
            }
            n += 1;
        }
    }

    /// Returns `[StructData]` if the given type is a struct type.
    pub fn struct_def(&self, ty: Type) -> Option<&StructData> {
        match self.compound(ty)? {
            CompoundType::Struct(def) => Some(def),
            _ => None,
        }
    }

    pub fn array_def(&self, ty: Type) -> Option<(Type, usize)> {
        match self.compound(ty)? {
            CompoundType::Array { elem, len } => Some((*elem, *len)),
            _ => None,
        }
    }

    pub fn vector_def(&self, ty: Type) -> Option<(Type, usize)> {
        match self.compound(ty)? {
            CompoundType::Vector { elem, len } => Some((*elem, *len)),
            _ => None,
        }
    }

    /// Lookup the struct type by name.
    pub fn lookup_struct(&self, name: &str) -> Option<Type> {
        self.struct_types.get(name).copied().map(Type::Compound)
    }

    pub fn all_struct_data(&self) -> impl Iterator<Item = &StructData> {
        self.struct_types
            .values()
            .map(|compound_type| match self.compounds[*compound_type] {
                CompoundType::Struct(ref def) => def,
                _ => unreachable!(),
            })
    }

    pub fn deref(&self, ptr: Type) -> Option<Type> {
        match self.compound(ptr)? {
            CompoundType::Ptr(ty) => Some(*ty),
            _ => None,
        }
    }

    pub fn is_ptr(&self, ty: Type) -> bool {
        self.compound(ty).is_some_and(CompoundType::is_ptr)
    }

    pub fn is_array(&self, ty: Type) -> bool {
        self.compound(ty).is_some_and(CompoundType::is_array)
    }

    pub fn is_vector(&self, ty: Type) -> bool {
        self.compound(ty).is_some_and(CompoundType::is_vector)
    }

    pub fn is_struct(&self, ty: Type) -> bool {
        self.compound(ty).is_some_and(CompoundType::is_struct)
    }

    pub fn is_func(&self, ty: Type) -> bool {
        self.compound(ty).is_some_and(CompoundType::is_func)
    }

    pub fn make_compound(&mut self, data: CompoundType) -> CompoundTypeRef {
        match self.rev_types.get(&data) {
            Some(cmpd_ref) => *cmpd_ref,
            None => {
                let cmpd_ref = self.compounds.push(data.clone());
                if let CompoundType::Struct(s) = &data {
                    let name = &s.name;
                    assert!(
                        !self.struct_types.contains_key(name),
                        "struct {name} is already defined"
                    );
                    self.struct_types.insert(name.to_string(), cmpd_ref);
                }

                self.rev_types.insert(data, cmpd_ref);
                cmpd_ref
            }
        }
    }

    pub fn resolve_compound(&self, cmpd_ref: CompoundTypeRef) -> &CompoundType {
        &self.compounds[cmpd_ref]
    }

    /// Returns a value that formats `ty` in the IR text syntax.
    pub fn display(&self, ty: Type) -> DisplayType<'_> {
        DisplayType { ty, store: self }
    }

    fn compound(&self, ty: Type) -> Option<&CompoundType> {
        match ty {
            Type::Compound(cmpd_ref) => Some(&self.compounds[cmpd_ref]),
            _ => None,
        }
    }
}

/// IR types definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Type {
    I1,
    I8,
    I16,
    I32,
    I64,
    I128,
    F32,
    F64,
    /// x87 extended precision float.
    F80,
    Compound(CompoundTypeRef),
    #[default]
    Unit,
}

impl Type {
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Self::I1 | Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::I128
        )
    }

    pub fn is_unit(self) -> bool {
        matches!(self, Self::Unit)
    }

    /// Returns the integer type that is exactly `bytes` wide.
    pub fn int_of_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(Self::I8),
            2 => Some(Self::I16),
            4 => Some(Self::I32),
            8 => Some(Self::I64),
            16 => Some(Self::I128),
            _ => None,
        }
    }

    /// Returns the bit width of a scalar type.
    pub fn bits(self) -> Option<usize> {
        match self {
            Self::I1 => Some(1),
            Self::I8 => Some(8),
            Self::I16 => Some(16),
            Self::I32 | Self::F32 => Some(32),
            Self::I64 | Self::F64 => Some(64),
            Self::F80 => Some(80),
            Self::I128 => Some(128),
            Self::Compound(_) | Self::Unit => None,
        }
    }
}

/// An opaque reference to [`CompoundType`].
#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash, PartialOrd, Ord)]
pub struct CompoundTypeRef(u32);
cranelift_entity::entity_impl!(CompoundTypeRef);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompoundType {
    Array {
        elem: Type,
        len: usize,
    },
    /// Packed SIMD value held in a single vector register.
    Vector {
        elem: Type,
        len: usize,
    },
    Ptr(Type),
    Struct(StructData),
    Func {
        args: SmallVec<[Type; 8]>,
        ret_ty: Type,
    },
}

impl CompoundType {
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector { .. })
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Self::Ptr(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Self::Struct(..))
    }

    pub fn is_func(&self) -> bool {
        matches!(self, Self::Func { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructData {
    pub name: String,
    pub fields: Vec<Type>,
    pub packed: bool,
}

pub struct DisplayType<'a> {
    ty: Type,
    store: &'a TypeStore,
}

impl fmt::Display for DisplayType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cmpd_ref = match self.ty {
            Type::I1 => return write!(f, "i1"),
            Type::I8 => return write!(f, "i8"),
            Type::I16 => return write!(f, "i16"),
            Type::I32 => return write!(f, "i32"),
            Type::I64 => return write!(f, "i64"),
            Type::I128 => return write!(f, "i128"),
            Type::F32 => return write!(f, "f32"),
            Type::F64 => return write!(f, "f64"),
            Type::F80 => return write!(f, "f80"),
            Type::Unit => return write!(f, "unit"),
            Type::Compound(cmpd_ref) => cmpd_ref,
        };

        let store = self.store;
        match store.resolve_compound(cmpd_ref) {
            CompoundType::Array { elem, len } => write!(f, "[{}; {len}]", store.display(*elem)),
            CompoundType::Vector { elem, len } => write!(f, "<{}; {len}>", store.display(*elem)),
            CompoundType::Ptr(ty) => write!(f, "*{}", store.display(*ty)),
            CompoundType::Struct(StructData { name, .. }) => write!(f, "@{name}"),
            CompoundType::Func { args, ret_ty } => {
                write!(f, "(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", store.display(*arg))?;
                }
                write!(f, ") -> {}", store.display(*ret_ty))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_types_are_interned() {
        let mut store = TypeStore::default();
        let p0 = store.make_ptr(Type::I32);
        let p1 = store.make_ptr(Type::I32);
        assert_eq!(p0, p1);
        assert_eq!(store.deref(p0), Some(Type::I32));

        let arr = store.make_array(Type::I8, 4);
        assert!(store.is_array(arr));
        assert!(!store.is_ptr(arr));
        assert_eq!(store.array_def(arr), Some((Type::I8, 4)));
    }

    #[test]
    fn unique_struct_name() {
        let mut store = TypeStore::default();
        assert_eq!(store.unique_struct_name("s"), "s");
        store.make_struct("s", &[Type::I32], false);
        assert_eq!(store.unique_struct_name("s"), "s.1");
        store.make_struct("s.1", &[Type::I64], false);
        assert_eq!(store.unique_struct_name("s"), "s.2");
        assert!(store.lookup_struct("s.1").is_some());
    }

    #[test]
    fn display() {
        let mut store = TypeStore::default();
        let s = store.make_struct("pair", &[Type::I32, Type::F64], false);
        let ptr = store.make_ptr(s);
        let arr = store.make_array(ptr, 3);
        let vec = store.make_vector(Type::F32, 4);
        let func = store.make_func(&[arr, vec], Type::Unit);

        assert_eq!(store.display(arr).to_string(), "[*@pair; 3]");
        assert_eq!(
            store.display(func).to_string(),
            "([*@pair; 3], <f32; 4>) -> unit"
        );
    }
}
