//! Target description and the data layout derived from it.
use relift_triple::{Architecture, TargetTriple};
use thiserror::Error;

use crate::{CompoundType, Type, TypeStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetIsa {
    triple: TargetTriple,
}

impl TargetIsa {
    pub fn new(triple: TargetTriple) -> Self {
        Self { triple }
    }

    pub fn triple(&self) -> TargetTriple {
        self.triple
    }

    pub fn data_layout(&self) -> DataLayout {
        match self.triple.architecture {
            Architecture::X86 => DataLayout {
                pointer_bytes: 4,
                max_scalar_align: 4,
                f80_align: 4,
            },
            Architecture::X86_64 => DataLayout {
                pointer_bytes: 8,
                max_scalar_align: 8,
                f80_align: 16,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TypeLayoutError {
    #[error("type `{0:?}` has no in-memory representation")]
    UnrepresentableType(Type),
}

/// Sizes and alignments of IR types on a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    pointer_bytes: usize,
    max_scalar_align: usize,
    f80_align: usize,
}

impl DataLayout {
    pub fn pointer_bytes(&self) -> usize {
        self.pointer_bytes
    }

    /// Integer type with the width of a pointer.
    pub fn pointer_repl(&self) -> Type {
        match self.pointer_bytes {
            4 => Type::I32,
            _ => Type::I64,
        }
    }

    /// Number of bytes written by a store of `ty`.
    pub fn size_of(&self, ty: Type, store: &TypeStore) -> Result<usize, TypeLayoutError> {
        let size = match ty {
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 => 8,
            Type::F80 => 10,
            Type::I128 => 16,
            Type::Unit => return Err(TypeLayoutError::UnrepresentableType(ty)),

            Type::Compound(cmpd) => match store.resolve_compound(cmpd) {
                CompoundType::Array { elem, len } => self.alloc_size(*elem, store)? * len,
                CompoundType::Vector { elem, len } => self.size_of(*elem, store)? * len,
                CompoundType::Ptr(_) => self.pointer_bytes,
                CompoundType::Struct(s) => {
                    let end = self.struct_offsets(&s.fields, s.packed, store)?.1;
                    let align = self.align_of(ty, store)?;
                    end.next_multiple_of(align)
                }
                CompoundType::Func { .. } => {
                    return Err(TypeLayoutError::UnrepresentableType(ty));
                }
            },
        };

        Ok(size)
    }

    /// ABI alignment of `ty`.
    pub fn align_of(&self, ty: Type, store: &TypeStore) -> Result<usize, TypeLayoutError> {
        let align = match ty {
            Type::F80 => self.f80_align,
            Type::Unit => return Err(TypeLayoutError::UnrepresentableType(ty)),
            Type::Compound(cmpd) => match store.resolve_compound(cmpd) {
                CompoundType::Array { elem, .. } => self.align_of(*elem, store)?,
                CompoundType::Vector { .. } => self.size_of(ty, store)?.next_power_of_two().min(16),
                CompoundType::Ptr(_) => self.pointer_bytes,
                CompoundType::Struct(s) => {
                    if s.packed {
                        1
                    } else {
                        let mut align = 1usize;
                        for &field in &s.fields {
                            align = align.max(self.align_of(field, store)?);
                        }
                        align
                    }
                }
                CompoundType::Func { .. } => {
                    return Err(TypeLayoutError::UnrepresentableType(ty));
                }
            },
            _ => self.size_of(ty, store)?.min(self.max_scalar_align),
        };

        Ok(align)
    }

    /// Distance between two consecutive elements of `ty` in an array.
    pub fn alloc_size(&self, ty: Type, store: &TypeStore) -> Result<usize, TypeLayoutError> {
        let size = self.size_of(ty, store)?;
        let align = self.align_of(ty, store)?;
        Ok(size.next_multiple_of(align))
    }

    /// Byte offset of field `idx` in the struct type `ty`.
    ///
    /// # Panic
    /// Panics if `ty` is not a struct or `idx` is out of range.
    pub fn field_offset(
        &self,
        ty: Type,
        idx: usize,
        store: &TypeStore,
    ) -> Result<usize, TypeLayoutError> {
        let Some(s) = store.struct_def(ty) else {
            panic!("`field_offset` requires a struct type");
        };
        let offsets = self.struct_offsets(&s.fields, s.packed, store)?.0;
        Ok(offsets[idx])
    }

    /// Returns the offsets of all fields and the end of the last field.
    fn struct_offsets(
        &self,
        fields: &[Type],
        packed: bool,
        store: &TypeStore,
    ) -> Result<(Vec<usize>, usize), TypeLayoutError> {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0usize;
        for &field in fields {
            if !packed {
                offset = offset.next_multiple_of(self.align_of(field, store)?);
            }
            offsets.push(offset);
            offset += self.alloc_size(field, store)?;
        }

        Ok((offsets, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isa(triple: &str) -> TargetIsa {
        TargetIsa::new(TargetTriple::parse(triple).unwrap())
    }

    #[test]
    fn scalar_layout() {
        let store = TypeStore::default();
        let dl = isa("x86_64-unknown-linux").data_layout();
        assert_eq!(dl.size_of(Type::F80, &store), Ok(10));
        assert_eq!(dl.alloc_size(Type::F80, &store), Ok(16));
        assert_eq!(dl.align_of(Type::I64, &store), Ok(8));
        assert_eq!(
            dl.size_of(Type::Unit, &store),
            Err(TypeLayoutError::UnrepresentableType(Type::Unit))
        );

        let dl = isa("x86-pc-linux").data_layout();
        assert_eq!(dl.align_of(Type::I64, &store), Ok(4));
        assert_eq!(dl.alloc_size(Type::F80, &store), Ok(12));
        assert_eq!(dl.pointer_repl(), Type::I32);
    }

    #[test]
    fn struct_layout() {
        let mut store = TypeStore::default();
        let dl = isa("x86_64-unknown-linux").data_layout();

        let s = store.make_struct("s", &[Type::I8, Type::I32, Type::I16], false);
        assert_eq!(dl.field_offset(s, 1, &store), Ok(4));
        assert_eq!(dl.field_offset(s, 2, &store), Ok(8));
        assert_eq!(dl.size_of(s, &store), Ok(12));
        assert_eq!(dl.align_of(s, &store), Ok(4));

        let p = store.make_struct("p", &[Type::I8, Type::I32, Type::I16], true);
        assert_eq!(dl.field_offset(p, 2, &store), Ok(5));
        assert_eq!(dl.size_of(p, &store), Ok(7));
        assert_eq!(dl.align_of(p, &store), Ok(1));

        let arr = store.make_array(s, 3);
        assert_eq!(dl.size_of(arr, &store), Ok(36));

        let func = store.make_func(&[], Type::Unit);
        assert!(dl.size_of(func, &store).is_err());
    }
}
