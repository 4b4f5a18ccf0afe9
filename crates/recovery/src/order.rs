//! The order in which competing cells claim an address.
use std::collections::BTreeMap;

use relift_ir::{isa::DataLayout, Type, TypeStore};
use rustc_hash::FxHashMap;

use crate::cell::Cell;

const DECLARED_VARIABLE: u32 = u32::MAX / 2;
const DECLARED_FUNCTION: u32 = u32::MAX;

/// How often each type is observed at each address.
///
/// Types of declared entities get an overwhelming weight so that they always
/// win against what the code happens to access.
#[derive(Debug, Default)]
pub struct Popularity {
    counts: FxHashMap<(u64, Type), u32>,
    /// Declared variables by address, with their allocation size.
    variables: BTreeMap<u64, (Type, u64)>,
    functions: FxHashMap<u64, [Type; 2]>,
    max_variable_size: u64,
}

impl Popularity {
    pub fn new(cells: &[Cell]) -> Self {
        let mut popularity = Self::default();
        for cell in cells {
            let count = popularity.counts.entry((cell.address, cell.ty)).or_default();
            *count = count.saturating_add(1);
        }
        popularity
    }

    pub fn declare_variable(&mut self, address: u64, ty: Type, size: u64) {
        self.variables.insert(address, (ty, size));
        self.max_variable_size = self.max_variable_size.max(size);
    }

    /// Declares a function by its type and the type of a pointer to it.
    pub fn declare_function(&mut self, address: u64, func_ty: Type, ptr_ty: Type) {
        self.functions.insert(address, [func_ty, ptr_ty]);
    }

    pub fn get(&self, address: u64, ty: Type, types: &TypeStore, dl: &DataLayout) -> u32 {
        let observed = self.counts.get(&(address, ty)).copied().unwrap_or_default();

        if self
            .functions
            .get(&address)
            .is_some_and(|declared| declared.contains(&ty))
        {
            return observed.saturating_add(DECLARED_FUNCTION);
        }

        let lowest = address.saturating_sub(self.max_variable_size);
        for (&start, &(var_ty, size)) in self.variables.range(lowest..=address).rev() {
            if address < start + size && is_leaf_at(var_ty, address - start, ty, types, dl) {
                return observed.saturating_add(DECLARED_VARIABLE);
            }
        }

        observed
    }
}

/// Returns `true` if `want` is nested in `ty` at byte `offset`.
fn is_leaf_at(ty: Type, offset: u64, want: Type, types: &TypeStore, dl: &DataLayout) -> bool {
    if offset == 0 && ty == want {
        return true;
    }

    let elem = types.array_def(ty).or_else(|| types.vector_def(ty));
    if let Some((elem, len)) = elem {
        let Ok(elem_size) = dl.alloc_size(elem, types) else {
            return false;
        };
        let elem_size = elem_size as u64;
        if elem_size == 0 || offset / elem_size >= len as u64 {
            return false;
        }
        return is_leaf_at(elem, offset % elem_size, want, types, dl);
    }

    if let Some(def) = types.struct_def(ty) {
        for idx in (0..def.fields.len()).rev() {
            let Ok(field_offset) = dl.field_offset(ty, idx, types) else {
                return false;
            };
            let field_offset = field_offset as u64;
            if field_offset <= offset {
                return is_leaf_at(def.fields[idx], offset - field_offset, want, types, dl);
            }
        }
    }

    false
}

/// Sorts cells by ascending address. Cells at the same address are ordered
/// larger first, then pointers first, then by descending alignment and
/// finally by descending popularity. The sort is stable.
pub fn sort_cells(cells: &mut [Cell], popularity: &Popularity, types: &TypeStore, dl: &DataLayout) {
    let align = |ty: Type| {
        if types.is_func(ty) {
            dl.pointer_bytes()
        } else {
            dl.align_of(ty, types).unwrap_or(1)
        }
    };

    cells.sort_by(|a, b| {
        a.address
            .cmp(&b.address)
            .then_with(|| b.size.cmp(&a.size))
            .then_with(|| types.is_ptr(b.ty).cmp(&types.is_ptr(a.ty)))
            .then_with(|| align(b.ty).cmp(&align(a.ty)))
            .then_with(|| {
                let a = popularity.get(a.address, a.ty, types, dl);
                let b = popularity.get(b.address, b.ty, types, dl);
                b.cmp(&a)
            })
    });
}

#[cfg(test)]
mod tests {
    use relift_ir::{builder::test_util::*, module::FuncRef, InstId, ValueId};

    use super::*;

    fn cell(address: u64, ty: Type, size: u64) -> Cell {
        Cell {
            func: FuncRef::from_u32(0),
            address,
            ty,
            size,
            is_load: true,
            is_store: false,
            is_atomic: false,
            is_volatile: false,
            user: InstId(0),
            value: ValueId(0),
        }
    }

    #[test]
    fn address_then_size() {
        let module = TestModuleBuilder::new().build();
        let dl = module.isa.data_layout();
        let mut cells = vec![
            cell(0x10, Type::I8, 1),
            cell(0x8, Type::I32, 4),
            cell(0x8, Type::I64, 8),
        ];
        let popularity = Popularity::new(&cells);
        sort_cells(&mut cells, &popularity, &module.types, &dl);

        let order: Vec<_> = cells.iter().map(|c| (c.address, c.ty)).collect();
        assert_eq!(order, vec![(0x8, Type::I64), (0x8, Type::I32), (0x10, Type::I8)]);
    }

    #[test]
    fn pointer_then_alignment() {
        let mut mb = TestModuleBuilder::new();
        let ptr = mb.module_builder.ptr_type(Type::I8);
        let packed = mb
            .module_builder
            .declare_struct_type("pair", &[Type::I32, Type::I32], true);
        let module = mb.build();
        let dl = module.isa.data_layout();

        let mut cells = vec![
            cell(0, packed, 8),
            cell(0, Type::F64, 8),
            cell(0, ptr, 8),
        ];
        let popularity = Popularity::new(&cells);
        sort_cells(&mut cells, &popularity, &module.types, &dl);

        let order: Vec<_> = cells.iter().map(|c| c.ty).collect();
        assert_eq!(order, vec![ptr, Type::F64, packed]);
    }

    #[test]
    fn popularity_breaks_ties() {
        let module = TestModuleBuilder::new().build();
        let dl = module.isa.data_layout();

        let mut cells = vec![
            cell(0, Type::F32, 4),
            cell(0, Type::I32, 4),
            cell(0, Type::I32, 4),
        ];
        let popularity = Popularity::new(&cells);
        sort_cells(&mut cells, &popularity, &module.types, &dl);
        assert_eq!(cells[0].ty, Type::I32);

        // A declared variable outweighs any number of observations.
        let mut popularity = Popularity::new(&cells);
        popularity.declare_variable(0, Type::F32, 4);
        sort_cells(&mut cells, &popularity, &module.types, &dl);
        assert_eq!(cells[0].ty, Type::F32);
    }

    #[test]
    fn declared_leaves() {
        let mut mb = TestModuleBuilder::new();
        let arr = mb.module_builder.declare_array_type(Type::I16, 4);
        let s = mb
            .module_builder
            .declare_struct_type("rec", &[Type::I64, arr], false);
        let module = mb.build();
        let dl = module.isa.data_layout();
        let types = &module.types;

        let mut popularity = Popularity::default();
        popularity.declare_variable(0x100, s, 16);

        assert_eq!(popularity.get(0x100, s, types, &dl), DECLARED_VARIABLE);
        assert_eq!(popularity.get(0x100, Type::I64, types, &dl), DECLARED_VARIABLE);
        assert_eq!(popularity.get(0x108, arr, types, &dl), DECLARED_VARIABLE);
        assert_eq!(popularity.get(0x10c, Type::I16, types, &dl), DECLARED_VARIABLE);
        assert_eq!(popularity.get(0x10c, Type::I32, types, &dl), 0);
        assert_eq!(popularity.get(0x110, Type::I16, types, &dl), 0);
    }
}
