use std::collections::hash_map::Entry;

use cranelift_entity::PrimaryMap;
use rustc_hash::FxHashMap;

use crate::{Linkage, Type};

#[derive(Debug, Default)]
pub struct GlobalVariableStore {
    gv_data: PrimaryMap<GlobalVariable, GlobalVariableData>,
    symbols: FxHashMap<String, GlobalVariable>,
}

impl GlobalVariableStore {
    pub fn make_gv(&mut self, gv_data: GlobalVariableData) -> GlobalVariable {
        match self.symbols.entry(gv_data.symbol.to_string()) {
            Entry::Occupied(_) => {
                panic!("duplicate global symbol `{}`", gv_data.symbol);
            }
            Entry::Vacant(v) => {
                let gv = self.gv_data.push(gv_data);
                v.insert(gv);
                gv
            }
        }
    }

    /// Returns `base` if it's free, otherwise the first free `base.N`.
    pub fn unique_symbol(&self, base: &str) -> String {
        if !self.symbols.contains_key(base) {
            return base.to_string();
        }

        let mut n = 1;
        loop {
            let symbol = format!("{base}.{n}");
            if !self.symbols.contains_key(&symbol) {
                return symbol;
            }
            n += 1;
        }
    }

    pub fn gv_data(&self, gv: GlobalVariable) -> &GlobalVariableData {
        &self.gv_data[gv]
    }

    pub fn gv_by_symbol(&self, symbol: &str) -> Option<GlobalVariable> {
        self.symbols.get(symbol).copied()
    }

    pub fn is_const(&self, gv: GlobalVariable) -> bool {
        self.gv_data[gv].is_const
    }

    pub fn ty(&self, gv: GlobalVariable) -> Type {
        self.gv_data[gv].ty
    }

    /// Changes the type of `gv`. Callers holding address values of `gv` must
    /// retype them too, see [`crate::Module::retype_global`].
    pub(crate) fn set_ty(&mut self, gv: GlobalVariable, ty: Type) {
        self.gv_data[gv].ty = ty;
    }

    pub fn all_gv_data(&self) -> impl Iterator<Item = &GlobalVariableData> {
        self.gv_data.values()
    }
}

/// An opaque reference to [`GlobalVariableData`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Copy, Hash)]
pub struct GlobalVariable(pub u32);
cranelift_entity::entity_impl!(GlobalVariable);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalVariableData {
    pub symbol: String,
    pub ty: Type,
    pub linkage: Linkage,
    pub is_const: bool,
}

impl GlobalVariableData {
    pub fn new(symbol: String, ty: Type, linkage: Linkage, is_const: bool) -> Self {
        Self {
            symbol,
            ty,
            linkage,
            is_const,
        }
    }
}
