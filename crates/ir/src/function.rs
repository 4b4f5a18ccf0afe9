use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{DataFlowGraph, Layout, Type, ValueId};
use crate::{Linkage, TypeStore};

#[derive(Debug)]
pub struct Function {
    pub sig: Signature,
    pub arg_values: SmallVec<[ValueId; 8]>,
    pub dfg: DataFlowGraph,
    pub layout: Layout,
    /// Source-level argument names keyed by argument position.
    pub arg_names: FxHashMap<usize, String>,
}

impl Function {
    pub fn new(sig: Signature) -> Self {
        let mut dfg = DataFlowGraph::new();
        let arg_values = sig
            .args()
            .iter()
            .enumerate()
            .map(|(idx, arg_ty)| dfg.make_arg_value(*arg_ty, idx))
            .collect();

        Self {
            sig,
            arg_values,
            dfg,
            layout: Layout::default(),
            arg_names: FxHashMap::default(),
        }
    }

    /// Returns `true` if the function is defined, not only declared.
    pub fn has_body(&self) -> bool {
        self.layout.entry_block().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    /// Name of the function.
    name: String,

    /// Linkage of the function.
    linkage: Linkage,

    args: SmallVec<[Type; 8]>,
    ret_ty: Type,

    /// Position of the argument that carries the caller-provided return slot.
    struct_ret: Option<usize>,
    variadic: bool,
    noreturn: bool,
}

impl Signature {
    pub fn new(name: &str, linkage: Linkage, args: &[Type], ret_ty: Type) -> Self {
        Self {
            name: name.to_string(),
            linkage,
            args: args.into(),
            ret_ty,
            ..Default::default()
        }
    }

    pub fn with_struct_ret(mut self, idx: usize) -> Self {
        debug_assert!(idx < self.args.len());
        self.struct_ret = Some(idx);
        self
    }

    pub fn with_variadic(mut self, variadic: bool) -> Self {
        self.variadic = variadic;
        self
    }

    pub fn with_noreturn(mut self, noreturn: bool) -> Self {
        self.noreturn = noreturn;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    pub fn args(&self) -> &[Type] {
        &self.args
    }

    pub fn ret_ty(&self) -> Type {
        self.ret_ty
    }

    pub fn struct_ret(&self) -> Option<usize> {
        self.struct_ret
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn is_noreturn(&self) -> bool {
        self.noreturn
    }

    pub fn func_type(&self, store: &mut TypeStore) -> Type {
        store.make_func(&self.args, self.ret_ty)
    }

    pub fn func_ptr_type(&self, store: &mut TypeStore) -> Type {
        let func_ty = self.func_type(store);
        store.make_ptr(func_ty)
    }
}
