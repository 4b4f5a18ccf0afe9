use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;

use crate::{
    global_variable::GlobalVariableStore, isa::TargetIsa, Function, GlobalVariable,
    GlobalVariableData, Signature, Type, TypeStore, ValueId,
};

#[derive(Debug)]
pub struct Module {
    /// Target ISA of the module.
    pub isa: TargetIsa,

    pub types: TypeStore,

    pub gvs: GlobalVariableStore,

    /// Holds all function declared in the module.
    pub funcs: PrimaryMap<FuncRef, Function>,

    declared_funcs: FxHashMap<String, FuncRef>,
}

impl Module {
    pub fn new(isa: TargetIsa) -> Self {
        Self {
            isa,
            types: TypeStore::default(),
            gvs: GlobalVariableStore::default(),
            funcs: PrimaryMap::default(),
            declared_funcs: FxHashMap::default(),
        }
    }

    /// Declares a function with `sig`. Returns the existing function if one
    /// with the same name is already declared.
    pub fn declare_function(&mut self, sig: Signature) -> FuncRef {
        if let Some(&func_ref) = self.declared_funcs.get(sig.name()) {
            return func_ref;
        }

        let name = sig.name().to_string();
        let func_ref = self.funcs.push(Function::new(sig));
        self.declared_funcs.insert(name, func_ref);
        func_ref
    }

    pub fn lookup_func(&self, name: &str) -> Option<FuncRef> {
        self.declared_funcs.get(name).copied()
    }

    pub fn make_global(&mut self, global: GlobalVariableData) -> GlobalVariable {
        self.gvs.make_gv(global)
    }

    /// Returns `func_ref` in the module.
    pub fn iter_functions(&self) -> impl Iterator<Item = FuncRef> {
        self.funcs.keys()
    }

    pub fn func_ptr_type(&mut self, func_ref: FuncRef) -> Type {
        self.funcs[func_ref].sig.func_ptr_type(&mut self.types)
    }

    /// Returns the value in `func` that refers to the address of `gv`.
    pub fn global_value(&mut self, func: FuncRef, gv: GlobalVariable) -> ValueId {
        let ty = self.types.make_ptr(self.gvs.ty(gv));
        self.funcs[func].dfg.make_global_value(gv, ty)
    }

    /// Returns the value in `func` that refers to the address of `target`.
    pub fn func_value(&mut self, func: FuncRef, target: FuncRef) -> ValueId {
        let ty = self.func_ptr_type(target);
        self.funcs[func].dfg.make_func_value(target, ty)
    }

    /// Changes the type of `gv` and every address value referring to it.
    pub fn retype_global(&mut self, gv: GlobalVariable, ty: Type) {
        self.gvs.set_ty(gv, ty);
        let ptr_ty = self.types.make_ptr(ty);
        for func in self.funcs.values_mut() {
            func.dfg.retype_global_value(gv, ptr_ty);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncRef(u32);
entity_impl!(FuncRef);
