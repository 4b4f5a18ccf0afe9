use super::FunctionBuilder;
use crate::{
    func_cursor::{CursorLocation, FuncCursor},
    isa::TargetIsa,
    module::FuncRef,
    GlobalVariable, GlobalVariableData, Module, Signature, Type,
};

pub struct ModuleBuilder {
    pub module: Module,
}

impl ModuleBuilder {
    pub fn new(isa: TargetIsa) -> Self {
        Self {
            module: Module::new(isa),
        }
    }

    pub fn declare_function(&mut self, sig: Signature) -> FuncRef {
        self.module.declare_function(sig)
    }

    pub fn lookup_func(&self, name: &str) -> Option<FuncRef> {
        self.module.lookup_func(name)
    }

    pub fn make_global(&mut self, global: GlobalVariableData) -> GlobalVariable {
        self.module.make_global(global)
    }

    pub fn lookup_global(&self, name: &str) -> Option<GlobalVariable> {
        self.module.gvs.gv_by_symbol(name)
    }

    pub fn declare_struct_type(&mut self, name: &str, fields: &[Type], packed: bool) -> Type {
        self.module.types.make_struct(name, fields, packed)
    }

    pub fn declare_array_type(&mut self, elem: Type, len: usize) -> Type {
        self.module.types.make_array(elem, len)
    }

    pub fn declare_vector_type(&mut self, elem: Type, len: usize) -> Type {
        self.module.types.make_vector(elem, len)
    }

    pub fn declare_func_type(&mut self, args: &[Type], ret_ty: Type) -> Type {
        self.module.types.make_func(args, ret_ty)
    }

    pub fn ptr_type(&mut self, ty: Type) -> Type {
        self.module.types.make_ptr(ty)
    }

    pub fn func_builder<C>(&mut self, func: FuncRef) -> FunctionBuilder<'_, C>
    where
        C: FuncCursor,
    {
        let cursor = C::at_location(CursorLocation::NoWhere);
        FunctionBuilder::new(self, func, cursor)
    }

    pub fn build(self) -> Module {
        self.module
    }
}
