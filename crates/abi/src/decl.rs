//! Declarations binding functions and variables to machine locations.
use relift_ir::{
    module::FuncRef, GlobalVariable, GlobalVariableData, Linkage, Module, Signature, Type,
};

/// Where a value lives on function entry or exit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Register(String),
    /// `[base + offset]`.
    Memory { base: String, offset: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDecl {
    pub location: Location,
    pub ty: Type,
}

impl ValueDecl {
    pub fn register(register: &str, ty: Type) -> Self {
        Self {
            location: Location::Register(register.to_string()),
            ty,
        }
    }

    pub fn memory(base: &str, offset: i64, ty: Type) -> Self {
        Self {
            location: Location::Memory {
                base: base.to_string(),
                offset,
            },
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDecl {
    pub name: String,
    pub value: ValueDecl,
}

/// A function and its calling-convention binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub address: u64,
    pub sig: Signature,
    /// Location of the return address on entry.
    pub return_address: ValueDecl,
    /// Register that holds the stack pointer after return.
    pub return_stack_pointer: String,
    /// Value of the return stack pointer relative to its entry value.
    pub return_stack_pointer_offset: i64,
    pub params: Vec<ParameterDecl>,
    pub returns: Vec<ValueDecl>,
    /// Bytes below the stack pointer the function may use without adjusting it.
    pub num_bytes_in_redzone: u64,
}

impl FunctionDecl {
    pub fn name(&self) -> &str {
        self.sig.name()
    }

    pub fn is_variadic(&self) -> bool {
        self.sig.is_variadic()
    }

    pub fn is_noreturn(&self) -> bool {
        self.sig.is_noreturn()
    }

    /// Returns the module function with this declaration's name, declaring an
    /// external one from the signature if there is none.
    pub fn declare_in_module(&self, module: &mut Module) -> FuncRef {
        module.declare_function(self.sig.clone())
    }
}

/// A global variable at a fixed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVarDecl {
    pub name: String,
    pub ty: Type,
    pub address: u64,
}

impl GlobalVarDecl {
    pub fn new(name: &str, ty: Type, address: u64) -> Self {
        Self {
            name: name.to_string(),
            ty,
            address,
        }
    }

    pub fn declare_in_module(&self, module: &mut Module) -> GlobalVariable {
        if let Some(gv) = module.gvs.gv_by_symbol(&self.name) {
            return gv;
        }

        module.make_global(GlobalVariableData::new(
            self.name.clone(),
            self.ty,
            Linkage::External,
            false,
        ))
    }
}

#[cfg(test)]
mod tests {
    use relift_ir::builder::test_util::build_test_isa;

    use super::*;

    fn decl(sig: Signature) -> FunctionDecl {
        FunctionDecl {
            address: 0x1000,
            sig,
            return_address: ValueDecl::memory("RSP", 0, Type::I64),
            return_stack_pointer: "RSP".to_string(),
            return_stack_pointer_offset: 8,
            params: vec![],
            returns: vec![],
            num_bytes_in_redzone: 128,
        }
    }

    #[test]
    fn declare_function_once() {
        let mut module = Module::new(build_test_isa());
        let sig = Signature::new("callee", Linkage::External, &[Type::I32], Type::I64)
            .with_noreturn(true);
        let decl = decl(sig);

        let f0 = decl.declare_in_module(&mut module);
        let f1 = decl.declare_in_module(&mut module);
        assert_eq!(f0, f1);
        assert_eq!(module.lookup_func("callee"), Some(f0));
        assert!(module.funcs[f0].sig.is_noreturn());
        assert!(!module.funcs[f0].has_body());
    }

    #[test]
    fn declare_variable_once() {
        let mut module = Module::new(build_test_isa());
        let decl = GlobalVarDecl::new("counter", Type::I32, 0x4000);

        let gv0 = decl.declare_in_module(&mut module);
        let gv1 = decl.declare_in_module(&mut module);
        assert_eq!(gv0, gv1);
        assert_eq!(module.gvs.ty(gv0), Type::I32);
        assert_eq!(module.gvs.gv_data(gv0).linkage, Linkage::External);
    }
}
