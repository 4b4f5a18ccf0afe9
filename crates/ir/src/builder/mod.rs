mod func_builder;
mod module_builder;

pub use func_builder::FunctionBuilder;
pub use module_builder::ModuleBuilder;

pub mod test_util {
    use super::*;

    use relift_triple::TargetTriple;

    use crate::{
        func_cursor::InstInserter, ir_writer::FuncWriter, isa::TargetIsa, module::FuncRef,
        Linkage, Module, Signature, Type,
    };

    pub fn build_test_isa() -> TargetIsa {
        isa_for("x86_64-unknown-linux")
    }

    pub fn isa_for(triple: &str) -> TargetIsa {
        let triple = TargetTriple::parse(triple).unwrap();
        TargetIsa::new(triple)
    }

    pub struct TestModuleBuilder {
        pub module_builder: ModuleBuilder,
    }

    impl TestModuleBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_isa(isa: TargetIsa) -> Self {
            Self {
                module_builder: ModuleBuilder::new(isa),
            }
        }

        /// Declares `name` without a body.
        pub fn declare(&mut self, name: &str, args: &[Type], ret_ty: Type) -> FuncRef {
            let sig = Signature::new(name, Linkage::External, args, ret_ty);
            self.module_builder.declare_function(sig)
        }

        pub fn func_builder(
            &mut self,
            args: &[Type],
            ret_ty: Type,
        ) -> FunctionBuilder<'_, InstInserter> {
            self.named_func_builder("test_func", args, ret_ty)
        }

        pub fn named_func_builder(
            &mut self,
            name: &str,
            args: &[Type],
            ret_ty: Type,
        ) -> FunctionBuilder<'_, InstInserter> {
            let sig = Signature::new(name, Linkage::Public, args, ret_ty);
            let func_ref = self.module_builder.declare_function(sig);
            self.module_builder.func_builder(func_ref)
        }

        pub fn build(self) -> Module {
            self.module_builder.build()
        }
    }

    pub fn dump_func(module: &Module, func_ref: FuncRef) -> String {
        let mut writer = FuncWriter::new(module, func_ref);
        writer.dump_string().unwrap()
    }

    impl Default for TestModuleBuilder {
        fn default() -> Self {
            Self::with_isa(build_test_isa())
        }
    }
}
