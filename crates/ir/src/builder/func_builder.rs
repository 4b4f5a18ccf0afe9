use super::ModuleBuilder;
use crate::{
    func_cursor::{CursorLocation, FuncCursor},
    inst::{BinaryOp, CastOp, InstData},
    module::FuncRef,
    BlockId, ConstExpr, Function, GlobalVariable, Immediate, Type, ValueId,
};

macro_rules! impl_binary_inst {
    ($name:ident, $code:path) => {
        pub fn $name(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
            let ty = self.value_ty(lhs);
            self.insert_inst(InstData::binary($code, lhs, rhs), ty)
        }
    };
}

macro_rules! impl_cast_inst {
    ($name:ident, $code:path) => {
        pub fn $name(&mut self, lhs: ValueId, ty: Type) -> ValueId {
            self.insert_inst(InstData::cast($code, lhs, ty), ty)
        }
    };
}

pub struct FunctionBuilder<'a, C> {
    pub module_builder: &'a mut ModuleBuilder,
    func_ref: FuncRef,
    pub cursor: C,
}

impl<'a, C> FunctionBuilder<'a, C>
where
    C: FuncCursor,
{
    pub fn new(module_builder: &'a mut ModuleBuilder, func_ref: FuncRef, cursor: C) -> Self {
        Self {
            module_builder,
            func_ref,
            cursor,
        }
    }

    pub fn func_ref(&self) -> FuncRef {
        self.func_ref
    }

    pub fn func(&self) -> &Function {
        &self.module_builder.module.funcs[self.func_ref]
    }

    pub fn func_mut(&mut self) -> &mut Function {
        &mut self.module_builder.module.funcs[self.func_ref]
    }

    pub fn args(&self) -> &[ValueId] {
        &self.func().arg_values
    }

    pub fn value_ty(&self, value: ValueId) -> Type {
        self.func().dfg.value_ty(value)
    }

    pub fn append_block(&mut self) -> BlockId {
        let func = &mut self.module_builder.module.funcs[self.func_ref];
        let block = self.cursor.make_block(func);
        self.cursor.append_block(func, block);
        block
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.cursor.set_location(CursorLocation::BlockBottom(block));
    }

    pub fn make_imm_value<Imm>(&mut self, imm: Imm) -> ValueId
    where
        Imm: Into<Immediate>,
    {
        self.func_mut().dfg.make_imm_value(imm)
    }

    /// Return pointer value to the global variable.
    pub fn make_global_value(&mut self, gv: GlobalVariable) -> ValueId {
        self.module_builder.module.global_value(self.func_ref, gv)
    }

    /// Return pointer value to the function.
    pub fn make_func_value(&mut self, target: FuncRef) -> ValueId {
        self.module_builder.module.func_value(self.func_ref, target)
    }

    pub fn make_expr_value(&mut self, expr: ConstExpr, ty: Type) -> ValueId {
        self.func_mut().dfg.make_expr_value(expr, ty)
    }

    pub fn ptr_type(&mut self, ty: Type) -> Type {
        self.module_builder.ptr_type(ty)
    }

    pub fn declare_array_type(&mut self, elem: Type, len: usize) -> Type {
        self.module_builder.declare_array_type(elem, len)
    }

    pub fn declare_vector_type(&mut self, elem: Type, len: usize) -> Type {
        self.module_builder.declare_vector_type(elem, len)
    }

    pub fn declare_struct_type(&mut self, name: &str, fields: &[Type], packed: bool) -> Type {
        self.module_builder
            .declare_struct_type(name, fields, packed)
    }

    /// Inserts an instruction into the current position and returns a `ValueId`
    /// for the result of type `ret_ty`.
    pub fn insert_inst(&mut self, data: InstData, ret_ty: Type) -> ValueId {
        let func = &mut self.module_builder.module.funcs[self.func_ref];
        self.cursor.insert_inst_with_result(func, data, ret_ty)
    }

    /// Inserts an instruction that has no result.
    pub fn insert_inst_no_result(&mut self, data: InstData) {
        let func = &mut self.module_builder.module.funcs[self.func_ref];
        let inst = self.cursor.insert_inst_data(func, data);
        self.cursor.set_location(CursorLocation::At(inst));
    }

    impl_binary_inst!(add, BinaryOp::Add);
    impl_binary_inst!(sub, BinaryOp::Sub);
    impl_binary_inst!(mul, BinaryOp::Mul);
    impl_binary_inst!(and, BinaryOp::And);
    impl_binary_inst!(or, BinaryOp::Or);
    impl_binary_inst!(xor, BinaryOp::Xor);

    impl_cast_inst!(sext, CastOp::Sext);
    impl_cast_inst!(zext, CastOp::Zext);
    impl_cast_inst!(trunc, CastOp::Trunc);
    impl_cast_inst!(bitcast, CastOp::Bitcast);
    impl_cast_inst!(int_to_ptr, CastOp::IntToPtr);
    impl_cast_inst!(ptr_to_int, CastOp::PtrToInt);
    impl_cast_inst!(fp_trunc, CastOp::FpTrunc);
    impl_cast_inst!(fp_ext, CastOp::FpExt);

    pub fn load(&mut self, addr: ValueId, ty: Type) -> ValueId {
        self.insert_inst(InstData::load(addr, ty), ty)
    }

    pub fn store(&mut self, addr: ValueId, value: ValueId) {
        self.insert_inst_no_result(InstData::store(addr, value));
    }

    pub fn alloca(&mut self, ty: Type) -> ValueId {
        let ptr_ty = self.ptr_type(ty);
        self.insert_inst(InstData::Alloca { ty }, ptr_ty)
    }

    pub fn gep(&mut self, args: &[ValueId], ret_ty: Type) -> ValueId {
        self.insert_inst(InstData::gep(args), ret_ty)
    }

    /// Calls `func`. Returns `None` if the callee returns `unit`.
    pub fn call(&mut self, func: FuncRef, args: &[ValueId]) -> Option<ValueId> {
        let ret_ty = self.module_builder.module.funcs[func].sig.ret_ty();
        let data = InstData::call(func, args, ret_ty);
        if ret_ty.is_unit() {
            self.insert_inst_no_result(data);
            None
        } else {
            Some(self.insert_inst(data, ret_ty))
        }
    }

    pub fn jump(&mut self, dest: BlockId) {
        self.insert_inst_no_result(InstData::jump(dest));
    }

    pub fn br(&mut self, cond: ValueId, then: BlockId, else_: BlockId) {
        self.insert_inst_no_result(InstData::Branch {
            args: [cond],
            dests: [then, else_],
        });
    }

    pub fn ret(&mut self, arg: Option<ValueId>) {
        self.insert_inst_no_result(InstData::Return { args: arg });
    }

    pub fn phi(&mut self, ty: Type, args: &[(ValueId, BlockId)]) -> ValueId {
        let mut data = InstData::phi(ty);
        for &(value, block) in args {
            data.append_phi_arg(value, block);
        }
        self.insert_inst(data, ty)
    }

    pub fn append_phi_arg(&mut self, phi_res: ValueId, value: ValueId, block: BlockId) {
        let func = self.func_mut();
        let phi_inst = func
            .dfg
            .value_inst(phi_res)
            .expect("`phi_res` should be a result of phi inst");

        func.dfg.append_phi_arg(phi_inst, value, block);
    }

    pub fn finish(self) {
        if cfg!(debug_assertions) {
            let func = self.func();
            for block in func.layout.iter_block() {
                let last = func.layout.last_inst_of(block);
                debug_assert!(
                    last.is_some_and(|inst| func.dfg.is_terminator(inst)),
                    "`{block}` must end with a terminator"
                );
            }
        }
    }
}
