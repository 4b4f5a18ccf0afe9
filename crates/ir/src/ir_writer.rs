use std::io;

use crate::{
    inst::InstData, module::FuncRef, BlockId, ConstExpr, Function, InstId, Module, Type,
    Value, ValueId,
};

pub struct ModuleWriter<'a> {
    module: &'a Module,
}

impl<'a> ModuleWriter<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self { module }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        // Write target.
        writeln!(w, "target = \"{}\"", self.module.isa.triple())?;

        // Write struct types defined in the module.
        let types = &self.module.types;
        for s in types.all_struct_data() {
            write!(w, "type @{} = ", s.name)?;
            let (open, close) = if s.packed { ("<{", "}>") } else { ("{", "}") };
            write!(w, "{open}")?;
            for (i, field) in s.fields.iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                write!(w, "{}", types.display(*field))?;
            }
            writeln!(w, "{close};")?;
        }

        // Write module level global variables.
        for gv in self.module.gvs.all_gv_data() {
            let const_ = if gv.is_const { " const" } else { "" };
            writeln!(
                w,
                "global {}{const_} {} %{};",
                gv.linkage,
                types.display(gv.ty),
                gv.symbol
            )?;
        }

        for func_ref in self.module.funcs.keys() {
            writeln!(w)?;
            FuncWriter::new(self.module, func_ref).write(&mut w)?;
        }

        Ok(())
    }

    pub fn dump_string(&mut self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        String::from_utf8(s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

pub struct FuncWriter<'a> {
    module: &'a Module,
    func: &'a Function,
    level: u8,
}

impl<'a> FuncWriter<'a> {
    pub fn new(module: &'a Module, func_ref: FuncRef) -> Self {
        Self {
            module,
            func: &module.funcs[func_ref],
            level: 0,
        }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        let sig = &self.func.sig;
        write!(w, "func {} %{}(", sig.linkage(), sig.name())?;

        if self.func.has_body() {
            for (i, &arg) in self.func.arg_values.iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                write!(w, "v{}.{}", arg.0, self.ty(self.func.dfg.value_ty(arg)))?;
            }
        } else {
            for (i, &arg) in sig.args().iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                write!(w, "{}", self.ty(arg))?;
            }
        }
        write!(w, ") -> {}", self.ty(sig.ret_ty()))?;

        if !self.func.has_body() {
            return writeln!(w, ";");
        }

        writeln!(w, " {{")?;
        self.level += 1;
        for (i, block) in self.func.layout.iter_block().enumerate() {
            if i > 0 {
                self.newline(&mut w)?;
            }
            self.write_block_with_inst(block, &mut w)?;
        }
        self.level -= 1;
        writeln!(w, "}}")
    }

    pub fn dump_string(&mut self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        String::from_utf8(s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn write_block_with_inst(&mut self, block: BlockId, mut w: impl io::Write) -> io::Result<()> {
        self.indent(&mut w)?;
        writeln!(w, "{block}:")?;

        self.level += 1;
        for inst in self.func.layout.iter_inst(block) {
            self.indent(&mut w)?;
            self.write_inst(inst, &mut w)?;
            writeln!(w, ";")?;
        }
        self.level -= 1;

        Ok(())
    }

    fn write_inst(&self, inst: InstId, mut w: impl io::Write) -> io::Result<()> {
        use InstData::*;

        let dfg = &self.func.dfg;
        if let Some(ret_val) = dfg.inst_result(inst) {
            write!(w, "v{}.{} = ", ret_val.0, self.ty(dfg.value_ty(ret_val)))?;
        }

        match dfg.inst(inst) {
            Unary { code, args } => {
                write!(w, "{code}")?;
                self.write_args(args, &mut w)
            }
            Binary { code, args } => {
                write!(w, "{code}")?;
                self.write_args(args, &mut w)
            }
            Cast { code, args, .. } => {
                write!(w, "{code}")?;
                self.write_args(args, &mut w)
            }
            Load { args, .. } => {
                write!(w, "load")?;
                self.write_args(args, &mut w)
            }
            Store { args } => {
                write!(w, "store")?;
                self.write_args(args, &mut w)
            }
            Alloca { ty } => write!(w, "alloca {}", self.ty(*ty)),
            Gep { args } => {
                write!(w, "gep")?;
                self.write_args(args, &mut w)
            }
            Call { func, args, .. } => {
                write!(w, "call %{}", self.module.funcs[*func].sig.name())?;
                self.write_args(args, &mut w)
            }
            Jump { dests } => write!(w, "jump {}", dests[0]),
            Branch { args, dests } => {
                write!(w, "br")?;
                self.write_args(args, &mut w)?;
                write!(w, " {} {}", dests[0], dests[1])
            }
            Return { args } => {
                write!(w, "return")?;
                self.write_args(args.as_slice(), &mut w)
            }
            Phi { values, blocks, .. } => {
                write!(w, "phi")?;
                for (value, block) in values.iter().zip(blocks.iter()) {
                    write!(w, " (")?;
                    self.write_value(*value, &mut w)?;
                    write!(w, " {block})")?;
                }
                Ok(())
            }
        }
    }

    fn write_args(&self, args: &[ValueId], w: &mut impl io::Write) -> io::Result<()> {
        for arg in args {
            write!(w, " ")?;
            self.write_value(*arg, w)?;
        }
        Ok(())
    }

    fn write_value(&self, value: ValueId, w: &mut impl io::Write) -> io::Result<()> {
        match self.func.dfg.value(value) {
            Value::Immediate { imm, ty } => write!(w, "{imm}.{}", self.ty(*ty)),
            Value::Global { gv, .. } => write!(w, "%{}", self.module.gvs.gv_data(*gv).symbol),
            Value::Func { func, .. } => write!(w, "%{}", self.module.funcs[*func].sig.name()),
            Value::Expr { expr, ty } => {
                match expr {
                    ConstExpr::Cast { code, .. } => write!(w, "({code}")?,
                    ConstExpr::Binary { code, .. } => write!(w, "({code}")?,
                }
                self.write_args(expr.args(), w)?;
                write!(w, " to {})", self.ty(*ty))
            }
            Value::Inst { .. } | Value::Arg { .. } => write!(w, "v{}", value.0),
        }
    }

    fn ty(&self, ty: Type) -> crate::types::DisplayType<'a> {
        self.module.types.display(ty)
    }

    fn indent(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(" ".repeat(self.level as usize * 4).as_bytes())
    }

    fn newline(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(b"\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::test_util::*, CastOp, GlobalVariableData, Linkage};

    #[test]
    fn module_with_globals_and_exprs() {
        let mut mb = TestModuleBuilder::new();
        let s = mb
            .module_builder
            .declare_struct_type("pair", &[Type::I32, Type::I8], true);
        mb.module_builder.make_global(GlobalVariableData::new(
            "table".to_string(),
            s,
            Linkage::External,
            false,
        ));
        mb.declare("ext", &[Type::I64], Type::Unit);

        let mut builder = mb.func_builder(&[], Type::Unit);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let gv = builder.module_builder.lookup_global("table").unwrap();
        let gv = builder.make_global_value(gv);
        let addr = builder.make_imm_value(4096i64);
        let ptr_ty = builder.ptr_type(Type::I64);
        let expr = builder.make_expr_value(
            ConstExpr::Cast {
                code: CastOp::IntToPtr,
                arg: addr,
            },
            ptr_ty,
        );
        builder.store(expr, addr);
        let int = builder.ptr_to_int(gv, Type::I64);
        let ext = builder.module_builder.lookup_func("ext").unwrap();
        builder.call(ext, &[int]);
        builder.ret(None);
        builder.finish();

        let module = mb.build();
        let text = ModuleWriter::new(&module).dump_string().unwrap();
        assert_eq!(
            text,
            "target = \"x86_64-unknown-linux\"
type @pair = <{i32, i8}>;
global external @pair %table;

func external %ext(i64) -> unit;

func public %test_func() -> unit {
    block0:
        store (inttoptr 4096.i64 to *i64) 4096.i64;
        v3.i64 = ptrtoint %table;
        call %ext v3;
        return;
}
"
        );
    }
}
