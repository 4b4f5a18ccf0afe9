//! Memory accesses through constant addresses.
use indexmap::IndexMap;
use relift_ir::{
    func_cursor::insert_before, module::FuncRef, CastOp, ConstExpr, Function, InstData, InstId,
    Module, Type, Value, ValueId,
};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    config::RecoveryConfig,
    error::RecoveryError,
    intrinsic::Intrinsic,
    program::{ByteKind, Program},
    trace::{downstream_type, trace_constant_bases, upstream_ptr_type, upstream_type},
};

/// A typed access to a constant address, and the operand to rewrite once the
/// address is given a home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub func: FuncRef,
    pub address: u64,
    pub ty: Type,
    pub size: u64,
    pub is_load: bool,
    pub is_store: bool,
    pub is_atomic: bool,
    pub is_volatile: bool,
    /// Instruction that uses `value`.
    pub user: InstId,
    /// The integer constant that holds `address`.
    pub value: ValueId,
}

impl Cell {
    /// Address one past the last accessed byte.
    pub fn end(&self) -> Result<u64, RecoveryError> {
        self.address
            .checked_add(self.size)
            .ok_or(RecoveryError::AddressOverflow {
                address: self.address,
                size: self.size,
            })
    }
}

#[derive(Debug, Default)]
pub struct CollectedCells {
    /// Stack cells of each function.
    pub stack: IndexMap<FuncRef, Vec<Cell>>,
    pub globals: Vec<Cell>,
}

impl CollectedCells {
    pub fn len(&self) -> usize {
        self.globals.len() + self.stack.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AccessFlags {
    is_load: bool,
    is_store: bool,
    is_atomic: bool,
    is_volatile: bool,
}

impl From<Intrinsic> for AccessFlags {
    fn from(intrinsic: Intrinsic) -> Self {
        Self {
            is_load: intrinsic.is_load(),
            is_store: intrinsic.is_store(),
            is_atomic: intrinsic.is_atomic(),
            is_volatile: intrinsic.is_volatile(),
        }
    }
}

pub struct CellCollector<'a, P: ?Sized> {
    program: &'a P,
    prefix: &'a str,
    cells: CollectedCells,
    seen: FxHashSet<(FuncRef, InstId, ValueId, Type)>,
}

impl<'a, P> CellCollector<'a, P>
where
    P: Program + ?Sized,
{
    pub fn new(program: &'a P, config: &'a RecoveryConfig) -> Self {
        Self {
            program,
            prefix: &config.intrinsic_prefix,
            cells: CollectedCells::default(),
            seen: FxHashSet::default(),
        }
    }

    pub fn collect(mut self, module: &mut Module) -> Result<CollectedCells, RecoveryError> {
        let funcs: Vec<_> = module
            .iter_functions()
            .filter(|&func| module.funcs[func].has_body())
            .collect();

        for func in funcs {
            materialize_exprs(&mut module.funcs[func]);
            self.collect_func(module, func)?;
        }

        Ok(self.cells)
    }

    fn collect_func(&mut self, module: &Module, func: FuncRef) -> Result<(), RecoveryError> {
        let function = &module.funcs[func];
        let dfg = &function.dfg;
        let insts: Vec<_> = function
            .layout
            .iter_block()
            .flat_map(|block| function.layout.iter_inst(block))
            .collect();

        let mut deferred = Vec::new();
        for inst in insts {
            match dfg.inst(inst) {
                InstData::Call { func: callee, args, .. } => {
                    let name = module.funcs[*callee].sig.name();
                    match Intrinsic::parse(name, self.prefix) {
                        Some(intrinsic) if intrinsic.accesses_memory() => {
                            let Some(&addr) = args.get(1) else {
                                continue;
                            };
                            let ty = intrinsic_access_type(module, function, inst, intrinsic);
                            self.add_cells(module, func, inst, addr, ty, intrinsic.into())?;
                        }
                        Some(_) => {}
                        None => deferred.push(inst),
                    }
                }

                InstData::Cast {
                    code: CastOp::IntToPtr,
                    args,
                    ty,
                } => {
                    if let Some(pointee) = module.types.deref(*ty) {
                        self.add_cells(module, func, inst, args[0], pointee, AccessFlags::default())?;
                    }
                }

                InstData::Cast {
                    code: CastOp::Bitcast,
                    args,
                    ty,
                } if module.types.is_ptr(*ty) => {
                    let pointee = upstream_ptr_type(dfg, &module.types, args[0])
                        .and_then(|ptr| module.types.deref(ptr));
                    if let Some(pointee) = pointee {
                        self.add_cells(module, func, inst, args[0], pointee, AccessFlags::default())?;
                    }
                }

                _ => {}
            }
        }

        for inst in deferred {
            for &arg in dfg.inst(inst).args() {
                if let Some(pointee) = module.types.deref(dfg.value_ty(arg)) {
                    self.add_cells(module, func, inst, arg, pointee, AccessFlags::default())?;
                }
            }
        }

        Ok(())
    }

    fn add_cells(
        &mut self,
        module: &Module,
        func: FuncRef,
        user: InstId,
        addr: ValueId,
        ty: Type,
        flags: AccessFlags,
    ) -> Result<(), RecoveryError> {
        let function = &module.funcs[func];
        let size = access_size(module, function, ty)?;

        for (user, value) in trace_constant_bases(&function.dfg, user, addr) {
            let Some(imm) = function.dfg.value_imm(value) else {
                continue;
            };
            if !self.seen.insert((func, user, value, ty)) {
                continue;
            }

            let address = imm.as_u64();
            let cell = Cell {
                func,
                address,
                ty,
                size,
                is_load: flags.is_load,
                is_store: flags.is_store,
                is_atomic: flags.is_atomic,
                is_volatile: flags.is_volatile,
                user,
                value,
            };

            match self.program.find_byte(address) {
                ByteKind::Stack => self.cells.stack.entry(func).or_default().push(cell),
                ByteKind::Global | ByteKind::Code => self.cells.globals.push(cell),
                ByteKind::Unknown => {
                    debug!(
                        "dropping access to unclassified address {address:#x} in `{}`",
                        function.sig.name()
                    );
                }
            }
        }

        Ok(())
    }
}

/// Type of the value an intrinsic call moves, preferring what the surrounding
/// code reinterprets it as.
fn intrinsic_access_type(
    module: &Module,
    function: &Function,
    inst: InstId,
    intrinsic: Intrinsic,
) -> Type {
    let dfg = &function.dfg;
    let args = dfg.inst(inst).args();
    let fallback = intrinsic.width().map_or(Type::I8, |width| width.ty());

    let ty = match intrinsic {
        Intrinsic::ReadMemory(_) | Intrinsic::ReadIoPort(_) => dfg
            .inst_result(inst)
            .map(|result| downstream_type(dfg, result).unwrap_or_else(|| dfg.value_ty(result))),
        Intrinsic::WriteMemory(_) | Intrinsic::WriteIoPort(_) => {
            args.get(2).map(|&value| upstream_type(dfg, value))
        }
        Intrinsic::CompareExchange(_) => args.get(3).map(|&value| upstream_type(dfg, value)),
        Intrinsic::FetchAndUpdate(..) => args
            .get(2)
            .and_then(|&value| upstream_ptr_type(dfg, &module.types, value))
            .and_then(|ptr| module.types.deref(ptr)),
        Intrinsic::Barrier(_) => None,
    };

    ty.unwrap_or(fallback)
}

/// Allocation size of an access. Functions are accessed through their address.
fn access_size(module: &Module, function: &Function, ty: Type) -> Result<u64, RecoveryError> {
    let dl = module.isa.data_layout();
    if module.types.is_func(ty) {
        return Ok(dl.pointer_bytes() as u64);
    }

    dl.alloc_size(ty, &module.types)
        .map(|size| size as u64)
        .map_err(|_| RecoveryError::UnsizedType {
            func: function.sig.name().to_string(),
            ty: module.types.display(ty).to_string(),
        })
}

/// Turns constant-expression operands into instructions placed before their
/// user. Incoming values of a phi are placed before the terminator of the
/// incoming block.
pub fn materialize_exprs(func: &mut Function) {
    let insts: Vec<_> = func
        .layout
        .iter_block()
        .flat_map(|block| func.layout.iter_inst(block))
        .collect();

    for inst in insts {
        let data = func.dfg.inst(inst);
        let has_expr = data
            .args()
            .iter()
            .any(|&arg| matches!(func.dfg.value(arg), Value::Expr { .. }));
        if !has_expr {
            continue;
        }

        let places: SmallVec<[Option<InstId>; 8]> = match data.phi_args() {
            Some(incoming) => incoming
                .map(|(_, block)| func.layout.last_inst_of(block))
                .collect(),
            None => data.args().iter().map(|_| Some(inst)).collect(),
        };

        let mut data = data.clone();
        for (idx, place) in places.into_iter().enumerate() {
            let arg = data.args()[idx];
            if let Some(place) = place {
                data.args_mut()[idx] = materialize(func, arg, place);
            }
        }
        func.dfg.replace_inst(inst, data);
    }
}

fn materialize(func: &mut Function, value: ValueId, before: InstId) -> ValueId {
    let Value::Expr { expr, ty } = func.dfg.value(value).clone() else {
        return value;
    };

    let data = match expr {
        ConstExpr::Cast { code, arg } => {
            let arg = materialize(func, arg, before);
            InstData::cast(code, arg, ty)
        }
        ConstExpr::Binary { code, args } => {
            let lhs = materialize(func, args[0], before);
            let rhs = materialize(func, args[1], before);
            InstData::binary(code, lhs, rhs)
        }
    };
    insert_before(func, before, data, ty)
}

#[cfg(test)]
mod tests {
    use relift_ir::builder::test_util::*;

    use super::*;
    use crate::program::AddressSpace;

    fn space() -> AddressSpace {
        let mut space = AddressSpace::new();
        space.map(0x1000, 0x1000, ByteKind::Code);
        space.map(0x2000, 0x1000, ByteKind::Global);
        space.map(0x7000, 0x1000, ByteKind::Stack);
        space
    }

    #[test]
    fn materializes_exprs() {
        let mut mb = TestModuleBuilder::new();
        let mut builder = mb.func_builder(&[], Type::I32);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);

        let base = builder.make_imm_value(0x2000i64);
        let disp = builder.make_imm_value(4i64);
        let sum = builder.make_expr_value(
            ConstExpr::Binary {
                code: relift_ir::BinaryOp::Add,
                args: [base, disp],
            },
            Type::I64,
        );
        let ptr_ty = builder.ptr_type(Type::I32);
        let ptr = builder.make_expr_value(
            ConstExpr::Cast {
                code: CastOp::IntToPtr,
                arg: sum,
            },
            ptr_ty,
        );
        let v = builder.load(ptr, Type::I32);
        builder.ret(Some(v));
        let func_ref = builder.func_ref();
        builder.finish();

        let mut module = mb.build();
        materialize_exprs(&mut module.funcs[func_ref]);
        assert_eq!(
            dump_func(&module, func_ref),
            "func public %test_func() -> i32 {
    block0:
        v5.i64 = add 8192.i64 4.i64;
        v6.*i32 = inttoptr v5;
        v4.i32 = load v6;
        return v4;
}
"
        );
    }

    #[test]
    fn classifies_cells() {
        let mut mb = TestModuleBuilder::new();
        let mem_ty = mb.module_builder.ptr_type(Type::I8);
        mb.declare("__relift_read_memory_32", &[mem_ty, Type::I64], Type::I32);
        mb.declare("__relift_write_memory_64", &[mem_ty, Type::I64, Type::I64], mem_ty);
        let ptr_i16 = mb.module_builder.ptr_type(Type::I16);
        mb.declare("callee", &[ptr_i16], Type::Unit);

        let mut builder = mb.func_builder(&[mem_ty], Type::Unit);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let mem = builder.args()[0];
        let read = builder.module_builder.lookup_func("__relift_read_memory_32").unwrap();
        let write = builder.module_builder.lookup_func("__relift_write_memory_64").unwrap();
        let callee = builder.module_builder.lookup_func("callee").unwrap();

        let global = builder.make_imm_value(0x2010i64);
        let stack = builder.make_imm_value(0x7ff0i64);
        let unknown = builder.make_imm_value(0x9000i64);
        let code = builder.make_imm_value(0x1200i64);

        builder.call(read, &[mem, global]);
        let ptr_f64 = builder.ptr_type(Type::F64);
        let fp = builder.int_to_ptr(code, ptr_f64);
        let fp_int = builder.ptr_to_int(fp, Type::I64);
        builder.call(write, &[mem, stack, fp_int]);
        builder.call(read, &[mem, unknown]);
        let arg = builder.int_to_ptr(stack, ptr_i16);
        builder.call(callee, &[arg]);
        builder.ret(None);
        let func = builder.func_ref();
        builder.finish();

        let mut module = mb.build();
        let config = RecoveryConfig::default();
        let cells = CellCollector::new(&space(), &config)
            .collect(&mut module)
            .unwrap();

        let globals: Vec<_> = cells.globals.iter().map(|c| (c.address, c.ty, c.size)).collect();
        assert_eq!(globals, vec![(0x2010, Type::I32, 4), (0x1200, Type::F64, 8)]);
        assert!(cells.globals[0].is_load && !cells.globals[0].is_store);

        let stack_cells = &cells.stack[&func];
        let written = stack_cells.iter().find(|c| c.is_store).unwrap();
        assert_eq!(written.address, 0x7ff0);
        assert_eq!(written.ty, Type::I64);
        assert_eq!(written.size, 8);

        assert!(stack_cells.iter().any(|c| c.ty == Type::I16 && c.size == 2));
        // The call argument is the same access as the `inttoptr` feeding it.
        assert_eq!(stack_cells.len(), 2);
        assert_eq!(cells.len(), 4);
    }

    #[test]
    fn unsized_access_is_fatal() {
        let mut mb = TestModuleBuilder::new();
        let mut builder = mb.func_builder(&[], Type::Unit);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let addr = builder.make_imm_value(0x2000i64);
        let ptr_unit = builder.ptr_type(Type::Unit);
        builder.int_to_ptr(addr, ptr_unit);
        builder.ret(None);
        builder.finish();

        let mut module = mb.build();
        let config = RecoveryConfig::default();
        let err = CellCollector::new(&space(), &config)
            .collect(&mut module)
            .unwrap_err();
        assert_eq!(
            err,
            RecoveryError::UnsizedType {
                func: "test_func".to_string(),
                ty: "unit".to_string()
            }
        );
    }
}
