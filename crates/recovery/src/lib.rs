//! Memory-access recovery for lifted functions.
//!
//! Lifted code addresses memory through integer constants and width-tagged
//! intrinsics. [`recover`] gives those addresses a home: stack addresses
//! become fields of a per-function frame, absolute addresses become global
//! variables, intrinsics become loads and stores, and integer arithmetic on
//! the resulting pointers is folded back into `gep`s.
pub mod cell;
pub mod config;
pub mod entry;
pub mod error;
pub mod fields;
pub mod frame;
pub mod globals;
pub mod intrinsic;
pub mod lower;
pub mod order;
pub mod program;
pub mod rewrite;
pub mod trace;

pub use cell::{Cell, CellCollector, CollectedCells};
pub use config::RecoveryConfig;
pub use error::RecoveryError;
pub use globals::{Entity, GlobalTable};
pub use intrinsic::Intrinsic;
pub use program::{AddressSpace, ByteKind, Program};
pub use rewrite::PtrArithRewriter;

use relift_ir::{InstData, Module};
use tracing::debug;

use crate::{
    entry::EntryInserter, frame::synthesize_frame, globals::synthesize_globals,
    lower::lower_intrinsics,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub cells: usize,
    pub frames: usize,
    pub globals_created: usize,
    pub intrinsics_lowered: usize,
    pub rewrites: usize,
}

/// Recovers frames, global variables and typed memory accesses in `module`.
pub fn recover<P>(
    program: &P,
    module: &mut Module,
    config: &RecoveryConfig,
) -> Result<RecoveryStats, RecoveryError>
where
    P: Program + ?Sized,
{
    let mut table = declare_entities(program, module)?;
    let mut stats = RecoveryStats::default();

    let mut cells = CellCollector::new(program, config).collect(module)?;
    stats.cells = cells.len();

    let mut entry = EntryInserter::default();
    let mut rewriter = PtrArithRewriter::new(config.max_rewrite_rounds);

    for (&func, stack) in cells.stack.iter_mut() {
        let frame = synthesize_frame(
            module,
            func,
            stack,
            program.initial_stack_pointer(),
            config.redzone,
            &mut entry,
        )?;
        rewriter.seed(frame.pointers.into_iter().map(|ptr| (func, ptr)));
        stats.frames += 1;
    }

    let globals = synthesize_globals(module, &mut table, &mut cells.globals, &mut entry)?;
    stats.globals_created = globals.created;
    rewriter.seed(globals.pointers);

    let lowering = lower_intrinsics(module, &config.intrinsic_prefix)?;
    stats.intrinsics_lowered = lowering.lowered;
    rewriter.seed(lowering.pointers);

    seed_entity_pointers(module, &table, &mut rewriter);
    stats.rewrites = rewriter.run(module);

    debug!(
        "recovered {} cells: {} frames, {} globals created, {} intrinsics lowered, {} rewrites",
        stats.cells, stats.frames, stats.globals_created, stats.intrinsics_lowered, stats.rewrites
    );
    Ok(stats)
}

/// Declares every function and variable of `program` and places them by
/// address.
fn declare_entities<P>(program: &P, module: &mut Module) -> Result<GlobalTable, RecoveryError>
where
    P: Program + ?Sized,
{
    let mut funcs = Vec::new();
    program.for_each_function(&mut |decl| {
        funcs.push((decl.address, decl.declare_in_module(module)));
    });
    let mut vars = Vec::new();
    program.for_each_variable(&mut |decl| {
        vars.push((decl.address, decl.declare_in_module(module)));
    });

    let mut table = GlobalTable::new();
    for (address, func) in funcs {
        table.insert_function(module, address, func);
    }

    let dl = module.isa.data_layout();
    for (address, gv) in vars {
        let ty = module.gvs.ty(gv);
        let size = dl
            .alloc_size(ty, &module.types)
            .map_err(|_| RecoveryError::UnsizedVariable {
                name: module.gvs.gv_data(gv).symbol.clone(),
                ty: module.types.display(ty).to_string(),
            })?;
        table.insert_variable(module, address, gv, size as u64);
    }

    Ok(table)
}

/// Seeds addresses of placed variables, pointer arguments of placed functions
/// and pointer results of calls to them.
fn seed_entity_pointers(module: &Module, table: &GlobalTable, rewriter: &mut PtrArithRewriter) {
    let mut placed = Vec::new();
    for (_, entity) in table.iter() {
        match entity {
            Entity::Function(func) => placed.push(func),
            Entity::Variable(gv) => {
                for func in module.iter_functions() {
                    if let Some(value) = module.funcs[func].dfg.global_value_of(gv) {
                        rewriter.insert(func, value);
                    }
                }
            }
        }
    }

    for &func in &placed {
        let function = &module.funcs[func];
        if !function.has_body() {
            continue;
        }
        for &arg in &function.arg_values {
            if module.types.is_ptr(function.dfg.value_ty(arg)) {
                rewriter.insert(func, arg);
            }
        }
    }

    for func in module.iter_functions() {
        let function = &module.funcs[func];
        for block in function.layout.iter_block() {
            for inst in function.layout.iter_inst(block) {
                let InstData::Call { func: callee, .. } = function.dfg.inst(inst) else {
                    continue;
                };
                if !placed.contains(callee) {
                    continue;
                }
                if let Some(result) = function.dfg.inst_result(inst) {
                    if module.types.is_ptr(function.dfg.value_ty(result)) {
                        rewriter.insert(func, result);
                    }
                }
            }
        }
    }
}
