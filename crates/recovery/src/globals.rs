//! Global variable synthesis.
//!
//! Global cells are grouped into runs of contiguous or overlapping bytes.
//! Every run becomes a variable unless a declared entity already covers it,
//! and constant addresses are then rewritten into references to the
//! variable or function at that address.
use std::collections::BTreeMap;

use relift_ir::{
    module::FuncRef, BinaryOp, CastOp, GlobalVariable, GlobalVariableData, Immediate, InstData,
    Linkage, Module, Type, ValueId,
};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::{
    cell::Cell,
    entry::EntryInserter,
    error::RecoveryError,
    fields::FieldList,
    order::{sort_cells, Popularity},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Function(FuncRef),
    Variable(GlobalVariable),
}

/// Entities of the module by address.
#[derive(Debug, Default)]
pub struct GlobalTable {
    /// Entity and its allocation size.
    entities: BTreeMap<u64, (Entity, u64)>,
    max_variable_size: u64,
}

impl GlobalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: u64) -> Option<Entity> {
        self.entities.get(&address).map(|&(entity, _)| entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Entity)> + '_ {
        self.entities
            .iter()
            .map(|(&address, &(entity, _))| (address, entity))
    }

    pub fn max_variable_size(&self) -> u64 {
        self.max_variable_size
    }

    /// Places `func` at `address`. A function replaces any variable there.
    pub fn insert_function(&mut self, module: &Module, address: u64, func: FuncRef) {
        let size = module.isa.data_layout().pointer_bytes() as u64;
        if let Some((old, _)) = self.entities.insert(address, (Entity::Function(func), size)) {
            if old != Entity::Function(func) {
                warn!(
                    "`{}` at {address:#x} replaces `{}`",
                    module.funcs[func].sig.name(),
                    entity_name(module, old)
                );
            }
        }
    }

    /// Places `gv` at `address` unless a function or a variable at least as
    /// large is already there. Returns `true` if `gv` was placed.
    pub fn insert_variable(
        &mut self,
        module: &Module,
        address: u64,
        gv: GlobalVariable,
        size: u64,
    ) -> bool {
        let name = &module.gvs.gv_data(gv).symbol;
        match self.entities.get(&address) {
            Some(&(Entity::Variable(old), _)) if old == gv => return true,
            Some(&(old @ Entity::Function(_), _)) => {
                warn!(
                    "`{name}` at {address:#x} collides with `{}`, dropping it",
                    entity_name(module, old)
                );
                return false;
            }
            Some(&(old, old_size)) if old_size >= size => {
                warn!(
                    "`{name}` at {address:#x} collides with the larger `{}`, dropping it",
                    entity_name(module, old)
                );
                return false;
            }
            Some(&(old, _)) => {
                warn!(
                    "`{name}` at {address:#x} replaces the smaller `{}`",
                    entity_name(module, old)
                );
            }
            None => {}
        }

        self.entities.insert(address, (Entity::Variable(gv), size));
        self.max_variable_size = self.max_variable_size.max(size);
        true
    }

    /// Returns the nearest variable starting at or below `address` that
    /// covers it. Functions never cover other addresses.
    pub fn covering_variable(&self, address: u64) -> Option<(u64, GlobalVariable)> {
        let lowest = address.saturating_sub(self.max_variable_size);
        self.entities
            .range(lowest..=address)
            .rev()
            .find_map(|(&start, &(entity, size))| match entity {
                Entity::Variable(gv) if address < start.saturating_add(size) => Some((start, gv)),
                _ => None,
            })
    }

    fn set_size(&mut self, address: u64, size: u64) {
        if let Some((_, old)) = self.entities.get_mut(&address) {
            *old = size;
            self.max_variable_size = self.max_variable_size.max(size);
        }
    }
}

fn entity_name(module: &Module, entity: Entity) -> &str {
    match entity {
        Entity::Function(func) => module.funcs[func].sig.name(),
        Entity::Variable(gv) => &module.gvs.gv_data(gv).symbol,
    }
}

/// Contiguous bytes accessed by global cells.
#[derive(Debug)]
struct Run {
    fields: FieldList,
    packed: bool,
}

#[derive(Debug, Default)]
pub struct GlobalSynthesis {
    pub created: usize,
    /// Address values placed by resolution.
    pub pointers: Vec<(FuncRef, ValueId)>,
}

/// Declares variables for the runs of `cells` and rewrites every cell into a
/// reference to the entity covering it.
pub fn synthesize_globals(
    module: &mut Module,
    table: &mut GlobalTable,
    cells: &mut [Cell],
    entry: &mut EntryInserter,
) -> Result<GlobalSynthesis, RecoveryError> {
    let dl = module.isa.data_layout();
    let mut popularity = Popularity::new(cells);
    for (address, entity) in table.iter() {
        match entity {
            Entity::Function(func) => {
                let func_ty = module.funcs[func].sig.func_type(&mut module.types);
                let ptr_ty = module.types.make_ptr(func_ty);
                popularity.declare_function(address, func_ty, ptr_ty);
            }
            Entity::Variable(gv) => {
                let ty = module.gvs.ty(gv);
                let size = dl.alloc_size(ty, &module.types).unwrap_or_default();
                popularity.declare_variable(address, ty, size as u64);
            }
        }
    }
    sort_cells(cells, &popularity, &module.types, &dl);

    let mut runs: Vec<Run> = Vec::new();
    for cell in cells.iter() {
        let cell_end = cell.end()?;
        match runs.last_mut() {
            Some(run) if cell.address < run.fields.end() => {
                if cell_end > run.fields.end() {
                    run.fields.pad_bytes_to(cell_end);
                    run.packed = true;
                }
            }
            Some(run) if cell.address == run.fields.end() => {
                run.fields.push(cell.ty, cell.size, &mut module.types, &dl);
            }
            _ => {
                let mut fields = FieldList::new(cell.address);
                fields.push(cell.ty, cell.size, &mut module.types, &dl);
                runs.push(Run {
                    fields,
                    packed: false,
                });
            }
        }
    }

    let mut synthesis = GlobalSynthesis::default();
    for run in runs {
        if declare_run(module, table, run) {
            synthesis.created += 1;
        }
    }

    let mut memo: FxHashMap<(FuncRef, u64, Type), ValueId> = FxHashMap::default();
    let mut bases = FxHashMap::default();
    for cell in cells.iter() {
        let int_ty = module.funcs[cell.func].dfg.value_ty(cell.value);
        let key = (cell.func, cell.address, int_ty);
        let rewritten = match memo.get(&key) {
            Some(&rewritten) => rewritten,
            None => {
                let resolved = resolve(module, table, entry, &mut bases, cell, int_ty)?;
                let Some((ptr, int)) = resolved else {
                    continue;
                };
                synthesis.pointers.push((cell.func, ptr));
                memo.insert(key, int);
                int
            }
        };

        module.funcs[cell.func]
            .dfg
            .replace_inst_value(cell.user, cell.value, rewritten);
    }

    debug!(
        "{} global cells, {} variables created, {} addresses resolved",
        cells.len(),
        synthesis.created,
        memo.len()
    );
    Ok(synthesis)
}

/// Returns `true` if a new variable was created for `run`.
fn declare_run(module: &mut Module, table: &mut GlobalTable, run: Run) -> bool {
    let dl = module.isa.data_layout();
    let start = run.fields.start();
    let size = run.fields.end() - start;
    let packed = run.packed || !run.fields.fits_natural_layout(&module.types, &dl);
    let fields = run.fields.types();

    match table.get(start) {
        Some(Entity::Function(func)) => {
            debug!(
                "{start:#x} is `{}`, no variable needed",
                module.funcs[func].sig.name()
            );
            false
        }

        Some(Entity::Variable(gv)) => {
            let old_ty = module.gvs.ty(gv);
            let old_size = dl.alloc_size(old_ty, &module.types).unwrap_or_default() as u64;
            if old_size < size {
                let symbol = module.gvs.gv_data(gv).symbol.clone();
                let name = module.types.unique_struct_name(&format!("{symbol}.ty"));
                let ty = module.types.make_struct(&name, &fields, packed);
                warn!(
                    "`{symbol}` is accessed as {size} bytes but declared as `{}`, retyping",
                    module.types.display(old_ty)
                );
                module.retype_global(gv, ty);
                table.set_size(start, size);
            }
            false
        }

        None => {
            if let Some((cover, _)) = table.covering_variable(start) {
                let cover_end = table.entities[&cover].1.saturating_add(cover);
                if run.fields.end() <= cover_end {
                    return false;
                }
            }

            let base = format!("gvar_{start:x}");
            let name = module.types.unique_struct_name(&format!("{base}.ty"));
            let ty = module.types.make_struct(&name, &fields, packed);
            let symbol = module.gvs.unique_symbol(&base);
            let gv = module.make_global(GlobalVariableData::new(
                symbol,
                ty,
                Linkage::Private,
                false,
            ));
            table.insert_variable(module, start, gv, size)
        }
    }
}

/// Materializes the address of `cell` as an integer of `int_ty` at the entry
/// of its function. Returns the entity pointer and the integer.
fn resolve(
    module: &mut Module,
    table: &GlobalTable,
    entry: &mut EntryInserter,
    bases: &mut FxHashMap<(FuncRef, ValueId, Type), ValueId>,
    cell: &Cell,
    int_ty: Type,
) -> Result<Option<(ValueId, ValueId)>, RecoveryError> {
    let func = cell.func;
    let (ptr, offset) = match table.get(cell.address) {
        Some(Entity::Function(target)) => (module.func_value(func, target), 0),
        Some(Entity::Variable(gv)) => (module.global_value(func, gv), 0),
        None => {
            let Some((start, gv)) = table.covering_variable(cell.address) else {
                return Ok(None);
            };
            (module.global_value(func, gv), cell.address - start)
        }
    };

    let base = match bases.get(&(func, ptr, int_ty)) {
        Some(&base) => base,
        None => {
            let cast = InstData::cast(CastOp::PtrToInt, ptr, int_ty);
            let base = entry.insert(module, func, cast, int_ty)?;
            bases.insert((func, ptr, int_ty), base);
            base
        }
    };
    if offset == 0 {
        return Ok(Some((ptr, base)));
    }

    let Some(offset) = Immediate::from_i128(offset as i128, int_ty) else {
        return Ok(None);
    };
    let offset = module.funcs[func].dfg.make_imm_value(offset);
    let add = InstData::binary(BinaryOp::Add, base, offset);
    Ok(Some((ptr, entry.insert(module, func, add, int_ty)?)))
}
