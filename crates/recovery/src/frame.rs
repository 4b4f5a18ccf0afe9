//! Stack frame synthesis.
//!
//! Every function that accesses the stack gets one packed struct covering
//! all its stack cells, allocated at the top of the entry block. Constant
//! stack addresses are then rewritten into addresses inside that allocation.
use relift_ir::{
    isa::DataLayout, module::FuncRef, CastOp, InstData, Module, Type, TypeStore, ValueId,
};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::{
    cell::Cell,
    entry::{offset_value, EntryInserter},
    error::RecoveryError,
    fields::FieldList,
    order::{sort_cells, Popularity},
};

#[derive(Debug)]
pub struct FrameLayout {
    /// Address of the first byte of the frame.
    pub base: u64,
    pub fields: FieldList,
    /// Number of cells that overlap an earlier one.
    pub skipped: usize,
}

/// Lays out sorted stack cells from `min(entry_sp, lowest cell) - redzone`
/// to `max(entry_sp, highest cell end)`.
pub fn layout_frame(
    cells: &[Cell],
    entry_sp: u64,
    redzone: u64,
    types: &mut TypeStore,
    dl: &DataLayout,
) -> Result<FrameLayout, RecoveryError> {
    let lowest = cells.iter().map(|cell| cell.address).min().unwrap_or(entry_sp);
    let base = lowest.min(entry_sp).saturating_sub(redzone);

    let mut fields = FieldList::new(base);
    let mut skipped = 0;
    let mut highest = entry_sp;
    for cell in cells {
        highest = highest.max(cell.end()?);
        if fields.end() > cell.address {
            warn!(
                "stack cell {:#x} of `{}` overlaps the frame up to {:#x}, skipping",
                cell.address,
                types.display(cell.ty),
                fields.end()
            );
            skipped += 1;
            continue;
        }

        fields.pad_to(cell.address, types);
        fields.push(cell.ty, cell.size, types, dl);
    }
    fields.pad_to(highest, types);

    Ok(FrameLayout {
        base,
        fields,
        skipped,
    })
}

/// A frame placed in a function.
#[derive(Debug)]
pub struct Frame {
    pub ty: Type,
    /// The allocation and the byte pointers derived from it.
    pub pointers: Vec<ValueId>,
}

/// Builds the frame of `func` and rewrites every stack cell into it.
pub fn synthesize_frame(
    module: &mut Module,
    func: FuncRef,
    cells: &mut [Cell],
    entry_sp: Option<u64>,
    redzone: u64,
    entry: &mut EntryInserter,
) -> Result<Frame, RecoveryError> {
    let name = module.funcs[func].sig.name().to_string();
    let Some(entry_sp) = entry_sp else {
        return Err(RecoveryError::MissingStackPointer(name));
    };

    let dl = module.isa.data_layout();
    let popularity = Popularity::new(cells);
    sort_cells(cells, &popularity, &module.types, &dl);

    let layout = layout_frame(cells, entry_sp, redzone, &mut module.types, &dl)?;
    let frame_name = module.types.unique_struct_name(&format!("{name}.frame"));
    let frame_ty = module
        .types
        .make_struct(&frame_name, &layout.fields.types(), true);
    debug!(
        "`{name}`: frame of {} bytes, {} cells, {} skipped",
        layout.fields.end() - layout.base,
        cells.len(),
        layout.skipped
    );

    let frame_ptr_ty = module.types.make_ptr(frame_ty);
    let byte_ptr_ty = module.types.make_ptr(Type::I8);
    let alloca = InstData::Alloca { ty: frame_ty };
    let frame_ptr = entry.insert(module, func, alloca, frame_ptr_ty)?;
    let byte_ptr = entry.insert(
        module,
        func,
        InstData::cast(CastOp::Bitcast, frame_ptr, byte_ptr_ty),
        byte_ptr_ty,
    )?;

    let mut pointers = vec![frame_ptr];
    let mut memo: FxHashMap<(u64, Type), ValueId> = FxHashMap::default();
    for cell in cells.iter() {
        let int_ty = module.funcs[func].dfg.value_ty(cell.value);
        let rewritten = match memo.get(&(cell.address, int_ty)) {
            Some(&rewritten) => rewritten,
            None => {
                let offset = offset_value(module, func, (cell.address - layout.base) as i64);
                let gep = InstData::gep(&[byte_ptr, offset]);
                let ptr = entry.insert(module, func, gep, byte_ptr_ty)?;
                let cast = InstData::cast(CastOp::PtrToInt, ptr, int_ty);
                let int = entry.insert(module, func, cast, int_ty)?;
                pointers.push(ptr);
                memo.insert((cell.address, int_ty), int);
                int
            }
        };

        module.funcs[func]
            .dfg
            .replace_inst_value(cell.user, cell.value, rewritten);
    }

    Ok(Frame {
        ty: frame_ty,
        pointers,
    })
}
