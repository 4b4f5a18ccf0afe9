//! Calling conventions as data tables, and binding signatures against them.
use relift_ir::{module::FuncRef, DataLayout, Module, Signature, Type, TypeStore};
use relift_triple::{Architecture, OperatingSystem, TargetTriple};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::{
    constraint::{
        classify, AllocationState, RegisterConstraint, SizeConstraint, TypeConstraint,
        VariantConstraint,
    },
    decl::{FunctionDecl, Location, ParameterDecl, ValueDecl},
    error::AbiError,
};

/// Name given to a return slot that the binder introduces.
pub const RETURN_SLOT_NAME: &str = "return_slot";

/// A calling convention described by its register tables and stack rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallingConvention {
    pub name: String,
    pub stack_pointer: String,
    pub param_registers: Vec<RegisterConstraint>,
    pub return_registers: Vec<RegisterConstraint>,
    /// Register that carries the address of a caller-provided return slot.
    pub struct_return_register: String,
    /// Offset from the entry stack pointer of the first stack parameter.
    pub stack_base_offset: i64,
    /// Offset from the entry stack pointer of the stack pointer after return.
    pub return_stack_pointer_offset: i64,
    /// The callee pops the hidden return slot pointer on return.
    pub callee_pops_struct_return: bool,
    /// Merge integer struct fields that share an eight-byte chunk before
    /// allocating return registers.
    pub coalesce_struct_fields: bool,
    pub redzone: u64,
}

fn gpr(narrow: &str, wide: &str) -> RegisterConstraint {
    RegisterConstraint::new(vec![
        VariantConstraint::new(narrow, TypeConstraint::INTEGRAL, SizeConstraint::MAX_32),
        VariantConstraint::new(wide, TypeConstraint::INTEGRAL, SizeConstraint::BIT_64),
    ])
}

fn xmm(name: &str) -> RegisterConstraint {
    RegisterConstraint::new(vec![
        VariantConstraint::new(
            name,
            TypeConstraint::FLOAT,
            SizeConstraint::BIT_32 | SizeConstraint::BIT_64,
        ),
        VariantConstraint::new(
            name,
            TypeConstraint::VECTOR,
            SizeConstraint::BIT_64 | SizeConstraint::BIT_128,
        ),
    ])
}

impl CallingConvention {
    /// The System V AMD64 convention.
    pub fn x86_64_sysv() -> Self {
        let mut param_registers = vec![
            gpr("EDI", "RDI"),
            gpr("ESI", "RSI"),
            gpr("EDX", "RDX"),
            gpr("ECX", "RCX"),
            gpr("R8D", "R8"),
            gpr("R9D", "R9"),
        ];
        param_registers.extend((0..8).map(|i| xmm(&format!("XMM{i}"))));

        let return_registers = vec![
            gpr("EAX", "RAX"),
            gpr("EDX", "RDX"),
            xmm("XMM0"),
            xmm("XMM1"),
            RegisterConstraint::new(vec![VariantConstraint::new(
                "ST0",
                TypeConstraint::FLOAT,
                SizeConstraint::BIT_80,
            )]),
        ];

        Self {
            name: "x86_64_sysv".to_string(),
            stack_pointer: "RSP".to_string(),
            param_registers,
            return_registers,
            struct_return_register: "RAX".to_string(),
            stack_base_offset: 8,
            return_stack_pointer_offset: 8,
            callee_pops_struct_return: false,
            coalesce_struct_fields: true,
            redzone: 128,
        }
    }

    /// The 32-bit x86 cdecl convention. All parameters go on the stack.
    pub fn x86_cdecl() -> Self {
        let integral_32 = |name: &str| {
            RegisterConstraint::new(vec![VariantConstraint::new(
                name,
                TypeConstraint::INTEGRAL,
                SizeConstraint::MAX_32,
            )])
        };

        let return_registers = vec![
            integral_32("EAX"),
            integral_32("EDX"),
            RegisterConstraint::new(vec![VariantConstraint::new(
                "ST0",
                TypeConstraint::FLOAT,
                SizeConstraint::BIT_32 | SizeConstraint::BIT_64 | SizeConstraint::BIT_80,
            )]),
            RegisterConstraint::new(vec![VariantConstraint::new(
                "MM0",
                TypeConstraint::VECTOR,
                SizeConstraint::BIT_64,
            )]),
        ];

        Self {
            name: "x86_cdecl".to_string(),
            stack_pointer: "ESP".to_string(),
            param_registers: vec![],
            return_registers,
            struct_return_register: "EAX".to_string(),
            stack_base_offset: 4,
            return_stack_pointer_offset: 4,
            callee_pops_struct_return: true,
            coalesce_struct_fields: false,
            redzone: 0,
        }
    }

    /// Returns the default convention of `triple`, if one is known.
    pub fn for_triple(triple: TargetTriple) -> Option<Self> {
        match (triple.architecture, triple.operating_system) {
            (Architecture::X86_64, OperatingSystem::Windows) => None,
            (Architecture::X86_64, _) => Some(Self::x86_64_sysv()),
            (Architecture::X86, _) => Some(Self::x86_cdecl()),
        }
    }

    /// Binds the signature of `func` to locations.
    pub fn allocate_signature(
        &self,
        module: &mut Module,
        func: FuncRef,
        address: u64,
    ) -> Result<FunctionDecl, AbiError> {
        let dl = module.isa.data_layout();
        let function = &module.funcs[func];
        let sig = function.sig.clone();
        let arg_names = function.arg_names.clone();
        self.bind_signature(&sig, &arg_names, address, &mut module.types, &dl)
    }

    /// Binds `sig` to locations. `arg_names` maps argument positions to
    /// source-level names.
    pub fn bind_signature(
        &self,
        sig: &Signature,
        arg_names: &FxHashMap<usize, String>,
        address: u64,
        types: &mut TypeStore,
        dl: &DataLayout,
    ) -> Result<FunctionDecl, AbiError> {
        let mut returns = Vec::new();
        let mut return_slot = None;
        let mut hidden_return = false;

        if let Some(idx) = sig.struct_ret() {
            returns.push(ValueDecl::register(
                &self.struct_return_register,
                sig.args()[idx],
            ));
            hidden_return = true;
        } else {
            match self.bind_return(sig, types, dl)? {
                ReturnBinding::Registers(values) => returns = values,
                ReturnBinding::Hidden(ty) => {
                    let ptr_ty = types.make_ptr(ty);
                    returns.push(ValueDecl::register(&self.struct_return_register, ptr_ty));
                    return_slot = Some(ty);
                    hidden_return = true;
                }
            }
        }

        let mut params = Vec::with_capacity(sig.args().len() + 1);
        let mut stack_offset = self.stack_base_offset;
        if let Some(ty) = return_slot {
            params.push(ParameterDecl {
                name: RETURN_SLOT_NAME.to_string(),
                value: ValueDecl::memory(&self.stack_pointer, stack_offset, ty),
            });
            stack_offset += dl.alloc_size(ty, types)? as i64;
        }

        let mut state = AllocationState::new(&self.param_registers);
        for (idx, &ty) in sig.args().iter().enumerate() {
            let name = arg_names
                .get(&idx)
                .cloned()
                .unwrap_or_else(|| format!("param{}", idx + 1));

            let register = classify(ty, types, dl).and_then(|class| state.try_allocate(class));
            let location = match register {
                Some(register) => Location::Register(register.to_string()),
                None => {
                    let location = Location::Memory {
                        base: self.stack_pointer.clone(),
                        offset: stack_offset,
                    };
                    stack_offset += dl.alloc_size(ty, types)? as i64;
                    location
                }
            };

            params.push(ParameterDecl {
                name,
                value: ValueDecl { location, ty },
            });
        }

        let mut return_stack_pointer_offset = self.return_stack_pointer_offset;
        if hidden_return && self.callee_pops_struct_return {
            return_stack_pointer_offset += dl.pointer_bytes() as i64;
        }

        Ok(FunctionDecl {
            address,
            sig: sig.clone(),
            return_address: ValueDecl::memory(&self.stack_pointer, 0, dl.pointer_repl()),
            return_stack_pointer: self.stack_pointer.clone(),
            return_stack_pointer_offset,
            params,
            returns,
            num_bytes_in_redzone: self.redzone,
        })
    }

    fn bind_return(
        &self,
        sig: &Signature,
        types: &TypeStore,
        dl: &DataLayout,
    ) -> Result<ReturnBinding, AbiError> {
        let ret_ty = sig.ret_ty();
        if ret_ty.is_unit() {
            return Ok(ReturnBinding::Registers(vec![]));
        }

        if types.is_struct(ret_ty) {
            return match self.split_struct(ret_ty, types, dl)? {
                Some(values) => Ok(ReturnBinding::Registers(values)),
                None => {
                    warn!(
                        func = sig.name(),
                        convention = %self.name,
                        "struct return does not fit in registers, returning through memory"
                    );
                    Ok(ReturnBinding::Hidden(ret_ty))
                }
            };
        }

        if let Some(class) = classify(ret_ty, types, dl) {
            let mut state = AllocationState::new(&self.return_registers);
            if let Some(register) = state.try_allocate(class) {
                return Ok(ReturnBinding::Registers(vec![ValueDecl::register(
                    register, ret_ty,
                )]));
            }

            if let Some(values) = self.split_wide_integer(ret_ty, dl) {
                return Ok(ReturnBinding::Registers(values));
            }
        }

        Err(AbiError::UnsupportedReturnType {
            func: sig.name().to_string(),
            ty: types.display(ret_ty).to_string(),
            convention: self.name.clone(),
        })
    }

    /// Assigns one return register per field of the struct `ty`. Returns
    /// `None` if some field does not fit.
    fn split_struct(
        &self,
        ty: Type,
        types: &TypeStore,
        dl: &DataLayout,
    ) -> Result<Option<Vec<ValueDecl>>, AbiError> {
        let pieces = if self.coalesce_struct_fields {
            coalesce_fields(ty, types, dl)?
        } else {
            struct_fields(ty, types)
        };

        let mut state = AllocationState::new(&self.return_registers);
        let mut values = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let Some(class) = classify(piece, types, dl) else {
                return Ok(None);
            };
            let Some(register) = state.try_allocate(class) else {
                return Ok(None);
            };
            values.push(ValueDecl::register(register, piece));
        }

        Ok(Some(values))
    }

    /// Splits an integer wider than any return register into pointer-sized
    /// pieces, e.g. `i64` into `EAX:EDX` on 32-bit targets.
    fn split_wide_integer(&self, ty: Type, dl: &DataLayout) -> Option<Vec<ValueDecl>> {
        let bits = ty.bits().filter(|_| ty.is_integral())?;
        let piece_bits = dl.pointer_bytes() * 8;
        if bits <= piece_bits || bits % piece_bits != 0 {
            return None;
        }

        let piece_ty = dl.pointer_repl();
        let class = classify(piece_ty, &TypeStore::default(), dl)?;
        let mut state = AllocationState::new(&self.return_registers);
        (0..bits / piece_bits)
            .map(|_| {
                state
                    .try_allocate(class)
                    .map(|register| ValueDecl::register(register, piece_ty))
            })
            .collect()
    }
}

enum ReturnBinding {
    Registers(Vec<ValueDecl>),
    /// Returned through a caller-provided slot of the given type.
    Hidden(Type),
}

fn struct_fields(ty: Type, types: &TypeStore) -> Vec<Type> {
    types
        .struct_def(ty)
        .map(|s| s.fields.clone())
        .unwrap_or_default()
}

/// Merges runs of integer fields that share an eight-byte chunk into a single
/// integer. Fields straddling a chunk boundary disable merging.
fn coalesce_fields(ty: Type, types: &TypeStore, dl: &DataLayout) -> Result<Vec<Type>, AbiError> {
    const CHUNK: usize = 8;

    let fields = struct_fields(ty, types);
    let mut spans = Vec::with_capacity(fields.len());
    for (idx, &field) in fields.iter().enumerate() {
        let offset = dl.field_offset(ty, idx, types)?;
        let size = dl.size_of(field, types)?;
        if size == 0 || offset / CHUNK != (offset + size - 1) / CHUNK {
            return Ok(fields);
        }
        spans.push((offset, size));
    }

    let mut pieces = Vec::with_capacity(fields.len());
    let mut start = 0;
    while start < fields.len() {
        let chunk = spans[start].0 / CHUNK;
        let mut end = start + 1;
        while end < fields.len() && spans[end].0 / CHUNK == chunk {
            end += 1;
        }

        let group = &fields[start..end];
        let integral = group
            .iter()
            .all(|&field| field.is_integral() || types.is_ptr(field));
        if group.len() > 1 && integral {
            let (first_offset, _) = spans[start];
            let (last_offset, last_size) = spans[end - 1];
            let bytes = (last_offset + last_size - first_offset).next_power_of_two();
            match Type::int_of_bytes(bytes) {
                Some(merged) => pieces.push(merged),
                None => pieces.extend_from_slice(group),
            }
        } else {
            pieces.extend_from_slice(group);
        }
        start = end;
    }

    Ok(pieces)
}
