//! JSON records for declarations.
//!
//! Types are written in the IR type syntax, except that structs carry their
//! body (`@name{i32, i8}`, or `@name<{i32, i8}>` when packed) so a record can
//! be read back into a module that has never seen the struct.
use relift_ir::{CompoundType, Linkage, Signature, Type, TypeStore};
use serde::{Deserialize, Serialize};

use crate::{
    decl::{FunctionDecl, GlobalVarDecl, Location, ParameterDecl, ValueDecl},
    error::DeclParseError,
    syntax::parse_type,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub register: String,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub name: String,
    #[serde(flatten)]
    pub value: ValueRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnStackPointerRecord {
    pub register: String,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub address: u64,
    pub name: String,
    pub parameters: Vec<ParameterRecord>,
    pub return_values: Vec<ValueRecord>,
    pub return_address: ValueRecord,
    pub return_stack_pointer: ReturnStackPointerRecord,
    pub num_bytes_in_redzone: u64,
    pub is_variadic: bool,
    pub is_noreturn: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub address: u64,
}

impl ValueDecl {
    pub fn to_record(&self, types: &TypeStore) -> ValueRecord {
        let (register, memory) = match &self.location {
            Location::Register(register) => (Some(register.clone()), None),
            Location::Memory { base, offset } => (
                None,
                Some(MemoryRecord {
                    register: base.clone(),
                    offset: *offset,
                }),
            ),
        };

        ValueRecord {
            ty: spell_type(self.ty, types),
            register,
            memory,
        }
    }

    pub fn from_record(
        record: &ValueRecord,
        types: &mut TypeStore,
    ) -> Result<Self, DeclParseError> {
        let location = match (&record.register, &record.memory) {
            (Some(register), None) => Location::Register(register.clone()),
            (None, Some(memory)) => Location::Memory {
                base: memory.register.clone(),
                offset: memory.offset,
            },
            _ => return Err(DeclParseError::AmbiguousLocation),
        };

        Ok(Self {
            location,
            ty: parse_type(&record.ty, types)?,
        })
    }
}

impl FunctionDecl {
    pub fn to_record(&self, types: &TypeStore) -> FunctionRecord {
        FunctionRecord {
            address: self.address,
            name: self.name().to_string(),
            parameters: self
                .params
                .iter()
                .map(|param| ParameterRecord {
                    name: param.name.clone(),
                    value: param.value.to_record(types),
                })
                .collect(),
            return_values: self.returns.iter().map(|ret| ret.to_record(types)).collect(),
            return_address: self.return_address.to_record(types),
            return_stack_pointer: ReturnStackPointerRecord {
                register: self.return_stack_pointer.clone(),
                offset: self.return_stack_pointer_offset,
            },
            num_bytes_in_redzone: self.num_bytes_in_redzone,
            is_variadic: self.is_variadic(),
            is_noreturn: self.is_noreturn(),
        }
    }

    /// Rebuilds a declaration. The signature is derived from the located
    /// parameters and return values; several return values become a struct
    /// named `{name}.ret`.
    pub fn from_record(
        record: &FunctionRecord,
        types: &mut TypeStore,
    ) -> Result<Self, DeclParseError> {
        let params = record
            .parameters
            .iter()
            .map(|param| -> Result<_, DeclParseError> {
                Ok(ParameterDecl {
                    name: param.name.clone(),
                    value: ValueDecl::from_record(&param.value, types)?,
                })
            })
            .collect::<Result<Vec<_>, DeclParseError>>()?;
        let returns = record
            .return_values
            .iter()
            .map(|ret| ValueDecl::from_record(ret, types))
            .collect::<Result<Vec<_>, _>>()?;
        let return_address = ValueDecl::from_record(&record.return_address, types)?;

        let args: Vec<_> = params.iter().map(|param| param.value.ty).collect();
        let ret_ty = match returns.as_slice() {
            [] => Type::Unit,
            [ret] => ret.ty,
            rets => {
                let fields: Vec<_> = rets.iter().map(|ret| ret.ty).collect();
                return_struct(&record.name, &fields, types)
            }
        };
        let sig = Signature::new(&record.name, Linkage::External, &args, ret_ty)
            .with_variadic(record.is_variadic)
            .with_noreturn(record.is_noreturn);

        Ok(Self {
            address: record.address,
            sig,
            return_address,
            return_stack_pointer: record.return_stack_pointer.register.clone(),
            return_stack_pointer_offset: record.return_stack_pointer.offset,
            params,
            returns,
            num_bytes_in_redzone: record.num_bytes_in_redzone,
        })
    }

    pub fn to_json(&self, types: &TypeStore) -> Result<String, DeclParseError> {
        Ok(serde_json::to_string(&self.to_record(types))?)
    }

    pub fn from_json(src: &str, types: &mut TypeStore) -> Result<Self, DeclParseError> {
        let record: FunctionRecord = serde_json::from_str(src)?;
        Self::from_record(&record, types)
    }
}

impl GlobalVarDecl {
    pub fn to_record(&self, types: &TypeStore) -> VariableRecord {
        VariableRecord {
            name: self.name.clone(),
            ty: spell_type(self.ty, types),
            address: self.address,
        }
    }

    pub fn from_record(
        record: &VariableRecord,
        types: &mut TypeStore,
    ) -> Result<Self, DeclParseError> {
        Ok(Self {
            name: record.name.clone(),
            ty: parse_type(&record.ty, types)?,
            address: record.address,
        })
    }

    pub fn to_json(&self, types: &TypeStore) -> Result<String, DeclParseError> {
        Ok(serde_json::to_string(&self.to_record(types))?)
    }

    pub fn from_json(src: &str, types: &mut TypeStore) -> Result<Self, DeclParseError> {
        let record: VariableRecord = serde_json::from_str(src)?;
        Self::from_record(&record, types)
    }
}

fn return_struct(func_name: &str, fields: &[Type], types: &mut TypeStore) -> Type {
    let name = format!("{func_name}.ret");
    if let Some(ty) = types.lookup_struct(&name) {
        if types.struct_def(ty).is_some_and(|s| s.fields == fields && !s.packed) {
            return ty;
        }
    }

    let name = types.unique_struct_name(&name);
    types.make_struct(&name, fields, false)
}

/// Spells `ty` with struct bodies inlined.
pub fn spell_type(ty: Type, types: &TypeStore) -> String {
    let mut out = String::new();
    write_type(ty, types, &mut out);
    out
}

fn write_type(ty: Type, types: &TypeStore, out: &mut String) {
    let Type::Compound(cmpd) = ty else {
        out.push_str(&types.display(ty).to_string());
        return;
    };

    match types.resolve_compound(cmpd) {
        CompoundType::Array { elem, len } => {
            out.push('[');
            write_type(*elem, types, out);
            out.push_str(&format!("; {len}]"));
        }
        CompoundType::Vector { elem, len } => {
            out.push('<');
            write_type(*elem, types, out);
            out.push_str(&format!("; {len}>"));
        }
        CompoundType::Ptr(elem) => {
            out.push('*');
            write_type(*elem, types, out);
        }
        CompoundType::Struct(s) => {
            let (open, close) = if s.packed { ("<{", "}>") } else { ("{", "}") };
            out.push('@');
            out.push_str(&s.name);
            out.push_str(open);
            write_list(&s.fields, types, out);
            out.push_str(close);
        }
        CompoundType::Func { args, ret_ty } => {
            out.push('(');
            write_list(args, types, out);
            out.push_str(") -> ");
            write_type(*ret_ty, types, out);
        }
    }
}

fn write_list(tys: &[Type], types: &TypeStore, out: &mut String) {
    for (i, ty) in tys.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_type(*ty, types, out);
    }
}
