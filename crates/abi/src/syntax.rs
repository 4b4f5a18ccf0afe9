//! Grammar of type spellings in declaration records.
use pest::{iterators::Pair, Parser as _};
use relift_ir::{StructData, Type, TypeStore};

use crate::error::DeclParseError;

#[derive(pest_derive::Parser)]
#[grammar = "type.pest"]
pub struct Parser;

/// Parses a type spelled by [`crate::spell_type`], declaring structs that
/// `types` doesn't know yet.
pub fn parse_type(src: &str, types: &mut TypeStore) -> Result<Type, DeclParseError> {
    let mut pairs = Parser::parse(Rule::type_spelling, src)
        .map_err(|err| DeclParseError::Syntax(Box::new(err)))?;
    let pair = pairs
        .next()
        .ok_or_else(|| DeclParseError::MalformedType(src.to_string()))?;

    TypeBuilder { src, types }.build(pair)
}

struct TypeBuilder<'a> {
    src: &'a str,
    types: &'a mut TypeStore,
}

impl TypeBuilder<'_> {
    fn build(&mut self, pair: Pair<'_, Rule>) -> Result<Type, DeclParseError> {
        let rule = pair.as_rule();
        let text = pair.as_str();
        let mut inner = pair.into_inner();

        match rule {
            Rule::primitive_type => self.primitive(text),

            Rule::ptr_type => {
                let elem = self.next_type(&mut inner)?;
                Ok(self.types.make_ptr(elem))
            }

            Rule::array_type | Rule::vector_type => {
                let elem = self.next_type(&mut inner)?;
                let len = inner
                    .next()
                    .and_then(|len| len.as_str().parse().ok())
                    .ok_or_else(|| self.malformed())?;
                if rule == Rule::array_type {
                    Ok(self.types.make_array(elem, len))
                } else {
                    Ok(self.types.make_vector(elem, len))
                }
            }

            Rule::func_type => {
                let args = match inner.next() {
                    Some(list) => self.list(list)?,
                    None => return Err(self.malformed()),
                };
                let ret_ty = self.next_type(&mut inner)?;
                Ok(self.types.make_func(&args, ret_ty))
            }

            Rule::struct_type => {
                let name = inner.next().ok_or_else(|| self.malformed())?.as_str();
                let Some(body) = inner.next() else {
                    return self
                        .types
                        .lookup_struct(name)
                        .ok_or_else(|| DeclParseError::UnknownStruct(name.to_string()));
                };
                let packed = body.as_rule() == Rule::packed_struct_body;
                let fields = match body.into_inner().next() {
                    Some(list) => self.list(list)?,
                    None => return Err(self.malformed()),
                };
                self.declare_struct(name, fields, packed)
            }

            _ => Err(self.malformed()),
        }
    }

    fn next_type<'i>(
        &mut self,
        pairs: &mut impl Iterator<Item = Pair<'i, Rule>>,
    ) -> Result<Type, DeclParseError> {
        match pairs.next() {
            Some(pair) => self.build(pair),
            None => Err(self.malformed()),
        }
    }

    fn list(&mut self, list: Pair<'_, Rule>) -> Result<Vec<Type>, DeclParseError> {
        list.into_inner().map(|pair| self.build(pair)).collect()
    }

    fn primitive(&self, text: &str) -> Result<Type, DeclParseError> {
        let ty = match text {
            "i1" => Type::I1,
            "i8" => Type::I8,
            "i16" => Type::I16,
            "i32" => Type::I32,
            "i64" => Type::I64,
            "i128" => Type::I128,
            "f32" => Type::F32,
            "f64" => Type::F64,
            "f80" => Type::F80,
            "unit" => Type::Unit,
            _ => return Err(self.malformed()),
        };
        Ok(ty)
    }

    /// Reuses a known struct of the same body, or declares it.
    fn declare_struct(
        &mut self,
        name: &str,
        fields: Vec<Type>,
        packed: bool,
    ) -> Result<Type, DeclParseError> {
        match self.types.lookup_struct(name) {
            Some(existing) => {
                let expected = StructData {
                    name: name.to_string(),
                    fields,
                    packed,
                };
                if self.types.struct_def(existing) == Some(&expected) {
                    Ok(existing)
                } else {
                    Err(DeclParseError::ConflictingStruct(name.to_string()))
                }
            }
            None => Ok(self.types.make_struct(name, &fields, packed)),
        }
    }

    fn malformed(&self) -> DeclParseError {
        DeclParseError::MalformedType(self.src.to_string())
    }
}
