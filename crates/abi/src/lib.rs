//! Calling-convention binding for lifted functions.
//!
//! A [`CallingConvention`] is a data table of register constraints. Binding a
//! signature against it yields a [`FunctionDecl`] that says where every
//! parameter and return value lives on entry and exit.
pub mod constraint;
pub mod convention;
pub mod decl;
pub mod error;
pub mod serialize;
pub mod syntax;

pub use constraint::{
    classify, try_register_allocate, AllocationState, RegisterConstraint, SizeConstraint,
    TypeConstraint, ValueClass, VariantConstraint,
};
pub use convention::CallingConvention;
pub use decl::{FunctionDecl, GlobalVarDecl, Location, ParameterDecl, ValueDecl};
pub use error::{AbiError, DeclParseError};
pub use serialize::{spell_type, FunctionRecord, ValueRecord, VariableRecord};
pub use syntax::parse_type;
