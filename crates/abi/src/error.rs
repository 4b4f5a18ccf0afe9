use relift_ir::TypeLayoutError;
use thiserror::Error;

use crate::syntax::Rule;

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("`{func}` returns `{ty}`, which `{convention}` cannot return")]
    UnsupportedReturnType {
        func: String,
        ty: String,
        convention: String,
    },

    #[error(transparent)]
    TypeLayout(#[from] TypeLayoutError),
}

#[derive(Debug, Error)]
pub enum DeclParseError {
    #[error("invalid type spelling\n{0}")]
    Syntax(Box<pest::error::Error<Rule>>),

    #[error("malformed type `{0}`")]
    MalformedType(String),

    #[error("unknown struct `@{0}`")]
    UnknownStruct(String),

    #[error("struct `@{0}` conflicts with an existing definition")]
    ConflictingStruct(String),

    #[error("a value must be located in exactly one of a register or memory")]
    AmbiguousLocation,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
