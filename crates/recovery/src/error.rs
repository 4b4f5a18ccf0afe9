use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("`{func}` accesses memory as `{ty}`, which has no size")]
    UnsizedType { func: String, ty: String },

    #[error("variable `{name}` is declared as `{ty}`, which has no size")]
    UnsizedVariable { name: String, ty: String },

    #[error("`{0}` accesses the stack, but the initial stack pointer is unknown")]
    MissingStackPointer(String),

    #[error("intrinsic `{0}` has a body and can't be lowered")]
    IntrinsicHasBody(String),

    #[error("call to `{name}` passes {args} arguments, expected {expected}")]
    MalformedIntrinsic {
        name: String,
        args: usize,
        expected: usize,
    },

    #[error("access of {size} bytes at {address:#x} wraps around the address space")]
    AddressOverflow { address: u64, size: u64 },

    #[error("`{0}` has no body to place values in")]
    MissingBody(String),
}
