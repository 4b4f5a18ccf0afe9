use std::fmt;

/// Linkage of symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Linkage {
    /// The symbol is defined in the module and visible from the outside.
    Public,

    /// The symbol is defined in the module and only visible inside it.
    Private,

    /// The symbol is defined outside of the module. Declarations recovered
    /// from a binary start out external until a body is lifted.
    #[default]
    External,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
            Self::External => write!(f, "external"),
        }
    }
}
