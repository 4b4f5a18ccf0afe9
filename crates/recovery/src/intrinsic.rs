//! Memory-access intrinsics emitted by the lifter.
//!
//! Every intrinsic takes the memory state as its first argument. Those that
//! touch memory take the address (or port) second:
//!
//! | name                 | arguments                       | result       |
//! |----------------------|---------------------------------|--------------|
//! | `read_memory_W`      | `mem, addr`                     | value        |
//! | `write_memory_W`     | `mem, addr, value`              | memory state |
//! | `compare_exchange_N` | `mem, addr, *expected, desired` | memory state |
//! | `fetch_and_OP_N`     | `mem, addr, *value`             | memory state |
//! | `read_io_port_N`     | `mem, port`                     | value        |
//! | `write_io_port_N`    | `mem, port, value`              | memory state |
//! | `barrier_KIND`       | `mem`                           | memory state |
use relift_ir::Type;

/// Width of a plain memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessWidth {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    F80,
}

impl AccessWidth {
    fn parse(s: &str) -> Option<Self> {
        let width = match s {
            "8" => Self::I8,
            "16" => Self::I16,
            "32" => Self::I32,
            "64" => Self::I64,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "f80" => Self::F80,
            _ => return None,
        };
        Some(width)
    }

    fn parse_int(s: &str) -> Option<Self> {
        Self::parse(s).filter(|width| width.ty().is_integral())
    }

    /// Type of the value in memory.
    pub fn ty(self) -> Type {
        match self {
            Self::I8 => Type::I8,
            Self::I16 => Type::I16,
            Self::I32 => Type::I32,
            Self::I64 => Type::I64,
            Self::F32 => Type::F32,
            Self::F64 => Type::F64,
            Self::F80 => Type::F80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Barrier {
    LoadLoad,
    LoadStore,
    StoreLoad,
    StoreStore,
    AtomicBegin,
    AtomicEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    ReadMemory(AccessWidth),
    WriteMemory(AccessWidth),
    CompareExchange(AccessWidth),
    FetchAndUpdate(FetchOp, AccessWidth),
    ReadIoPort(AccessWidth),
    WriteIoPort(AccessWidth),
    Barrier(Barrier),
}

impl Intrinsic {
    /// Recognizes `name` as `<prefix><family>_<width>`.
    pub fn parse(name: &str, prefix: &str) -> Option<Self> {
        let name = name.strip_prefix(prefix)?;

        if let Some(kind) = name.strip_prefix("barrier_") {
            let barrier = match kind {
                "load_load" => Barrier::LoadLoad,
                "load_store" => Barrier::LoadStore,
                "store_load" => Barrier::StoreLoad,
                "store_store" => Barrier::StoreStore,
                "atomic_begin" => Barrier::AtomicBegin,
                "atomic_end" => Barrier::AtomicEnd,
                _ => return None,
            };
            return Some(Self::Barrier(barrier));
        }

        let (family, width) = name.rsplit_once('_')?;
        let intrinsic = match family {
            "read_memory" => Self::ReadMemory(AccessWidth::parse(width)?),
            "write_memory" => Self::WriteMemory(AccessWidth::parse(width)?),
            "compare_exchange" => Self::CompareExchange(AccessWidth::parse_int(width)?),
            "read_io_port" | "write_io_port" => {
                let width = AccessWidth::parse_int(width)?;
                if width == AccessWidth::I64 {
                    return None;
                }
                if family == "read_io_port" {
                    Self::ReadIoPort(width)
                } else {
                    Self::WriteIoPort(width)
                }
            }
            _ => {
                let op = match family.strip_prefix("fetch_and_")? {
                    "add" => FetchOp::Add,
                    "sub" => FetchOp::Sub,
                    "and" => FetchOp::And,
                    "or" => FetchOp::Or,
                    "xor" => FetchOp::Xor,
                    _ => return None,
                };
                Self::FetchAndUpdate(op, AccessWidth::parse_int(width)?)
            }
        };
        Some(intrinsic)
    }

    /// Width of the accessed value. Barriers access nothing.
    pub fn width(self) -> Option<AccessWidth> {
        match self {
            Self::ReadMemory(width)
            | Self::WriteMemory(width)
            | Self::CompareExchange(width)
            | Self::FetchAndUpdate(_, width)
            | Self::ReadIoPort(width)
            | Self::WriteIoPort(width) => Some(width),
            Self::Barrier(_) => None,
        }
    }

    /// Number of arguments a call must pass: the memory state, then the
    /// address and the stored value where the intrinsic takes them.
    pub fn arity(self) -> usize {
        match self {
            Self::Barrier(_) => 1,
            Self::ReadMemory(_) | Self::ReadIoPort(_) => 2,
            Self::WriteMemory(_) | Self::WriteIoPort(_) | Self::FetchAndUpdate(..) => 3,
            Self::CompareExchange(_) => 4,
        }
    }

    /// Returns `true` if the intrinsic reads or writes memory at its second
    /// argument.
    pub fn accesses_memory(self) -> bool {
        !matches!(self, Self::Barrier(_))
    }

    /// Returns `true` if the intrinsic is replaced by native IR.
    pub fn is_lowered(self) -> bool {
        matches!(
            self,
            Self::ReadMemory(_) | Self::WriteMemory(_) | Self::Barrier(_)
        )
    }

    pub fn is_load(self) -> bool {
        matches!(
            self,
            Self::ReadMemory(_)
                | Self::ReadIoPort(_)
                | Self::CompareExchange(_)
                | Self::FetchAndUpdate(..)
        )
    }

    pub fn is_store(self) -> bool {
        matches!(
            self,
            Self::WriteMemory(_)
                | Self::WriteIoPort(_)
                | Self::CompareExchange(_)
                | Self::FetchAndUpdate(..)
        )
    }

    pub fn is_atomic(self) -> bool {
        matches!(self, Self::CompareExchange(_) | Self::FetchAndUpdate(..))
    }

    pub fn is_volatile(self) -> bool {
        matches!(self, Self::ReadIoPort(_) | Self::WriteIoPort(_))
    }
}
