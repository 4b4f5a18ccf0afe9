pub mod builder;
pub mod dfg;
pub mod func_cursor;
pub mod function;
pub mod global_variable;
pub mod inst;
pub mod ir_writer;
pub mod isa;
pub mod layout;
pub mod linkage;
pub mod module;
pub mod types;
pub mod value;

pub use dfg::{Block, BlockId, DataFlowGraph};
pub use function::{Function, Signature};
pub use global_variable::{GlobalVariable, GlobalVariableData};
pub use inst::{BinaryOp, CastOp, InstData, InstId, UnaryOp};
pub use isa::{DataLayout, TargetIsa, TypeLayoutError};
pub use layout::Layout;
pub use linkage::Linkage;
pub use module::{FuncRef, Module};
pub use types::{CompoundType, CompoundTypeRef, StructData, Type, TypeStore};
pub use value::{ConstExpr, Immediate, Value, ValueId};
