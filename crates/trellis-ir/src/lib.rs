//! Trellis IR core.
//!
//! An arena-backed, MLIR-style intermediate representation: operations own
//! regions, regions own blocks, blocks own an ordered list of operations.
//! Every entity lives in an [`IrContext`] and is addressed by a small
//! context-stamped handle.
//!
//! ```
//! use trellis_ir::{IrContext, PrintOptions, print_op};
//!
//! let mut ctx = IrContext::new();
//! ctx.set_allow_unregistered_dialects(true);
//! let module = trellis_ir::parse_module(&mut ctx, "\"custom.op\"() : () -> ()").unwrap();
//! let text = print_op(&ctx, module.op_ref(), &PrintOptions::default()).unwrap();
//! assert_eq!(text, "module {\n  \"custom.op\"() : () -> ()\n}");
//! ```

// === Storage ===
pub mod attributes;
pub mod context;
pub mod refs;
pub mod sequence;
pub mod symbol;
pub mod types;

// === Structure ===
pub mod insertion;
pub mod mutation;
pub mod walk;

// === Dialects and verification ===
pub mod dialect;
pub mod registry;
pub mod verify;

// === Serialization ===
pub mod bytecode;
pub mod parser;
pub mod printer;

pub mod error;

pub use attributes::{
    AttrInterner, Attribute, AttributeDict, DenseValues, HostValue, NamedAttribute,
};
pub use bytecode::{
    BytecodeConfig, BytecodeError, read_bytecode, write_bytecode, write_bytecode_to_path,
};
pub use context::{
    BlockData, ContextOptions, IrContext, LiveCounts, MAX_NESTING_DEPTH, OperationData,
    OperationState, RegionData, Use, ValueData,
};
pub use dialect::DialectOp;
pub use dialect::builtin::ModuleOp;
pub use error::{Collection, ErrorKind, IrError, Result};
pub use insertion::InsertionPoint;
pub use parser::{
    ParseError, parse_as, parse_bytes, parse_module, parse_module_named, parse_op, parse_op_named,
};
pub use printer::{
    AsmState, OpAsmPrinter, PrintOptions, print_attribute, print_location, print_op, print_type,
    print_with_state, write_asm,
};
pub use refs::{AttrRef, BlockRef, ContextHandle, ContextId, OpRef, RegionRef, TypeRef, ValueDef, ValueRef};
pub use registry::{Arity, GenericView, OpInfo, OpRegistry, OpView, RegisterMode};
pub use sequence::{Seq, SliceSpec};
pub use symbol::Symbol;
pub use types::{FloatKind, Location, Signedness, TypeData, TypeInterner};
pub use verify::{Diagnostic, Severity, VerificationError};
pub use walk::{
    WalkAction, WalkOrder, WalkOutcome, WalkResult, walk_block, walk_op, walk_region, walk_typed,
};
