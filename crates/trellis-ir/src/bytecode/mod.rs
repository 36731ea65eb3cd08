//! Binary serialization of operation trees.
//!
//! ## Wire format
//!
//! ```text
//! magic "TR\xEFB" | version (varint)
//! [v2+] string table: count | (len | utf-8 bytes)*
//! types:      count | type*       (operands refer to earlier entries)
//! attributes: count | attribute*  (likewise)
//! resources:  count | (name | len | bytes)*
//! root operation
//! ```
//!
//! Strings are inline (`len | bytes`) in version 1 and string-table indices
//! in version 2. Integers are LEB128 varints; signed values are zigzagged.
//!
//! Values and blocks are numbered in definition order: an operation's
//! results right after its header, a region's block arguments before any
//! of its operations. A use of a value not yet defined carries its type so
//! the reader can bind a placeholder.

mod reader;
mod varint;
mod writer;

use std::io::Write;
use std::path::Path;

use derive_more::{Display, Error};
use tracing::debug;

use crate::context::IrContext;
use crate::error::Result;
use crate::refs::OpRef;

/// Leading bytes of every bytecode buffer.
pub const MAGIC: [u8; 4] = [0x54, 0x52, 0xEF, 0x42];

/// Oldest version the reader and writer understand.
pub const MIN_VERSION: u32 = 1;

/// Version written by default.
pub const CURRENT_VERSION: u32 = 2;

/// Bytecode writer configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BytecodeConfig {
    /// Format version to emit.
    pub version: u32,
}

impl Default for BytecodeConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
        }
    }
}

impl BytecodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

/// Malformed or unsupported bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum BytecodeError {
    #[display("input does not start with the bytecode magic number")]
    BadMagic,

    #[display("unsupported bytecode version {version}")]
    UnsupportedVersion { version: u64 },

    #[display("unexpected end of bytecode at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[display("invalid {what} tag {tag} at offset {offset}")]
    InvalidTag {
        what: &'static str,
        tag: u64,
        offset: usize,
    },

    #[display("{what} index {index} out of range at offset {offset}")]
    InvalidIndex {
        what: &'static str,
        index: u64,
        offset: usize,
    },

    #[display("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[display("unexpected trailing bytes at offset {offset}")]
    TrailingBytes { offset: usize },

    #[display("value #{index} is used but never defined")]
    UnresolvedValue { index: u64 },

    #[display("cannot serialize: {message}")]
    Unserializable { message: String },
}

/// Whether `bytes` starts with the bytecode magic number.
pub fn is_bytecode(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

fn check_version(version: u64) -> std::result::Result<u32, BytecodeError> {
    match u32::try_from(version) {
        Ok(v) if (MIN_VERSION..=CURRENT_VERSION).contains(&v) => Ok(v),
        _ => Err(BytecodeError::UnsupportedVersion { version }),
    }
}

/// Serialize `op` and everything nested in it.
pub fn write_bytecode(
    ctx: &IrContext,
    op: OpRef,
    config: &BytecodeConfig,
    out: &mut impl Write,
) -> Result<()> {
    ctx.check_nesting_depth(op)?;
    let version = check_version(u64::from(config.version))?;
    debug!(version, %op, "writing bytecode");
    let bytes = writer::Writer::new(ctx, version).finish(op)?;
    out.write_all(&bytes)?;
    Ok(())
}

/// [`write_bytecode`] into a newly created (or truncated) file.
pub fn write_bytecode_to_path(
    ctx: &IrContext,
    op: OpRef,
    config: &BytecodeConfig,
    path: impl AsRef<Path>,
) -> Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_bytecode(ctx, op, config, &mut file)?;
    file.flush()?;
    Ok(())
}

/// Deserialize a detached operation tree into `ctx`.
pub fn read_bytecode(ctx: &mut IrContext, bytes: &[u8]) -> Result<OpRef> {
    reader::Reader::new(ctx, bytes).read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Attribute, DenseValues};
    use crate::context::OperationState;
    use crate::dialect::DialectOp;
    use crate::dialect::builtin::ModuleOp;
    use crate::error::ErrorKind;
    use crate::parser::parse_module;
    use crate::printer::{PrintOptions, print_op};
    use crate::symbol::Symbol;
    use crate::types::Location;

    fn lenient() -> IrContext {
        let mut ctx = IrContext::new();
        ctx.set_allow_unregistered_dialects(true);
        ctx
    }

    const SAMPLE: &str = r#"module @m {
  %0 = "custom.a"() {s = "text", v = 1.5 : f32} : () -> tensor<2x?xi32>
  "custom.region"(%0) ({
  ^bb0(%arg0: i32):
    "custom.use"(%1) : (i64) -> ()
    "custom.br"(%arg0)[^bb1] : (i32) -> ()
  ^bb1:
    %1 = "custom.def"() {list = [@sym, unit, i8]} : () -> i64
  }) : (tensor<2x?xi32>) -> ()
}"#;

    fn round_trip(version: u32) {
        let mut ctx = lenient();
        let module = parse_module(&mut ctx, SAMPLE).unwrap();
        let expected = print_op(&ctx, module.op_ref(), &PrintOptions::default()).unwrap();

        let mut bytes = Vec::new();
        let config = BytecodeConfig::new().version(version);
        write_bytecode(&ctx, module.op_ref(), &config, &mut bytes).unwrap();
        assert!(is_bytecode(&bytes));

        let mut fresh = lenient();
        let op = read_bytecode(&mut fresh, &bytes).unwrap();
        let printed = print_op(&fresh, op, &PrintOptions::default()).unwrap();
        assert_eq!(printed, expected);
    }

    #[test]
    fn round_trips_version_1() {
        round_trip(1);
    }

    #[test]
    fn round_trips_version_2() {
        round_trip(2);
    }

    #[test]
    fn header_carries_magic_and_version() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        let mut bytes = Vec::new();
        write_bytecode(&ctx, module.op_ref(), &BytecodeConfig::default(), &mut bytes).unwrap();
        assert_eq!(&bytes[..5], &[0x54, 0x52, 0xEF, 0x42, 0x02]);
    }

    #[test]
    fn rejects_unknown_versions() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        let err = write_bytecode(
            &ctx,
            module.op_ref(),
            &BytecodeConfig::new().version(9),
            &mut Vec::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bytecode);

        let err = read_bytecode(&mut ctx, &[0x54, 0x52, 0xEF, 0x42, 0x09]).unwrap_err();
        assert_eq!(err.to_string(), "unsupported bytecode version 9");
    }

    #[test]
    fn truncated_input_fails_cleanly() {
        let mut ctx = lenient();
        let module = parse_module(&mut ctx, SAMPLE).unwrap();
        let mut bytes = Vec::new();
        write_bytecode(&ctx, module.op_ref(), &BytecodeConfig::default(), &mut bytes).unwrap();

        let mut fresh = lenient();
        let before = fresh.live_counts();
        let err = read_bytecode(&mut fresh, &bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bytecode);
        assert_eq!(fresh.live_counts(), before);
    }

    #[test]
    fn resources_are_never_elided() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        let i64_ty = ctx.types.int(64);
        let tensor = ctx.types.tensor(&[3], i64_ty);
        let attr = ctx.attrs.intern(Attribute::DenseResource {
            ty: tensor,
            handle: Symbol::new("blob"),
        });
        let dense = ctx.attrs.intern(Attribute::DenseElements {
            ty: tensor,
            values: DenseValues::Int(vec![-1, 0, 1]),
        });
        ctx.add_resource("blob", vec![7; 24]);
        let op = ctx
            .create_op(
                OperationState::new("builtin.module")
                    .regions(1)
                    .attr("r", attr)
                    .attr("d", dense),
            )
            .unwrap();
        module.push(&mut ctx, op).unwrap();

        let mut bytes = Vec::new();
        write_bytecode(&ctx, module.op_ref(), &BytecodeConfig::default(), &mut bytes).unwrap();
        let mut fresh = IrContext::new();
        let root = read_bytecode(&mut fresh, &bytes).unwrap();
        assert_eq!(fresh.resource("blob"), Some(&[7u8; 24][..]));

        let options = PrintOptions::default().elide_elements_above(1);
        assert_eq!(
            print_op(&fresh, root, &options).unwrap(),
            print_op(&ctx, module.op_ref(), &options).unwrap()
        );
    }

    #[test]
    fn write_to_path() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.trb");
        write_bytecode_to_path(&ctx, module.op_ref(), &BytecodeConfig::default(), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let op = read_bytecode(&mut ctx, &bytes).unwrap();
        assert!(ModuleOp::matches(&ctx, op));
    }
}
