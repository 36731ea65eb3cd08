//! Bytecode → operation tree.

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::debug;

use crate::attributes::{Attribute, DenseValues};
use crate::context::{IrContext, MAX_NESTING_DEPTH, OperationState};
use crate::error::{IrError, Result};
use crate::parser::FORWARD_REF;
use crate::refs::{AttrRef, BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::symbol::Symbol;
use crate::types::{FloatKind, Location, Signedness, TypeData};

use super::varint::{read_u64, unzigzag};
use super::writer::tag;
use super::{BytecodeError, MAGIC, check_version};

type ReadResult<T> = std::result::Result<T, BytecodeError>;

/// Bounds-checked view over the input.
struct Cursor<'b> {
    data: &'b [u8],
    pos: usize,
}

impl<'b> Cursor<'b> {
    fn eof(&self) -> BytecodeError {
        BytecodeError::UnexpectedEof { offset: self.pos }
    }

    fn u8(&mut self) -> ReadResult<u8> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.eof())?;
        self.pos += 1;
        Ok(byte)
    }

    fn varint(&mut self) -> ReadResult<u64> {
        let start = self.pos;
        read_u64(self.data, &mut self.pos).ok_or(BytecodeError::UnexpectedEof { offset: start })
    }

    /// A count of items that each take at least one byte.
    fn count(&mut self) -> ReadResult<usize> {
        let n = self.varint()?;
        let remaining = (self.data.len() - self.pos) as u64;
        if n > remaining {
            return Err(self.eof());
        }
        Ok(n as usize)
    }

    fn bytes(&mut self, len: usize) -> ReadResult<&'b [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| self.eof())?;
        let slice = self.data.get(self.pos..end).ok_or_else(|| self.eof())?;
        self.pos = end;
        Ok(slice)
    }

    fn u64_le(&mut self) -> ReadResult<u64> {
        let bytes = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn inline_str(&mut self) -> ReadResult<String> {
        let offset = self.pos;
        let len = self.count()?;
        let bytes = self.bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| BytecodeError::InvalidUtf8 { offset })
    }
}

/// A use of a value whose definition comes later in the stream.
struct Pending {
    placeholder: OpRef,
    value: ValueRef,
}

pub(super) struct Reader<'c, 'b> {
    ctx: &'c mut IrContext,
    cur: Cursor<'b>,
    version: u32,
    strings: Vec<String>,
    types: Vec<TypeRef>,
    attrs: Vec<AttrRef>,
    values: Vec<ValueRef>,
    pending: HashMap<u64, Pending>,
    blocks: Vec<BlockRef>,
    depth: usize,
}

impl<'c, 'b> Reader<'c, 'b> {
    pub(super) fn new(ctx: &'c mut IrContext, data: &'b [u8]) -> Self {
        Self {
            ctx,
            cur: Cursor { data, pos: 0 },
            version: 0,
            strings: Vec::new(),
            types: Vec::new(),
            attrs: Vec::new(),
            values: Vec::new(),
            pending: HashMap::new(),
            blocks: Vec::new(),
            depth: 0,
        }
    }

    pub(super) fn read(mut self) -> Result<OpRef> {
        let magic = self.cur.bytes(MAGIC.len()).map_err(|_| BytecodeError::BadMagic)?;
        if magic != MAGIC.as_slice() {
            return Err(BytecodeError::BadMagic.into());
        }
        self.version = check_version(self.cur.varint()?)?;
        debug!(version = self.version, len = self.cur.data.len(), "reading bytecode");

        let result = self.read_body();
        if result.is_err() {
            for (_, pending) in self.pending.drain() {
                let _ = self.ctx.erase_op(pending.placeholder);
            }
        }
        result
    }

    fn read_body(&mut self) -> Result<OpRef> {
        if self.version >= 2 {
            let n = self.cur.count()?;
            for _ in 0..n {
                let s = self.cur.inline_str()?;
                self.strings.push(s);
            }
        }

        let n = self.cur.count()?;
        for _ in 0..n {
            let ty = self.read_type()?;
            self.types.push(ty);
        }
        let n = self.cur.count()?;
        for _ in 0..n {
            let attr = self.read_attr()?;
            self.attrs.push(attr);
        }
        let n = self.cur.count()?;
        let mut resources = Vec::with_capacity(n);
        for _ in 0..n {
            let name = self.string()?;
            let len = self.cur.count()?;
            resources.push((name, self.cur.bytes(len)?.to_vec()));
        }

        let root = self.read_op()?;
        let trailing = self.cur.pos != self.cur.data.len();
        let unresolved = self.pending.keys().min().copied();
        if trailing || unresolved.is_some() {
            self.ctx.erase_op(root)?;
            return Err(match unresolved {
                Some(index) => BytecodeError::UnresolvedValue { index },
                None => BytecodeError::TrailingBytes {
                    offset: self.cur.pos,
                },
            }
            .into());
        }

        for (name, bytes) in resources {
            self.ctx.add_resource(&name, bytes);
        }
        Ok(root)
    }

    fn invalid_index(&self, what: &'static str, index: u64) -> BytecodeError {
        BytecodeError::InvalidIndex {
            what,
            index,
            offset: self.cur.pos,
        }
    }

    fn string(&mut self) -> ReadResult<String> {
        if self.version >= 2 {
            let index = self.cur.varint()?;
            self.strings
                .get(index as usize)
                .cloned()
                .ok_or_else(|| self.invalid_index("string", index))
        } else {
            self.cur.inline_str()
        }
    }

    fn type_ref(&mut self) -> ReadResult<TypeRef> {
        let index = self.cur.varint()?;
        self.types
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.invalid_index("type", index))
    }

    fn type_list(&mut self) -> ReadResult<SmallVec<[TypeRef; 4]>> {
        let n = self.cur.count()?;
        (0..n).map(|_| self.type_ref()).collect()
    }

    fn read_type(&mut self) -> ReadResult<TypeRef> {
        let offset = self.cur.pos;
        let data = match self.cur.u8()? {
            tag::TYPE_INTEGER => {
                let width = self.cur.varint()?;
                let width = u32::try_from(width).map_err(|_| self.invalid_index("width", width))?;
                let signedness = match self.cur.u8()? {
                    tag::SIGNLESS => Signedness::Signless,
                    tag::SIGNED => Signedness::Signed,
                    tag::UNSIGNED => Signedness::Unsigned,
                    other => {
                        return Err(BytecodeError::InvalidTag {
                            what: "signedness",
                            tag: u64::from(other),
                            offset,
                        });
                    }
                };
                TypeData::Integer { width, signedness }
            }
            tag::TYPE_FLOAT => TypeData::Float(match self.cur.u8()? {
                tag::F16 => FloatKind::F16,
                tag::BF16 => FloatKind::BF16,
                tag::F32 => FloatKind::F32,
                tag::F64 => FloatKind::F64,
                other => {
                    return Err(BytecodeError::InvalidTag {
                        what: "float kind",
                        tag: u64::from(other),
                        offset,
                    });
                }
            }),
            tag::TYPE_INDEX => TypeData::Index,
            tag::TYPE_NONE => TypeData::None,
            tag::TYPE_FUNCTION => {
                let inputs = self.type_list()?;
                let results = self.type_list()?;
                TypeData::Function { inputs, results }
            }
            tag::TYPE_TENSOR => {
                let rank = self.cur.count()?;
                let shape = (0..rank)
                    .map(|_| self.cur.varint().map(unzigzag))
                    .collect::<ReadResult<_>>()?;
                let element = self.type_ref()?;
                TypeData::Tensor { shape, element }
            }
            tag::TYPE_OPAQUE => {
                let dialect = Symbol::from_dynamic(&self.string()?);
                let name = Symbol::from_dynamic(&self.string()?);
                let params = self.type_list()?;
                TypeData::Opaque {
                    dialect,
                    name,
                    params,
                }
            }
            other => {
                return Err(BytecodeError::InvalidTag {
                    what: "type",
                    tag: u64::from(other),
                    offset,
                });
            }
        };
        Ok(self.ctx.types.intern(data))
    }

    fn read_attr(&mut self) -> ReadResult<AttrRef> {
        let offset = self.cur.pos;
        let attr = match self.cur.u8()? {
            tag::ATTR_UNIT => Attribute::Unit,
            tag::ATTR_BOOL => Attribute::Bool(self.cur.u8()? != 0),
            tag::ATTR_INTEGER => {
                let value = unzigzag(self.cur.varint()?);
                Attribute::Integer {
                    value,
                    ty: self.type_ref()?,
                }
            }
            tag::ATTR_FLOAT => {
                let bits = self.cur.u64_le()?;
                Attribute::Float {
                    bits,
                    ty: self.type_ref()?,
                }
            }
            tag::ATTR_STRING => Attribute::String(self.string()?),
            tag::ATTR_TYPE => Attribute::Type(self.type_ref()?),
            tag::ATTR_SYMBOL_REF => Attribute::SymbolRef(Symbol::from_dynamic(&self.string()?)),
            tag::ATTR_ARRAY => {
                let n = self.cur.count()?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    let index = self.cur.varint()?;
                    let item = self
                        .attrs
                        .get(index as usize)
                        .copied()
                        .ok_or_else(|| self.invalid_index("attribute", index))?;
                    items.push(item);
                }
                Attribute::Array(items)
            }
            tag::ATTR_DENSE_INT => {
                let ty = self.type_ref()?;
                let n = self.cur.count()?;
                let values = (0..n)
                    .map(|_| self.cur.varint().map(unzigzag))
                    .collect::<ReadResult<_>>()?;
                Attribute::DenseElements {
                    ty,
                    values: DenseValues::Int(values),
                }
            }
            tag::ATTR_DENSE_FLOAT => {
                let ty = self.type_ref()?;
                let n = self.cur.count()?;
                let values = (0..n)
                    .map(|_| self.cur.u64_le())
                    .collect::<ReadResult<_>>()?;
                Attribute::DenseElements {
                    ty,
                    values: DenseValues::Float(values),
                }
            }
            tag::ATTR_DENSE_RESOURCE => {
                let ty = self.type_ref()?;
                Attribute::DenseResource {
                    ty,
                    handle: Symbol::from_dynamic(&self.string()?),
                }
            }
            other => {
                return Err(BytecodeError::InvalidTag {
                    what: "attribute",
                    tag: u64::from(other),
                    offset,
                });
            }
        };
        Ok(self.ctx.attrs.intern(attr))
    }

    fn read_location(&mut self) -> ReadResult<Location> {
        let offset = self.cur.pos;
        Ok(match self.cur.u8()? {
            tag::LOC_UNKNOWN => Location::Unknown,
            tag::LOC_FILE_LINE_COL => {
                let file = self.string()?;
                let line = self.cur.varint()? as u32;
                let col = self.cur.varint()? as u32;
                Location::file_line_col(&file, line, col)
            }
            tag::LOC_NAME => Location::name(&self.string()?),
            other => {
                return Err(BytecodeError::InvalidTag {
                    what: "location",
                    tag: u64::from(other),
                    offset,
                });
            }
        })
    }

    /// Resolve operand `index`, binding a placeholder for values defined
    /// later in the stream.
    fn operand(&mut self, index: u64) -> Result<ValueRef> {
        if let Some(&v) = self.values.get(index as usize) {
            return Ok(v);
        }
        if let Some(pending_value) = self.pending.get(&index).map(|p| p.value) {
            // The type is repeated for every forward use.
            self.type_ref()?;
            return Ok(pending_value);
        }
        let ty = self.type_ref()?;
        let placeholder = self
            .ctx
            .create_op(OperationState::new(FORWARD_REF).result(ty))?;
        let value = self.ctx.result(placeholder)?;
        self.pending.insert(index, Pending { placeholder, value });
        Ok(value)
    }

    fn define(&mut self, value: ValueRef) -> Result<()> {
        let index = self.values.len() as u64;
        if let Some(pending) = self.pending.remove(&index) {
            self.ctx.replace_all_uses(pending.value, value)?;
            self.ctx.erase_op(pending.placeholder)?;
        }
        self.values.push(value);
        Ok(())
    }

    fn read_op(&mut self) -> Result<OpRef> {
        let name = self.string()?;
        let location = self.read_location()?;
        let mut state = OperationState::new(&name).location(location);

        let n = self.cur.count()?;
        for _ in 0..n {
            let index = self.cur.varint()?;
            let value = self.operand(index)?;
            state = state.operand(value);
        }
        let n = self.cur.count()?;
        for _ in 0..n {
            state = state.result(self.type_ref()?);
        }
        let n = self.cur.count()?;
        for _ in 0..n {
            let key = self.string()?;
            let index = self.cur.varint()?;
            let attr = self
                .attrs
                .get(index as usize)
                .copied()
                .ok_or_else(|| self.invalid_index("attribute", index))?;
            state = state.attr(&key, attr);
        }
        let n = self.cur.count()?;
        for _ in 0..n {
            let index = self.cur.varint()?;
            let block = self
                .blocks
                .get(index as usize)
                .copied()
                .ok_or_else(|| self.invalid_index("block", index))?;
            state = state.successor(block);
        }
        let num_regions = self.cur.count()?;

        let op = self.ctx.create_op(state.regions(num_regions))?;
        if let Err(e) = self.read_op_body(op) {
            let _ = self.ctx.erase_op(op);
            return Err(e);
        }
        Ok(op)
    }

    fn read_op_body(&mut self, op: OpRef) -> Result<()> {
        let results = self.ctx.op_data(op).results().to_vec();
        for v in results {
            self.define(v)?;
        }
        let regions = self.ctx.op_data(op).regions().to_vec();
        if regions.is_empty() {
            return Ok(());
        }
        if self.depth == MAX_NESTING_DEPTH {
            return Err(IrError::NestingTooDeep {
                op: self.ctx.op_data(op).name().to_string(),
                limit: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        let result = regions.into_iter().try_for_each(|region| self.read_region(region));
        self.depth -= 1;
        result
    }

    fn read_region(&mut self, region: RegionRef) -> Result<()> {
        let n = self.cur.count()?;
        let mut blocks = Vec::with_capacity(n);
        for _ in 0..n {
            let num_args = self.cur.count()?;
            let types = (0..num_args)
                .map(|_| self.type_ref())
                .collect::<ReadResult<Vec<_>>>()?;
            let block = self.ctx.append_block(region, &types)?;
            self.blocks.push(block);
            blocks.push(block);
            let args = self.ctx.block_data(block).args().to_vec();
            for arg in args {
                self.define(arg)?;
            }
        }
        for block in blocks {
            let n = self.cur.count()?;
            for _ in 0..n {
                let op = self.read_op()?;
                self.ctx.append_op(block, op)?;
            }
        }
        Ok(())
    }
}
