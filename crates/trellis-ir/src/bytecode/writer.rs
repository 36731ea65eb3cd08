//! Operation tree → bytecode.

use std::collections::HashMap;

use crate::attributes::{Attribute, DenseValues};
use crate::context::IrContext;
use crate::printer::referenced_resources;
use crate::refs::{AttrRef, BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::types::{FloatKind, Location, Signedness, TypeData};

use super::varint::{write_u64, zigzag};
use super::{BytecodeError, MAGIC};

type WriteResult<T> = std::result::Result<T, BytecodeError>;

pub(super) mod tag {
    pub const TYPE_INTEGER: u8 = 0;
    pub const TYPE_FLOAT: u8 = 1;
    pub const TYPE_INDEX: u8 = 2;
    pub const TYPE_NONE: u8 = 3;
    pub const TYPE_FUNCTION: u8 = 4;
    pub const TYPE_TENSOR: u8 = 5;
    pub const TYPE_OPAQUE: u8 = 6;

    pub const ATTR_UNIT: u8 = 0;
    pub const ATTR_BOOL: u8 = 1;
    pub const ATTR_INTEGER: u8 = 2;
    pub const ATTR_FLOAT: u8 = 3;
    pub const ATTR_STRING: u8 = 4;
    pub const ATTR_TYPE: u8 = 5;
    pub const ATTR_SYMBOL_REF: u8 = 6;
    pub const ATTR_ARRAY: u8 = 7;
    pub const ATTR_DENSE_INT: u8 = 8;
    pub const ATTR_DENSE_FLOAT: u8 = 9;
    pub const ATTR_DENSE_RESOURCE: u8 = 10;

    pub const LOC_UNKNOWN: u8 = 0;
    pub const LOC_FILE_LINE_COL: u8 = 1;
    pub const LOC_NAME: u8 = 2;

    pub const SIGNLESS: u8 = 0;
    pub const SIGNED: u8 = 1;
    pub const UNSIGNED: u8 = 2;

    pub const F16: u8 = 0;
    pub const BF16: u8 = 1;
    pub const F32: u8 = 2;
    pub const F64: u8 = 3;
}

pub(super) struct Writer<'c> {
    ctx: &'c IrContext,
    version: u32,
    /// Everything after the string table.
    buf: Vec<u8>,
    strings: Vec<String>,
    string_index: HashMap<String, u64>,
    types: Vec<TypeRef>,
    type_index: HashMap<TypeRef, u64>,
    attrs: Vec<AttrRef>,
    attr_index: HashMap<AttrRef, u64>,
    value_index: HashMap<ValueRef, u64>,
    /// Number of values defined so far in the stream.
    defined: u64,
    block_index: HashMap<BlockRef, u64>,
}

impl<'c> Writer<'c> {
    pub(super) fn new(ctx: &'c IrContext, version: u32) -> Self {
        Self {
            ctx,
            version,
            buf: Vec::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            types: Vec::new(),
            type_index: HashMap::new(),
            attrs: Vec::new(),
            attr_index: HashMap::new(),
            value_index: HashMap::new(),
            defined: 0,
            block_index: HashMap::new(),
        }
    }

    pub(super) fn finish(mut self, root: OpRef) -> WriteResult<Vec<u8>> {
        self.number_op(root);

        write_u64(&mut self.buf, self.types.len() as u64);
        for ty in self.types.clone() {
            self.write_type(ty);
        }
        write_u64(&mut self.buf, self.attrs.len() as u64);
        for attr in self.attrs.clone() {
            self.write_attr(attr);
        }

        let ctx = self.ctx;
        let resources: Vec<(String, &[u8])> = referenced_resources(ctx, root)
            .into_iter()
            .filter_map(|name| ctx.resource(&name).map(|bytes| (name, bytes)))
            .collect();
        write_u64(&mut self.buf, resources.len() as u64);
        for (name, bytes) in resources {
            self.write_str(&name);
            write_u64(&mut self.buf, bytes.len() as u64);
            self.buf.extend_from_slice(bytes);
        }

        self.write_op(root)?;

        let mut out = Vec::with_capacity(self.buf.len() + 16);
        out.extend_from_slice(&MAGIC);
        write_u64(&mut out, u64::from(self.version));
        if self.version >= 2 {
            write_u64(&mut out, self.strings.len() as u64);
            for s in &self.strings {
                write_u64(&mut out, s.len() as u64);
                out.extend_from_slice(s.as_bytes());
            }
        }
        out.extend_from_slice(&self.buf);
        Ok(out)
    }

    // ========================================================================
    // Numbering pass
    // ========================================================================

    /// Number values and collect types and attributes, visiting
    /// definitions in the order the reader sees them.
    fn number_op(&mut self, op: OpRef) {
        let ctx = self.ctx;
        let data = ctx.op_data(op);
        for &v in data.results() {
            self.number_value(v);
        }
        for attr in data.attributes().iter() {
            self.collect_attr(attr.value);
        }
        for &region in data.regions() {
            self.number_region(region);
        }
    }

    fn number_region(&mut self, region: RegionRef) {
        let ctx = self.ctx;
        let blocks = ctx.region_data(region).blocks();
        for &block in blocks {
            for &arg in ctx.block_data(block).args() {
                self.number_value(arg);
            }
        }
        for &block in blocks {
            for op in ctx.ops_in(block) {
                self.number_op(op);
            }
        }
    }

    fn number_value(&mut self, v: ValueRef) {
        let next = self.value_index.len() as u64;
        self.value_index.insert(v, next);
        let ty = self.ctx.value_data(v).ty();
        self.collect_type(ty);
    }

    fn collect_type(&mut self, ty: TypeRef) {
        if self.type_index.contains_key(&ty) {
            return;
        }
        let ctx = self.ctx;
        match ctx.types.get(ty) {
            TypeData::Function { inputs, results } => {
                for &t in inputs.iter().chain(results) {
                    self.collect_type(t);
                }
            }
            TypeData::Tensor { element, .. } => self.collect_type(*element),
            TypeData::Opaque { params, .. } => {
                for &t in params {
                    self.collect_type(t);
                }
            }
            TypeData::Integer { .. } | TypeData::Float(_) | TypeData::Index | TypeData::None => {}
        }
        self.type_index.insert(ty, self.types.len() as u64);
        self.types.push(ty);
    }

    fn collect_attr(&mut self, attr: AttrRef) {
        if self.attr_index.contains_key(&attr) {
            return;
        }
        let ctx = self.ctx;
        match ctx.attrs.get(attr) {
            Attribute::Array(items) => {
                for &item in items {
                    self.collect_attr(item);
                }
            }
            other => {
                if let Some(ty) = other.ty() {
                    self.collect_type(ty);
                }
            }
        }
        self.attr_index.insert(attr, self.attrs.len() as u64);
        self.attrs.push(attr);
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    fn write_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    fn write_varint(&mut self, value: u64) {
        write_u64(&mut self.buf, value);
    }

    fn write_str(&mut self, s: &str) {
        if self.version >= 2 {
            let index = match self.string_index.get(s) {
                Some(&i) => i,
                None => {
                    let i = self.strings.len() as u64;
                    self.strings.push(s.to_owned());
                    self.string_index.insert(s.to_owned(), i);
                    i
                }
            };
            self.write_varint(index);
        } else {
            self.write_varint(s.len() as u64);
            self.buf.extend_from_slice(s.as_bytes());
        }
    }

    fn type_idx(&self, ty: TypeRef) -> u64 {
        self.type_index[&ty]
    }

    fn write_type(&mut self, ty: TypeRef) {
        match self.ctx.types.get(ty).clone() {
            TypeData::Integer { width, signedness } => {
                self.write_u8(tag::TYPE_INTEGER);
                self.write_varint(u64::from(width));
                self.write_u8(match signedness {
                    Signedness::Signless => tag::SIGNLESS,
                    Signedness::Signed => tag::SIGNED,
                    Signedness::Unsigned => tag::UNSIGNED,
                });
            }
            TypeData::Float(kind) => {
                self.write_u8(tag::TYPE_FLOAT);
                self.write_u8(match kind {
                    FloatKind::F16 => tag::F16,
                    FloatKind::BF16 => tag::BF16,
                    FloatKind::F32 => tag::F32,
                    FloatKind::F64 => tag::F64,
                });
            }
            TypeData::Index => self.write_u8(tag::TYPE_INDEX),
            TypeData::None => self.write_u8(tag::TYPE_NONE),
            TypeData::Function { inputs, results } => {
                self.write_u8(tag::TYPE_FUNCTION);
                for list in [&inputs, &results] {
                    self.write_varint(list.len() as u64);
                    for &t in list.iter() {
                        self.write_varint(self.type_idx(t));
                    }
                }
            }
            TypeData::Tensor { shape, element } => {
                self.write_u8(tag::TYPE_TENSOR);
                self.write_varint(shape.len() as u64);
                for &dim in &shape {
                    self.write_varint(zigzag(dim));
                }
                self.write_varint(self.type_idx(element));
            }
            TypeData::Opaque {
                dialect,
                name,
                params,
            } => {
                self.write_u8(tag::TYPE_OPAQUE);
                self.write_str(&dialect.to_string());
                self.write_str(&name.to_string());
                self.write_varint(params.len() as u64);
                for &t in &params {
                    self.write_varint(self.type_idx(t));
                }
            }
        }
    }

    fn write_attr(&mut self, attr: AttrRef) {
        match self.ctx.attrs.get(attr).clone() {
            Attribute::Unit => self.write_u8(tag::ATTR_UNIT),
            Attribute::Bool(b) => {
                self.write_u8(tag::ATTR_BOOL);
                self.write_u8(u8::from(b));
            }
            Attribute::Integer { value, ty } => {
                self.write_u8(tag::ATTR_INTEGER);
                self.write_varint(zigzag(value));
                self.write_varint(self.type_idx(ty));
            }
            Attribute::Float { bits, ty } => {
                self.write_u8(tag::ATTR_FLOAT);
                self.buf.extend_from_slice(&bits.to_le_bytes());
                self.write_varint(self.type_idx(ty));
            }
            Attribute::String(s) => {
                self.write_u8(tag::ATTR_STRING);
                self.write_str(&s);
            }
            Attribute::Type(ty) => {
                self.write_u8(tag::ATTR_TYPE);
                self.write_varint(self.type_idx(ty));
            }
            Attribute::SymbolRef(sym) => {
                self.write_u8(tag::ATTR_SYMBOL_REF);
                self.write_str(&sym.to_string());
            }
            Attribute::Array(items) => {
                self.write_u8(tag::ATTR_ARRAY);
                self.write_varint(items.len() as u64);
                for item in items {
                    self.write_varint(self.attr_index[&item]);
                }
            }
            Attribute::DenseElements { ty, values } => match values {
                DenseValues::Int(values) => {
                    self.write_u8(tag::ATTR_DENSE_INT);
                    self.write_varint(self.type_idx(ty));
                    self.write_varint(values.len() as u64);
                    for v in values {
                        self.write_varint(zigzag(v));
                    }
                }
                DenseValues::Float(values) => {
                    self.write_u8(tag::ATTR_DENSE_FLOAT);
                    self.write_varint(self.type_idx(ty));
                    self.write_varint(values.len() as u64);
                    for bits in values {
                        self.buf.extend_from_slice(&bits.to_le_bytes());
                    }
                }
            },
            Attribute::DenseResource { ty, handle } => {
                self.write_u8(tag::ATTR_DENSE_RESOURCE);
                self.write_varint(self.type_idx(ty));
                self.write_str(&handle.to_string());
            }
        }
    }

    fn write_location(&mut self, location: Location) {
        match location {
            Location::Unknown => self.write_u8(tag::LOC_UNKNOWN),
            Location::FileLineCol { file, line, col } => {
                self.write_u8(tag::LOC_FILE_LINE_COL);
                self.write_str(&file.to_string());
                self.write_varint(u64::from(line));
                self.write_varint(u64::from(col));
            }
            Location::Name(name) => {
                self.write_u8(tag::LOC_NAME);
                self.write_str(&name.to_string());
            }
        }
    }

    fn write_op(&mut self, op: OpRef) -> WriteResult<()> {
        let ctx = self.ctx;
        let data = ctx.op_data(op);
        let name = data.name();
        self.write_str(&name.to_string());
        self.write_location(data.location());

        self.write_varint(data.operands().len() as u64);
        for &v in data.operands() {
            let Some(&index) = self.value_index.get(&v) else {
                return Err(BytecodeError::Unserializable {
                    message: format!(
                        "operand of '{name}' is defined outside the serialized operation"
                    ),
                });
            };
            self.write_varint(index);
            if index >= self.defined {
                self.write_varint(self.type_idx(ctx.value_data(v).ty()));
            }
        }

        self.write_varint(data.results().len() as u64);
        for &v in data.results() {
            self.write_varint(self.type_idx(ctx.value_data(v).ty()));
        }

        self.write_varint(data.attributes().len() as u64);
        for attr in data.attributes().iter() {
            self.write_str(&attr.name.to_string());
            self.write_varint(self.attr_index[&attr.value]);
        }

        self.write_varint(data.successors().len() as u64);
        for &b in data.successors() {
            let Some(&index) = self.block_index.get(&b) else {
                return Err(BytecodeError::Unserializable {
                    message: format!(
                        "successor of '{name}' is outside the serialized operation"
                    ),
                });
            };
            self.write_varint(index);
        }

        self.defined += data.results().len() as u64;

        self.write_varint(data.regions().len() as u64);
        for &region in data.regions() {
            self.write_region(region)?;
        }
        Ok(())
    }

    fn write_region(&mut self, region: RegionRef) -> WriteResult<()> {
        let ctx = self.ctx;
        let blocks = ctx.region_data(region).blocks();
        self.write_varint(blocks.len() as u64);
        for &block in blocks {
            let index = self.block_index.len() as u64;
            self.block_index.insert(block, index);
            let args = ctx.block_data(block).args();
            self.write_varint(args.len() as u64);
            for &arg in args {
                self.write_varint(self.type_idx(ctx.value_data(arg).ty()));
            }
            self.defined += args.len() as u64;
        }
        for &block in blocks {
            let ops: Vec<OpRef> = ctx.ops_in(block).collect();
            self.write_varint(ops.len() as u64);
            for op in ops {
                self.write_op(op)?;
            }
        }
        Ok(())
    }
}
