//! Text-format parser.
//!
//! Parsing happens in two stages: [`raw`] turns text into unresolved
//! structures, then [`IrBuilder`] resolves value names, block labels, types
//! and attributes into context entities.
//!
//! Values may be used before their definition (for example across blocks of
//! a region). Such uses are bound to detached placeholder operations which
//! are replaced once the definition is seen.

mod raw;

pub use raw::ParseError;

use std::collections::HashMap;

use tracing::{debug, warn};
use winnow::prelude::*;

use crate::attributes::{Attribute, DenseValues};
use crate::bytecode;
use crate::context::{IrContext, MAX_NESTING_DEPTH, OperationState};
use crate::dialect::DialectOp;
use crate::dialect::builtin::ModuleOp;
use crate::error::{IrError, Result};
use crate::refs::{AttrRef, BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::symbol::Symbol;
use crate::types::{Location, TypeData};

use raw::{
    RawAttribute, RawBlob, RawBlock, RawLocation, RawNumber, RawOperation, RawRegion, RawType,
    RawValueUse,
};

/// Source name used in default locations when none is given.
pub const DEFAULT_SOURCE_NAME: &str = "-";

/// Name of the detached placeholder operations standing in for values used
/// before their definition.
pub(crate) const FORWARD_REF: &str = "builtin.unrealized_forward_ref";

/// Largest tensor a dense splat is expanded into.
pub const MAX_SPLAT_ELEMENTS: u64 = 1 << 24;

/// A use of a not yet defined value.
#[derive(Clone, Copy, Debug)]
struct ForwardRef {
    placeholder: OpRef,
    value: ValueRef,
    tail: usize,
}

/// Name scopes saved around a nested region.
struct Scopes {
    values: HashMap<String, ValueRef>,
    blocks: HashMap<String, BlockRef>,
}

/// Resolves raw structures into operations of one context.
struct IrBuilder<'c, 's> {
    ctx: &'c mut IrContext,
    src: &'s str,
    source_name: &'s str,
    values: HashMap<String, ValueRef>,
    blocks: HashMap<String, BlockRef>,
    forward: HashMap<String, ForwardRef>,
}

impl<'c, 's> IrBuilder<'c, 's> {
    fn new(ctx: &'c mut IrContext, src: &'s str, source_name: &'s str) -> Self {
        Self {
            ctx,
            src,
            source_name,
            values: HashMap::new(),
            blocks: HashMap::new(),
            forward: HashMap::new(),
        }
    }

    fn error(&self, tail: usize, message: impl Into<String>) -> IrError {
        IrError::Parse(ParseError::at(
            self.src,
            self.src.len().saturating_sub(tail),
            message,
        ))
    }

    fn save_scopes(&self) -> Scopes {
        Scopes {
            values: self.values.clone(),
            blocks: self.blocks.clone(),
        }
    }

    fn restore_scopes(&mut self, saved: Scopes) {
        self.values = saved.values;
        self.blocks = saved.blocks;
    }

    // ========================================================================
    // Types, attributes, locations
    // ========================================================================

    fn build_type(&mut self, raw: &RawType<'_>) -> TypeRef {
        let data = match raw {
            RawType::Integer { width, signedness } => TypeData::Integer {
                width: *width,
                signedness: *signedness,
            },
            RawType::Float(kind) => TypeData::Float(*kind),
            RawType::Index => TypeData::Index,
            RawType::None => TypeData::None,
            RawType::Function { inputs, results } => {
                let inputs = inputs.iter().map(|t| self.build_type(t)).collect();
                let results = results.iter().map(|t| self.build_type(t)).collect();
                TypeData::Function { inputs, results }
            }
            RawType::Tensor { shape, element } => {
                let element = self.build_type(element);
                TypeData::Tensor {
                    shape: shape.iter().copied().collect(),
                    element,
                }
            }
            RawType::Opaque {
                dialect,
                name,
                params,
            } => {
                let params = params.iter().map(|t| self.build_type(t)).collect();
                TypeData::Opaque {
                    dialect: Symbol::from_dynamic(dialect),
                    name: Symbol::from_dynamic(name),
                    params,
                }
            }
        };
        self.ctx.types.intern(data)
    }

    fn is_float_type(&self, ty: TypeRef) -> bool {
        matches!(self.ctx.types.get(ty), TypeData::Float(_))
    }

    fn build_number(&mut self, number: RawNumber, ty: Option<&RawType<'_>>) -> AttrRef {
        let ty = match ty {
            Some(raw) => self.build_type(raw),
            None => match number {
                RawNumber::Float(_) => self.ctx.types.f64(),
                RawNumber::Int(_) | RawNumber::Hex(_) => self.ctx.types.int(64),
            },
        };
        let attr = if self.is_float_type(ty) {
            let bits = match number {
                RawNumber::Float(v) => v.to_bits(),
                RawNumber::Int(v) => (v as f64).to_bits(),
                RawNumber::Hex(bits) => bits,
            };
            Attribute::Float { bits, ty }
        } else {
            let value = match number {
                RawNumber::Float(v) => v as i64,
                RawNumber::Int(v) => v,
                RawNumber::Hex(bits) => bits as i64,
            };
            Attribute::Integer { value, ty }
        };
        self.ctx.attrs.intern(attr)
    }

    fn build_attribute(&mut self, raw: &RawAttribute<'_>, tail: usize) -> Result<AttrRef> {
        let attr = match raw {
            RawAttribute::Unit => return Ok(self.ctx.attrs.unit()),
            RawAttribute::Bool(b) => return Ok(self.ctx.attrs.bool(*b)),
            RawAttribute::Number(number, ty) => return Ok(self.build_number(*number, ty.as_ref())),
            RawAttribute::String(s) => return Ok(self.ctx.attrs.string(s)),
            RawAttribute::Symbol(s) => return Ok(self.ctx.attrs.symbol_ref(s)),
            RawAttribute::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.build_attribute(item, tail))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(self.ctx.attrs.array(items));
            }
            RawAttribute::Type(ty) => {
                let ty = self.build_type(ty);
                return Ok(self.ctx.attrs.type_attr(ty));
            }
            RawAttribute::DenseResource(handle, ty) => Attribute::DenseResource {
                ty: self.build_type(ty),
                handle: Symbol::from_dynamic(handle),
            },
            RawAttribute::Dense { values, splat, ty } => {
                let ty = self.build_type(ty);
                let data = self.ctx.types.get(ty);
                let TypeData::Tensor { element, .. } = *data else {
                    return Err(self.error(tail, "dense attribute requires a tensor type"));
                };
                let count = data.static_element_count();
                if count.is_none() && data.has_static_shape() {
                    return Err(self.error(
                        tail,
                        format!(
                            "tensor type '{}' has too many elements",
                            crate::printer::print_type(self.ctx, ty)
                        ),
                    ));
                }
                let mut values = values.clone();
                match count {
                    Some(n) if *splat && values.len() == 1 => {
                        if n > MAX_SPLAT_ELEMENTS {
                            return Err(self.error(
                                tail,
                                format!(
                                    "dense splat of {n} elements exceeds the limit of {MAX_SPLAT_ELEMENTS}"
                                ),
                            ));
                        }
                        values = vec![values[0]; n as usize];
                    }
                    Some(n) if values.len() as u64 != n => {
                        return Err(self.error(
                            tail,
                            format!(
                                "dense attribute has {} elements but its type holds {n}",
                                values.len()
                            ),
                        ));
                    }
                    _ => {}
                }
                let values = if self.is_float_type(element) {
                    DenseValues::Float(
                        values
                            .iter()
                            .map(|n| match *n {
                                RawNumber::Float(v) => v.to_bits(),
                                RawNumber::Int(v) => (v as f64).to_bits(),
                                RawNumber::Hex(bits) => bits,
                            })
                            .collect(),
                    )
                } else {
                    DenseValues::Int(
                        values
                            .iter()
                            .map(|n| match *n {
                                RawNumber::Float(v) => v as i64,
                                RawNumber::Int(v) => v,
                                RawNumber::Hex(bits) => bits as i64,
                            })
                            .collect(),
                    )
                };
                Attribute::DenseElements { ty, values }
            }
        };
        Ok(self.ctx.attrs.intern(attr))
    }

    fn location(&self, raw: Option<&RawLocation>, tail: usize) -> Location {
        match raw {
            Some(RawLocation::Unknown) => Location::Unknown,
            Some(RawLocation::FileLineCol(file, line, col)) => {
                Location::file_line_col(file, *line, *col)
            }
            Some(RawLocation::Name(name)) => Location::name(name),
            None => {
                let (line, col) = raw::line_col(self.src, self.src.len().saturating_sub(tail));
                Location::file_line_col(self.source_name, line as u32, col as u32)
            }
        }
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Resolve a use of `%name` expected to have type `ty`.
    fn resolve_use(&mut self, raw: &RawValueUse<'_>, ty: TypeRef, tail: usize) -> Result<ValueRef> {
        let key = raw.key();
        let found = self.values.get(&key).copied().or_else(|| {
            (raw.index == Some(0))
                .then(|| self.values.get(raw.name).copied())
                .flatten()
        });
        let (value, actual) = if let Some(v) = found {
            (v, self.ctx.value_type(v)?)
        } else if let Some(fwd) = self.forward.get(&key) {
            (fwd.value, self.ctx.value_type(fwd.value)?)
        } else {
            let placeholder = self
                .ctx
                .create_op(OperationState::new(FORWARD_REF).result(ty))?;
            let value = self.ctx.result(placeholder)?;
            self.forward.insert(
                key,
                ForwardRef {
                    placeholder,
                    value,
                    tail,
                },
            );
            return Ok(value);
        };
        if actual != ty {
            return Err(self.error(
                tail,
                format!(
                    "use of value '%{}' expects different type than prior uses: '{}' vs '{}'",
                    raw.key(),
                    crate::printer::print_type(self.ctx, ty),
                    crate::printer::print_type(self.ctx, actual),
                ),
            ));
        }
        Ok(value)
    }

    /// Bind `%key` to `value`, resolving any forward uses.
    fn define(&mut self, key: String, value: ValueRef, tail: usize) -> Result<()> {
        if self.values.contains_key(&key) {
            return Err(self.error(tail, format!("redefinition of SSA value '%{key}'")));
        }
        if let Some(fwd) = self.forward.remove(&key) {
            let expected = self.ctx.value_type(fwd.value)?;
            let actual = self.ctx.value_type(value)?;
            if expected != actual {
                let message = format!(
                    "definition of SSA value '%{key}' has type '{}' but was used with type '{}'",
                    crate::printer::print_type(self.ctx, actual),
                    crate::printer::print_type(self.ctx, expected),
                );
                self.forward.insert(key, fwd);
                return Err(self.error(tail, message));
            }
            self.ctx.replace_all_uses(fwd.value, value)?;
            self.ctx.erase_op(fwd.placeholder)?;
        }
        self.values.insert(key, value);
        Ok(())
    }

    /// Erase every pending placeholder. Used on error paths once the users
    /// have been erased.
    fn discard_forward_refs(&mut self) {
        for (_, fwd) in self.forward.drain() {
            let _ = self.ctx.erase_op(fwd.placeholder);
        }
    }

    fn first_unresolved(&self) -> Option<(String, usize)> {
        self.forward
            .iter()
            .min_by_key(|(_, fwd)| std::cmp::Reverse(fwd.tail))
            .map(|(key, fwd)| (key.clone(), fwd.tail))
    }

    // ========================================================================
    // Operations
    // ========================================================================

    fn build_operation(&mut self, raw: &RawOperation<'_>) -> Result<OpRef> {
        let tail = raw.tail;
        let mut state = OperationState::new(&raw.name).location(self.location(raw.location.as_ref(), tail));

        let bound: usize = raw.results.iter().map(|(_, n)| n).sum();
        if let Some((inputs, results)) = &raw.signature {
            if inputs.len() != raw.operands.len() {
                return Err(self.error(
                    tail,
                    format!(
                        "expected {} operand types but had {}",
                        raw.operands.len(),
                        inputs.len()
                    ),
                ));
            }
            if !raw.results.is_empty() && bound != results.len() {
                return Err(self.error(
                    tail,
                    format!(
                        "operation defines {} results but was provided {bound} to bind",
                        results.len()
                    ),
                ));
            }
            for (operand, ty) in raw.operands.iter().zip(inputs) {
                let ty = self.build_type(ty);
                let value = self.resolve_use(operand, ty, tail)?;
                state = state.operand(value);
            }
            for ty in results {
                let ty = self.build_type(ty);
                state = state.result(ty);
            }
        } else if bound != 0 {
            return Err(self.error(
                tail,
                format!("operation defines 0 results but was provided {bound} to bind"),
            ));
        }

        for label in &raw.successors {
            let Some(&block) = self.blocks.get(*label) else {
                return Err(self.error(tail, format!("reference to an undefined block '^{label}'")));
            };
            state = state.successor(block);
        }

        for (key, value) in &raw.attributes {
            let attr = self.build_attribute(value, tail)?;
            state = state.attr(key, attr);
        }

        let op = self.ctx.create_op(state.regions(raw.regions.len()))?;
        if let Err(e) = self.build_regions(op, raw) {
            let _ = self.ctx.erase_op(op);
            return Err(e);
        }

        if let Err(e) = self.bind_results(op, raw, tail) {
            let _ = self.ctx.erase_op(op);
            return Err(e);
        }
        Ok(op)
    }

    fn bind_results(&mut self, op: OpRef, raw: &RawOperation<'_>, tail: usize) -> Result<()> {
        let results = self.ctx.op_data(op).results().to_vec();
        let mut next = 0;
        for &(name, count) in &raw.results {
            if count == 1 {
                self.define(name.to_owned(), results[next], tail)?;
            } else {
                for i in 0..count {
                    self.define(format!("{name}#{i}"), results[next + i], tail)?;
                }
            }
            next += count;
        }
        Ok(())
    }

    fn build_regions(&mut self, op: OpRef, raw: &RawOperation<'_>) -> Result<()> {
        let regions = self.ctx.op_data(op).regions().to_vec();
        let isolated = self
            .ctx
            .registry()
            .lookup(self.ctx.op_data(op).name())
            .is_some_and(|info| info.is_isolated_from_above());

        if isolated {
            let saved = self.save_scopes();
            let outer_forward = std::mem::take(&mut self.forward);
            self.values.clear();
            self.blocks.clear();
            let result = self.build_isolated_regions(&regions, &raw.regions);
            if result.is_err() {
                self.discard_forward_refs();
            }
            self.forward = outer_forward;
            self.restore_scopes(saved);
            result?;
        } else {
            for (&region, raw_region) in regions.iter().zip(&raw.regions) {
                let saved = self.save_scopes();
                let result = self.build_region(region, raw_region);
                self.restore_scopes(saved);
                result?;
            }
        }

        if raw.signature.is_none()
            && let Some(&body) = regions.first()
            && self.ctx.region_data(body).blocks().is_empty()
        {
            self.ctx.append_block(body, &[])?;
        }
        Ok(())
    }

    fn build_isolated_regions(&mut self, regions: &[RegionRef], raw: &[RawRegion<'_>]) -> Result<()> {
        for (&region, raw_region) in regions.iter().zip(raw) {
            let saved = self.save_scopes();
            let result = self.build_region(region, raw_region);
            self.restore_scopes(saved);
            result?;
        }
        if let Some((key, tail)) = self.first_unresolved() {
            return Err(self.error(tail, format!("use of undeclared SSA value name '%{key}'")));
        }
        Ok(())
    }

    /// Build a region in two passes: blocks with their arguments first, so
    /// that successors and values may refer forward, then operations.
    fn build_region(&mut self, region: RegionRef, raw: &RawRegion<'_>) -> Result<()> {
        let mut blocks = Vec::with_capacity(raw.blocks.len());
        for raw_block in &raw.blocks {
            blocks.push(self.declare_block(region, raw_block)?);
        }
        for (&block, raw_block) in blocks.iter().zip(&raw.blocks) {
            for raw_op in &raw_block.ops {
                let op = self.build_operation(raw_op)?;
                self.ctx.append_op(block, op)?;
            }
        }
        Ok(())
    }

    fn declare_block(&mut self, region: RegionRef, raw: &RawBlock<'_>) -> Result<BlockRef> {
        if let Some(label) = raw.label
            && self.blocks.contains_key(label)
        {
            return Err(self.error(raw.tail, format!("redefinition of block '^{label}'")));
        }
        let types: Vec<TypeRef> = raw.args.iter().map(|(_, t)| self.build_type(t)).collect();
        let block = self.ctx.append_block(region, &types)?;
        if let Some(label) = raw.label {
            self.blocks.insert(label.to_owned(), block);
        }
        let args = self.ctx.block_data(block).args().to_vec();
        for (&(name, _), value) in raw.args.iter().zip(args) {
            self.define(name.to_owned(), value, raw.tail)?;
        }
        Ok(block)
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Parse every top-level operation of `text`. Resources in the trailer are
/// added to the context.
fn parse_source(ctx: &mut IrContext, text: &str, source_name: &str) -> Result<Vec<OpRef>> {
    let mut remaining = text;
    let mut raw_ops = Vec::new();
    let mut resources = Vec::new();
    let parsed: winnow::ModalResult<()> = (|| {
        loop {
            raw::ws.parse_next(&mut remaining)?;
            if remaining.is_empty() || remaining.starts_with("{-#") {
                break;
            }
            raw_ops.push(raw::raw_operation.parse_next(&mut remaining)?);
        }
        if remaining.starts_with("{-#") {
            resources = raw::raw_resources.parse_next(&mut remaining)?;
            raw::ws.parse_next(&mut remaining)?;
        }
        Ok(())
    })();
    let offset = text.len() - remaining.len();
    let too_deep = raw::take_depth_exceeded();
    if let Err(e) = parsed {
        let message = if too_deep {
            format!("input nests deeper than {MAX_NESTING_DEPTH} levels")
        } else {
            format!("unexpected input: {e}")
        };
        return Err(IrError::Parse(ParseError::at(text, offset, message)));
    }
    if !remaining.is_empty() {
        return Err(IrError::Parse(ParseError::at(
            text,
            offset,
            "unexpected trailing input",
        )));
    }

    let mut blobs = Vec::with_capacity(resources.len());
    for (name, blob) in resources {
        match blob {
            RawBlob::Elided => warn!(resource = %name, "skipping elided resource"),
            RawBlob::Hex(hex) => match decode_hex(&hex) {
                Some(bytes) => blobs.push((name, bytes)),
                None => {
                    return Err(IrError::Parse(ParseError::at(
                        text,
                        0,
                        format!("resource '{name}' is not a hex blob"),
                    )));
                }
            },
        }
    }

    let mut builder = IrBuilder::new(ctx, text, source_name);
    let mut roots = Vec::with_capacity(raw_ops.len());
    let mut result = Ok(());
    for raw_op in &raw_ops {
        match builder.build_operation(raw_op) {
            Ok(op) => roots.push(op),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    if result.is_ok()
        && let Some((key, tail)) = builder.first_unresolved()
    {
        result = Err(builder.error(tail, format!("use of undeclared SSA value name '%{key}'")));
    }
    if let Err(e) = result {
        for op in roots {
            let _ = builder.ctx.erase_op(op);
        }
        builder.discard_forward_refs();
        debug!(error = %e, "parse failed");
        return Err(e);
    }
    // Resources land only once the body has been built.
    for (name, bytes) in blobs {
        builder.ctx.add_resource(&name, bytes);
    }
    debug!(source = source_name, ops = roots.len(), "parsed source");
    Ok(roots)
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Parse a module from text. A single top-level `builtin.module` is
/// returned as is; any other top-level operations are wrapped into a new
/// module.
pub fn parse_module(ctx: &mut IrContext, text: &str) -> Result<ModuleOp> {
    parse_module_named(ctx, text, DEFAULT_SOURCE_NAME)
}

/// [`parse_module`] with `source_name` used in default locations.
pub fn parse_module_named(ctx: &mut IrContext, text: &str, source_name: &str) -> Result<ModuleOp> {
    let roots = parse_source(ctx, text, source_name)?;
    if let [single] = roots[..]
        && ModuleOp::matches(ctx, single)
    {
        return Ok(ModuleOp::wrap(single));
    }
    let module = ModuleOp::create(ctx, Location::file_line_col(source_name, 1, 1));
    for op in roots {
        module.push(ctx, op)?;
    }
    Ok(module)
}

/// Parse exactly one detached top-level operation.
pub fn parse_op(ctx: &mut IrContext, text: &str, source_name: &str) -> Result<OpRef> {
    let roots = parse_source(ctx, text, source_name)?;
    if let [single] = roots[..] {
        return Ok(single);
    }
    let count = roots.len();
    for op in roots {
        ctx.erase_op(op)?;
    }
    Err(IrError::Parse(ParseError::at(
        text,
        0,
        format!("source must contain a single top-level operation, found {count}"),
    )))
}

/// Parse one operation and check that it is named `expected`.
pub fn parse_op_named(ctx: &mut IrContext, text: &str, expected: &str) -> Result<OpRef> {
    let op = parse_op(ctx, text, DEFAULT_SOURCE_NAME)?;
    let actual = ctx.op_name(op)?;
    if actual != expected {
        ctx.erase_op(op)?;
        return Err(IrError::NameMismatch {
            expected: expected.to_owned(),
            actual: actual.to_string(),
        });
    }
    Ok(op)
}

/// Parse one operation as the typed wrapper `T`.
pub fn parse_as<T: DialectOp>(ctx: &mut IrContext, text: &str) -> Result<T> {
    parse_op_named(ctx, text, T::NAME).map(T::wrap)
}

/// Parse either bytecode or UTF-8 text, sniffing the bytecode magic.
pub fn parse_bytes(ctx: &mut IrContext, bytes: &[u8], source_name: &str) -> Result<OpRef> {
    if bytecode::is_bytecode(bytes) {
        return bytecode::read_bytecode(ctx, bytes);
    }
    let text = std::str::from_utf8(bytes).map_err(|e| {
        IrError::Parse(ParseError::at(
            "",
            0,
            format!("input is neither bytecode nor UTF-8 text: {e}"),
        ))
    })?;
    Ok(parse_module_named(ctx, text, source_name)?.op_ref())
}
