//! Text format printer.
//!
//! Operations print in the generic form unless their registration carries
//! a custom printer:
//!
//! ```text
//! module {
//!   %0:2 = "custom.op1"() ({
//!   ^bb0(%arg0: i32, %arg1: i64):
//!     "custom.terminator"() : () -> ()
//!   }) {foo = "foo_value"} : () -> (si32, si32)
//! }
//! ```
//!
//! Custom forms are only used for trees that pass verification. A tree that
//! fails verification is printed entirely in the generic form, which only
//! relies on the ownership structure.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{self, Write};
use std::ops::ControlFlow;

use tracing::debug;

use crate::attributes::{Attribute, DenseValues};
use crate::context::IrContext;
use crate::error::Result;
use crate::refs::*;
use crate::symbol::Symbol;
use crate::types::{DYNAMIC_DIM, Location, Signedness, TypeData};
use crate::walk::{WalkAction, WalkOrder, walk_op};

const UNKNOWN_VALUE: &str = "<<UNKNOWN SSA VALUE>>";
const UNKNOWN_BLOCK: &str = "^<<UNKNOWN BLOCK>>";
const ELIDED: &str = "__elided__";

// ============================================================================
// PrintOptions
// ============================================================================

/// Printing configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrintOptions {
    /// Append each operation's location.
    pub enable_debug_info: bool,
    /// Print locations without the `loc(...)` wrapper.
    pub pretty_debug_info: bool,
    /// Never use custom operation forms.
    pub print_generic_op_form: bool,
    /// Number values relative to the printed operation instead of its
    /// top-level ancestor.
    pub use_local_scope: bool,
    /// Name results after their operation's `loc("name")`.
    pub use_name_loc_as_prefix: bool,
    /// Dense constants with more elements print as `dense_resource<__elided__>`.
    pub large_elements_limit: Option<usize>,
    /// Resource blobs larger than this many bytes print as `"__elided__"`.
    pub large_resource_limit: Option<usize>,
    /// Print region bodies as `{...}`.
    pub skip_regions: bool,
    /// Skip the verification that guards custom forms.
    pub assume_verified: bool,
}

impl PrintOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug_info(mut self, enable: bool, pretty: bool) -> Self {
        self.enable_debug_info = enable;
        self.pretty_debug_info = pretty;
        self
    }

    pub fn generic(mut self, generic: bool) -> Self {
        self.print_generic_op_form = generic;
        self
    }

    pub fn local_scope(mut self, local: bool) -> Self {
        self.use_local_scope = local;
        self
    }

    pub fn name_loc_as_prefix(mut self, enable: bool) -> Self {
        self.use_name_loc_as_prefix = enable;
        self
    }

    pub fn elide_elements_above(mut self, limit: usize) -> Self {
        self.large_elements_limit = Some(limit);
        self
    }

    pub fn elide_resources_above(mut self, limit: usize) -> Self {
        self.large_resource_limit = Some(limit);
        self
    }

    pub fn skip_regions(mut self, skip: bool) -> Self {
        self.skip_regions = skip;
        self
    }

    pub fn assume_verified(mut self, assume: bool) -> Self {
        self.assume_verified = assume;
        self
    }
}

// ============================================================================
// AsmState
// ============================================================================

/// Value and block names for one operation tree.
///
/// Building the state walks the whole tree once; reuse it with
/// [`print_with_state`] to print several operations of the same tree.
#[derive(Clone, Debug)]
pub struct AsmState {
    root: OpRef,
    values: HashMap<ValueRef, String>,
    /// Definition label of multi-result operations, e.g. `%0:2`.
    result_groups: HashMap<OpRef, String>,
    blocks: HashMap<BlockRef, String>,
}

impl AsmState {
    /// Name every value and block under the scope root of `op`: `op` itself
    /// with `use_local_scope`, its top-level ancestor otherwise.
    pub fn new(ctx: &IrContext, op: OpRef, options: &PrintOptions) -> Result<Self> {
        ctx.check_op(op)?;
        let root = if options.use_local_scope {
            op
        } else {
            let mut top = op;
            while let Some(parent) = ctx.parent_op(top)? {
                top = parent;
            }
            top
        };
        ctx.check_nesting_depth(root)?;
        let mut state = AsmState {
            root,
            values: HashMap::new(),
            result_groups: HashMap::new(),
            blocks: HashMap::new(),
        };
        let mut namer = Namer {
            ctx,
            name_loc: options.use_name_loc_as_prefix,
            next_value: 0,
            next_arg: 0,
            taken: HashSet::new(),
            state: &mut state,
        };
        namer.name_op(root);
        Ok(state)
    }

    /// Operation the names were computed from.
    pub fn root(&self) -> OpRef {
        self.root
    }

    pub fn value_name(&self, v: ValueRef) -> Option<&str> {
        self.values.get(&v).map(String::as_str)
    }

    pub fn block_name(&self, b: BlockRef) -> Option<&str> {
        self.blocks.get(&b).map(String::as_str)
    }
}

struct Namer<'a> {
    ctx: &'a IrContext,
    name_loc: bool,
    next_value: usize,
    next_arg: usize,
    taken: HashSet<String>,
    state: &'a mut AsmState,
}

impl Namer<'_> {
    fn fresh_number(&mut self) -> String {
        let n = self.next_value;
        self.next_value += 1;
        n.to_string()
    }

    fn unique(&mut self, base: String) -> String {
        let mut name = base.clone();
        let mut suffix = 0;
        while !self.taken.insert(name.clone()) {
            suffix += 1;
            name = format!("{base}_{suffix}");
        }
        name
    }

    fn name_op(&mut self, op: OpRef) {
        let data = self.ctx.op_data(op);
        let results = data.results().to_vec();
        if !results.is_empty() {
            let base = match data.location() {
                Location::Name(name) if self.name_loc => {
                    let sanitized = sanitize_identifier(&name.to_string());
                    self.unique(sanitized)
                }
                _ => self.fresh_number(),
            };
            if let [single] = results.as_slice() {
                self.state.values.insert(*single, format!("%{base}"));
            } else {
                for (i, v) in results.iter().enumerate() {
                    self.state.values.insert(*v, format!("%{base}#{i}"));
                }
                self.state
                    .result_groups
                    .insert(op, format!("%{base}:{}", results.len()));
            }
        }

        let isolated = self
            .ctx
            .registry()
            .lookup(data.name())
            .is_some_and(|info| info.is_isolated_from_above());
        let regions = data.regions().to_vec();
        for region in regions {
            if isolated {
                let saved = (self.next_value, self.next_arg);
                self.next_value = 0;
                self.next_arg = 0;
                self.name_region(region);
                (self.next_value, self.next_arg) = saved;
            } else {
                self.name_region(region);
            }
        }
    }

    fn name_region(&mut self, region: RegionRef) {
        let blocks = self.ctx.region_data(region).blocks().to_vec();
        for (i, &block) in blocks.iter().enumerate() {
            self.state.blocks.insert(block, format!("^bb{i}"));
        }
        for (i, &block) in blocks.iter().enumerate() {
            for &arg in self.ctx.block_data(block).args() {
                let name = if i == 0 {
                    let n = self.next_arg;
                    self.next_arg += 1;
                    format!("%arg{n}")
                } else {
                    format!("%{}", self.fresh_number())
                };
                self.state.values.insert(arg, name);
            }
            let ops: Vec<OpRef> = self.ctx.ops_in(block).collect();
            for op in ops {
                self.name_op(op);
            }
        }
    }
}

/// Turn arbitrary text into a valid SSA name suffix.
fn sanitize_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

// ============================================================================
// Public API
// ============================================================================

/// Print an operation as IR text.
pub fn print_op(ctx: &IrContext, op: OpRef, options: &PrintOptions) -> Result<String> {
    let state = AsmState::new(ctx, op, options)?;
    print_with_state(ctx, op, &state, options)
}

/// Print an operation reusing precomputed names.
pub fn print_with_state(
    ctx: &IrContext,
    op: OpRef,
    state: &AsmState,
    options: &PrintOptions,
) -> Result<String> {
    ctx.check_nesting_depth(op)?;
    let mut generic = options.print_generic_op_form;
    if !generic && !options.assume_verified {
        if let Err(err) = ctx.verify(op) {
            debug!(%op, error = %err, "verification failed, printing generic form");
            generic = true;
        }
    }

    let mut printer = OpAsmPrinter {
        ctx,
        state,
        options,
        generic,
        out: String::new(),
        indent: 0,
    };
    printer
        .print_operation(op)
        .expect("fmt::Write to String never fails");
    printer
        .print_resources(op)
        .expect("fmt::Write to String never fails");
    Ok(printer.out)
}

/// Print an operation to a byte stream.
pub fn write_asm(
    ctx: &IrContext,
    op: OpRef,
    options: &PrintOptions,
    out: &mut impl std::io::Write,
) -> Result<()> {
    let text = print_op(ctx, op, options)?;
    out.write_all(text.as_bytes())?;
    Ok(())
}

/// Print a type as IR text.
pub fn print_type(ctx: &IrContext, ty: TypeRef) -> String {
    let mut out = String::new();
    write_type(ctx, &mut out, ty).expect("fmt::Write to String never fails");
    out
}

/// Print an attribute as IR text.
pub fn print_attribute(ctx: &IrContext, attr: AttrRef) -> String {
    let mut out = String::new();
    write_attribute(ctx, &mut out, attr, &PrintOptions::default())
        .expect("fmt::Write to String never fails");
    out
}

/// Print a location as `loc(...)`.
pub fn print_location(location: Location) -> String {
    format!("loc({location})")
}

// ============================================================================
// Type printing
// ============================================================================

pub(crate) fn write_type(ctx: &IrContext, f: &mut impl Write, ty: TypeRef) -> fmt::Result {
    let Some(data) = ctx.types.try_get(ty) else {
        return f.write_str("<<NULL TYPE>>");
    };
    match data {
        TypeData::Integer { width, signedness } => {
            let prefix = match signedness {
                Signedness::Signless => "i",
                Signedness::Signed => "si",
                Signedness::Unsigned => "ui",
            };
            write!(f, "{prefix}{width}")
        }
        TypeData::Float(kind) => f.write_str(kind.keyword()),
        TypeData::Index => f.write_str("index"),
        TypeData::None => f.write_str("none"),
        TypeData::Function { inputs, results } => write_function_type(ctx, f, inputs, results),
        TypeData::Tensor { shape, element } => {
            f.write_str("tensor<")?;
            for &dim in shape {
                if dim == DYNAMIC_DIM {
                    f.write_str("?x")?;
                } else {
                    write!(f, "{dim}x")?;
                }
            }
            write_type(ctx, f, *element)?;
            f.write_char('>')
        }
        TypeData::Opaque {
            dialect,
            name,
            params,
        } => {
            write!(f, "!{dialect}.{name}")?;
            if !params.is_empty() {
                f.write_char('<')?;
                write_type_list(ctx, f, params)?;
                f.write_char('>')?;
            }
            Ok(())
        }
    }
}

fn write_type_list(ctx: &IrContext, f: &mut impl Write, types: &[TypeRef]) -> fmt::Result {
    for (i, &ty) in types.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_type(ctx, f, ty)?;
    }
    Ok(())
}

/// `(a, b) -> c`; results are parenthesized unless there is exactly one
/// non-function result.
fn write_function_type(
    ctx: &IrContext,
    f: &mut impl Write,
    inputs: &[TypeRef],
    results: &[TypeRef],
) -> fmt::Result {
    f.write_char('(')?;
    write_type_list(ctx, f, inputs)?;
    f.write_str(") -> ")?;
    let bare = match results {
        [single] => !matches!(
            ctx.types.try_get(*single),
            Some(TypeData::Function { .. })
        ),
        _ => false,
    };
    if bare {
        write_type(ctx, f, results[0])
    } else {
        f.write_char('(')?;
        write_type_list(ctx, f, results)?;
        f.write_char(')')
    }
}

// ============================================================================
// Attribute printing
// ============================================================================

pub(crate) fn write_attribute(
    ctx: &IrContext,
    f: &mut impl Write,
    attr: AttrRef,
    options: &PrintOptions,
) -> fmt::Result {
    let Some(data) = ctx.attrs.try_get(attr) else {
        return f.write_str("<<NULL ATTRIBUTE>>");
    };
    match data {
        Attribute::Unit => f.write_str("unit"),
        Attribute::Bool(b) => write!(f, "{b}"),
        Attribute::Integer { value, ty } => {
            write!(f, "{value} : ")?;
            write_type(ctx, f, *ty)
        }
        Attribute::Float { bits, ty } => {
            write_float(f, *bits)?;
            f.write_str(" : ")?;
            write_type(ctx, f, *ty)
        }
        Attribute::String(s) => write_string(f, s),
        Attribute::Type(ty) => write_type(ctx, f, *ty),
        Attribute::SymbolRef(sym) => write_symbol(f, *sym),
        Attribute::Array(items) => {
            f.write_char('[')?;
            for (i, &item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_attribute(ctx, f, item, options)?;
            }
            f.write_char(']')
        }
        Attribute::DenseElements { ty, values } => {
            if options.large_elements_limit.is_some_and(|limit| values.len() > limit) {
                write!(f, "dense_resource<{ELIDED}> : ")?;
                return write_type(ctx, f, *ty);
            }
            f.write_str("dense<[")?;
            match values {
                DenseValues::Int(items) => {
                    for (i, v) in items.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{v}")?;
                    }
                }
                DenseValues::Float(items) => {
                    for (i, &bits) in items.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write_float(f, bits)?;
                    }
                }
            }
            f.write_str("]> : ")?;
            write_type(ctx, f, *ty)
        }
        Attribute::DenseResource { ty, handle } => {
            f.write_str("dense_resource<")?;
            write_key(f, &handle.to_string())?;
            f.write_str("> : ")?;
            write_type(ctx, f, *ty)
        }
    }
}

/// Finite values always carry a decimal point; others print as raw bits.
fn write_float(f: &mut impl Write, bits: u64) -> fmt::Result {
    let v = f64::from_bits(bits);
    if !v.is_finite() {
        return write!(f, "0x{bits:016X}");
    }
    let s = format!("{v:?}");
    match s.find(['e', 'E']) {
        Some(pos) if !s[..pos].contains('.') => write!(f, "{}.0{}", &s[..pos], &s[pos..]),
        _ => f.write_str(&s),
    }
}

pub(crate) fn write_string(f: &mut impl Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for ch in s.chars() {
        match ch {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\0' => f.write_str("\\0")?,
            c if c.is_control() => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

fn is_bare_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.')
}

/// Dictionary keys and resource names: bare when possible, quoted otherwise.
fn write_key(f: &mut impl Write, key: &str) -> fmt::Result {
    if is_bare_identifier(key) {
        f.write_str(key)
    } else {
        write_string(f, key)
    }
}

fn write_symbol(f: &mut impl Write, sym: Symbol) -> fmt::Result {
    let text = sym.to_string();
    f.write_char('@')?;
    write_key(f, &text)
}

fn write_location(f: &mut impl Write, location: Location, pretty: bool) -> fmt::Result {
    if pretty {
        write!(f, "{location}")
    } else {
        write!(f, "loc({location})")
    }
}

// ============================================================================
// OpAsmPrinter
// ============================================================================

/// Output sink handed to custom operation printers.
pub struct OpAsmPrinter<'a> {
    ctx: &'a IrContext,
    state: &'a AsmState,
    options: &'a PrintOptions,
    generic: bool,
    out: String,
    indent: usize,
}

impl Write for OpAsmPrinter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.out.write_str(s)
    }
}

impl<'a> OpAsmPrinter<'a> {
    pub fn ctx(&self) -> &'a IrContext {
        self.ctx
    }

    pub fn options(&self) -> &'a PrintOptions {
        self.options
    }

    pub fn print_type(&mut self, ty: TypeRef) -> fmt::Result {
        write_type(self.ctx, &mut self.out, ty)
    }

    pub fn print_attribute(&mut self, attr: AttrRef) -> fmt::Result {
        write_attribute(self.ctx, &mut self.out, attr, self.options)
    }

    pub fn print_symbol(&mut self, sym: Symbol) -> fmt::Result {
        write_symbol(&mut self.out, sym)
    }

    pub fn print_value(&mut self, v: ValueRef) -> fmt::Result {
        let name = self.state.value_name(v).unwrap_or(UNKNOWN_VALUE);
        self.out.write_str(name)
    }

    fn print_block_name(&mut self, b: BlockRef) -> fmt::Result {
        let name = self.state.block_name(b).unwrap_or(UNKNOWN_BLOCK);
        self.out.write_str(name)
    }

    /// ` {k = v, ...}` for every attribute not in `elided`; nothing when
    /// no attribute remains.
    pub fn print_optional_attr_dict(&mut self, op: OpRef, elided: &[&str]) -> fmt::Result {
        let attrs: Vec<_> = self
            .ctx
            .op_data(op)
            .attributes()
            .iter()
            .filter(|a| !elided.iter().any(|e| a.name == *e))
            .collect();
        if attrs.is_empty() {
            return Ok(());
        }
        self.out.write_str(" {")?;
        for (i, attr) in attrs.iter().enumerate() {
            if i > 0 {
                self.out.write_str(", ")?;
            }
            write_key(&mut self.out, &attr.name.to_string())?;
            if !matches!(self.ctx.attrs.try_get(attr.value), Some(Attribute::Unit)) {
                self.out.write_str(" = ")?;
                self.print_attribute(attr.value)?;
            }
        }
        self.out.write_char('}')
    }

    /// Same as [`Self::print_optional_attr_dict`] with an `attributes`
    /// keyword, as used by custom forms.
    pub fn print_optional_attr_dict_with_keyword(
        &mut self,
        op: OpRef,
        elided: &[&str],
    ) -> fmt::Result {
        let has_any = self
            .ctx
            .op_data(op)
            .attributes()
            .iter()
            .any(|a| !elided.iter().any(|e| a.name == *e));
        if has_any {
            self.out.write_str(" attributes")?;
        }
        self.print_optional_attr_dict(op, elided)
    }

    fn newline(&mut self) -> fmt::Result {
        self.out.write_char('\n')?;
        for _ in 0..self.indent {
            self.out.write_char(' ')?;
        }
        Ok(())
    }

    /// Print a region body. The entry block label is printed when it has
    /// arguments (and `print_entry_args` is set) or when it is empty (and
    /// `print_empty_block` is set).
    pub fn print_region(
        &mut self,
        region: RegionRef,
        print_entry_args: bool,
        print_empty_block: bool,
    ) -> fmt::Result {
        if self.options.skip_regions {
            return self.out.write_str("{...}");
        }
        self.out.write_char('{')?;
        let blocks = self.ctx.region_data(region).blocks().to_vec();
        for (i, &block) in blocks.iter().enumerate() {
            let data = self.ctx.block_data(block);
            let has_args = !data.args().is_empty();
            let print_label = i > 0
                || (has_args && print_entry_args)
                || (data.is_empty() && print_empty_block);
            if print_label {
                self.newline()?;
                self.print_block_name(block)?;
                if has_args {
                    self.out.write_char('(')?;
                    let args = data.args().to_vec();
                    for (j, arg) in args.into_iter().enumerate() {
                        if j > 0 {
                            self.out.write_str(", ")?;
                        }
                        self.print_value(arg)?;
                        self.out.write_str(": ")?;
                        self.print_type(self.ctx.value_data(arg).ty())?;
                    }
                    self.out.write_char(')')?;
                }
                self.out.write_char(':')?;
            }
            self.indent += 2;
            let ops: Vec<OpRef> = self.ctx.ops_in(block).collect();
            for op in ops {
                self.newline()?;
                self.print_operation(op)?;
            }
            self.indent -= 2;
        }
        self.newline()?;
        self.out.write_char('}')
    }

    fn print_operation(&mut self, op: OpRef) -> fmt::Result {
        let data = self.ctx.op_data(op);
        let results = data.results().to_vec();
        match results.as_slice() {
            [] => {}
            [single] => {
                self.print_value(*single)?;
                self.out.write_str(" = ")?;
            }
            _ => {
                let label = self
                    .state
                    .result_groups
                    .get(&op)
                    .map(String::as_str)
                    .unwrap_or(UNKNOWN_VALUE);
                self.out.write_str(label)?;
                self.out.write_str(" = ")?;
            }
        }

        let custom = if self.generic {
            None
        } else {
            self.ctx
                .registry()
                .lookup(data.name())
                .and_then(|info| info.printer_fn())
        };
        match custom {
            Some(printer) => printer(self, op)?,
            None => self.print_generic_op(op)?,
        }

        if self.options.enable_debug_info {
            self.out.write_char(' ')?;
            write_location(
                &mut self.out,
                self.ctx.op_data(op).location(),
                self.options.pretty_debug_info,
            )?;
        }
        Ok(())
    }

    fn print_generic_op(&mut self, op: OpRef) -> fmt::Result {
        let ctx = self.ctx;
        let data = ctx.op_data(op);
        write_string(&mut self.out, &data.name().to_string())?;

        self.out.write_char('(')?;
        for (i, &v) in data.operands().iter().enumerate() {
            if i > 0 {
                self.out.write_str(", ")?;
            }
            self.print_value(v)?;
        }
        self.out.write_char(')')?;

        if !data.successors().is_empty() {
            self.out.write_char('[')?;
            for (i, &b) in data.successors().iter().enumerate() {
                if i > 0 {
                    self.out.write_str(", ")?;
                }
                self.print_block_name(b)?;
            }
            self.out.write_char(']')?;
        }

        if !data.regions().is_empty() {
            self.out.write_str(" (")?;
            for (i, &region) in data.regions().iter().enumerate() {
                if i > 0 {
                    self.out.write_str(", ")?;
                }
                self.print_region(region, true, true)?;
            }
            self.out.write_char(')')?;
        }

        self.print_optional_attr_dict(op, &[])?;

        self.out.write_str(" : ")?;
        let inputs: Vec<TypeRef> = data
            .operands()
            .iter()
            .map(|&v| ctx.value_data(v).ty())
            .collect();
        let results: Vec<TypeRef> = data
            .results()
            .iter()
            .map(|&v| ctx.value_data(v).ty())
            .collect();
        write_function_type(ctx, &mut self.out, &inputs, &results)
    }

    /// Append the `dialect_resources` trailer for blobs referenced under
    /// `op`.
    fn print_resources(&mut self, op: OpRef) -> fmt::Result {
        let handles = referenced_resources(self.ctx, op);
        let blobs: Vec<(String, &[u8])> = handles
            .into_iter()
            .filter_map(|h| self.ctx.resource(&h).map(|bytes| (h, bytes)))
            .collect();
        if blobs.is_empty() {
            return Ok(());
        }
        self.out
            .write_str("\n\n{-#\n  dialect_resources: {\n    builtin: {")?;
        for (i, (name, bytes)) in blobs.iter().enumerate() {
            if i > 0 {
                self.out.write_char(',')?;
            }
            self.out.write_str("\n      ")?;
            write_key(&mut self.out, name)?;
            self.out.write_str(": ")?;
            if self
                .options
                .large_resource_limit
                .is_some_and(|limit| bytes.len() > limit)
            {
                write_string(&mut self.out, ELIDED)?;
            } else {
                self.out.write_str("\"0x")?;
                for b in bytes.iter() {
                    write!(self.out, "{b:02X}")?;
                }
                self.out.write_char('"')?;
            }
        }
        self.out.write_str("\n    }\n  }\n#-}")
    }
}

/// Resource handles referenced by attributes anywhere under `op`, sorted.
pub(crate) fn referenced_resources(ctx: &IrContext, op: OpRef) -> BTreeSet<String> {
    fn visit(ctx: &IrContext, attr: AttrRef, out: &mut BTreeSet<String>) {
        match ctx.attrs.try_get(attr) {
            Some(Attribute::DenseResource { handle, .. }) => {
                out.insert(handle.to_string());
            }
            Some(Attribute::Array(items)) => {
                for &item in items {
                    visit(ctx, item, out);
                }
            }
            _ => {}
        }
    }

    let mut out = BTreeSet::new();
    let _ = walk_op::<()>(ctx, op, WalkOrder::PreOrder, &mut |o| {
        for attr in ctx.op_data(o).attributes().iter() {
            visit(ctx, attr.value, &mut out);
        }
        ControlFlow::Continue(WalkAction::Advance)
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationState;
    use crate::insertion::InsertionPoint;
    use crate::types::FloatKind;

    fn custom_op1(ctx: &mut IrContext) -> OpRef {
        let si32 = ctx.types.sint(32);
        let foo = ctx.attrs.string("foo_value");
        let bar = ctx.attrs.string("bar_value");
        ctx.create_op(
            OperationState::new("custom.op1")
                .results([si32, si32])
                .attr("foo", foo)
                .attr("bar", bar)
                .regions(1),
        )
        .unwrap()
    }

    #[test]
    fn generic_op_with_empty_region() {
        let mut ctx = IrContext::new();
        let op = custom_op1(&mut ctx);
        let text = print_op(&ctx, op, &PrintOptions::default()).unwrap();
        insta::assert_snapshot!(text, @r#"
        %0:2 = "custom.op1"() ({
        }) {bar = "bar_value", foo = "foo_value"} : () -> (si32, si32)
        "#);
    }

    #[test]
    fn block_arguments_and_terminator() {
        let mut ctx = IrContext::new();
        let op = custom_op1(&mut ctx);
        let i32_ty = ctx.types.int(32);
        let i64_ty = ctx.types.int(64);
        let region = ctx.regions(op).unwrap().get(0).unwrap();
        let block = ctx.append_block(region, &[i32_ty, i64_ty]).unwrap();
        let term = ctx
            .create_op(OperationState::new("custom.terminator"))
            .unwrap();
        InsertionPoint::at_block_begin(&ctx, block)
            .unwrap()
            .insert(&mut ctx, term)
            .unwrap();

        let text = print_op(&ctx, op, &PrintOptions::default()).unwrap();
        insta::assert_snapshot!(text, @r#"
        %0:2 = "custom.op1"() ({
        ^bb0(%arg0: i32, %arg1: i64):
          "custom.terminator"() : () -> ()
        }) {bar = "bar_value", foo = "foo_value"} : () -> (si32, si32)
        "#);
    }

    #[test]
    fn skip_regions_elides_bodies() {
        let mut ctx = IrContext::new();
        let op = custom_op1(&mut ctx);
        let options = PrintOptions::default().skip_regions(true);
        let text = print_op(&ctx, op, &options).unwrap();
        assert_eq!(
            text,
            r#"%0:2 = "custom.op1"() ({...}) {bar = "bar_value", foo = "foo_value"} : () -> (si32, si32)"#
        );
    }

    #[test]
    fn name_locations_become_value_prefixes() {
        let mut ctx = IrContext::new();
        let i32_ty = ctx.types.int(32);
        let op = ctx
            .create_op(
                OperationState::new("custom.op")
                    .result(i32_ty)
                    .location(Location::name("nom")),
            )
            .unwrap();
        let options = PrintOptions::default().name_loc_as_prefix(true);
        assert!(print_op(&ctx, op, &options).unwrap().starts_with("%nom = "));
        let plain = print_op(&ctx, op, &PrintOptions::default()).unwrap();
        assert!(plain.starts_with("%0 = "));
    }

    #[test]
    fn debug_info_appends_locations() {
        let mut ctx = IrContext::new();
        let op = ctx
            .create_op(
                OperationState::new("custom.op").location(Location::file_line_col("f.mlir", 3, 7)),
            )
            .unwrap();
        let text = print_op(&ctx, op, &PrintOptions::default().debug_info(true, false)).unwrap();
        assert_eq!(text, r#""custom.op"() : () -> () loc("f.mlir":3:7)"#);
        let pretty = print_op(&ctx, op, &PrintOptions::default().debug_info(true, true)).unwrap();
        assert_eq!(pretty, r#""custom.op"() : () -> () "f.mlir":3:7"#);
    }

    #[test]
    fn values_outside_local_scope_are_unknown() {
        let mut ctx = IrContext::new();
        let outer = ctx
            .create_op(OperationState::new("custom.outer").regions(1))
            .unwrap();
        let region = ctx.regions(outer).unwrap().get(0).unwrap();
        let i32_ty = ctx.types.int(32);
        let block = ctx.append_block(region, &[i32_ty]).unwrap();
        let arg = ctx.block_args(block).unwrap().get(0).unwrap();
        let user = ctx
            .create_op(OperationState::new("custom.user").operand(arg))
            .unwrap();
        ctx.append_op(block, user).unwrap();

        let global = print_op(&ctx, user, &PrintOptions::default()).unwrap();
        assert_eq!(global, r#""custom.user"(%arg0) : (i32) -> ()"#);
        let local = print_op(&ctx, user, &PrintOptions::default().local_scope(true)).unwrap();
        assert_eq!(local, r#""custom.user"(<<UNKNOWN SSA VALUE>>) : (i32) -> ()"#);
    }

    #[test]
    fn types_and_attributes() {
        let mut ctx = IrContext::new();
        let i32_ty = ctx.types.int(32);
        let f64_ty = ctx.types.f64();
        let bf16 = ctx.types.float(FloatKind::BF16);
        let tensor = ctx.types.tensor(&[4, DYNAMIC_DIM], i32_ty);
        let func = ctx.types.function(&[i32_ty, bf16], &[tensor]);
        let opaque = ctx.types.opaque("custom", "box", &[i32_ty]);
        assert_eq!(print_type(&ctx, tensor), "tensor<4x?xi32>");
        assert_eq!(print_type(&ctx, func), "(i32, bf16) -> tensor<4x?xi32>");
        assert_eq!(print_type(&ctx, opaque), "!custom.box<i32>");

        let three = ctx.attrs.float(3.0, f64_ty);
        let big = ctx.attrs.float(1e100, f64_ty);
        let inf = ctx.attrs.float(f64::INFINITY, f64_ty);
        let sym = ctx.attrs.symbol_ref("main");
        assert_eq!(print_attribute(&ctx, three), "3.0 : f64");
        assert_eq!(print_attribute(&ctx, big), "1.0e100 : f64");
        assert_eq!(print_attribute(&ctx, inf), "0x7FF0000000000000 : f64");
        assert_eq!(print_attribute(&ctx, sym), "@main");
    }

    #[test]
    fn large_constants_are_elided_on_request() {
        let mut ctx = IrContext::new();
        let i32_ty = ctx.types.int(32);
        let tensor = ctx.types.tensor(&[4], i32_ty);
        let dense = ctx.attrs.intern(Attribute::DenseElements {
            ty: tensor,
            values: DenseValues::Int(vec![1, 2, 3, 4]),
        });
        let op = ctx
            .create_op(OperationState::new("custom.const").attr("value", dense))
            .unwrap();

        let full = print_op(&ctx, op, &PrintOptions::default()).unwrap();
        assert!(full.contains("dense<[1, 2, 3, 4]> : tensor<4xi32>"));
        let elided = print_op(&ctx, op, &PrintOptions::default().elide_elements_above(2)).unwrap();
        assert!(elided.contains("dense_resource<__elided__> : tensor<4xi32>"));
    }

    #[test]
    fn resource_trailer_respects_the_size_limit() {
        let mut ctx = IrContext::new();
        let i8_ty = ctx.types.int(8);
        let tensor = ctx.types.tensor(&[3], i8_ty);
        ctx.add_resource("blob", vec![1, 2, 3]);
        let attr = ctx.attrs.intern(Attribute::DenseResource {
            ty: tensor,
            handle: Symbol::new("blob"),
        });
        let op = ctx
            .create_op(OperationState::new("custom.const").attr("value", attr))
            .unwrap();

        let text = print_op(&ctx, op, &PrintOptions::default()).unwrap();
        assert!(text.contains("dense_resource<blob> : tensor<3xi8>"));
        assert!(text.contains("blob: \"0x010203\""));
        let elided = print_op(&ctx, op, &PrintOptions::default().elide_resources_above(2)).unwrap();
        assert!(elided.contains("blob: \"__elided__\""));
    }

    #[test]
    fn state_can_be_reused_across_prints() {
        let mut ctx = IrContext::new();
        let op = custom_op1(&mut ctx);
        let options = PrintOptions::default();
        let state = AsmState::new(&ctx, op, &options).unwrap();
        let first = print_with_state(&ctx, op, &state, &options).unwrap();
        let second = print_with_state(&ctx, op, &state, &options).unwrap();
        assert_eq!(first, second);
        assert_eq!(state.root(), op);
    }

    #[test]
    fn identifiers_are_sanitized() {
        assert_eq!(sanitize_identifier("a b"), "a_b");
        assert_eq!(sanitize_identifier("3d"), "_3d");
        assert_eq!(sanitize_identifier(""), "_");
    }
}
