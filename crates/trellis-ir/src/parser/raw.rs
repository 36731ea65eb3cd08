//! Raw (unresolved) parse structures and winnow combinators for the text
//! format.
//!
//! Stage one of parsing: text to `Raw*` structures holding names and
//! literals. Resolution of value names, block labels, types and attributes
//! happens in the builder.

use winnow::ascii;
use winnow::combinator::{alt, delimited, opt, preceded, separated, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use std::cell::Cell;
use std::thread::LocalKey;

use crate::context::MAX_NESTING_DEPTH;
use crate::types::{DYNAMIC_DIM, FloatKind, Signedness};

// ============================================================================
// Error type
// ============================================================================

/// Parse error for the text format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the source.
    pub offset: usize,
    /// 1-based line of `offset`.
    pub line: usize,
    /// 1-based column (in characters) of `offset`.
    pub column: usize,
}

impl ParseError {
    pub(crate) fn at(src: &str, offset: usize, message: impl Into<String>) -> Self {
        let (line, column) = line_col(src, offset);
        Self {
            message: message.into(),
            offset,
            line,
            column,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "parse error at {}:{}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// 1-based line and column of a byte offset.
pub(crate) fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let mut end = offset.min(src.len());
    while !src.is_char_boundary(end) {
        end -= 1;
    }
    let prefix = &src[..end];
    let line = prefix.matches('\n').count() + 1;
    let line_start = prefix.rfind('\n').map_or(0, |i| i + 1);
    (line, prefix[line_start..].chars().count() + 1)
}

fn backtrack<T>() -> ModalResult<T> {
    Err(ErrMode::Backtrack(ContextError::new()))
}

thread_local! {
    static REGION_DEPTH: Cell<usize> = const { Cell::new(0) };
    static VALUE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static DEPTH_EXCEEDED: Cell<bool> = const { Cell::new(false) };
}

/// Counts how deep the recursive combinators currently are. Regions and
/// nested types or attributes are counted separately.
struct DepthGuard(&'static LocalKey<Cell<usize>>);

impl DepthGuard {
    fn enter(counter: &'static LocalKey<Cell<usize>>) -> ModalResult<Self> {
        let depth = counter.get();
        if depth >= MAX_NESTING_DEPTH {
            DEPTH_EXCEEDED.set(true);
            return Err(ErrMode::Cut(ContextError::new()));
        }
        counter.set(depth + 1);
        Ok(DepthGuard(counter))
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Whether the last failed parse on this thread stopped at the nesting
/// limit. Clears the flag.
pub(crate) fn take_depth_exceeded() -> bool {
    DEPTH_EXCEEDED.replace(false)
}

// ============================================================================
// Raw (unresolved) structures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawType<'a> {
    Integer {
        width: u32,
        signedness: Signedness,
    },
    Float(FloatKind),
    Index,
    None,
    Function {
        inputs: Vec<RawType<'a>>,
        results: Vec<RawType<'a>>,
    },
    Tensor {
        shape: Vec<i64>,
        element: Box<RawType<'a>>,
    },
    Opaque {
        dialect: &'a str,
        name: &'a str,
        params: Vec<RawType<'a>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RawNumber {
    Int(i64),
    Float(f64),
    /// `0x...` literal; a float bit pattern or an integer depending on the
    /// type it is attached to.
    Hex(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawAttribute<'a> {
    Unit,
    Bool(bool),
    Number(RawNumber, Option<RawType<'a>>),
    String(String),
    Symbol(String),
    Array(Vec<RawAttribute<'a>>),
    Dense {
        values: Vec<RawNumber>,
        /// `dense<5>`: one element replicated over the whole shape.
        splat: bool,
        ty: RawType<'a>,
    },
    DenseResource(String, RawType<'a>),
    Type(RawType<'a>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawLocation {
    Unknown,
    FileLineCol(String, u32, u32),
    Name(String),
}

/// `%name` or `%name#index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawValueUse<'a> {
    pub name: &'a str,
    pub index: Option<usize>,
}

impl RawValueUse<'_> {
    /// Key in the builder's value map.
    pub fn key(&self) -> String {
        match self.index {
            Some(i) => format!("{}#{i}", self.name),
            None => self.name.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RawOperation<'a> {
    /// Length of the input remaining where the operation starts.
    pub tail: usize,
    /// `%name` or `%name:count` definitions.
    pub results: Vec<(&'a str, usize)>,
    pub name: String,
    pub operands: Vec<RawValueUse<'a>>,
    pub successors: Vec<&'a str>,
    pub regions: Vec<RawRegion<'a>>,
    pub attributes: Vec<(String, RawAttribute<'a>)>,
    /// `(inputs) -> (results)` of the generic form; `None` for the module
    /// shorthand.
    pub signature: Option<(Vec<RawType<'a>>, Vec<RawType<'a>>)>,
    pub location: Option<RawLocation>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawRegion<'a> {
    pub blocks: Vec<RawBlock<'a>>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawBlock<'a> {
    pub tail: usize,
    /// `None` for an entry block written without a label.
    pub label: Option<&'a str>,
    pub args: Vec<(&'a str, RawType<'a>)>,
    pub ops: Vec<RawOperation<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawBlob {
    Hex(String),
    Elided,
}

// ============================================================================
// Lexical parsers
// ============================================================================

/// Skip whitespace and `//` line comments.
pub(crate) fn ws(input: &mut &str) -> ModalResult<()> {
    loop {
        take_while(0.., |c: char| c.is_ascii_whitespace())
            .void()
            .parse_next(input)?;
        if input.starts_with("//") {
            take_while(0.., |c: char| c != '\n')
                .void()
                .parse_next(input)?;
        } else {
            return Ok(());
        }
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// Parse a bare identifier: [a-zA-Z_][a-zA-Z0-9_$.]*
pub(crate) fn bare_id<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_id_char),
    )
        .take()
        .parse_next(input)
}

/// Name part of `%name` and `^name`.
fn suffix_id<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., is_id_char).parse_next(input)
}

/// Parse a value use: `%name` or `%name#N`.
pub(crate) fn value_use<'a>(input: &mut &'a str) -> ModalResult<RawValueUse<'a>> {
    (
        preceded('%', suffix_id),
        opt(preceded('#', ascii::dec_uint::<_, usize, _>)),
    )
        .map(|(name, index)| RawValueUse { name, index })
        .parse_next(input)
}

/// Parse a result definition: `%name` or `%name:N`.
fn result_def<'a>(input: &mut &'a str) -> ModalResult<(&'a str, usize)> {
    (
        preceded('%', suffix_id),
        opt(preceded(':', ascii::dec_uint::<_, usize, _>)),
    )
        .map(|(name, count)| (name, count.unwrap_or(1)))
        .parse_next(input)
}

/// Parse a block label: `^bb0`.
pub(crate) fn block_label<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    preceded('^', suffix_id).parse_next(input)
}

/// Parse a string literal: "content"
pub(crate) fn string_lit(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut result = String::new();
    loop {
        let c = any.parse_next(input)?;
        match c {
            '"' => break,
            '\\' => {
                let escaped = any.parse_next(input)?;
                match escaped {
                    '"' => result.push('"'),
                    '\\' => result.push('\\'),
                    'n' => result.push('\n'),
                    't' => result.push('\t'),
                    'r' => result.push('\r'),
                    '0' => result.push('\0'),
                    'x' => {
                        let h1 = any.parse_next(input)?;
                        let h2 = any.parse_next(input)?;
                        match u8::from_str_radix(&format!("{h1}{h2}"), 16) {
                            Ok(code) => result.push(char::from(code)),
                            Err(_) => {
                                result.push_str("\\x");
                                result.push(h1);
                                result.push(h2);
                            }
                        }
                    }
                    _ => {
                        result.push('\\');
                        result.push(escaped);
                    }
                }
            }
            _ => result.push(c),
        }
    }
    Ok(result)
}

/// Parse a symbol reference: @name or @"quoted name"
pub(crate) fn symbol_ref(input: &mut &str) -> ModalResult<String> {
    '@'.parse_next(input)?;
    if input.starts_with('"') {
        string_lit.parse_next(input)
    } else {
        bare_id.map(str::to_owned).parse_next(input)
    }
}

/// Dictionary key or resource name: bare or quoted.
fn key(input: &mut &str) -> ModalResult<String> {
    alt((bare_id.map(str::to_owned), string_lit)).parse_next(input)
}

/// Parse a `0x...` literal.
fn hex_lit(input: &mut &str) -> ModalResult<u64> {
    let digits = preceded(
        alt(("0x", "0X")),
        take_while(1.., |c: char| c.is_ascii_hexdigit()),
    )
    .parse_next(input)?;
    match u64::from_str_radix(digits, 16) {
        Ok(v) => Ok(v),
        Err(_) => backtrack(),
    }
}

/// Parse a float literal that MUST contain a decimal point.
/// Accepts optional exponent notation: `3.14`, `-1.0e10`, `2.5e-3`.
pub(crate) fn float_with_dot(input: &mut &str) -> ModalResult<f64> {
    let s = (
        opt(one_of(['-', '+'])),
        take_while(1.., |c: char| c.is_ascii_digit()),
        '.',
        take_while(0.., |c: char| c.is_ascii_digit()),
        opt((
            one_of(['e', 'E']),
            opt(one_of(['+', '-'])),
            take_while(1.., |c: char| c.is_ascii_digit()),
        )),
    )
        .take()
        .parse_next(input)?;
    match s.parse::<f64>() {
        Ok(v) => Ok(v),
        Err(_) => backtrack(),
    }
}

pub(crate) fn raw_number(input: &mut &str) -> ModalResult<RawNumber> {
    alt((
        hex_lit.map(RawNumber::Hex),
        float_with_dot.map(RawNumber::Float),
        ascii::dec_int::<_, i64, _>.map(RawNumber::Int),
    ))
    .parse_next(input)
}

// ============================================================================
// Types
// ============================================================================

/// Parse a type: builtin keyword, function type, tensor or `!dialect.name`.
pub(crate) fn raw_type<'a>(input: &mut &'a str) -> ModalResult<RawType<'a>> {
    let _depth = DepthGuard::enter(&VALUE_DEPTH)?;
    if input.starts_with('(') {
        return function_type
            .map(|(inputs, results)| RawType::Function { inputs, results })
            .parse_next(input);
    }
    if input.starts_with('!') {
        return opaque_type.parse_next(input);
    }
    let checkpoint = *input;
    let word = bare_id.parse_next(input)?;
    let ty = match word {
        "index" => RawType::Index,
        "none" => RawType::None,
        "f16" => RawType::Float(FloatKind::F16),
        "bf16" => RawType::Float(FloatKind::BF16),
        "f32" => RawType::Float(FloatKind::F32),
        "f64" => RawType::Float(FloatKind::F64),
        "tensor" => return tensor_body.parse_next(input),
        _ => match integer_keyword(word) {
            Some(ty) => ty,
            None => {
                *input = checkpoint;
                return backtrack();
            }
        },
    };
    Ok(ty)
}

/// `i32`, `si8`, `ui16`.
fn integer_keyword(word: &str) -> Option<RawType<'static>> {
    let (signedness, digits) = if let Some(rest) = word.strip_prefix("si") {
        (Signedness::Signed, rest)
    } else if let Some(rest) = word.strip_prefix("ui") {
        (Signedness::Unsigned, rest)
    } else {
        (Signedness::Signless, word.strip_prefix('i')?)
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let width = digits.parse().ok()?;
    Some(RawType::Integer { width, signedness })
}

fn type_list<'a>(input: &mut &'a str) -> ModalResult<Vec<RawType<'a>>> {
    delimited(
        ('(', ws),
        separated(0.., (ws, raw_type, ws).map(|(_, t, _)| t), ','),
        (ws, ')'),
    )
    .parse_next(input)
}

/// Parse `(inputs) -> result` or `(inputs) -> (results)`.
pub(crate) fn function_type<'a>(
    input: &mut &'a str,
) -> ModalResult<(Vec<RawType<'a>>, Vec<RawType<'a>>)> {
    let inputs = type_list.parse_next(input)?;
    (ws, "->", ws).void().parse_next(input)?;
    let results = if input.starts_with('(') {
        type_list.parse_next(input)?
    } else {
        vec![raw_type.parse_next(input)?]
    };
    Ok((inputs, results))
}

/// Parse the part of `tensor<4x?xi32>` after the keyword.
fn tensor_body<'a>(input: &mut &'a str) -> ModalResult<RawType<'a>> {
    '<'.parse_next(input)?;
    let mut shape = Vec::new();
    while let Some(dim) = opt(terminated(
        alt(('?'.value(DYNAMIC_DIM), ascii::dec_int::<_, i64, _>)),
        'x',
    ))
    .parse_next(input)?
    {
        shape.push(dim);
    }
    let element = raw_type.parse_next(input)?;
    '>'.parse_next(input)?;
    Ok(RawType::Tensor {
        shape,
        element: Box::new(element),
    })
}

/// Parse `!dialect.name` with optional `<params>`.
fn opaque_type<'a>(input: &mut &'a str) -> ModalResult<RawType<'a>> {
    '!'.parse_next(input)?;
    let full = bare_id.parse_next(input)?;
    let Some((dialect, name)) = full.split_once('.') else {
        return backtrack();
    };
    let params = opt(delimited(
        ('<', ws),
        separated(0.., (ws, raw_type, ws).map(|(_, t, _)| t), ','),
        (ws, '>'),
    ))
    .parse_next(input)?
    .unwrap_or_default();
    Ok(RawType::Opaque {
        dialect,
        name,
        params,
    })
}

// ============================================================================
// Attributes and locations
// ============================================================================

fn type_suffix<'a>(input: &mut &'a str) -> ModalResult<RawType<'a>> {
    preceded((ws, ':', ws), raw_type).parse_next(input)
}

/// Parse an attribute value.
pub(crate) fn raw_attr_value<'a>(input: &mut &'a str) -> ModalResult<RawAttribute<'a>> {
    alt((
        "unit".value(RawAttribute::Unit),
        "true".value(RawAttribute::Bool(true)),
        "false".value(RawAttribute::Bool(false)),
        dense_attr,
        dense_resource_attr,
        string_lit.map(RawAttribute::String),
        symbol_ref.map(RawAttribute::Symbol),
        array_attr,
        (raw_number, opt(type_suffix)).map(|(n, ty)| RawAttribute::Number(n, ty)),
        raw_type.map(RawAttribute::Type),
    ))
    .parse_next(input)
}

fn array_attr<'a>(input: &mut &'a str) -> ModalResult<RawAttribute<'a>> {
    '['.parse_next(input)?;
    let _depth = DepthGuard::enter(&VALUE_DEPTH)?;
    ws.parse_next(input)?;
    let items: Vec<_> = separated(0.., (ws, raw_attr_value, ws).map(|(_, a, _)| a), ',')
        .parse_next(input)?;
    (ws, ']').void().parse_next(input)?;
    Ok(RawAttribute::Array(items))
}

/// Nested `[...]` lists are flattened in row-major order.
fn dense_elements(input: &mut &str, out: &mut Vec<RawNumber>) -> ModalResult<()> {
    ws.parse_next(input)?;
    if input.starts_with('[') {
        '['.parse_next(input)?;
        let _depth = DepthGuard::enter(&VALUE_DEPTH)?;
        ws.parse_next(input)?;
        if !input.starts_with(']') {
            loop {
                dense_elements(input, out)?;
                ws.parse_next(input)?;
                if opt(',').parse_next(input)?.is_none() {
                    break;
                }
            }
        }
        ws.parse_next(input)?;
        ']'.parse_next(input)?;
    } else {
        out.push(raw_number.parse_next(input)?);
    }
    Ok(())
}

/// Parse `dense<[1, 2]> : tensor<2xi32>` or the splat `dense<1> : ...`.
fn dense_attr<'a>(input: &mut &'a str) -> ModalResult<RawAttribute<'a>> {
    "dense<".parse_next(input)?;
    ws.parse_next(input)?;
    let splat = !input.starts_with('[');
    let mut values = Vec::new();
    dense_elements(input, &mut values)?;
    (ws, '>').void().parse_next(input)?;
    let ty = type_suffix.parse_next(input)?;
    Ok(RawAttribute::Dense { values, splat, ty })
}

/// Parse `dense_resource<name> : type`.
fn dense_resource_attr<'a>(input: &mut &'a str) -> ModalResult<RawAttribute<'a>> {
    let handle = delimited(("dense_resource<", ws), key, (ws, '>')).parse_next(input)?;
    let ty = type_suffix.parse_next(input)?;
    Ok(RawAttribute::DenseResource(handle, ty))
}

/// Parse an attribute dict: `{key = value, flag, ...}`. Entries without a
/// value are unit attributes.
pub(crate) fn raw_attr_dict<'a>(
    input: &mut &'a str,
) -> ModalResult<Vec<(String, RawAttribute<'a>)>> {
    delimited(
        ('{', ws),
        separated(
            0..,
            (
                ws,
                key,
                ws,
                opt(preceded(('=', ws), raw_attr_value)),
                ws,
            )
                .map(|(_, k, _, v, _)| (k, v.unwrap_or(RawAttribute::Unit))),
            ',',
        ),
        (ws, '}'),
    )
    .parse_next(input)
}

/// Parse `loc(unknown)`, `loc("name")` or `loc("file":line:col)`.
pub(crate) fn raw_location(input: &mut &str) -> ModalResult<RawLocation> {
    ("loc", ws, '(', ws).void().parse_next(input)?;
    let location = alt((
        "unknown".value(RawLocation::Unknown),
        (
            string_lit,
            opt((
                ':',
                ascii::dec_uint::<_, u32, _>,
                ':',
                ascii::dec_uint::<_, u32, _>,
            )),
        )
            .map(|(s, pos)| match pos {
                Some((_, line, _, col)) => RawLocation::FileLineCol(s, line, col),
                None => RawLocation::Name(s),
            }),
    ))
    .parse_next(input)?;
    (ws, ')').void().parse_next(input)?;
    Ok(location)
}

// ============================================================================
// Operations, blocks and regions
// ============================================================================

/// Parse result list: `%0 =` or `%0:2, %1 =`
fn result_list<'a>(input: &mut &'a str) -> ModalResult<Vec<(&'a str, usize)>> {
    let results = separated(1.., (ws, result_def, ws).map(|(_, r, _)| r), ',').parse_next(input)?;
    ws.parse_next(input)?;
    '='.parse_next(input)?;
    Ok(results)
}

fn operand_list<'a>(input: &mut &'a str) -> ModalResult<Vec<RawValueUse<'a>>> {
    delimited(
        ('(', ws),
        separated(0.., (ws, value_use, ws).map(|(_, v, _)| v), ','),
        (ws, ')'),
    )
    .parse_next(input)
}

/// Parse a successor list: `[^bb0, ^bb1]`
fn successor_list<'a>(input: &mut &'a str) -> ModalResult<Vec<&'a str>> {
    delimited(
        ('[', ws),
        separated(1.., (ws, block_label, ws).map(|(_, l, _)| l), ','),
        (ws, ']'),
    )
    .parse_next(input)
}

fn region_list<'a>(input: &mut &'a str) -> ModalResult<Vec<RawRegion<'a>>> {
    delimited(
        ('(', ws),
        separated(1.., (ws, raw_region, ws).map(|(_, r, _)| r), ','),
        (ws, ')'),
    )
    .parse_next(input)
}

/// Parse a single operation.
///
/// Grammar:
/// ```text
/// [results =] "name"(operands) [[successors]] [(regions)] [{attrs}] : (T) -> (R) [loc]
/// [results =] module [@name] [attributes {attrs}] region [loc]
/// ```
pub(crate) fn raw_operation<'a>(input: &mut &'a str) -> ModalResult<RawOperation<'a>> {
    ws.parse_next(input)?;
    let tail = input.len();

    let results = opt(result_list).parse_next(input)?.unwrap_or_default();
    ws.parse_next(input)?;

    let mut op = RawOperation {
        tail,
        results,
        name: String::new(),
        operands: Vec::new(),
        successors: Vec::new(),
        regions: Vec::new(),
        attributes: Vec::new(),
        signature: None,
        location: None,
    };

    if input.starts_with('"') {
        op.name = string_lit.parse_next(input)?;
        ws.parse_next(input)?;
        op.operands = operand_list.parse_next(input)?;
        op.successors = opt(preceded(ws, successor_list))
            .parse_next(input)?
            .unwrap_or_default();
        ws.parse_next(input)?;
        if input.starts_with('(') {
            op.regions = region_list.parse_next(input)?;
        }
        ws.parse_next(input)?;
        if input.starts_with('{') {
            op.attributes = raw_attr_dict.parse_next(input)?;
        }
        (ws, ':', ws).void().parse_next(input)?;
        op.signature = Some(function_type.parse_next(input)?);
    } else {
        let keyword = bare_id.parse_next(input)?;
        if keyword != "module" {
            return backtrack();
        }
        ws.parse_next(input)?;
        if let Some(name) = opt(symbol_ref).parse_next(input)? {
            op.attributes
                .push(("sym_name".to_owned(), RawAttribute::String(name)));
        }
        if let Some(attrs) =
            opt(preceded((ws, "attributes", ws), raw_attr_dict)).parse_next(input)?
        {
            op.attributes.extend(attrs);
        }
        ws.parse_next(input)?;
        op.name = "builtin.module".to_owned();
        op.regions = vec![raw_region.parse_next(input)?];
    }

    op.location = opt(preceded(ws, raw_location)).parse_next(input)?;
    Ok(op)
}

fn ops_until_block_end<'a>(input: &mut &'a str) -> ModalResult<Vec<RawOperation<'a>>> {
    let mut ops = Vec::new();
    loop {
        ws.parse_next(input)?;
        if input.starts_with('^') || input.starts_with('}') || input.is_empty() {
            break;
        }
        ops.push(raw_operation.parse_next(input)?);
    }
    Ok(ops)
}

/// Parse a block: `^label(%a: type, ...): ops...`
pub(crate) fn raw_block<'a>(input: &mut &'a str) -> ModalResult<RawBlock<'a>> {
    ws.parse_next(input)?;
    let tail = input.len();
    let label = block_label.parse_next(input)?;

    let args = opt(delimited(
        ('(', ws),
        separated(
            0..,
            (ws, '%', suffix_id, ws, ':', ws, raw_type, ws)
                .map(|(_, _, name, _, _, _, ty, _)| (name, ty)),
            ',',
        ),
        (ws, ')'),
    ))
    .parse_next(input)?
    .unwrap_or_default();

    ws.parse_next(input)?;
    ':'.parse_next(input)?;
    let ops = ops_until_block_end.parse_next(input)?;

    Ok(RawBlock {
        tail,
        label: Some(label),
        args,
        ops,
    })
}

/// Parse a region: `{ ops... ^bb1: ops... }`. Operations before the first
/// label form an unlabeled entry block.
pub(crate) fn raw_region<'a>(input: &mut &'a str) -> ModalResult<RawRegion<'a>> {
    '{'.parse_next(input)?;
    let _depth = DepthGuard::enter(&REGION_DEPTH)?;
    ws.parse_next(input)?;

    let mut blocks = Vec::new();
    if !input.starts_with('^') && !input.starts_with('}') {
        let tail = input.len();
        let ops = ops_until_block_end.parse_next(input)?;
        blocks.push(RawBlock {
            tail,
            label: None,
            args: Vec::new(),
            ops,
        });
    }
    loop {
        ws.parse_next(input)?;
        if !input.starts_with('^') {
            break;
        }
        blocks.push(raw_block.parse_next(input)?);
    }

    ws.parse_next(input)?;
    '}'.parse_next(input)?;
    Ok(RawRegion { blocks })
}

/// Parse the resource trailer:
/// `{-# dialect_resources: { builtin: { name: "0x..." } } #-}`
pub(crate) fn raw_resources(input: &mut &str) -> ModalResult<Vec<(String, RawBlob)>> {
    ("{-#", ws, "dialect_resources", ws, ':', ws, '{', ws)
        .void()
        .parse_next(input)?;
    let sections: Vec<Vec<(String, RawBlob)>> = separated(
        0..,
        (
            ws,
            bare_id,
            ws,
            ':',
            ws,
            delimited(
                ('{', ws),
                separated(
                    0..,
                    (ws, key, ws, ':', ws, string_lit, ws).map(|(_, k, _, _, _, v, _)| {
                        let blob = if v == "__elided__" {
                            RawBlob::Elided
                        } else {
                            RawBlob::Hex(v)
                        };
                        (k, blob)
                    }),
                    ',',
                ),
                (ws, '}'),
            ),
            ws,
        )
            .map(|(_, _, _, _, _, entries, _): (_, _, _, _, _, Vec<(String, RawBlob)>, _)| entries),
        ',',
    )
    .parse_next(input)?;
    (ws, '}', ws, "#-}").void().parse_next(input)?;
    Ok(sections.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtin_types() {
        let cases = [
            ("i32", RawType::Integer { width: 32, signedness: Signedness::Signless }),
            ("si8", RawType::Integer { width: 8, signedness: Signedness::Signed }),
            ("ui16", RawType::Integer { width: 16, signedness: Signedness::Unsigned }),
            ("bf16", RawType::Float(FloatKind::BF16)),
            ("index", RawType::Index),
        ];
        for (text, expected) in cases {
            let mut input = text;
            let ty = raw_type.parse_next(&mut input).expect("should parse type");
            assert_eq!(ty, expected, "failed for input: {text}");
        }
    }

    #[test]
    fn test_parse_tensor_and_function_types() {
        let mut input = "tensor<4x?xi32>";
        let ty = raw_type.parse_next(&mut input).expect("should parse tensor");
        let RawType::Tensor { shape, element } = ty else {
            panic!("expected tensor");
        };
        assert_eq!(shape, vec![4, DYNAMIC_DIM]);
        assert!(matches!(*element, RawType::Integer { width: 32, .. }));

        let mut input = "(i32, f64) -> (i1, i1)";
        let (inputs, results) = function_type
            .parse_next(&mut input)
            .expect("should parse function type");
        assert_eq!(inputs.len(), 2);
        assert_eq!(results.len(), 2);

        let mut input = "() -> ((i32) -> i32)";
        let (_, results) = function_type.parse_next(&mut input).unwrap();
        assert!(matches!(results[0], RawType::Function { .. }));
    }

    #[test]
    fn test_parse_opaque_type() {
        let mut input = "!custom.box<i32>";
        let ty = raw_type.parse_next(&mut input).expect("should parse opaque");
        assert!(matches!(
            ty,
            RawType::Opaque { dialect: "custom", name: "box", ref params } if params.len() == 1
        ));
    }

    #[test]
    fn test_parse_attribute_values() {
        let mut input = "1 : i8";
        let attr = raw_attr_value.parse_next(&mut input).unwrap();
        assert!(matches!(attr, RawAttribute::Number(RawNumber::Int(1), Some(_))));

        let mut input = "1.0e100 : f64";
        let attr = raw_attr_value.parse_next(&mut input).unwrap();
        assert!(matches!(attr, RawAttribute::Number(RawNumber::Float(f), _) if f == 1e100));

        let mut input = "0x7FF0000000000000 : f64";
        let attr = raw_attr_value.parse_next(&mut input).unwrap();
        assert!(matches!(
            attr,
            RawAttribute::Number(RawNumber::Hex(0x7FF0_0000_0000_0000), _)
        ));

        let mut input = "@\"quoted name\"";
        let attr = raw_attr_value.parse_next(&mut input).unwrap();
        assert_eq!(attr, RawAttribute::Symbol("quoted name".to_owned()));
    }

    #[test]
    fn test_parse_dense_flattens_nested_lists() {
        let mut input = "dense<[[1, 2], [3, 4]]> : tensor<2x2xi32>";
        let attr = raw_attr_value.parse_next(&mut input).unwrap();
        let RawAttribute::Dense { values, splat, .. } = attr else {
            panic!("expected dense");
        };
        assert!(!splat);
        assert_eq!(
            values,
            vec![
                RawNumber::Int(1),
                RawNumber::Int(2),
                RawNumber::Int(3),
                RawNumber::Int(4)
            ]
        );
    }

    #[test]
    fn test_parse_attr_dict_with_unit_entries() {
        let mut input = "{flag, \"some.attribute\" = 1 : i8, name = \"x\"}";
        let dict = raw_attr_dict.parse_next(&mut input).unwrap();
        assert_eq!(dict.len(), 3);
        assert_eq!(dict[0], ("flag".to_owned(), RawAttribute::Unit));
        assert_eq!(dict[1].0, "some.attribute");
    }

    #[test]
    fn test_parse_string_escapes() {
        let cases = [
            (r#""a\nb""#, "a\nb"),
            (r#""a\\b""#, "a\\b"),
            (r#""a\"b""#, "a\"b"),
            (r#""a\x01b""#, "a\x01b"),
        ];
        for (text, expected) in cases {
            let mut input = text;
            let result = string_lit.parse_next(&mut input).expect("should parse");
            assert_eq!(result, expected, "failed for input: {text}");
        }
    }

    #[test]
    fn test_parse_locations() {
        let mut input = "loc(\"f.mlir\":3:7)";
        assert_eq!(
            raw_location.parse_next(&mut input).unwrap(),
            RawLocation::FileLineCol("f.mlir".to_owned(), 3, 7)
        );
        let mut input = "loc(\"nom\")";
        assert_eq!(
            raw_location.parse_next(&mut input).unwrap(),
            RawLocation::Name("nom".to_owned())
        );
        let mut input = "loc(unknown)";
        assert_eq!(
            raw_location.parse_next(&mut input).unwrap(),
            RawLocation::Unknown
        );
    }

    #[test]
    fn test_parse_generic_operation() {
        let mut input = r#"%0:2 = "custom.op1"(%a, %b#1) [^bb1] ({
        ^bb0(%arg0: i32):
          "custom.terminator"() : () -> ()
        }) {foo = "x"} : (i32, i64) -> (si32, si32) loc("nom")"#;
        let op = raw_operation.parse_next(&mut input).expect("should parse op");
        assert_eq!(op.results, vec![("0", 2)]);
        assert_eq!(op.name, "custom.op1");
        assert_eq!(op.operands[1].key(), "b#1");
        assert_eq!(op.successors, vec!["bb1"]);
        assert_eq!(op.regions[0].blocks[0].args.len(), 1);
        assert_eq!(op.regions[0].blocks[0].ops.len(), 1);
        assert_eq!(op.location, Some(RawLocation::Name("nom".to_owned())));
        assert!(input.is_empty());
    }

    #[test]
    fn test_parse_module_shorthand() {
        let mut input = "module @m attributes {flag} {\n  \"custom.op\"() : () -> ()\n}";
        let op = raw_operation.parse_next(&mut input).unwrap();
        assert_eq!(op.name, "builtin.module");
        assert_eq!(op.attributes.len(), 2);
        let body = &op.regions[0].blocks[0];
        assert_eq!(body.label, None);
        assert_eq!(body.ops.len(), 1);
    }

    #[test]
    fn test_parse_resource_trailer() {
        let mut input = "{-#\n  dialect_resources: {\n    builtin: {\n      blob: \"0x0102\",\n      big: \"__elided__\"\n    }\n  }\n#-}";
        let blobs = raw_resources.parse_next(&mut input).unwrap();
        assert_eq!(
            blobs,
            vec![
                ("blob".to_owned(), RawBlob::Hex("0x0102".to_owned())),
                ("big".to_owned(), RawBlob::Elided),
            ]
        );
    }

    #[test]
    fn line_and_column_are_one_based() {
        assert_eq!(line_col("abc\ndef", 0), (1, 1));
        assert_eq!(line_col("abc\ndef", 5), (2, 2));
    }
}
