//! Context-interned attributes and the per-operation attribute dictionary.

use std::collections::HashMap;

use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::error::{Collection, IrError, Result};
use crate::refs::{AttrRef, ContextHandle, ContextId, TypeRef};
use crate::sequence::normalize_index;
use crate::symbol::Symbol;

// ============================================================================
// Attribute
// ============================================================================

/// Element payload of a dense constant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DenseValues {
    Int(Vec<i64>),
    /// IEEE-754 bit patterns.
    Float(Vec<u64>),
}

impl DenseValues {
    pub fn len(&self) -> usize {
        match self {
            DenseValues::Int(v) => v.len(),
            DenseValues::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable attribute payload. Interned per context; see [`AttrInterner`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Unit,
    Bool(bool),
    Integer { value: i64, ty: TypeRef },
    Float { bits: u64, ty: TypeRef },
    String(String),
    Type(TypeRef),
    SymbolRef(Symbol),
    Array(Vec<AttrRef>),
    DenseElements { ty: TypeRef, values: DenseValues },
    /// Constant whose payload lives in a context resource blob.
    DenseResource { ty: TypeRef, handle: Symbol },
}

impl Attribute {
    pub fn float(value: f64, ty: TypeRef) -> Self {
        Attribute::Float {
            bits: value.to_bits(),
            ty,
        }
    }

    /// `(value, type)` of an integer attribute.
    pub fn as_integer(&self) -> Option<(i64, TypeRef)> {
        match self {
            Attribute::Integer { value, ty } => Some((*value, *ty)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Attribute::Float { bits, .. } => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::String(s) => Some(s),
            _ => None,
        }
    }

    /// Raw bytes of a string attribute.
    pub fn value_bytes(&self) -> Option<&[u8]> {
        self.as_str().map(str::as_bytes)
    }

    /// Type carried by typed attributes.
    pub fn ty(&self) -> Option<TypeRef> {
        match self {
            Attribute::Integer { ty, .. }
            | Attribute::Float { ty, .. }
            | Attribute::DenseElements { ty, .. }
            | Attribute::DenseResource { ty, .. } => Some(*ty),
            Attribute::Type(ty) => Some(*ty),
            _ => None,
        }
    }
}

// ============================================================================
// AttrInterner
// ============================================================================

/// Deduplicating attribute storage owned by one context.
pub struct AttrInterner {
    ctx: ContextId,
    attrs: PrimaryMap<AttrRef, Attribute>,
    dedup: HashMap<Attribute, AttrRef>,
}

impl AttrInterner {
    pub(crate) fn new(ctx: ContextId) -> Self {
        Self {
            ctx,
            attrs: PrimaryMap::new(),
            dedup: HashMap::new(),
        }
    }

    pub fn intern(&mut self, attr: Attribute) -> AttrRef {
        if let Some(&r) = self.dedup.get(&attr) {
            return r;
        }
        let r = self.attrs.push(attr.clone()).stamped(self.ctx);
        self.dedup.insert(attr, r);
        r
    }

    /// # Panics
    ///
    /// Panics if `attr` was not produced by this interner.
    pub fn get(&self, attr: AttrRef) -> &Attribute {
        self.try_get(attr)
            .unwrap_or_else(|| panic!("attribute {attr} does not belong to this context"))
    }

    /// Look up an attribute, rejecting handles from other contexts.
    pub fn try_get(&self, attr: AttrRef) -> Option<&Attribute> {
        if attr.context_id() != self.ctx {
            return None;
        }
        self.attrs.get(attr)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    // ------------------------------------------------------------------
    // Shorthands
    // ------------------------------------------------------------------

    pub fn unit(&mut self) -> AttrRef {
        self.intern(Attribute::Unit)
    }

    pub fn bool(&mut self, value: bool) -> AttrRef {
        self.intern(Attribute::Bool(value))
    }

    pub fn integer(&mut self, value: i64, ty: TypeRef) -> AttrRef {
        self.intern(Attribute::Integer { value, ty })
    }

    pub fn float(&mut self, value: f64, ty: TypeRef) -> AttrRef {
        self.intern(Attribute::float(value, ty))
    }

    pub fn string(&mut self, value: &str) -> AttrRef {
        self.intern(Attribute::String(value.to_owned()))
    }

    pub fn type_attr(&mut self, ty: TypeRef) -> AttrRef {
        self.intern(Attribute::Type(ty))
    }

    pub fn symbol_ref(&mut self, name: &str) -> AttrRef {
        self.intern(Attribute::SymbolRef(Symbol::from_dynamic(name)))
    }

    pub fn array(&mut self, items: Vec<AttrRef>) -> AttrRef {
        self.intern(Attribute::Array(items))
    }
}

// ============================================================================
// AttributeDict
// ============================================================================

/// One `name = value` entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NamedAttribute {
    pub name: Symbol,
    pub value: AttrRef,
}

/// Attribute dictionary of an operation.
///
/// Keys are unique and kept sorted by their text, so iteration and
/// positional access are stable regardless of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeDict {
    entries: SmallVec<[NamedAttribute; 4]>,
}

impl AttributeDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn search(&self, key: &str) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.name.with_str(|n| n.cmp(key)))
    }

    pub fn get(&self, key: &str) -> Option<AttrRef> {
        self.search(key).ok().map(|i| self.entries[i].value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.search(key).is_ok()
    }

    /// Lookup by key, failing with `KeyNotFound`.
    pub fn lookup(&self, key: &str) -> Result<AttrRef> {
        self.get(key).ok_or_else(|| IrError::KeyNotFound {
            key: key.to_owned(),
        })
    }

    /// Positional lookup; negative indices count from the end.
    pub fn at(&self, index: isize) -> Result<NamedAttribute> {
        let i = normalize_index(index, self.entries.len(), Collection::Attribute)?;
        Ok(self.entries[i])
    }

    /// Insert or replace, returning the previous value.
    pub fn insert(&mut self, name: Symbol, value: AttrRef) -> Option<AttrRef> {
        let key = name.to_string();
        match self.search(&key) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].value, value)),
            Err(i) => {
                self.entries.insert(i, NamedAttribute { name, value });
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrRef> {
        self.search(key).ok().map(|i| self.entries.remove(i).value)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = NamedAttribute> + '_ {
        self.entries.iter().copied()
    }
}

// ============================================================================
// HostValue
// ============================================================================

/// Unchecked value handed over by an embedding layer (a scripting host,
/// command-line flags) before it has been validated against the context.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Type(TypeRef),
    Attr(AttrRef),
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Str(s.to_owned())
    }
}

impl From<AttrRef> for HostValue {
    fn from(a: AttrRef) -> Self {
        HostValue::Attr(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeInterner;

    fn interners() -> (TypeInterner, AttrInterner) {
        let id = ContextId::fresh();
        (TypeInterner::new(id), AttrInterner::new(id))
    }

    #[test]
    fn typed_integer_lookup_reports_type_and_value() {
        let (mut types, mut attrs) = interners();
        let i8_ty = types.int(8);
        let one = attrs.integer(1, i8_ty);

        let mut dict = AttributeDict::new();
        dict.insert(Symbol::new("some.attribute"), one);

        let found = dict.lookup("some.attribute").unwrap();
        assert_eq!(attrs.get(found).as_integer(), Some((1, i8_ty)));
    }

    #[test]
    fn key_and_index_failures_are_distinct() {
        let (_, mut attrs) = interners();
        let mut dict = AttributeDict::new();
        dict.insert(Symbol::new("a"), attrs.unit());

        let by_key = dict.lookup("missing").unwrap_err();
        let by_index = dict.at(5).unwrap_err();
        assert!(matches!(by_key, IrError::KeyNotFound { .. }));
        assert!(matches!(
            by_index,
            IrError::OutOfBounds {
                collection: Collection::Attribute,
                ..
            }
        ));
    }

    #[test]
    fn dictionary_orders_by_key_text_and_replaces() {
        let (_, mut attrs) = interners();
        let foo = attrs.string("foo_value");
        let bar = attrs.string("bar_value");
        let mut dict = AttributeDict::new();
        dict.insert(Symbol::new("foo"), foo);
        dict.insert(Symbol::new("bar"), bar);
        assert_eq!(dict.at(0).unwrap().name, "bar");
        assert_eq!(dict.at(-1).unwrap().name, "foo");

        let baz = attrs.string("baz");
        assert_eq!(dict.insert(Symbol::new("foo"), baz), Some(foo));
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.remove("bar"), Some(bar));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn string_attributes_expose_bytes() {
        let attr = Attribute::String("hello".into());
        assert_eq!(attr.value_bytes(), Some(&b"hello"[..]));
    }

    #[test]
    fn equal_attributes_intern_once() {
        let (mut types, mut attrs) = interners();
        let f64_ty = types.f64();
        assert_eq!(attrs.float(3.0, f64_ty), attrs.float(3.0, f64_ty));
        assert_ne!(attrs.float(3.0, f64_ty), attrs.float(-3.0, f64_ty));
    }
}
