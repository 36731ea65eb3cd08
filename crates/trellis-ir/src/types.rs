//! Context-interned types and source locations.

use std::collections::HashMap;

use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::refs::{ContextHandle, ContextId, TypeRef};
use crate::symbol::Symbol;

// ============================================================================
// Location
// ============================================================================

/// Source location attached to operations and block arguments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Location {
    #[default]
    Unknown,
    FileLineCol {
        file: Symbol,
        line: u32,
        col: u32,
    },
    /// A named location, e.g. `loc("nom")`.
    Name(Symbol),
}

impl Location {
    pub fn file_line_col(file: &str, line: u32, col: u32) -> Self {
        Location::FileLineCol {
            file: Symbol::from_dynamic(file),
            line,
            col,
        }
    }

    pub fn name(name: &str) -> Self {
        Location::Name(Symbol::from_dynamic(name))
    }
}

/// The location body without the `loc(...)` wrapper.
impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Unknown => f.write_str("unknown"),
            Location::FileLineCol { file, line, col } => write!(f, "{:?}:{line}:{col}", file.to_string()),
            Location::Name(name) => write!(f, "{:?}", name.to_string()),
        }
    }
}

// ============================================================================
// TypeData
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signedness {
    Signless,
    Signed,
    Unsigned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F16,
    BF16,
    F32,
    F64,
}

impl FloatKind {
    pub fn keyword(self) -> &'static str {
        match self {
            FloatKind::F16 => "f16",
            FloatKind::BF16 => "bf16",
            FloatKind::F32 => "f32",
            FloatKind::F64 => "f64",
        }
    }
}

/// Dynamic tensor dimension marker (`?`).
pub const DYNAMIC_DIM: i64 = -1;

/// Structural description of a type. Two equal descriptions intern to the
/// same [`TypeRef`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeData {
    Integer {
        width: u32,
        signedness: Signedness,
    },
    Float(FloatKind),
    Index,
    None,
    Function {
        inputs: SmallVec<[TypeRef; 4]>,
        results: SmallVec<[TypeRef; 4]>,
    },
    Tensor {
        shape: SmallVec<[i64; 4]>,
        element: TypeRef,
    },
    /// Dialect-defined type printed as `!dialect.name<params>`.
    Opaque {
        dialect: Symbol,
        name: Symbol,
        params: SmallVec<[TypeRef; 4]>,
    },
}

impl TypeData {
    /// Number of elements of a statically shaped tensor, or `None` when the
    /// shape is dynamic or the count does not fit in a `u64`.
    pub fn static_element_count(&self) -> Option<u64> {
        match self {
            TypeData::Tensor { shape, .. } => shape.iter().try_fold(1u64, |acc, &d| {
                u64::try_from(d).ok().and_then(|d| acc.checked_mul(d))
            }),
            _ => None,
        }
    }

    pub fn has_static_shape(&self) -> bool {
        matches!(self, TypeData::Tensor { shape, .. } if shape.iter().all(|&d| d >= 0))
    }
}

// ============================================================================
// TypeInterner
// ============================================================================

/// Deduplicating type storage owned by one context.
pub struct TypeInterner {
    ctx: ContextId,
    types: PrimaryMap<TypeRef, TypeData>,
    dedup: HashMap<TypeData, TypeRef>,
}

impl TypeInterner {
    pub(crate) fn new(ctx: ContextId) -> Self {
        Self {
            ctx,
            types: PrimaryMap::new(),
            dedup: HashMap::new(),
        }
    }

    /// Intern a type, returning the existing reference for an equal one.
    pub fn intern(&mut self, data: TypeData) -> TypeRef {
        if let Some(&r) = self.dedup.get(&data) {
            return r;
        }
        let r = self.types.push(data.clone()).stamped(self.ctx);
        self.dedup.insert(data, r);
        r
    }

    /// Look up an interned type.
    ///
    /// # Panics
    ///
    /// Panics if `ty` was not produced by this interner.
    pub fn get(&self, ty: TypeRef) -> &TypeData {
        self.try_get(ty)
            .unwrap_or_else(|| panic!("type {ty} does not belong to this context"))
    }

    /// Look up an interned type, rejecting foreign handles.
    pub fn try_get(&self, ty: TypeRef) -> Option<&TypeData> {
        if ty.context_id() != self.ctx {
            return None;
        }
        self.types.get(ty)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    // ------------------------------------------------------------------
    // Shorthands
    // ------------------------------------------------------------------

    /// Signless integer, `iN`.
    pub fn int(&mut self, width: u32) -> TypeRef {
        self.intern(TypeData::Integer {
            width,
            signedness: Signedness::Signless,
        })
    }

    /// Signed integer, `siN`.
    pub fn sint(&mut self, width: u32) -> TypeRef {
        self.intern(TypeData::Integer {
            width,
            signedness: Signedness::Signed,
        })
    }

    /// Unsigned integer, `uiN`.
    pub fn uint(&mut self, width: u32) -> TypeRef {
        self.intern(TypeData::Integer {
            width,
            signedness: Signedness::Unsigned,
        })
    }

    pub fn float(&mut self, kind: FloatKind) -> TypeRef {
        self.intern(TypeData::Float(kind))
    }

    pub fn f64(&mut self) -> TypeRef {
        self.float(FloatKind::F64)
    }

    pub fn index(&mut self) -> TypeRef {
        self.intern(TypeData::Index)
    }

    pub fn function(&mut self, inputs: &[TypeRef], results: &[TypeRef]) -> TypeRef {
        self.intern(TypeData::Function {
            inputs: inputs.iter().copied().collect(),
            results: results.iter().copied().collect(),
        })
    }

    pub fn tensor(&mut self, shape: &[i64], element: TypeRef) -> TypeRef {
        self.intern(TypeData::Tensor {
            shape: shape.iter().copied().collect(),
            element,
        })
    }

    pub fn opaque(&mut self, dialect: &str, name: &str, params: &[TypeRef]) -> TypeRef {
        self.intern(TypeData::Opaque {
            dialect: Symbol::from_dynamic(dialect),
            name: Symbol::from_dynamic(name),
            params: params.iter().copied().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates_structurally() {
        let mut types = TypeInterner::new(ContextId::fresh());
        let a = types.int(32);
        let b = types.int(32);
        let c = types.sint(32);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let mut mine = TypeInterner::new(ContextId::fresh());
        let mut theirs = TypeInterner::new(ContextId::fresh());
        mine.int(8);
        let foreign = theirs.int(8);
        assert!(mine.try_get(foreign).is_none());
    }

    #[test]
    fn static_element_count_of_tensors() {
        let mut types = TypeInterner::new(ContextId::fresh());
        let i32_ty = types.int(32);
        let t = types.tensor(&[2, 3], i32_ty);
        assert_eq!(types.get(t).static_element_count(), Some(6));
        let dynamic = types.tensor(&[2, DYNAMIC_DIM], i32_ty);
        assert_eq!(types.get(dynamic).static_element_count(), None);
        assert!(!types.get(dynamic).has_static_shape());

        let huge = types.tensor(&[1 << 32, 1 << 32], i32_ty);
        assert!(types.get(huge).has_static_shape());
        assert_eq!(types.get(huge).static_element_count(), None);
    }
}
