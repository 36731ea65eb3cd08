//! Entity handles into an [`IrContext`](crate::IrContext).
//!
//! Every handle is a 4-byte arena index plus the id of the context that
//! allocated it. Arena maps only look at the index; the context id lets
//! the public API reject handles that belong to another context.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use cranelift_entity::EntityRef;

/// Identity of one [`IrContext`](crate::IrContext).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ContextId(u32);

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

impl ContextId {
    /// Placeholder carried by keys the arena maps mint internally.
    pub(crate) const UNSTAMPED: ContextId = ContextId(0);

    pub(crate) fn fresh() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Common surface of all context-owned handles.
pub trait ContextHandle: Copy + fmt::Display {
    /// Context that allocated this handle.
    fn context_id(self) -> ContextId;
}

macro_rules! context_entity {
    ($(#[$attr:meta])* $name:ident, $prefix:literal) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            index: u32,
            ctx: ContextId,
        }

        impl $name {
            pub(crate) fn stamped(self, ctx: ContextId) -> Self {
                Self { index: self.index, ctx }
            }

            /// Raw arena index.
            pub fn as_u32(self) -> u32 {
                self.index
            }
        }

        impl EntityRef for $name {
            fn new(index: usize) -> Self {
                debug_assert!(index < u32::MAX as usize);
                Self {
                    index: index as u32,
                    ctx: ContextId::UNSTAMPED,
                }
            }

            fn index(self) -> usize {
                self.index as usize
            }
        }

        impl ContextHandle for $name {
            fn context_id(self) -> ContextId {
                self.ctx
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.index)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }
    };
}

context_entity!(
    /// Reference to an operation.
    OpRef,
    "op"
);
context_entity!(
    /// Reference to an SSA value (operation result or block argument).
    ValueRef,
    "v"
);
context_entity!(
    /// Reference to a basic block.
    BlockRef,
    "block"
);
context_entity!(
    /// Reference to a region.
    RegionRef,
    "region"
);
context_entity!(
    /// Reference to an interned type.
    TypeRef,
    "ty"
);
context_entity!(
    /// Reference to an interned attribute.
    AttrRef,
    "attr"
);

/// Where a value is defined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueDef {
    /// The `index`-th result of an operation.
    OpResult(OpRef, u32),
    /// The `index`-th argument of a block.
    BlockArg(BlockRef, u32),
}

impl ValueDef {
    /// Position of the value among its siblings.
    pub fn index(self) -> u32 {
        match self {
            ValueDef::OpResult(_, i) | ValueDef::BlockArg(_, i) => i,
        }
    }
}

impl fmt::Display for ValueDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueDef::OpResult(op, idx) => write!(f, "{op}#{idx}"),
            ValueDef::BlockArg(block, idx) => write!(f, "{block}#{idx}"),
        }
    }
}
