//! Typed wrappers over registered operations.

pub mod builtin;

use crate::context::IrContext;
use crate::error::{IrError, Result};
use crate::refs::OpRef;

/// Typed handle to an operation with a fixed name.
pub trait DialectOp: Sized + Copy {
    /// Fully qualified name, e.g. `builtin.module`.
    const NAME: &'static str;

    /// Wrap `op` without checking its name.
    fn wrap(op: OpRef) -> Self;

    fn op_ref(&self) -> OpRef;

    fn matches(ctx: &IrContext, op: OpRef) -> bool {
        ctx.op_name(op).is_ok_and(|name| name == Self::NAME)
    }

    /// Wrap `op`, failing with [`IrError::NameMismatch`] when it has another
    /// name.
    fn from_op(ctx: &IrContext, op: OpRef) -> Result<Self> {
        let actual = ctx.op_name(op)?;
        if actual != Self::NAME {
            return Err(IrError::NameMismatch {
                expected: Self::NAME.to_owned(),
                actual: actual.to_string(),
            });
        }
        Ok(Self::wrap(op))
    }
}
