//! Insertion cursor for attaching detached operations to a block.

use crate::context::IrContext;
use crate::error::{IrError, Result};
use crate::refs::{BlockRef, OpRef};

/// A position inside a block: before a given operation, or at the end.
///
/// The cursor never advances. Repeated inserts before an anchor all land
/// immediately before it, so they keep the order in which they were
/// inserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertionPoint {
    block: BlockRef,
    anchor: Option<OpRef>,
}

impl InsertionPoint {
    /// Before the first operation of `block` (the end, if it is empty).
    pub fn at_block_begin(ctx: &IrContext, block: BlockRef) -> Result<Self> {
        let anchor = ctx.first_op(block)?;
        Ok(Self { block, anchor })
    }

    pub fn at_block_end(ctx: &IrContext, block: BlockRef) -> Result<Self> {
        ctx.block(block)?;
        Ok(Self {
            block,
            anchor: None,
        })
    }

    /// Immediately before `op`, which must be attached.
    pub fn before(ctx: &IrContext, op: OpRef) -> Result<Self> {
        let data = ctx.op(op)?;
        let block = data.parent_block().ok_or_else(|| IrError::NotAttached {
            op: data.name().to_string(),
        })?;
        Ok(Self {
            block,
            anchor: Some(op),
        })
    }

    /// Immediately after `op`, which must be attached.
    pub fn after(ctx: &IrContext, op: OpRef) -> Result<Self> {
        let here = Self::before(ctx, op)?;
        Ok(Self {
            block: here.block,
            anchor: ctx.next_op(op)?,
        })
    }

    /// Before the block's terminator (its last operation).
    pub fn before_terminator(ctx: &IrContext, block: BlockRef) -> Result<Self> {
        let anchor = ctx.last_op(block)?;
        Ok(Self { block, anchor })
    }

    pub fn block(&self) -> BlockRef {
        self.block
    }

    /// `None` when the point is at the end of the block.
    pub fn anchor(&self) -> Option<OpRef> {
        self.anchor
    }

    /// Attach a detached `op` at this position.
    pub fn insert(&self, ctx: &mut IrContext, op: OpRef) -> Result<()> {
        ctx.block(self.block)?;
        ctx.ensure_insertable(op, self.block)?;
        if let Some(anchor) = self.anchor {
            let anchor_block = ctx.op(anchor)?.parent_block();
            if anchor_block != Some(self.block) {
                return Err(IrError::StaleInsertionPoint {
                    anchor: ctx.op_name(anchor)?.to_string(),
                });
            }
        }
        ctx.link_before(op, self.block, self.anchor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationState;
    use crate::error::ErrorKind;

    fn holder(ctx: &mut IrContext) -> BlockRef {
        let op = ctx
            .create_op(OperationState::new("custom.holder").regions(1))
            .unwrap();
        let region = ctx.regions(op).unwrap().get(0).unwrap();
        ctx.append_block(region, &[]).unwrap()
    }

    fn names(ctx: &IrContext, block: BlockRef) -> Vec<String> {
        ctx.block_ops(block)
            .unwrap()
            .iter()
            .map(|o| ctx.op_name(o).unwrap().to_string())
            .collect()
    }

    fn new_op(ctx: &mut IrContext, name: &str) -> OpRef {
        ctx.create_op(OperationState::new(name)).unwrap()
    }

    #[test]
    fn repeated_inserts_before_anchor_keep_order() {
        let mut ctx = IrContext::new();
        let block = holder(&mut ctx);
        let term = new_op(&mut ctx, "custom.terminator");
        ctx.append_op(block, term).unwrap();

        let ip = InsertionPoint::at_block_begin(&ctx, block).unwrap();
        for name in ["custom.first", "custom.second"] {
            let op = new_op(&mut ctx, name);
            ip.insert(&mut ctx, op).unwrap();
        }
        assert_eq!(
            names(&ctx, block),
            ["custom.first", "custom.second", "custom.terminator"]
        );
    }

    #[test]
    fn block_begin_of_empty_block_appends() {
        let mut ctx = IrContext::new();
        let block = holder(&mut ctx);
        let ip = InsertionPoint::at_block_begin(&ctx, block).unwrap();
        assert_eq!(ip.anchor(), None);
        let op = new_op(&mut ctx, "custom.terminator");
        ip.insert(&mut ctx, op).unwrap();
        assert_eq!(names(&ctx, block), ["custom.terminator"]);
    }

    #[test]
    fn inserting_an_attached_op_fails() {
        let mut ctx = IrContext::new();
        let block = holder(&mut ctx);
        let op = new_op(&mut ctx, "custom.op");
        let ip = InsertionPoint::at_block_end(&ctx, block).unwrap();
        ip.insert(&mut ctx, op).unwrap();
        let err = ip.insert(&mut ctx, op).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OwnershipViolation);
        assert!(err.to_string().contains("already attached"));
    }

    #[test]
    fn after_and_before_terminator() {
        let mut ctx = IrContext::new();
        let block = holder(&mut ctx);
        let a = new_op(&mut ctx, "custom.a");
        let term = new_op(&mut ctx, "custom.terminator");
        ctx.append_op(block, a).unwrap();
        ctx.append_op(block, term).unwrap();

        let b = new_op(&mut ctx, "custom.b");
        InsertionPoint::after(&ctx, a)
            .unwrap()
            .insert(&mut ctx, b)
            .unwrap();
        let c = new_op(&mut ctx, "custom.c");
        InsertionPoint::before_terminator(&ctx, block)
            .unwrap()
            .insert(&mut ctx, c)
            .unwrap();
        assert_eq!(
            names(&ctx, block),
            ["custom.a", "custom.b", "custom.c", "custom.terminator"]
        );
    }

    #[test]
    fn stale_anchor_is_detected() {
        let mut ctx = IrContext::new();
        let block = holder(&mut ctx);
        let anchor = new_op(&mut ctx, "custom.anchor");
        ctx.append_op(block, anchor).unwrap();
        let ip = InsertionPoint::before(&ctx, anchor).unwrap();
        ctx.detach_op(anchor).unwrap();

        let op = new_op(&mut ctx, "custom.op");
        assert!(matches!(
            ip.insert(&mut ctx, op),
            Err(IrError::StaleInsertionPoint { .. })
        ));
        assert_eq!(ctx.parent_block(op).unwrap(), None);
    }

    #[test]
    fn before_requires_attached_anchor() {
        let mut ctx = IrContext::new();
        let loose = new_op(&mut ctx, "custom.loose");
        assert!(InsertionPoint::before(&ctx, loose).is_err());
    }
}
