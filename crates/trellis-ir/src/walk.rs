//! Operation tree traversal.
//!
//! The traversal runs on an explicit work stack, so nesting depth is bounded
//! by heap memory rather than the call stack. Regions are visited in
//! declaration order, blocks in list order and operations in list order.

use std::ops::ControlFlow;

use crate::context::IrContext;
use crate::dialect::DialectOp;
use crate::error::{IrError, Result};
use crate::refs::{BlockRef, OpRef, RegionRef};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Controls whether to descend into children during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Continue walking and descend into nested regions.
    Advance,
    /// Skip the nested regions of the current operation. Has no effect in
    /// post-order, where the children were already visited.
    Skip,
}

/// Whether a node is visited before or after its nested operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkOrder {
    PreOrder,
    #[default]
    PostOrder,
}

/// Per-node decision returned by a [`IrContext::walk`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkResult {
    Advance,
    Skip,
    /// Stop the whole walk; no further operation is visited.
    Interrupt,
}

/// How a walk that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    Completed,
    Interrupted,
}

impl WalkOutcome {
    pub fn was_interrupted(self) -> bool {
        self == WalkOutcome::Interrupted
    }
}

enum Frame {
    Visit(OpRef),
    Exit(OpRef),
}

/// Push the operations nested directly inside `op` so they pop in order.
fn push_children(ctx: &IrContext, op: OpRef, stack: &mut Vec<Frame>) {
    let mark = stack.len();
    for &region in ctx.op_data(op).regions() {
        push_region(ctx, region, stack);
    }
    stack[mark..].reverse();
}

fn push_region(ctx: &IrContext, region: RegionRef, stack: &mut Vec<Frame>) {
    for &block in ctx.region_data(region).blocks() {
        stack.extend(ctx.ops_in(block).map(Frame::Visit));
    }
}

fn drive<B>(
    ctx: &IrContext,
    mut stack: Vec<Frame>,
    order: WalkOrder,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    while let Some(frame) = stack.pop() {
        match (frame, order) {
            (Frame::Visit(op), WalkOrder::PreOrder) => {
                if f(op)? == WalkAction::Advance {
                    push_children(ctx, op, &mut stack);
                }
            }
            (Frame::Visit(op), WalkOrder::PostOrder) => {
                stack.push(Frame::Exit(op));
                push_children(ctx, op, &mut stack);
            }
            (Frame::Exit(op), _) => {
                f(op)?;
            }
        }
    }
    ControlFlow::Continue(())
}

/// Walk an operation and its nested regions.
///
/// # Panics
///
/// Panics if `op` is not a live operation of `ctx`.
pub fn walk_op<B>(
    ctx: &IrContext,
    op: OpRef,
    order: WalkOrder,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    drive(ctx, vec![Frame::Visit(op)], order, f)
}

/// Walk all operations in a region recursively.
pub fn walk_region<B>(
    ctx: &IrContext,
    region: RegionRef,
    order: WalkOrder,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    let mut stack = Vec::new();
    push_region(ctx, region, &mut stack);
    stack.reverse();
    drive(ctx, stack, order, f)
}

/// Walk all operations in a block recursively.
pub fn walk_block<B>(
    ctx: &IrContext,
    block: BlockRef,
    order: WalkOrder,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    let mut stack: Vec<Frame> = ctx.ops_in(block).map(Frame::Visit).collect();
    stack.reverse();
    drive(ctx, stack, order, f)
}

/// Walk operations of a specific dialect type in a region.
pub fn walk_typed<T, B>(
    ctx: &IrContext,
    region: RegionRef,
    order: WalkOrder,
    f: &mut dyn FnMut(T) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()>
where
    T: DialectOp,
{
    walk_region(ctx, region, order, &mut |op| {
        if let Ok(typed) = T::from_op(ctx, op) {
            f(typed)
        } else {
            ControlFlow::Continue(WalkAction::Advance)
        }
    })
}

impl IrContext {
    /// Visit `root` and every operation nested in it.
    ///
    /// A callback error aborts the walk and surfaces as
    /// [`IrError::CallbackFailed`]; [`WalkResult::Interrupt`] aborts it
    /// with `Ok(WalkOutcome::Interrupted)`.
    pub fn walk<F, E>(&self, root: OpRef, order: WalkOrder, mut f: F) -> Result<WalkOutcome>
    where
        F: FnMut(OpRef) -> std::result::Result<WalkResult, E>,
        E: Into<BoxError>,
    {
        self.check_op(root)?;
        let flow = walk_op::<Option<BoxError>>(self, root, order, &mut |op| match f(op) {
            Ok(WalkResult::Advance) => ControlFlow::Continue(WalkAction::Advance),
            Ok(WalkResult::Skip) => ControlFlow::Continue(WalkAction::Skip),
            Ok(WalkResult::Interrupt) => ControlFlow::Break(None),
            Err(e) => ControlFlow::Break(Some(e.into())),
        });
        match flow {
            ControlFlow::Continue(()) => Ok(WalkOutcome::Completed),
            ControlFlow::Break(None) => Ok(WalkOutcome::Interrupted),
            ControlFlow::Break(Some(source)) => Err(IrError::CallbackFailed { source }),
        }
    }
}
