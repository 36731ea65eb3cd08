//! Structural mutation: detach, erase, clone, relocation and ordering.
//!
//! Every operation validates all of its preconditions before touching the
//! arena, so a failed call leaves the tree unchanged.

use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;
use tracing::debug;

use crate::context::{IrContext, Use};
use crate::error::{IrError, Result};
use crate::refs::*;

/// Old-to-new mappings and pending work of one [`IrContext::clone_op`].
#[derive(Default)]
struct Cloner {
    values: HashMap<ValueRef, ValueRef>,
    blocks: HashMap<BlockRef, BlockRef>,
    created: Vec<OpRef>,
    queue: VecDeque<(OpRef, BlockRef)>,
}

impl IrContext {
    /// Remove `op` from its block without destroying it.
    pub fn detach_op(&mut self, op: OpRef) -> Result<OpRef> {
        let data = self.check_op(op)?;
        if data.parent.is_none() {
            return Err(IrError::NoParent {
                op: data.name.to_string(),
            });
        }
        self.unlink(op);
        Ok(op)
    }

    /// Destroy `op` and everything it owns, detaching it first if needed.
    ///
    /// Uses of the erased results by operations outside the erased tree
    /// are left in place; verification reports them.
    pub fn erase_op(&mut self, op: OpRef) -> Result<()> {
        self.check_op(op)?;
        debug!(%op, name = %self.op_data(op).name, "erasing operation");
        self.unlink(op);

        let mut stack = vec![op];
        while let Some(o) = stack.pop() {
            let regions = std::mem::take(&mut self.op_mut(o).regions);
            for r in regions {
                let blocks = std::mem::take(&mut self.region_mut(r).blocks);
                for b in blocks {
                    stack.extend(self.ops_in(b));
                    self.destroy_block(b);
                }
                self.region_mut(r).erased = true;
                self.live_mut().regions -= 1;
            }

            let operands = std::mem::take(&mut self.op_mut(o).operands);
            for (idx, v) in operands.into_iter().enumerate() {
                self.drop_use(
                    v,
                    Use {
                        user: o,
                        operand_index: idx as u32,
                    },
                );
            }
            let results = self.op_data(o).results.clone();
            for v in results {
                self.value_mut(v).erased = true;
                self.live_mut().values -= 1;
            }

            let data = self.op_mut(o);
            data.erased = true;
            data.attributes = Default::default();
            data.successors.clear();
            data.parent = None;
            data.prev = None;
            data.next = None;
            self.live_mut().operations -= 1;
        }
        Ok(())
    }

    fn destroy_block(&mut self, b: BlockRef) {
        let args = self.block_data(b).args.clone();
        for v in args {
            self.value_mut(v).erased = true;
            self.live_mut().values -= 1;
        }
        let data = self.block_mut(b);
        data.erased = true;
        data.first = None;
        data.last = None;
        data.len = 0;
        self.live_mut().blocks -= 1;
    }

    /// Deep-copy `op` into a new detached operation.
    ///
    /// Values and blocks defined inside the copied tree are remapped to
    /// their copies; references to anything outside are kept as-is.
    pub fn clone_op(&mut self, op: OpRef) -> Result<OpRef> {
        self.check_op(op)?;
        let mut cloner = Cloner::default();
        let copy = self.clone_shallow(op, &mut cloner);
        // Breadth-first, so the children of each block are appended in order.
        while let Some((old, block)) = cloner.queue.pop_front() {
            let new_op = self.clone_shallow(old, &mut cloner);
            self.link_before(new_op, block, None);
        }

        // Operands and successors that referred forward to entities copied later.
        for new_op in cloner.created {
            let operands: SmallVec<[ValueRef; 4]> = self.op_data(new_op).operands.clone();
            for (idx, v) in operands.into_iter().enumerate() {
                if let Some(&mapped) = cloner.values.get(&v)
                    && mapped != v
                {
                    let slot = Use {
                        user: new_op,
                        operand_index: idx as u32,
                    };
                    self.drop_use(v, slot);
                    self.op_mut(new_op).operands[idx] = mapped;
                    self.add_use(mapped, slot);
                }
            }
            for succ in self.op_mut(new_op).successors.iter_mut() {
                if let Some(&mapped) = cloner.blocks.get(succ) {
                    *succ = mapped;
                }
            }
        }
        debug!(%op, %copy, "cloned operation");
        Ok(copy)
    }

    /// Copy `op` with empty blocks and queue its children for copying.
    fn clone_shallow(&mut self, op: OpRef, cloner: &mut Cloner) -> OpRef {
        let data = self.op_data(op);
        let name = data.name;
        let location = data.location;
        let attributes = data.attributes.clone();
        let old_regions = data.regions.clone();
        let old_results = data.results.clone();
        let operands: SmallVec<[ValueRef; 4]> = data
            .operands
            .iter()
            .map(|v| *cloner.values.get(v).unwrap_or(v))
            .collect();
        let successors: SmallVec<[BlockRef; 2]> = data
            .successors
            .iter()
            .map(|b| *cloner.blocks.get(b).unwrap_or(b))
            .collect();
        let result_types: SmallVec<[TypeRef; 2]> = old_results
            .iter()
            .map(|&v| self.value_data(v).ty)
            .collect();

        let new_op = self.alloc_op(
            name,
            location,
            &operands,
            &result_types,
            attributes,
            old_regions.len(),
            &successors,
        );
        cloner.created.push(new_op);
        for (old, new) in old_results
            .iter()
            .zip(self.op_data(new_op).results.clone())
        {
            cloner.values.insert(*old, new);
        }

        let new_regions = self.op_data(new_op).regions.clone();
        for (old_r, new_r) in old_regions.into_iter().zip(new_regions) {
            let old_blocks = self.region_data(old_r).blocks.clone();
            for old_b in old_blocks {
                let old_args = self.block_data(old_b).args.clone();
                let arg_types: SmallVec<[TypeRef; 4]> =
                    old_args.iter().map(|&v| self.value_data(v).ty).collect();
                let new_b = self.alloc_block(new_r, &arg_types);
                self.region_mut(new_r).blocks.push(new_b);
                for (old_v, new_v) in old_args.iter().zip(self.block_data(new_b).args.clone()) {
                    cloner.values.insert(*old_v, new_v);
                }
                cloner.blocks.insert(old_b, new_b);
                cloner
                    .queue
                    .extend(self.ops_in(old_b).map(|child| (child, new_b)));
            }
        }
        new_op
    }

    /// Move `op` to sit immediately before `anchor`, possibly in another
    /// block.
    pub fn move_before(&mut self, op: OpRef, anchor: OpRef) -> Result<()> {
        let block = self.check_relocation(op, anchor)?;
        if op == anchor {
            return Ok(());
        }
        self.unlink(op);
        self.link_before(op, block, Some(anchor));
        Ok(())
    }

    /// Move `op` to sit immediately after `anchor`, possibly in another
    /// block.
    pub fn move_after(&mut self, op: OpRef, anchor: OpRef) -> Result<()> {
        let block = self.check_relocation(op, anchor)?;
        if op == anchor {
            return Ok(());
        }
        self.unlink(op);
        let next = self.op_data(anchor).next;
        self.link_before(op, block, next);
        Ok(())
    }

    /// Both operations attached and `anchor` not nested inside `op`.
    /// Returns the anchor's block.
    fn check_relocation(&self, op: OpRef, anchor: OpRef) -> Result<BlockRef> {
        let op_data = self.check_op(op)?;
        let anchor_data = self.check_op(anchor)?;
        if op_data.parent.is_none() {
            return Err(IrError::NotAttached {
                op: op_data.name.to_string(),
            });
        }
        let Some(block) = anchor_data.parent else {
            return Err(IrError::NotAttached {
                op: anchor_data.name.to_string(),
            });
        };
        if op != anchor && self.is_ancestor(op, block) {
            return Err(IrError::CyclicOwnership {
                op: op_data.name.to_string(),
            });
        }
        Ok(block)
    }

    /// Append `op` to the end of `block`, detaching it from its current
    /// block first if it has one.
    pub fn move_to_block_end(&mut self, op: OpRef, block: BlockRef) -> Result<()> {
        self.check_block(block)?;
        let data = self.check_op(op)?;
        if self.is_ancestor(op, block) {
            return Err(IrError::CyclicOwnership {
                op: data.name.to_string(),
            });
        }
        self.unlink(op);
        self.link_before(op, block, None);
        Ok(())
    }

    /// Whether `op` comes strictly before `other` in their shared block.
    ///
    /// Operations in different blocks (or detached ones) have no defined
    /// relative order and are rejected.
    pub fn is_before_in_block(&mut self, op: OpRef, other: OpRef) -> Result<bool> {
        let a = self.check_op(op)?;
        let b = self.check_op(other)?;
        let block = match (a.parent, b.parent) {
            (Some(x), Some(y)) if x == y => x,
            _ => {
                return Err(IrError::NotInSameBlock {
                    first: a.name.to_string(),
                    second: b.name.to_string(),
                });
            }
        };
        Ok(self.order_in_block(op, block) < self.order_in_block(other, block))
    }

    /// Move a block (with its operations) to the end of another region.
    pub fn move_block(&mut self, block: BlockRef, dest: RegionRef) -> Result<()> {
        let src = self.check_block(block)?.parent;
        let owner = self.check_region(dest)?.owner;
        // The destination must not live inside the block being moved.
        let mut cursor = Some(owner);
        while let Some(o) = cursor {
            match self.op_data(o).parent {
                Some(b) if b == block => {
                    return Err(IrError::CyclicOwnership {
                        op: self.op_data(owner).name.to_string(),
                    });
                }
                Some(b) => cursor = Some(self.region_data(self.block_data(b).parent).owner),
                None => cursor = None,
            }
        }
        self.region_mut(src).blocks.retain(|b| *b != block);
        self.region_mut(dest).blocks.push(block);
        self.block_mut(block).parent = dest;
        Ok(())
    }
}
