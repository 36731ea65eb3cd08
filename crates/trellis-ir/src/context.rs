//! IrContext: arena storage for operations, values, blocks and regions.
//!
//! All IR entities live in `PrimaryMap`s owned by one `IrContext` and are
//! addressed by handles from [`crate::refs`]. Ownership forms a strict
//! tree (operation → region → block → operation); back-references are
//! plain handles. Operations inside a block form an intrusive doubly
//! linked list so insertion and removal anywhere are O(1).
//!
//! Erased entities stay in the arena as tombstones. Every public accessor
//! validates its handles and reports foreign or erased ones as
//! [`IrError::CrossContext`] / [`IrError::Erased`].

use std::collections::BTreeMap;

use cranelift_entity::{PrimaryMap, SecondaryMap};
use smallvec::SmallVec;
use tracing::trace;

use crate::attributes::{AttrInterner, AttributeDict, HostValue};
use crate::error::{Collection, IrError, Result};
use crate::refs::*;
use crate::registry::OpRegistry;
use crate::sequence::{Seq, normalize_index};
use crate::symbol::Symbol;
use crate::types::{Location, TypeInterner};

/// Deepest region nesting the recursive passes (text parser, printer,
/// bytecode reader and writer) accept.
pub const MAX_NESTING_DEPTH: usize = 128;

// ============================================================================
// Use-chain
// ============================================================================

/// A single use of a value: which operation uses it, at which operand index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: OpRef,
    pub operand_index: u32,
}

// ============================================================================
// Entity data types
// ============================================================================

/// Data for a single operation in the arena.
#[derive(Debug)]
pub struct OperationData {
    pub(crate) name: Symbol,
    pub(crate) location: Location,
    pub(crate) operands: SmallVec<[ValueRef; 4]>,
    pub(crate) results: SmallVec<[ValueRef; 2]>,
    pub(crate) attributes: AttributeDict,
    pub(crate) regions: SmallVec<[RegionRef; 2]>,
    pub(crate) successors: SmallVec<[BlockRef; 2]>,
    pub(crate) parent: Option<BlockRef>,
    pub(crate) prev: Option<OpRef>,
    pub(crate) next: Option<OpRef>,
    /// Position key inside the parent block, valid while the block's
    /// `order_valid` flag is set.
    pub(crate) order: u32,
    pub(crate) erased: bool,
}

impl OperationData {
    pub fn name(&self) -> Symbol {
        self.name
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn operands(&self) -> &[ValueRef] {
        &self.operands
    }

    pub fn results(&self) -> &[ValueRef] {
        &self.results
    }

    pub fn attributes(&self) -> &AttributeDict {
        &self.attributes
    }

    pub fn regions(&self) -> &[RegionRef] {
        &self.regions
    }

    pub fn successors(&self) -> &[BlockRef] {
        &self.successors
    }

    pub fn parent_block(&self) -> Option<BlockRef> {
        self.parent
    }
}

/// Data for a single SSA value.
#[derive(Debug)]
pub struct ValueData {
    pub(crate) def: ValueDef,
    pub(crate) ty: TypeRef,
    pub(crate) erased: bool,
}

impl ValueData {
    pub fn def(&self) -> ValueDef {
        self.def
    }

    pub fn ty(&self) -> TypeRef {
        self.ty
    }
}

/// Data for a basic block.
#[derive(Debug)]
pub struct BlockData {
    pub(crate) args: SmallVec<[ValueRef; 4]>,
    pub(crate) parent: RegionRef,
    pub(crate) first: Option<OpRef>,
    pub(crate) last: Option<OpRef>,
    pub(crate) len: usize,
    pub(crate) order_valid: bool,
    pub(crate) erased: bool,
}

impl BlockData {
    pub fn args(&self) -> &[ValueRef] {
        &self.args
    }

    pub fn parent_region(&self) -> RegionRef {
        self.parent
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Data for a region (list of blocks).
#[derive(Debug)]
pub struct RegionData {
    pub(crate) owner: OpRef,
    pub(crate) blocks: SmallVec<[BlockRef; 2]>,
    pub(crate) erased: bool,
}

impl RegionData {
    pub fn owner(&self) -> OpRef {
        self.owner
    }

    pub fn blocks(&self) -> &[BlockRef] {
        &self.blocks
    }
}

/// Number of live (allocated and not erased) entities, for leak checks in
/// tests and debugging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveCounts {
    pub operations: usize,
    pub regions: usize,
    pub blocks: usize,
    pub values: usize,
}

/// Context-wide settings.
#[derive(Clone, Debug, Default)]
pub struct ContextOptions {
    /// Accept operations whose name is not in the registry during
    /// verification.
    pub allow_unregistered_dialects: bool,
}

// ============================================================================
// OperationState
// ============================================================================

/// Everything needed to create a detached operation.
///
/// ```
/// # use trellis_ir::{IrContext, OperationState};
/// let mut ctx = IrContext::new();
/// let i32_ty = ctx.types.int(32);
/// let value = ctx.attrs.integer(7, i32_ty);
/// let op = ctx
///     .create_op(OperationState::new("custom.const").result(i32_ty).attr("value", value))
///     .unwrap();
/// assert_eq!(ctx.results(op).unwrap().len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct OperationState {
    name: String,
    location: Location,
    operands: Vec<ValueRef>,
    result_types: Vec<TypeRef>,
    attributes: Vec<(HostValue, HostValue)>,
    num_regions: usize,
    successors: Vec<BlockRef>,
}

impl OperationState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            location: Location::Unknown,
            operands: Vec::new(),
            result_types: Vec::new(),
            attributes: Vec::new(),
            num_regions: 0,
            successors: Vec::new(),
        }
    }

    pub fn location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn operand(mut self, v: ValueRef) -> Self {
        self.operands.push(v);
        self
    }

    pub fn operands(mut self, vs: impl IntoIterator<Item = ValueRef>) -> Self {
        self.operands.extend(vs);
        self
    }

    pub fn result(mut self, ty: TypeRef) -> Self {
        self.result_types.push(ty);
        self
    }

    pub fn results(mut self, tys: impl IntoIterator<Item = TypeRef>) -> Self {
        self.result_types.extend(tys);
        self
    }

    pub fn attr(mut self, key: &str, value: AttrRef) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Attribute pair that has not been type-checked yet; validated by
    /// [`IrContext::create_op`].
    pub fn host_attr(mut self, key: HostValue, value: HostValue) -> Self {
        self.attributes.push((key, value));
        self
    }

    pub fn regions(mut self, count: usize) -> Self {
        self.num_regions = count;
        self
    }

    pub fn successor(mut self, block: BlockRef) -> Self {
        self.successors.push(block);
        self
    }

    pub fn successors(mut self, blocks: impl IntoIterator<Item = BlockRef>) -> Self {
        self.successors.extend(blocks);
        self
    }
}

// ============================================================================
// IrContext
// ============================================================================

/// Owner of one IR universe: entity arenas, interners, the operation
/// registry and resource blobs.
pub struct IrContext {
    id: ContextId,
    options: ContextOptions,

    ops: PrimaryMap<OpRef, OperationData>,
    values: PrimaryMap<ValueRef, ValueData>,
    blocks: PrimaryMap<BlockRef, BlockData>,
    regions: PrimaryMap<RegionRef, RegionData>,

    /// Use-chain: for each value, the list of operations that use it.
    uses: SecondaryMap<ValueRef, SmallVec<[Use; 2]>>,

    pub types: TypeInterner,
    pub attrs: AttrInterner,
    pub(crate) registry: OpRegistry,
    resources: BTreeMap<String, Vec<u8>>,

    live: LiveCounts,
}

impl IrContext {
    /// Create a context with the builtin dialect registered.
    pub fn new() -> Self {
        Self::with_options(ContextOptions::default())
    }

    pub fn with_options(options: ContextOptions) -> Self {
        let id = ContextId::fresh();
        let mut ctx = Self {
            id,
            options,
            ops: PrimaryMap::new(),
            values: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            regions: PrimaryMap::new(),
            uses: SecondaryMap::new(),
            types: TypeInterner::new(id),
            attrs: AttrInterner::new(id),
            registry: OpRegistry::new(),
            resources: BTreeMap::new(),
            live: LiveCounts::default(),
        };
        crate::dialect::builtin::register(&mut ctx.registry);
        ctx
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn set_allow_unregistered_dialects(&mut self, allow: bool) {
        self.options.allow_unregistered_dialects = allow;
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut OpRegistry {
        &mut self.registry
    }

    pub fn live_counts(&self) -> LiveCounts {
        self.live
    }

    // ========================================================================
    // Handle validation
    // ========================================================================

    fn cross<H: ContextHandle>(handle: H) -> IrError {
        IrError::CrossContext {
            handle: handle.to_string(),
        }
    }

    fn erased<H: ContextHandle>(handle: H) -> IrError {
        IrError::Erased {
            handle: handle.to_string(),
        }
    }

    pub(crate) fn check_op(&self, op: OpRef) -> Result<&OperationData> {
        if op.context_id() != self.id {
            return Err(Self::cross(op));
        }
        match self.ops.get(op) {
            Some(d) if !d.erased => Ok(d),
            Some(_) => Err(Self::erased(op)),
            None => Err(Self::cross(op)),
        }
    }

    pub(crate) fn check_value(&self, v: ValueRef) -> Result<&ValueData> {
        if v.context_id() != self.id {
            return Err(Self::cross(v));
        }
        match self.values.get(v) {
            Some(d) if !d.erased => Ok(d),
            Some(_) => Err(Self::erased(v)),
            None => Err(Self::cross(v)),
        }
    }

    pub(crate) fn check_block(&self, b: BlockRef) -> Result<&BlockData> {
        if b.context_id() != self.id {
            return Err(Self::cross(b));
        }
        match self.blocks.get(b) {
            Some(d) if !d.erased => Ok(d),
            Some(_) => Err(Self::erased(b)),
            None => Err(Self::cross(b)),
        }
    }

    pub(crate) fn check_region(&self, r: RegionRef) -> Result<&RegionData> {
        if r.context_id() != self.id {
            return Err(Self::cross(r));
        }
        match self.regions.get(r) {
            Some(d) if !d.erased => Ok(d),
            Some(_) => Err(Self::erased(r)),
            None => Err(Self::cross(r)),
        }
    }

    pub(crate) fn check_type(&self, ty: TypeRef) -> Result<()> {
        self.types
            .try_get(ty)
            .map(|_| ())
            .ok_or_else(|| Self::cross(ty))
    }

    // Unchecked accessors for code that already validated the root handle.

    pub(crate) fn op_data(&self, op: OpRef) -> &OperationData {
        &self.ops[op]
    }

    pub(crate) fn value_data(&self, v: ValueRef) -> &ValueData {
        &self.values[v]
    }

    pub(crate) fn block_data(&self, b: BlockRef) -> &BlockData {
        &self.blocks[b]
    }

    pub(crate) fn region_data(&self, r: RegionRef) -> &RegionData {
        &self.regions[r]
    }

    pub(crate) fn op_mut(&mut self, op: OpRef) -> &mut OperationData {
        &mut self.ops[op]
    }

    pub(crate) fn value_mut(&mut self, v: ValueRef) -> &mut ValueData {
        &mut self.values[v]
    }

    pub(crate) fn block_mut(&mut self, b: BlockRef) -> &mut BlockData {
        &mut self.blocks[b]
    }

    pub(crate) fn region_mut(&mut self, r: RegionRef) -> &mut RegionData {
        &mut self.regions[r]
    }

    pub(crate) fn live_mut(&mut self) -> &mut LiveCounts {
        &mut self.live
    }

    // ========================================================================
    // Operation
    // ========================================================================

    /// Create a detached operation.
    ///
    /// Attribute pairs are validated in order: the key must be a string,
    /// the value must be an attribute interned in this context.
    pub fn create_op(&mut self, state: OperationState) -> Result<OpRef> {
        let OperationState {
            name,
            location,
            operands,
            result_types,
            attributes,
            num_regions,
            successors,
        } = state;

        let mut dict = AttributeDict::new();
        for (key, value) in attributes {
            let key = match key {
                HostValue::Str(s) => s,
                HostValue::Null => return Err(IrError::NullAttributeKey { op: name }),
                _ => return Err(IrError::NonStringAttributeKey { op: name }),
            };
            let value = match value {
                HostValue::Attr(a) if self.attrs.try_get(a).is_some() => a,
                HostValue::Null => return Err(IrError::NullAttributeValue { key, op: name }),
                _ => return Err(IrError::InvalidAttributeValue { key, op: name }),
            };
            dict.insert(Symbol::from_dynamic(&key), value);
        }
        for &v in &operands {
            self.check_value(v)?;
        }
        for &ty in &result_types {
            self.check_type(ty)?;
        }
        for &b in &successors {
            self.check_block(b)?;
        }

        Ok(self.alloc_op(
            Symbol::from_dynamic(&name),
            location,
            &operands,
            &result_types,
            dict,
            num_regions,
            &successors,
        ))
    }

    /// Allocate an operation from already-validated parts.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn alloc_op(
        &mut self,
        name: Symbol,
        location: Location,
        operands: &[ValueRef],
        result_types: &[TypeRef],
        attributes: AttributeDict,
        num_regions: usize,
        successors: &[BlockRef],
    ) -> OpRef {
        let op = self
            .ops
            .push(OperationData {
                name,
                location,
                operands: operands.iter().copied().collect(),
                results: SmallVec::new(),
                attributes,
                regions: SmallVec::new(),
                successors: successors.iter().copied().collect(),
                parent: None,
                prev: None,
                next: None,
                order: 0,
                erased: false,
            })
            .stamped(self.id);
        self.live.operations += 1;

        for (idx, &val) in operands.iter().enumerate() {
            self.uses[val].push(Use {
                user: op,
                operand_index: idx as u32,
            });
        }

        let results: SmallVec<[ValueRef; 2]> = result_types
            .iter()
            .enumerate()
            .map(|(idx, &ty)| self.alloc_value(ValueDef::OpResult(op, idx as u32), ty))
            .collect();

        let mut regions = SmallVec::new();
        for _ in 0..num_regions {
            let r = self
                .regions
                .push(RegionData {
                    owner: op,
                    blocks: SmallVec::new(),
                    erased: false,
                })
                .stamped(self.id);
            self.live.regions += 1;
            regions.push(r);
        }

        let data = &mut self.ops[op];
        data.results = results;
        data.regions = regions;
        trace!(%op, %name, "allocated operation");
        op
    }

    fn alloc_value(&mut self, def: ValueDef, ty: TypeRef) -> ValueRef {
        self.live.values += 1;
        self.values
            .push(ValueData {
                def,
                ty,
                erased: false,
            })
            .stamped(self.id)
    }

    /// Read-only view of an operation's data.
    pub fn op(&self, op: OpRef) -> Result<&OperationData> {
        self.check_op(op)
    }

    pub fn op_name(&self, op: OpRef) -> Result<Symbol> {
        Ok(self.check_op(op)?.name)
    }

    pub fn location(&self, op: OpRef) -> Result<Location> {
        Ok(self.check_op(op)?.location)
    }

    pub fn set_location(&mut self, op: OpRef, location: Location) -> Result<()> {
        self.check_op(op)?;
        self.ops[op].location = location;
        Ok(())
    }

    pub fn attributes(&self, op: OpRef) -> Result<&AttributeDict> {
        Ok(&self.check_op(op)?.attributes)
    }

    /// Attribute by key, failing with `KeyNotFound`.
    pub fn attribute(&self, op: OpRef, key: &str) -> Result<AttrRef> {
        self.check_op(op)?.attributes.lookup(key)
    }

    pub fn set_attribute(&mut self, op: OpRef, key: &str, value: AttrRef) -> Result<Option<AttrRef>> {
        self.check_op(op)?;
        if self.attrs.try_get(value).is_none() {
            return Err(IrError::InvalidAttributeValue {
                key: key.to_owned(),
                op: self.ops[op].name.to_string(),
            });
        }
        Ok(self.ops[op]
            .attributes
            .insert(Symbol::from_dynamic(key), value))
    }

    pub fn remove_attribute(&mut self, op: OpRef, key: &str) -> Result<Option<AttrRef>> {
        self.check_op(op)?;
        Ok(self.ops[op].attributes.remove(key))
    }

    pub fn operands(&self, op: OpRef) -> Result<Seq<ValueRef>> {
        let data = self.check_op(op)?;
        Ok(Seq::new(Collection::Operand, data.operands.iter().copied()))
    }

    /// Rebind operand `index` (negative counts from the end) to `value`.
    pub fn set_operand(&mut self, op: OpRef, index: isize, value: ValueRef) -> Result<()> {
        let len = self.check_op(op)?.operands.len();
        let i = normalize_index(index, len, Collection::Operand)?;
        self.check_value(value)?;
        let old = std::mem::replace(&mut self.ops[op].operands[i], value);
        let slot = Use {
            user: op,
            operand_index: i as u32,
        };
        self.uses[old].retain(|u| *u != slot);
        self.uses[value].push(slot);
        Ok(())
    }

    pub fn results(&self, op: OpRef) -> Result<Seq<ValueRef>> {
        let data = self.check_op(op)?;
        Ok(Seq::new(Collection::Result, data.results.iter().copied()))
    }

    /// The only result of a single-result operation.
    pub fn result(&self, op: OpRef) -> Result<ValueRef> {
        let data = self.check_op(op)?;
        match data.results.as_slice() {
            [v] => Ok(*v),
            rs => Err(IrError::InvalidResultCount {
                op: data.name.to_string(),
                count: rs.len(),
            }),
        }
    }

    pub fn regions(&self, op: OpRef) -> Result<Seq<RegionRef>> {
        let data = self.check_op(op)?;
        Ok(Seq::new(Collection::Region, data.regions.iter().copied()))
    }

    pub fn successors(&self, op: OpRef) -> Result<Seq<BlockRef>> {
        let data = self.check_op(op)?;
        Ok(Seq::new(Collection::Block, data.successors.iter().copied()))
    }

    pub fn parent_block(&self, op: OpRef) -> Result<Option<BlockRef>> {
        Ok(self.check_op(op)?.parent)
    }

    /// Operation owning the region that contains `op`.
    pub fn parent_op(&self, op: OpRef) -> Result<Option<OpRef>> {
        Ok(self
            .check_op(op)?
            .parent
            .map(|b| self.regions[self.blocks[b].parent].owner))
    }

    pub fn next_op(&self, op: OpRef) -> Result<Option<OpRef>> {
        Ok(self.check_op(op)?.next)
    }

    pub fn prev_op(&self, op: OpRef) -> Result<Option<OpRef>> {
        Ok(self.check_op(op)?.prev)
    }

    // ========================================================================
    // Value
    // ========================================================================

    pub fn value(&self, v: ValueRef) -> Result<&ValueData> {
        self.check_value(v)
    }

    pub fn value_type(&self, v: ValueRef) -> Result<TypeRef> {
        Ok(self.check_value(v)?.ty)
    }

    pub fn value_def(&self, v: ValueRef) -> Result<ValueDef> {
        Ok(self.check_value(v)?.def)
    }

    /// Retype a block argument in place; identity and index are unchanged.
    pub fn set_block_arg_type(&mut self, v: ValueRef, ty: TypeRef) -> Result<()> {
        let def = self.check_value(v)?.def;
        if !matches!(def, ValueDef::BlockArg(..)) {
            return Err(IrError::NotBlockArgument {
                value: v.to_string(),
            });
        }
        self.check_type(ty)?;
        self.values[v].ty = ty;
        Ok(())
    }

    // ========================================================================
    // Region
    // ========================================================================

    pub fn region(&self, r: RegionRef) -> Result<&RegionData> {
        self.check_region(r)
    }

    pub fn region_owner(&self, r: RegionRef) -> Result<OpRef> {
        Ok(self.check_region(r)?.owner)
    }

    pub fn blocks(&self, r: RegionRef) -> Result<Seq<BlockRef>> {
        let data = self.check_region(r)?;
        Ok(Seq::new(Collection::Block, data.blocks.iter().copied()))
    }

    /// Append a new block with fresh arguments of the given types.
    pub fn append_block(&mut self, r: RegionRef, arg_types: &[TypeRef]) -> Result<BlockRef> {
        self.check_region(r)?;
        for &ty in arg_types {
            self.check_type(ty)?;
        }
        let block = self.alloc_block(r, arg_types);
        self.regions[r].blocks.push(block);
        Ok(block)
    }

    pub(crate) fn alloc_block(&mut self, parent: RegionRef, arg_types: &[TypeRef]) -> BlockRef {
        let block = self
            .blocks
            .push(BlockData {
                args: SmallVec::new(),
                parent,
                first: None,
                last: None,
                len: 0,
                order_valid: true,
                erased: false,
            })
            .stamped(self.id);
        self.live.blocks += 1;
        let args: SmallVec<[ValueRef; 4]> = arg_types
            .iter()
            .enumerate()
            .map(|(idx, &ty)| self.alloc_value(ValueDef::BlockArg(block, idx as u32), ty))
            .collect();
        self.blocks[block].args = args;
        block
    }

    // ========================================================================
    // Block
    // ========================================================================

    pub fn block(&self, b: BlockRef) -> Result<&BlockData> {
        self.check_block(b)
    }

    pub fn block_region(&self, b: BlockRef) -> Result<RegionRef> {
        Ok(self.check_block(b)?.parent)
    }

    /// Operation owning the block's region.
    pub fn block_owner(&self, b: BlockRef) -> Result<OpRef> {
        let region = self.check_block(b)?.parent;
        Ok(self.regions[region].owner)
    }

    pub fn block_args(&self, b: BlockRef) -> Result<Seq<ValueRef>> {
        let data = self.check_block(b)?;
        Ok(Seq::new(Collection::BlockArgument, data.args.iter().copied()))
    }

    pub fn add_block_argument(&mut self, b: BlockRef, ty: TypeRef) -> Result<ValueRef> {
        let idx = self.check_block(b)?.args.len();
        self.check_type(ty)?;
        let v = self.alloc_value(ValueDef::BlockArg(b, idx as u32), ty);
        self.blocks[b].args.push(v);
        Ok(v)
    }

    /// Operations of a block, in order.
    pub fn block_ops(&self, b: BlockRef) -> Result<Seq<OpRef>> {
        self.check_block(b)?;
        Ok(Seq::new(Collection::Operation, self.ops_in(b)))
    }

    pub fn first_op(&self, b: BlockRef) -> Result<Option<OpRef>> {
        Ok(self.check_block(b)?.first)
    }

    /// Last operation of the block, typically its terminator.
    pub fn last_op(&self, b: BlockRef) -> Result<Option<OpRef>> {
        Ok(self.check_block(b)?.last)
    }

    pub(crate) fn ops_in(&self, b: BlockRef) -> impl Iterator<Item = OpRef> + '_ {
        std::iter::successors(self.blocks[b].first, move |&o| self.ops[o].next)
    }

    /// Fail if regions under `op` nest deeper than [`MAX_NESTING_DEPTH`].
    pub fn check_nesting_depth(&self, op: OpRef) -> Result<()> {
        self.check_op(op)?;
        let mut stack = vec![(op, 0usize)];
        while let Some((o, depth)) = stack.pop() {
            let data = &self.ops[o];
            if data.regions.is_empty() {
                continue;
            }
            if depth == MAX_NESTING_DEPTH {
                return Err(IrError::NestingTooDeep {
                    op: self.ops[op].name.to_string(),
                    limit: MAX_NESTING_DEPTH,
                });
            }
            for &region in &data.regions {
                for &block in &self.regions[region].blocks {
                    stack.extend(self.ops_in(block).map(|child| (child, depth + 1)));
                }
            }
        }
        Ok(())
    }

    /// Append a detached operation to the end of a block.
    pub fn append_op(&mut self, b: BlockRef, op: OpRef) -> Result<()> {
        self.check_block(b)?;
        self.ensure_insertable(op, b)?;
        self.link_before(op, b, None);
        Ok(())
    }

    /// Fail unless `op` is detached and `block` is not nested inside it.
    pub(crate) fn ensure_insertable(&self, op: OpRef, block: BlockRef) -> Result<()> {
        let data = self.check_op(op)?;
        if data.parent.is_some() {
            return Err(IrError::AlreadyAttached {
                op: data.name.to_string(),
            });
        }
        if self.is_ancestor(op, block) {
            return Err(IrError::CyclicOwnership {
                op: data.name.to_string(),
            });
        }
        Ok(())
    }

    /// Whether `block` sits (transitively) inside one of `op`'s regions.
    pub(crate) fn is_ancestor(&self, op: OpRef, block: BlockRef) -> bool {
        let mut b = block;
        loop {
            let owner = self.regions[self.blocks[b].parent].owner;
            if owner == op {
                return true;
            }
            match self.ops[owner].parent {
                Some(pb) => b = pb,
                None => return false,
            }
        }
    }

    /// Link a detached `op` into `block` before `before`, or at the end.
    pub(crate) fn link_before(&mut self, op: OpRef, block: BlockRef, before: Option<OpRef>) {
        debug_assert!(self.ops[op].parent.is_none());
        let prev = match before {
            Some(b) => self.ops[b].prev,
            None => self.blocks[block].last,
        };
        let appended_in_order = before.is_none() && self.blocks[block].order_valid;
        let order = prev.map_or(0, |p| self.ops[p].order + 1);
        {
            let data = &mut self.ops[op];
            data.parent = Some(block);
            data.prev = prev;
            data.next = before;
            data.order = order;
        }
        match prev {
            Some(p) => self.ops[p].next = Some(op),
            None => self.blocks[block].first = Some(op),
        }
        match before {
            Some(b) => self.ops[b].prev = Some(op),
            None => self.blocks[block].last = Some(op),
        }
        let bd = &mut self.blocks[block];
        bd.len += 1;
        bd.order_valid = appended_in_order;
    }

    /// Unlink `op` from its block. No-op for detached operations.
    pub(crate) fn unlink(&mut self, op: OpRef) {
        let (block, prev, next) = {
            let d = &self.ops[op];
            (d.parent, d.prev, d.next)
        };
        let Some(block) = block else { return };
        match prev {
            Some(p) => self.ops[p].next = next,
            None => self.blocks[block].first = next,
        }
        match next {
            Some(n) => self.ops[n].prev = prev,
            None => self.blocks[block].last = prev,
        }
        let data = &mut self.ops[op];
        data.parent = None;
        data.prev = None;
        data.next = None;
        self.blocks[block].len -= 1;
    }

    /// Position key of `op` in its block, renumbering the block if needed.
    pub(crate) fn order_in_block(&mut self, op: OpRef, block: BlockRef) -> u32 {
        if !self.blocks[block].order_valid {
            let ops: Vec<OpRef> = self.ops_in(block).collect();
            for (i, o) in ops.into_iter().enumerate() {
                self.ops[o].order = i as u32;
            }
            self.blocks[block].order_valid = true;
        }
        self.ops[op].order
    }

    // ========================================================================
    // Use-chain
    // ========================================================================

    pub fn uses(&self, v: ValueRef) -> Result<&[Use]> {
        self.check_value(v)?;
        Ok(&self.uses[v])
    }

    pub fn has_uses(&self, v: ValueRef) -> Result<bool> {
        Ok(!self.uses(v)?.is_empty())
    }

    pub(crate) fn uses_unchecked(&self, v: ValueRef) -> &[Use] {
        &self.uses[v]
    }

    pub(crate) fn add_use(&mut self, v: ValueRef, u: Use) {
        self.uses[v].push(u);
    }

    pub(crate) fn drop_use(&mut self, v: ValueRef, u: Use) {
        self.uses[v].retain(|x| *x != u);
    }

    /// Replace every use of `old` with `new`.
    pub fn replace_all_uses(&mut self, old: ValueRef, new: ValueRef) -> Result<()> {
        self.check_value(old)?;
        self.check_value(new)?;
        if old == new {
            return Ok(());
        }
        let old_uses = std::mem::take(&mut self.uses[old]);
        for u in &old_uses {
            let slot = &mut self.ops[u.user].operands[u.operand_index as usize];
            debug_assert_eq!(*slot, old);
            *slot = new;
            self.uses[new].push(*u);
        }
        Ok(())
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Register a named blob referenced by `dense_resource` attributes.
    pub fn add_resource(&mut self, name: &str, bytes: Vec<u8>) {
        self.resources.insert(name.to_owned(), bytes);
    }

    pub fn resource(&self, name: &str) -> Option<&[u8]> {
        self.resources.get(name).map(Vec::as_slice)
    }

    pub fn resources(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.resources
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl Default for IrContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
