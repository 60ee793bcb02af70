//! Basic blocks and natural loops of the allocation pass.

use crate::core::bitvec::BitVec;
use crate::core::compiler::NodeId;
use crate::core::reg::RegStats;

/// `pov_order` value of a block not reached by the post-order traversal.
pub const INVALID_POV: u32 = u32::MAX;

/// State flags of a [`RaBlock`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockFlags(u32);

impl BlockFlags {
    pub const NONE: BlockFlags = BlockFlags(0);
    /// Block has been constructed from nodes.
    pub const CONSTRUCTED: BlockFlags = BlockFlags(0x0000_0001);
    /// Executed at most once (not part of any loop).
    pub const SINGLE_PASS: BlockFlags = BlockFlags(0x0000_0002);
    /// Visited by the liveness fixed point.
    pub const HAS_LIVENESS: BlockFlags = BlockFlags(0x0000_0004);
    /// Contains fixed (precolored) registers.
    pub const HAS_FIXED_REGS: BlockFlags = BlockFlags(0x0000_0010);
    /// Contains function calls.
    pub const HAS_FUNC_CALLS: BlockFlags = BlockFlags(0x0000_0020);

    pub const fn contains(self, other: BlockFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BlockFlags) {
        self.0 |= other.0;
    }
}

/// One basic block.
#[derive(Debug)]
pub struct RaBlock {
    id: u32,
    pub(crate) flags: BlockFlags,

    /// First node of the block, inclusive.
    pub(crate) first: Option<NodeId>,
    /// Last node of the block, inclusive.
    pub(crate) last: Option<NodeId>,

    /// Loop nesting weight; each containing loop adds one.
    pub(crate) weight: u32,
    /// Post-order index, [`INVALID_POV`] until assigned.
    pub(crate) pov_order: u32,
    /// Immediate dominator.
    pub(crate) idom: Option<u32>,
    /// Innermost containing loop.
    pub(crate) loop_id: Option<u32>,

    pub(crate) preds: Vec<u32>,
    pub(crate) succs: Vec<u32>,

    pub(crate) reg_stats: RegStats,

    pub(crate) live_in: BitVec,
    pub(crate) live_out: BitVec,
    pub(crate) gen: BitVec,
    pub(crate) kill: BitVec,
}

impl RaBlock {
    pub(crate) fn new(id: u32, node: Option<NodeId>) -> Self {
        Self {
            id,
            flags: BlockFlags::NONE,
            first: node,
            last: node,
            weight: 0,
            pov_order: INVALID_POV,
            idom: None,
            loop_id: None,
            preds: Vec::new(),
            succs: Vec::new(),
            reg_stats: RegStats::new(),
            live_in: BitVec::new(),
            live_out: BitVec::new(),
            gen: BitVec::new(),
            kill: BitVec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    pub fn has_flag(&self, flag: BlockFlags) -> bool {
        self.flags.contains(flag)
    }

    pub(crate) fn add_flags(&mut self, flags: BlockFlags) {
        self.flags.insert(flags);
    }

    pub fn is_constructed(&self) -> bool {
        self.has_flag(BlockFlags::CONSTRUCTED)
    }

    pub(crate) fn make_constructed(&mut self, stats: RegStats) {
        self.flags.insert(BlockFlags::CONSTRUCTED);
        self.reg_stats.combine_with(stats);
    }

    pub fn is_entry(&self) -> bool {
        self.preds.is_empty()
    }

    pub fn is_exit(&self) -> bool {
        self.succs.is_empty()
    }

    pub fn first(&self) -> Option<NodeId> {
        self.first
    }

    pub fn last(&self) -> Option<NodeId> {
        self.last
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn pov_order(&self) -> u32 {
        self.pov_order
    }

    pub fn idom(&self) -> Option<u32> {
        self.idom
    }

    pub fn loop_id(&self) -> Option<u32> {
        self.loop_id
    }

    /// Predecessor block ids, duplicate free.
    pub fn predecessors(&self) -> &[u32] {
        &self.preds
    }

    /// Successor block ids, duplicate free. When the block ends with a
    /// conditional jump, the first successor is the fall-through.
    pub fn successors(&self) -> &[u32] {
        &self.succs
    }

    pub fn reg_stats(&self) -> RegStats {
        self.reg_stats
    }

    pub fn live_in(&self) -> &BitVec {
        &self.live_in
    }

    pub fn live_out(&self) -> &BitVec {
        &self.live_out
    }

    pub fn gen(&self) -> &BitVec {
        &self.gen
    }

    pub fn kill(&self) -> &BitVec {
        &self.kill
    }

    pub(crate) fn resize_live_bits(&mut self, bits: usize) {
        self.live_in.resize(bits);
        self.live_out.resize(bits);
        self.gen.resize(bits);
        self.kill.resize(bits);
    }
}

/// Flags of a [`RaLoop`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopFlags(u32);

impl LoopFlags {
    pub const NONE: LoopFlags = LoopFlags(0);
    /// The loop contains nested loops.
    pub const HAS_NESTED: LoopFlags = LoopFlags(0x0000_0001);

    pub const fn contains(self, other: LoopFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: LoopFlags) {
        self.0 |= other.0;
    }
}

/// One natural loop.
#[derive(Debug)]
pub struct RaLoop {
    id: u32,
    header: u32,
    pub(crate) parent: Option<u32>,
    pub(crate) flags: LoopFlags,
    pub(crate) body: Vec<u32>,
}

impl RaLoop {
    pub(crate) fn new(id: u32, header: u32) -> Self {
        Self {
            id,
            header,
            parent: None,
            flags: LoopFlags::NONE,
            body: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Header block; it dominates every block of the body.
    pub fn header(&self) -> u32 {
        self.header
    }

    /// Immediate enclosing loop, none for outermost loops.
    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    pub fn flags(&self) -> LoopFlags {
        self.flags
    }

    /// Blocks of the loop, including the header.
    pub fn body(&self) -> &[u32] {
        &self.body
    }

    pub fn contains(&self, block: u32) -> bool {
        self.body.contains(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_flags() {
        let mut flags = BlockFlags::NONE;
        assert!(!flags.contains(BlockFlags::CONSTRUCTED));
        flags.insert(BlockFlags::CONSTRUCTED);
        flags.insert(BlockFlags::HAS_FIXED_REGS);
        assert!(flags.contains(BlockFlags::CONSTRUCTED));
        assert!(flags.contains(BlockFlags::HAS_FIXED_REGS));
        assert!(!flags.contains(BlockFlags::HAS_FUNC_CALLS));
    }

    #[test]
    fn test_block_construction_state() {
        let mut block = RaBlock::new(0, None);
        assert!(!block.is_constructed());
        assert_eq!(block.pov_order(), INVALID_POV);
        assert!(block.is_entry() && block.is_exit());

        let mut stats = RegStats::new();
        stats.make_used(crate::core::reg::RegKind::Gp);
        block.make_constructed(stats);
        assert!(block.is_constructed());
        assert!(block.reg_stats().has_used());
    }
}
