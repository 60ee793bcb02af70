//! Register allocation pass.
//!
//! [`RaPass::run_on_function`] drives five strictly ordered steps over one
//! function's node list:
//!
//! 1. CFG construction — basic blocks, successor edges, per-instruction
//!    tied-register data, removal of unreachable instructions.
//! 2. Post-order view of all reachable blocks.
//! 3. Dominator tree (iterative data-flow).
//! 4. Natural loop discovery against the dominator tree.
//! 5. Live-variable analysis over packed bit vectors.
//!
//! The produced [`RaFunction`] is the input of a register-assignment step;
//! binding physical registers and placing spill code happen there, not here.
//! Whether the pass succeeds or fails, the analysis links it wrote into the
//! virtual registers are cleared before it returns.

pub mod block;
pub mod cfg;
pub mod liveness;
pub mod loops;
pub mod order;
pub mod tied;

pub use block::{BlockFlags, LoopFlags, RaBlock, RaLoop, INVALID_POV};
pub use tied::{RaInstData, TiedFlags, TiedReg, WorkReg};

use bumpalo::Bump;

use crate::arch::ArchAdapter;
use crate::core::compiler::{CodeCompiler, NodeId};
use crate::core::error::{CompileError, CompileResult};
use crate::core::operand::VirtId;
use crate::core::reg::{RegCount, RegMask};
use crate::core::session::CompilationSession;

/// Analysis results of one function, valid until the session arena resets.
pub struct RaFunction<'arena> {
    arena: &'arena Bump,

    pub(crate) blocks: Vec<RaBlock>,
    pub(crate) exits: Vec<u32>,
    pub(crate) pov: Vec<u32>,
    pub(crate) loops: Vec<RaLoop>,

    pub(crate) work_regs: Vec<WorkReg>,
    pub(crate) work_count: RegCount,

    inst_data: Vec<Option<RaInstData<'arena>>>,

    pub(crate) reg_count: RegCount,
    pub(crate) allocable: RegMask,
    pub(crate) clobbered: RegMask,
    pub(crate) nodes_count: u32,
}

impl<'arena> RaFunction<'arena> {
    fn new(
        arena: &'arena Bump,
        reg_count: RegCount,
        allocable: RegMask,
        node_storage_len: usize,
    ) -> Self {
        Self {
            arena,
            blocks: Vec::new(),
            exits: Vec::new(),
            pov: Vec::new(),
            loops: Vec::new(),
            work_regs: Vec::new(),
            work_count: RegCount::new(),
            inst_data: vec![None; node_storage_len],
            reg_count,
            allocable,
            clobbered: RegMask::new(),
            nodes_count: 0,
        }
    }

    pub(crate) fn arena(&self) -> &'arena Bump {
        self.arena
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    pub fn blocks(&self) -> &[RaBlock] {
        &self.blocks
    }

    pub fn block(&self, id: u32) -> &RaBlock {
        &self.blocks[id as usize]
    }

    pub(crate) fn block_mut(&mut self, id: u32) -> &mut RaBlock {
        &mut self.blocks[id as usize]
    }

    /// Entry block; always the first one.
    pub fn entry_block(&self) -> &RaBlock {
        &self.blocks[0]
    }

    /// Exit blocks, usually one.
    pub fn exits(&self) -> &[u32] {
        &self.exits
    }

    /// Post-order view of reachable blocks.
    pub fn pov(&self) -> &[u32] {
        &self.pov
    }

    pub fn loops(&self) -> &[RaLoop] {
        &self.loops
    }

    pub fn work_regs(&self) -> &[WorkReg] {
        &self.work_regs
    }

    /// Count of work registers per kind.
    pub fn work_count(&self) -> RegCount {
        self.work_count
    }

    /// Work id of a virtual register, if it was referenced by the function.
    pub fn work_id_of(&self, vreg: VirtId) -> Option<u32> {
        self.work_regs
            .iter()
            .find(|w| w.virt_id() == vreg)
            .map(|w| w.work_id())
    }

    /// Allocation data attached to a node, if the node acts as an
    /// instruction.
    pub fn inst_data(&self, node: NodeId) -> Option<&RaInstData<'arena>> {
        self.inst_data[node.index()].as_ref()
    }

    pub(crate) fn set_inst_data(&mut self, node: NodeId, data: RaInstData<'arena>) {
        self.inst_data[node.index()] = Some(data);
    }

    pub(crate) fn inst_tied(&self, node: NodeId) -> Option<&'arena [TiedReg]> {
        self.inst_data[node.index()].as_ref().map(|data| data.tied)
    }

    pub(crate) fn set_inst_live(&mut self, node: NodeId, live: &'arena [crate::core::BitWord]) {
        if let Some(data) = self.inst_data[node.index()].as_mut() {
            data.live = Some(live);
        }
    }

    /// Machine register counts the adapter reported.
    pub fn reg_count(&self) -> RegCount {
        self.reg_count
    }

    /// Globally allocable registers.
    pub fn allocable_regs(&self) -> RegMask {
        self.allocable
    }

    /// Union of all clobbered-register masks of the function.
    pub fn clobbered_regs(&self) -> RegMask {
        self.clobbered
    }

    /// Count of nodes stamped during CFG construction.
    pub fn nodes_count(&self) -> u32 {
        self.nodes_count
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub(crate) fn new_block(&mut self, node: Option<NodeId>) -> u32 {
        let id = self.blocks.len() as u32;
        self.blocks.push(RaBlock::new(id, node));
        id
    }

    /// Connect `pred -> succ` on both sides; duplicates are ignored.
    pub(crate) fn append_successor(&mut self, pred: u32, succ: u32) {
        if self.blocks[pred as usize].succs.contains(&succ) {
            return;
        }
        debug_assert!(!self.blocks[succ as usize].preds.contains(&pred));
        self.blocks[pred as usize].succs.push(succ);
        self.blocks[succ as usize].preds.push(pred);
    }

    /// Like [`Self::append_successor`] but makes `succ` the first successor.
    /// Used for the fall-through edge after a conditional jump target was
    /// already appended.
    pub(crate) fn prepend_successor(&mut self, pred: u32, succ: u32) {
        if self.blocks[pred as usize].succs.contains(&succ) {
            return;
        }
        debug_assert!(!self.blocks[succ as usize].preds.contains(&pred));
        self.blocks[pred as usize].succs.insert(0, succ);
        self.blocks[succ as usize].preds.insert(0, pred);
    }

    /// Resolve a jump target label to its block. An unattached label first
    /// tries to share the block of a neighboring label (only labels and
    /// align directives may sit in between); otherwise a new block is
    /// created and attached to the whole label run.
    pub(crate) fn new_block_or_merge_with(
        &mut self,
        cc: &mut CodeCompiler,
        label: crate::core::operand::LabelId,
    ) -> CompileResult<u32> {
        use crate::core::compiler::NodeKind;

        if let Some(block) = cc.label_block(label) {
            return Ok(block);
        }

        let label_node = match cc.label_node(label) {
            Some(node) => node,
            None => {
                // Forward reference to a label bound later in the stream.
                let block = self.new_block(None);
                cc.set_label_block(label, Some(block));
                return Ok(block);
            }
        };

        // Walk backwards over neighboring labels, stopping at any code.
        let mut pending: Vec<crate::core::operand::LabelId> = Vec::new();
        let mut found: Option<u32> = None;
        let mut cursor = cc.node(label_node).prev();
        while let Some(node) = cursor {
            match &cc.node(node).kind {
                NodeKind::Label(other) => {
                    if let Some(block) = cc.label_block(*other) {
                        found = Some(block);
                        break;
                    }
                    pending.push(*other);
                }
                NodeKind::Align(_) => {}
                _ => break,
            }
            cursor = cc.node(node).prev();
        }

        let block = match found {
            Some(block) => block,
            None => self.new_block(None),
        };

        cc.set_label_block(label, Some(block));
        let earliest = pending.last().copied();
        for other in pending {
            cc.set_label_block(other, Some(block));
        }

        if self.blocks[block as usize].first.is_none() {
            let first = earliest.and_then(|l| cc.label_node(l)).unwrap_or(label_node);
            self.blocks[block as usize].first = Some(first);
            self.blocks[block as usize].last = Some(label_node);
        }

        Ok(block)
    }

    // ------------------------------------------------------------------
    // Work registers
    // ------------------------------------------------------------------

    /// Create the work register for `vreg` unless it already has one.
    pub(crate) fn add_to_work_regs(
        &mut self,
        cc: &mut CodeCompiler,
        vreg: VirtId,
    ) -> CompileResult<()> {
        if cc.virt_reg(vreg).work_link().is_some() {
            return Ok(());
        }
        let kind = cc.virt_reg(vreg).kind();
        let work_id = self.work_regs.len() as u32;
        self.work_regs.push(WorkReg::new(work_id, vreg, kind));
        self.work_count.add(kind, 1);
        cc.virt_reg_mut(vreg).work_link = Some(work_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dominance
    // ------------------------------------------------------------------

    /// Whether `a` dominates `b` and `a != b`.
    pub fn strictly_dominates(&self, a: u32, b: u32) -> bool {
        if a == b {
            return false;
        }
        if b == 0 {
            // Nothing strictly dominates the entry block.
            return false;
        }
        if a == 0 {
            // The entry block dominates every reachable block.
            return self.blocks[b as usize].idom.is_some();
        }
        let mut cursor = self.blocks[b as usize].idom;
        while let Some(idom) = cursor {
            if idom == a {
                return true;
            }
            if idom == 0 {
                return false;
            }
            cursor = self.blocks[idom as usize].idom;
        }
        false
    }

    /// Whether `a` dominates `b`; true when `a == b`.
    pub fn dominates(&self, a: u32, b: u32) -> bool {
        a == b || self.strictly_dominates(a, b)
    }

    /// Closest block dominating both `a` and `b`.
    pub fn nearest_common_dominator(&self, a: u32, b: u32) -> u32 {
        if a == b {
            return a;
        }
        if self.strictly_dominates(a, b) {
            return a;
        }
        if self.strictly_dominates(b, a) {
            return b;
        }

        // Mark all of a's dominators, then walk b's chain until a marked
        // block appears; the entry block is the fallback.
        let mut marked = vec![false; self.blocks.len()];
        let mut cursor = self.blocks[a as usize].idom;
        while let Some(idom) = cursor {
            if idom == 0 {
                break;
            }
            marked[idom as usize] = true;
            cursor = self.blocks[idom as usize].idom;
        }
        let mut cursor = self.blocks[b as usize].idom;
        while let Some(idom) = cursor {
            if idom == 0 {
                break;
            }
            if marked[idom as usize] {
                return idom;
            }
            cursor = self.blocks[idom as usize].idom;
        }
        0
    }
}

/// The register allocation pass, parameterized over an architecture
/// adapter.
pub struct RaPass<A: ArchAdapter> {
    arch: A,
}

impl<A: ArchAdapter> RaPass<A> {
    pub fn new(arch: A) -> Self {
        Self { arch }
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    /// Run the pass on the compiler's function and reset the arena on the
    /// way out, so nothing survives into the next function.
    pub fn run(&self, arena: &mut Bump, cc: &mut CodeCompiler) -> CompileResult<()> {
        let result = {
            let session = CompilationSession::new(&*arena);
            self.run_on_function(&session, cc).map(|_| ())
        };
        arena.reset();
        result
    }

    /// Run the pass and return the analysis, which borrows the session
    /// arena. Virtual-register analysis links are cleared before returning,
    /// on success and on failure.
    pub fn run_on_function<'arena>(
        &self,
        session: &CompilationSession<'arena>,
        cc: &mut CodeCompiler,
    ) -> CompileResult<RaFunction<'arena>> {
        if cc.arch() != self.arch.arch() {
            return Err(CompileError::InvalidArch);
        }
        if cc.func_node().is_none() || cc.end_node().is_none() {
            return Err(CompileError::InvalidState);
        }

        cc.reset_ra_annotations();

        let mut ra = RaFunction::new(
            session.arena(),
            self.arch.reg_counts(),
            self.arch.allocable_regs(),
            cc.node_storage_len(),
        );

        let result = self.run_steps(session, cc, &mut ra);

        // The links written into the virtual registers are only valid while
        // the pass runs; clear them no matter how the steps ended.
        for vreg in cc.virt_regs_mut() {
            vreg.reset_ra_links();
        }

        session.record_function_analyzed();
        result.map(|_| ra)
    }

    fn run_steps<'arena>(
        &self,
        session: &CompilationSession<'arena>,
        cc: &mut CodeCompiler,
        ra: &mut RaFunction<'arena>,
    ) -> CompileResult<()> {
        cfg::construct_cfg(ra, cc, &self.arch, session)?;
        order::construct_pov(ra)?;
        order::construct_dom(ra)?;
        loops::construct_loops(ra)?;
        liveness::construct_liveness(ra, cc, session)?;
        Ok(())
    }
}
