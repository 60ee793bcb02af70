//! CFG construction.
//!
//! A single forward scan over the node list forms basic blocks, records
//! successor edges and attaches tied-register data to every instruction.
//! Unreachable instructions (code after an unconditional jump that no label
//! re-seeds) are removed from the node list immediately; the assembler
//! could not encode their virtual registers later anyway.
//!
//! Conditional-jump fall-throughs rewire the scan, so after the linear run
//! of the current block ends the builder continues with the next block that
//! has not been constructed yet; every block's body is visited exactly
//! once.

use crate::arch::{ArchAdapter, JumpKind, OpRole, SingleRegCase};
use crate::core::compiler::{CodeCompiler, NodeId, NodeKind};
use crate::core::error::{CompileError, CompileResult};
use crate::core::operand::{LabelId, MemOperand, Operand, VirtId};
use crate::core::reg::{PhysId, RegCount, RegKind, RegMask, RegStats, ANY_PHYS_ID, MAX_REG_KINDS};
use crate::core::session::CompilationSession;

use super::block::BlockFlags;
use super::tied::{TiedBuilder, TiedFlags};
use super::RaFunction;

pub(crate) fn construct_cfg<'arena, A: ArchAdapter>(
    ra: &mut RaFunction<'arena>,
    cc: &mut CodeCompiler,
    arch: &A,
    session: &CompilationSession<'arena>,
) -> CompileResult<()> {
    CfgBuilder {
        ra,
        cc,
        arch,
        session,
    }
    .run()
}

struct CfgBuilder<'x, 'arena, A: ArchAdapter> {
    ra: &'x mut RaFunction<'arena>,
    cc: &'x mut CodeCompiler,
    arch: &'x A,
    session: &'x CompilationSession<'arena>,
}

/// Lightweight classification of a node for the scan loop.
enum Dispatch {
    Label(LabelId),
    InstLike,
    Sentinel,
    Func,
    Other,
}

impl<'x, 'arena, A: ArchAdapter> CfgBuilder<'x, 'arena, A> {
    fn run(&mut self) -> CompileResult<()> {
        log::debug!("[ra] construct_cfg");

        let func_node = self.cc.func_node().ok_or(CompileError::InvalidState)?;
        let end_node = self.cc.end_node().ok_or(CompileError::InvalidState)?;

        let mut node = func_node;
        let mut current: Option<u32> = Some(self.ra.new_block(Some(node)));
        let mut has_code = false;
        let mut block_index = 0usize;
        let mut position = 0u32;
        let mut block_stats = RegStats::new();

        'outer: loop {
            'inner: loop {
                if self.cc.node(node).has_position() {
                    return Err(CompileError::InvalidState);
                }
                position += 1;
                self.cc.node_mut(node).position = position;

                let dispatch = match &self.cc.node(node).kind {
                    NodeKind::Label(label) => Dispatch::Label(*label),
                    kind if kind.acts_as_inst() => Dispatch::InstLike,
                    NodeKind::Sentinel => Dispatch::Sentinel,
                    NodeKind::Func { .. } => Dispatch::Func,
                    _ => Dispatch::Other,
                };

                match dispatch {
                    Dispatch::Label(label) => match current {
                        None => {
                            // Unreachable code; the label makes it reachable
                            // again.
                            match self.cc.label_block(label) {
                                Some(block) => {
                                    current = Some(block);
                                    self.adopt_block_node(block, node);
                                    has_code = false;
                                    block_stats.reset();
                                    if self.ra.blocks[block as usize].is_constructed() {
                                        break 'inner;
                                    }
                                    log::trace!("[ra] {{block #{block}}}");
                                }
                                None => {
                                    let block = self.ra.new_block(Some(node));
                                    self.cc.set_label_block(label, Some(block));
                                    current = Some(block);
                                    has_code = false;
                                    block_stats.reset();
                                    log::trace!("[ra] {{block #{block}}}");
                                }
                            }
                        }
                        Some(cur) => {
                            match self.cc.label_block(label) {
                                Some(successor) if successor == cur => {
                                    // Multiple labels attached to one block;
                                    // allowed only while it has no code.
                                    if has_code {
                                        return Err(CompileError::InvalidState);
                                    }
                                }
                                Some(successor) => {
                                    // The label belongs to another block;
                                    // close the current one and fall through
                                    // into it.
                                    let prev = self.cc.node(node).prev();
                                    self.ra.blocks[cur as usize].last = prev;
                                    self.ra.blocks[cur as usize].make_constructed(block_stats);
                                    self.ra.append_successor(cur, successor);
                                    self.log_successors(cur);

                                    self.adopt_block_node(successor, node);
                                    current = Some(successor);
                                    has_code = false;
                                    block_stats.reset();
                                    log::trace!("[ra] {{block #{successor}}}");
                                }
                                None => {
                                    if has_code {
                                        // The block already contains code, so
                                        // the label forks a fresh successor.
                                        let prev = self.cc.node(node).prev();
                                        self.ra.blocks[cur as usize].last = prev;
                                        self.ra.blocks[cur as usize].make_constructed(block_stats);

                                        let successor = self.ra.new_block(Some(node));
                                        self.ra.append_successor(cur, successor);
                                        self.log_successors(cur);
                                        self.cc.set_label_block(label, Some(successor));
                                        current = Some(successor);
                                        has_code = false;
                                        block_stats.reset();
                                        log::trace!("[ra] {{block #{successor}}}");
                                    } else {
                                        self.cc.set_label_block(label, Some(cur));
                                    }
                                }
                            }
                        }
                    },

                    Dispatch::InstLike => {
                        let Some(cur) = current else {
                            // Dead code after an unconditional jump; remove
                            // it and continue with the next node.
                            let next = self.cc.node(node).next();
                            self.cc.remove_node(node);
                            position -= 1;
                            node = next.ok_or(CompileError::InvalidState)?;
                            continue 'inner;
                        };

                        has_code = true;
                        let jump = self.tag_node(node, cur, &mut block_stats)?;

                        if jump != JumpKind::None {
                            let target = self.jump_target(node)?;
                            let jump_successor = self.ra.new_block_or_merge_with(self.cc, target)?;
                            self.ra.blocks[cur as usize].last = Some(node);
                            self.ra.blocks[cur as usize].make_constructed(block_stats);
                            self.ra.append_successor(cur, jump_successor);

                            if jump == JumpKind::Direct {
                                // Code after an unconditional jump stays
                                // unreachable until a label re-seeds the
                                // scan.
                                self.log_successors(cur);
                                current = None;
                            } else {
                                // The next node starts the fall-through
                                // successor, which by convention is the
                                // first one.
                                node = self
                                    .cc
                                    .node(node)
                                    .next()
                                    .ok_or(CompileError::InvalidState)?;

                                let flow = match &self.cc.node(node).kind {
                                    NodeKind::Label(label) => {
                                        let label = *label;
                                        match self.cc.label_block(label) {
                                            Some(block) => {
                                                self.adopt_block_node(block, node);
                                                block
                                            }
                                            None => {
                                                let block = self.ra.new_block(Some(node));
                                                self.cc.set_label_block(label, Some(block));
                                                block
                                            }
                                        }
                                    }
                                    _ => self.ra.new_block(Some(node)),
                                };

                                self.ra.prepend_successor(cur, flow);
                                self.log_successors(cur);

                                current = Some(flow);
                                has_code = false;
                                block_stats.reset();

                                if self.ra.blocks[flow as usize].is_constructed() {
                                    break 'inner;
                                }
                                log::trace!("[ra] {{block #{flow}}}");
                                // The fall-through node itself has not been
                                // visited yet.
                                continue 'inner;
                            }
                        }
                    }

                    Dispatch::Sentinel => {
                        if node == end_node {
                            if let Some(cur) = current {
                                self.ra.blocks[cur as usize].last = Some(node);
                                self.ra.blocks[cur as usize].make_constructed(block_stats);
                                self.ra.exits.push(cur);
                            }
                            break 'inner;
                        }
                    }

                    Dispatch::Func => {
                        // A function node is only valid as the very first
                        // node of the scan.
                        if node != func_node {
                            return Err(CompileError::InvalidState);
                        }
                        let Some(cur) = current else {
                            return Err(CompileError::InvalidState);
                        };
                        self.tag_func_args(node, cur, &mut block_stats)?;
                    }

                    Dispatch::Other => {
                        // Alignment, comments and other informative nodes
                        // pass through untouched.
                    }
                }

                node = self
                    .cc
                    .node(node)
                    .next()
                    .ok_or(CompileError::InvalidState)?;
            }

            // The current linear run ended; continue with the next block
            // that has not been constructed yet.
            loop {
                block_index += 1;
                if block_index >= self.ra.blocks.len() {
                    self.ra.nodes_count = position;
                    self.session.record_blocks_created(self.ra.blocks.len());
                    log::debug!(
                        "[ra] construct_cfg done ({} blocks, {} nodes)",
                        self.ra.blocks.len(),
                        position
                    );
                    return Ok(());
                }
                if !self.ra.blocks[block_index].is_constructed() {
                    break;
                }
            }
            current = Some(block_index as u32);
            node = self.ra.blocks[block_index]
                .last
                .ok_or(CompileError::InvalidState)?;
            has_code = false;
            block_stats.reset();
            continue 'outer;
        }
    }

    /// Give a block created from an unbound forward label its first node.
    fn adopt_block_node(&mut self, block: u32, node: NodeId) {
        let entry = &mut self.ra.blocks[block as usize];
        if entry.first.is_none() {
            entry.first = Some(node);
            entry.last = Some(node);
        }
    }

    /// The last operand of a jump must be a label.
    fn jump_target(&self, node: NodeId) -> CompileResult<LabelId> {
        let label = match &self.cc.node(node).kind {
            NodeKind::Inst { ops, .. } => ops.last().and_then(Operand::as_label),
            _ => None,
        };
        label.ok_or(CompileError::InvalidState)
    }

    fn add_use(
        &mut self,
        tb: &mut TiedBuilder,
        vreg: VirtId,
        flags: TiedFlags,
        allocable_override: Option<u32>,
        r_phys: PhysId,
        w_phys: PhysId,
    ) -> CompileResult<()> {
        if !self.cc.is_virt_reg_valid(vreg) {
            return Err(CompileError::InvalidVirtId);
        }
        let kind = self.cc.virt_reg(vreg).kind();
        let allocable = allocable_override.unwrap_or_else(|| self.ra.allocable.get(kind));
        tb.add(self.ra, self.cc, vreg, flags, allocable, r_phys, w_phys)
    }

    fn add_mem_uses(&mut self, tb: &mut TiedBuilder, mem: &MemOperand) -> CompileResult<()> {
        if let Some(base) = mem.base {
            self.add_use(tb, base, TiedFlags::R, None, ANY_PHYS_ID, ANY_PHYS_ID)?;
        }
        if let Some(index) = mem.index {
            self.add_use(tb, index, TiedFlags::R, None, ANY_PHYS_ID, ANY_PHYS_ID)?;
        }
        Ok(())
    }

    /// Build the tied-register set of an instruction-like node and classify
    /// its control transfer.
    fn tag_node(
        &mut self,
        node: NodeId,
        block: u32,
        block_stats: &mut RegStats,
    ) -> CompileResult<JumpKind> {
        match &self.cc.node(node).kind {
            NodeKind::Inst { id, ops, extra } => {
                let (id, ops, extra) = (*id, ops.clone(), *extra);
                self.tag_inst(node, block, block_stats, id, &ops, extra)
            }
            NodeKind::FuncRet { rets } => {
                let rets = rets.clone();
                self.tag_func_ret(node, block, block_stats, &rets)
            }
            NodeKind::FuncCall { target, args, rets } => {
                let (target, args, rets) = (*target, args.clone(), rets.clone());
                self.tag_func_call(node, block, block_stats, target, &args, &rets)
            }
            _ => Err(CompileError::InvalidState),
        }
    }

    fn tag_inst(
        &mut self,
        node: NodeId,
        block: u32,
        block_stats: &mut RegStats,
        id: crate::core::operand::InstId,
        ops: &[Operand],
        extra: Option<VirtId>,
    ) -> CompileResult<JumpKind> {
        if !self.arch.is_defined_id(id) {
            return Err(CompileError::InvalidInstruction);
        }
        let info = self.arch.inst_info(id)?;
        let roles = self.arch.tag_operands(id, &info, ops)?;

        let mut tb = TiedBuilder::new();
        let mut single_reg_ops = 0usize;

        for (i, op) in ops.iter().enumerate() {
            match op {
                Operand::Reg(vreg) => {
                    let role = roles.get(i).copied().unwrap_or_else(OpRole::read_any);
                    self.add_use(&mut tb, *vreg, role.flags, None, role.r_phys, role.w_phys)?;
                    if single_reg_ops == i {
                        single_reg_ops += 1;
                    }
                }
                Operand::Mem(mem) => self.add_mem_uses(&mut tb, mem)?,
                _ => {}
            }
        }

        // Extra implicit register: repeat counter or mask selector.
        if let Some(extra) = extra {
            if !self.cc.is_virt_reg_valid(extra) {
                return Err(CompileError::InvalidVirtId);
            }
            let kind = self.cc.virt_reg(extra).kind();
            let role = self.arch.tag_extra_reg(kind);
            let allocable = if role.is_fixed() {
                0
            } else {
                self.ra.allocable.get(kind)
            };
            self.add_use(&mut tb, extra, role.flags, Some(allocable), role.r_phys, role.w_phys)?;
            if kind == RegKind::K {
                single_reg_ops = 0;
            }
        }

        // When every operand names the same virtual register the combined
        // use may degenerate (`xor x, x` only writes).
        if single_reg_ops == ops.len() && tb.total() == 1 {
            match info.common.single_reg_case() {
                SingleRegCase::None => {}
                SingleRegCase::ReadOnly => tb.make_read_only(),
                SingleRegCase::WriteOnly => tb.make_write_only(),
            }
        }

        block_stats.combine_with(tb.stats);
        tb.store_to(self.ra, self.cc, node, block, RegMask::new())?;
        self.session.record_inst_tagged();
        Ok(info.common.jump_kind())
    }

    fn tag_func_ret(
        &mut self,
        node: NodeId,
        block: u32,
        block_stats: &mut RegStats,
        rets: &[Operand],
    ) -> CompileResult<JumpKind> {
        let mut tb = TiedBuilder::new();
        let mut counts = RegCount::new();

        for op in rets {
            match op {
                Operand::Reg(vreg) => {
                    if !self.cc.is_virt_reg_valid(*vreg) {
                        return Err(CompileError::InvalidVirtId);
                    }
                    let kind = self.cc.virt_reg(*vreg).kind();
                    let index = counts.get(kind) as usize;
                    counts.add(kind, 1);
                    let phys = self.arch.ret_phys(kind, index);
                    self.add_use(
                        &mut tb,
                        *vreg,
                        TiedFlags::R | TiedFlags::R_FUNC,
                        None,
                        phys,
                        ANY_PHYS_ID,
                    )?;
                }
                Operand::Mem(mem) => self.add_mem_uses(&mut tb, mem)?,
                _ => {}
            }
        }

        block_stats.combine_with(tb.stats);
        tb.store_to(self.ra, self.cc, node, block, RegMask::new())?;
        self.session.record_inst_tagged();
        Ok(JumpKind::None)
    }

    fn tag_func_call(
        &mut self,
        node: NodeId,
        block: u32,
        block_stats: &mut RegStats,
        target: Operand,
        args: &[Operand],
        rets: &[VirtId],
    ) -> CompileResult<JumpKind> {
        let mut tb = TiedBuilder::new();

        match target {
            Operand::Reg(vreg) => {
                self.add_use(&mut tb, vreg, TiedFlags::R, None, ANY_PHYS_ID, ANY_PHYS_ID)?;
            }
            Operand::Mem(mem) => self.add_mem_uses(&mut tb, &mem)?,
            _ => {}
        }

        let mut arg_counts = RegCount::new();
        for op in args {
            match op {
                Operand::Reg(vreg) => {
                    if !self.cc.is_virt_reg_valid(*vreg) {
                        return Err(CompileError::InvalidVirtId);
                    }
                    let kind = self.cc.virt_reg(*vreg).kind();
                    let index = arg_counts.get(kind) as usize;
                    arg_counts.add(kind, 1);
                    let phys = self.arch.arg_phys(kind, index);
                    self.add_use(
                        &mut tb,
                        *vreg,
                        TiedFlags::R | TiedFlags::R_FUNC,
                        None,
                        phys,
                        ANY_PHYS_ID,
                    )?;
                }
                Operand::Mem(mem) => self.add_mem_uses(&mut tb, mem)?,
                _ => {}
            }
        }

        let mut ret_counts = RegCount::new();
        for vreg in rets {
            if !self.cc.is_virt_reg_valid(*vreg) {
                return Err(CompileError::InvalidVirtId);
            }
            let kind = self.cc.virt_reg(*vreg).kind();
            let index = ret_counts.get(kind) as usize;
            ret_counts.add(kind, 1);
            let phys = self.arch.ret_phys(kind, index);
            self.add_use(
                &mut tb,
                *vreg,
                TiedFlags::W | TiedFlags::W_FUNC,
                None,
                ANY_PHYS_ID,
                phys,
            )?;
        }

        // Volatile registers die across the call.
        let clobbers = self.arch.call_clobbers();
        for kind_index in 0..MAX_REG_KINDS {
            if let Some(kind) = RegKind::from_index(kind_index) {
                if clobbers.get(kind) != 0 {
                    tb.stats.make_clobbered(kind);
                }
            }
        }

        block_stats.combine_with(tb.stats);
        self.ra.clobbered.or(&clobbers);
        self.ra.block_mut(block).add_flags(BlockFlags::HAS_FUNC_CALLS);
        tb.store_to(self.ra, self.cc, node, block, clobbers)?;
        self.session.record_inst_tagged();
        Ok(JumpKind::None)
    }

    /// Arguments are produced into registers by the function entry itself.
    fn tag_func_args(
        &mut self,
        node: NodeId,
        block: u32,
        block_stats: &mut RegStats,
    ) -> CompileResult<()> {
        let args = match &self.cc.node(node).kind {
            NodeKind::Func { args } => args.clone(),
            _ => return Err(CompileError::InvalidState),
        };
        if args.is_empty() {
            return Ok(());
        }

        let mut tb = TiedBuilder::new();
        let mut counts = RegCount::new();
        for vreg in args {
            if !self.cc.is_virt_reg_valid(vreg) {
                return Err(CompileError::InvalidVirtId);
            }
            let kind = self.cc.virt_reg(vreg).kind();
            let index = counts.get(kind) as usize;
            counts.add(kind, 1);
            let phys = self.arch.arg_phys(kind, index);
            self.add_use(
                &mut tb,
                vreg,
                TiedFlags::W | TiedFlags::W_FUNC,
                None,
                ANY_PHYS_ID,
                phys,
            )?;
        }

        block_stats.combine_with(tb.stats);
        tb.store_to(self.ra, self.cc, node, block, RegMask::new())?;
        Ok(())
    }

    fn log_successors(&self, block: u32) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "[ra]   => {:?}",
                self.ra.blocks[block as usize].successors()
            );
        }
    }
}
