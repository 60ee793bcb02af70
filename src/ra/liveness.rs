//! Live-variable analysis.
//!
//! Phase A scans every reachable block backwards, computing GEN/KILL from
//! the tied-register roles and snapshotting the set of live work registers
//! entering each instruction into its allocation data. Later writes
//! override earlier reads within one block, which the backward order gives
//! for free.
//!
//! Phase B runs the classical fixed point: `OUT = union of successor INs`,
//! `IN = (OUT | GEN) & !KILL`, on a work list seeded with all reachable
//! blocks in post-order so exit-side blocks settle first. A block's
//! predecessors are re-queued only after it changed and only once they were
//! visited themselves.

use std::fmt::Write as _;

use crate::core::bitvec::BitVec;
use crate::core::compiler::CodeCompiler;
use crate::core::error::{CompileError, CompileResult};
use crate::core::session::CompilationSession;

use super::block::BlockFlags;
use super::RaFunction;

pub(crate) fn construct_liveness<'arena>(
    ra: &mut RaFunction<'arena>,
    cc: &CodeCompiler,
    session: &CompilationSession<'arena>,
) -> CompileResult<()> {
    log::debug!("[ra] construct_liveness");

    let num_work = ra.work_regs.len();
    if num_work == 0 {
        log::debug!("[ra] construct_liveness done (no work registers)");
        return Ok(());
    }

    let mut work_list: Vec<u32> = Vec::with_capacity(ra.pov.len());
    let mut live = BitVec::with_len(num_work);

    // Phase A: GEN/KILL and per-instruction snapshots.
    for index in (0..ra.pov.len()).rev() {
        let block = ra.pov[index];
        ra.blocks[block as usize].resize_live_bits(num_work);
        work_list.push(block);
        live.clear_all();

        let first = ra.blocks[block as usize]
            .first
            .ok_or(CompileError::InvalidState)?;
        let last = ra.blocks[block as usize]
            .last
            .ok_or(CompileError::InvalidState)?;

        let mut node = last;
        loop {
            if let Some(tied) = ra.inst_tied(node) {
                for tied_reg in tied {
                    let work_id = cc
                        .virt_reg(tied_reg.vreg)
                        .work_link()
                        .ok_or(CompileError::InvalidState)? as usize;

                    if tied_reg.is_write_only() {
                        ra.blocks[block as usize].kill.set(work_id, true);
                        live.set(work_id, false);
                    } else {
                        ra.blocks[block as usize].kill.set(work_id, false);
                        ra.blocks[block as usize].gen.set(work_id, true);
                        live.set(work_id, true);
                    }
                }
                let snapshot = session.alloc_slice(live.words());
                ra.set_inst_live(node, snapshot);
            }

            if node == first {
                break;
            }
            node = cc.node(node).prev().ok_or(CompileError::InvalidState)?;
        }
    }

    // Phase B: fixed point over OUT/IN.
    let mut visits = 0usize;
    while let Some(block) = work_list.pop() {
        visits += 1;
        let block = block as usize;

        // The first visit always recomputes IN.
        let mut changed = !ra.blocks[block].flags.contains(BlockFlags::HAS_LIVENESS);
        if changed {
            ra.blocks[block].flags.insert(BlockFlags::HAS_LIVENESS);
        }

        let mut out = std::mem::take(&mut ra.blocks[block].live_out);
        for succ_index in 0..ra.blocks[block].succs.len() {
            let successor = ra.blocks[block].succs[succ_index] as usize;
            changed |= out.or_assign(&ra.blocks[successor].live_in);
        }
        ra.blocks[block].live_out = out;

        if changed {
            let mut live_in = std::mem::take(&mut ra.blocks[block].live_in);
            let changed_in = live_in.live_in_assign(
                &ra.blocks[block].live_out,
                &ra.blocks[block].gen,
                &ra.blocks[block].kill,
            );
            ra.blocks[block].live_in = live_in;

            if changed_in {
                for pred_index in 0..ra.blocks[block].preds.len() {
                    let pred = ra.blocks[block].preds[pred_index];
                    if ra.blocks[pred as usize]
                        .flags
                        .contains(BlockFlags::HAS_LIVENESS)
                    {
                        work_list.push(pred);
                    }
                }
            }
        }
    }

    session.record_liveness_visits(visits);

    debug_assert!(ra
        .pov
        .iter()
        .all(|&b| ra.blocks[b as usize].flags.contains(BlockFlags::HAS_LIVENESS)));
    debug_assert!(ra
        .exits
        .iter()
        .filter(|&&b| ra.blocks[b as usize].succs.is_empty())
        .all(|&b| ra.blocks[b as usize].live_out.none()));

    if log::log_enabled!(log::Level::Trace) {
        log::trace!("{}", ra.format_liveness(cc));
    }
    log::debug!("[ra] construct_liveness done ({visits} visits)");
    Ok(())
}

impl<'arena> RaFunction<'arena> {
    /// Human-readable IN/OUT/GEN/KILL dump with virtual register names.
    pub fn format_liveness(&self, cc: &CodeCompiler) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            let _ = writeln!(out, "{{block #{}}}", block.id());
            for (name, bits) in [
                ("IN  ", block.live_in()),
                ("OUT ", block.live_out()),
                ("GEN ", block.gen()),
                ("KILL", block.kill()),
            ] {
                let mut n = 0;
                for work_id in bits.ones() {
                    if n == 0 {
                        let _ = write!(out, "  {name} [");
                    } else {
                        let _ = write!(out, ", ");
                    }
                    let vreg = self.work_regs[work_id].virt_id();
                    let _ = write!(out, "{}", cc.virt_reg(vreg).name());
                    n += 1;
                }
                if n != 0 {
                    let _ = writeln!(out, "]");
                }
            }
        }
        out
    }
}
