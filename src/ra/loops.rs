//! Natural loop discovery.
//!
//! An edge whose target dominates its source is a back-edge; the natural
//! loop of that edge is its header plus every block that reaches the edge's
//! source without passing through the header. Back-edges sharing a header
//! merge into one loop. Each block's weight grows by one per containing
//! loop and its innermost loop is recorded; loops link to their immediate
//! parent.

use crate::core::error::CompileResult;

use super::block::{BlockFlags, LoopFlags, RaLoop};
use super::RaFunction;

pub(crate) fn construct_loops(ra: &mut RaFunction<'_>) -> CompileResult<()> {
    log::debug!("[ra] construct_loops");

    let block_count = ra.blocks.len();
    let mut loop_of_header: Vec<Option<u32>> = vec![None; block_count];

    // Find back-edges in reverse post-order so outer headers come first.
    for index in (0..ra.pov.len()).rev() {
        let source = ra.pov[index];
        for succ_index in 0..ra.blocks[source as usize].succs.len() {
            let header = ra.blocks[source as usize].succs[succ_index];
            if !ra.dominates(header, source) {
                continue;
            }

            let loop_id = match loop_of_header[header as usize] {
                Some(loop_id) => loop_id,
                None => {
                    let loop_id = ra.loops.len() as u32;
                    ra.loops.push(RaLoop::new(loop_id, header));
                    loop_of_header[header as usize] = Some(loop_id);
                    loop_id
                }
            };
            collect_body(ra, loop_id, header, source);
            log::trace!("[ra]   back-edge #{source} -> #{header}");
        }
    }

    // Weights: one per containing loop.
    for loop_index in 0..ra.loops.len() {
        for body_index in 0..ra.loops[loop_index].body.len() {
            let block = ra.loops[loop_index].body[body_index];
            ra.blocks[block as usize].weight += 1;
        }
    }

    // Innermost loop per block: the smallest body that contains it.
    for loop_index in 0..ra.loops.len() {
        let size = ra.loops[loop_index].body.len();
        for body_index in 0..size {
            let block = ra.loops[loop_index].body[body_index] as usize;
            let replace = match ra.blocks[block].loop_id {
                None => true,
                Some(current) => ra.loops[current as usize].body.len() > size,
            };
            if replace {
                ra.blocks[block].loop_id = Some(loop_index as u32);
            }
        }
    }

    // Parent links: the innermost other loop containing this loop's header.
    for loop_index in 0..ra.loops.len() {
        let header = ra.loops[loop_index].header();
        let mut parent: Option<usize> = None;
        for candidate in 0..ra.loops.len() {
            if candidate == loop_index || !ra.loops[candidate].contains(header) {
                continue;
            }
            let better = match parent {
                None => true,
                Some(found) => ra.loops[candidate].body.len() < ra.loops[found].body.len(),
            };
            if better {
                parent = Some(candidate);
            }
        }
        if let Some(parent) = parent {
            ra.loops[loop_index].parent = Some(parent as u32);
            ra.loops[parent].flags.insert(LoopFlags::HAS_NESTED);
        }
    }

    // Blocks outside every loop run at most once.
    for block in &mut ra.blocks {
        if block.weight == 0 {
            block.add_flags(BlockFlags::SINGLE_PASS);
        }
    }

    log::debug!("[ra] construct_loops done ({} loops)", ra.loops.len());
    Ok(())
}

/// Grow the loop body backwards from the back-edge source until the header.
fn collect_body(ra: &mut RaFunction<'_>, loop_id: u32, header: u32, source: u32) {
    let mut in_body = vec![false; ra.blocks.len()];
    for &block in &ra.loops[loop_id as usize].body {
        in_body[block as usize] = true;
    }

    if !in_body[header as usize] {
        in_body[header as usize] = true;
        ra.loops[loop_id as usize].body.push(header);
    }

    let mut work = Vec::new();
    if !in_body[source as usize] {
        in_body[source as usize] = true;
        ra.loops[loop_id as usize].body.push(source);
        work.push(source);
    }

    while let Some(block) = work.pop() {
        for pred_index in 0..ra.blocks[block as usize].preds.len() {
            let pred = ra.blocks[block as usize].preds[pred_index];
            if in_body[pred as usize] {
                continue;
            }
            in_body[pred as usize] = true;
            ra.loops[loop_id as usize].body.push(pred);
            work.push(pred);
        }
    }
}
