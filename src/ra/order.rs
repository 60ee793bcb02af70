//! Post-order view and dominator tree.
//!
//! The post-order view is built by an iterative depth-first traversal over
//! successor edges with an explicit `(block, next-child)` stack; a block's
//! order is assigned when the traversal leaves it. The dominator tree uses
//! the Cooper-Harvey-Kennedy iterative algorithm over the reverse
//! post-order; it converges in a few sweeps on real control flow.

use crate::core::error::CompileResult;

use super::RaFunction;

pub(crate) fn construct_pov(ra: &mut RaFunction<'_>) -> CompileResult<()> {
    log::debug!("[ra] construct_pov");

    let count = ra.blocks.len();
    if count == 0 {
        return Ok(());
    }

    let mut stack: Vec<(u32, usize)> = Vec::with_capacity(count);
    let mut visited = vec![false; count];

    let mut current = 0u32;
    let mut child = 0usize;
    visited[0] = true;

    loop {
        loop {
            if child >= ra.blocks[current as usize].succs.len() {
                break;
            }
            let successor = ra.blocks[current as usize].succs[child];
            child += 1;
            if visited[successor as usize] {
                continue;
            }
            visited[successor as usize] = true;

            // Come back to the remaining children later.
            stack.push((current, child));
            current = successor;
            child = 0;
        }

        ra.blocks[current as usize].pov_order = ra.pov.len() as u32;
        ra.pov.push(current);

        match stack.pop() {
            Some((block, next_child)) => {
                current = block;
                child = next_child;
            }
            None => break,
        }
    }

    log::debug!("[ra] construct_pov done ({} reachable)", ra.pov.len());
    Ok(())
}

fn intersect(ra: &RaFunction<'_>, mut a: u32, mut b: u32) -> u32 {
    while a != b {
        while ra.blocks[b as usize].pov_order > ra.blocks[a as usize].pov_order {
            a = ra.blocks[a as usize].idom.unwrap_or(0);
        }
        while ra.blocks[a as usize].pov_order > ra.blocks[b as usize].pov_order {
            b = ra.blocks[b as usize].idom.unwrap_or(0);
        }
    }
    a
}

pub(crate) fn construct_dom(ra: &mut RaFunction<'_>) -> CompileResult<()> {
    if ra.blocks.is_empty() {
        return Ok(());
    }
    log::debug!("[ra] construct_dom");

    ra.blocks[0].idom = Some(0);

    let mut iterations = 0u32;
    let mut changed = true;
    while changed {
        iterations += 1;
        changed = false;

        // Reverse post-order sweep.
        for index in (0..ra.pov.len()).rev() {
            let block = ra.pov[index];
            if block == 0 {
                continue;
            }

            let mut idom: Option<u32> = None;
            for pred_index in (0..ra.blocks[block as usize].preds.len()).rev() {
                let pred = ra.blocks[block as usize].preds[pred_index];
                if ra.blocks[pred as usize].idom.is_none() {
                    continue;
                }
                idom = Some(match idom {
                    None => pred,
                    Some(found) => intersect(ra, found, pred),
                });
            }

            if let Some(idom) = idom {
                if ra.blocks[block as usize].idom != Some(idom) {
                    log::trace!("[ra]   idom of #{block} -> #{idom}");
                    ra.blocks[block as usize].idom = Some(idom);
                    changed = true;
                }
            }
        }
    }

    log::debug!("[ra] construct_dom done ({iterations} iterations)");
    Ok(())
}
