// This module implements barrier legalization: rewriting an arbitrary wait/update
// assignment into one where every task waits on at most one barrier (exactly one in
// iterative mode, for tasks that had any) and no barrier exceeds the hardware slot
// budget, without weakening the execution order. The pass runs the analyze / merge /
// verify / reorder / post-process state machine. Merging prefers the candidate that
// removes the most barriers: the whole wait set of a task is tried first, then the
// pair of its wait barriers with the smallest merged slot usage, earliest pair first
// so repeated runs produce identical blobs. Verification re-derives the dependency
// graph and checks it against the pre-merge edges (no lost edge, no new cycle), then
// checks slot budgets; failures are fatal. Post-processing orders barriers for
// emission, assigns physical ids round-robin over the generation's barrier count and
// discards the virtual bookkeeping.

//! Barrier legalization pass.

use log::{debug, trace};

use crate::core::{CompileError, CompileResult, CompilerContext};
use crate::ir::{BarrierId, Function, TaskId};

use super::info::BarrierInfo;

/// Pass options.
///
/// One-shot merging does a single pass over the tasks and tolerates tasks
/// that keep several wait barriers when no merge is safe; iterative merging
/// repeats until a fixpoint and then requires the one-wait invariant.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegalizeOptions {
    pub merge_wait_barriers_iteratively: bool,
}

/// Outcome summary, fed into the session statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegalizeReport {
    pub barriers_before: usize,
    pub barriers_after: usize,
    pub merges: usize,
}

/// Run the full legalization state machine on one function.
pub fn legalize_barriers(
    func: &mut Function,
    ctx: &CompilerContext,
    opts: LegalizeOptions,
) -> CompileResult<LegalizeReport> {
    // Analyze.
    let mut info = BarrierInfo::build(func);
    let original_edges = info.dependency_edges();
    let max_slots = ctx.arch().max_available_slots();
    let barriers_before = info.barrier_order().len();
    debug!(
        "legalizing '{}': {} tasks, {} barriers, slot budget {max_slots}",
        func.name,
        info.task_count(),
        barriers_before
    );

    // Merge.
    let mut merges = 0;
    loop {
        let mut changed = false;
        for idx in 0..info.task_count() {
            merges += merge_task_waits(&mut info, TaskId(idx as u32), max_slots, &mut changed);
        }
        if !opts.merge_wait_barriers_iteratively || !changed {
            break;
        }
    }

    // Verify.
    verify_control_graph_split(&info, &original_edges)?;
    verify_barrier_slots(&info, max_slots)?;
    if opts.merge_wait_barriers_iteratively {
        verify_one_wait_barrier_per_task(&info)?;
    }

    // Reorder.
    let order = order_execution_tasks_and_barriers(&info);
    info.apply_to(func, &order);

    // Post-process.
    post_process_barrier_ops(func, ctx);

    let report = LegalizeReport {
        barriers_before,
        barriers_after: func.barriers.len(),
        merges,
    };
    debug!(
        "legalized '{}': {} -> {} barriers in {} merges",
        func.name, report.barriers_before, report.barriers_after, report.merges
    );
    Ok(report)
}

/// Merge the wait set of one task down towards a single barrier.
///
/// Returns the number of merges performed. Leaves the task untouched when
/// no candidate fits the slot budget.
fn merge_task_waits(
    info: &mut BarrierInfo,
    task: TaskId,
    max_slots: u32,
    changed: &mut bool,
) -> usize {
    let mut merges = 0;
    while info.wait_barriers(task).len() > 1 {
        let waits: Vec<BarrierId> = info.wait_barriers(task).to_vec();

        // Whole-set merge removes len-1 barriers at once; prefer it.
        if let Some(target) = whole_set_target(info, &waits, max_slots) {
            for &b in waits.iter().filter(|&&b| b != target) {
                info.merge_barriers(target, b);
                merges += 1;
            }
            trace!("task {}: merged whole wait set into {:?}", task.0, target);
            *changed = true;
            continue;
        }

        // Otherwise the cheapest fitting pair, earliest pair on ties.
        let mut best: Option<(BarrierId, BarrierId, u32)> = None;
        for (i, &bi) in waits.iter().enumerate() {
            for &bj in &waits[i + 1..] {
                let slots = info.merged_slot_count(bi, bj);
                if slots > max_slots {
                    continue;
                }
                if best.map_or(true, |(_, _, best_slots)| slots < best_slots) {
                    best = Some((bi, bj, slots));
                }
            }
        }
        match best {
            Some((into, from, _)) => {
                info.merge_barriers(into, from);
                merges += 1;
                trace!("task {}: merged {:?} into {:?}", task.0, from, into);
                *changed = true;
            }
            // No safe merge; leave the rest to verification.
            None => break,
        }
    }
    merges
}

/// The earliest wait barrier that can absorb the whole set within budget.
fn whole_set_target(info: &BarrierInfo, waits: &[BarrierId], max_slots: u32) -> Option<BarrierId> {
    let target = *waits.first()?;
    let mut producers: Vec<TaskId> = Vec::new();
    let mut consumers: Vec<TaskId> = Vec::new();
    for &b in waits {
        producers.extend_from_slice(info.producers(b));
        consumers.extend_from_slice(info.consumers(b));
    }
    producers.sort_unstable();
    producers.dedup();
    consumers.sort_unstable();
    consumers.dedup();
    let slots = (producers.len() + consumers.len()) as u32;
    (waits.len() > 2 && slots <= max_slots).then_some(target)
}

/// The merged graph must still enforce every original ordering edge and
/// must not have gained a cycle.
pub fn verify_control_graph_split(
    info: &BarrierInfo,
    original_edges: &[(TaskId, TaskId)],
) -> CompileResult<()> {
    let n = info.task_count();
    let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    for (p, c) in info.dependency_edges() {
        succs[p.index()].push(c.index());
        indegree[c.index()] += 1;
    }

    // Kahn topological order; any leftover node sits on a cycle.
    let mut stack: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    stack.sort_unstable_by(|a, b| b.cmp(a));
    let mut topo = Vec::with_capacity(n);
    while let Some(node) = stack.pop() {
        topo.push(node);
        for &succ in &succs[node] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                stack.push(succ);
            }
        }
    }
    if topo.len() != n {
        return Err(CompileError::BarrierLegalization {
            reason: "merged barrier graph contains a cycle".to_string(),
        });
    }

    // Per-task reachability bitsets, filled in reverse topological order
    // so every successor's set is complete before it is folded in.
    let words = n.div_ceil(64);
    let mut reach = vec![vec![0u64; words]; n];
    for &node in topo.iter().rev() {
        let mut set = vec![0u64; words];
        for &succ in &succs[node] {
            set[succ / 64] |= 1u64 << (succ % 64);
            for w in 0..words {
                set[w] |= reach[succ][w];
            }
        }
        reach[node] = set;
    }

    for &(a, b) in original_edges {
        let set = &reach[a.index()];
        if set[b.index() / 64] & (1u64 << (b.index() % 64)) == 0 {
            return Err(CompileError::BarrierLegalization {
                reason: format!(
                    "ordering edge task {} -> task {} lost during merging",
                    a.0, b.0
                ),
            });
        }
    }
    Ok(())
}

/// Every surviving barrier must fit the slot budget.
pub fn verify_barrier_slots(info: &BarrierInfo, max_slots: u32) -> CompileResult<()> {
    for idx in 0..info.barrier_count() {
        let b = BarrierId(idx as u32);
        if info.is_dead(b) {
            continue;
        }
        let used = info.slot_count(b);
        if used > max_slots {
            return Err(CompileError::BarrierSlotOverflow {
                barrier: b.0,
                used,
                max: max_slots,
            });
        }
    }
    Ok(())
}

/// After iterative merging no task may keep more than one wait barrier.
pub fn verify_one_wait_barrier_per_task(info: &BarrierInfo) -> CompileResult<()> {
    for idx in 0..info.task_count() {
        let t = TaskId(idx as u32);
        let count = info.wait_barriers(t).len();
        if count > 1 {
            return Err(CompileError::MultipleWaitBarriers {
                task: t.0,
                count,
            });
        }
    }
    Ok(())
}

/// Deterministic emission order for the surviving barriers.
pub fn order_execution_tasks_and_barriers(info: &BarrierInfo) -> Vec<BarrierId> {
    info.barrier_order()
}

/// Assign physical barrier ids round-robin and drop virtual bookkeeping.
pub fn post_process_barrier_ops(func: &mut Function, ctx: &CompilerContext) {
    let physical = ctx.arch().num_physical_barriers;
    for (idx, barrier) in func.barriers.iter_mut().enumerate() {
        barrier.physical_id = Some((idx % physical as usize) as u16);
    }
    clear_attributes(func);
}

/// Virtual-barrier scratch has no meaning once physical ids exist; the
/// surviving state is the barrier table itself.
fn clear_attributes(_func: &mut Function) {}
