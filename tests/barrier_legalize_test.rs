//! Barrier legalization invariants over whole functions.

use npuc::barrier::{legalize_barriers, BarrierInfo, LegalizeOptions};
use npuc::core::{ArchDesc, ArchKind, CompileError, CompilerContext};
use npuc::ir::{
    BarrierId, BufferDesc, DmaTransfer, ElemType, Function, MemoryKind, Task, TaskKind,
};

fn dma_task(func: &mut Function) -> Task {
    let b = func.add_buffer(BufferDesc::new(
        format!("b{}", func.buffers.len()),
        MemoryKind::Ddr,
        ElemType::U8,
        vec![16],
    ));
    Task::new(TaskKind::Dma(DmaTransfer {
        src: b,
        dst: b,
        length: 0,
    }))
}

fn ctx() -> CompilerContext {
    CompilerContext::new(ArchKind::Npu37xx)
}

fn ctx_with_slots(max: u32) -> CompilerContext {
    let mut desc = ArchDesc::new(ArchKind::Npu37xx);
    desc.max_slots_sum = max;
    desc.max_variant_count = max;
    CompilerContext::from_desc(desc)
}

fn iterative() -> LegalizeOptions {
    LegalizeOptions {
        merge_wait_barriers_iteratively: true,
    }
}

/// Fan-in: `producers` tasks split across `barriers` barriers, one task
/// waiting on all of them.
fn fan_in(producers: usize, barriers: usize) -> Function {
    let mut func = Function::new("main");
    let ids: Vec<BarrierId> = (0..barriers).map(|_| func.add_barrier()).collect();
    for i in 0..producers {
        let t = dma_task(&mut func);
        func.add_task(t.updates(&[ids[i % barriers]]));
    }
    let t = dma_task(&mut func);
    func.add_task(t.waits_on(&ids));
    func
}

#[test]
fn one_wait_barrier_after_iterative_merge() {
    let mut func = fan_in(6, 3);
    legalize_barriers(&mut func, &ctx(), iterative()).unwrap();
    for task in &func.tasks {
        assert!(task.wait_barriers.len() <= 1);
    }
    assert_eq!(func.tasks.last().unwrap().wait_barriers.len(), 1);
}

#[test]
fn slot_budget_holds_after_merge() {
    let mut func = fan_in(8, 4);
    let ctx = ctx();
    legalize_barriers(&mut func, &ctx, iterative()).unwrap();
    let info = BarrierInfo::build(&func);
    let budget = ctx.arch().max_available_slots();
    for idx in 0..func.barriers.len() {
        assert!(info.slot_count(BarrierId(idx as u32)) <= budget);
    }
}

#[test]
fn ordering_edges_are_preserved() {
    let mut func = fan_in(6, 3);
    let before = BarrierInfo::build(&func).dependency_edges();
    legalize_barriers(&mut func, &ctx(), iterative()).unwrap();
    let after = BarrierInfo::build(&func).dependency_edges();
    for edge in before {
        assert!(after.contains(&edge), "legalization lost edge {edge:?}");
    }
}

/// B1 with 3 producers / 2 consumers, B2 with 1 producer / 5 consumers,
/// slot budget 8. The merged barrier would use 10 slots and the pair is
/// the only candidate, so legalization must fail rather than drop an
/// edge.
#[test]
fn unsatisfiable_merge_fails_fatally() {
    let mut func = Function::new("main");
    let b1 = func.add_barrier();
    let b2 = func.add_barrier();
    for _ in 0..3 {
        let t = dma_task(&mut func);
        func.add_task(t.updates(&[b1]));
    }
    let t = dma_task(&mut func);
    func.add_task(t.updates(&[b2]));
    let t = dma_task(&mut func);
    func.add_task(t.waits_on(&[b1, b2]));
    let t = dma_task(&mut func);
    func.add_task(t.waits_on(&[b1]));
    for _ in 0..4 {
        let t = dma_task(&mut func);
        func.add_task(t.waits_on(&[b2]));
    }

    let err = legalize_barriers(&mut func, &ctx_with_slots(8), iterative()).unwrap_err();
    assert!(matches!(
        err,
        CompileError::MultipleWaitBarriers { .. } | CompileError::BarrierSlotOverflow { .. }
    ));
}

/// Same shape with a budget that fits the merged barrier.
#[test]
fn merge_succeeds_when_budget_allows() {
    let mut func = Function::new("main");
    let b1 = func.add_barrier();
    let b2 = func.add_barrier();
    for _ in 0..3 {
        let t = dma_task(&mut func);
        func.add_task(t.updates(&[b1]));
    }
    let t = dma_task(&mut func);
    func.add_task(t.updates(&[b2]));
    let t = dma_task(&mut func);
    func.add_task(t.waits_on(&[b1, b2]));

    legalize_barriers(&mut func, &ctx_with_slots(8), iterative()).unwrap();
    assert_eq!(func.barriers.len(), 1);
    assert_eq!(func.tasks[4].wait_barriers.len(), 1);
}

#[test]
fn one_shot_mode_keeps_unmergeable_waits() {
    let mut func = Function::new("main");
    let b1 = func.add_barrier();
    let b2 = func.add_barrier();
    for _ in 0..3 {
        let t = dma_task(&mut func);
        func.add_task(t.updates(&[b1]));
    }
    let t = dma_task(&mut func);
    func.add_task(t.updates(&[b2]));
    let t = dma_task(&mut func);
    func.add_task(t.waits_on(&[b1, b2]));
    let t = dma_task(&mut func);
    func.add_task(t.clone().waits_on(&[b1]));
    for _ in 0..4 {
        let t = dma_task(&mut func);
        func.add_task(t.waits_on(&[b2]));
    }

    // One-shot mode tolerates the leftover pair as long as slots fit.
    let opts = LegalizeOptions {
        merge_wait_barriers_iteratively: false,
    };
    legalize_barriers(&mut func, &ctx_with_slots(8), opts).unwrap();
    assert_eq!(func.tasks[4].wait_barriers.len(), 2);
}

#[test]
fn physical_ids_wrap_around_the_hw_pool() {
    let mut func = Function::new("main");
    let mut desc = ArchDesc::new(ArchKind::Npu37xx);
    desc.num_physical_barriers = 2;
    let ctx = CompilerContext::from_desc(desc);
    for _ in 0..5 {
        let b = func.add_barrier();
        let t = dma_task(&mut func);
        func.add_task(t.updates(&[b]));
        let t = dma_task(&mut func);
        func.add_task(t.waits_on(&[b]));
    }
    legalize_barriers(&mut func, &ctx, LegalizeOptions::default()).unwrap();
    let ids: Vec<u16> = func
        .barriers
        .iter()
        .map(|b| b.physical_id.unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1, 0, 1, 0]);
}

#[test]
fn legalization_is_deterministic() {
    let build = || {
        let mut func = fan_in(9, 3);
        legalize_barriers(&mut func, &ctx(), iterative()).unwrap();
        func.tasks
            .iter()
            .map(|t| (t.wait_barriers.clone(), t.update_barriers.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(build(), build());
}
