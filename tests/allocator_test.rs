//! End-to-end allocation tests over scheduled functions.

use npuc::alloc::{allocate_function, LiveRangeTracker, MemReservedMap};
use npuc::core::{ArchKind, CompileError, CompilerContext};
use npuc::ir::{BufferDesc, BufferId, DmaTransfer, ElemType, Function, MemoryKind, Task, TaskKind};

fn dma(src: BufferId, dst: BufferId) -> Task {
    Task::new(TaskKind::Dma(DmaTransfer {
        src,
        dst,
        length: 0,
    }))
}

/// All three buffers alive at once: one producer task reads and writes
/// them all at position 0, a consumer touches them again at position 1.
fn simultaneous_function(sizes: &[u64]) -> (Function, Vec<BufferId>) {
    let mut func = Function::new("main");
    let ids: Vec<BufferId> = sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            func.add_buffer(
                BufferDesc::new(
                    format!("buf{i}"),
                    MemoryKind::CmxNn,
                    ElemType::U8,
                    vec![size as i64],
                )
                .with_alignment(64),
            )
        })
        .collect();
    func.add_task(dma(ids[0], ids[1]));
    func.add_task(dma(ids[1], ids[2]));
    func.add_task(dma(ids[2], ids[0]));
    (func, ids)
}

fn ctx_with_cmx(capacity: u64) -> CompilerContext {
    let mut desc = npuc::core::ArchDesc::new(ArchKind::Npu37xx);
    desc.cmx_nn_size = capacity;
    CompilerContext::from_desc(desc)
}

#[test]
fn no_overlap_and_alignment_for_live_buffers() {
    let (func, ids) = simultaneous_function(&[100, 200, 50]);
    let ctx = ctx_with_cmx(512);
    let placed = allocate_function(&func, &ctx, &MemReservedMap::new()).unwrap();

    let mut regions: Vec<(u64, u64)> = Vec::new();
    for &id in &ids {
        let addr = placed[&id];
        assert_eq!(addr % 64, 0, "address {addr:#x} not 64-aligned");
        regions.push((addr, func.buffer(id).size));
    }
    for (i, &(a0, s0)) in regions.iter().enumerate() {
        for &(a1, s1) in &regions[i + 1..] {
            assert!(
                a0 + s0 <= a1 || a1 + s1 <= a0,
                "overlapping placements {regions:?}"
            );
        }
    }
}

#[test]
fn capacity_300_fails_fatally() {
    let (func, _) = simultaneous_function(&[100, 200, 50]);
    let ctx = ctx_with_cmx(300);
    let err = allocate_function(&func, &ctx, &MemReservedMap::new()).unwrap_err();
    assert!(matches!(err, CompileError::OutOfMemory { .. }));
}

#[test]
fn disjoint_live_ranges_share_storage() {
    let mut func = Function::new("main");
    let ddr_in =
        func.add_buffer(BufferDesc::new("in", MemoryKind::Ddr, ElemType::U8, vec![256]));
    let first =
        func.add_buffer(BufferDesc::new("first", MemoryKind::CmxNn, ElemType::U8, vec![256]));
    let second =
        func.add_buffer(BufferDesc::new("second", MemoryKind::CmxNn, ElemType::U8, vec![256]));
    let ddr_out =
        func.add_buffer(BufferDesc::new("out", MemoryKind::Ddr, ElemType::U8, vec![256]));
    // first lives for tasks 0-1, second for tasks 2-3.
    func.add_task(dma(ddr_in, first));
    func.add_task(dma(first, ddr_out));
    func.add_task(dma(ddr_in, second));
    func.add_task(dma(second, ddr_out));

    let ctx = ctx_with_cmx(256);
    let placed = allocate_function(&func, &ctx, &MemReservedMap::new()).unwrap();
    assert_eq!(placed[&first], placed[&second]);
}

#[test]
fn reserved_ranges_shrink_the_pool() {
    let mut func = Function::new("callee");
    let buf = func.add_buffer(BufferDesc::new(
        "local",
        MemoryKind::CmxNn,
        ElemType::U8,
        vec![128],
    ));
    func.add_task(dma(buf, buf));

    let ctx = ctx_with_cmx(512);
    let mut reserved = MemReservedMap::new();
    reserved.insert(MemoryKind::CmxNn, vec![(0, 256)]);
    let placed = allocate_function(&func, &ctx, &reserved).unwrap();
    assert!(placed[&buf] >= 256, "allocated inside the reserved range");
}

#[test]
fn views_never_get_their_own_storage() {
    let mut func = Function::new("main");
    let base = func.add_buffer(BufferDesc::new(
        "base",
        MemoryKind::CmxNn,
        ElemType::U8,
        vec![64],
    ));
    let view = func.add_buffer(BufferDesc::view_of(
        "view",
        base,
        &func.buffer(base).clone(),
        vec![8, 8],
    ));
    let out = func.add_buffer(BufferDesc::new("out", MemoryKind::Ddr, ElemType::U8, vec![64]));
    func.add_task(dma(base, out));
    func.add_task(dma(view, out));

    let ctx = ctx_with_cmx(512);
    let placed = allocate_function(&func, &ctx, &MemReservedMap::new()).unwrap();
    assert!(placed.contains_key(&base));
    assert!(!placed.contains_key(&view));
}

#[test]
fn live_ranges_drive_the_walk() {
    let (func, ids) = simultaneous_function(&[100, 200, 50]);
    let live = LiveRangeTracker::build(&func);
    assert_eq!(live.range(ids[0]).unwrap().first, 0);
    assert_eq!(live.range(ids[0]).unwrap().last, 2);
    assert_eq!(live.range(ids[2]).unwrap().first, 1);
}
