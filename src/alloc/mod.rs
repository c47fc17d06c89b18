// This module ties the allocation subsystem together: the liveness tracker, the
// best-fit free-list core, the per-kind LinearScanHandler and the reserved-memory
// analysis, plus the program-order driving walk. allocate_function walks the task
// list once; at each position it first marks buffers whose range starts there as
// alive (first-use order) and then retires buffers whose range ends there, so two
// buffers whose ranges merely touch at a position still exclude each other. Failure
// to place a buffer is fatal: a higher-level tiling/spilling pass must have reduced
// the footprint before this walk runs, there is no retry here.

//! Buffer allocation: liveness, linear scan, reserved ranges.

pub mod handler;
pub mod linear_scan;
pub mod live_range;
pub mod reserved;

pub use handler::LinearScanHandler;
pub use linear_scan::LinearScan;
pub use live_range::{LiveRange, LiveRangeTracker};
pub use reserved::{unique_ranges, MemReservedMap, ReservedMemInfo};

use std::collections::HashMap;

use log::debug;

use crate::core::{CompileResult, CompilerContext};
use crate::ir::{BufferId, FuncId, Function, MemoryKind, Module};

/// Final buffer placements of one function.
pub type FunctionAllocation = HashMap<BufferId, u64>;

/// Placements for every function of a module.
#[derive(Debug, Default)]
pub struct ModuleAllocation {
    functions: HashMap<FuncId, FunctionAllocation>,
}

impl ModuleAllocation {
    pub fn function(&self, id: FuncId) -> Option<&FunctionAllocation> {
        self.functions.get(&id)
    }

    pub fn set_function(&mut self, id: FuncId, allocation: FunctionAllocation) {
        self.functions.insert(id, allocation);
    }

    /// Address of a buffer, views resolved to their root by the caller.
    pub fn address_of(&self, func: FuncId, buf: BufferId) -> Option<u64> {
        self.functions.get(&func).and_then(|m| m.get(&buf)).copied()
    }
}

/// Walk one function in program order and place every storage-owning
/// buffer of every pool kind.
pub fn allocate_function(
    func: &Function,
    ctx: &CompilerContext,
    reserved: &MemReservedMap,
) -> CompileResult<FunctionAllocation> {
    func.verify()?;
    let live = LiveRangeTracker::build(func);
    let mut result = FunctionAllocation::new();

    for kind in MemoryKind::POOLS {
        let Some(capacity) = ctx.arch().capacity(kind) else {
            continue;
        };
        let has_buffers = func
            .buffers
            .iter()
            .any(|b| b.mem_kind == kind && b.alias_of.is_none());
        if !has_buffers {
            continue;
        }
        let empty = Vec::new();
        let kind_reserved = reserved.get(&kind).unwrap_or(&empty);
        let mut handler =
            LinearScanHandler::new(func, ctx.arch(), kind, capacity, 1, kind_reserved)?;

        for pos in 0..func.tasks.len() {
            for id in live.starting_at(pos) {
                if func.buffer(id).mem_kind == kind {
                    handler.mark_as_alive(id)?;
                }
            }
            for id in live.ending_at(pos) {
                if func.buffer(id).mem_kind == kind {
                    handler.mark_as_dead(id);
                }
            }
        }
        debug!(
            "'{}' {:?}: high-water mark {} / {} bytes",
            func.name,
            kind,
            handler.max_allocated_size(),
            capacity
        );
        result.extend(handler.into_addresses());
    }
    Ok(result)
}

/// Allocate every function of the module, entry points first so callees
/// see their callers' reservations.
pub fn allocate_module(module: &Module, ctx: &CompilerContext) -> CompileResult<ModuleAllocation> {
    let mut allocation = ModuleAllocation::default();

    // Entry points carry no caller constraints; place them first.
    for &entry in &module.entry_points {
        let reserved = {
            let mut info = ReservedMemInfo::new(module, &allocation);
            info.reserved_mem_info_for(entry)?.clone()
        };
        let placed = allocate_function(module.function(entry), ctx, &reserved)?;
        allocation.set_function(entry, placed);
    }

    // Remaining functions (callees) inherit reservations from the
    // placements made so far.
    for (idx, func) in module.functions.iter().enumerate() {
        let id = FuncId(idx as u32);
        if module.entry_points.contains(&id) {
            continue;
        }
        let reserved = {
            let mut info = ReservedMemInfo::new(module, &allocation);
            info.reserved_mem_info_for(id)?.clone()
        };
        let placed = allocate_function(func, ctx, &reserved)?;
        allocation.set_function(id, placed);
    }
    Ok(allocation)
}
