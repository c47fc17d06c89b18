// This module computes, per callee function and per memory kind, the address ranges
// its local allocator must leave alone. Two sources feed the reserved set: caller
// buffers whose live range spans the linearized call position (their storage outlives
// the call), and sibling entry functions sharing the module's static pools (all of
// their placements are off-limits to each other). Reservations propagate transitively
// through the call graph: a callee inherits its caller's own reserved ranges along
// with the caller's live spans. Results are normalized with unique_ranges (sorted by
// address, overlapping and adjacent pairs merged) and cached per function; the whole
// map is a pure function of module structure plus allocator results and is recomputed
// from scratch when either changes.

//! Reserved address ranges across call boundaries.

use std::collections::HashMap;

use log::debug;

use crate::core::{CompileError, CompileResult};
use crate::ir::{FuncId, MemoryKind, Module};

use super::live_range::LiveRangeTracker;
use super::ModuleAllocation;

/// Memory kind -> ordered, non-overlapping `(address, size)` list.
pub type MemReservedMap = HashMap<MemoryKind, Vec<(u64, u64)>>;

/// Sort by address and merge overlapping or adjacent ranges.
pub fn unique_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (address, size) in ranges {
        match merged.last_mut() {
            Some((prev_addr, prev_size)) if address <= *prev_addr + *prev_size => {
                let end = (address + size).max(*prev_addr + *prev_size);
                *prev_size = end - *prev_addr;
            }
            _ => merged.push((address, size)),
        }
    }
    merged
}

/// Lazily computed reserved-range map for every function of a module.
pub struct ReservedMemInfo<'m> {
    module: &'m Module,
    allocation: &'m ModuleAllocation,
    cache: HashMap<FuncId, MemReservedMap>,
}

impl<'m> ReservedMemInfo<'m> {
    pub fn new(module: &'m Module, allocation: &'m ModuleAllocation) -> Self {
        Self {
            module,
            allocation,
            cache: HashMap::new(),
        }
    }

    /// Reserved ranges for the named function.
    pub fn reserved_mem_info(&mut self, name: &str) -> CompileResult<&MemReservedMap> {
        let id = self.module.find_function(name)?;
        self.reserved_mem_info_for(id)
    }

    /// Reserved ranges for a function handle.
    pub fn reserved_mem_info_for(&mut self, id: FuncId) -> CompileResult<&MemReservedMap> {
        if !self.cache.contains_key(&id) {
            let mut visiting = Vec::new();
            let map = self.compute(id, &mut visiting)?;
            self.cache.insert(id, map);
        }
        Ok(&self.cache[&id])
    }

    fn compute(&mut self, id: FuncId, visiting: &mut Vec<FuncId>) -> CompileResult<MemReservedMap> {
        if visiting.contains(&id) {
            return Err(CompileError::CallGraphCycle {
                name: self.module.function(id).name.clone(),
            });
        }
        visiting.push(id);

        let mut raw: MemReservedMap = HashMap::new();

        // Caller-live ranges across every call site reaching this function,
        // plus the caller's own reservations.
        for (caller_idx, caller) in self.module.functions.iter().enumerate() {
            let caller_id = FuncId(caller_idx as u32);
            for call in caller.calls.iter().filter(|c| c.callee == id) {
                let live = LiveRangeTracker::build(caller);
                for buf in live.spanning(call.position) {
                    // Operands handed to the callee are its own I/O; the
                    // callee sees them through its parameter buffers.
                    if call.operands.iter().any(|op| caller.root_of(*op) == buf) {
                        continue;
                    }
                    if let Some(address) = self.allocation.address_of(caller_id, buf) {
                        let desc = caller.buffer(buf);
                        raw.entry(desc.mem_kind)
                            .or_default()
                            .push((address, desc.size));
                    }
                }

                let inherited = match self.cache.get(&caller_id) {
                    Some(cached) => cached.clone(),
                    None => self.compute(caller_id, visiting)?,
                };
                for (kind, ranges) in inherited {
                    raw.entry(kind).or_default().extend(ranges);
                }
            }
        }

        // Sibling entry functions share the static pools.
        if self.module.entry_points.contains(&id) {
            for &entry in &self.module.entry_points {
                if entry == id {
                    continue;
                }
                let sibling = self.module.function(entry);
                let Some(addresses) = self.allocation.function(entry) else {
                    continue;
                };
                for (buf, &address) in addresses {
                    let desc = sibling.buffer(*buf);
                    raw.entry(desc.mem_kind)
                        .or_default()
                        .push((address, desc.size));
                }
            }
        }

        visiting.pop();

        let map: MemReservedMap = raw
            .into_iter()
            .map(|(kind, ranges)| (kind, unique_ranges(ranges)))
            .collect();
        debug!(
            "reserved ranges for '{}': {} kinds",
            self.module.function(id).name,
            map.len()
        );
        Ok(map)
    }
}
