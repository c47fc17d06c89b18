// This module implements the LinearScanHandler: the per-memory-kind bookkeeping layer
// the scheduler-driving walk talks to. It owns the free-list core, the alive set, the
// concrete address map, the fixed-allocation set and the dynamic-spill set. mark_as_alive
// places a buffer (fixed buffers keep their pre-assigned address; everything else goes
// through best-fit), allocated() records an address and treats misalignment as a fatal
// internal error, mark_as_dead returns the range to the free list. Swizzled buffers get
// their size padded and their alignment raised from the arch's key table before placement.
// get_spill_weight ranks spill candidates the way classic register allocators do: many
// uses over a short range make a buffer expensive to spill.

//! Per-memory-kind allocation state driven by the program-order walk.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::core::{ArchDesc, CompileError, CompileResult};
use crate::ir::{BufferId, Function, MemoryKind};

use super::linear_scan::LinearScan;
use super::live_range::LiveRangeTracker;

/// Allocation bookkeeping for one memory kind of one function.
pub struct LinearScanHandler<'f> {
    func: &'f Function,
    arch: &'f ArchDesc,
    mem_kind: MemoryKind,
    scan: LinearScan,
    default_alignment: u64,
    alive: HashSet<BufferId>,
    /// Addresses of currently live buffers; ranges return to the scan on
    /// death.
    addresses: HashMap<BufferId, u64>,
    /// Every address ever assigned. Death reclaims the range, not the
    /// record; the serializer reads this map.
    assigned: HashMap<BufferId, u64>,
    dynamic_spills: HashSet<BufferId>,
}

impl<'f> LinearScanHandler<'f> {
    /// Create a handler over `capacity` bytes of `mem_kind`.
    ///
    /// `reserved` ranges (caller-live memory, sibling functions) are carved
    /// out before any allocation; fixed-address buffers are carved out
    /// next, so the scan never hands out their storage.
    pub fn new(
        func: &'f Function,
        arch: &'f ArchDesc,
        mem_kind: MemoryKind,
        capacity: u64,
        default_alignment: u64,
        reserved: &[(u64, u64)],
    ) -> CompileResult<Self> {
        let mut scan = LinearScan::new(capacity);
        for &(address, size) in reserved {
            if !scan.reserve(address, size) {
                return Err(CompileError::Serialization {
                    reason: format!(
                        "overlapping reserved ranges at {address:#x}+{size} in {mem_kind:?}"
                    ),
                });
            }
        }

        let mut handler = Self {
            func,
            arch,
            mem_kind,
            scan,
            default_alignment,
            alive: HashSet::new(),
            addresses: HashMap::new(),
            assigned: HashMap::new(),
            dynamic_spills: HashSet::new(),
        };

        for (idx, buf) in func.buffers.iter().enumerate() {
            let id = BufferId(idx as u32);
            if buf.mem_kind != mem_kind || buf.alias_of.is_some() {
                continue;
            }
            if let Some(address) = buf.fixed_address {
                let size = handler.get_size(id);
                if !handler.scan.reserve(address, size) {
                    return Err(CompileError::FixedAllocConflict {
                        buffer: buf.name.clone(),
                        address,
                        kind: mem_kind,
                    });
                }
                handler.allocated(id, address)?;
            }
        }
        Ok(handler)
    }

    pub fn mem_kind(&self) -> MemoryKind {
        self.mem_kind
    }

    /// Byte size the buffer occupies, swizzling padding included.
    pub fn get_size(&self, id: BufferId) -> u64 {
        let buf = self.func.buffer(id);
        match buf.swizzling_key {
            Some(key) => self.arch.swizzled_size(buf.size, key),
            None => buf.size,
        }
    }

    /// Address alignment the buffer requires.
    pub fn get_alignment(&self, id: BufferId) -> u64 {
        let buf = self.func.buffer(id);
        let base = buf.alignment.max(self.default_alignment);
        match buf.swizzling_key {
            Some(key) => base.max(self.arch.swizzling_alignment(key)),
            None => base,
        }
    }

    /// True for pre-placed buffers excluded from the free-list search.
    pub fn is_fixed_alloc(&self, id: BufferId) -> bool {
        self.func.buffer(id).fixed_address.is_some()
    }

    /// Bring a buffer into the alive set, placing it if needed.
    ///
    /// Fixed buffers only toggle membership. Returns the buffer's address.
    pub fn mark_as_alive(&mut self, id: BufferId) -> CompileResult<u64> {
        debug_assert!(self.func.buffer(id).alias_of.is_none());
        if let Some(&address) = self.addresses.get(&id) {
            // Pre-placed or already allocated: only membership changes.
            self.alive.insert(id);
            return Ok(address);
        }
        let size = self.get_size(id);
        let alignment = self.get_alignment(id);
        let address =
            self.scan
                .allocate(size, alignment)
                .ok_or_else(|| CompileError::OutOfMemory {
                    kind: self.mem_kind,
                    size,
                    alignment,
                    capacity: self.scan.capacity(),
                })?;
        self.allocated(id, address)?;
        self.alive.insert(id);
        trace!(
            "'{}' alive at {address:#x}+{size} in {:?}",
            self.func.buffer(id).name,
            self.mem_kind
        );
        Ok(address)
    }

    /// Drop a buffer from the alive set; its range becomes reusable.
    ///
    /// Fixed allocations keep their carve-out for the whole session.
    pub fn mark_as_dead(&mut self, id: BufferId) {
        if !self.alive.remove(&id) {
            return;
        }
        if self.is_fixed_alloc(id) {
            return;
        }
        if let Some(address) = self.addresses.remove(&id) {
            self.scan.free(address, self.get_size(id));
            trace!("'{}' dead, range reclaimed", self.func.buffer(id).name);
        }
    }

    /// Record a concrete address for a buffer.
    ///
    /// Misalignment here means the allocator itself is broken; it is
    /// reported as a fatal internal error, never recovered.
    pub fn allocated(&mut self, id: BufferId, address: u64) -> CompileResult<()> {
        let alignment = self.get_alignment(id);
        if address % alignment != 0 {
            return Err(CompileError::MisalignedAllocation {
                buffer: self.func.buffer(id).name.clone(),
                address,
                alignment,
            });
        }
        self.addresses.insert(id, address);
        self.assigned.insert(id, address);
        Ok(())
    }

    pub fn is_alive(&self, id: BufferId) -> bool {
        self.alive.contains(&id)
    }

    pub fn address_of(&self, id: BufferId) -> Option<u64> {
        self.assigned.get(&id).copied()
    }

    /// Mark a buffer as runtime-relocatable.
    pub fn mark_as_dynamic_spill(&mut self, id: BufferId) {
        self.dynamic_spills.insert(id);
    }

    pub fn remove_dynamic_spill(&mut self, id: BufferId) {
        self.dynamic_spills.remove(&id);
    }

    pub fn is_dynamic_spill(&self, id: BufferId) -> bool {
        self.dynamic_spills.contains(&id)
    }

    /// Spill priority: cheaper candidates have lower weight.
    ///
    /// Weight grows with use density (uses per covered position) and
    /// shrinks with size, matching the classic register-allocator
    /// heuristic of spilling large, rarely touched values first.
    pub fn get_spill_weight(&self, id: BufferId, live: &LiveRangeTracker) -> f64 {
        let Some(range) = live.range(id) else {
            return 0.0;
        };
        let size = self.get_size(id).max(1);
        range.ref_count as f64 / (range.span_len() as f64 * size as f64)
    }

    /// Alive buffers ordered by ascending spill weight.
    pub fn spill_candidates(&self, live: &LiveRangeTracker) -> Vec<BufferId> {
        let mut candidates: Vec<BufferId> = self
            .alive
            .iter()
            .copied()
            .filter(|id| !self.is_fixed_alloc(*id))
            .collect();
        candidates.sort_by(|a, b| {
            self.get_spill_weight(*a, live)
                .total_cmp(&self.get_spill_weight(*b, live))
                .then(a.cmp(b))
        });
        candidates
    }

    /// High-water mark across the whole allocation session.
    pub fn max_allocated_size(&self) -> u64 {
        self.scan.max_allocated_size()
    }

    /// Final `(buffer, address)` pairs: every assignment of the session,
    /// fixed allocations and since-dead buffers included.
    pub fn into_addresses(self) -> HashMap<BufferId, u64> {
        debug!(
            "{:?} high-water mark: {} bytes",
            self.mem_kind,
            self.scan.max_allocated_size()
        );
        self.assigned
    }
}
