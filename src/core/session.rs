// This module provides arena-based compilation session management using the bumpalo
// crate. CompilationSession owns the arena used for string interning (tensor names,
// kernel names — the serializer caches key off interned strings) and tracks the
// statistics the pipeline reports at debug level: buffers allocated and high-water
// marks per memory kind, barriers merged away during legalization, and tasks
// serialized per executor. All interned strings share the session lifetime, so the
// serializer never clones names while building the blob.

//! Arena-based compilation session management.

use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::HashMap;

use crate::ir::MemoryKind;

/// Statistics gathered over one compilation.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub buffers_allocated: usize,
    pub high_water_marks: HashMap<MemoryKind, u64>,
    pub barriers_merged: usize,
    pub barriers_final: usize,
    pub tasks_serialized: usize,
    pub tensors_serialized: usize,
    pub kernels_deduplicated: usize,
    pub blob_size: usize,
}

/// Arena-based compilation session.
///
/// Owns the arena for compilation-lifetime objects and the running
/// statistics. Passed by shared reference; interior mutability covers the
/// stats and the intern table.
pub struct CompilationSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
    interned_strings: RefCell<HashMap<String, &'arena str>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }
        let interned: &'arena str = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Record the allocator high-water mark for one memory kind.
    pub fn record_high_water_mark(&self, kind: MemoryKind, bytes: u64) {
        let mut stats = self.stats.borrow_mut();
        let entry = stats.high_water_marks.entry(kind).or_insert(0);
        *entry = (*entry).max(bytes);
    }

    /// Record buffers placed by the allocator.
    pub fn record_buffers_allocated(&self, count: usize) {
        self.stats.borrow_mut().buffers_allocated += count;
    }

    /// Record the outcome of barrier legalization.
    pub fn record_barrier_merge(&self, merged_away: usize, remaining: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.barriers_merged += merged_away;
        stats.barriers_final = remaining;
    }

    /// Record one serialized task.
    pub fn record_task_serialized(&self) {
        self.stats.borrow_mut().tasks_serialized += 1;
    }

    /// Record one serialized tensor reference.
    pub fn record_tensor_serialized(&self) {
        self.stats.borrow_mut().tensors_serialized += 1;
    }

    /// Record a kernel-data cache hit.
    pub fn record_kernel_dedup(&self) {
        self.stats.borrow_mut().kernels_deduplicated += 1;
    }

    /// Record the final blob size.
    pub fn record_blob_size(&self, bytes: usize) {
        self.stats.borrow_mut().blob_size = bytes;
    }

    /// Snapshot of the current statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_returns_same_slice() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let a = session.intern_str("softmax_0");
        let b = session.intern_str("softmax_0");
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn high_water_mark_keeps_max() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        session.record_high_water_mark(MemoryKind::CmxNn, 100);
        session.record_high_water_mark(MemoryKind::CmxNn, 50);
        assert_eq!(session.stats().high_water_marks[&MemoryKind::CmxNn], 100);
    }
}
