// This module implements the LiveRangeTracker that computes, per buffer, the span of
// scheduled task positions between first producer and last consumer. The tracker walks
// the task list once in program order, resolving view buffers to their storage root so
// a view's use extends the root's range. Call sites are folded in as single scheduling
// points: a call position counts as a use of every operand handed across the boundary.
// The result drives both the linear-scan allocator and the reserved-memory analysis.

//! Per-buffer liveness over the scheduled task order.

use crate::ir::{BufferId, Function};

/// Liveness information for a single buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    /// First task position the buffer is live at.
    pub first: usize,
    /// Last task position the buffer is live at.
    pub last: usize,
    /// Number of uses including the definition.
    pub ref_count: u32,
}

impl LiveRange {
    /// Whether the buffer is live at `pos`.
    pub fn contains(&self, pos: usize) -> bool {
        self.first <= pos && pos <= self.last
    }

    /// Whether the buffer is live across the boundary before task `pos`
    /// (produced earlier, still needed at or after `pos`). Call sites are
    /// linearized to such boundaries.
    pub fn spans(&self, pos: usize) -> bool {
        self.first < pos && pos <= self.last
    }

    /// Number of task positions covered.
    pub fn span_len(&self) -> usize {
        self.last - self.first + 1
    }
}

/// Computes live ranges for every storage-owning buffer of a function.
pub struct LiveRangeTracker {
    ranges: Vec<Option<LiveRange>>,
}

impl LiveRangeTracker {
    /// Walk `func`'s task list in program order and record per-root ranges.
    pub fn build(func: &Function) -> Self {
        let mut tracker = Self {
            ranges: vec![None; func.buffers.len()],
        };

        for (pos, task) in func.tasks.iter().enumerate() {
            for buf in task.used_buffers() {
                tracker.record(func.root_of(buf), pos);
            }
        }
        // A call keeps its operands live at the linearized position.
        for call in &func.calls {
            for buf in &call.operands {
                tracker.record(func.root_of(*buf), call.position.min(func.tasks.len()));
            }
        }
        tracker
    }

    fn record(&mut self, root: BufferId, pos: usize) {
        let slot = &mut self.ranges[root.index()];
        match slot {
            None => {
                *slot = Some(LiveRange {
                    first: pos,
                    last: pos,
                    ref_count: 1,
                });
            }
            Some(range) => {
                range.ref_count += 1;
                if pos < range.first {
                    range.first = pos;
                }
                if pos > range.last {
                    range.last = pos;
                }
            }
        }
    }

    /// Live range of a storage root, `None` if the buffer is never used.
    pub fn range(&self, root: BufferId) -> Option<&LiveRange> {
        self.ranges.get(root.index()).and_then(|r| r.as_ref())
    }

    /// Roots whose range starts exactly at `pos`, in table order.
    pub fn starting_at(&self, pos: usize) -> impl Iterator<Item = BufferId> + '_ {
        self.ranges.iter().enumerate().filter_map(move |(i, r)| {
            r.filter(|range| range.first == pos)
                .map(|_| BufferId(i as u32))
        })
    }

    /// Roots whose range ends exactly at `pos`, in table order.
    pub fn ending_at(&self, pos: usize) -> impl Iterator<Item = BufferId> + '_ {
        self.ranges.iter().enumerate().filter_map(move |(i, r)| {
            r.filter(|range| range.last == pos)
                .map(|_| BufferId(i as u32))
        })
    }

    /// Roots live across `pos` (see [`LiveRange::spans`]).
    pub fn spanning(&self, pos: usize) -> impl Iterator<Item = BufferId> + '_ {
        self.ranges.iter().enumerate().filter_map(move |(i, r)| {
            r.filter(|range| range.spans(pos))
                .map(|_| BufferId(i as u32))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BufferDesc, DmaTransfer, ElemType, MemoryKind, Task, TaskKind};

    fn dma(src: BufferId, dst: BufferId) -> Task {
        Task::new(TaskKind::Dma(DmaTransfer {
            src,
            dst,
            length: 0,
        }))
    }

    #[test]
    fn ranges_follow_first_and_last_use() {
        let mut func = Function::new("main");
        let a = func.add_buffer(BufferDesc::new("a", MemoryKind::Ddr, ElemType::U8, vec![16]));
        let b = func.add_buffer(BufferDesc::new("b", MemoryKind::CmxNn, ElemType::U8, vec![16]));
        let c = func.add_buffer(BufferDesc::new("c", MemoryKind::Ddr, ElemType::U8, vec![16]));
        func.add_task(dma(a, b));
        func.add_task(dma(b, c));

        let live = LiveRangeTracker::build(&func);
        assert_eq!(live.range(a), Some(&LiveRange { first: 0, last: 0, ref_count: 1 }));
        assert_eq!(live.range(b), Some(&LiveRange { first: 0, last: 1, ref_count: 2 }));
        assert_eq!(live.range(c).unwrap().first, 1);
    }

    #[test]
    fn view_use_extends_root_range() {
        let mut func = Function::new("main");
        let base =
            func.add_buffer(BufferDesc::new("base", MemoryKind::CmxNn, ElemType::U8, vec![32]));
        let view = func.add_buffer(BufferDesc::view_of(
            "view",
            base,
            &func.buffers[base.index()].clone(),
            vec![32],
        ));
        let out = func.add_buffer(BufferDesc::new("out", MemoryKind::Ddr, ElemType::U8, vec![32]));
        func.add_task(dma(out, base));
        func.add_task(dma(out, out));
        func.add_task(dma(view, out));

        let live = LiveRangeTracker::build(&func);
        assert_eq!(live.range(base).unwrap().last, 2);
        assert!(live.range(view).is_none());
    }

    #[test]
    fn spans_uses_boundary_semantics() {
        let range = LiveRange { first: 1, last: 3, ref_count: 2 };
        assert!(!range.spans(0));
        assert!(!range.spans(1));
        assert!(range.spans(2));
        assert!(range.spans(3));
        assert!(!range.spans(4));
    }
}
