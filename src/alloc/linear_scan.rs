// This module implements the free-list core of the linear-scan allocator: a sorted
// list of free (address, size) ranges over one memory pool. Allocation is best-fit
// under an alignment constraint — among the free ranges that can hold the aligned
// request, the one wasting the fewest bytes wins, and the remainder (head gap from
// alignment plus tail) is returned to the list. Deallocation reinserts the range and
// merges adjacent neighbors. Fixed-address buffers and reserved ranges are carved out
// of the list up front with reserve(). The high-water mark tracks the largest end
// address ever handed out, which sizes the physical pool.

//! Best-fit free-list allocation over one memory pool.

use log::trace;

/// A free `[address, address + size)` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRange {
    address: u64,
    size: u64,
}

impl FreeRange {
    fn end(&self) -> u64 {
        self.address + self.size
    }
}

/// Free-list allocator for one memory kind.
#[derive(Debug)]
pub struct LinearScan {
    /// Free ranges sorted by address, non-overlapping, non-adjacent.
    free: Vec<FreeRange>,
    capacity: u64,
    max_allocated: u64,
}

impl LinearScan {
    pub fn new(capacity: u64) -> Self {
        Self {
            free: vec![FreeRange {
                address: 0,
                size: capacity,
            }],
            capacity,
            max_allocated: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Largest end address ever allocated.
    pub fn max_allocated_size(&self) -> u64 {
        self.max_allocated
    }

    /// Allocate `size` bytes at a multiple of `alignment`; best fit.
    ///
    /// Returns `None` when no free range can hold the request; the caller
    /// turns that into a fatal out-of-memory error.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        debug_assert!(alignment.is_power_of_two() || alignment == 1);
        debug_assert!(size > 0);

        let mut best: Option<(usize, u64, u64)> = None;
        for (idx, range) in self.free.iter().enumerate() {
            let aligned = range.address.next_multiple_of(alignment);
            let head_gap = aligned - range.address;
            if head_gap + size > range.size {
                continue;
            }
            let waste = range.size - size;
            match best {
                Some((_, _, best_waste)) if best_waste <= waste => {}
                _ => best = Some((idx, aligned, waste)),
            }
        }

        let (idx, address, _) = best?;
        let range = self.free.remove(idx);
        let head_gap = address - range.address;
        let tail = range.size - head_gap - size;
        if head_gap > 0 {
            self.free.insert(
                idx,
                FreeRange {
                    address: range.address,
                    size: head_gap,
                },
            );
        }
        if tail > 0 {
            let pos = if head_gap > 0 { idx + 1 } else { idx };
            self.free.insert(
                pos,
                FreeRange {
                    address: address + size,
                    size: tail,
                },
            );
        }
        self.max_allocated = self.max_allocated.max(address + size);
        trace!("allocate {size}@{alignment} -> {address:#x}");
        Some(address)
    }

    /// Return `[address, address + size)` to the free list, merging with
    /// adjacent ranges.
    pub fn free(&mut self, address: u64, size: u64) {
        debug_assert!(size > 0);
        let pos = self
            .free
            .partition_point(|range| range.address < address);
        debug_assert!(
            pos == 0 || self.free[pos - 1].end() <= address,
            "double free or overlap below"
        );
        debug_assert!(
            pos == self.free.len() || address + size <= self.free[pos].address,
            "double free or overlap above"
        );

        let merges_prev = pos > 0 && self.free[pos - 1].end() == address;
        let merges_next = pos < self.free.len() && self.free[pos].address == address + size;
        match (merges_prev, merges_next) {
            (true, true) => {
                self.free[pos - 1].size += size + self.free[pos].size;
                self.free.remove(pos);
            }
            (true, false) => self.free[pos - 1].size += size,
            (false, true) => {
                self.free[pos].address = address;
                self.free[pos].size += size;
            }
            (false, false) => self.free.insert(pos, FreeRange { address, size }),
        }
        trace!("free {size} bytes at {address:#x}");
    }

    /// Carve `[address, address + size)` out of the free list (fixed
    /// allocations, caller-reserved ranges). Fails when any part of the
    /// range is already taken.
    pub fn reserve(&mut self, address: u64, size: u64) -> bool {
        if size == 0 {
            return true;
        }
        let Some(idx) = self
            .free
            .iter()
            .position(|r| r.address <= address && address + size <= r.end())
        else {
            return false;
        };
        let range = self.free.remove(idx);
        let head = address - range.address;
        let tail = range.end() - (address + size);
        if head > 0 {
            self.free.insert(
                idx,
                FreeRange {
                    address: range.address,
                    size: head,
                },
            );
        }
        if tail > 0 {
            let pos = if head > 0 { idx + 1 } else { idx };
            self.free.insert(
                pos,
                FreeRange {
                    address: address + size,
                    size: tail,
                },
            );
        }
        self.max_allocated = self.max_allocated.max(address + size);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_aligned_addresses() {
        let mut scan = LinearScan::new(512);
        let a = scan.allocate(100, 64).unwrap();
        let b = scan.allocate(200, 64).unwrap();
        let c = scan.allocate(50, 64).unwrap();
        for addr in [a, b, c] {
            assert_eq!(addr % 64, 0);
        }
        assert!(scan.max_allocated_size() <= 512);
    }

    #[test]
    fn fails_when_pool_exhausted() {
        let mut scan = LinearScan::new(300);
        assert!(scan.allocate(100, 64).is_some());
        assert!(scan.allocate(200, 64).is_some());
        assert!(scan.allocate(50, 64).is_none());
    }

    #[test]
    fn freed_ranges_are_reused() {
        let mut scan = LinearScan::new(256);
        let a = scan.allocate(128, 1).unwrap();
        assert!(scan.allocate(128, 1).is_some());
        assert!(scan.allocate(1, 1).is_none());
        scan.free(a, 128);
        assert_eq!(scan.allocate(128, 1), Some(a));
    }

    #[test]
    fn adjacent_free_ranges_merge() {
        let mut scan = LinearScan::new(256);
        let a = scan.allocate(64, 1).unwrap();
        let b = scan.allocate(64, 1).unwrap();
        let c = scan.allocate(128, 1).unwrap();
        scan.free(a, 64);
        scan.free(c, 128);
        scan.free(b, 64);
        // The whole pool is one range again.
        assert_eq!(scan.allocate(256, 1), Some(0));
    }

    #[test]
    fn best_fit_prefers_tightest_range() {
        let mut scan = LinearScan::new(1024);
        let a = scan.allocate(100, 1).unwrap();
        let _hold = scan.allocate(10, 1).unwrap();
        let b = scan.allocate(30, 1).unwrap();
        let _hold2 = scan.allocate(10, 1).unwrap();
        scan.free(a, 100);
        scan.free(b, 30);
        // Two free holes: 100 bytes at `a`, 30 bytes at `b`. A 25-byte
        // request must land in the smaller one.
        let c = scan.allocate(25, 1).unwrap();
        assert_eq!(c, b);
    }

    #[test]
    fn reserve_carves_out_of_free_space() {
        let mut scan = LinearScan::new(512);
        assert!(scan.reserve(128, 64));
        assert!(!scan.reserve(100, 64));
        let a = scan.allocate(128, 1).unwrap();
        assert_ne!(a, 128);
    }
}
