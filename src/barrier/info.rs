// This module implements the BarrierInfo graph: the task/barrier dependency tables the
// legalization pass rewrites. Tasks and barriers are rows in index-based Vec tables;
// per-task wait/update lists and per-barrier producer/consumer lists are kept sorted so
// every traversal is deterministic. merge_barriers moves one barrier's edges into
// another and leaves the donor empty (dead); apply_to writes the rewritten assignment
// back to the function, dropping dead barriers and remapping ids in emission order.

//! Task/barrier dependency tables.

use crate::ir::{BarrierId, Function, TaskId, VirtualBarrier};

/// Index-based view of the wait/update edges of one function.
#[derive(Debug, Clone)]
pub struct BarrierInfo {
    /// Per task: barriers it waits on, sorted.
    wait: Vec<Vec<BarrierId>>,
    /// Per task: barriers it updates, sorted.
    update: Vec<Vec<BarrierId>>,
    /// Per barrier: tasks updating it, sorted.
    producers: Vec<Vec<TaskId>>,
    /// Per barrier: tasks waiting on it, sorted.
    consumers: Vec<Vec<TaskId>>,
}

impl BarrierInfo {
    /// Build the tables from the function's current barrier assignment.
    pub fn build(func: &Function) -> Self {
        let mut info = Self {
            wait: vec![Vec::new(); func.tasks.len()],
            update: vec![Vec::new(); func.tasks.len()],
            producers: vec![Vec::new(); func.barriers.len()],
            consumers: vec![Vec::new(); func.barriers.len()],
        };
        for (idx, task) in func.tasks.iter().enumerate() {
            let tid = TaskId(idx as u32);
            for &b in &task.wait_barriers {
                insert_sorted(&mut info.wait[idx], b);
                insert_sorted(&mut info.consumers[b.index()], tid);
            }
            for &b in &task.update_barriers {
                insert_sorted(&mut info.update[idx], b);
                insert_sorted(&mut info.producers[b.index()], tid);
            }
        }
        info
    }

    pub fn task_count(&self) -> usize {
        self.wait.len()
    }

    pub fn barrier_count(&self) -> usize {
        self.producers.len()
    }

    pub fn wait_barriers(&self, task: TaskId) -> &[BarrierId] {
        &self.wait[task.index()]
    }

    pub fn update_barriers(&self, task: TaskId) -> &[BarrierId] {
        &self.update[task.index()]
    }

    pub fn producers(&self, barrier: BarrierId) -> &[TaskId] {
        &self.producers[barrier.index()]
    }

    pub fn consumers(&self, barrier: BarrierId) -> &[TaskId] {
        &self.consumers[barrier.index()]
    }

    /// Producer + consumer slots one barrier occupies.
    pub fn slot_count(&self, barrier: BarrierId) -> u32 {
        (self.producers[barrier.index()].len() + self.consumers[barrier.index()].len()) as u32
    }

    /// A barrier with no remaining edges.
    pub fn is_dead(&self, barrier: BarrierId) -> bool {
        self.producers[barrier.index()].is_empty() && self.consumers[barrier.index()].is_empty()
    }

    /// Slot usage `into` would have after absorbing `from`.
    pub fn merged_slot_count(&self, into: BarrierId, from: BarrierId) -> u32 {
        let prod = union_len(&self.producers[into.index()], &self.producers[from.index()]);
        let cons = union_len(&self.consumers[into.index()], &self.consumers[from.index()]);
        (prod + cons) as u32
    }

    /// Move all edges of `from` into `into`; `from` becomes dead.
    pub fn merge_barriers(&mut self, into: BarrierId, from: BarrierId) {
        debug_assert_ne!(into, from);
        let from_producers = std::mem::take(&mut self.producers[from.index()]);
        for task in from_producers {
            remove_sorted(&mut self.update[task.index()], from);
            if insert_sorted(&mut self.update[task.index()], into) {
                insert_sorted(&mut self.producers[into.index()], task);
            }
        }
        let from_consumers = std::mem::take(&mut self.consumers[from.index()]);
        for task in from_consumers {
            remove_sorted(&mut self.wait[task.index()], from);
            if insert_sorted(&mut self.wait[task.index()], into) {
                insert_sorted(&mut self.consumers[into.index()], task);
            }
        }
    }

    /// All ordering edges `(producer, consumer)` the current assignment
    /// enforces, deduplicated and sorted.
    pub fn dependency_edges(&self) -> Vec<(TaskId, TaskId)> {
        let mut edges = Vec::new();
        for b in 0..self.barrier_count() {
            for &p in &self.producers[b] {
                for &c in &self.consumers[b] {
                    edges.push((p, c));
                }
            }
        }
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    /// Emission order of the surviving barriers: first producer position,
    /// then first consumer position, then original id.
    pub fn barrier_order(&self) -> Vec<BarrierId> {
        let mut order: Vec<BarrierId> = (0..self.barrier_count() as u32)
            .map(BarrierId)
            .filter(|b| !self.is_dead(*b))
            .collect();
        order.sort_by_key(|b| {
            (
                self.producers[b.index()].first().copied(),
                self.consumers[b.index()].first().copied(),
                *b,
            )
        });
        order
    }

    /// Write the rewritten assignment back to the function in the given
    /// barrier order. Dead barriers are dropped and ids remapped; the
    /// tasks keep their program order.
    pub fn apply_to(&self, func: &mut Function, order: &[BarrierId]) {
        let mut remap = vec![None; self.barrier_count()];
        for (new_idx, &old) in order.iter().enumerate() {
            remap[old.index()] = Some(BarrierId(new_idx as u32));
        }
        func.barriers = vec![VirtualBarrier::default(); order.len()];
        for (idx, task) in func.tasks.iter_mut().enumerate() {
            task.wait_barriers = self.wait[idx]
                .iter()
                .filter_map(|b| remap[b.index()])
                .collect();
            task.update_barriers = self.update[idx]
                .iter()
                .filter_map(|b| remap[b.index()])
                .collect();
        }
    }
}

fn insert_sorted<T: Ord + Copy>(vec: &mut Vec<T>, item: T) -> bool {
    match vec.binary_search(&item) {
        Ok(_) => false,
        Err(pos) => {
            vec.insert(pos, item);
            true
        }
    }
}

fn remove_sorted<T: Ord>(vec: &mut Vec<T>, item: T) {
    if let Ok(pos) = vec.binary_search(&item) {
        vec.remove(pos);
    }
}

fn union_len<T: Ord>(a: &[T], b: &[T]) -> usize {
    let mut i = 0;
    let mut j = 0;
    let mut len = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
        len += 1;
    }
    len + (a.len() - i) + (b.len() - j)
}
