// This module implements the BlobWriter: the single-pass, append-only serializer that
// turns a legalized, allocated function into the wire-format graph file. The writer
// owns the caches that enforce the at-most-once invariants: a tensor cache keyed by
// storage root (views resolve to their source's entry, so an alias's reference is
// identical to the original), a task guard that turns re-serialization into a fatal
// error, and the kernel-data cache keyed by kernel name so a kernel requested twice
// shares one embedded payload. Barrier references populate both the physical and the
// virtual id field with the virtual id; the runtime's parser expects this duplication
// and it must not be simplified away without confirming the parser changed. Kernel
// text/data sections demand 1 KB alignment, which the builder applies after the
// buffer is complete by moving bytes and re-resolving the recorded offset fields.

//! Wire-format blob serialization.

use std::collections::HashMap;
use std::collections::HashSet;

use log::{debug, trace};

use crate::alloc::{FunctionAllocation, ModuleAllocation};
use crate::core::{CompilationSession, CompileError, CompileResult, CompilerContext};
use crate::ir::{
    BarrierId, BufferId, ExecutorKind, FuncId, Function, Module, Task, TaskId, TaskKind,
};

use super::builder::{BlobBuilder, MarkId};
use super::dma::serialize_dma;
use super::dpu::serialize_dpu;
use super::kernel::serialize_act_kernel;
use super::tensor::emit_tensor_entry;
use super::SerializedPayload;

/// Blob magic bytes.
pub const BLOB_MAGIC: &[u8; 4] = b"NBLB";
/// Current wire-format version.
pub const BLOB_VERSION: u32 = 1;
/// Fixed header size.
pub const HEADER_SIZE: usize = 64;
/// Alignment of embedded kernel text/data sections.
pub const KERNEL_DATA_ALIGNMENT: usize = 1024;

/// Single-use serializer for one compiled function.
pub struct BlobWriter<'a, 'arena> {
    session: &'a CompilationSession<'arena>,
    ctx: &'a CompilerContext,
    /// Storage root -> tensor table index.
    tensors: HashMap<BufferId, u32>,
    /// Tasks already emitted; a second emission is a pipeline bug.
    tasks: HashSet<TaskId>,
    /// Kernel name -> (text mark, data mark) of the embedded payload.
    act_kernels_data: HashMap<&'arena str, (MarkId, MarkId)>,
}

impl<'a, 'arena> BlobWriter<'a, 'arena> {
    pub fn new(session: &'a CompilationSession<'arena>, ctx: &'a CompilerContext) -> Self {
        Self {
            session,
            ctx,
            tensors: HashMap::new(),
            tasks: HashSet::new(),
            act_kernels_data: HashMap::new(),
        }
    }

    /// Serialize the entry function into a finished blob.
    pub fn write(
        mut self,
        module: &Module,
        entry: FuncId,
        allocation: &ModuleAllocation,
    ) -> CompileResult<Vec<u8>> {
        let func = module.function(entry);
        let empty = FunctionAllocation::new();
        let addresses = allocation.function(entry).unwrap_or(&empty);

        let tensor_order = self.collect_tensor_order(func);
        let mut b = BlobBuilder::new();

        // Header.
        b.bytes(BLOB_MAGIC);
        b.u32(BLOB_VERSION);
        b.u32(self.ctx.arch_kind().code());
        let task_lists_mark = b.new_mark();
        let tensors_mark = b.new_mark();
        let barriers_mark = b.new_mark();
        let binary_mark = b.new_mark();
        let kernel_mark = b.new_mark();
        b.offset_field(task_lists_mark);
        b.offset_field(tensors_mark);
        b.offset_field(barriers_mark);
        b.offset_field(binary_mark);
        b.offset_field(kernel_mark);
        b.u32(func.inputs.len() as u32);
        b.u32(func.outputs.len() as u32);
        let io_mark = b.new_mark();
        b.offset_field(io_mark);
        b.u32(func.tasks.len() as u32);
        let name_mark = b.new_mark();
        b.offset_field(name_mark);
        while b.pos() < HEADER_SIZE {
            b.u8(0);
        }

        b.place_mark(name_mark);
        b.str_field(&func.name);

        b.place_mark(io_mark);
        for &io in func.inputs.iter().chain(func.outputs.iter()) {
            b.u32(self.tensor_index(func, io)?);
        }

        self.write_tensor_table(&mut b, func, addresses, &tensor_order, tensors_mark)?;
        self.write_barrier_table(&mut b, func, barriers_mark);
        self.write_task_lists(&mut b, module, func, addresses, task_lists_mark)?;
        self.write_binary_data(&mut b, func, binary_mark)?;
        self.write_kernel_data(&mut b, module, func, kernel_mark)?;

        let blob = b.finish();
        self.session.record_blob_size(blob.len());
        debug!(
            "serialized '{}': {} tasks, {} tensors, {} bytes",
            func.name,
            self.tasks.len(),
            self.tensors.len(),
            blob.len()
        );
        Ok(blob)
    }

    /// Storage roots in first-reference order: network I/O, then task
    /// operands in program order.
    fn collect_tensor_order(&mut self, func: &Function) -> Vec<BufferId> {
        let mut order = Vec::new();
        let mut record = |id: BufferId, tensors: &mut HashMap<BufferId, u32>| {
            if !tensors.contains_key(&id) {
                tensors.insert(id, order.len() as u32);
                order.push(id);
            }
        };
        for &io in func.inputs.iter().chain(func.outputs.iter()) {
            record(func.root_of(io), &mut self.tensors);
        }
        for task in &func.tasks {
            for buf in task.used_buffers() {
                record(func.root_of(buf), &mut self.tensors);
            }
        }
        order
    }

    /// Tensor reference of a buffer: its storage root's table index.
    ///
    /// A view resolves to the exact entry of its source; this is the
    /// aliasing-propagation invariant.
    fn tensor_index(&self, func: &Function, id: BufferId) -> CompileResult<u32> {
        let root = func.root_of(id);
        self.tensors
            .get(&root)
            .copied()
            .ok_or_else(|| CompileError::Serialization {
                reason: format!("no tensor reference for buffer '{}'", func.buffer(root).name),
            })
    }

    fn write_tensor_table(
        &mut self,
        b: &mut BlobBuilder,
        func: &Function,
        addresses: &FunctionAllocation,
        order: &[BufferId],
        mark: MarkId,
    ) -> CompileResult<()> {
        b.place_mark(mark);
        b.u32(order.len() as u32);
        let mut written: HashSet<BufferId> = HashSet::new();
        for &id in order {
            if !written.insert(id) {
                return Err(CompileError::AlreadySerialized {
                    entity: "tensor",
                    index: id.0,
                });
            }
            emit_tensor_entry(b, func, addresses, id);
            self.session.record_tensor_serialized();
        }
        Ok(())
    }

    fn write_barrier_table(&self, b: &mut BlobBuilder, func: &Function, mark: MarkId) {
        b.place_mark(mark);
        b.u32(func.barriers.len() as u32);
        for (idx, barrier) in func.barriers.iter().enumerate() {
            let id = BarrierId(idx as u32);
            let producers = func
                .tasks
                .iter()
                .filter(|t| t.update_barriers.contains(&id))
                .count();
            let consumers = func
                .tasks
                .iter()
                .filter(|t| t.wait_barriers.contains(&id))
                .count();
            b.u16(barrier.physical_id.unwrap_or(idx as u16));
            b.u16(producers as u16);
            b.u16(consumers as u16);
            b.u16(0);
        }
    }

    /// Wait/update barrier references of one task.
    ///
    /// Both fields of each pair carry the virtual id. The physical slot is
    /// populated with the virtual id as well: one runtime generation
    /// parses the pair that way, and the duplication is part of the wire
    /// contract.
    fn write_barrier_refs(&self, b: &mut BlobBuilder, barriers: &[BarrierId]) {
        b.u32(barriers.len() as u32);
        for barrier in barriers {
            b.u32(barrier.0); // "physical" field, virtual id by contract
            b.u32(barrier.0); // virtual field
        }
    }

    /// Bitmask over the physical ids of the given barriers.
    fn barrier_mask(&self, func: &Function, barriers: &[BarrierId]) -> u64 {
        let mut mask = 0u64;
        for barrier in barriers {
            let phys = func.barriers[barrier.index()]
                .physical_id
                .unwrap_or(barrier.0 as u16);
            mask |= 1u64 << (phys % 64);
        }
        mask
    }

    fn serialize_payload(
        &self,
        module: &Module,
        func: &Function,
        addresses: &FunctionAllocation,
        id: TaskId,
        task: &Task,
    ) -> CompileResult<SerializedPayload> {
        let wait_mask = self.barrier_mask(func, &task.wait_barriers);
        let post_mask = self.barrier_mask(func, &task.update_barriers);
        match &task.kind {
            TaskKind::Dma(dma) => {
                serialize_dma(func, addresses, dma, wait_mask, post_mask, self.ctx)
            }
            TaskKind::Dpu(dpu) => serialize_dpu(func, addresses, id, dpu, wait_mask, post_mask),
            TaskKind::ActKernel(act) => {
                serialize_act_kernel(module, func, addresses, id, act, wait_mask, post_mask)
            }
        }
    }

    fn write_task_lists(
        &mut self,
        b: &mut BlobBuilder,
        module: &Module,
        func: &Function,
        addresses: &FunctionAllocation,
        mark: MarkId,
    ) -> CompileResult<()> {
        b.place_mark(mark);
        b.u32(ExecutorKind::ALL.len() as u32);
        let mut list_marks = Vec::new();
        for executor in ExecutorKind::ALL {
            let count = func
                .tasks
                .iter()
                .filter(|t| t.executor() == executor)
                .count();
            b.u32(executor.code() as u32);
            b.u32(count as u32);
            let list_mark = b.new_mark();
            b.offset_field(list_mark);
            list_marks.push((executor, list_mark));
        }

        for (executor, list_mark) in list_marks {
            b.place_mark(list_mark);
            for (idx, task) in func.tasks.iter().enumerate() {
                if task.executor() != executor {
                    continue;
                }
                let id = TaskId(idx as u32);
                if !self.tasks.insert(id) {
                    return Err(CompileError::AlreadySerialized {
                        entity: "task",
                        index: id.0,
                    });
                }
                let payload = self.serialize_payload(module, func, addresses, id, task)?;
                trace!(
                    "task {} ({}): {} payload bytes, {} relocations",
                    id.0,
                    executor.name(),
                    payload.bytes.len(),
                    payload.relocations.len()
                );

                b.u32(id.0);
                self.write_barrier_refs(b, &task.wait_barriers);
                self.write_barrier_refs(b, &task.update_barriers);
                let inputs = task.input_buffers();
                let outputs = task.output_buffers();
                b.u32(inputs.len() as u32);
                for buf in inputs {
                    let index = self.tensor_index(func, buf)?;
                    b.u32(index);
                }
                b.u32(outputs.len() as u32);
                for buf in outputs {
                    let index = self.tensor_index(func, buf)?;
                    b.u32(index);
                }
                b.u32(payload.bytes.len() as u32);
                b.bytes(&payload.bytes);
                b.u32(payload.relocations.len() as u32);
                for reloc in &payload.relocations {
                    b.u32(reloc.symbol.code());
                    b.u64(reloc.offset);
                    b.u32(reloc.kind.code());
                    b.i64(reloc.addend);
                }
                self.session.record_task_serialized();
            }
        }
        Ok(())
    }

    /// Constants section. Entries are sized up front so each payload is an
    /// independent, disjoint slot copy.
    fn write_binary_data(
        &self,
        b: &mut BlobBuilder,
        func: &Function,
        mark: MarkId,
    ) -> CompileResult<()> {
        let constants: Vec<(BufferId, &Vec<u8>)> = func
            .buffers
            .iter()
            .enumerate()
            .filter_map(|(idx, desc)| {
                desc.content.as_ref().map(|c| (BufferId(idx as u32), c))
            })
            // A constant nothing references has no tensor entry and no
            // reachable use; it is not emitted.
            .filter(|(id, _)| self.tensors.contains_key(id))
            .collect();
        if constants.is_empty() {
            return Ok(());
        }
        b.place_mark(mark);
        b.u32(constants.len() as u32);
        let mut payload_marks = Vec::new();
        for (id, content) in &constants {
            b.u32(self.tensor_index(func, *id)?);
            b.u32(content.len() as u32);
            let payload_mark = b.new_mark();
            b.offset_field(payload_mark);
            payload_marks.push(payload_mark);
        }

        // Pre-size the region and fill disjoint slots; each copy is
        // independent of the others.
        let total: usize = constants.iter().map(|(_, c)| c.len()).sum();
        let mut region = vec![0u8; total];
        let mut offset = 0usize;
        let mut slots = Vec::with_capacity(constants.len());
        for (_, content) in &constants {
            slots.push(offset);
            offset += content.len();
        }
        for ((_, content), &slot) in constants.iter().zip(&slots) {
            region[slot..slot + content.len()].copy_from_slice(content);
        }

        // Append the region slot by slot, pinning each entry's mark.
        let mut cursor = 0usize;
        for ((_, content), payload_mark) in constants.iter().zip(payload_marks) {
            b.place_mark(payload_mark);
            b.bytes(&region[cursor..cursor + content.len()]);
            cursor += content.len();
        }
        Ok(())
    }

    /// Kernel code/data section with by-name deduplication and 1 KB
    /// alignment of every embedded payload.
    fn write_kernel_data(
        &mut self,
        b: &mut BlobBuilder,
        module: &Module,
        func: &Function,
        mark: MarkId,
    ) -> CompileResult<()> {
        let used: Vec<u32> = {
            let mut seen = HashSet::new();
            func.tasks
                .iter()
                .filter_map(|t| match &t.kind {
                    TaskKind::ActKernel(act) => Some(act.kernel.0),
                    _ => None,
                })
                .filter(|k| seen.insert(*k))
                .collect()
        };
        if used.is_empty() {
            return Ok(());
        }
        b.place_mark(mark);
        b.u32(used.len() as u32);

        let mut pending: Vec<(u32, Option<(MarkId, MarkId)>)> = Vec::new();
        for kernel_idx in used {
            let blob = &module.kernels[kernel_idx as usize];
            let name = self.session.intern_str(&blob.name);
            b.str_field(name);
            b.u32(blob.text.len() as u32);
            b.u32(blob.data.len() as u32);
            match self.act_kernels_data.get(name) {
                Some(&(text_mark, data_mark)) => {
                    // Same kernel requested again: reference the payload
                    // already embedded.
                    b.offset_field(text_mark);
                    b.offset_field(data_mark);
                    self.session.record_kernel_dedup();
                    pending.push((kernel_idx, None));
                }
                None => {
                    let text_mark = b.new_mark();
                    let data_mark = b.new_mark();
                    b.offset_field(text_mark);
                    b.offset_field(data_mark);
                    self.act_kernels_data.insert(name, (text_mark, data_mark));
                    pending.push((kernel_idx, Some((text_mark, data_mark))));
                }
            }
        }

        for (kernel_idx, marks) in pending {
            let Some((text_mark, data_mark)) = marks else {
                continue;
            };
            let blob = &module.kernels[kernel_idx as usize];
            b.place_mark(text_mark);
            b.align_mark(text_mark, KERNEL_DATA_ALIGNMENT);
            b.bytes(&blob.text);
            b.place_mark(data_mark);
            b.align_mark(data_mark, KERNEL_DATA_ALIGNMENT);
            b.bytes(&blob.data);
        }
        Ok(())
    }
}
