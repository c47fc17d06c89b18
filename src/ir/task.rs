// This module defines the scheduled task model: the unit of work the serializer
// turns into one hardware descriptor. A Task carries its executor kind, wait/update
// barrier sets and a payload; payloads are a closed sum type (DMA transfer, DPU
// invariant with its variants, ActShave kernel invocation) dispatched by match, not
// by trait objects. Tasks reference buffers and barriers through index handles only.

//! Scheduled tasks and their payloads.

use super::buffer::BufferId;

/// Handle of a task within its function's task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl TaskId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a virtual barrier within its function's barrier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarrierId(pub u32);

impl BarrierId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a kernel blob within the module's kernel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(pub u32);

impl KernelId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Execution engines of the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorKind {
    DmaNn,
    Dpu,
    ActShave,
    M2i,
}

impl ExecutorKind {
    /// All executors, in task-list emission order.
    pub const ALL: [ExecutorKind; 4] = [
        ExecutorKind::DmaNn,
        ExecutorKind::Dpu,
        ExecutorKind::ActShave,
        ExecutorKind::M2i,
    ];

    pub fn code(self) -> u8 {
        match self {
            ExecutorKind::DmaNn => 0,
            ExecutorKind::Dpu => 1,
            ExecutorKind::ActShave => 2,
            ExecutorKind::M2i => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ExecutorKind::DmaNn),
            1 => Some(ExecutorKind::Dpu),
            2 => Some(ExecutorKind::ActShave),
            3 => Some(ExecutorKind::M2i),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExecutorKind::DmaNn => "DMA_NN",
            ExecutorKind::Dpu => "DPU",
            ExecutorKind::ActShave => "ACT_SHAVE",
            ExecutorKind::M2i => "M2I",
        }
    }
}

/// One DMA copy between two buffers.
#[derive(Debug, Clone)]
pub struct DmaTransfer {
    pub src: BufferId,
    pub dst: BufferId,
    /// Copy length; defaults to the source size when zero.
    pub length: u64,
}

/// MPE grid modes of the DPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpeMode {
    Matrix4x4,
    Vector16x1,
    Cuboid16x16,
}

impl MpeMode {
    pub fn code(self) -> u8 {
        match self {
            MpeMode::Matrix4x4 => 0,
            MpeMode::Vector16x1 => 1,
            MpeMode::Cuboid16x16 => 2,
        }
    }
}

/// One DPU variant: a rectangular slice of the invariant's output space.
#[derive(Debug, Clone)]
pub struct DpuVariant {
    pub start: [u32; 3],
    pub end: [u32; 3],
    pub mpe_mode: MpeMode,
    /// Padding applied on this slice: left, right, top, bottom.
    pub pad: [u8; 4],
}

/// A DPU invariant and its variants.
#[derive(Debug, Clone)]
pub struct DpuInvariant {
    pub input: BufferId,
    pub weights: Option<BufferId>,
    /// Required for convolution-style operations.
    pub weight_table: Option<BufferId>,
    pub output: BufferId,
    pub kernel_size: [u8; 2],
    pub kernel_strides: [u8; 2],
    pub needs_weight_table: bool,
    pub variants: Vec<DpuVariant>,
}

/// One ActShave software-kernel invocation.
#[derive(Debug, Clone)]
pub struct ActKernelInvocation {
    pub kernel: KernelId,
    pub inputs: Vec<BufferId>,
    pub outputs: Vec<BufferId>,
}

/// Task payloads; one serializer per arm.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Dma(DmaTransfer),
    Dpu(DpuInvariant),
    ActKernel(ActKernelInvocation),
}

impl TaskKind {
    pub fn executor(&self) -> ExecutorKind {
        match self {
            TaskKind::Dma(_) => ExecutorKind::DmaNn,
            TaskKind::Dpu(_) => ExecutorKind::Dpu,
            TaskKind::ActKernel(_) => ExecutorKind::ActShave,
        }
    }
}

/// A scheduled unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    pub wait_barriers: Vec<BarrierId>,
    pub update_barriers: Vec<BarrierId>,
    pub kind: TaskKind,
}

impl Task {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            wait_barriers: Vec::new(),
            update_barriers: Vec::new(),
            kind,
        }
    }

    pub fn waits_on(mut self, barriers: &[BarrierId]) -> Self {
        self.wait_barriers.extend_from_slice(barriers);
        self
    }

    pub fn updates(mut self, barriers: &[BarrierId]) -> Self {
        self.update_barriers.extend_from_slice(barriers);
        self
    }

    pub fn executor(&self) -> ExecutorKind {
        self.kind.executor()
    }

    /// Buffers this task reads.
    pub fn input_buffers(&self) -> Vec<BufferId> {
        match &self.kind {
            TaskKind::Dma(dma) => vec![dma.src],
            TaskKind::Dpu(dpu) => {
                let mut bufs = vec![dpu.input];
                bufs.extend(dpu.weights);
                bufs.extend(dpu.weight_table);
                bufs
            }
            TaskKind::ActKernel(act) => act.inputs.clone(),
        }
    }

    /// Buffers this task writes.
    pub fn output_buffers(&self) -> Vec<BufferId> {
        match &self.kind {
            TaskKind::Dma(dma) => vec![dma.dst],
            TaskKind::Dpu(dpu) => vec![dpu.output],
            TaskKind::ActKernel(act) => act.outputs.clone(),
        }
    }

    /// All buffers the task touches, inputs first.
    pub fn used_buffers(&self) -> Vec<BufferId> {
        let mut bufs = self.input_buffers();
        bufs.extend(self.output_buffers());
        bufs
    }
}

/// A virtual barrier. The physical ID is assigned by barrier legalization
/// post-processing; the producer/consumer sets are derived from task edges.
#[derive(Debug, Clone, Default)]
pub struct VirtualBarrier {
    pub physical_id: Option<u16>,
}
