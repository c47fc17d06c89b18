//! Scheduled-IR data model.
//!
//! The back-end consumes a module where scheduling has already happened:
//! tasks are ordered, buffers carry concrete types and memory kinds, and
//! barrier edges encode the dependency graph. Everything is stored in flat
//! `Vec` tables addressed by integer handles.

pub mod buffer;
pub mod module;
pub mod task;

pub use buffer::{BufferDesc, BufferId, ElemType, MemoryKind, Quantization};
pub use module::{CallSite, FuncId, Function, KernelBlob, Module};
pub use task::{
    ActKernelInvocation, BarrierId, DmaTransfer, DpuInvariant, DpuVariant, ExecutorKind, KernelId,
    MpeMode, Task, TaskId, TaskKind, VirtualBarrier,
};
