// This module groups the serialization layer: the two-phase blob builder, the tensor
// reference emitter, the per-task hardware serializers (DMA descriptors, DPU register
// images, ActShave invocations), the relocation model shared with the ELF path, the
// BlobWriter that assembles the wire-format graph file, and the reader that parses it
// back for round-trip checks. Serialization is strictly single-pass and append-only;
// the only after-the-fact mutation is the builder's alignment fixup.

//! Blob and per-task binary serialization.

pub mod blob;
pub mod builder;
pub mod dma;
pub mod dpu;
pub mod kernel;
pub mod reader;
pub mod reloc;
pub mod tensor;

pub use blob::{BlobWriter, BLOB_MAGIC, BLOB_VERSION, KERNEL_DATA_ALIGNMENT};
pub use builder::{BlobBuilder, MarkId, RESERVED_OFFSET};
pub use dma::{serialize_dma, DMA_DESCRIPTOR_SIZE_37XX, DMA_DESCRIPTOR_SIZE_40XX};
pub use dpu::{
    serialize_dpu, DpuInvariantRegisters, DpuVariantRegisters, DPU_INVARIANT_SIZE,
    DPU_VARIANT_SIZE,
};
pub use kernel::{serialize_act_kernel, ACT_INVOCATION_HEADER_SIZE};
pub use reader::{parse_blob, BarrierSummary, BlobSummary, KernelSummary, TaskSummary};
pub use reloc::{kind_for_memory, RelocKind, RelocSymbol, Relocation};

/// A serialized task: the fixed register image plus the address patches
/// the loader must apply to it.
#[derive(Debug, Clone)]
pub struct SerializedPayload {
    pub bytes: Vec<u8>,
    pub relocations: Vec<Relocation>,
}
