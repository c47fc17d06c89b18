// This module describes the supported accelerator generations and their hardware
// limits. ArchKind selects a generation (NPU37XX or NPU40XX); ArchDesc carries the
// numbers the allocator, barrier legalizer and serializers consume: per-kind memory
// pool capacities, the physical barrier count, the per-barrier slot budget, and the
// swizzling alignment table. The swizzling table maps the small integer key (1..=5)
// to a power-of-two byte alignment, starting at 1 KB and doubled on NPU40XX.

//! Architecture selection and hardware description.

use crate::ir::MemoryKind;

/// Supported accelerator generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchKind {
    Npu37xx,
    Npu40xx,
}

impl ArchKind {
    /// Parse an architecture name as given on the CLI.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "npu37xx" | "37xx" => Some(Self::Npu37xx),
            "npu40xx" | "40xx" => Some(Self::Npu40xx),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Npu37xx => "NPU37XX",
            Self::Npu40xx => "NPU40XX",
        }
    }

    /// Wire-format device code.
    pub fn code(&self) -> u32 {
        match self {
            Self::Npu37xx => 0,
            Self::Npu40xx => 1,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Npu37xx),
            1 => Some(Self::Npu40xx),
            _ => None,
        }
    }
}

/// Hardware limits for one generation.
///
/// The allocator reads the pool capacities, the barrier legalizer reads the
/// slot budget, and the per-task serializers read the descriptor sizes.
#[derive(Debug, Clone)]
pub struct ArchDesc {
    pub kind: ArchKind,
    /// Bytes of NN scratchpad per tile.
    pub cmx_nn_size: u64,
    /// Bytes of legacy UPA scratchpad (zero where the generation has none).
    pub cmx_upa_size: u64,
    /// Bytes of DDR addressable by the device.
    pub ddr_size: u64,
    /// Number of physical barriers the runtime can configure.
    pub num_physical_barriers: u16,
    /// Upper bound on producer+consumer slots of one barrier.
    pub max_slots_sum: u32,
    /// Upper bound on task variants a single barrier may track.
    pub max_variant_count: u32,
    /// Base swizzling alignment for key 1; each key doubles it.
    pub swizzling_base_alignment: u64,
    /// Byte size of one DMA descriptor.
    pub dma_descriptor_size: usize,
}

impl ArchDesc {
    pub fn new(kind: ArchKind) -> Self {
        match kind {
            ArchKind::Npu37xx => Self {
                kind,
                cmx_nn_size: 2 * 1024 * 1024,
                cmx_upa_size: 0,
                ddr_size: 4 * 1024 * 1024 * 1024,
                num_physical_barriers: 64,
                max_slots_sum: 64,
                max_variant_count: 64,
                swizzling_base_alignment: 1024,
                dma_descriptor_size: crate::serialize::DMA_DESCRIPTOR_SIZE_37XX,
            },
            ArchKind::Npu40xx => Self {
                kind,
                cmx_nn_size: 2 * 1024 * 1024,
                cmx_upa_size: 0,
                ddr_size: 8 * 1024 * 1024 * 1024,
                num_physical_barriers: 32,
                max_slots_sum: 128,
                max_variant_count: 128,
                swizzling_base_alignment: 2048,
                dma_descriptor_size: crate::serialize::DMA_DESCRIPTOR_SIZE_40XX,
            },
        }
    }

    /// Effective per-barrier slot budget used by legalization.
    pub fn max_available_slots(&self) -> u32 {
        self.max_slots_sum.min(self.max_variant_count)
    }

    /// Capacity of a memory pool, or `None` for kinds that are not
    /// allocator-managed pools (registers, accumulators).
    pub fn capacity(&self, kind: MemoryKind) -> Option<u64> {
        match kind {
            MemoryKind::Ddr => Some(self.ddr_size),
            MemoryKind::CmxNn => Some(self.cmx_nn_size),
            MemoryKind::CmxUpa => Some(self.cmx_upa_size),
            MemoryKind::Csram => Some(self.ddr_size),
            MemoryKind::Register | MemoryKind::MacAccumulators => None,
        }
    }

    /// Address alignment required for a swizzled buffer.
    ///
    /// Keys outside 1..=5 are rejected by buffer verification before the
    /// allocator runs.
    pub fn swizzling_alignment(&self, key: u8) -> u64 {
        debug_assert!((1..=5).contains(&key));
        self.swizzling_base_alignment << (key - 1)
    }

    /// Size a swizzled buffer occupies: rounded up to the key's alignment.
    pub fn swizzled_size(&self, size: u64, key: u8) -> u64 {
        let align = self.swizzling_alignment(key);
        size.div_ceil(align) * align
    }
}
