// This module serializes DMA tasks into the generation's descriptor layout. The
// NPU37XX descriptor is the 80-byte 2D job format (source/destination, length,
// barrier masks, stride configuration); the NPU40XX descriptor is the 224-byte
// linked-list format that prepends a link pointer and widens the dimension
// configuration. Source and destination address fields are emitted as zero and
// covered by relocations against the owning memory pool's base symbol; the loader
// patches them with the kind matching the pool (absolute for DDR, low-21-bit window
// for CMX). Byte offsets of the address fields are fixed by the hardware layout and
// asserted in tests against the serialized image size.

//! DMA descriptor serialization.

use crate::alloc::FunctionAllocation;
use crate::core::{ArchKind, CompileResult, CompilerContext};
use crate::ir::{DmaTransfer, Function};

use super::reloc::{kind_for_memory, Relocation, RelocSymbol};
use super::SerializedPayload;

/// NPU37XX 2D job descriptor size.
pub const DMA_DESCRIPTOR_SIZE_37XX: usize = 80;
/// NPU40XX linked descriptor size.
pub const DMA_DESCRIPTOR_SIZE_40XX: usize = 224;

/// Address field offsets within the descriptors.
const SRC_OFFSET_37XX: usize = 0x00;
const DST_OFFSET_37XX: usize = 0x08;
const SRC_OFFSET_40XX: usize = 0x10;
const DST_OFFSET_40XX: usize = 0x18;

/// Serialize one DMA transfer for the selected generation.
pub fn serialize_dma(
    func: &Function,
    addresses: &FunctionAllocation,
    dma: &DmaTransfer,
    wait_mask: u64,
    post_mask: u64,
    ctx: &CompilerContext,
) -> CompileResult<SerializedPayload> {
    let src_root = func.root_of(dma.src);
    let dst_root = func.root_of(dma.dst);
    let src = func.buffer(src_root);
    let dst = func.buffer(dst_root);
    let src_addr = addresses.get(&src_root).copied().unwrap_or(0);
    let dst_addr = addresses.get(&dst_root).copied().unwrap_or(0);
    let length = if dma.length != 0 {
        dma.length
    } else {
        func.buffer(dma.src).size
    };

    let (bytes, src_offset, dst_offset) = match ctx.arch_kind() {
        ArchKind::Npu37xx => {
            let mut image = Vec::with_capacity(DMA_DESCRIPTOR_SIZE_37XX);
            image.extend_from_slice(&0u64.to_le_bytes()); // src, relocated
            image.extend_from_slice(&0u64.to_le_bytes()); // dst, relocated
            image.extend_from_slice(&(length as u32).to_le_bytes());
            image.extend_from_slice(&0u32.to_le_bytes()); // num_planes
            image.extend_from_slice(&wait_mask.to_le_bytes());
            image.extend_from_slice(&post_mask.to_le_bytes());
            image.extend_from_slice(&1u32.to_le_bytes()); // config: 1D copy
            image.extend_from_slice(&255u32.to_le_bytes()); // burst length
            // src/dst width, stride and plane stride pairs.
            for _ in 0..8 {
                image.extend_from_slice(&0u32.to_le_bytes());
            }
            debug_assert_eq!(image.len(), DMA_DESCRIPTOR_SIZE_37XX);
            (image, SRC_OFFSET_37XX, DST_OFFSET_37XX)
        }
        ArchKind::Npu40xx => {
            let mut image = vec![0u8; DMA_DESCRIPTOR_SIZE_40XX];
            // link_address stays zero: descriptors are chained by the
            // runtime, not the compiler.
            image[0x08..0x0C].copy_from_slice(&(length as u32).to_le_bytes());
            image[0x0C..0x10].copy_from_slice(&2u32.to_le_bytes()); // type: linked
            image[0x20..0x28].copy_from_slice(&wait_mask.to_le_bytes());
            image[0x28..0x30].copy_from_slice(&post_mask.to_le_bytes());
            (image, SRC_OFFSET_40XX, DST_OFFSET_40XX)
        }
    };

    debug_assert_eq!(bytes.len(), ctx.arch().dma_descriptor_size);

    let relocations = vec![
        Relocation::new(
            RelocSymbol::MemoryBase(src.mem_kind),
            src_offset as u64,
            kind_for_memory(src.mem_kind),
            src_addr as i64,
        ),
        Relocation::new(
            RelocSymbol::MemoryBase(dst.mem_kind),
            dst_offset as u64,
            kind_for_memory(dst.mem_kind),
            dst_addr as i64,
        ),
    ];

    Ok(SerializedPayload { bytes, relocations })
}
