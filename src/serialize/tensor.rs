// This module emits tensor-reference table entries: the wire-format record that
// describes one storage-owning buffer to the runtime (name, dtype, memory location,
// assigned address, dims, bit strides, per-channel quantization, swizzling key).
// View buffers never get an entry of their own; the blob writer resolves them to
// their storage root so a view's reference is byte-identical to its source's.

//! Tensor reference emission.

use crate::alloc::FunctionAllocation;
use crate::ir::{BufferDesc, BufferId, Function};

use super::builder::BlobBuilder;

/// Write one tensor table entry for a storage root.
pub fn emit_tensor_entry(
    b: &mut BlobBuilder,
    func: &Function,
    addresses: &FunctionAllocation,
    id: BufferId,
) {
    let desc: &BufferDesc = func.buffer(id);
    debug_assert!(desc.alias_of.is_none(), "views are never serialized");

    b.str_field(&desc.name);
    b.u8(desc.elem_type.dtype_code());
    b.u8(desc.mem_kind.location_code());
    b.u8(desc.swizzling_key.unwrap_or(0));
    b.u8(0);
    b.u64(addresses.get(&id).copied().unwrap_or(0));

    b.u32(desc.shape.len() as u32);
    for &dim in &desc.shape {
        b.i64(dim);
    }
    let strides = desc
        .strides_bits
        .clone()
        .unwrap_or_else(|| desc.dense_strides_bits());
    b.u32(strides.len() as u32);
    for stride in strides {
        b.u64(stride);
    }

    match &desc.quant {
        Some(quant) => {
            b.u32(quant.zero_points.len() as u32);
            for &zp in &quant.zero_points {
                b.i64(zp);
            }
            b.u32(quant.mults.len() as u32);
            for &mult in &quant.mults {
                b.u32(mult);
            }
            b.u32(quant.shifts.len() as u32);
            for &shift in &quant.shifts {
                b.u8(shift);
            }
        }
        None => {
            b.u32(0);
            b.u32(0);
            b.u32(0);
        }
    }
}
