// This module serializes DPU tasks into their register images: one invariant image
// followed by one image per variant. The structs mirror the hardware register file
// field for field and their sizes are pinned by compile-time assertions; the
// serializer writes fields in declaration order as little-endian words, so the byte
// image and the struct layout cannot drift apart without a test failing. Address
// fields (activation input, weights, weight table, ODU output base) are emitted as
// zero and covered by relocations; their byte offsets within the image are named
// constants next to the layout. A missing weight table on a task that requires one
// is a scheduling bug and fails serialization immediately.

//! DPU invariant/variant register serialization.

use crate::alloc::FunctionAllocation;
use crate::core::{CompileError, CompileResult};
use crate::ir::{BufferId, DpuInvariant, DpuVariant, Function, TaskId};

use super::reloc::{kind_for_memory, Relocation, RelocSymbol};
use super::SerializedPayload;

/// Invariant register file image size.
pub const DPU_INVARIANT_SIZE: usize = 128;
/// Variant register file image size.
pub const DPU_VARIANT_SIZE: usize = 64;

/// Relocated field offsets within the invariant image.
pub const INV_SE_SP_ADDR_OFFSET: usize = 0x18;
pub const INV_ACT_ADDR_OFFSET: usize = 0x20;
pub const INV_WEIGHT_START_OFFSET: usize = 0x3C;
pub const INV_ODU_BASE_OFFSET: usize = 0x68;

/// DPU invariant register file, one per invariant task.
///
/// Field order is the hardware layout; the serializer writes the fields
/// in declaration order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DpuInvariantRegisters {
    pub barriers_wait_mask: u64,
    pub barriers_post_mask: u64,
    pub barriers_sched: u64,
    /// Storage-element / weight-table pointer. Relocated.
    pub se_sp_addr: u32,
    pub sparsity_addr: u32,
    /// Activation input base. Relocated.
    pub act_addr: u32,
    pub act_size: u32,
    pub z_config: u32,
    pub kernel_pad_cfg: u32,
    pub kernel_strides: u32,
    pub weight_size: u32,
    pub weight_num: u32,
    /// Weights base. Relocated.
    pub weight_start: u32,
    pub tensor_size0: u32,
    pub tensor_size1: u32,
    pub tensor_mode: u32,
    pub elops_wload: u32,
    pub odu_cfg: u32,
    pub odu_be_size: u32,
    pub odu_be_cnt: u32,
    pub odu_se_size: u32,
    pub te_dim0: u32,
    pub te_dim1: u32,
    /// Output base. Relocated.
    pub odu_base: u32,
    pub wt_offset: u32,
    pub out_offset: u32,
    pub base_ptr_a: u32,
    pub base_ptr_b: u32,
    pub hwp_cmx_base: u32,
}

const _: () = assert!(std::mem::size_of::<DpuInvariantRegisters>() == DPU_INVARIANT_SIZE);

/// DPU variant register file, one per output slice.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DpuVariantRegisters {
    /// Runtime-linked pointer back to the invariant; left zero.
    pub invariant_addr: u64,
    pub workload_start0: u32,
    pub workload_start1: u32,
    pub workload_start2: u32,
    pub workload_end0: u32,
    pub workload_end1: u32,
    pub workload_end2: u32,
    pub offset_addr: u32,
    pub pad_cfg: u32,
    pub te_beg0: u32,
    pub te_beg1: u32,
    pub te_end0: u32,
    pub te_end1: u32,
    pub flex_map: u32,
    pub weight_num: u32,
}

const _: () = assert!(std::mem::size_of::<DpuVariantRegisters>() == DPU_VARIANT_SIZE);

impl DpuInvariantRegisters {
    fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DPU_INVARIANT_SIZE);
        out.extend_from_slice(&self.barriers_wait_mask.to_le_bytes());
        out.extend_from_slice(&self.barriers_post_mask.to_le_bytes());
        out.extend_from_slice(&self.barriers_sched.to_le_bytes());
        for field in [
            self.se_sp_addr,
            self.sparsity_addr,
            self.act_addr,
            self.act_size,
            self.z_config,
            self.kernel_pad_cfg,
            self.kernel_strides,
            self.weight_size,
            self.weight_num,
            self.weight_start,
            self.tensor_size0,
            self.tensor_size1,
            self.tensor_mode,
            self.elops_wload,
            self.odu_cfg,
            self.odu_be_size,
            self.odu_be_cnt,
            self.odu_se_size,
            self.te_dim0,
            self.te_dim1,
            self.odu_base,
            self.wt_offset,
            self.out_offset,
            self.base_ptr_a,
            self.base_ptr_b,
            self.hwp_cmx_base,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        debug_assert_eq!(out.len(), DPU_INVARIANT_SIZE);
        out
    }
}

impl DpuVariantRegisters {
    fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DPU_VARIANT_SIZE);
        out.extend_from_slice(&self.invariant_addr.to_le_bytes());
        for field in [
            self.workload_start0,
            self.workload_start1,
            self.workload_start2,
            self.workload_end0,
            self.workload_end1,
            self.workload_end2,
            self.offset_addr,
            self.pad_cfg,
            self.te_beg0,
            self.te_beg1,
            self.te_end0,
            self.te_end1,
            self.flex_map,
            self.weight_num,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        debug_assert_eq!(out.len(), DPU_VARIANT_SIZE);
        out
    }
}

fn buffer_reloc(
    func: &Function,
    addresses: &FunctionAllocation,
    buf: BufferId,
    offset: usize,
) -> Relocation {
    let root = func.root_of(buf);
    let desc = func.buffer(root);
    let addr = addresses.get(&root).copied().unwrap_or(0);
    Relocation::new(
        RelocSymbol::MemoryBase(desc.mem_kind),
        offset as u64,
        kind_for_memory(desc.mem_kind),
        addr as i64,
    )
}

fn pack_variant(variant: &DpuVariant) -> DpuVariantRegisters {
    DpuVariantRegisters {
        workload_start0: variant.start[0],
        workload_start1: variant.start[1],
        workload_start2: variant.start[2],
        workload_end0: variant.end[0],
        workload_end1: variant.end[1],
        workload_end2: variant.end[2],
        pad_cfg: u32::from_le_bytes(variant.pad),
        te_beg0: variant.start[0],
        te_beg1: variant.start[1],
        te_end0: variant.end[0],
        te_end1: variant.end[1],
        flex_map: variant.mpe_mode.code() as u32,
        ..Default::default()
    }
}

/// Serialize one DPU task: invariant image followed by its variant images.
pub fn serialize_dpu(
    func: &Function,
    addresses: &FunctionAllocation,
    task: TaskId,
    dpu: &DpuInvariant,
    wait_mask: u64,
    post_mask: u64,
) -> CompileResult<SerializedPayload> {
    if dpu.needs_weight_table && dpu.weight_table.is_none() {
        return Err(CompileError::MissingOperand {
            task: task.0,
            operand: "weight_table",
        });
    }
    if dpu.needs_weight_table && dpu.weights.is_none() {
        return Err(CompileError::MissingOperand {
            task: task.0,
            operand: "weights",
        });
    }

    let input = func.buffer(func.root_of(dpu.input));
    let output = func.buffer(func.root_of(dpu.output));

    let mut regs = DpuInvariantRegisters {
        barriers_wait_mask: wait_mask,
        barriers_post_mask: post_mask,
        act_size: input.size as u32,
        kernel_pad_cfg: u32::from_le_bytes([
            dpu.kernel_size[0],
            dpu.kernel_size[1],
            dpu.kernel_strides[0],
            dpu.kernel_strides[1],
        ]),
        tensor_size0: input.shape.iter().product::<i64>() as u32,
        tensor_size1: output.shape.iter().product::<i64>() as u32,
        tensor_mode: ((input.elem_type.dtype_code() as u32) << 8)
            | output.elem_type.dtype_code() as u32,
        te_dim0: output.shape.last().copied().unwrap_or(1) as u32,
        te_dim1: output.shape.iter().rev().nth(1).copied().unwrap_or(1) as u32,
        ..Default::default()
    };
    if let Some(weights) = dpu.weights {
        let desc = func.buffer(func.root_of(weights));
        regs.weight_size = desc.size as u32;
        regs.weight_num = desc.shape.first().copied().unwrap_or(0) as u32;
    }

    let mut relocations = vec![
        buffer_reloc(func, addresses, dpu.input, INV_ACT_ADDR_OFFSET),
        buffer_reloc(func, addresses, dpu.output, INV_ODU_BASE_OFFSET),
    ];
    if let Some(weights) = dpu.weights {
        relocations.push(buffer_reloc(
            func,
            addresses,
            weights,
            INV_WEIGHT_START_OFFSET,
        ));
    }
    if let Some(table) = dpu.weight_table {
        relocations.push(buffer_reloc(func, addresses, table, INV_SE_SP_ADDR_OFFSET));
    }

    let mut bytes = regs.to_bytes();
    for (idx, variant) in dpu.variants.iter().enumerate() {
        let var_regs = pack_variant(variant);
        let base = DPU_INVARIANT_SIZE + idx * DPU_VARIANT_SIZE;
        bytes.extend_from_slice(&var_regs.to_bytes());
        debug_assert_eq!(bytes.len(), base + DPU_VARIANT_SIZE);
    }

    Ok(SerializedPayload { bytes, relocations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BufferDesc, ElemType, MemoryKind, MpeMode};

    fn conv_setup() -> (Function, FunctionAllocation, DpuInvariant) {
        let mut func = Function::new("main");
        let input = func.add_buffer(BufferDesc::new(
            "in",
            MemoryKind::CmxNn,
            ElemType::F16,
            vec![1, 16, 8, 8],
        ));
        let weights = func.add_buffer(BufferDesc::new(
            "w",
            MemoryKind::CmxNn,
            ElemType::F16,
            vec![32, 16, 1, 1],
        ));
        let table = func.add_buffer(BufferDesc::new(
            "wt",
            MemoryKind::CmxNn,
            ElemType::I32,
            vec![32, 4],
        ));
        let output = func.add_buffer(BufferDesc::new(
            "out",
            MemoryKind::CmxNn,
            ElemType::F16,
            vec![1, 32, 8, 8],
        ));
        let mut alloc = FunctionAllocation::new();
        for (i, id) in [input, weights, table, output].iter().enumerate() {
            alloc.insert(*id, (i as u64) * 0x1000);
        }
        let dpu = DpuInvariant {
            input,
            weights: Some(weights),
            weight_table: Some(table),
            output,
            kernel_size: [1, 1],
            kernel_strides: [1, 1],
            needs_weight_table: true,
            variants: vec![DpuVariant {
                start: [0, 0, 0],
                end: [7, 7, 31],
                mpe_mode: MpeMode::Cuboid16x16,
                pad: [0, 0, 0, 0],
            }],
        };
        (func, alloc, dpu)
    }

    #[test]
    fn image_is_invariant_plus_variants() {
        let (func, alloc, dpu) = conv_setup();
        let payload = serialize_dpu(&func, &alloc, TaskId(0), &dpu, 1, 2).unwrap();
        assert_eq!(payload.bytes.len(), DPU_INVARIANT_SIZE + DPU_VARIANT_SIZE);
    }

    #[test]
    fn every_address_field_has_a_relocation() {
        let (func, alloc, dpu) = conv_setup();
        let payload = serialize_dpu(&func, &alloc, TaskId(0), &dpu, 0, 0).unwrap();
        let offsets: Vec<u64> = payload.relocations.iter().map(|r| r.offset).collect();
        for expected in [
            INV_ACT_ADDR_OFFSET,
            INV_ODU_BASE_OFFSET,
            INV_WEIGHT_START_OFFSET,
            INV_SE_SP_ADDR_OFFSET,
        ] {
            assert!(offsets.contains(&(expected as u64)), "missing {expected:#x}");
        }
    }

    #[test]
    fn missing_weight_table_is_fatal() {
        let (func, alloc, mut dpu) = conv_setup();
        dpu.weight_table = None;
        let err = serialize_dpu(&func, &alloc, TaskId(3), &dpu, 0, 0).unwrap_err();
        assert!(matches!(
            err,
            CompileError::MissingOperand {
                task: 3,
                operand: "weight_table"
            }
        ));
    }

    #[test]
    fn barrier_masks_land_in_the_image() {
        let (func, alloc, dpu) = conv_setup();
        let payload = serialize_dpu(&func, &alloc, TaskId(0), &dpu, 0xA5, 0x5A).unwrap();
        assert_eq!(payload.bytes[0], 0xA5);
        assert_eq!(payload.bytes[8], 0x5A);
    }
}
