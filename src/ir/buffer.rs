// This module defines the buffer value model consumed by the allocator and the
// serializer. A BufferDesc is the back-end's view of one memory-resident tensor or
// constant: byte size, required alignment, memory kind, optional pre-placed address,
// optional swizzling key, optional alias source for view buffers, and the tensor
// metadata (element type, shape, strides) the blob writer needs for tensor references.
// Buffers are stored in per-function Vec tables and addressed by BufferId handles;
// nothing in the core holds pointers between IR nodes.

//! Buffer values: the allocatable unit of the scheduled IR.

use crate::core::{CompileError, CompileResult};

/// Handle of a buffer within its function's buffer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl BufferId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Memory kinds of the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryKind {
    Ddr,
    CmxNn,
    CmxUpa,
    Csram,
    Register,
    MacAccumulators,
}

impl MemoryKind {
    /// Kinds the allocator manages as byte pools.
    pub const POOLS: [MemoryKind; 4] = [
        MemoryKind::Ddr,
        MemoryKind::CmxNn,
        MemoryKind::CmxUpa,
        MemoryKind::Csram,
    ];

    /// Wire-format memory location code.
    pub fn location_code(self) -> u8 {
        match self {
            MemoryKind::Ddr => 0,
            MemoryKind::CmxNn => 1,
            MemoryKind::CmxUpa => 2,
            MemoryKind::Csram => 3,
            MemoryKind::Register => 4,
            MemoryKind::MacAccumulators => 5,
        }
    }

    pub fn from_location_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MemoryKind::Ddr),
            1 => Some(MemoryKind::CmxNn),
            2 => Some(MemoryKind::CmxUpa),
            3 => Some(MemoryKind::Csram),
            4 => Some(MemoryKind::Register),
            5 => Some(MemoryKind::MacAccumulators),
            _ => None,
        }
    }
}

/// Element types the serializer can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    F32,
    F16,
    Bf16,
    U8,
    I8,
    I32,
    I4,
    U4,
}

impl ElemType {
    pub fn bit_width(self) -> u64 {
        match self {
            ElemType::F32 | ElemType::I32 => 32,
            ElemType::F16 | ElemType::Bf16 => 16,
            ElemType::U8 | ElemType::I8 => 8,
            ElemType::I4 | ElemType::U4 => 4,
        }
    }

    /// Wire-format dtype code.
    pub fn dtype_code(self) -> u8 {
        match self {
            ElemType::F32 => 0,
            ElemType::F16 => 1,
            ElemType::Bf16 => 2,
            ElemType::U8 => 3,
            ElemType::I8 => 4,
            ElemType::I32 => 5,
            ElemType::I4 => 6,
            ElemType::U4 => 7,
        }
    }

    pub fn from_dtype_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ElemType::F32),
            1 => Some(ElemType::F16),
            2 => Some(ElemType::Bf16),
            3 => Some(ElemType::U8),
            4 => Some(ElemType::I8),
            5 => Some(ElemType::I32),
            6 => Some(ElemType::I4),
            7 => Some(ElemType::U4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElemType::F32 => "f32",
            ElemType::F16 => "f16",
            ElemType::Bf16 => "bf16",
            ElemType::U8 => "u8",
            ElemType::I8 => "i8",
            ElemType::I32 => "i32",
            ElemType::I4 => "i4",
            ElemType::U4 => "u4",
        }
    }
}

/// Per-channel quantization parameters carried into the tensor reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quantization {
    pub zero_points: Vec<i64>,
    pub mults: Vec<u32>,
    pub shifts: Vec<u8>,
}

/// One memory-resident tensor or constant.
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub name: String,
    /// Unpadded byte size.
    pub size: u64,
    /// Required address alignment; 1 when the type imposes none.
    pub alignment: u64,
    pub mem_kind: MemoryKind,
    /// Pre-placed buffers (network I/O, externally fixed constants) carry a
    /// concrete address and are never reassigned.
    pub fixed_address: Option<u64>,
    /// Swizzling key 1..=5; drives both size padding and address alignment.
    pub swizzling_key: Option<u8>,
    /// View buffers alias the storage of another buffer.
    pub alias_of: Option<BufferId>,
    pub elem_type: ElemType,
    pub shape: Vec<i64>,
    /// Bit strides, outermost first. Derived dense when absent.
    pub strides_bits: Option<Vec<u64>>,
    pub quant: Option<Quantization>,
    /// Constant payload, serialized into the blob's binary-data section.
    pub content: Option<Vec<u8>>,
}

impl BufferDesc {
    /// A plain allocatable buffer with dense layout.
    pub fn new(
        name: impl Into<String>,
        mem_kind: MemoryKind,
        elem_type: ElemType,
        shape: Vec<i64>,
    ) -> Self {
        let elems: i64 = shape.iter().product();
        let size = (elems as u64 * elem_type.bit_width()).div_ceil(8);
        Self {
            name: name.into(),
            size,
            alignment: 1,
            mem_kind,
            fixed_address: None,
            swizzling_key: None,
            alias_of: None,
            elem_type,
            shape,
            strides_bits: None,
            quant: None,
            content: None,
        }
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_fixed_address(mut self, address: u64) -> Self {
        self.fixed_address = Some(address);
        self
    }

    pub fn with_swizzling(mut self, key: u8) -> Self {
        self.swizzling_key = Some(key);
        self
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    /// A view over `source` (reshape, slice, sub-buffer). Views own no
    /// storage; the allocator and serializer resolve them to their root.
    pub fn view_of(
        name: impl Into<String>,
        source: BufferId,
        base: &BufferDesc,
        shape: Vec<i64>,
    ) -> Self {
        let mut desc = Self::new(name, base.mem_kind, base.elem_type, shape);
        desc.alias_of = Some(source);
        desc
    }

    /// Dense bit strides, outermost dimension first.
    pub fn dense_strides_bits(&self) -> Vec<u64> {
        let mut strides = vec![0u64; self.shape.len()];
        let mut acc = self.elem_type.bit_width();
        for (i, dim) in self.shape.iter().enumerate().rev() {
            strides[i] = acc;
            acc *= *dim as u64;
        }
        strides
    }

    /// Validate the swizzling key range before the allocator runs.
    pub fn verify(&self) -> CompileResult<()> {
        if let Some(key) = self.swizzling_key {
            if !(1..=5).contains(&key) {
                return Err(CompileError::InvalidSwizzlingKey {
                    buffer: self.name.clone(),
                    key,
                });
            }
        }
        Ok(())
    }
}
