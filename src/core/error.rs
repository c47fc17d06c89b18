// This module defines error types for the NPU compiler core using the thiserror crate.
// CompileError covers the two failure classes the back-end distinguishes: invariant
// violations (allocator address misalignment, out-of-memory in a scratch pool, barrier
// slot overflow that legalization could not resolve, double serialization of a value)
// which indicate pipeline-ordering or scheduling bugs, and unsupported-configuration
// errors (unknown architecture, element types the serializer cannot emit) which indicate
// valid input this build does not handle. Every variant carries enough context to name
// the offending buffer, task or barrier. All errors are fatal at the pipeline top level;
// no partial blob is ever emitted.

//! Error types for the NPU compiler core.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use crate::ir::MemoryKind;

/// Main error type for back-end compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("out of memory in {kind:?}: need {size} bytes (align {alignment}), capacity {capacity}")]
    OutOfMemory {
        kind: MemoryKind,
        size: u64,
        alignment: u64,
        capacity: u64,
    },

    #[error("misaligned allocation for buffer '{buffer}': address {address:#x} is not a multiple of {alignment}")]
    MisalignedAllocation {
        buffer: String,
        address: u64,
        alignment: u64,
    },

    #[error("buffer '{buffer}' has a fixed address {address:#x} outside the {kind:?} pool")]
    FixedAllocConflict {
        buffer: String,
        address: u64,
        kind: MemoryKind,
    },

    #[error("function not found: {name}")]
    FunctionNotFound { name: String },

    #[error("call graph cycle involving function '{name}'")]
    CallGraphCycle { name: String },

    #[error("barrier legalization failed: {reason}")]
    BarrierLegalization { reason: String },

    #[error("barrier {barrier} exceeds slot budget: {used} slots used, {max} available")]
    BarrierSlotOverflow { barrier: u32, used: u32, max: u32 },

    #[error("task {task} still has {count} wait barriers after legalization")]
    MultipleWaitBarriers { task: u32, count: usize },

    #[error("{entity} {index} serialized twice")]
    AlreadySerialized { entity: &'static str, index: u32 },

    #[error("task {task} is missing a required operand: {operand}")]
    MissingOperand { task: u32, operand: &'static str },

    #[error("serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("malformed blob: {reason}")]
    MalformedBlob { reason: String },

    #[error("unknown architecture: {name}")]
    UnknownArch { name: String },

    #[error("unsupported element type {elem} for binary serialization")]
    UnsupportedElementType { elem: &'static str },

    #[error("invalid swizzling key {key} for buffer '{buffer}' (expected 1..=5)")]
    InvalidSwizzlingKey { buffer: String, key: u8 },

    #[error("ELF emission failed: {0}")]
    ElfWrite(#[from] object::write::Error),
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
