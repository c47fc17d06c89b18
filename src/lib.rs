//! NPU compiler back-end core.
//!
//! This crate implements the resource allocation and task serialization
//! core of an ahead-of-time compiler for a tensor accelerator family:
//! linear-scan buffer allocation with liveness tracking, reserved-memory
//! bookkeeping across call graphs, barrier legalization for the
//! DMA/DPU/ActShave engines, and binary emission to the wire-format blob
//! or a relocatable ELF image.
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (errors, context, session, arch)
//! - [`ir`] - Scheduled-IR data model (buffers, tasks, barriers, modules)
//! - [`alloc`] - Liveness, linear-scan allocation, reserved ranges
//! - [`barrier`] - Dependency graph and barrier legalization
//! - [`serialize`] - Blob writer, per-task serializers, relocations
//! - [`elf`] - Alternate ELF output container
//! - [`pipeline`] - Pass ordering and output selection

pub mod alloc;
pub mod barrier;
pub mod core;
pub mod elf;
pub mod ir;
pub mod pipeline;
pub mod serialize;

pub use crate::core::{
    ArchDesc, ArchKind, CompilationSession, CompileError, CompileResult, CompilerContext,
    SessionStats,
};
pub use alloc::{
    allocate_function, allocate_module, FunctionAllocation, LinearScan, LinearScanHandler,
    LiveRange, LiveRangeTracker, ModuleAllocation, ReservedMemInfo,
};
pub use barrier::{legalize_barriers, BarrierInfo, LegalizeOptions, LegalizeReport};
pub use pipeline::{compile_module, CompileOptions, OutputFormat};
pub use serialize::{parse_blob, BlobSummary, BlobWriter};
