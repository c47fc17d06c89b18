// This module drives the back-end passes in their required order: verification of
// buffer attributes, barrier legalization per function, module-wide buffer
// allocation (entry points first, callees against their reserved ranges), and
// finally serialization of the entry function to the selected container. The
// pipeline is strictly single-threaded; every stage either succeeds completely or
// fails the compilation, and nothing is emitted on failure.

//! Pass pipeline driver.

use log::info;

use crate::alloc::allocate_module;
use crate::barrier::{legalize_barriers, LegalizeOptions};
use crate::core::{CompilationSession, CompileError, CompileResult, CompilerContext};
use crate::elf::export_elf;
use crate::ir::Module;
use crate::serialize::BlobWriter;

/// Output container selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Blob,
    Elf,
}

/// Pipeline options.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub output: OutputFormat,
    pub legalize: LegalizeOptions,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output: OutputFormat::Blob,
            legalize: LegalizeOptions::default(),
        }
    }
}

/// Run the full back-end over a module and return the output image.
pub fn compile_module(
    module: &mut Module,
    ctx: &CompilerContext,
    session: &CompilationSession<'_>,
    opts: CompileOptions,
) -> CompileResult<Vec<u8>> {
    let entry = *module
        .entry_points
        .first()
        .ok_or_else(|| CompileError::FunctionNotFound {
            name: "<entry point>".to_string(),
        })?;
    info!(
        "compiling '{}' for {} ({} functions)",
        module.name,
        ctx.arch().kind.name(),
        module.functions.len()
    );

    for func in &mut module.functions {
        func.verify()?;
        let report = legalize_barriers(func, ctx, opts.legalize)?;
        session.record_barrier_merge(report.merges, report.barriers_after);
    }

    let allocation = allocate_module(module, ctx)?;
    for (idx, func) in module.functions.iter().enumerate() {
        let Some(placed) = allocation.function(crate::ir::FuncId(idx as u32)) else {
            continue;
        };
        session.record_buffers_allocated(placed.len());
        for (buf, &address) in placed {
            let desc = func.buffer(*buf);
            session.record_high_water_mark(desc.mem_kind, address + desc.size);
        }
    }

    match opts.output {
        OutputFormat::Blob => BlobWriter::new(session, ctx).write(module, entry, &allocation),
        OutputFormat::Elf => export_elf(module, entry, &allocation, ctx),
    }
}
