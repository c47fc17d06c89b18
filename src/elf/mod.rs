// This module assembles the alternate output container: a relocatable ELF image built
// with the object crate. Task payloads are appended into per-executor sections,
// constants and deduplicated kernel blobs into data sections, and every address field
// of every payload becomes an ELF relocation against a pool-base or kernel symbol,
// using the same kind/offset/addend model as the blob path (the RelocKind discriminant
// is the r_type). Sections carry processor-specific sh_flags marking which engine may
// touch them; the loader checks these before mapping. Newer generations consume this
// image instead of the blob.

//! ELF export.

use std::collections::HashMap;

use log::debug;
use object::write::{Object, Relocation as ElfRelocation, Symbol, SymbolId, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationFlags, SectionKind, SymbolFlags, SymbolKind,
    SymbolScope,
};

use crate::alloc::{FunctionAllocation, ModuleAllocation};
use crate::core::{CompileResult, CompilerContext};
use crate::ir::{ExecutorKind, FuncId, MemoryKind, Module, TaskId, TaskKind};
use crate::serialize::{
    serialize_act_kernel, serialize_dma, serialize_dpu, RelocSymbol, SerializedPayload,
    KERNEL_DATA_ALIGNMENT,
};

/// Processor-specific section flags: which engine may access a section.
pub const SHF_NPU_DMA: u64 = 0x1000_0000;
pub const SHF_NPU_DPU: u64 = 0x2000_0000;
pub const SHF_NPU_SHAVE: u64 = 0x4000_0000;
/// Standard executable flag.
pub const SHF_EXECINSTR: u64 = 0x4;

/// Alignment of task payloads within their section.
const TASK_ALIGNMENT: u64 = 64;

fn section_name(executor: ExecutorKind) -> &'static [u8] {
    match executor {
        ExecutorKind::DmaNn => b".text.dmaTasks",
        ExecutorKind::Dpu => b".text.dpuTasks",
        ExecutorKind::ActShave => b".text.actKernelInvocations",
        ExecutorKind::M2i => b".text.m2iTasks",
    }
}

fn section_flags(executor: ExecutorKind) -> u64 {
    SHF_EXECINSTR
        | match executor {
            ExecutorKind::DmaNn | ExecutorKind::M2i => SHF_NPU_DMA,
            ExecutorKind::Dpu => SHF_NPU_DPU,
            ExecutorKind::ActShave => SHF_NPU_SHAVE,
        }
}

fn pool_symbol_name(kind: MemoryKind) -> &'static [u8] {
    match kind {
        MemoryKind::Ddr => b"NPU.DDR.BASE",
        MemoryKind::CmxNn => b"NPU.CMX_NN.BASE",
        MemoryKind::CmxUpa => b"NPU.CMX_UPA.BASE",
        MemoryKind::Csram => b"NPU.CSRAM.BASE",
        MemoryKind::Register => b"NPU.REGISTER.BASE",
        MemoryKind::MacAccumulators => b"NPU.MAC_ACC.BASE",
    }
}

/// Export the entry function as a relocatable ELF image.
pub fn export_elf(
    module: &Module,
    entry: FuncId,
    allocation: &ModuleAllocation,
    ctx: &CompilerContext,
) -> CompileResult<Vec<u8>> {
    let func = module.function(entry);
    let empty = FunctionAllocation::new();
    let addresses = allocation.function(entry).unwrap_or(&empty);

    let mut obj = Object::new(BinaryFormat::Elf, Architecture::Unknown, Endianness::Little);

    // Pool base symbols are resolved by the loader at map time.
    let mut pool_symbols: HashMap<MemoryKind, SymbolId> = HashMap::new();
    let mut pool_symbol = |obj: &mut Object<'_>, kind: MemoryKind| -> SymbolId {
        *pool_symbols.entry(kind).or_insert_with(|| {
            obj.add_symbol(Symbol {
                name: pool_symbol_name(kind).to_vec(),
                value: 0,
                size: 0,
                kind: SymbolKind::Data,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            })
        })
    };

    // Kernel text/data land in their own sections, one symbol per blob,
    // deduplicated by name like the blob path.
    let kernel_text_section =
        obj.add_section(vec![], b".text.shaveKernels".to_vec(), SectionKind::Text);
    obj.section_mut(kernel_text_section).flags = object::SectionFlags::Elf {
        sh_flags: SHF_EXECINSTR | SHF_NPU_SHAVE,
    };
    let kernel_data_section =
        obj.add_section(vec![], b".data.shaveKernels".to_vec(), SectionKind::Data);
    obj.section_mut(kernel_data_section).flags = object::SectionFlags::Elf {
        sh_flags: SHF_NPU_SHAVE,
    };
    let mut kernel_symbols: HashMap<String, (SymbolId, SymbolId)> = HashMap::new();
    let mut kernel_index_symbols: HashMap<u32, (SymbolId, SymbolId)> = HashMap::new();
    for task in &func.tasks {
        let TaskKind::ActKernel(act) = &task.kind else {
            continue;
        };
        if kernel_index_symbols.contains_key(&act.kernel.0) {
            continue;
        }
        let blob = &module.kernels[act.kernel.index()];
        let symbols = match kernel_symbols.get(&blob.name) {
            Some(&cached) => cached,
            None => {
                let text_off = obj.append_section_data(
                    kernel_text_section,
                    &blob.text,
                    KERNEL_DATA_ALIGNMENT as u64,
                );
                let data_off = obj.append_section_data(
                    kernel_data_section,
                    &blob.data,
                    KERNEL_DATA_ALIGNMENT as u64,
                );
                let text_sym = obj.add_symbol(Symbol {
                    name: format!("{}.text", blob.name).into_bytes(),
                    value: text_off,
                    size: blob.text.len() as u64,
                    kind: SymbolKind::Text,
                    scope: SymbolScope::Compilation,
                    weak: false,
                    section: SymbolSection::Section(kernel_text_section),
                    flags: SymbolFlags::None,
                });
                let data_sym = obj.add_symbol(Symbol {
                    name: format!("{}.data", blob.name).into_bytes(),
                    value: data_off,
                    size: blob.data.len() as u64,
                    kind: SymbolKind::Data,
                    scope: SymbolScope::Compilation,
                    weak: false,
                    section: SymbolSection::Section(kernel_data_section),
                    flags: SymbolFlags::None,
                });
                kernel_symbols.insert(blob.name.clone(), (text_sym, data_sym));
                (text_sym, data_sym)
            }
        };
        kernel_index_symbols.insert(act.kernel.0, symbols);
    }

    // Per-executor task sections.
    let mut task_sections: HashMap<ExecutorKind, _> = HashMap::new();
    for executor in ExecutorKind::ALL {
        if func.tasks.iter().any(|t| t.executor() == executor) {
            let sec = obj.add_section(vec![], section_name(executor).to_vec(), SectionKind::Text);
            obj.section_mut(sec).flags = object::SectionFlags::Elf {
                sh_flags: section_flags(executor),
            };
            task_sections.insert(executor, sec);
        }
    }

    for (idx, task) in func.tasks.iter().enumerate() {
        let id = TaskId(idx as u32);
        let wait_mask = barrier_mask(func, &task.wait_barriers);
        let post_mask = barrier_mask(func, &task.update_barriers);
        let payload: SerializedPayload = match &task.kind {
            TaskKind::Dma(dma) => {
                serialize_dma(func, addresses, dma, wait_mask, post_mask, ctx)?
            }
            TaskKind::Dpu(dpu) => serialize_dpu(func, addresses, id, dpu, wait_mask, post_mask)?,
            TaskKind::ActKernel(act) => {
                serialize_act_kernel(module, func, addresses, id, act, wait_mask, post_mask)?
            }
        };

        let section = task_sections[&task.executor()];
        let base = obj.append_section_data(section, &payload.bytes, TASK_ALIGNMENT);
        for reloc in &payload.relocations {
            let symbol = match reloc.symbol {
                RelocSymbol::MemoryBase(kind) => pool_symbol(&mut obj, kind),
                RelocSymbol::KernelText(k) => kernel_index_symbols[&k].0,
                RelocSymbol::KernelData(k) => kernel_index_symbols[&k].1,
            };
            obj.add_relocation(
                section,
                ElfRelocation {
                    offset: base + reloc.offset,
                    symbol,
                    addend: reloc.addend,
                    flags: RelocationFlags::Elf {
                        r_type: reloc.kind.code(),
                    },
                },
            )?;
        }
    }

    // Constant contents.
    let has_constants = func.buffers.iter().any(|b| b.content.is_some());
    if has_constants {
        let sec = obj.add_section(vec![], b".data.constants".to_vec(), SectionKind::ReadOnlyData);
        obj.section_mut(sec).flags = object::SectionFlags::Elf {
            sh_flags: SHF_NPU_DMA,
        };
        for desc in &func.buffers {
            if let Some(content) = &desc.content {
                obj.append_section_data(sec, content, TASK_ALIGNMENT);
            }
        }
    }

    let image = obj.write()?;
    debug!(
        "exported '{}' as ELF: {} bytes, {} task sections",
        func.name,
        image.len(),
        task_sections.len()
    );
    Ok(image)
}

fn barrier_mask(func: &crate::ir::Function, barriers: &[crate::ir::BarrierId]) -> u64 {
    let mut mask = 0u64;
    for barrier in barriers {
        let phys = func.barriers[barrier.index()]
            .physical_id
            .unwrap_or(barrier.0 as u16);
        mask |= 1u64 << (phys % 64);
    }
    mask
}
