//! ELF export checks: the image parses, sections carry the engine flags,
//! and every address field has a relocation entry.

use bumpalo::Bump;
use npuc::core::{ArchKind, CompilationSession, CompilerContext};
use npuc::elf::{SHF_NPU_DMA, SHF_NPU_SHAVE};
use npuc::ir::{
    ActKernelInvocation, BufferDesc, DmaTransfer, ElemType, Function, KernelBlob, MemoryKind,
    Module, Task, TaskKind,
};
use npuc::pipeline::{compile_module, CompileOptions, OutputFormat};
use npuc::LegalizeOptions;
use object::{File, Object, ObjectSection, ObjectSymbol, SectionFlags};

fn staged_module(with_kernel: bool) -> Module {
    let mut module = Module::new("elf");
    let mut func = Function::new("main");
    let input = func.add_buffer(
        BufferDesc::new("input", MemoryKind::Ddr, ElemType::F16, vec![1, 8, 8])
            .with_fixed_address(0),
    );
    let staged = func.add_buffer(BufferDesc::new(
        "staged",
        MemoryKind::CmxNn,
        ElemType::F16,
        vec![1, 8, 8],
    ));
    let output = func.add_buffer(
        BufferDesc::new("output", MemoryKind::Ddr, ElemType::F16, vec![1, 8, 8])
            .with_fixed_address(0x10000),
    );
    func.inputs = vec![input];
    func.outputs = vec![output];
    let barrier = func.add_barrier();
    func.add_task(
        Task::new(TaskKind::Dma(DmaTransfer {
            src: input,
            dst: staged,
            length: 0,
        }))
        .updates(&[barrier]),
    );
    func.add_task(
        Task::new(TaskKind::Dma(DmaTransfer {
            src: staged,
            dst: output,
            length: 0,
        }))
        .waits_on(&[barrier]),
    );
    if with_kernel {
        let kernel = module.add_kernel(KernelBlob {
            name: "relu_fp16".to_string(),
            text: vec![0x90; 128],
            data: vec![0x01; 32],
        });
        func.add_task(Task::new(TaskKind::ActKernel(ActKernelInvocation {
            kernel,
            inputs: vec![staged],
            outputs: vec![staged],
        })));
    }
    let entry = module.add_function(func);
    module.entry_points.push(entry);
    module
}

fn export(with_kernel: bool) -> Vec<u8> {
    let mut module = staged_module(with_kernel);
    let ctx = CompilerContext::new(ArchKind::Npu40xx);
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    compile_module(
        &mut module,
        &ctx,
        &session,
        CompileOptions {
            output: OutputFormat::Elf,
            legalize: LegalizeOptions::default(),
        },
    )
    .unwrap()
}

#[test]
fn image_parses_and_has_task_sections() {
    let image = export(false);
    let file = File::parse(&*image).unwrap();
    assert!(file.section_by_name(".text.dmaTasks").is_some());
}

#[test]
fn sections_carry_engine_flags() {
    let image = export(true);
    let file = File::parse(&*image).unwrap();
    let dma = file.section_by_name(".text.dmaTasks").unwrap();
    match dma.flags() {
        SectionFlags::Elf { sh_flags } => assert_ne!(sh_flags & SHF_NPU_DMA, 0),
        other => panic!("unexpected flags {other:?}"),
    }
    let shave = file.section_by_name(".text.actKernelInvocations").unwrap();
    match shave.flags() {
        SectionFlags::Elf { sh_flags } => assert_ne!(sh_flags & SHF_NPU_SHAVE, 0),
        other => panic!("unexpected flags {other:?}"),
    }
}

#[test]
fn pool_base_symbols_are_present() {
    let image = export(false);
    let file = File::parse(&*image).unwrap();
    let names: Vec<String> = file
        .symbols()
        .filter_map(|s| s.name().ok().map(str::to_string))
        .collect();
    assert!(names.iter().any(|n| n == "NPU.DDR.BASE"));
    assert!(names.iter().any(|n| n == "NPU.CMX_NN.BASE"));
}

#[test]
fn dma_payloads_have_relocations() {
    let image = export(false);
    let file = File::parse(&*image).unwrap();
    let dma = file.section_by_name(".text.dmaTasks").unwrap();
    // Two DMA tasks, two address fields each.
    assert_eq!(dma.relocations().count(), 4);
}

#[test]
fn kernel_blobs_land_in_their_sections() {
    let image = export(true);
    let file = File::parse(&*image).unwrap();
    let text = file.section_by_name(".text.shaveKernels").unwrap();
    assert!(text.data().unwrap().iter().any(|&b| b == 0x90));
    let names: Vec<String> = file
        .symbols()
        .filter_map(|s| s.name().ok().map(str::to_string))
        .collect();
    assert!(names.iter().any(|n| n == "relu_fp16.text"));
    assert!(names.iter().any(|n| n == "relu_fp16.data"));
}
