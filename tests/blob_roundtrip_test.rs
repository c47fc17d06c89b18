//! Blob serialization round-trip and caching invariants.

use bumpalo::Bump;
use npuc::alloc::allocate_module;
use npuc::core::{ArchKind, CompilationSession, CompilerContext};
use npuc::ir::{
    ActKernelInvocation, BufferDesc, DmaTransfer, ElemType, Function, KernelBlob, MemoryKind,
    Module, Task, TaskKind,
};
use npuc::pipeline::{compile_module, CompileOptions, OutputFormat};
use npuc::serialize::{parse_blob, KERNEL_DATA_ALIGNMENT};
use npuc::LegalizeOptions;

/// The minimal two-task module of the round-trip property: one DMA write
/// into CMX, one barrier, one DMA read back out.
fn two_task_module() -> Module {
    let mut module = Module::new("roundtrip");
    let mut func = Function::new("main");
    let input = func.add_buffer(
        BufferDesc::new("input", MemoryKind::Ddr, ElemType::F16, vec![1, 16, 8, 8])
            .with_fixed_address(0),
    );
    let staged = func.add_buffer(BufferDesc::new(
        "staged",
        MemoryKind::CmxNn,
        ElemType::F16,
        vec![1, 16, 8, 8],
    ));
    let output = func.add_buffer(
        BufferDesc::new("output", MemoryKind::Ddr, ElemType::F16, vec![1, 16, 8, 8])
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
    let entry = module.add_function(func);
    module.entry_points.push(entry);
    module
}

fn compile(module: &mut Module) -> Vec<u8> {
    let ctx = CompilerContext::new(ArchKind::Npu37xx);
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    compile_module(
        module,
        &ctx,
        &session,
        CompileOptions {
            output: OutputFormat::Blob,
            legalize: LegalizeOptions {
                merge_wait_barriers_iteratively: true,
            },
        },
    )
    .unwrap()
}

#[test]
fn two_task_round_trip() {
    let mut module = two_task_module();
    let blob = compile(&mut module);
    let summary = parse_blob(&blob).unwrap();

    assert_eq!(summary.arch, ArchKind::Npu37xx);
    assert_eq!(summary.name, "main");
    assert_eq!(summary.task_count, 2);
    assert_eq!(summary.input_count, 1);
    assert_eq!(summary.output_count, 1);

    let dma_count = summary
        .task_counts
        .iter()
        .find(|(e, _)| *e == npuc::ir::ExecutorKind::DmaNn)
        .unwrap()
        .1;
    assert_eq!(dma_count, 2);

    assert_eq!(summary.barriers.len(), 1);
    assert_eq!(summary.barriers[0].producer_count, 1);
    assert_eq!(summary.barriers[0].consumer_count, 1);

    assert_eq!(summary.tensor_shapes.len(), 3);
    for shape in &summary.tensor_shapes {
        assert_eq!(shape, &vec![1, 16, 8, 8]);
    }
}

#[test]
fn blob_output_is_deterministic() {
    let first = compile(&mut two_task_module());
    let second = compile(&mut two_task_module());
    assert_eq!(first, second);
}

#[test]
fn barrier_reference_pairs_both_carry_virtual_ids() {
    let mut module = two_task_module();
    let blob = compile(&mut module);
    // parse_blob rejects pairs that disagree, so a successful parse plus a
    // matching wait id is the whole contract.
    let summary = parse_blob(&blob).unwrap();
    let reader_task = summary
        .tasks
        .iter()
        .find(|t| !t.wait_barriers.is_empty())
        .unwrap();
    assert_eq!(reader_task.wait_barriers, vec![0]);
}

#[test]
fn view_aliases_its_source_tensor() {
    let mut module = two_task_module();
    let func = &mut module.functions[0];
    let staged = func
        .buffers
        .iter()
        .position(|b| b.name == "staged")
        .map(|i| npuc::ir::BufferId(i as u32))
        .unwrap();
    let view = func.add_buffer(BufferDesc::view_of(
        "staged_view",
        staged,
        &func.buffer(staged).clone(),
        vec![1, 16, 64],
    ));
    let extra_out = func.add_buffer(
        BufferDesc::new("extra", MemoryKind::Ddr, ElemType::F16, vec![1, 16, 64])
            .with_fixed_address(0x20000),
    );
    func.add_task(Task::new(TaskKind::Dma(DmaTransfer {
        src: view,
        dst: extra_out,
        length: 0,
    })));

    let blob = compile(&mut module);
    let summary = parse_blob(&blob).unwrap();
    // The view shows up as no extra tensor entry: staged, input, output,
    // extra only.
    assert_eq!(summary.tensor_names.len(), 4);
    assert!(!summary.tensor_names.contains(&"staged_view".to_string()));
}

#[test]
fn kernel_payloads_are_aligned_and_deduplicated() {
    let mut module = two_task_module();
    let kernel_a = module.add_kernel(KernelBlob {
        name: "softmax_fp16".to_string(),
        text: vec![0x4B; 300],
        data: vec![0x11; 40],
    });
    // Same kernel name registered twice: payload must embed once.
    let kernel_b = module.add_kernel(KernelBlob {
        name: "softmax_fp16".to_string(),
        text: vec![0x4B; 300],
        data: vec![0x11; 40],
    });
    let func = &mut module.functions[0];
    let act_in = func.add_buffer(BufferDesc::new(
        "act_in",
        MemoryKind::CmxNn,
        ElemType::F16,
        vec![1, 64],
    ));
    let act_out = func.add_buffer(BufferDesc::new(
        "act_out",
        MemoryKind::CmxNn,
        ElemType::F16,
        vec![1, 64],
    ));
    func.add_task(Task::new(TaskKind::ActKernel(ActKernelInvocation {
        kernel: kernel_a,
        inputs: vec![act_in],
        outputs: vec![act_out],
    })));
    func.add_task(Task::new(TaskKind::ActKernel(ActKernelInvocation {
        kernel: kernel_b,
        inputs: vec![act_out],
        outputs: vec![act_in],
    })));

    let blob = compile(&mut module);
    let summary = parse_blob(&blob).unwrap();
    assert_eq!(summary.kernels.len(), 2);
    for kernel in &summary.kernels {
        assert_eq!(kernel.text_offset as usize % KERNEL_DATA_ALIGNMENT, 0);
        assert_eq!(kernel.data_offset as usize % KERNEL_DATA_ALIGNMENT, 0);
        // Payload bytes really live there.
        let text = &blob[kernel.text_offset as usize..][..kernel.text_len as usize];
        assert!(text.iter().all(|&b| b == 0x4B));
    }
    // Deduplication: both entries reference the same embedded payload.
    assert_eq!(summary.kernels[0].text_offset, summary.kernels[1].text_offset);
    assert_eq!(summary.kernels[0].data_offset, summary.kernels[1].data_offset);
}

#[test]
fn constants_are_embedded() {
    let mut module = two_task_module();
    let func = &mut module.functions[0];
    let content: Vec<u8> = (0..64u8).collect();
    let weights = func.add_buffer(
        BufferDesc::new("weights", MemoryKind::Ddr, ElemType::U8, vec![64])
            .with_fixed_address(0x30000)
            .with_content(content.clone()),
    );
    let cmx_w = func.add_buffer(BufferDesc::new(
        "weights_cmx",
        MemoryKind::CmxNn,
        ElemType::U8,
        vec![64],
    ));
    func.add_task(Task::new(TaskKind::Dma(DmaTransfer {
        src: weights,
        dst: cmx_w,
        length: 0,
    })));

    let blob = compile(&mut module);
    // The constant's bytes appear verbatim in the blob.
    assert!(blob
        .windows(content.len())
        .any(|window| window == content.as_slice()));
}

#[test]
fn allocation_assigns_addresses_to_every_storage_root() {
    let module = two_task_module();
    let ctx = CompilerContext::new(ArchKind::Npu37xx);
    let allocation = allocate_module(&module, &ctx).unwrap();
    let entry = module.entry_points[0];
    let func = &module.functions[entry.index()];
    let staged = func
        .buffers
        .iter()
        .position(|b| b.name == "staged")
        .map(|i| npuc::ir::BufferId(i as u32))
        .unwrap();
    assert!(allocation.address_of(entry, staged).is_some());
}
