// This module serializes ActShave software-kernel invocations. The invocation image
// is the fixed-size range/invocation pair the ActShave dispatcher consumes: window
// bases for the kernel text and data sections plus the argument table (one address
// per input/output buffer). Text and data windows are relocated against the kernel's
// entries in the blob's kernel-data section; argument addresses are relocated against
// their buffer's memory pool. Kernel code itself is embedded once per module by the
// blob writer (deduplicated by name); this serializer only references it.

//! ActShave kernel invocation serialization.

use crate::alloc::FunctionAllocation;
use crate::core::{CompileError, CompileResult};
use crate::ir::{ActKernelInvocation, Function, Module, TaskId};

use super::reloc::{kind_for_memory, Relocation, RelocKind, RelocSymbol};
use super::SerializedPayload;

/// Fixed part of the invocation image, before the argument table.
pub const ACT_INVOCATION_HEADER_SIZE: usize = 48;

/// Offsets of the relocated window fields.
pub const ACT_TEXT_WINDOW_OFFSET: usize = 0x00;
pub const ACT_DATA_WINDOW_OFFSET: usize = 0x08;

/// Serialize one kernel invocation.
///
/// Image layout: text window (u64, relocated), data window (u64,
/// relocated), entry offset (u32), stack size (u32), argument count
/// (u32), reserved (u32), barrier masks (2 x u64), then one u64 slot per
/// argument, each relocated to its buffer.
pub fn serialize_act_kernel(
    module: &Module,
    func: &Function,
    addresses: &FunctionAllocation,
    task: TaskId,
    act: &ActKernelInvocation,
    wait_mask: u64,
    post_mask: u64,
) -> CompileResult<SerializedPayload> {
    if act.kernel.index() >= module.kernels.len() {
        return Err(CompileError::MissingOperand {
            task: task.0,
            operand: "kernel",
        });
    }

    let args: Vec<_> = act
        .inputs
        .iter()
        .chain(act.outputs.iter())
        .copied()
        .collect();

    let mut bytes = Vec::with_capacity(ACT_INVOCATION_HEADER_SIZE + args.len() * 8);
    bytes.extend_from_slice(&0u64.to_le_bytes()); // text window, relocated
    bytes.extend_from_slice(&0u64.to_le_bytes()); // data window, relocated
    bytes.extend_from_slice(&0u32.to_le_bytes()); // entry point offset
    bytes.extend_from_slice(&(16 * 1024u32).to_le_bytes()); // stack size
    bytes.extend_from_slice(&(args.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // reserved
    bytes.extend_from_slice(&wait_mask.to_le_bytes());
    bytes.extend_from_slice(&post_mask.to_le_bytes());
    debug_assert_eq!(bytes.len(), ACT_INVOCATION_HEADER_SIZE);

    let kernel_idx = act.kernel.0;
    let mut relocations = vec![
        Relocation::new(
            RelocSymbol::KernelText(kernel_idx),
            ACT_TEXT_WINDOW_OFFSET as u64,
            RelocKind::Abs64,
            0,
        ),
        Relocation::new(
            RelocSymbol::KernelData(kernel_idx),
            ACT_DATA_WINDOW_OFFSET as u64,
            RelocKind::Abs64,
            0,
        ),
    ];

    for (idx, arg) in args.iter().enumerate() {
        let root = func.root_of(*arg);
        let desc = func.buffer(root);
        let addr = addresses.get(&root).copied().unwrap_or(0);
        let offset = ACT_INVOCATION_HEADER_SIZE + idx * 8;
        bytes.extend_from_slice(&0u64.to_le_bytes());
        relocations.push(Relocation::new(
            RelocSymbol::MemoryBase(desc.mem_kind),
            offset as u64,
            kind_for_memory(desc.mem_kind),
            addr as i64,
        ));
    }

    Ok(SerializedPayload { bytes, relocations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BufferDesc, ElemType, KernelBlob, MemoryKind, Task, TaskKind};

    fn setup() -> (Module, Function, FunctionAllocation, ActKernelInvocation) {
        let mut module = Module::new("net");
        let kernel = module.add_kernel(KernelBlob {
            name: "softmax_fp16".to_string(),
            text: vec![0x4B; 96],
            data: vec![0x10; 16],
        });
        let mut func = Function::new("main");
        let input = func.add_buffer(BufferDesc::new(
            "in",
            MemoryKind::CmxNn,
            ElemType::F16,
            vec![1, 64],
        ));
        let output = func.add_buffer(BufferDesc::new(
            "out",
            MemoryKind::CmxNn,
            ElemType::F16,
            vec![1, 64],
        ));
        let mut alloc = FunctionAllocation::new();
        alloc.insert(input, 0x100);
        alloc.insert(output, 0x200);
        let act = ActKernelInvocation {
            kernel,
            inputs: vec![input],
            outputs: vec![output],
        };
        // Make the module own a task so the setup mirrors real input.
        func.add_task(Task::new(TaskKind::ActKernel(act.clone())));
        (module, func, alloc, act)
    }

    #[test]
    fn image_has_one_slot_per_argument() {
        let (module, func, alloc, act) = setup();
        let payload =
            serialize_act_kernel(&module, &func, &alloc, TaskId(0), &act, 0, 0).unwrap();
        assert_eq!(payload.bytes.len(), ACT_INVOCATION_HEADER_SIZE + 2 * 8);
    }

    #[test]
    fn windows_and_arguments_are_relocated() {
        let (module, func, alloc, act) = setup();
        let payload =
            serialize_act_kernel(&module, &func, &alloc, TaskId(0), &act, 0, 0).unwrap();
        assert_eq!(payload.relocations.len(), 4);
        assert_eq!(
            payload.relocations[0].symbol,
            RelocSymbol::KernelText(0)
        );
        assert_eq!(payload.relocations[2].addend, 0x100);
        assert_eq!(payload.relocations[3].addend, 0x200);
        assert_eq!(
            payload.relocations[3].offset,
            (ACT_INVOCATION_HEADER_SIZE + 8) as u64
        );
    }

    #[test]
    fn unknown_kernel_is_fatal() {
        let (module, func, alloc, mut act) = setup();
        act.kernel = crate::ir::KernelId(9);
        let err = serialize_act_kernel(&module, &func, &alloc, TaskId(0), &act, 0, 0).unwrap_err();
        assert!(matches!(err, CompileError::MissingOperand { .. }));
    }
}
