// Driver binary exposing the export directions of the back-end over a built-in
// sample network (one DMA-in / DMA-out pair staged through CMX behind a barrier).
// The architecture is selected by flag before any pipeline work, matching the rule
// that generation selection happens ahead of pass registration. Real deployments
// feed the library from the graph importer; this driver exists to exercise the
// pipeline end to end and inspect outputs.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use npuc::core::{CompilationSession, CompilerContext};
use npuc::ir::{BufferDesc, DmaTransfer, ElemType, Function, MemoryKind, Module, Task, TaskKind};
use npuc::pipeline::{compile_module, CompileOptions, OutputFormat};
use npuc::LegalizeOptions;

#[derive(Parser)]
#[command(name = "npuc-translate", about = "NPU back-end translation driver")]
struct Cli {
    /// Target architecture (npu37xx, npu40xx).
    #[arg(long, default_value = "npu37xx")]
    arch: String,

    /// Merge wait barriers iteratively until one per task remains.
    #[arg(long)]
    iterative_barrier_merge: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export the sample network as a wire-format blob.
    ExportBlob {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Export the sample network as a relocatable ELF image.
    ExportElf {
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// DDR -> CMX -> DDR staging pipeline with one barrier between the copies.
fn sample_module() -> Module {
    let mut module = Module::new("sample");
    let mut func = Function::new("main");

    let input = func.add_buffer(
        BufferDesc::new("input", MemoryKind::Ddr, ElemType::F16, vec![1, 3, 224, 224])
            .with_fixed_address(0),
    );
    let staged = func.add_buffer(BufferDesc::new(
        "staged",
        MemoryKind::CmxNn,
        ElemType::F16,
        vec![1, 3, 224, 224],
    ));
    let output = func.add_buffer(
        BufferDesc::new("output", MemoryKind::Ddr, ElemType::F16, vec![1, 3, 224, 224])
            .with_fixed_address(0x100000),
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

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = CompilerContext::from_arch_name(&cli.arch)?;
    let arena = bumpalo::Bump::new();
    let session = CompilationSession::new(&arena);
    let legalize = LegalizeOptions {
        merge_wait_barriers_iteratively: cli.iterative_barrier_merge,
    };
    let mut module = sample_module();

    let (image, path) = match cli.command {
        Command::ExportBlob { output } => {
            let opts = CompileOptions {
                output: OutputFormat::Blob,
                legalize,
            };
            (compile_module(&mut module, &ctx, &session, opts)?, output)
        }
        Command::ExportElf { output } => {
            let opts = CompileOptions {
                output: OutputFormat::Elf,
                legalize,
            };
            (compile_module(&mut module, &ctx, &session, opts)?, output)
        }
    };

    fs::write(&path, &image)?;
    println!("wrote {} bytes to {}", image.len(), path.display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
