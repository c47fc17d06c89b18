// This module re-parses a finished blob into a structural summary: header fields,
// per-executor task counts, barrier producer/consumer counts, tensor shapes and the
// embedded kernel payload offsets. It exists for the import direction of the tool
// family and for round-trip validation — a serialized module must come back with
// identical counts and shapes. Parsing is strict: every truncation or unknown code
// is a MalformedBlob error, never a best-effort guess.

//! Blob re-parsing.

use crate::core::{ArchKind, CompileError, CompileResult};
use crate::ir::ExecutorKind;

use super::blob::{BLOB_MAGIC, BLOB_VERSION, HEADER_SIZE};
use super::builder::RESERVED_OFFSET;

/// One parsed barrier table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierSummary {
    pub physical_id: u16,
    pub producer_count: u16,
    pub consumer_count: u16,
}

/// One parsed task entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub executor: ExecutorKind,
    pub task_index: u32,
    /// Virtual wait-barrier ids (from the virtual field of each pair).
    pub wait_barriers: Vec<u32>,
    pub update_barriers: Vec<u32>,
    pub payload_len: u32,
    pub relocation_count: u32,
}

/// One parsed kernel data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSummary {
    pub name: String,
    pub text_offset: u32,
    pub text_len: u32,
    pub data_offset: u32,
    pub data_len: u32,
}

/// Structural summary of a parsed blob.
#[derive(Debug, Clone)]
pub struct BlobSummary {
    pub version: u32,
    pub arch: ArchKind,
    pub name: String,
    pub input_count: u32,
    pub output_count: u32,
    pub task_count: u32,
    pub task_counts: Vec<(ExecutorKind, u32)>,
    pub tasks: Vec<TaskSummary>,
    pub tensor_names: Vec<String>,
    pub tensor_shapes: Vec<Vec<i64>>,
    pub tensor_addresses: Vec<u64>,
    pub barriers: Vec<BarrierSummary>,
    pub kernels: Vec<KernelSummary>,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at(buf: &'a [u8], pos: usize) -> CompileResult<Self> {
        if pos > buf.len() {
            return Err(truncated("section offset"));
        }
        Ok(Self { buf, pos })
    }

    fn take(&mut self, n: usize) -> CompileResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(truncated("field"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> CompileResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CompileResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> CompileResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> CompileResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> CompileResult<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn str_field(&mut self) -> CompileResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CompileError::MalformedBlob {
            reason: "string field is not UTF-8".to_string(),
        })
    }
}

fn truncated(what: &str) -> CompileError {
    CompileError::MalformedBlob {
        reason: format!("truncated {what}"),
    }
}

/// Whether a header offset field points at a present section.
fn present(offset: u32) -> Option<usize> {
    (offset != RESERVED_OFFSET && offset != 0).then_some(offset as usize)
}

/// Parse a blob back into its structural summary.
pub fn parse_blob(buf: &[u8]) -> CompileResult<BlobSummary> {
    if buf.len() < HEADER_SIZE {
        return Err(truncated("header"));
    }
    let mut header = Cursor::at(buf, 0)?;
    if header.take(4)? != BLOB_MAGIC {
        return Err(CompileError::MalformedBlob {
            reason: "bad magic".to_string(),
        });
    }
    let version = header.u32()?;
    if version != BLOB_VERSION {
        return Err(CompileError::MalformedBlob {
            reason: format!("unsupported blob version {version}"),
        });
    }
    let arch_code = header.u32()?;
    let arch = ArchKind::from_code(arch_code).ok_or_else(|| CompileError::MalformedBlob {
        reason: format!("unknown device code {arch_code}"),
    })?;
    let task_lists_off = header.u32()?;
    let tensors_off = header.u32()?;
    let barriers_off = header.u32()?;
    let _binary_off = header.u32()?;
    let kernel_off = header.u32()?;
    let input_count = header.u32()?;
    let output_count = header.u32()?;
    let _io_off = header.u32()?;
    let task_count = header.u32()?;
    let name_off = header.u32()?;

    let name = match present(name_off) {
        Some(pos) => Cursor::at(buf, pos)?.str_field()?,
        None => String::new(),
    };

    // Tensor table.
    let mut tensor_names = Vec::new();
    let mut tensor_shapes = Vec::new();
    let mut tensor_addresses = Vec::new();
    if let Some(pos) = present(tensors_off) {
        let mut c = Cursor::at(buf, pos)?;
        let count = c.u32()?;
        for _ in 0..count {
            tensor_names.push(c.str_field()?);
            let _dtype = c.u8()?;
            let _location = c.u8()?;
            let _swizzling = c.u8()?;
            let _pad = c.u8()?;
            tensor_addresses.push(c.u64()?);
            let dims = c.u32()? as usize;
            let mut shape = Vec::with_capacity(dims);
            for _ in 0..dims {
                shape.push(c.i64()?);
            }
            tensor_shapes.push(shape);
            let strides = c.u32()? as usize;
            for _ in 0..strides {
                c.u64()?;
            }
            let zps = c.u32()? as usize;
            for _ in 0..zps {
                c.i64()?;
            }
            let mults = c.u32()? as usize;
            for _ in 0..mults {
                c.u32()?;
            }
            let shifts = c.u32()? as usize;
            for _ in 0..shifts {
                c.u8()?;
            }
        }
    }

    // Barrier table.
    let mut barriers = Vec::new();
    if let Some(pos) = present(barriers_off) {
        let mut c = Cursor::at(buf, pos)?;
        let count = c.u32()?;
        for _ in 0..count {
            let physical_id = c.u16()?;
            let producer_count = c.u16()?;
            let consumer_count = c.u16()?;
            let _pad = c.u16()?;
            barriers.push(BarrierSummary {
                physical_id,
                producer_count,
                consumer_count,
            });
        }
    }

    // Task lists.
    let mut task_counts = Vec::new();
    let mut tasks = Vec::new();
    if let Some(pos) = present(task_lists_off) {
        let mut c = Cursor::at(buf, pos)?;
        let list_count = c.u32()?;
        let mut lists = Vec::new();
        for _ in 0..list_count {
            let code = c.u32()?;
            let executor =
                ExecutorKind::from_code(code as u8).ok_or_else(|| CompileError::MalformedBlob {
                    reason: format!("unknown executor code {code}"),
                })?;
            let count = c.u32()?;
            let offset = c.u32()?;
            task_counts.push((executor, count));
            lists.push((executor, count, offset));
        }
        for (executor, count, offset) in lists {
            if count == 0 {
                continue;
            }
            let Some(pos) = present(offset) else {
                return Err(truncated("task list"));
            };
            let mut c = Cursor::at(buf, pos)?;
            for _ in 0..count {
                let task_index = c.u32()?;
                let wait_barriers = parse_barrier_refs(&mut c)?;
                let update_barriers = parse_barrier_refs(&mut c)?;
                let inputs = c.u32()? as usize;
                for _ in 0..inputs {
                    c.u32()?;
                }
                let outputs = c.u32()? as usize;
                for _ in 0..outputs {
                    c.u32()?;
                }
                let payload_len = c.u32()?;
                c.take(payload_len as usize)?;
                let relocation_count = c.u32()?;
                for _ in 0..relocation_count {
                    c.u32()?;
                    c.u64()?;
                    c.u32()?;
                    c.i64()?;
                }
                tasks.push(TaskSummary {
                    executor,
                    task_index,
                    wait_barriers,
                    update_barriers,
                    payload_len,
                    relocation_count,
                });
            }
        }
    }

    // Kernel data table.
    let mut kernels = Vec::new();
    if let Some(pos) = present(kernel_off) {
        let mut c = Cursor::at(buf, pos)?;
        let count = c.u32()?;
        for _ in 0..count {
            let name = c.str_field()?;
            let text_len = c.u32()?;
            let data_len = c.u32()?;
            let text_offset = c.u32()?;
            let data_offset = c.u32()?;
            kernels.push(KernelSummary {
                name,
                text_offset,
                text_len,
                data_offset,
                data_len,
            });
        }
    }

    Ok(BlobSummary {
        version,
        arch,
        name,
        input_count,
        output_count,
        task_count,
        task_counts,
        tasks,
        tensor_names,
        tensor_shapes,
        tensor_addresses,
        barriers,
        kernels,
    })
}

/// Parse one wait/update reference list; both fields of each pair hold
/// the virtual id and must agree.
fn parse_barrier_refs(c: &mut Cursor<'_>) -> CompileResult<Vec<u32>> {
    let count = c.u32()? as usize;
    let mut refs = Vec::with_capacity(count);
    for _ in 0..count {
        let physical_field = c.u32()?;
        let virtual_field = c.u32()?;
        if physical_field != virtual_field {
            return Err(CompileError::MalformedBlob {
                reason: "barrier reference pair disagrees".to_string(),
            });
        }
        refs.push(virtual_field);
    }
    Ok(refs)
}
