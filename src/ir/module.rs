// This module defines the function and module containers of the scheduled IR.
// A Function owns flat Vec tables of buffers, tasks, virtual barriers and call
// sites; a Module owns the functions, the entry-point list and the kernel blobs
// shared by ActShave tasks. Call sites are linearized to a task position so the
// liveness machinery can treat a call boundary as a single scheduling point.
// Everything is index-addressed; the module is the unit of compilation.

//! Functions, call sites and the module container.

use std::collections::HashMap;

use crate::core::{CompileError, CompileResult};

use super::buffer::{BufferDesc, BufferId};
use super::task::{BarrierId, KernelId, Task, TaskId, VirtualBarrier};

/// Handle of a function within the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A call from one function to another, linearized between two task
/// positions: tasks before `position` run before the callee, tasks at or
/// after it run after the callee returns.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub callee: FuncId,
    pub position: usize,
    /// Caller buffers handed to the callee as its network inputs/outputs.
    pub operands: Vec<BufferId>,
}

/// ActShave kernel code and data, embedded once per module.
#[derive(Debug, Clone)]
pub struct KernelBlob {
    pub name: String,
    pub text: Vec<u8>,
    pub data: Vec<u8>,
}

/// One scheduled function: ordered tasks plus the tables they index.
#[derive(Debug, Clone, Default)]
pub struct Function {
    pub name: String,
    pub buffers: Vec<BufferDesc>,
    pub tasks: Vec<Task>,
    pub barriers: Vec<VirtualBarrier>,
    pub calls: Vec<CallSite>,
    pub inputs: Vec<BufferId>,
    pub outputs: Vec<BufferId>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_buffer(&mut self, desc: BufferDesc) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(desc);
        id
    }

    pub fn add_task(&mut self, task: Task) -> TaskId {
        let id = TaskId(self.tasks.len() as u32);
        self.tasks.push(task);
        id
    }

    pub fn add_barrier(&mut self) -> BarrierId {
        let id = BarrierId(self.barriers.len() as u32);
        self.barriers.push(VirtualBarrier::default());
        id
    }

    pub fn buffer(&self, id: BufferId) -> &BufferDesc {
        &self.buffers[id.index()]
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }

    /// Resolve a view chain to the buffer that owns the storage.
    pub fn root_of(&self, id: BufferId) -> BufferId {
        let mut cur = id;
        while let Some(src) = self.buffers[cur.index()].alias_of {
            cur = src;
        }
        cur
    }

    /// Verify buffer attributes before the allocator runs.
    pub fn verify(&self) -> CompileResult<()> {
        for buf in &self.buffers {
            buf.verify()?;
        }
        Ok(())
    }
}

/// The unit of compilation.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    /// Functions the runtime may invoke directly. Multiple entries share
    /// the device's static memory pools.
    pub entry_points: Vec<FuncId>,
    pub kernels: Vec<KernelBlob>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_function(&mut self, func: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(func);
        id
    }

    pub fn add_kernel(&mut self, blob: KernelBlob) -> KernelId {
        let id = KernelId(self.kernels.len() as u32);
        self.kernels.push(blob);
        id
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    pub fn find_function(&self, name: &str) -> CompileResult<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
            .ok_or_else(|| CompileError::FunctionNotFound {
                name: name.to_string(),
            })
    }

    /// Callers of each function, with the call sites that reach it.
    pub fn callers_of(&self) -> HashMap<FuncId, Vec<(FuncId, usize)>> {
        let mut map: HashMap<FuncId, Vec<(FuncId, usize)>> = HashMap::new();
        for (idx, func) in self.functions.iter().enumerate() {
            for (call_idx, call) in func.calls.iter().enumerate() {
                map.entry(call.callee)
                    .or_default()
                    .push((FuncId(idx as u32), call_idx));
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ElemType, MemoryKind};

    #[test]
    fn root_resolves_view_chains() {
        let mut func = Function::new("main");
        let base = func.add_buffer(BufferDesc::new(
            "base",
            MemoryKind::CmxNn,
            ElemType::U8,
            vec![64],
        ));
        let v1 = func.add_buffer(BufferDesc::view_of(
            "v1",
            base,
            &func.buffers[base.index()].clone(),
            vec![8, 8],
        ));
        let v2 = func.add_buffer(BufferDesc::view_of(
            "v2",
            v1,
            &func.buffers[v1.index()].clone(),
            vec![64],
        ));
        assert_eq!(func.root_of(v2), base);
        assert_eq!(func.root_of(base), base);
    }

    #[test]
    fn find_function_reports_missing() {
        let module = Module::new("net");
        assert!(module.find_function("main").is_err());
    }
}
