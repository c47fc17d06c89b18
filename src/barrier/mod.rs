//! Barrier dependency graph and legalization.
//!
//! The scheduler hands this subsystem an arbitrary wait/update assignment;
//! it leaves behind one that the hardware can execute: at most one wait
//! barrier per task, slot budgets respected, ordering intact, physical ids
//! assigned.

pub mod info;
pub mod legalize;

pub use info::BarrierInfo;
pub use legalize::{
    legalize_barriers, order_execution_tasks_and_barriers, post_process_barrier_ops,
    verify_barrier_slots, verify_control_graph_split, verify_one_wait_barrier_per_task,
    LegalizeOptions, LegalizeReport,
};
