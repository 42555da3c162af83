#![forbid(unsafe_code)]

//! The interpreter for loaded Icon images.
//!
//! Values are [`Desc`] descriptors; heap objects live in an [`iconx_gc::Heap`] of [`Block`]s.
//! Execution is a single dispatch loop over a stack of descriptor slots interleaved with
//! procedure, expression and generator frame markers. Co-expressions own their own stacks and
//! are switched by swapping the active stack with the one stored in their block.

mod block;
mod builtins;
mod compare;
mod convert;
mod desc;
mod error;
mod generators;
mod metrics;
mod ops;
mod show;
mod structs;
mod vm;

pub use block::Block;
pub use desc::{Desc, Loc, ProcRef, Qual, Trapped, TrappedKeyword};
pub use error::{RunError, error_message};
pub use metrics::VmMetrics;
pub use vm::{Outcome, RunReport, Vm, VmConfig, VmIo};

/// Names of the builtin functions, in function-table order.
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    builtins::FUNCTIONS.iter().map(|f| f.name)
}
