//! Runtime: the device contract, compute pipelines and the host scheduler.
//!
//! Backends implement [`Device`]; everything above it is backend-neutral.
//! `ReferenceDevice` runs kernels on the CPU with the memory rules of
//! each target, `crate::gpu::WgpuDevice` runs native kernels on a GPU.
//!
//! ```text
//! Bundle ─┐
//!         ├→ ComputePipeline ──submit──→ dyn Device ──signal──→ Completion
//! context ┘        ↑
//!            ComputeSystem ← Scheduler (initialize / tick / shutdown)
//! ```

pub mod artifact;
mod completion;
pub mod device;
mod pipeline;
pub mod reference;
pub mod system;

#[cfg(test)]
mod tests;

pub use artifact::Bundle;
pub use completion::Completion;
pub use device::{
    BoundResource, CompletionSignal, Device, ProgramId, ReadRegion, ResourceId, SubmitParams,
    Workload,
};
pub use pipeline::{ComputePipeline, PipelineState};
pub use reference::{HostKernel, Invocation, KernelMemory, ReferenceDevice};
pub use system::{CompletedCallback, ComputeSystem, Scheduler, System, TickFuture};
