//! The device contract: the narrow surface a GPU backend implements.
//!
//! A [`ComputePipeline`](super::ComputePipeline) never touches a graphics
//! API directly. It creates resources, compiles programs and submits work
//! through this trait, identifying everything by opaque ids. Devices are
//! shared (`Arc<dyn Device>`) and must be usable from any thread.

use tokio::sync::oneshot;

use crate::addressing::TextureSize;
use crate::codegen::Target;
use crate::context::{ElementFormat, KernelContext};
use crate::error::DeviceError;

// ─── Handles ───────────────────────────────────────────────────────

/// A buffer or texture owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub u64);

/// A compiled shader program owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramId(pub u64);

/// Signal a device fires once submitted work has finished.
pub type CompletionSignal = oneshot::Receiver<Result<(), DeviceError>>;

// ─── Submission ────────────────────────────────────────────────────

/// What a kernel binding is attached to for one submission.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundResource {
    /// Device memory holding `elements` logical elements.
    Memory {
        name: String,
        resource: ResourceId,
        elements: usize,
    },
    /// A plain uniform value.
    Value { name: String, value: Vec<f32> },
}

impl BoundResource {
    pub fn name(&self) -> &str {
        match self {
            BoundResource::Memory { name, .. } | BoundResource::Value { name, .. } => name,
        }
    }
}

/// How the work of one submission is launched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Workload {
    /// Native: a compute dispatch of this many workgroups.
    Dispatch { groups: [u32; 3] },
    /// Emulated: a full-screen draw into `output`, one fragment per texel.
    /// Only the first `texel_count` texels carry results.
    Draw {
        output: ResourceId,
        size: TextureSize,
        texel_count: u32,
    },
}

/// Everything besides the bindings that a submission needs.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitParams {
    pub workload: Workload,
    /// Current values of the runtime defines, in declaration order.
    pub defines: Vec<(String, f32)>,
    /// Times the workload runs back to back. On the emulated target the
    /// drawn output is copied into the output texture between runs.
    pub iterations: u32,
}

/// Range of floats to read from a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRegion {
    pub offset: usize,
    pub len: usize,
}

impl ReadRegion {
    pub fn whole(len: usize) -> Self {
        Self { offset: 0, len }
    }
}

// ─── Device ────────────────────────────────────────────────────────

/// A backend able to run generated kernels.
///
/// Buffers hold std430-laid-out floats; textures hold RGBA32F texels in
/// row-major order. Integer formats are carried as `f32` values and
/// converted by the device where its memory needs raw bits.
pub trait Device: Send + Sync {
    /// Human-readable device name, used in errors and logs.
    fn name(&self) -> &str;

    /// Whether programs for `target` can be compiled and run.
    fn supports(&self, target: Target) -> bool;

    /// Compile generated source for `target`.
    fn compile(
        &self,
        target: Target,
        source: &str,
        context: &KernelContext,
    ) -> Result<ProgramId, DeviceError>;

    /// Create a storage buffer initialized with `data`.
    fn create_buffer(
        &self,
        label: &str,
        format: ElementFormat,
        data: &[f32],
    ) -> Result<ResourceId, DeviceError>;

    /// Create an RGBA32F texture initialized with `texels`.
    fn create_texture_2d(
        &self,
        label: &str,
        size: TextureSize,
        texels: &[f32],
    ) -> Result<ResourceId, DeviceError>;

    /// Overwrite the contents of a resource from its start.
    fn write(&self, resource: ResourceId, data: &[f32]) -> Result<(), DeviceError>;

    /// Launch `program`. Errors returned here mean nothing was submitted;
    /// errors during execution arrive through the signal.
    fn submit(
        &self,
        program: ProgramId,
        bindings: &[BoundResource],
        params: &SubmitParams,
    ) -> Result<CompletionSignal, DeviceError>;

    /// Copy floats out of a resource.
    fn read_back(&self, resource: ResourceId, region: ReadRegion) -> Result<Vec<f32>, DeviceError>;

    /// Release a resource. Unknown ids are ignored.
    fn destroy(&self, resource: ResourceId);

    /// Release a program. Unknown ids are ignored.
    fn destroy_program(&self, program: ProgramId);
}
