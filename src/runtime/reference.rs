//! Software device executing host-side kernels with GPU memory semantics.
//!
//! Programs are "compiled" by pairing the generated source with a
//! [`HostKernel`] registered under the kernel's name. Execution follows
//! the target's rules: a native dispatch runs every invocation in
//! hardware order against shared storage buffers; an emulated draw runs
//! one fragment per output texel, reads textures through the f32 address
//! translation and may only write its own output texel.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use super::device::{
    BoundResource, CompletionSignal, Device, ProgramId, ReadRegion, ResourceId, SubmitParams,
    Workload,
};
use crate::addressing::{
    derive_emulated_builtins, fragment_coord, native_invocations, BufferMemory, Builtins,
    DispatchDims, Element, LinearMemory, TextureLayout, TextureMemory, TextureSize,
    TEXEL_CHANNELS,
};
use crate::codegen::Target;
use crate::context::{ElementFormat, KernelContext};
use crate::error::{AddressError, DeviceError};

/// Host implementation of a kernel body, run once per invocation.
pub type HostKernel =
    Arc<dyn Fn(&Invocation<'_>, &mut KernelMemory) -> Result<(), DeviceError> + Send + Sync>;

/// What one invocation of a host kernel can see.
pub struct Invocation<'a> {
    pub builtins: Builtins,
    pub target: Target,
    /// Zero-based run within `maxIteration`.
    pub iteration: u32,
    constants: &'a BTreeMap<String, Vec<f32>>,
}

impl Invocation<'_> {
    /// `globalInvocationID` along `axis`.
    pub fn global_id(&self, axis: usize) -> usize {
        self.builtins.global_invocation_id[axis] as usize
    }

    /// Value of a define: the runtime value if one was supplied, else the
    /// compile-time one.
    pub fn define(&self, name: &str) -> Option<f32> {
        self.constants.get(name).and_then(|v| v.first().copied())
    }

    /// Value of a plain uniform. Unbound uniforms read as `None`.
    pub fn uniform(&self, name: &str) -> Option<&[f32]> {
        self.constants.get(name).map(Vec::as_slice)
    }
}

// ─── Kernel memory ─────────────────────────────────────────────────

enum Memory {
    Buffer(BufferMemory),
    Texture(TextureMemory),
}

impl Memory {
    fn view(&self) -> &dyn LinearMemory {
        match self {
            Memory::Buffer(m) => m,
            Memory::Texture(m) => m,
        }
    }

    fn view_mut(&mut self) -> &mut dyn LinearMemory {
        match self {
            Memory::Buffer(m) => m,
            Memory::Texture(m) => m,
        }
    }
}

struct Slot {
    readonly: bool,
    memory: Memory,
}

/// Render target of the draw in progress.
struct DrawScope {
    output: String,
    pending: TextureMemory,
    texel: usize,
}

/// Bindings as seen from inside a host kernel.
pub struct KernelMemory {
    invocation: usize,
    slots: BTreeMap<String, Slot>,
    draw: Option<DrawScope>,
}

impl KernelMemory {
    fn new() -> Self {
        Self {
            invocation: 0,
            slots: BTreeMap::new(),
            draw: None,
        }
    }

    fn attach(&mut self, name: &str, readonly: bool, memory: Memory) {
        self.slots
            .insert(name.to_string(), Slot { readonly, memory });
    }

    fn kernel_error(&self, reason: String) -> DeviceError {
        DeviceError::Kernel {
            invocation: self.invocation,
            reason,
        }
    }

    fn slot(&self, name: &str) -> Result<&Slot, DeviceError> {
        self.slots
            .get(name)
            .ok_or_else(|| self.kernel_error(format!("no binding named '{}'", name)))
    }

    /// Element count of a binding.
    pub fn len(&self, name: &str) -> Option<usize> {
        self.slots.get(name).map(|s| s.memory.view().len())
    }

    pub fn load(&self, name: &str, index: usize) -> Result<Element, DeviceError> {
        let view = self.slot(name)?.memory.view();
        view.get(index).ok_or_else(|| {
            AddressError::OutOfBounds {
                index,
                len: view.len(),
            }
            .into()
        })
    }

    pub fn load_scalar(&self, name: &str, index: usize) -> Result<f32, DeviceError> {
        Ok(self.load(name, index)?.x())
    }

    /// Write one element. On the emulated target only elements of the
    /// current fragment's own output texel are writable.
    pub fn store(&mut self, name: &str, index: usize, element: Element) -> Result<(), DeviceError> {
        let slot = self.slot(name)?;
        if slot.readonly {
            return Err(self.kernel_error(format!("binding '{}' is readonly", name)));
        }

        match &mut self.draw {
            Some(scope) => {
                let ept = scope.pending.layout().elements_per_texel as usize;
                if scope.output != name || index / ept != scope.texel {
                    return Err(DeviceError::ScatterWrite {
                        binding: name.to_string(),
                        index,
                        texel: scope.texel,
                    });
                }
                scope.pending.put(index, element)?;
            }
            None => {
                if let Some(slot) = self.slots.get_mut(name) {
                    slot.memory.view_mut().put(index, element)?;
                }
            }
        }
        Ok(())
    }

    pub fn store_scalar(&mut self, name: &str, index: usize, value: f32) -> Result<(), DeviceError> {
        self.store(name, index, Element::scalar(value))
    }

    /// Start a draw into the output texture; writes collect in a copy so
    /// fragments keep reading the previous contents.
    fn begin_draw(&mut self, output: &str) -> Result<(), String> {
        let slot = self
            .slots
            .get(output)
            .ok_or_else(|| format!("output binding '{}' is not bound", output))?;
        let Memory::Texture(texture) = &slot.memory else {
            return Err(format!("output binding '{}' is not a texture", output));
        };
        self.draw = Some(DrawScope {
            output: output.to_string(),
            pending: texture.clone(),
            texel: 0,
        });
        Ok(())
    }

    fn end_draw(&mut self) {
        if let Some(scope) = self.draw.take() {
            if let Some(slot) = self.slots.get_mut(&scope.output) {
                slot.memory = Memory::Texture(scope.pending);
            }
        }
    }

    fn enter(&mut self, invocation: usize) {
        self.invocation = invocation;
        if let Some(scope) = &mut self.draw {
            scope.texel = invocation;
        }
    }

    fn detach(&mut self, name: &str) -> Option<Vec<f32>> {
        self.slots.remove(name).map(|slot| match slot.memory {
            Memory::Buffer(m) => m.into_raw(),
            Memory::Texture(m) => m.into_texels(),
        })
    }
}

// ─── Device ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Buffer,
    Texture(TextureSize),
}

struct Stored {
    label: String,
    kind: Kind,
    data: Vec<f32>,
}

#[derive(Clone)]
struct Program {
    target: Target,
    context: Arc<KernelContext>,
    kernel: HostKernel,
}

#[derive(Default)]
struct State {
    next_id: u64,
    resources: BTreeMap<u64, Stored>,
    programs: BTreeMap<u64, Program>,
    released_resources: usize,
    released_programs: usize,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// CPU device running registered [`HostKernel`]s.
pub struct ReferenceDevice {
    name: String,
    targets: Vec<Target>,
    kernels: RwLock<BTreeMap<String, HostKernel>>,
    state: Mutex<State>,
}

impl Default for ReferenceDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceDevice {
    /// A device supporting both targets.
    pub fn new() -> Self {
        Self::with_targets(&Target::ALL)
    }

    pub fn with_targets(targets: &[Target]) -> Self {
        Self {
            name: "reference".to_string(),
            targets: targets.to_vec(),
            kernels: RwLock::new(BTreeMap::new()),
            state: Mutex::new(State::default()),
        }
    }

    /// Register the host body of kernel `name`.
    pub fn register<F>(&self, name: &str, kernel: F)
    where
        F: Fn(&Invocation<'_>, &mut KernelMemory) -> Result<(), DeviceError> + Send + Sync + 'static,
    {
        self.kernels.write().insert(name.to_string(), Arc::new(kernel));
    }

    /// Resources currently alive.
    pub fn live_resources(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Programs currently alive.
    pub fn live_programs(&self) -> usize {
        self.state.lock().programs.len()
    }

    /// Resources and programs released so far.
    pub fn released(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.released_resources, state.released_programs)
    }

    fn submission_error(&self, reason: String) -> DeviceError {
        DeviceError::Submission {
            device: self.name.clone(),
            reason,
        }
    }

    fn create(&self, label: &str, kind: Kind, data: Vec<f32>) -> ResourceId {
        let mut state = self.state.lock();
        let id = state.allocate();
        state.resources.insert(
            id,
            Stored {
                label: label.to_string(),
                kind,
                data,
            },
        );
        ResourceId(id)
    }

    /// Attach every bound memory resource to a fresh [`KernelMemory`].
    fn gather(
        &self,
        state: &State,
        program: &Program,
        bindings: &[BoundResource],
        constants: &mut BTreeMap<String, Vec<f32>>,
    ) -> Result<(KernelMemory, Vec<(String, ResourceId)>), DeviceError> {
        let context = &program.context;
        let mut memory = KernelMemory::new();
        let mut attached = Vec::new();

        for bound in bindings {
            match bound {
                BoundResource::Value { name, value } => {
                    constants.insert(name.clone(), value.clone());
                }
                BoundResource::Memory {
                    name,
                    resource,
                    elements,
                } => {
                    let binding = context.binding(name).ok_or_else(|| {
                        self.submission_error(format!(
                            "kernel '{}' has no binding '{}'",
                            context.name, name
                        ))
                    })?;
                    let stored = state.resources.get(&resource.0).ok_or_else(|| {
                        DeviceError::UnknownResource {
                            device: self.name.clone(),
                            id: resource.0,
                        }
                    })?;
                    let slot = match stored.kind {
                        Kind::Buffer => Memory::Buffer(BufferMemory::from_raw(
                            binding.format,
                            *elements,
                            stored.data.clone(),
                        )),
                        Kind::Texture(size) => {
                            let per_texel = if *name == context.output.name {
                                context.output.output_elements_per_texel
                            } else {
                                1
                            };
                            let layout = TextureLayout {
                                size,
                                components: binding.format.components,
                                elements_per_texel: per_texel,
                                elements: *elements,
                            };
                            Memory::Texture(TextureMemory::from_texels(layout, stored.data.clone()))
                        }
                    };
                    memory.attach(name, binding.readonly, slot);
                    attached.push((name.clone(), *resource));
                }
            }
        }
        Ok((memory, attached))
    }

    fn execute(
        &self,
        program: &Program,
        memory: &mut KernelMemory,
        constants: &BTreeMap<String, Vec<f32>>,
        params: &SubmitParams,
    ) -> Result<(), DeviceError> {
        let context = &program.context;
        for iteration in 0..params.iterations.max(1) {
            match params.workload {
                Workload::Dispatch { groups } => {
                    let dims = DispatchDims::new(groups, context.thread_group_size);
                    for builtins in native_invocations(dims) {
                        memory.enter(builtins.global_invocation_index as usize);
                        let invocation = Invocation {
                            builtins,
                            target: program.target,
                            iteration,
                            constants,
                        };
                        (program.kernel)(&invocation, memory)?;
                    }
                }
                Workload::Draw {
                    size, texel_count, ..
                } => {
                    let dims = DispatchDims::from_context(context);
                    memory
                        .begin_draw(&context.output.name)
                        .map_err(|reason| self.submission_error(reason))?;
                    for texel in 0..texel_count {
                        let coord = fragment_coord(texel, size);
                        memory.enter(texel as usize);
                        let invocation = Invocation {
                            builtins: derive_emulated_builtins(coord, size, dims),
                            target: program.target,
                            iteration,
                            constants,
                        };
                        (program.kernel)(&invocation, memory)?;
                    }
                    memory.end_draw();
                }
            }
        }
        Ok(())
    }
}

impl Device for ReferenceDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, target: Target) -> bool {
        self.targets.contains(&target)
    }

    fn compile(
        &self,
        target: Target,
        source: &str,
        context: &KernelContext,
    ) -> Result<ProgramId, DeviceError> {
        let failure = |reason: &str| DeviceError::Compilation {
            device: self.name.clone(),
            kernel: context.name.clone(),
            target,
            reason: reason.to_string(),
        };
        if !self.supports(target) {
            return Err(DeviceError::UnsupportedTarget {
                device: self.name.clone(),
                target,
            });
        }
        if !source.contains("void main") {
            return Err(failure("source has no entry point"));
        }
        let kernel = self
            .kernels
            .read()
            .get(&context.name)
            .cloned()
            .ok_or_else(|| failure("no host kernel registered under this name"))?;

        let mut state = self.state.lock();
        let id = state.allocate();
        state.programs.insert(
            id,
            Program {
                target,
                context: Arc::new(context.clone()),
                kernel,
            },
        );
        tracing::debug!(device = %self.name, kernel = %context.name, target = %target, "compiled program");
        Ok(ProgramId(id))
    }

    fn create_buffer(
        &self,
        label: &str,
        _format: ElementFormat,
        data: &[f32],
    ) -> Result<ResourceId, DeviceError> {
        Ok(self.create(label, Kind::Buffer, data.to_vec()))
    }

    fn create_texture_2d(
        &self,
        label: &str,
        size: TextureSize,
        texels: &[f32],
    ) -> Result<ResourceId, DeviceError> {
        let expected = size.texel_count() * TEXEL_CHANNELS;
        if texels.len() != expected {
            return Err(DeviceError::ResourceCreation {
                device: self.name.clone(),
                label: label.to_string(),
                reason: format!(
                    "{}x{} texture needs {} floats, got {}",
                    size.width,
                    size.height,
                    expected,
                    texels.len()
                ),
            });
        }
        Ok(self.create(label, Kind::Texture(size), texels.to_vec()))
    }

    fn write(&self, resource: ResourceId, data: &[f32]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let stored = state
            .resources
            .get_mut(&resource.0)
            .ok_or_else(|| DeviceError::UnknownResource {
                device: self.name.clone(),
                id: resource.0,
            })?;
        if data.len() > stored.data.len() {
            return Err(DeviceError::ResourceCreation {
                device: self.name.clone(),
                label: stored.label.clone(),
                reason: format!(
                    "write of {} floats into a resource of {}",
                    data.len(),
                    stored.data.len()
                ),
            });
        }
        stored.data[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn submit(
        &self,
        program: ProgramId,
        bindings: &[BoundResource],
        params: &SubmitParams,
    ) -> Result<CompletionSignal, DeviceError> {
        let mut state = self.state.lock();
        let compiled = state
            .programs
            .get(&program.0)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownProgram {
                device: self.name.clone(),
                id: program.0,
            })?;

        match (compiled.target, params.workload) {
            (Target::Native, Workload::Dispatch { .. }) => {}
            (Target::Emulated, Workload::Draw { output, .. }) => {
                let drawn_into_output = bindings.iter().any(|b| {
                    matches!(b, BoundResource::Memory { name, resource, .. }
                        if *name == compiled.context.output.name && *resource == output)
                });
                if !drawn_into_output {
                    return Err(self.submission_error(
                        "draw target is not the output binding's texture".to_string(),
                    ));
                }
            }
            (target, workload) => {
                return Err(
                    self.submission_error(format!("{:?} cannot run a {} program", workload, target))
                );
            }
        }

        let mut constants: BTreeMap<String, Vec<f32>> = compiled
            .context
            .defines
            .iter()
            .map(|d| (d.name.clone(), vec![d.value as f32]))
            .collect();
        for (name, value) in &params.defines {
            constants.insert(name.clone(), vec![*value]);
        }

        let (mut memory, attached) = self.gather(&state, &compiled, bindings, &mut constants)?;
        let outcome = self.execute(&compiled, &mut memory, &constants, params);
        if outcome.is_ok() {
            for (name, resource) in attached {
                let data = memory.detach(&name);
                if let (Some(stored), Some(data)) = (state.resources.get_mut(&resource.0), data) {
                    stored.data = data;
                }
            }
        }
        tracing::debug!(
            device = %self.name,
            kernel = %compiled.context.name,
            ok = outcome.is_ok(),
            "reference submission finished"
        );

        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Ok(rx)
    }

    fn read_back(&self, resource: ResourceId, region: ReadRegion) -> Result<Vec<f32>, DeviceError> {
        let state = self.state.lock();
        let stored = state
            .resources
            .get(&resource.0)
            .ok_or_else(|| DeviceError::UnknownResource {
                device: self.name.clone(),
                id: resource.0,
            })?;
        stored
            .data
            .get(region.offset..region.offset + region.len)
            .map(<[f32]>::to_vec)
            .ok_or_else(|| DeviceError::ReadBack {
                device: self.name.clone(),
                reason: format!(
                    "region {}..{} outside '{}' ({} floats)",
                    region.offset,
                    region.offset + region.len,
                    stored.label,
                    stored.data.len()
                ),
            })
    }

    fn destroy(&self, resource: ResourceId) {
        let mut state = self.state.lock();
        if state.resources.remove(&resource.0).is_some() {
            state.released_resources += 1;
        }
    }

    fn destroy_program(&self, program: ProgramId) {
        let mut state = self.state.lock();
        if state.programs.remove(&program.0).is_some() {
            state.released_programs += 1;
        }
    }
}
