//! Compute Pipeline: one kernel, its device resources and its dispatches.
//!
//! ```text
//! Created ──bind──→ Bound ──dispatch──→ Dispatched ──→ Completed | Failed
//!    └──────────────────── destroy (any state) ──────────→ Destroyed
//! ```
//!
//! A pipeline owns every resource it creates on the device and releases
//! each exactly once, on [`ComputePipeline::destroy`] or on drop.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::artifact::Bundle;
use super::completion::{Completion, OutputLayout, Readback};
use super::device::{BoundResource, Device, ProgramId, ResourceId, SubmitParams, Workload};
use crate::addressing::{pack_buffer, pack_texels, TextureLayout, DEFAULT_MAX_TEXTURE_WIDTH};
use crate::codegen::{self, Target};
use crate::context::{Binding, BindingType, KernelContext};
use crate::error::{DeviceError, PipelineError, UsageError};

/// Lifecycle state of a [`ComputePipeline`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Bound,
    Dispatched,
    Completed,
    Failed,
    Destroyed,
}

/// State shared between a pipeline and its outstanding [`Completion`].
#[derive(Debug)]
pub(crate) struct DispatchStatus {
    pub(crate) state: PipelineState,
}

/// Device memory backing one buffer-like binding.
#[derive(Clone, Copy, Debug)]
struct Allocation {
    resource: ResourceId,
    layout: OutputLayout,
}

impl Allocation {
    fn elements(&self) -> usize {
        match self.layout {
            OutputLayout::Buffer { elements, .. } => elements,
            OutputLayout::Texture(layout) => layout.elements,
        }
    }
}

pub struct ComputePipeline {
    device: Arc<dyn Device>,
    context: Arc<KernelContext>,
    target: Target,
    source: String,
    program: ProgramId,
    max_texture_width: u32,
    memory: BTreeMap<String, Allocation>,
    values: BTreeMap<String, Vec<f32>>,
    defines: BTreeMap<String, f32>,
    status: Arc<Mutex<DispatchStatus>>,
}

impl ComputePipeline {
    /// Generate source for `target` from `context` and `main`, then
    /// compile it on `device`.
    pub fn new(
        device: Arc<dyn Device>,
        target: Target,
        context: Arc<KernelContext>,
        main: &str,
    ) -> Result<Self, PipelineError> {
        ensure_supported(device.as_ref(), target)?;
        let source = codegen::generate(target, &context, main)?;
        Self::compile(device, target, context, source)
    }

    /// Compile the precompiled source a bundle carries for `target`.
    /// Nothing is regenerated or re-validated.
    pub fn from_bundle(
        device: Arc<dyn Device>,
        target: Target,
        bundle: &Bundle,
    ) -> Result<Self, PipelineError> {
        ensure_supported(device.as_ref(), target)?;
        let source = bundle
            .shader(target)
            .ok_or_else(|| PipelineError::MissingShader {
                kernel: bundle.context.name.clone(),
                target,
            })?
            .to_string();
        Self::compile(device, target, Arc::new(bundle.context.clone()), source)
    }

    fn compile(
        device: Arc<dyn Device>,
        target: Target,
        context: Arc<KernelContext>,
        source: String,
    ) -> Result<Self, PipelineError> {
        let program = device.compile(target, &source, &context)?;
        let defines = context
            .runtime_defines()
            .map(|d| (d.name.clone(), d.value as f32))
            .collect();
        tracing::info!(
            kernel = %context.name,
            target = %target,
            device = device.name(),
            "pipeline created"
        );
        Ok(Self {
            device,
            context,
            target,
            source,
            program,
            max_texture_width: DEFAULT_MAX_TEXTURE_WIDTH,
            memory: BTreeMap::new(),
            values: BTreeMap::new(),
            defines,
            status: Arc::new(Mutex::new(DispatchStatus {
                state: PipelineState::Created,
            })),
        })
    }

    /// Cap the width of emulated textures created from now on.
    pub fn with_max_texture_width(mut self, width: u32) -> Self {
        self.max_texture_width = width.max(1);
        self
    }

    pub fn context(&self) -> &Arc<KernelContext> {
        &self.context
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// The source the device compiled.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> PipelineState {
        self.status.lock().state
    }

    fn kernel(&self) -> String {
        self.context.name.clone()
    }

    /// Reject calls on a destroyed pipeline or during a dispatch.
    fn ensure_idle(&self) -> Result<(), UsageError> {
        match self.state() {
            PipelineState::Destroyed => Err(UsageError::Destroyed {
                kernel: self.kernel(),
            }),
            PipelineState::Dispatched => Err(UsageError::DispatchInFlight {
                kernel: self.kernel(),
            }),
            _ => Ok(()),
        }
    }

    /// Upload `data` (flat scalars, `components` per element) to binding
    /// `name`. Memory is reused when the element count is unchanged.
    pub fn bind(&mut self, name: &str, data: &[f32]) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        let binding = self
            .context
            .binding(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownBinding {
                kernel: self.kernel(),
                name: name.to_string(),
                target: self.target,
            })?;

        let expected = self.expected_len(&binding, data.len());
        if data.len() != expected {
            return Err(PipelineError::SizeMismatch {
                kernel: self.kernel(),
                name: name.to_string(),
                expected,
                actual: data.len(),
            });
        }

        match &binding.ty {
            BindingType::Uniform(_) => {
                self.values.insert(name.to_string(), data.to_vec());
            }
            BindingType::Buffer | BindingType::Texture2D => self.upload(&binding, data)?,
        }

        let mut status = self.status.lock();
        if status.state == PipelineState::Created {
            status.state = PipelineState::Bound;
        }
        tracing::debug!(kernel = %self.context.name, binding = name, values = data.len(), "bound");
        Ok(())
    }

    /// Float count `binding` accepts, given `actual` offered floats.
    fn expected_len(&self, binding: &Binding, actual: usize) -> usize {
        let c = binding.format.components as usize;
        if !binding.ty.is_memory() {
            return c;
        }
        if binding.name == self.context.output.name {
            return self.context.output_elements() * c;
        }
        match binding.declared_elements() {
            Some(elements) => elements * c,
            None => actual.div_ceil(c) * c,
        }
    }

    fn upload(&mut self, binding: &Binding, data: &[f32]) -> Result<(), PipelineError> {
        let format = binding.format;
        let elements = data.len() / format.components as usize;
        let layout = match self.target {
            Target::Native => OutputLayout::Buffer { format, elements },
            Target::Emulated => {
                let per_texel = if binding.name == self.context.output.name {
                    self.context.output.output_elements_per_texel
                } else {
                    1
                };
                OutputLayout::Texture(TextureLayout::new(
                    elements,
                    format.components,
                    per_texel,
                    self.max_texture_width,
                ))
            }
        };
        let payload = match layout {
            OutputLayout::Buffer { format, .. } => pack_buffer(data, format),
            OutputLayout::Texture(layout) => pack_texels(data, &layout),
        };

        if let Some(existing) = self.memory.get(&binding.name) {
            if existing.layout == layout {
                self.device.write(existing.resource, &payload)?;
                return Ok(());
            }
        }

        let resource = match layout {
            OutputLayout::Buffer { format, .. } => {
                self.device.create_buffer(&binding.name, format, &payload)?
            }
            OutputLayout::Texture(layout) => {
                self.device
                    .create_texture_2d(&binding.name, layout.size, &payload)?
            }
        };
        if let Some(old) = self
            .memory
            .insert(binding.name.clone(), Allocation { resource, layout })
        {
            self.device.destroy(old.resource);
        }
        Ok(())
    }

    /// Set the value a runtime define takes from the next dispatch on.
    pub fn set_define(&mut self, name: &str, value: f32) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        match self.context.define(name) {
            Some(define) if define.runtime => {
                self.defines.insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(UsageError::NotRuntimeDefine {
                kernel: self.kernel(),
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Submit the kernel. The returned [`Completion`] resolves with the
    /// output binding's contents once the device is done.
    pub fn dispatch(&mut self) -> Completion {
        match self.submit() {
            Ok(completion) => completion,
            Err(e) => Completion::failed(e),
        }
    }

    fn submit(&mut self) -> Result<Completion, PipelineError> {
        let mut status = self.status.lock();
        match status.state {
            PipelineState::Destroyed => {
                return Err(UsageError::Destroyed {
                    kernel: self.kernel(),
                }
                .into())
            }
            PipelineState::Dispatched => {
                return Err(UsageError::DispatchInFlight {
                    kernel: self.kernel(),
                }
                .into())
            }
            _ => {}
        }

        let mut bindings = Vec::with_capacity(self.context.uniforms.len());
        for binding in &self.context.uniforms {
            if binding.ty.is_memory() {
                let allocation =
                    self.memory
                        .get(&binding.name)
                        .ok_or_else(|| UsageError::Unbound {
                            kernel: self.kernel(),
                            name: binding.name.clone(),
                        })?;
                bindings.push(BoundResource::Memory {
                    name: binding.name.clone(),
                    resource: allocation.resource,
                    elements: allocation.elements(),
                });
            } else if let Some(value) = self.values.get(&binding.name) {
                bindings.push(BoundResource::Value {
                    name: binding.name.clone(),
                    value: value.clone(),
                });
            }
        }

        let output_name = &self.context.output.name;
        let output = *self
            .memory
            .get(output_name)
            .ok_or_else(|| UsageError::Unbound {
                kernel: self.kernel(),
                name: output_name.clone(),
            })?;
        let workload = match output.layout {
            OutputLayout::Buffer { .. } => Workload::Dispatch {
                groups: self.context.dispatch,
            },
            OutputLayout::Texture(layout) => Workload::Draw {
                output: output.resource,
                size: layout.size,
                texel_count: self.context.output.length,
            },
        };
        let params = SubmitParams {
            workload,
            defines: self
                .context
                .runtime_defines()
                .map(|d| {
                    let value = self.defines.get(&d.name).copied().unwrap_or(d.value as f32);
                    (d.name.clone(), value)
                })
                .collect(),
            iterations: self.context.max_iteration,
        };

        let signal = match self.device.submit(self.program, &bindings, &params) {
            Ok(signal) => signal,
            Err(e) => {
                status.state = PipelineState::Failed;
                return Err(e.into());
            }
        };
        status.state = PipelineState::Dispatched;
        tracing::info!(
            kernel = %self.context.name,
            target = %self.target,
            iterations = params.iterations,
            "dispatched"
        );

        Ok(Completion::pending(
            signal,
            Readback {
                kernel: self.kernel(),
                device: Arc::clone(&self.device),
                output: output.resource,
                layout: output.layout,
                status: Arc::clone(&self.status),
            },
        ))
    }

    /// Release every device resource and the program. Idempotent.
    pub fn destroy(&mut self) {
        {
            let mut status = self.status.lock();
            if status.state == PipelineState::Destroyed {
                return;
            }
            status.state = PipelineState::Destroyed;
        }
        for (_, allocation) in std::mem::take(&mut self.memory) {
            self.device.destroy(allocation.resource);
        }
        self.values.clear();
        self.device.destroy_program(self.program);
        tracing::info!(kernel = %self.context.name, "pipeline destroyed");
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn ensure_supported(device: &dyn Device, target: Target) -> Result<(), DeviceError> {
    if device.supports(target) {
        Ok(())
    } else {
        Err(DeviceError::UnsupportedTarget {
            device: device.name().to_string(),
            target,
        })
    }
}
