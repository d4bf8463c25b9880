//! A [`Device`] backed by wgpu, running native-target kernels.
//!
//! Generated GLSL 450 is handed to naga's GLSL frontend. Memory bindings
//! become storage buffers at slots `0..m` in declaration order; plain
//! uniforms and runtime defines share one std140 uniform buffer at slot
//! `m`. Submission blocks on `Maintain::Wait`, so the completion signal
//! is always fired before `submit` returns.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use wgpu::util::DeviceExt;

use super::encode::{from_words, pack_std140, to_words};
use crate::addressing::TextureSize;
use crate::codegen::{param_members, Target};
use crate::context::{ElementFormat, KernelContext, ScalarKind};
use crate::error::DeviceError;
use crate::runtime::{
    BoundResource, CompletionSignal, Device, ProgramId, ReadRegion, ResourceId, SubmitParams,
    Workload,
};

struct GpuBuffer {
    label: String,
    scalar: ScalarKind,
    buffer: wgpu::Buffer,
    /// Logical length in 32-bit words.
    len: usize,
}

struct GpuProgram {
    context: Arc<KernelContext>,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    params: Vec<(String, ElementFormat)>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    buffers: HashMap<u64, GpuBuffer>,
    programs: HashMap<u64, GpuProgram>,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct WgpuDevice {
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    state: Mutex<State>,
}

impl WgpuDevice {
    pub fn new(name: &str, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            name: name.to_string(),
            device,
            queue,
            state: Mutex::new(State::default()),
        }
    }

    fn submission_error(&self, reason: impl Into<String>) -> DeviceError {
        DeviceError::Submission {
            device: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn bind_group_layout(&self, context: &KernelContext, has_params: bool) -> wgpu::BindGroupLayout {
        let memory = context.uniforms.iter().filter(|b| b.ty.is_memory()).count() as u32;
        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..memory)
            .map(|slot| wgpu::BindGroupLayoutEntry {
                binding: slot,
                visibility: wgpu::ShaderStages::COMPUTE,
                // Shader-side readonly/writeonly qualifiers narrow this.
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        if has_params {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: memory,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&context.name),
                entries: &entries,
            })
    }

    /// Host values of the parameter block, in member order.
    fn param_words(
        program: &GpuProgram,
        bindings: &[BoundResource],
        params: &SubmitParams,
    ) -> Vec<u32> {
        let values: Vec<(ElementFormat, Option<Vec<f32>>)> = program
            .params
            .iter()
            .map(|(name, format)| {
                let bound = bindings.iter().find_map(|b| match b {
                    BoundResource::Value { name: n, value } if n == name => Some(value.clone()),
                    _ => None,
                });
                let define = || {
                    params
                        .defines
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| vec![*v])
                        .or_else(|| {
                            program
                                .context
                                .define(name)
                                .map(|d| vec![d.value as f32])
                        })
                };
                (*format, bound.or_else(define))
            })
            .collect();
        let members: Vec<(ElementFormat, Option<&[f32]>)> = values
            .iter()
            .map(|(format, value)| (*format, value.as_deref()))
            .collect();
        pack_std140(&members)
    }
}

impl Device for WgpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, target: Target) -> bool {
        target == Target::Native
    }

    fn compile(
        &self,
        target: Target,
        source: &str,
        context: &KernelContext,
    ) -> Result<ProgramId, DeviceError> {
        if !self.supports(target) {
            return Err(DeviceError::UnsupportedTarget {
                device: self.name.clone(),
                target,
            });
        }
        let params = param_members(context);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&context.name),
                source: wgpu::ShaderSource::Glsl {
                    shader: source.into(),
                    stage: wgpu::naga::ShaderStage::Compute,
                    defines: Default::default(),
                },
            });
        let layout = self.bind_group_layout(context, !params.is_empty());
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&context.name),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&context.name),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::Compilation {
                device: self.name.clone(),
                kernel: context.name.clone(),
                target,
                reason: error.to_string(),
            });
        }

        let mut state = self.state.lock();
        let id = state.allocate();
        state.programs.insert(
            id,
            GpuProgram {
                context: Arc::new(context.clone()),
                pipeline,
                layout,
                params,
            },
        );
        tracing::debug!(device = %self.name, kernel = %context.name, "compiled compute pipeline");
        Ok(ProgramId(id))
    }

    fn create_buffer(
        &self,
        label: &str,
        format: ElementFormat,
        data: &[f32],
    ) -> Result<ResourceId, DeviceError> {
        let mut words = to_words(data, format.scalar);
        let len = words.len();
        // Zero-sized storage bindings are invalid.
        if words.is_empty() {
            words.push(0);
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&words),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::ResourceCreation {
                device: self.name.clone(),
                label: label.to_string(),
                reason: error.to_string(),
            });
        }

        let mut state = self.state.lock();
        let id = state.allocate();
        state.buffers.insert(
            id,
            GpuBuffer {
                label: label.to_string(),
                scalar: format.scalar,
                buffer,
                len,
            },
        );
        Ok(ResourceId(id))
    }

    fn create_texture_2d(
        &self,
        label: &str,
        _size: TextureSize,
        _texels: &[f32],
    ) -> Result<ResourceId, DeviceError> {
        Err(DeviceError::ResourceCreation {
            device: self.name.clone(),
            label: label.to_string(),
            reason: "textures are only used by the emulated target".to_string(),
        })
    }

    fn write(&self, resource: ResourceId, data: &[f32]) -> Result<(), DeviceError> {
        let state = self.state.lock();
        let stored = state
            .buffers
            .get(&resource.0)
            .ok_or_else(|| DeviceError::UnknownResource {
                device: self.name.clone(),
                id: resource.0,
            })?;
        if data.len() > stored.len {
            return Err(DeviceError::ResourceCreation {
                device: self.name.clone(),
                label: stored.label.clone(),
                reason: format!("write of {} values into {}", data.len(), stored.len),
            });
        }
        let words = to_words(data, stored.scalar);
        if !words.is_empty() {
            self.queue
                .write_buffer(&stored.buffer, 0, bytemuck::cast_slice(&words));
        }
        Ok(())
    }

    fn submit(
        &self,
        program: ProgramId,
        bindings: &[BoundResource],
        params: &SubmitParams,
    ) -> Result<CompletionSignal, DeviceError> {
        let Workload::Dispatch { groups } = params.workload else {
            return Err(DeviceError::UnsupportedTarget {
                device: self.name.clone(),
                target: Target::Emulated,
            });
        };
        let state = self.state.lock();
        let compiled = state
            .programs
            .get(&program.0)
            .ok_or_else(|| DeviceError::UnknownProgram {
                device: self.name.clone(),
                id: program.0,
            })?;

        let mut entries = Vec::new();
        for (slot, binding) in compiled
            .context
            .uniforms
            .iter()
            .filter(|b| b.ty.is_memory())
            .enumerate()
        {
            let resource = bindings
                .iter()
                .find_map(|b| match b {
                    BoundResource::Memory { name, resource, .. } if *name == binding.name => {
                        Some(*resource)
                    }
                    _ => None,
                })
                .ok_or_else(|| {
                    self.submission_error(format!("binding '{}' is not attached", binding.name))
                })?;
            let buffer = state
                .buffers
                .get(&resource.0)
                .ok_or_else(|| DeviceError::UnknownResource {
                    device: self.name.clone(),
                    id: resource.0,
                })?;
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32,
                resource: buffer.buffer.as_entire_binding(),
            });
        }

        let params_buffer = if compiled.params.is_empty() {
            None
        } else {
            let words = Self::param_words(compiled, bindings, params);
            Some(
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("KernelParams"),
                        contents: bytemuck::cast_slice(&words),
                        usage: wgpu::BufferUsages::UNIFORM,
                    }),
            )
        };
        if let Some(buffer) = &params_buffer {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: buffer.as_entire_binding(),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&compiled.context.name),
            layout: &compiled.layout,
            entries: &entries,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&compiled.context.name),
            });
        for _ in 0..params.iterations.max(1) {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&compiled.context.name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compiled.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(self.submission_error(error.to_string()));
        }
        drop(state);

        let (tx, rx) = oneshot::channel();
        self.device.poll(wgpu::Maintain::Wait);
        let _ = tx.send(Ok(()));
        tracing::debug!(device = %self.name, ?groups, iterations = params.iterations, "dispatched");
        Ok(rx)
    }

    fn read_back(&self, resource: ResourceId, region: ReadRegion) -> Result<Vec<f32>, DeviceError> {
        let failure = |reason: String| DeviceError::ReadBack {
            device: self.name.clone(),
            reason,
        };
        let state = self.state.lock();
        let stored = state
            .buffers
            .get(&resource.0)
            .ok_or_else(|| DeviceError::UnknownResource {
                device: self.name.clone(),
                id: resource.0,
            })?;
        if region.offset + region.len > stored.len {
            return Err(failure(format!(
                "region {}..{} outside '{}' of {} values",
                region.offset,
                region.offset + region.len,
                stored.label,
                stored.len
            )));
        }
        if region.len == 0 {
            return Ok(Vec::new());
        }

        let size = (region.len * 4) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read_back"),
            });
        encoder.copy_buffer_to_buffer(
            &stored.buffer,
            (region.offset * 4) as u64,
            &staging,
            0,
            size,
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        let scalar = stored.scalar;
        drop(state);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| failure("map callback dropped".to_string()))?
            .map_err(|e| failure(e.to_string()))?;

        let data = slice.get_mapped_range();
        let values = from_words(bytemuck::cast_slice(&data), scalar);
        drop(data);
        staging.unmap();
        Ok(values)
    }

    fn destroy(&self, resource: ResourceId) {
        if let Some(stored) = self.state.lock().buffers.remove(&resource.0) {
            stored.buffer.destroy();
        }
    }

    fn destroy_program(&self, program: ProgramId) {
        self.state.lock().programs.remove(&program.0);
    }
}
