//! GPU compute infrastructure.
//!
//! Uses wgpu for the native target (Metal, Vulkan, DX12). Provides adapter
//! selection and [`WgpuDevice`], the hardware implementation of
//! [`Device`](crate::runtime::Device).

mod device;
pub(crate) mod encode;

pub use device::WgpuDevice;

use crate::config::{PowerPreference, RuntimeConfig};

/// Try to open a GPU device for native kernels.
/// Returns None if no GPU adapter is available.
pub fn try_create_device(config: &RuntimeConfig) -> Option<WgpuDevice> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let power_preference = match config.power_preference {
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
    };
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    let info = adapter.get_info();
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("kernel-bridge"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
        },
        None,
    ))
    .ok()?;
    tracing::info!(adapter = %info.name, backend = ?info.backend, "opened GPU device");
    Some(WgpuDevice::new(&info.name, device, queue))
}
