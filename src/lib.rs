//! Run one compute kernel on native GPU compute or on a fragment-shader
//! emulation of it.
//!
//! A [`KernelContext`] describes a kernel's dispatch shape and bindings.
//! [`codegen`] turns it plus a `main` body into complete source for either
//! target, [`addressing`] defines how linear arrays live in textures on
//! the emulated target, and [`runtime`] drives compiled programs on a
//! [`Device`](runtime::Device).

pub mod addressing;
pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod gpu;
pub mod logging;
pub mod runtime;

#[cfg(test)]
mod fixtures;

pub use codegen::{create_generator, generate, generator_for, ShaderGenerator, Target};
pub use config::RuntimeConfig;
pub use context::{Binding, BindingType, Define, ElementFormat, KernelContext};
pub use error::{
    AddressError, BundleError, ConfigError, DeviceError, FormatError, GenerateError,
    PipelineError, UsageError,
};
pub use runtime::{Bundle, Completion, ComputePipeline, PipelineState, ReferenceDevice};
