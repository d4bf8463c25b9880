//! Error types for generation, addressing, device work and pipeline usage.
//!
//! Every variant carries the kernel, binding or target it concerns so a
//! failure can be diagnosed without reading the generated source.

use crate::codegen::Target;

/// A Kernel Context that cannot be turned into source for a target.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    #[error("kernel '{kernel}': output binding '{name}' is not declared in uniforms")]
    OutputNotFound { kernel: String, name: String },

    #[error("kernel '{kernel}': output binding '{name}' is readonly")]
    OutputReadonly { kernel: String, name: String },

    #[error("kernel '{kernel}': binding '{name}' is marked both readonly and writeonly")]
    ConflictingAccess { kernel: String, name: String },

    #[error("kernel '{kernel}': binding '{name}' has format '{format}', unsupported on the {target} target")]
    UnsupportedFormat {
        kernel: String,
        name: String,
        format: String,
        target: Target,
    },

    #[error(
        "kernel '{kernel}': output length {length} x {per_texel} element(s) per texel \
         does not cover {invocations} invocations"
    )]
    LengthMismatch {
        kernel: String,
        length: u32,
        per_texel: u32,
        invocations: u64,
    },

    #[error("kernel '{kernel}': {field} must be at least 1 on every axis, got {value:?}")]
    InvalidDimensions {
        kernel: String,
        field: &'static str,
        value: [u32; 3],
    },

    #[error("kernel '{kernel}': maxIteration must be at least 1")]
    InvalidIterationCount { kernel: String },

    #[error(
        "kernel '{kernel}': {per_texel} element(s) of '{format}' per texel do not fit in four channels"
    )]
    InvalidElementsPerTexel {
        kernel: String,
        per_texel: u32,
        format: String,
    },

    #[error("kernel '{kernel}': name '{name}' is declared more than once")]
    DuplicateName { kernel: String, name: String },

    #[error("kernel '{kernel}': runtime define '{name}' is expanded with #define in kernel source")]
    RuntimeDefineInlined { kernel: String, name: String },

    #[error("kernel '{kernel}': body has no `void main()` entry point for the {target} target")]
    MissingEntryPoint { kernel: String, target: Target },
}

/// An element format spelling that is not a supported GLSL type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown element format '{0}'")]
pub struct FormatError(pub String);

/// Out-of-range access through the virtual addressing layer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("element {index} is outside a memory of {len} element(s)")]
    OutOfBounds { index: usize, len: usize },

    #[error("element has {actual} component(s), memory expects {expected}")]
    ComponentMismatch { expected: u32, actual: u32 },
}

/// Failures reported by a [`Device`](crate::runtime::Device).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("{device}: cannot create resource '{label}': {reason}")]
    ResourceCreation {
        device: String,
        label: String,
        reason: String,
    },

    #[error("{device}: {target} program for kernel '{kernel}' failed to compile: {reason}")]
    Compilation {
        device: String,
        kernel: String,
        target: Target,
        reason: String,
    },

    #[error("{device}: submission failed: {reason}")]
    Submission { device: String, reason: String },

    #[error("{device}: read-back failed: {reason}")]
    ReadBack { device: String, reason: String },

    #[error("{device}: the {target} target is not supported")]
    UnsupportedTarget { device: String, target: Target },

    #[error("{device}: unknown resource #{id}")]
    UnknownResource { device: String, id: u64 },

    #[error("{device}: unknown program #{id}")]
    UnknownProgram { device: String, id: u64 },

    #[error("device dropped the completion signal before reporting")]
    Lost,

    #[error(
        "fragment for texel {texel} wrote element {index} of '{binding}'; \
         the emulated target only writes its own output texel"
    )]
    ScatterWrite {
        binding: String,
        index: usize,
        texel: usize,
    },

    #[error("kernel failed at invocation {invocation}: {reason}")]
    Kernel { invocation: usize, reason: String },

    #[error(transparent)]
    Address(#[from] AddressError),
}

/// A precompiled bundle that cannot be read or built.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("malformed bundle: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("bundle for kernel '{kernel}' carries no shader source")]
    Empty { kernel: String },

    #[error(transparent)]
    Generate(#[from] GenerateError),
}

/// A configuration file or override that cannot be applied.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: String, value: String },
}

/// Calls that are illegal in the pipeline's current state.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("kernel '{kernel}': a dispatch is already outstanding")]
    DispatchInFlight { kernel: String },

    #[error("kernel '{kernel}': pipeline has been destroyed")]
    Destroyed { kernel: String },

    #[error("kernel '{kernel}': binding '{name}' must be bound before dispatch")]
    Unbound { kernel: String, name: String },

    #[error("kernel '{kernel}': '{name}' is not a runtime define")]
    NotRuntimeDefine { kernel: String, name: String },
}

/// Everything a [`ComputePipeline`](crate::runtime::ComputePipeline) can fail with.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error("kernel '{kernel}': binding '{name}' is not declared (target {target})")]
    UnknownBinding {
        kernel: String,
        name: String,
        target: Target,
    },

    #[error("kernel '{kernel}': binding '{name}' expects {expected} value(s), got {actual}")]
    SizeMismatch {
        kernel: String,
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("kernel '{kernel}': bundle carries no {target} source")]
    MissingShader { kernel: String, target: Target },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Usage(#[from] UsageError),
}
