//! Native generator: a GLSL 450 compute-stage unit.
//!
//! Layout of the emitted unit:
//! 1. `#version` and the workgroup size from `threadGroupSize`
//! 2. compile-time `#define`s
//! 3. one std430 storage buffer per memory binding, slots 0, 1, 2, ...
//! 4. one std140 parameter block (plain uniforms + runtime defines)
//!    at the slot after the last buffer, so plain uniforms do not take
//!    slots in `uniforms` order
//! 5. built-in aliases over the hardware compute built-ins
//! 6. builtin library, `globalDeclarations`, `main`

use super::{
    builtins, check_formats, join_sections, param_members, strip_housekeeping, ShaderGenerator,
    Target,
};
use crate::context::{Binding, KernelContext};
use crate::error::GenerateError;

/// Canonical built-in names bound straight to the hardware built-ins.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("globalInvocationID", "ivec3(gl_GlobalInvocationID)"),
    ("workGroupSize", "ivec3(gl_WorkGroupSize)"),
    ("workGroupID", "ivec3(gl_WorkGroupID)"),
    ("localInvocationID", "ivec3(gl_LocalInvocationID)"),
    ("numWorkGroups", "ivec3(gl_NumWorkGroups)"),
    ("localInvocationIndex", "int(gl_LocalInvocationIndex)"),
];

pub struct NativeGenerator;

impl ShaderGenerator for NativeGenerator {
    fn target(&self) -> Target {
        Target::Native
    }

    fn generate(&self, context: &KernelContext, main: &str) -> Result<String, GenerateError> {
        context.validate()?;
        context.check_source(main)?;
        check_formats(context, Target::Native)?;

        let [x, y, z] = context.thread_group_size;
        let mut slot = 0u32;
        let buffers = context
            .uniforms
            .iter()
            .filter(|b| b.ty.is_memory())
            .map(|b| {
                let decl = storage_buffer(b, slot);
                slot += 1;
                decl
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let params = param_block(context, slot);

        let source = join_sections(&[
            "#version 450".to_string(),
            format!(
                "layout (\n  local_size_x = {},\n  local_size_y = {},\n  local_size_z = {}\n) in;",
                x, y, z
            ),
            compile_time_defines(context),
            buffers,
            params,
            builtin_aliases(),
            builtins::library(Target::Native).to_string(),
            context.global_declarations.clone(),
            main.to_string(),
        ]);
        tracing::debug!(kernel = %context.name, bytes = source.len(), "generated native source");
        Ok(strip_housekeeping(&source))
    }
}

pub(super) fn compile_time_defines(context: &KernelContext) -> String {
    context
        .defines
        .iter()
        .filter(|d| !d.runtime)
        .map(|d| format!("#define {} {}", d.name, d.literal()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn storage_buffer(binding: &Binding, slot: u32) -> String {
    // Write-only storage is not accepted by naga, so writeonly bindings
    // are declared read-write.
    let access = if binding.readonly { "readonly " } else { "" };
    let suffix = if binding.format.array { "[]" } else { "" };
    format!(
        "layout(std430, set = 0, binding = {slot}) {access}buffer KernelBuffer{slot} {{\n  {} {}{};\n}};",
        binding.format.glsl_type(),
        binding.name,
        suffix,
    )
}

fn param_block(context: &KernelContext, slot: u32) -> String {
    let members = param_members(context);
    if members.is_empty() {
        return String::new();
    }
    let body: String = members
        .iter()
        .map(|(name, format)| format!("  {} {};\n", format.glsl_type(), name))
        .collect();
    format!(
        "layout(std140, set = 0, binding = {}) uniform KernelParams {{\n{}}};",
        slot, body
    )
}

fn builtin_aliases() -> String {
    BUILTIN_ALIASES
        .iter()
        .map(|(name, builtin)| format!("#define {} {}", name, builtin))
        .collect::<Vec<_>>()
        .join("\n")
}
