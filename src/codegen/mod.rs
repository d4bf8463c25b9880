//! Shader generation: Kernel Context + kernel body → backend source text.
//!
//! Both targets implement one contract, [`ShaderGenerator`]. Generation is
//! a pure function of its inputs: generators hold no state, and the
//! binding-slot counter is a local threaded through each call.
//!
//! ```text
//! KernelContext ─┬→ NativeGenerator   → GLSL 450 compute unit
//!   + main body  └→ EmulatedGenerator → GLSL ES 1.00 fragment unit
//!                       (+ builtins::EMULATED, built-in re-derivation)
//! ```

pub mod builtins;
mod emulated;
mod native;


use std::fmt;

use crate::context::{Binding, BindingType, ElementFormat, KernelContext, ScalarKind};
use crate::error::GenerateError;

pub use emulated::EmulatedGenerator;
pub use native::NativeGenerator;

/// Execution model a kernel is generated for.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Target {
    /// True compute dispatch (GLSL 450 compute stage).
    #[serde(rename = "native", alias = "WebGPU")]
    Native,
    /// Compute emulated by a full-screen draw (GLSL ES 1.00 fragment stage).
    #[serde(rename = "emulated", alias = "WebGL")]
    Emulated,
}

impl Target {
    pub const ALL: [Target; 2] = [Target::Native, Target::Emulated];

    pub fn name(&self) -> &'static str {
        match self {
            Target::Native => "native",
            Target::Emulated => "emulated",
        }
    }

    /// Parse a target name, accepting the backend aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "native" | "compute" | "webgpu" => Some(Target::Native),
            "emulated" | "raster" | "webgl" => Some(Target::Emulated),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Turns a Kernel Context and a kernel body into complete backend source.
pub trait ShaderGenerator: Send + Sync {
    /// The target this generator emits source for.
    fn target(&self) -> Target;

    /// Generate a complete, self-contained shader unit.
    fn generate(&self, context: &KernelContext, main: &str) -> Result<String, GenerateError>;
}

static NATIVE: NativeGenerator = NativeGenerator;
static EMULATED: EmulatedGenerator = EmulatedGenerator;

/// The generator for a target.
pub fn generator_for(target: Target) -> &'static dyn ShaderGenerator {
    match target {
        Target::Native => &NATIVE,
        Target::Emulated => &EMULATED,
    }
}

/// Create a generator by target name (see [`Target::from_name`]).
pub fn create_generator(name: &str) -> Option<&'static dyn ShaderGenerator> {
    Target::from_name(name).map(generator_for)
}

/// Generate source for `target`.
pub fn generate(
    target: Target,
    context: &KernelContext,
    main: &str,
) -> Result<String, GenerateError> {
    generator_for(target).generate(context, main)
}

/// Members of the parameter block: plain uniforms, then runtime defines.
pub(crate) fn param_members(context: &KernelContext) -> Vec<(String, ElementFormat)> {
    let uniforms = context
        .uniforms
        .iter()
        .filter(|b| !b.ty.is_memory())
        .map(|b| (b.name.clone(), b.format.element()));
    let defines = context
        .runtime_defines()
        .map(|d| (d.name.clone(), ElementFormat::FLOAT));
    uniforms.chain(defines).collect()
}

/// Target-specific format checks shared by both generators.
fn check_formats(context: &KernelContext, target: Target) -> Result<(), GenerateError> {
    for binding in &context.uniforms {
        if !format_supported(binding, target) {
            return Err(GenerateError::UnsupportedFormat {
                kernel: context.name.clone(),
                name: binding.name.clone(),
                format: binding.format.to_string(),
                target,
            });
        }
    }
    Ok(())
}

fn format_supported(binding: &Binding, target: Target) -> bool {
    if matches!(binding.ty, BindingType::Uniform(_)) && binding.format.array {
        return false;
    }
    match target {
        Target::Native => true,
        Target::Emulated => binding.format.scalar != ScalarKind::Uint,
    }
}

/// Remove `this.` qualifiers leaked from housekeeping code.
///
/// Only whole tokens are removed: `this.x` loses its qualifier, while
/// `withthis.x` is left untouched.
pub(crate) fn strip_housekeeping(source: &str) -> String {
    const TOKEN: &str = "this.";
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(pos) = rest.find(TOKEN) {
        let standalone = rest[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        out.push_str(&rest[..pos]);
        if !standalone {
            out.push_str(TOKEN);
        }
        rest = &rest[pos + TOKEN.len()..];
    }
    out.push_str(rest);
    out
}

/// Join non-empty sections with a blank line between them.
fn join_sections(sections: &[String]) -> String {
    let mut out = sections
        .iter()
        .map(|s| s.trim_end())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}
