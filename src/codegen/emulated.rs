//! Emulated generator: a GLSL ES 1.00 fragment-stage unit.
//!
//! The emulation backend has no compute stage: one fragment is drawn per
//! output texel, buffers are float textures read through
//! `addrTranslation_1Dto2D`, and every compute built-in is re-derived
//! from `v_TexCoord` by `deriveBuiltins()`, which is called first thing in
//! `main`.

use super::native::compile_time_defines;
use super::{builtins, check_formats, join_sections, strip_housekeeping, ShaderGenerator, Target};
use crate::context::{Binding, BindingType, KernelContext};
use crate::error::GenerateError;

const PRECISION: &str = "#ifdef GL_FRAGMENT_PRECISION_HIGH
  precision highp float;
  precision highp int;
#else
  precision mediump float;
  precision mediump int;
#endif";

const OUTPUT_INTERFACE: &str = "uniform vec2 u_OutputTextureSize;
uniform int u_OutputTexelCount;
varying vec2 v_TexCoord;";

/// Built-in re-derivation. GLSL ES 1.00 has no integer `%`, hence `imod`.
const DERIVE_BUILTINS: &str = "int globalInvocationIndex;
ivec3 workGroupID;
ivec3 localInvocationID;
ivec3 globalInvocationID;
int localInvocationIndex;

int imod(int a, int b) {
  return a - (a / b) * b;
}

void deriveBuiltins() {
  globalInvocationIndex = int(floor(v_TexCoord.x * u_OutputTextureSize.x))
    + int(floor(v_TexCoord.y * u_OutputTextureSize.y)) * int(u_OutputTextureSize.x);
  int groupVolume = workGroupSize.x * workGroupSize.y * workGroupSize.z;
  int workGroupIDLength = globalInvocationIndex / groupVolume;
  workGroupID = ivec3(
    imod(workGroupIDLength, numWorkGroups.x),
    imod(workGroupIDLength / numWorkGroups.x, numWorkGroups.y),
    workGroupIDLength / (numWorkGroups.x * numWorkGroups.y));
  int localLinear = globalInvocationIndex - workGroupIDLength * groupVolume;
  int localInvocationIDZ = localLinear / (workGroupSize.x * workGroupSize.y);
  int localInvocationIDY = (localLinear - localInvocationIDZ * workGroupSize.x * workGroupSize.y) / workGroupSize.x;
  int localInvocationIDX = localLinear - localInvocationIDZ * workGroupSize.x * workGroupSize.y - localInvocationIDY * workGroupSize.x;
  localInvocationID = ivec3(localInvocationIDX, localInvocationIDY, localInvocationIDZ);
  globalInvocationID = workGroupID * workGroupSize + localInvocationID;
  localInvocationIndex = localInvocationID.z * workGroupSize.x * workGroupSize.y
    + localInvocationID.y * workGroupSize.x + localInvocationID.x;
}";

pub struct EmulatedGenerator;

impl ShaderGenerator for EmulatedGenerator {
    fn target(&self) -> Target {
        Target::Emulated
    }

    fn generate(&self, context: &KernelContext, main: &str) -> Result<String, GenerateError> {
        context.validate()?;
        context.check_source(main)?;
        check_formats(context, Target::Emulated)?;
        let main = inject_derivation(main).ok_or_else(|| GenerateError::MissingEntryPoint {
            kernel: context.name.clone(),
            target: Target::Emulated,
        })?;

        let source = join_sections(&[
            PRECISION.to_string(),
            compile_time_defines(context),
            uniform_declarations(context),
            builtins::library(Target::Emulated).to_string(),
            data_texture_getters(context),
            OUTPUT_INTERFACE.to_string(),
            builtin_preamble(context),
            context.global_declarations.clone(),
            main,
        ]);
        tracing::debug!(kernel = %context.name, bytes = source.len(), "generated emulated source");
        Ok(strip_housekeeping(&source))
    }
}

fn uniform_declarations(context: &KernelContext) -> String {
    let bindings = context.uniforms.iter().map(|b| {
        let ty = match &b.ty {
            BindingType::Buffer | BindingType::Texture2D => "sampler2D",
            BindingType::Uniform(ty) => ty.as_str(),
        };
        format!("uniform {} {};", ty, b.name)
    });
    let runtime = context
        .runtime_defines()
        .map(|d| format!("uniform float {};", d.name));
    bindings.chain(runtime).collect::<Vec<_>>().join("\n")
}

fn data_texture_getters(context: &KernelContext) -> String {
    context
        .uniforms
        .iter()
        .filter(|b| b.ty.is_memory())
        .map(data_texture_getter)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Size uniform plus the three `getData<name>` overloads of one binding.
pub(crate) fn data_texture_getter(binding: &Binding) -> String {
    let name = &binding.name;
    let ty = binding.format.glsl_type();
    let swizzle = binding.format.swizzle();
    format!(
        "uniform vec2 {name}Size;
{ty} getData{name}(vec2 address2D) {{
  return {ty}(texture2D({name}, address2D){swizzle});
}}
{ty} getData{name}(float address1D) {{
  return getData{name}(addrTranslation_1Dto2D(address1D, {name}Size));
}}
{ty} getData{name}(int address1D) {{
  return getData{name}(float(address1D));
}}"
    )
}

fn builtin_preamble(context: &KernelContext) -> String {
    let [tx, ty, tz] = context.thread_group_size;
    let [nx, ny, nz] = context.dispatch;
    format!(
        "const ivec3 workGroupSize = ivec3({tx}, {ty}, {tz});\n\
         const ivec3 numWorkGroups = ivec3({nx}, {ny}, {nz});\n\
         {DERIVE_BUILTINS}"
    )
}

/// Insert `deriveBuiltins();` as the first statement of `void main()`.
fn inject_derivation(main: &str) -> Option<String> {
    let mut search = 0;
    while let Some(found) = main[search..].find("void main") {
        let start = search + found;
        let after = &main[start + "void main".len()..];
        let signature_ok = after.trim_start().starts_with('(');
        if signature_ok {
            let brace = start + "void main".len() + after.find('{')?;
            let mut out = String::with_capacity(main.len() + 24);
            out.push_str(&main[..=brace]);
            out.push_str("\n  deriveBuiltins();");
            out.push_str(&main[brace + 1..]);
            return Some(out);
        }
        search = start + "void main".len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_after_opening_brace() {
        let out = inject_derivation("void main() {\n  gl_FragColor = vec4(1.0);\n}").unwrap();
        assert_eq!(
            out,
            "void main() {\n  deriveBuiltins();\n  gl_FragColor = vec4(1.0);\n}"
        );
    }

    #[test]
    fn test_inject_skips_similar_names() {
        let body = "void mainLoop() {}\nvoid main(void) { x(); }";
        let out = inject_derivation(body).unwrap();
        assert!(out.starts_with("void mainLoop() {}\n"));
        assert!(out.ends_with("void main(void) {\n  deriveBuiltins(); x(); }"));
    }

    #[test]
    fn test_inject_requires_entry_point() {
        assert!(inject_derivation("float f() { return 1.0; }").is_none());
        assert!(inject_derivation("void mainLoop() {}").is_none());
    }
}
