//! Shared kernel fixtures for unit tests.

use crate::context::{Binding, Define, ElementFormat, KernelContext};

pub(crate) const SUM_DECLARATION: &str = "float sum(float a,float b) {\nreturn (a + float(b));}";

pub(crate) const ADD_NATIVE_MAIN: &str = "void main() {
float a = vectorA[globalInvocationID.x];
float b = vectorB[globalInvocationID.x];
vectorA[globalInvocationID.x] = float(sum(a,b));}";

pub(crate) const ADD_EMULATED_MAIN: &str = "void main() {
float a = getDatavectorA(globalInvocationID.x);
float b = getDatavectorB(globalInvocationID.x);
gl_FragColor = vec4(sum(a,b));}";

/// `vectorA += vectorB` over eight invocations in one workgroup.
pub(crate) fn add_vectors() -> KernelContext {
    KernelContext::new("Add2Vectors", "vectorA")
        .with_thread_group_size([8, 1, 1])
        .with_binding(Binding::texture("vectorA", ElementFormat::FLOAT_ARRAY))
        .with_binding(Binding::texture("vectorB", ElementFormat::FLOAT_ARRAY).readonly())
        .with_global_declarations(SUM_DECLARATION)
}

/// A context exercising both kinds of define and a plain uniform.
pub(crate) fn scaled_vectors() -> KernelContext {
    KernelContext::new("Scaled", "result")
        .with_dispatch([2, 1, 1])
        .with_thread_group_size([4, 1, 1])
        .with_define(Define::constant("SIZE", 8.0))
        .with_define(Define::runtime("SCALE", 2.5))
        .with_binding(Binding::buffer("result", ElementFormat::FLOAT_ARRAY))
        .with_binding(Binding::buffer("points", ElementFormat::VEC3_ARRAY).readonly())
        .with_binding(Binding::uniform("u_Offset", ElementFormat::FLOAT))
}
