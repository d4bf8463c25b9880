//! Kernel Context: the immutable description of one compiled kernel.
//!
//! Produced once by the front-end, shared read-only by every generator
//! and by the runtime. Field names serialize in camelCase so contexts
//! round-trip through precompiled bundles.

pub mod element;


use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::GenerateError;

pub use element::{ElementFormat, ScalarKind};

/// A named constant of the kernel.
///
/// `runtime = false` defines are compile-time constants. `runtime = true`
/// defines are supplied as uniforms at execution time so their value can
/// change between dispatches without regenerating source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Define {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub runtime: bool,
}

impl Define {
    pub fn constant(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            runtime: false,
        }
    }

    pub fn runtime(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            runtime: true,
        }
    }

    /// GLSL literal for the value; integral values print without a fraction.
    pub fn literal(&self) -> String {
        format_number(self.value)
    }
}

/// Integral values that fit a GLSL `int` print as integers, other
/// integral values in exponent form so they stay valid float literals.
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() != 0.0 || !value.is_finite() {
        format!("{}", value)
    } else if value.abs() <= f64::from(i32::MAX) {
        format!("{}", value as i64)
    } else {
        format!("{:e}", value)
    }
}

/// How a binding is declared in generated source.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BindingType {
    /// Linear storage buffer (native target).
    Buffer,
    /// 2D float texture standing in for a buffer (emulated target).
    Texture2D,
    /// Plain uniform value; the GLSL spelling is kept verbatim.
    Uniform(String),
}

impl BindingType {
    /// Buffer-like bindings are backed by device memory on both targets.
    pub fn is_memory(&self) -> bool {
        matches!(self, BindingType::Buffer | BindingType::Texture2D)
    }
}

impl From<String> for BindingType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "buffer" => BindingType::Buffer,
            "sampler2D" => BindingType::Texture2D,
            _ => BindingType::Uniform(value),
        }
    }
}

impl From<BindingType> for String {
    fn from(value: BindingType) -> Self {
        match value {
            BindingType::Buffer => "buffer".to_string(),
            BindingType::Texture2D => "sampler2D".to_string(),
            BindingType::Uniform(ty) => ty,
        }
    }
}

/// A named kernel input/output resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: BindingType,
    pub format: ElementFormat,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub writeonly: bool,
    /// Declared extent in elements; `[1, 1]` means "sized by the data".
    #[serde(default = "unit_size")]
    pub size: [u32; 2],
}

fn unit_size() -> [u32; 2] {
    [1, 1]
}

impl Binding {
    fn new(name: &str, ty: BindingType, format: ElementFormat) -> Self {
        Self {
            name: name.to_string(),
            ty,
            format,
            readonly: false,
            writeonly: false,
            size: unit_size(),
        }
    }

    pub fn buffer(name: &str, format: ElementFormat) -> Self {
        Self::new(name, BindingType::Buffer, format)
    }

    pub fn texture(name: &str, format: ElementFormat) -> Self {
        Self::new(name, BindingType::Texture2D, format)
    }

    pub fn uniform(name: &str, format: ElementFormat) -> Self {
        Self::new(name, BindingType::Uniform(format.glsl_type()), format)
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn writeonly(mut self) -> Self {
        self.writeonly = true;
        self
    }

    pub fn with_size(mut self, size: [u32; 2]) -> Self {
        self.size = size;
        self
    }

    /// Element count fixed by an explicit `size`, if one was declared.
    pub fn declared_elements(&self) -> Option<usize> {
        if self.size == unit_size() {
            None
        } else {
            Some(self.size[0] as usize * self.size[1] as usize)
        }
    }
}

/// Which binding receives the kernel's result and how it is laid out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub name: String,
    /// Output texel count: total invocations / `output_elements_per_texel`.
    pub length: u32,
    #[serde(default = "one")]
    pub output_elements_per_texel: u32,
}

fn one() -> u32 {
    1
}

/// Immutable data model of one compiled kernel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelContext {
    pub name: String,
    pub dispatch: [u32; 3],
    pub thread_group_size: [u32; 3],
    #[serde(default = "one")]
    pub max_iteration: u32,
    #[serde(default)]
    pub defines: Vec<Define>,
    #[serde(default)]
    pub uniforms: Vec<Binding>,
    #[serde(default, deserialize_with = "declarations_from_text_or_list")]
    pub global_declarations: String,
    pub output: OutputSpec,
}

/// Older bundles store declarations as a list of snippets.
fn declarations_from_text_or_list<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Declarations {
        Text(String),
        List(Vec<String>),
    }

    Ok(match Declarations::deserialize(deserializer)? {
        Declarations::Text(text) => text,
        Declarations::List(list) => list.join("\n"),
    })
}

impl KernelContext {
    /// A single-workgroup, single-invocation kernel writing to `output`.
    /// Refine it with the `with_*` builders.
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            dispatch: [1, 1, 1],
            thread_group_size: [1, 1, 1],
            max_iteration: 1,
            defines: Vec::new(),
            uniforms: Vec::new(),
            global_declarations: String::new(),
            output: OutputSpec {
                name: output.to_string(),
                length: 1,
                output_elements_per_texel: 1,
            },
        }
    }

    pub fn with_dispatch(mut self, dispatch: [u32; 3]) -> Self {
        self.dispatch = dispatch;
        self.sync_output_length();
        self
    }

    pub fn with_thread_group_size(mut self, size: [u32; 3]) -> Self {
        self.thread_group_size = size;
        self.sync_output_length();
        self
    }

    pub fn with_elements_per_texel(mut self, per_texel: u32) -> Self {
        self.output.output_elements_per_texel = per_texel;
        self.sync_output_length();
        self
    }

    pub fn with_max_iteration(mut self, iterations: u32) -> Self {
        self.max_iteration = iterations;
        self
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.uniforms.push(binding);
        self
    }

    pub fn with_define(mut self, define: Define) -> Self {
        self.defines.push(define);
        self
    }

    pub fn with_global_declarations(mut self, text: &str) -> Self {
        self.global_declarations = text.to_string();
        self
    }

    fn sync_output_length(&mut self) {
        let per_texel = u64::from(self.output.output_elements_per_texel.max(1));
        self.output.length = (self.total_invocations() / per_texel) as u32;
    }

    pub fn total_workgroups(&self) -> u64 {
        self.dispatch.iter().map(|&n| u64::from(n)).product()
    }

    pub fn invocations_per_workgroup(&self) -> u64 {
        self.thread_group_size.iter().map(|&n| u64::from(n)).product()
    }

    pub fn total_invocations(&self) -> u64 {
        self.total_workgroups() * self.invocations_per_workgroup()
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.uniforms.iter().find(|b| b.name == name)
    }

    pub fn define(&self, name: &str) -> Option<&Define> {
        self.defines.iter().find(|d| d.name == name)
    }

    pub fn runtime_defines(&self) -> impl Iterator<Item = &Define> {
        self.defines.iter().filter(|d| d.runtime)
    }

    /// The binding named by `output`, if it exists.
    pub fn output_binding(&self) -> Option<&Binding> {
        self.binding(&self.output.name)
    }

    /// Number of logical output elements (`length` texels × elements per texel).
    pub fn output_elements(&self) -> usize {
        self.output.length as usize * self.output.output_elements_per_texel as usize
    }

    /// Check every target-independent invariant of the context.
    pub fn validate(&self) -> Result<(), GenerateError> {
        let kernel = || self.name.clone();

        for (field, value) in [
            ("dispatch", self.dispatch),
            ("threadGroupSize", self.thread_group_size),
        ] {
            if value.contains(&0) {
                return Err(GenerateError::InvalidDimensions {
                    kernel: kernel(),
                    field,
                    value,
                });
            }
        }
        if self.max_iteration == 0 {
            return Err(GenerateError::InvalidIterationCount { kernel: kernel() });
        }

        let mut seen = BTreeSet::new();
        let names = self
            .uniforms
            .iter()
            .map(|b| b.name.as_str())
            .chain(self.defines.iter().map(|d| d.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(GenerateError::DuplicateName {
                    kernel: kernel(),
                    name: name.to_string(),
                });
            }
        }

        if let Some(b) = self.uniforms.iter().find(|b| b.readonly && b.writeonly) {
            return Err(GenerateError::ConflictingAccess {
                kernel: kernel(),
                name: b.name.clone(),
            });
        }

        let output = self
            .output_binding()
            .ok_or_else(|| GenerateError::OutputNotFound {
                kernel: kernel(),
                name: self.output.name.clone(),
            })?;
        if output.readonly {
            return Err(GenerateError::OutputReadonly {
                kernel: kernel(),
                name: output.name.clone(),
            });
        }

        let per_texel = self.output.output_elements_per_texel;
        if per_texel == 0 || per_texel.saturating_mul(output.format.components) > 4 {
            return Err(GenerateError::InvalidElementsPerTexel {
                kernel: kernel(),
                per_texel,
                format: output.format.to_string(),
            });
        }

        let invocations = self.total_invocations();
        if u64::from(self.output.length) * u64::from(per_texel) != invocations {
            return Err(GenerateError::LengthMismatch {
                kernel: kernel(),
                length: self.output.length,
                per_texel,
                invocations,
            });
        }

        self.check_source(&self.global_declarations)
    }

    /// Reject kernel text that expands a runtime define at compile time.
    pub fn check_source(&self, text: &str) -> Result<(), GenerateError> {
        for define in self.runtime_defines() {
            let expanded = text.lines().any(|line| {
                let mut words = line.split_whitespace();
                words.next() == Some("#define") && words.next() == Some(define.name.as_str())
            });
            if expanded {
                return Err(GenerateError::RuntimeDefineInlined {
                    kernel: self.name.clone(),
                    name: define.name.clone(),
                });
            }
        }
        Ok(())
    }
}
