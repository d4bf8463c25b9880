//! Precompiled bundles: generated sources for every target plus the
//! Kernel Context they were generated from, as one JSON document.
//!
//! ```json
//! {"shaders": {"native": "...", "emulated": "..."}, "context": {...}}
//! ```
//!
//! Bundles written by older tooling key the sources `"WebGPU"` and
//! `"WebGL"`; both spellings are read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codegen::{self, Target};
use crate::context::KernelContext;
use crate::error::BundleError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub shaders: BTreeMap<Target, String>,
    pub context: KernelContext,
}

impl Bundle {
    /// Generate both targets from one context.
    pub fn compile(
        context: &KernelContext,
        native_main: &str,
        emulated_main: &str,
    ) -> Result<Self, BundleError> {
        let mut shaders = BTreeMap::new();
        shaders.insert(
            Target::Native,
            codegen::generate(Target::Native, context, native_main)?,
        );
        shaders.insert(
            Target::Emulated,
            codegen::generate(Target::Emulated, context, emulated_main)?,
        );
        Ok(Self {
            shaders,
            context: context.clone(),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, BundleError> {
        let bundle: Bundle = serde_json::from_str(text)?;
        if bundle.shaders.is_empty() {
            return Err(BundleError::Empty {
                kernel: bundle.context.name,
            });
        }
        Ok(bundle)
    }

    pub fn to_json(&self) -> Result<String, BundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The precompiled source for `target`, if the bundle carries one.
    pub fn shader(&self, target: Target) -> Option<&str> {
        self.shaders.get(&target).map(String::as_str)
    }

    /// Targets the bundle carries source for.
    pub fn targets(&self) -> impl Iterator<Item = Target> + '_ {
        self.shaders.keys().copied()
    }

    /// BLAKE3 digest (hex) over every source and the context.
    pub fn digest(&self) -> Result<String, BundleError> {
        let mut hasher = blake3::Hasher::new();
        for (target, source) in &self.shaders {
            hasher.update(target.name().as_bytes());
            hasher.update(&(source.len() as u64).to_le_bytes());
            hasher.update(source.as_bytes());
        }
        hasher.update(&serde_json::to_vec(&self.context)?);
        Ok(hasher.finalize().to_hex().to_string())
    }
}
