//! Builtin library: static GLSL every generated unit of a target links in.

use super::Target;

/// Address translation and the no-op `barrier()` of the emulated target.
/// A fragment never shares memory with its neighbours, so synchronization
/// has nothing to wait for.
pub const EMULATED: &str = include_str!("builtins/emulated.glsl");

/// Helpers for the native target; `barrier()` is a hardware intrinsic there.
pub const NATIVE: &str = include_str!("builtins/native.glsl");

/// The builtin library text for `target`.
pub fn library(target: Target) -> &'static str {
    match target {
        Target::Native => NATIVE,
        Target::Emulated => EMULATED,
    }
}
