//! Host ↔ GPU word conversion.
//!
//! Host data is always `f32`. Integer formats are stored on the GPU as
//! raw `i32`/`u32` words, so values are converted on upload and back on
//! read-back. The parameter block follows std140 rules for the scalar and
//! vector members a kernel may declare.

use crate::context::{ElementFormat, ScalarKind};

/// Convert host floats to the 32-bit words the GPU stores for `scalar`.
pub fn to_words(data: &[f32], scalar: ScalarKind) -> Vec<u32> {
    data.iter()
        .map(|&v| match scalar {
            ScalarKind::Float => v.to_bits(),
            ScalarKind::Int => (v as i32) as u32,
            ScalarKind::Uint => v as u32,
        })
        .collect()
}

/// Inverse of [`to_words`].
pub fn from_words(words: &[u32], scalar: ScalarKind) -> Vec<f32> {
    words
        .iter()
        .map(|&w| match scalar {
            ScalarKind::Float => f32::from_bits(w),
            ScalarKind::Int => (w as i32) as f32,
            ScalarKind::Uint => w as f32,
        })
        .collect()
}

/// std140 base alignment of a non-array member, in words.
fn std140_align(format: ElementFormat) -> usize {
    match format.components {
        1 => 1,
        2 => 2,
        _ => 4,
    }
}

/// Pack parameter block members in declaration order.
///
/// `values` pairs each member with its host value; a missing or short
/// value leaves zeros behind. The block is padded to 16 bytes.
pub fn pack_std140(members: &[(ElementFormat, Option<&[f32]>)]) -> Vec<u32> {
    let mut words: Vec<u32> = Vec::new();
    for (format, value) in members {
        let align = std140_align(*format);
        let offset = words.len().div_ceil(align) * align;
        words.resize(offset, 0);
        let c = format.components as usize;
        let mut member = value.map(|v| to_words(v, format.scalar)).unwrap_or_default();
        member.resize(c, 0);
        words.extend(member);
    }
    let padded = words.len().div_ceil(4).max(1) * 4;
    words.resize(padded, 0);
    words
}
