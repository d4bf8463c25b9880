//! Addressing layer: buffers emulated as 2D float textures.
//!
//! A linear element index is mapped to a texel by
//! [`addr_translation_1d_to_2d`], the same arithmetic, in `f32`, as the
//! `addrTranslation_1Dto2D` builtin every emulated getter calls. Packing
//! host arrays into textures and reading them back through that
//! translation must agree exactly; [`TextureMemory`] is the software
//! model of that read path.
//!
//! Layout rules:
//! - textures are RGBA32F, row-major, `width = ceil(sqrt(texels))` capped
//!   at the configured maximum width;
//! - element `k` of a binding with `c` components lives in texel
//!   `k / ept`, channels `(k % ept) * c ..`, where `ept` is the number of
//!   elements packed per texel (only ever > 1 for the output binding);
//! - native storage buffers use std430 strides (vec3 padded to 4).

pub mod builtins;

#[cfg(test)]
mod tests;

use crate::context::ElementFormat;
use crate::error::AddressError;

pub use builtins::{
    decompose, derive_emulated_builtins, fragment_coord, fragment_index, native_builtins,
    native_invocations, Builtins, DispatchDims,
};

/// Channels per texel of every emulated texture.
pub const TEXEL_CHANNELS: usize = 4;

/// Default cap on texture width, the minimum every WebGL 1 device offers.
pub const DEFAULT_MAX_TEXTURE_WIDTH: u32 = 4096;

/// Dimensions of a 2D texture in texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TextureSize {
    pub width: u32,
    pub height: u32,
}

impl TextureSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Smallest near-square texture holding `texels` texels.
    pub fn for_texels(texels: usize, max_width: u32) -> Self {
        let texels = texels.max(1);
        let side = (texels as f64).sqrt().ceil() as u32;
        let width = side.clamp(1, max_width.max(1));
        let height = texels.div_ceil(width as usize) as u32;
        Self { width, height }
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_vec2(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }
}

/// One element read from or written to emulated memory: 1–4 lanes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Element {
    lanes: [f32; 4],
    len: u8,
}

impl Element {
    pub fn scalar(value: f32) -> Self {
        Self::from_slice(&[value])
    }

    /// Build from up to four lanes; extra lanes are ignored.
    pub fn from_slice(values: &[f32]) -> Self {
        let len = values.len().min(4);
        let mut lanes = [0.0; 4];
        lanes[..len].copy_from_slice(&values[..len]);
        Self {
            lanes,
            len: len as u8,
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.lanes[..self.len as usize]
    }

    pub fn components(&self) -> u32 {
        u32::from(self.len)
    }

    /// First lane.
    pub fn x(&self) -> f32 {
        self.lanes[0]
    }
}

/// `addrTranslation_1Dto2D`: linear address → normalized texel origin.
///
/// Scales the address by `(1/w, 1/(w*h))` and keeps the fractional part of
/// the first component, exactly as the generated GLSL does.
pub fn addr_translation_1d_to_2d(address: f32, tex_size: [f32; 2]) -> [f32; 2] {
    let conv = [1.0 / tex_size[0], 1.0 / (tex_size[0] * tex_size[1])];
    let norm = [address * conv[0], address * conv[1]];
    [norm[0] - norm[0].floor(), norm[1]]
}

/// The texel whose origin a translated address designates.
///
/// `coord.x` is the column as a fraction of the width and `coord.y * h`
/// is `row + coord.x`, both carrying f32 rounding error. The column is
/// rounded to the nearest texel edge, a column that rounds up to `w`
/// wraps into the next row, and the row is recovered from
/// `coord.y * h - coord.x`.
pub fn resolve_texel(coord: [f32; 2], size: TextureSize) -> Option<(u32, u32)> {
    let [w, h] = size.as_vec2();
    let mut x = (coord[0] * w).round();
    let mut y = (coord[1] * h - coord[0]).round();
    if x >= w {
        x = 0.0;
        y += 1.0;
    }
    if x < 0.0 || y < 0.0 || y >= h {
        return None;
    }
    Some((x as u32, y as u32))
}

/// Where the elements of one binding live inside a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureLayout {
    pub size: TextureSize,
    pub components: u32,
    pub elements_per_texel: u32,
    /// Logical element count.
    pub elements: usize,
}

impl TextureLayout {
    pub fn new(elements: usize, components: u32, elements_per_texel: u32, max_width: u32) -> Self {
        let elements_per_texel = elements_per_texel.max(1);
        let texels = elements.div_ceil(elements_per_texel as usize);
        Self {
            size: TextureSize::for_texels(texels, max_width),
            components,
            elements_per_texel,
            elements,
        }
    }

    /// Texels actually holding data.
    pub fn texels_used(&self) -> usize {
        self.elements.div_ceil(self.elements_per_texel as usize)
    }

    /// Texel index and first channel of element `index`.
    pub fn locate(&self, index: usize) -> (usize, usize) {
        let ept = self.elements_per_texel as usize;
        (index / ept, (index % ept) * self.components as usize)
    }
}

/// Pack a flat scalar array into RGBA texels (row-major, zero-filled).
pub fn pack_texels(data: &[f32], layout: &TextureLayout) -> Vec<f32> {
    let c = layout.components as usize;
    let mut texels = vec![0.0; layout.size.texel_count() * TEXEL_CHANNELS];
    for (k, element) in data.chunks(c).take(layout.elements).enumerate() {
        let (texel, channel) = layout.locate(k);
        let base = texel * TEXEL_CHANNELS + channel;
        texels[base..base + element.len()].copy_from_slice(element);
    }
    texels
}

/// Inverse of [`pack_texels`]: `elements × components` scalars.
pub fn unpack_texels(texels: &[f32], layout: &TextureLayout) -> Vec<f32> {
    let c = layout.components as usize;
    let mut out = Vec::with_capacity(layout.elements * c);
    for k in 0..layout.elements {
        let (texel, channel) = layout.locate(k);
        let base = texel * TEXEL_CHANNELS + channel;
        match texels.get(base..base + c) {
            Some(lanes) => out.extend_from_slice(lanes),
            None => out.extend(std::iter::repeat(0.0).take(c)),
        }
    }
    out
}

/// Lay a flat scalar array out with std430 element strides.
pub fn pack_buffer(data: &[f32], format: ElementFormat) -> Vec<f32> {
    let c = format.components as usize;
    let stride = format.std430_stride();
    if stride == c {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len() / c * stride);
    for element in data.chunks(c) {
        out.extend_from_slice(element);
        out.extend(std::iter::repeat(0.0).take(stride - element.len()));
    }
    out
}

/// Inverse of [`pack_buffer`] for `elements` elements.
pub fn unpack_buffer(raw: &[f32], format: ElementFormat, elements: usize) -> Vec<f32> {
    let c = format.components as usize;
    let stride = format.std430_stride();
    raw.chunks(stride)
        .take(elements)
        .flat_map(|e| e.iter().take(c).copied())
        .collect()
}

/// Narrow element-addressed view over device memory.
pub trait LinearMemory {
    /// Number of addressable elements.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<Element>;

    fn put(&mut self, index: usize, element: Element) -> Result<(), AddressError>;
}

/// A texture addressed through the emulated target's translation.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureMemory {
    layout: TextureLayout,
    texels: Vec<f32>,
}

impl TextureMemory {
    pub fn new(layout: TextureLayout) -> Self {
        Self {
            texels: vec![0.0; layout.size.texel_count() * TEXEL_CHANNELS],
            layout,
        }
    }

    /// Wrap RGBA texel data; it is resized to the layout if needed.
    pub fn from_texels(layout: TextureLayout, mut texels: Vec<f32>) -> Self {
        texels.resize(layout.size.texel_count() * TEXEL_CHANNELS, 0.0);
        Self { layout, texels }
    }

    pub fn from_data(data: &[f32], layout: TextureLayout) -> Self {
        Self {
            texels: pack_texels(data, &layout),
            layout,
        }
    }

    pub fn layout(&self) -> &TextureLayout {
        &self.layout
    }

    pub fn texels(&self) -> &[f32] {
        &self.texels
    }

    pub fn into_texels(self) -> Vec<f32> {
        self.texels
    }

    /// Offset of the first float of a texel, via the address translation.
    fn texel_offset(&self, texel: usize) -> Option<usize> {
        let size = self.layout.size;
        let coord = addr_translation_1d_to_2d(texel as f32, size.as_vec2());
        let (x, y) = resolve_texel(coord, size)?;
        Some((y as usize * size.width as usize + x as usize) * TEXEL_CHANNELS)
    }

    /// Read a whole texel (all four channels).
    pub fn texel(&self, texel: usize) -> Option<[f32; 4]> {
        let base = self.texel_offset(texel)?;
        let mut out = [0.0; 4];
        out.copy_from_slice(self.texels.get(base..base + TEXEL_CHANNELS)?);
        Some(out)
    }
}

impl LinearMemory for TextureMemory {
    fn len(&self) -> usize {
        self.layout.elements
    }

    fn get(&self, index: usize) -> Option<Element> {
        if index >= self.layout.elements {
            return None;
        }
        let (texel, channel) = self.layout.locate(index);
        let base = self.texel_offset(texel)? + channel;
        let c = self.layout.components as usize;
        Some(Element::from_slice(self.texels.get(base..base + c)?))
    }

    fn put(&mut self, index: usize, element: Element) -> Result<(), AddressError> {
        let len = self.layout.elements;
        if index >= len {
            return Err(AddressError::OutOfBounds { index, len });
        }
        if element.components() != self.layout.components {
            return Err(AddressError::ComponentMismatch {
                expected: self.layout.components,
                actual: element.components(),
            });
        }
        let (texel, channel) = self.layout.locate(index);
        let base = self
            .texel_offset(texel)
            .ok_or(AddressError::OutOfBounds { index, len })?
            + channel;
        self.texels[base..base + element.as_slice().len()].copy_from_slice(element.as_slice());
        Ok(())
    }
}

/// A std430 storage buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferMemory {
    format: ElementFormat,
    elements: usize,
    data: Vec<f32>,
}

impl BufferMemory {
    /// Wrap raw std430 data holding `elements` elements.
    pub fn from_raw(format: ElementFormat, elements: usize, mut data: Vec<f32>) -> Self {
        data.resize(elements * format.std430_stride(), 0.0);
        Self {
            format,
            elements,
            data,
        }
    }

    pub fn from_data(data: &[f32], format: ElementFormat) -> Self {
        let elements = data.len() / format.components.max(1) as usize;
        Self::from_raw(format, elements, pack_buffer(data, format))
    }

    pub fn raw(&self) -> &[f32] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<f32> {
        self.data
    }

    pub fn to_data(&self) -> Vec<f32> {
        unpack_buffer(&self.data, self.format, self.elements)
    }
}

impl LinearMemory for BufferMemory {
    fn len(&self) -> usize {
        self.elements
    }

    fn get(&self, index: usize) -> Option<Element> {
        if index >= self.elements {
            return None;
        }
        let base = index * self.format.std430_stride();
        let c = self.format.components as usize;
        Some(Element::from_slice(self.data.get(base..base + c)?))
    }

    fn put(&mut self, index: usize, element: Element) -> Result<(), AddressError> {
        if index >= self.elements {
            return Err(AddressError::OutOfBounds {
                index,
                len: self.elements,
            });
        }
        if element.components() != self.format.components {
            return Err(AddressError::ComponentMismatch {
                expected: self.format.components,
                actual: element.components(),
            });
        }
        let base = index * self.format.std430_stride();
        self.data[base..base + element.as_slice().len()].copy_from_slice(element.as_slice());
        Ok(())
    }
}
