//! Compute built-ins: what the hardware provides on the native target and
//! how the emulated target re-derives the same values from a fragment.
//!
//! Invocations are numbered workgroup-major (workgroup x fastest, then y,
//! then z), and within a workgroup by `localInvocationIndex`. The
//! emulated target draws fragment `n` for invocation `n`, so
//! [`decompose`] must invert exactly that numbering.

use super::TextureSize;
use crate::context::KernelContext;

/// Workgroup count and size of one dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DispatchDims {
    pub num_work_groups: [u32; 3],
    pub work_group_size: [u32; 3],
}

impl DispatchDims {
    pub fn new(num_work_groups: [u32; 3], work_group_size: [u32; 3]) -> Self {
        Self {
            num_work_groups,
            work_group_size,
        }
    }

    pub fn from_context(context: &KernelContext) -> Self {
        Self::new(context.dispatch, context.thread_group_size)
    }

    pub fn group_volume(&self) -> u32 {
        self.work_group_size.iter().product()
    }

    pub fn total_invocations(&self) -> u64 {
        let groups: u64 = self.num_work_groups.iter().map(|&n| u64::from(n)).product();
        groups * u64::from(self.group_volume())
    }
}

/// Built-in values seen by one invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Builtins {
    pub global_invocation_id: [u32; 3],
    pub local_invocation_id: [u32; 3],
    pub work_group_id: [u32; 3],
    pub local_invocation_index: u32,
    /// Position of the invocation in the dispatch-wide numbering.
    pub global_invocation_index: u32,
}

/// Built-ins the hardware hands to invocation `local` of workgroup `group`.
pub fn native_builtins(group: [u32; 3], local: [u32; 3], dims: DispatchDims) -> Builtins {
    let [tx, ty, _] = dims.work_group_size;
    let [nx, ny, _] = dims.num_work_groups;
    let local_invocation_index = local[2] * tx * ty + local[1] * tx + local[0];
    let group_linear = group[2] * nx * ny + group[1] * nx + group[0];
    Builtins {
        global_invocation_id: [
            group[0] * dims.work_group_size[0] + local[0],
            group[1] * dims.work_group_size[1] + local[1],
            group[2] * dims.work_group_size[2] + local[2],
        ],
        local_invocation_id: local,
        work_group_id: group,
        local_invocation_index,
        global_invocation_index: group_linear * dims.group_volume() + local_invocation_index,
    }
}

/// Every invocation of a native dispatch, in global-index order.
pub fn native_invocations(dims: DispatchDims) -> impl Iterator<Item = Builtins> {
    let [nx, ny, nz] = dims.num_work_groups;
    let [tx, ty, tz] = dims.work_group_size;
    grid(nx, ny, nz).flat_map(move |group| {
        grid(tx, ty, tz).map(move |local| native_builtins(group, local, dims))
    })
}

/// `[x, y, z]` over a box, x fastest.
fn grid(x: u32, y: u32, z: u32) -> impl Iterator<Item = [u32; 3]> {
    (0..z).flat_map(move |k| (0..y).flat_map(move |j| (0..x).map(move |i| [i, j, k])))
}

/// Recover every built-in from a dispatch-wide invocation index.
pub fn decompose(global_invocation_index: u32, dims: DispatchDims) -> Builtins {
    let [tx, ty, _] = dims.work_group_size;
    let [nx, ny, _] = dims.num_work_groups;
    let volume = dims.group_volume();

    let group_linear = global_invocation_index / volume;
    let work_group_id = [
        group_linear % nx,
        (group_linear / nx) % ny,
        group_linear / (nx * ny),
    ];

    let local_linear = global_invocation_index - group_linear * volume;
    let lz = local_linear / (tx * ty);
    let ly = (local_linear - lz * tx * ty) / tx;
    let lx = local_linear - lz * tx * ty - ly * tx;
    let local_invocation_id = [lx, ly, lz];

    Builtins {
        global_invocation_id: [
            work_group_id[0] * dims.work_group_size[0] + lx,
            work_group_id[1] * dims.work_group_size[1] + ly,
            work_group_id[2] * dims.work_group_size[2] + lz,
        ],
        local_invocation_id,
        work_group_id,
        local_invocation_index: lz * tx * ty + ly * tx + lx,
        global_invocation_index,
    }
}

/// `floor(coord.x * W) + floor(coord.y * H) * W`, in f32 like the shader.
pub fn fragment_index(tex_coord: [f32; 2], output_size: TextureSize) -> u32 {
    let [w, h] = output_size.as_vec2();
    let x = (tex_coord[0] * w).floor() as u32;
    let y = (tex_coord[1] * h).floor() as u32;
    x + y * output_size.width
}

/// Normalized texture coordinate of the centre of texel `texel`, as the
/// rasterizer interpolates `v_TexCoord` for a full-screen quad.
pub fn fragment_coord(texel: u32, output_size: TextureSize) -> [f32; 2] {
    let x = texel % output_size.width;
    let y = texel / output_size.width;
    let [w, h] = output_size.as_vec2();
    [(x as f32 + 0.5) / w, (y as f32 + 0.5) / h]
}

/// Built-ins of the fragment at `tex_coord` on the emulated target.
pub fn derive_emulated_builtins(
    tex_coord: [f32; 2],
    output_size: TextureSize,
    dims: DispatchDims,
) -> Builtins {
    decompose(fragment_index(tex_coord, output_size), dims)
}
