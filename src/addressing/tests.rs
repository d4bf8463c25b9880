use proptest::prelude::*;

use super::*;

fn dims(n: [u32; 3], t: [u32; 3]) -> DispatchDims {
    DispatchDims::new(n, t)
}

/// Derive every invocation of `d` the way the emulated target does.
fn assert_emulation_matches(d: DispatchDims) {
    let total = d.total_invocations() as usize;
    let size = TextureSize::for_texels(total, DEFAULT_MAX_TEXTURE_WIDTH);
    for native in native_invocations(d) {
        let coord = fragment_coord(native.global_invocation_index, size);
        let emulated = derive_emulated_builtins(coord, size, d);
        assert_eq!(emulated, native, "dims {:?}", d);
    }
}

#[test]
fn test_texture_size_near_square() {
    assert_eq!(TextureSize::for_texels(8, 4096), TextureSize::new(3, 3));
    assert_eq!(TextureSize::for_texels(16, 4096), TextureSize::new(4, 4));
    assert_eq!(TextureSize::for_texels(17, 4096), TextureSize::new(5, 4));
    assert_eq!(TextureSize::for_texels(0, 4096), TextureSize::new(1, 1));
    assert_eq!(TextureSize::for_texels(100, 8), TextureSize::new(8, 13));
}

#[test]
fn test_translation_matches_shader_formula() {
    let [x, y] = addr_translation_1d_to_2d(5.0, [4.0, 2.0]);
    assert_eq!(x, 0.25);
    assert_eq!(y, 0.625);
    assert_eq!(resolve_texel([x, y], TextureSize::new(4, 2)), Some((1, 1)));
}

#[test]
fn test_resolve_wraps_rounded_up_column() {
    // Column just short of 1.0: the address sits on the next row's origin.
    let size = TextureSize::new(7, 7);
    assert_eq!(resolve_texel([0.999_999_9, 1.999_999_9 / 7.0], size), Some((0, 2)));
    assert_eq!(resolve_texel([0.0, 1.0], size), None);
}

#[test]
fn test_native_invocation_order() {
    let d = dims([2, 1, 1], [2, 2, 1]);
    let all: Vec<Builtins> = native_invocations(d).collect();
    assert_eq!(all.len(), 8);
    for (i, b) in all.iter().enumerate() {
        assert_eq!(b.global_invocation_index, i as u32);
    }
    assert_eq!(all[2].local_invocation_id, [0, 1, 0]);
    assert_eq!(all[2].local_invocation_index, 2);
    assert_eq!(all[5].work_group_id, [1, 0, 0]);
    assert_eq!(all[5].global_invocation_id, [3, 0, 0]);
}

#[test]
fn test_single_group_decomposition() {
    let d = dims([1, 1, 1], [8, 1, 1]);
    for i in 0..8 {
        let b = decompose(i, d);
        assert_eq!(b.global_invocation_id, [i, 0, 0]);
        assert_eq!(b.work_group_id, [0, 0, 0]);
        assert_eq!(b.local_invocation_index, i);
    }
}

#[test]
fn test_emulation_matches_native_grid() {
    for n in [[1, 1, 1], [2, 1, 1], [3, 2, 1], [1, 4, 2], [2, 3, 4]] {
        for t in [[1, 1, 1], [8, 1, 1], [3, 3, 1], [4, 2, 3], [1, 1, 5]] {
            assert_emulation_matches(dims(n, t));
        }
    }
}

#[test]
fn test_fragment_index_of_centres() {
    let size = TextureSize::new(5, 3);
    for texel in 0..15 {
        assert_eq!(fragment_index(fragment_coord(texel, size), size), texel);
    }
}

#[test]
fn test_pack_scalars_row_major() {
    let layout = TextureLayout::new(5, 1, 1, DEFAULT_MAX_TEXTURE_WIDTH);
    assert_eq!(layout.size, TextureSize::new(3, 2));
    let texels = pack_texels(&[1.0, 2.0, 3.0, 4.0, 5.0], &layout);
    assert_eq!(texels.len(), 6 * 4);
    assert_eq!(&texels[0..4], &[1.0, 0.0, 0.0, 0.0]);
    assert_eq!(&texels[12..16], &[4.0, 0.0, 0.0, 0.0]);
    assert_eq!(&texels[20..24], &[0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_pack_multiple_elements_per_texel() {
    let layout = TextureLayout::new(6, 2, 2, DEFAULT_MAX_TEXTURE_WIDTH);
    assert_eq!(layout.texels_used(), 3);
    let data: Vec<f32> = (1..=12).map(|v| v as f32).collect();
    let texels = pack_texels(&data, &layout);
    assert_eq!(&texels[0..4], &[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(&texels[8..12], &[9.0, 10.0, 11.0, 12.0]);
    assert_eq!(unpack_texels(&texels, &layout), data);
}

#[test]
fn test_vec3_buffer_is_padded() {
    let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let raw = pack_buffer(&data, ElementFormat::VEC3_ARRAY);
    assert_eq!(raw, vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0]);
    assert_eq!(unpack_buffer(&raw, ElementFormat::VEC3_ARRAY, 2), data.to_vec());
}

#[test]
fn test_buffer_memory_get_put() {
    let mut mem = BufferMemory::from_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], ElementFormat::VEC3_ARRAY);
    assert_eq!(mem.len(), 2);
    assert_eq!(mem.get(1).unwrap().as_slice(), &[4.0, 5.0, 6.0]);
    mem.put(0, Element::from_slice(&[7.0, 8.0, 9.0])).unwrap();
    assert_eq!(mem.to_data(), vec![7.0, 8.0, 9.0, 4.0, 5.0, 6.0]);
    assert_eq!(
        mem.put(2, Element::from_slice(&[0.0, 0.0, 0.0])),
        Err(AddressError::OutOfBounds { index: 2, len: 2 })
    );
    assert_eq!(
        mem.put(0, Element::scalar(1.0)),
        Err(AddressError::ComponentMismatch {
            expected: 3,
            actual: 1
        })
    );
    assert!(mem.get(2).is_none());
}

#[test]
fn test_texture_memory_put_then_get() {
    let layout = TextureLayout::new(10, 2, 1, DEFAULT_MAX_TEXTURE_WIDTH);
    let mut mem = TextureMemory::new(layout);
    for i in 0..10 {
        mem.put(i, Element::from_slice(&[i as f32, -(i as f32)])).unwrap();
    }
    for i in 0..10 {
        assert_eq!(mem.get(i).unwrap().as_slice(), &[i as f32, -(i as f32)]);
    }
    assert!(mem.get(10).is_none());
    let flat = unpack_texels(mem.texels(), mem.layout());
    assert_eq!(&flat[..4], &[0.0, 0.0, 1.0, -1.0]);
}

proptest! {
    #[test]
    fn prop_round_trip_through_translation(
        data in prop::collection::vec(-1.0e6f32..1.0e6, 1..3000),
        max_width in prop::sample::select(vec![7u32, 64, 100, 4096]),
    ) {
        let layout = TextureLayout::new(data.len(), 1, 1, max_width);
        let mem = TextureMemory::from_data(&data, layout);
        for (i, v) in data.iter().enumerate() {
            prop_assert_eq!(mem.get(i).map(|e| e.x()), Some(*v));
        }
        prop_assert_eq!(unpack_texels(mem.texels(), &layout), data);
    }

    #[test]
    fn prop_round_trip_vectors(
        components in 1u32..=4,
        elements in 1usize..600,
        seed in any::<u32>(),
    ) {
        let data: Vec<f32> = (0..elements * components as usize)
            .map(|i| (i as u32 ^ seed) as f32)
            .collect();
        let layout = TextureLayout::new(elements, components, 1, DEFAULT_MAX_TEXTURE_WIDTH);
        let mem = TextureMemory::from_data(&data, layout);
        let c = components as usize;
        for k in 0..elements {
            let element = mem.get(k).unwrap();
            prop_assert_eq!(element.as_slice(), &data[k * c..k * c + c]);
        }
    }

    #[test]
    fn prop_emulated_builtins_match_native(
        n in prop::array::uniform3(1u32..=16),
        t in prop::array::uniform3(1u32..=16),
        picks in prop::collection::vec(any::<u32>(), 64),
    ) {
        let d = dims(n, t);
        let total = d.total_invocations() as u32;
        let size = TextureSize::for_texels(total as usize, DEFAULT_MAX_TEXTURE_WIDTH);
        let [tx, ty, _] = t;
        let [nx, ny, _] = n;
        let mut indices: Vec<u32> = (0..total.min(64)).collect();
        indices.extend(total.saturating_sub(64)..total);
        indices.extend(picks.iter().map(|p| p % total));
        for index in indices {
            // Rebuild the native invocation for this index independently.
            let volume = d.group_volume();
            let g = index / volume;
            let l = index % volume;
            let group = [g % nx, (g / nx) % ny, g / (nx * ny)];
            let local = [l % tx, (l / tx) % ty, l / (tx * ty)];
            let native = native_builtins(group, local, d);
            prop_assert_eq!(native.global_invocation_index, index);

            let emulated = derive_emulated_builtins(fragment_coord(index, size), size, d);
            prop_assert_eq!(emulated, native);
        }
    }
}
