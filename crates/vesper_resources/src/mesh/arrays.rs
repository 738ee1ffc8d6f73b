//! Conversion between per-attribute arrays and packed surface buffers.

use glam::{Vec2, Vec3, Vec4};
use half::f16;
use vesper_core::math::{Aabb, Color};
use vesper_core::{Result, Rid, ServerError};

use super::format::{ArrayCustomFormat, ArrayFormat, ArrayType, FormatLayout, PrimitiveType, ARRAY_CUSTOM_COUNT};

/// Vertex positions, 3D or 2D.
#[derive(Debug, Clone, PartialEq)]
pub enum Positions {
    D3(Vec<Vec3>),
    D2(Vec<Vec2>),
}

impl Default for Positions {
    fn default() -> Self {
        Self::D3(Vec::new())
    }
}

impl Positions {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::D3(v) => v.len(),
            Self::D2(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Vec3 {
        match self {
            Self::D3(v) => v[i],
            Self::D2(v) => v[i].extend(0.0),
        }
    }
}

/// One custom array together with its encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomArray {
    pub format: ArrayCustomFormat,
    /// `format.components()` floats per vertex.
    pub data: Vec<f32>,
}

/// Unpacked vertex arrays of a surface. An empty array is an absent one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurfaceArrays {
    pub positions: Positions,
    pub normals: Vec<Vec3>,
    /// `w` holds the bitangent sign.
    pub tangents: Vec<Vec4>,
    pub colors: Vec<Color>,
    pub uvs: Vec<Vec2>,
    pub uv2s: Vec<Vec2>,
    pub custom: [Option<CustomArray>; ARRAY_CUSTOM_COUNT],
    /// 4 or 8 bone indices per vertex.
    pub bones: Vec<u16>,
    /// Same count as `bones`.
    pub weights: Vec<f32>,
    pub indices: Vec<u32>,
}

impl SurfaceArrays {
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Format bits implied by which arrays are present.
    #[must_use]
    pub fn format(&self) -> ArrayFormat {
        let mut f = ArrayFormat::empty();
        let mut set = |cond: bool, flag: ArrayFormat| {
            if cond {
                f |= flag;
            }
        };
        set(!self.positions.is_empty(), ArrayFormat::VERTEX);
        set(matches!(self.positions, Positions::D2(_)), ArrayFormat::FLAG_USE_2D_VERTICES);
        set(!self.normals.is_empty(), ArrayFormat::NORMAL);
        set(!self.tangents.is_empty(), ArrayFormat::TANGENT);
        set(!self.colors.is_empty(), ArrayFormat::COLOR);
        set(!self.uvs.is_empty(), ArrayFormat::TEX_UV);
        set(!self.uv2s.is_empty(), ArrayFormat::TEX_UV2);
        set(!self.bones.is_empty(), ArrayFormat::BONES);
        set(!self.weights.is_empty(), ArrayFormat::WEIGHTS);
        set(!self.indices.is_empty(), ArrayFormat::INDEX);
        let vertices = self.positions.len().max(1);
        set(self.bones.len() == vertices * 8, ArrayFormat::FLAG_USE_8_BONE_WEIGHTS);
        for (i, custom) in self.custom.iter().enumerate() {
            if let Some(c) = custom {
                f |= ArrayFormat::of(custom_type(i));
                f = f.with_custom_format(i, c.format);
            }
        }
        f.with_current_version()
    }
}

fn custom_type(index: usize) -> ArrayType {
    ArrayType::from_ordinal(ArrayType::Custom0.ordinal() + index as i32).unwrap_or(ArrayType::Custom0)
}

/// LOD entry: screen-space edge length threshold and its index subset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurfaceLod {
    pub edge_length: f32,
    pub index_data: Vec<u8>,
}

/// Packed surface as stored by the mesh store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurfaceData {
    pub primitive: PrimitiveType,
    pub format: ArrayFormat,
    pub vertex_count: u32,
    /// Positions followed by the normal/tangent block.
    pub vertex_data: Vec<u8>,
    pub attribute_data: Vec<u8>,
    pub skin_data: Vec<u8>,
    pub index_count: u32,
    pub index_data: Vec<u8>,
    pub aabb: Aabb,
    /// Range used to normalize UVs when compressed.
    pub uv_scale: Vec4,
    pub lods: Vec<SurfaceLod>,
    /// One vertex-data-sized block per blend shape.
    pub blend_shape_data: Vec<u8>,
    pub material: Rid,
}

impl SurfaceData {
    #[must_use]
    pub fn layout(&self) -> FormatLayout {
        FormatLayout::new(self.format, self.vertex_count)
    }

    /// Primitives drawn for this surface, indexed or not.
    #[must_use]
    pub fn primitive_count(&self) -> u32 {
        let elements = if self.format.has(ArrayType::Index) { self.index_count } else { self.vertex_count };
        self.primitive.primitive_count(elements)
    }

    /// Checks every buffer against the size the format implies.
    pub fn validate(&self, blend_shape_count: u32) -> Result<()> {
        let layout = self.layout();
        let expect = |what: &'static str, expected: usize, actual: usize| -> Result<()> {
            if expected == actual {
                Ok(())
            } else {
                Err(ServerError::SizeMismatch { what, expected, actual })
            }
        };
        let vertex_size = layout.vertex_buffer_size(self.vertex_count);
        if !(self.format.contains(ArrayFormat::FLAG_USES_EMPTY_VERTEX_ARRAY) && self.vertex_data.is_empty()) {
            expect("vertex buffer", vertex_size, self.vertex_data.len())?;
        }
        expect("attribute buffer", layout.attribute_buffer_size(self.vertex_count), self.attribute_data.len())?;
        expect("skin buffer", layout.skin_buffer_size(self.vertex_count), self.skin_data.len())?;
        if self.format.has(ArrayType::Index) {
            if self.index_count == 0 {
                return Err(ServerError::InvalidArgument("indexed surface with no indices".into()));
            }
            expect("index buffer", self.index_count as usize * layout.index_stride as usize, self.index_data.len())?;
            for lod in &self.lods {
                if lod.index_data.len() % layout.index_stride as usize != 0 {
                    return Err(ServerError::InvalidArgument("LOD index buffer is not a whole number of indices".into()));
                }
            }
        } else if !self.index_data.is_empty() {
            return Err(ServerError::InvalidArgument("index data without the INDEX format bit".into()));
        }
        expect(
            "blend shape buffer",
            vertex_size * blend_shape_count as usize,
            self.blend_shape_data.len(),
        )
    }
}

// ============================================================================
// Octahedral packing
// ============================================================================

fn sign_not_zero(v: f32) -> f32 {
    if v >= 0.0 { 1.0 } else { -1.0 }
}

/// Maps a unit vector to `[0, 1]^2`.
#[must_use]
pub fn octahedron_encode(n: Vec3) -> Vec2 {
    let n = n / (n.x.abs() + n.y.abs() + n.z.abs()).max(f32::EPSILON);
    let o = if n.z >= 0.0 {
        Vec2::new(n.x, n.y)
    } else {
        Vec2::new((1.0 - n.y.abs()) * sign_not_zero(n.x), (1.0 - n.x.abs()) * sign_not_zero(n.y))
    };
    o * 0.5 + 0.5
}

#[must_use]
pub fn octahedron_decode(f: Vec2) -> Vec3 {
    let f = f * 2.0 - 1.0;
    let mut n = Vec3::new(f.x, f.y, 1.0 - f.x.abs() - f.y.abs());
    let t = (-n.z).clamp(0.0, 1.0);
    n.x += if n.x >= 0.0 { -t } else { t };
    n.y += if n.y >= 0.0 { -t } else { t };
    n.normalize_or_zero()
}

fn unorm16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

fn from_unorm16(v: u16) -> f32 {
    f32::from(v) / 65535.0
}

/// Packs a value in `[0, 1]` and a sign into 16 bits: positive values use
/// the upper half of the range, negative ones the lower half.
fn pack_signed_half(v: f32, sign: f32) -> u16 {
    let q = (v.clamp(0.0, 1.0) * 32767.0).round() as u16;
    if sign >= 0.0 { 32768 + q } else { 32767 - q }
}

fn unpack_signed_half(v: u16) -> (f32, f32) {
    if v >= 32768 {
        (f32::from(v - 32768) / 32767.0, 1.0)
    } else {
        (f32::from(32767 - v) / 32767.0, -1.0)
    }
}

/// Tangent angle around `normal`, normalized to `[0, 1]`.
fn tangent_angle(normal: Vec3, tangent: Vec3) -> f32 {
    let (ref_t, ref_b) = normal.normalize_or_zero().any_orthonormal_pair();
    let angle = tangent.dot(ref_b).atan2(tangent.dot(ref_t));
    angle / std::f32::consts::TAU + 0.5
}

fn tangent_from_angle(normal: Vec3, a: f32) -> Vec3 {
    let (ref_t, ref_b) = normal.normalize_or_zero().any_orthonormal_pair();
    let angle = (a - 0.5) * std::f32::consts::TAU;
    ref_t * angle.cos() + ref_b * angle.sin()
}

// ============================================================================
// Encoding
// ============================================================================

struct Writer<'a> {
    buf: &'a mut [u8],
}

impl Writer<'_> {
    fn put<T: bytemuck::Pod>(&mut self, offset: usize, value: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(value);
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

fn read<T: bytemuck::Pod>(buf: &[u8], offset: usize) -> T {
    bytemuck::pod_read_unaligned(&buf[offset..offset + std::mem::size_of::<T>()])
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if actual == 0 || actual == expected {
        Ok(())
    } else {
        Err(ServerError::SizeMismatch { what, expected, actual })
    }
}

/// Axis-aligned bounds of every position, 2D ones lying on `z = 0`.
fn positions_aabb(arrays: &SurfaceArrays) -> Aabb {
    let points: Vec<Vec3> = (0..arrays.positions.len()).map(|i| arrays.positions.get(i)).collect();
    Aabb::from_points(&points)
}

fn uv_scale(arrays: &SurfaceArrays) -> Vec4 {
    let max_abs = |uvs: &[Vec2]| uvs.iter().fold(Vec2::ZERO, |m, uv| m.max(uv.abs())).max(Vec2::ONE);
    let a = max_abs(&arrays.uvs);
    let b = max_abs(&arrays.uv2s);
    Vec4::new(a.x, a.y, b.x, b.y)
}

fn encode_vertex_block(
    arrays: &SurfaceArrays,
    format: ArrayFormat,
    layout: &FormatLayout,
    aabb: &Aabb,
    out: &mut [u8],
) {
    let n = arrays.vertex_count();
    let compressed = format.is_compressed();
    let mut w = Writer { buf: out };
    let vs = layout.vertex_stride as usize;
    let ns = layout.normal_tangent_stride as usize;
    let size = aabb.size().max(Vec3::splat(f32::EPSILON));

    for i in 0..n {
        if format.has(ArrayType::Vertex) {
            let ofs = i * vs;
            match &arrays.positions {
                Positions::D2(v) => w.put(ofs, &[v[i].x, v[i].y]),
                Positions::D3(v) if compressed => {
                    let p = (v[i] - aabb.min) / size;
                    let tangent_w = match (arrays.normals.get(i), arrays.tangents.get(i)) {
                        (Some(nrm), Some(t)) => pack_signed_half(tangent_angle(*nrm, t.truncate()), t.w),
                        _ => 0,
                    };
                    w.put(ofs, &[unorm16(p.x), unorm16(p.y), unorm16(p.z), tangent_w]);
                }
                Positions::D3(v) => w.put(ofs, &v[i].to_array()),
            }
        }
        if format.has(ArrayType::Normal) {
            let ofs = layout.offsets[ArrayType::Normal as usize] as usize + i * ns;
            let e = octahedron_encode(arrays.normals[i]);
            w.put(ofs, &[unorm16(e.x), unorm16(e.y)]);
        }
        if format.has(ArrayType::Tangent) && !compressed {
            let ofs = layout.offsets[ArrayType::Tangent as usize] as usize + i * ns;
            let t = arrays.tangents[i];
            let e = octahedron_encode(t.truncate());
            w.put(ofs, &[unorm16(e.x), pack_signed_half(e.y, t.w)]);
        }
    }
}

fn encode_custom(format: ArrayCustomFormat, values: &[f32], w: &mut Writer<'_>, ofs: usize) {
    match format {
        ArrayCustomFormat::Rgba8Unorm => {
            let b: Vec<u8> = values.iter().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8).collect();
            w.put(ofs, b.as_slice());
        }
        ArrayCustomFormat::Rgba8Snorm => {
            let b: Vec<i8> = values.iter().map(|v| (v.clamp(-1.0, 1.0) * 127.0).round() as i8).collect();
            w.put(ofs, b.as_slice());
        }
        ArrayCustomFormat::RgHalf | ArrayCustomFormat::RgbaHalf => {
            let h: Vec<u16> = values.iter().map(|v| f16::from_f32(*v).to_bits()).collect();
            w.put(ofs, h.as_slice());
        }
        ArrayCustomFormat::RFloat | ArrayCustomFormat::RgFloat | ArrayCustomFormat::RgbFloat | ArrayCustomFormat::RgbaFloat => {
            w.put(ofs, values);
        }
    }
}

fn decode_custom(format: ArrayCustomFormat, buf: &[u8], ofs: usize) -> Vec<f32> {
    let n = format.components();
    match format {
        ArrayCustomFormat::Rgba8Unorm => (0..n).map(|i| f32::from(buf[ofs + i]) / 255.0).collect(),
        ArrayCustomFormat::Rgba8Snorm => (0..n)
            .map(|i| (f32::from(read::<i8>(buf, ofs + i)) / 127.0).max(-1.0))
            .collect(),
        ArrayCustomFormat::RgHalf | ArrayCustomFormat::RgbaHalf => (0..n)
            .map(|i| f16::from_bits(read::<u16>(buf, ofs + i * 2)).to_f32())
            .collect(),
        _ => (0..n).map(|i| read::<f32>(buf, ofs + i * 4)).collect(),
    }
}

/// Packs `arrays` into a surface, validating every array length.
///
/// `compress_flags` may add `FLAG_COMPRESS_ATTRIBUTES`,
/// `FLAG_USE_DYNAMIC_UPDATE` and similar bits to the implied format.
pub fn create_surface_data(
    primitive: PrimitiveType,
    arrays: &SurfaceArrays,
    blend_shapes: &[SurfaceArrays],
    lods: &[(f32, Vec<u32>)],
    compress_flags: ArrayFormat,
) -> Result<SurfaceData> {
    let n = arrays.vertex_count();
    if n == 0 {
        return Err(ServerError::InvalidArgument("surface has no vertices".into()));
    }
    let mut format = arrays.format() | compress_flags;
    if format.is_2d() {
        format.remove(ArrayFormat::FLAG_COMPRESS_ATTRIBUTES);
    }
    if format.has(ArrayType::Tangent) && !format.has(ArrayType::Normal) {
        log::warn!("mesh_create_surface_data_from_arrays: tangents without normals are dropped");
        format.remove(ArrayFormat::TANGENT);
    }

    let bones = format.bone_count();
    check_len("normal array", n, arrays.normals.len())?;
    check_len("tangent array", n, arrays.tangents.len())?;
    check_len("color array", n, arrays.colors.len())?;
    check_len("uv array", n, arrays.uvs.len())?;
    check_len("uv2 array", n, arrays.uv2s.len())?;
    check_len("bone array", n * bones, arrays.bones.len())?;
    check_len("weight array", n * bones, arrays.weights.len())?;
    for custom in arrays.custom.iter().flatten() {
        check_len("custom array", n * custom.format.components(), custom.data.len())?;
    }
    if let Some(bad) = arrays.indices.iter().find(|i| **i as usize >= n) {
        return Err(ServerError::OutOfRange {
            what: "vertex index",
            index: *bad as usize,
            limit: n,
        });
    }

    let vertex_count = n as u32;
    let layout = FormatLayout::new(format, vertex_count);
    let mut aabb = positions_aabb(arrays);
    for shape in blend_shapes {
        if shape.vertex_count() != n {
            return Err(ServerError::SizeMismatch {
                what: "blend shape vertices",
                expected: n,
                actual: shape.vertex_count(),
            });
        }
        aabb = aabb.merge(&positions_aabb(shape));
    }
    let scale = uv_scale(arrays);

    let mut vertex_data = vec![0u8; layout.vertex_buffer_size(vertex_count)];
    encode_vertex_block(arrays, format, &layout, &aabb, &mut vertex_data);

    let mut attribute_data = vec![0u8; layout.attribute_buffer_size(vertex_count)];
    {
        let stride = layout.attribute_stride as usize;
        let compressed = format.is_compressed();
        let mut w = Writer { buf: &mut attribute_data };
        for i in 0..n {
            let base = i * stride;
            if format.has(ArrayType::Color) {
                w.put(base + layout.offsets[ArrayType::Color as usize] as usize, &arrays.colors[i].to_rgba8());
            }
            for (array, uvs, s) in [
                (ArrayType::TexUv, &arrays.uvs, Vec2::new(scale.x, scale.y)),
                (ArrayType::TexUv2, &arrays.uv2s, Vec2::new(scale.z, scale.w)),
            ] {
                if !format.has(array) {
                    continue;
                }
                let ofs = base + layout.offsets[array as usize] as usize;
                if compressed {
                    let uv = uvs[i] / s * 0.5 + 0.5;
                    w.put(ofs, &[unorm16(uv.x), unorm16(uv.y)]);
                } else {
                    w.put(ofs, &uvs[i].to_array());
                }
            }
            for (c, custom) in arrays.custom.iter().enumerate() {
                if let Some(custom) = custom {
                    let k = custom.format.components();
                    let ofs = base + layout.offsets[custom_type(c) as usize] as usize;
                    encode_custom(custom.format, &custom.data[i * k..(i + 1) * k], &mut w, ofs);
                }
            }
        }
    }

    let mut skin_data = vec![0u8; layout.skin_buffer_size(vertex_count)];
    {
        let stride = layout.skin_stride as usize;
        let mut w = Writer { buf: &mut skin_data };
        for i in 0..n {
            let base = i * stride;
            if format.has(ArrayType::Bones) {
                w.put(base + layout.offsets[ArrayType::Bones as usize] as usize, &arrays.bones[i * bones..(i + 1) * bones]);
            }
            if format.has(ArrayType::Weights) {
                let q: Vec<u16> = arrays.weights[i * bones..(i + 1) * bones].iter().map(|v| unorm16(*v)).collect();
                w.put(base + layout.offsets[ArrayType::Weights as usize] as usize, q.as_slice());
            }
        }
    }

    let encode_indices = |indices: &[u32]| -> Vec<u8> {
        if layout.index_stride == 2 {
            let narrow: Vec<u16> = indices.iter().map(|i| *i as u16).collect();
            bytemuck::cast_slice(&narrow).to_vec()
        } else {
            bytemuck::cast_slice(indices).to_vec()
        }
    };
    let index_data = if format.has(ArrayType::Index) {
        encode_indices(&arrays.indices)
    } else {
        Vec::new()
    };

    let mut blend_shape_data = Vec::with_capacity(vertex_data.len() * blend_shapes.len());
    for shape in blend_shapes {
        // Shapes share the base surface's normal/tangent presence.
        let mut shape = shape.clone();
        if format.has(ArrayType::Normal) && shape.normals.is_empty() {
            shape.normals.clone_from(&arrays.normals);
        }
        if format.has(ArrayType::Tangent) && shape.tangents.is_empty() {
            shape.tangents.clone_from(&arrays.tangents);
        }
        let mut block = vec![0u8; vertex_data.len()];
        encode_vertex_block(&shape, format, &layout, &aabb, &mut block);
        blend_shape_data.extend_from_slice(&block);
    }

    let lods = lods
        .iter()
        .map(|(edge_length, indices)| SurfaceLod {
            edge_length: *edge_length,
            index_data: encode_indices(indices),
        })
        .collect();

    Ok(SurfaceData {
        primitive,
        format,
        vertex_count,
        vertex_data,
        attribute_data,
        skin_data,
        index_count: arrays.indices.len() as u32,
        index_data,
        aabb,
        uv_scale: scale,
        lods,
        blend_shape_data,
        material: Rid::INVALID,
    })
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_vertex_block(surface: &SurfaceData, layout: &FormatLayout, block: &[u8], arrays: &mut SurfaceArrays) {
    let format = surface.format;
    let n = surface.vertex_count as usize;
    let compressed = format.is_compressed();
    let vs = layout.vertex_stride as usize;
    let ns = layout.normal_tangent_stride as usize;
    let aabb = surface.aabb;
    let size = aabb.size();

    let mut tangent_angles = Vec::new();
    if format.has(ArrayType::Vertex) {
        if format.is_2d() {
            let v = (0..n).map(|i| Vec2::new(read(block, i * vs), read(block, i * vs + 4))).collect();
            arrays.positions = Positions::D2(v);
        } else if compressed {
            let mut v = Vec::with_capacity(n);
            for i in 0..n {
                let q: [u16; 4] = read(block, i * vs);
                let p = Vec3::new(from_unorm16(q[0]), from_unorm16(q[1]), from_unorm16(q[2]));
                v.push(aabb.min + p * size);
                tangent_angles.push(q[3]);
            }
            arrays.positions = Positions::D3(v);
        } else {
            let v = (0..n).map(|i| Vec3::from_array(read(block, i * vs))).collect();
            arrays.positions = Positions::D3(v);
        }
    }
    if format.has(ArrayType::Normal) {
        let base = layout.offsets[ArrayType::Normal as usize] as usize;
        arrays.normals = (0..n)
            .map(|i| {
                let q: [u16; 2] = read(block, base + i * ns);
                octahedron_decode(Vec2::new(from_unorm16(q[0]), from_unorm16(q[1])))
            })
            .collect();
    }
    if format.has(ArrayType::Tangent) {
        if compressed {
            arrays.tangents = tangent_angles
                .iter()
                .zip(&arrays.normals)
                .map(|(q, nrm)| {
                    let (a, sign) = unpack_signed_half(*q);
                    tangent_from_angle(*nrm, a).extend(sign)
                })
                .collect();
        } else {
            let base = layout.offsets[ArrayType::Tangent as usize] as usize;
            arrays.tangents = (0..n)
                .map(|i| {
                    let q: [u16; 2] = read(block, base + i * ns);
                    let (y, sign) = unpack_signed_half(q[1]);
                    octahedron_decode(Vec2::new(from_unorm16(q[0]), y)).extend(sign)
                })
                .collect();
        }
    }
}

/// Unpacks a surface back into arrays.
#[must_use]
pub fn surface_to_arrays(surface: &SurfaceData) -> SurfaceArrays {
    let format = surface.format;
    let layout = surface.layout();
    let n = surface.vertex_count as usize;
    let mut arrays = SurfaceArrays::default();
    if surface.vertex_data.len() == layout.vertex_buffer_size(surface.vertex_count) {
        decode_vertex_block(surface, &layout, &surface.vertex_data, &mut arrays);
    }

    let stride = layout.attribute_stride as usize;
    let compressed = format.is_compressed();
    let buf = &surface.attribute_data;
    if buf.len() == layout.attribute_buffer_size(surface.vertex_count) {
        if format.has(ArrayType::Color) {
            let ofs = layout.offsets[ArrayType::Color as usize] as usize;
            arrays.colors = (0..n).map(|i| Color::from_rgba8(read(buf, i * stride + ofs))).collect();
        }
        let scale = surface.uv_scale;
        for (array, s) in [
            (ArrayType::TexUv, Vec2::new(scale.x, scale.y)),
            (ArrayType::TexUv2, Vec2::new(scale.z, scale.w)),
        ] {
            if !format.has(array) {
                continue;
            }
            let ofs = layout.offsets[array as usize] as usize;
            let uvs: Vec<Vec2> = (0..n)
                .map(|i| {
                    if compressed {
                        let q: [u16; 2] = read(buf, i * stride + ofs);
                        (Vec2::new(from_unorm16(q[0]), from_unorm16(q[1])) - 0.5) * 2.0 * s
                    } else {
                        Vec2::from_array(read(buf, i * stride + ofs))
                    }
                })
                .collect();
            if array == ArrayType::TexUv {
                arrays.uvs = uvs;
            } else {
                arrays.uv2s = uvs;
            }
        }
        for c in 0..ARRAY_CUSTOM_COUNT {
            let array = custom_type(c);
            if !format.has(array) {
                continue;
            }
            let cf = format.custom_format(c);
            let ofs = layout.offsets[array as usize] as usize;
            let data = (0..n).flat_map(|i| decode_custom(cf, buf, i * stride + ofs)).collect();
            arrays.custom[c] = Some(CustomArray { format: cf, data });
        }
    }

    let bones = format.bone_count();
    let stride = layout.skin_stride as usize;
    let buf = &surface.skin_data;
    if buf.len() == layout.skin_buffer_size(surface.vertex_count) {
        if format.has(ArrayType::Bones) {
            let ofs = layout.offsets[ArrayType::Bones as usize] as usize;
            arrays.bones = (0..n)
                .flat_map(|i| (0..bones).map(move |b| read::<u16>(buf, i * stride + ofs + b * 2)))
                .collect();
        }
        if format.has(ArrayType::Weights) {
            let ofs = layout.offsets[ArrayType::Weights as usize] as usize;
            arrays.weights = (0..n)
                .flat_map(|i| (0..bones).map(move |b| from_unorm16(read(buf, i * stride + ofs + b * 2))))
                .collect();
        }
    }

    if format.has(ArrayType::Index) {
        arrays.indices = decode_indices(&surface.index_data, layout.index_stride);
    }
    arrays
}

#[must_use]
pub fn decode_indices(data: &[u8], index_stride: u32) -> Vec<u32> {
    if index_stride == 2 {
        data.chunks_exact(2).map(|c| u32::from(u16::from_le_bytes([c[0], c[1]]))).collect()
    } else {
        data.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
    }
}

/// Positions, normals and tangents of each blend shape.
#[must_use]
pub fn blend_shape_arrays(surface: &SurfaceData) -> Vec<SurfaceArrays> {
    let layout = surface.layout();
    let block = layout.vertex_buffer_size(surface.vertex_count);
    if block == 0 {
        return Vec::new();
    }
    surface
        .blend_shape_data
        .chunks_exact(block)
        .map(|chunk| {
            let mut arrays = SurfaceArrays::default();
            decode_vertex_block(surface, &layout, chunk, &mut arrays);
            arrays
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> SurfaceArrays {
        SurfaceArrays {
            positions: Positions::D3(vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ]),
            normals: vec![Vec3::Z; 4],
            tangents: vec![Vec4::new(1.0, 0.0, 0.0, 1.0); 4],
            colors: vec![Color::RED, Color::GREEN, Color::BLUE, Color::WHITE],
            uvs: vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y],
            indices: vec![0, 1, 2, 0, 2, 3],
            ..Default::default()
        }
    }

    #[test]
    fn octahedral_round_trip() {
        for n in [Vec3::X, Vec3::NEG_Y, Vec3::new(0.3, -0.5, -0.8).normalize()] {
            let back = octahedron_decode(octahedron_encode(n));
            assert!((back - n).length() < 1e-5, "{n} -> {back}");
        }
    }

    #[test]
    fn buffer_sizes_match_layout() {
        let s = create_surface_data(PrimitiveType::Triangles, &quad(), &[], &[], ArrayFormat::empty()).unwrap();
        let layout = s.layout();
        assert_eq!(s.vertex_data.len(), 4 * (12 + 8));
        assert_eq!(s.attribute_data.len(), 4 * layout.attribute_stride as usize);
        assert_eq!(s.index_data.len(), 6 * 2);
        assert!(s.validate(0).is_ok());
        assert_eq!(s.format.version(), super::super::format::ARRAY_FLAG_FORMAT_VERSION_2);
    }

    #[test]
    fn uncompressed_round_trip() {
        let q = quad();
        let s = create_surface_data(PrimitiveType::Triangles, &q, &[], &[], ArrayFormat::empty()).unwrap();
        let back = surface_to_arrays(&s);
        assert_eq!(back.positions, q.positions);
        assert_eq!(back.colors, q.colors);
        assert_eq!(back.uvs, q.uvs);
        assert_eq!(back.indices, q.indices);
        for (a, b) in back.tangents.iter().zip(&q.tangents) {
            assert!((*a - *b).length() < 1e-3);
        }
    }

    #[test]
    fn compressed_round_trip_is_close() {
        let q = quad();
        let s = create_surface_data(PrimitiveType::Triangles, &q, &[], &[], ArrayFormat::FLAG_COMPRESS_ATTRIBUTES).unwrap();
        assert_eq!(s.vertex_data.len(), 4 * (8 + 4));
        let back = surface_to_arrays(&s);
        let Positions::D3(p) = &back.positions else { panic!("expected 3D positions") };
        assert!((p[2] - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-3);
        assert!((back.tangents[0] - q.tangents[0]).length() < 1e-3);
        assert!((back.uvs[2] - Vec2::ONE).length() < 1e-3);
    }

    #[test]
    fn rejects_mismatched_arrays() {
        let mut q = quad();
        q.normals.pop();
        assert!(create_surface_data(PrimitiveType::Triangles, &q, &[], &[], ArrayFormat::empty()).is_err());
        let mut q = quad();
        q.indices.push(9);
        assert!(create_surface_data(PrimitiveType::Triangles, &q, &[], &[], ArrayFormat::empty()).is_err());
    }

    #[test]
    fn blend_shapes_are_stored_per_shape() {
        let q = quad();
        let mut shape = q.clone();
        shape.positions = Positions::D3(vec![Vec3::splat(0.5); 4]);
        let s = create_surface_data(PrimitiveType::Triangles, &q, &[shape], &[], ArrayFormat::empty()).unwrap();
        assert!(s.validate(1).is_ok());
        let shapes = blend_shape_arrays(&s);
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].positions.get(3), Vec3::splat(0.5));
    }

    #[test]
    fn skin_and_custom_round_trip() {
        let mut q = quad();
        q.bones = (0..16).map(|i| i as u16).collect();
        q.weights = vec![0.25; 16];
        q.custom[1] = Some(CustomArray {
            format: ArrayCustomFormat::RgFloat,
            data: (0..8).map(|i| i as f32).collect(),
        });
        let s = create_surface_data(PrimitiveType::Triangles, &q, &[], &[], ArrayFormat::empty()).unwrap();
        let back = surface_to_arrays(&s);
        assert_eq!(back.bones, q.bones);
        assert!(back.weights.iter().all(|w| (w - 0.25).abs() < 1e-4));
        assert_eq!(back.custom[1], q.custom[1]);
    }
}
