//! Built-in procedural geometry.

use std::f32::consts::PI;

use glam::{Vec2, Vec3, Vec4};

use super::arrays::{Positions, SurfaceArrays};

/// UV sphere centered at the origin.
///
/// `latitudes` rings from pole to pole and `longitudes` segments around the
/// Y axis; both are clamped to sensible minimums.
#[must_use]
pub fn sphere_arrays(latitudes: u32, longitudes: u32, radius: f32) -> SurfaceArrays {
    let lats = latitudes.max(2);
    let lons = longitudes.max(3);

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut tangents = Vec::new();
    let mut uvs = Vec::new();
    let mut indices = Vec::new();

    for y in 0..=lats {
        let v = y as f32 / lats as f32;
        let theta = v * PI;
        let ring = theta.sin();
        let py = theta.cos();
        for x in 0..=lons {
            let u = x as f32 / lons as f32;
            let phi = u * 2.0 * PI;
            let n = Vec3::new(ring * phi.cos(), py, ring * phi.sin());
            positions.push(n * radius);
            normals.push(n);
            // Direction of increasing longitude.
            tangents.push(Vec4::new(-phi.sin(), 0.0, phi.cos(), 1.0));
            uvs.push(Vec2::new(u, v));
        }
    }

    let stride = lons + 1;
    for y in 0..lats {
        for x in 0..lons {
            let v0 = y * stride + x;
            let v1 = v0 + 1;
            let v2 = v0 + stride;
            let v3 = v2 + 1;
            if y != 0 {
                indices.extend_from_slice(&[v0, v2, v1]);
            }
            if y != lats - 1 {
                indices.extend_from_slice(&[v1, v2, v3]);
            }
        }
    }

    SurfaceArrays {
        positions: Positions::D3(positions),
        normals,
        tangents,
        uvs,
        indices,
        ..Default::default()
    }
}

/// Unit cube centered at the origin, one quad per face.
#[must_use]
pub fn box_arrays(size: Vec3) -> SurfaceArrays {
    let h = size * 0.5;
    let faces = [
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];
    let mut arrays = SurfaceArrays::default();
    let mut positions = Vec::new();
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let base = positions.len() as u32;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let p = normal + tangent * (u * 2.0 - 1.0) + bitangent * (v * 2.0 - 1.0);
            positions.push(p * h);
            arrays.normals.push(normal);
            arrays.tangents.push(tangent.extend(1.0));
            arrays.uvs.push(Vec2::new(u, 1.0 - v));
        }
        arrays.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    arrays.positions = Positions::D3(positions);
    arrays
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_indices_stay_in_range() {
        let s = sphere_arrays(8, 16, 2.0);
        let n = s.vertex_count() as u32;
        assert!(s.indices.iter().all(|i| *i < n));
        assert_eq!(s.indices.len() % 3, 0);
        assert!(s.normals.iter().all(|n| (n.length() - 1.0).abs() < 1e-4));
    }

    #[test]
    fn box_has_six_faces() {
        let b = box_arrays(Vec3::ONE);
        assert_eq!(b.vertex_count(), 24);
        assert_eq!(b.indices.len(), 36);
    }
}
