//! Tangent space generation.

use glam::{Vec2, Vec3, Vec4};

/// Per-vertex tangent basis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TangentBasis {
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

/// Bitangents from explicit glTF tangents: `cross(n, t.xyz) * t.w`.
pub fn from_explicit(normals: &[Vec3], tangents: &[Vec4]) -> Vec<TangentBasis> {
    normals
        .iter()
        .zip(tangents)
        .map(|(normal, tangent)| {
            let n = normal.normalize_or_zero();
            let t = tangent.truncate().normalize_or_zero();
            TangentBasis {
                tangent: t,
                bitangent: n.cross(t) * tangent.w,
            }
        })
        .collect()
}

/// Generate tangents from position and UV deltas.
///
/// Every triangle contributes its normalized tangent to each of its corners;
/// contributions are summed, then normalized. Triangles whose UV Jacobian
/// determinant is zero contribute nothing. Vertices left without a tangent
/// get [`fallback_tangent`].
pub fn generate(
    positions: &[Vec3],
    normals: &[Vec3],
    uvs: &[Vec2],
    triangles: &[[u32; 3]],
) -> Vec<TangentBasis> {
    let mut accumulated = vec![Vec3::ZERO; positions.len()];

    for &[a, b, c] in triangles {
        let (a, b, c) = (a as usize, b as usize, c as usize);
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        let (Some(uv_a), Some(uv_b), Some(uv_c)) = (uvs.get(a), uvs.get(b), uvs.get(c)) else {
            continue;
        };

        let dp0 = positions[b] - positions[a];
        let dp1 = positions[c] - positions[a];
        let du0 = *uv_b - *uv_a;
        let du1 = *uv_c - *uv_a;

        let divisor = du0.x * du1.y - du0.y * du1.x;
        if divisor == 0.0 {
            continue;
        }
        let r = 1.0 / divisor;
        let tangent = ((dp0 * du1.y - dp1 * du0.y) * r).normalize_or_zero();

        accumulated[a] += tangent;
        accumulated[b] += tangent;
        accumulated[c] += tangent;
    }

    accumulated
        .into_iter()
        .enumerate()
        .map(|(i, sum)| {
            let normal = normals.get(i).copied().unwrap_or(Vec3::Z).normalize_or_zero();
            let tangent = sum.try_normalize().unwrap_or_else(|| fallback_tangent(normal));
            TangentBasis {
                tangent,
                bitangent: normal.cross(tangent),
            }
        })
        .collect()
}

/// Deterministic tangent for a vertex without usable UV derivatives: the
/// axis-permuted normal `(n.z, n.x, n.y)` made orthogonal to `n`.
pub fn fallback_tangent(normal: Vec3) -> Vec3 {
    let permuted = Vec3::new(normal.z, normal.x, normal.y);
    (permuted - normal * normal.dot(permuted))
        .try_normalize()
        .unwrap_or_else(|| {
            if normal.length_squared() > 0.0 {
                normal.normalize().any_orthonormal_vector()
            } else {
                Vec3::X
            }
        })
}
