//! Meshes, submeshes and interleaved vertex packing.

use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};

use crate::bounds::Aabb;
use crate::device::{BufferUsage, DeviceBuffer, DeviceError, RenderDevice};
use crate::material::{BsdfMaterial, MaterialBinding};
use crate::tangent::TangentBasis;
use crate::vertex::{VertexBufferType, VertexLayout};

/// Sentinel joint index for unused bone slots.
pub const UNUSED_JOINT: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveTopology {
    /// Map a glTF primitive mode code. Line loops have no device
    /// equivalent and are rejected.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::PointList),
            1 => Some(Self::LineList),
            3 => Some(Self::LineStrip),
            4 => Some(Self::TriangleList),
            5 => Some(Self::TriangleStrip),
            6 => Some(Self::TriangleFan),
            _ => None,
        }
    }

    /// Triangles described by `indices` under this topology. Non-triangle
    /// topologies yield none.
    pub fn triangles(self, indices: &[i32]) -> Vec<[u32; 3]> {
        let idx = |i: usize| indices[i].max(0) as u32;
        match self {
            Self::TriangleList => indices
                .chunks_exact(3)
                .map(|t| [t[0].max(0) as u32, t[1].max(0) as u32, t[2].max(0) as u32])
                .collect(),
            Self::TriangleStrip => (2..indices.len())
                .map(|i| {
                    if i % 2 == 0 {
                        [idx(i - 2), idx(i - 1), idx(i)]
                    } else {
                        [idx(i - 1), idx(i - 2), idx(i)]
                    }
                })
                .collect(),
            Self::TriangleFan => (2..indices.len())
                .map(|i| [idx(0), idx(i - 1), idx(i)])
                .collect(),
            Self::PointList | Self::LineList | Self::LineStrip => Vec::new(),
        }
    }
}

// =============================================================================
// Vertex packing
// =============================================================================

/// De-interleaved vertex streams of one primitive. Every present stream has
/// one entry per position.
#[derive(Debug, Clone, Default)]
pub struct VertexStreams {
    pub positions: Vec<Vec4>,
    pub normals: Option<Vec<Vec3>>,
    pub tangents: Option<Vec<TangentBasis>>,
    pub texcoords0: Option<Vec<Vec2>>,
    pub texcoords1: Option<Vec<Vec2>>,
    pub joints0: Option<Vec<[u16; 4]>>,
    pub joints1: Option<Vec<[u16; 4]>>,
    pub weights0: Option<Vec<Vec4>>,
    pub weights1: Option<Vec<Vec4>>,
}

impl VertexStreams {
    /// Attribute set implied by the present streams. Bone data always
    /// reserves both index/weight slots plus the bone count.
    pub fn attributes(&self) -> VertexBufferType {
        let mut attributes = VertexBufferType::VERTEX;
        if self.normals.is_some() {
            attributes |= VertexBufferType::NORMAL;
        }
        if self.normals.is_some() && self.tangents.is_some() {
            attributes |= VertexBufferType::TANGENTS;
        }
        if self.texcoords0.is_some() {
            attributes |= VertexBufferType::TEXCOORD0;
            if self.texcoords1.is_some() {
                attributes |= VertexBufferType::TEXCOORD1;
            }
        }
        if self.is_skinned() {
            attributes |= VertexBufferType::BONES;
        }
        attributes
    }

    pub fn is_skinned(&self) -> bool {
        self.joints0.is_some() && self.weights0.is_some()
    }

    fn has_second_bone_set(&self) -> bool {
        self.joints1.is_some() && self.weights1.is_some()
    }

    /// Pack all streams into one interleaved buffer.
    pub fn interleave(&self) -> (VertexLayout, Vec<u8>) {
        let layout = VertexLayout::new(self.attributes());
        let attributes = layout.attributes();
        let mut data = Vec::with_capacity(layout.stride() as usize * self.positions.len());

        let bone_count: f32 = if self.has_second_bone_set() { 8.0 } else { 4.0 };

        for (i, position) in self.positions.iter().enumerate() {
            data.extend_from_slice(bytemuck::bytes_of(position));

            if let Some(normals) = &self.normals {
                let n = normals.get(i).copied().unwrap_or(Vec3::Z).normalize_or_zero();
                data.extend_from_slice(bytemuck::bytes_of(&n));
            }
            if attributes.contains(VertexBufferType::TANGENTS) {
                let basis = self
                    .tangents
                    .as_ref()
                    .and_then(|t| t.get(i))
                    .copied()
                    .unwrap_or(TangentBasis {
                        tangent: Vec3::X,
                        bitangent: Vec3::Y,
                    });
                data.extend_from_slice(bytemuck::bytes_of(&basis.bitangent.normalize_or_zero()));
                data.extend_from_slice(bytemuck::bytes_of(&basis.tangent.normalize_or_zero()));
            }
            if attributes.contains(VertexBufferType::TEXCOORD0) {
                let uv = stream_value(&self.texcoords0, i, Vec2::ZERO);
                data.extend_from_slice(bytemuck::bytes_of(&uv));
            }
            if attributes.contains(VertexBufferType::TEXCOORD1) {
                let uv = stream_value(&self.texcoords1, i, Vec2::ZERO);
                data.extend_from_slice(bytemuck::bytes_of(&uv));
            }
            if attributes.contains(VertexBufferType::BONES) {
                let second = self.has_second_bone_set();
                let joints0 = joint_floats(self.joints0.as_ref().and_then(|j| j.get(i)));
                let joints1 = if second {
                    joint_floats(self.joints1.as_ref().and_then(|j| j.get(i)))
                } else {
                    Vec4::splat(UNUSED_JOINT)
                };
                let weights0 = stream_value(&self.weights0, i, Vec4::ZERO);
                let weights1 = if second {
                    stream_value(&self.weights1, i, Vec4::ZERO)
                } else {
                    Vec4::ZERO
                };

                data.extend_from_slice(bytemuck::bytes_of(&joints0));
                data.extend_from_slice(bytemuck::bytes_of(&joints1));
                data.extend_from_slice(bytemuck::bytes_of(&weights0));
                data.extend_from_slice(bytemuck::bytes_of(&weights1));
                data.extend_from_slice(bytemuck::bytes_of(&bone_count));
            }
        }

        (layout, data)
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(self.positions.iter().map(|p| p.truncate()))
    }
}

fn stream_value<T: Copy>(stream: &Option<Vec<T>>, index: usize, default: T) -> T {
    stream
        .as_ref()
        .and_then(|s| s.get(index))
        .copied()
        .unwrap_or(default)
}

fn joint_floats(joints: Option<&[u16; 4]>) -> Vec4 {
    match joints {
        Some(j) => Vec4::new(j[0] as f32, j[1] as f32, j[2] as f32, j[3] as f32),
        None => Vec4::splat(UNUSED_JOINT),
    }
}

// =============================================================================
// SubMesh
// =============================================================================

/// CPU-side result of building one primitive.
#[derive(Debug, Clone)]
pub struct SubMeshData {
    pub name: String,
    pub layout: VertexLayout,
    pub vertices: Vec<u8>,
    pub number_vertices: u32,
    pub indices: Vec<i32>,
    pub topology: PrimitiveTopology,
    pub aabb: Aabb,
}

/// One drawable primitive: interleaved vertex buffer, index buffer and
/// material.
#[derive(Debug)]
pub struct SubMesh {
    pub name: String,
    pub number_vertices: u32,
    pub number_indices: u32,
    pub layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub double_sided: bool,
    pub material: Arc<BsdfMaterial>,
    pub binding: MaterialBinding,
    pub aabb: Aabb,
    pub vertex_buffer: Arc<dyn DeviceBuffer>,
    pub index_buffer: Arc<dyn DeviceBuffer>,
    vertex_data: Option<Vec<u8>>,
    index_data: Option<Vec<i32>>,
}

impl SubMesh {
    /// Upload `data` to device buffers. Host copies are kept unless
    /// `free_host_memory` is set.
    pub fn upload(
        device: &dyn RenderDevice,
        data: SubMeshData,
        material: Arc<BsdfMaterial>,
        binding: MaterialBinding,
        free_host_memory: bool,
    ) -> Result<Self, DeviceError> {
        let vertex_buffer = device.create_buffer_init(
            &format!("{}_vertices", data.name),
            BufferUsage::Vertex,
            &data.vertices,
        )?;
        let index_buffer = device.create_buffer_init(
            &format!("{}_indices", data.name),
            BufferUsage::Index,
            bytemuck::cast_slice(&data.indices),
        )?;

        let number_indices = data.indices.len() as u32;
        let (vertex_data, index_data) = if free_host_memory {
            (None, None)
        } else {
            (Some(data.vertices), Some(data.indices))
        };

        Ok(Self {
            name: data.name,
            number_vertices: data.number_vertices,
            number_indices,
            layout: data.layout,
            topology: data.topology,
            double_sided: material.double_sided,
            material,
            binding,
            aabb: data.aabb,
            vertex_buffer,
            index_buffer,
            vertex_data,
            index_data,
        })
    }

    pub fn vertex_buffer_type(&self) -> VertexBufferType {
        self.layout.attributes()
    }

    pub fn is_skinned(&self) -> bool {
        self.layout.attributes().contains(VertexBufferType::BONES)
    }

    /// Host copy of the interleaved vertices, if still held.
    pub fn vertex_data(&self) -> Option<&[u8]> {
        self.vertex_data.as_deref()
    }

    /// Host copy of the widened indices, if still held.
    pub fn index_data(&self) -> Option<&[i32]> {
        self.index_data.as_deref()
    }
}

// =============================================================================
// Mesh
// =============================================================================

#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    submeshes: Vec<Arc<SubMesh>>,
    aabb: Aabb,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            submeshes: Vec::new(),
            aabb: Aabb::EMPTY,
        }
    }

    pub fn add_submesh(&mut self, submesh: Arc<SubMesh>) {
        self.aabb = self.aabb.union(&submesh.aabb);
        self.submeshes.push(submesh);
    }

    pub fn submeshes(&self) -> &[Arc<SubMesh>] {
        &self.submeshes
    }

    pub fn aabb(&self) -> Aabb {
        self.aabb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_streams() -> VertexStreams {
        VertexStreams {
            positions: vec![
                Vec4::new(0.0, 0.0, 0.0, 1.0),
                Vec4::new(1.0, 0.0, 0.0, 1.0),
                Vec4::new(0.0, 2.0, 0.0, 1.0),
            ],
            ..Default::default()
        }
    }

    fn read_f32s(data: &[u8], offset: usize, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let s = offset + i * 4;
                f32::from_le_bytes([data[s], data[s + 1], data[s + 2], data[s + 3]])
            })
            .collect()
    }

    #[test]
    fn test_topology_codes() {
        assert_eq!(PrimitiveTopology::from_code(4), Some(PrimitiveTopology::TriangleList));
        assert_eq!(PrimitiveTopology::from_code(2), None);
        assert_eq!(PrimitiveTopology::from_code(7), None);
    }

    #[test]
    fn test_strip_and_fan_triangles() {
        let indices = [0, 1, 2, 3];
        assert_eq!(
            PrimitiveTopology::TriangleStrip.triangles(&indices),
            vec![[0, 1, 2], [2, 1, 3]]
        );
        assert_eq!(
            PrimitiveTopology::TriangleFan.triangles(&indices),
            vec![[0, 1, 2], [0, 2, 3]]
        );
        assert!(PrimitiveTopology::LineList.triangles(&indices).is_empty());
    }

    #[test]
    fn test_position_only_interleave() {
        let (layout, data) = triangle_streams().interleave();
        assert_eq!(layout.stride(), 16);
        assert_eq!(data.len(), 48);
        assert_eq!(read_f32s(&data, 32, 4), vec![0.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_single_bone_set_gets_filler() {
        let mut streams = triangle_streams();
        streams.joints0 = Some(vec![[1, 2, 3, 4]; 3]);
        streams.weights0 = Some(vec![Vec4::new(0.25, 0.25, 0.25, 0.25); 3]);

        let (layout, data) = streams.interleave();
        assert_eq!(layout.stride(), 84);

        let i1 = layout.offset(VertexBufferType::BONE_INDICES1).unwrap() as usize;
        let w1 = layout.offset(VertexBufferType::BONE_WEIGHTS1).unwrap() as usize;
        let n = layout.offset(VertexBufferType::BONE_NUMBERS).unwrap() as usize;
        let i0 = layout.offset(VertexBufferType::BONE_INDICES0).unwrap() as usize;

        assert_eq!(read_f32s(&data, i0, 4), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(read_f32s(&data, i1, 4), vec![-1.0; 4]);
        assert_eq!(read_f32s(&data, w1, 4), vec![0.0; 4]);
        assert_eq!(read_f32s(&data, n, 1), vec![4.0]);
    }

    #[test]
    fn test_two_bone_sets_count_eight() {
        let mut streams = triangle_streams();
        streams.joints0 = Some(vec![[0, 0, 0, 0]; 3]);
        streams.weights0 = Some(vec![Vec4::splat(0.125); 3]);
        streams.joints1 = Some(vec![[5, 6, 7, 8]; 3]);
        streams.weights1 = Some(vec![Vec4::splat(0.125); 3]);

        let (layout, data) = streams.interleave();
        let stride = layout.stride() as usize;
        let i1 = layout.offset(VertexBufferType::BONE_INDICES1).unwrap() as usize;
        let n = layout.offset(VertexBufferType::BONE_NUMBERS).unwrap() as usize;
        assert_eq!(read_f32s(&data, stride + i1, 4), vec![5.0, 6.0, 7.0, 8.0]);
        assert_eq!(read_f32s(&data, stride + n, 1), vec![8.0]);
    }

    #[test]
    fn test_texcoord1_requires_texcoord0() {
        let mut streams = triangle_streams();
        streams.texcoords1 = Some(vec![Vec2::ZERO; 3]);
        assert_eq!(streams.attributes(), VertexBufferType::VERTEX);
    }

    #[test]
    fn test_normals_are_normalized() {
        let mut streams = triangle_streams();
        streams.normals = Some(vec![Vec3::new(0.0, 0.0, 2.0); 3]);
        let (layout, data) = streams.interleave();
        let offset = layout.offset(VertexBufferType::NORMAL).unwrap() as usize;
        assert_eq!(read_f32s(&data, offset, 3), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_aabb_from_positions() {
        let aabb = triangle_streams().aabb();
        assert_eq!(aabb.min, Vec3::ZERO);
        assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 0.0));
    }
}
