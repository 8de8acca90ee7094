//! Mesh and submesh building.
//!
//! Each glTF primitive becomes one [`SubMesh`]: its attribute accessors are
//! read into [`VertexStreams`], validated against the position count,
//! completed with a tangent basis and packed into one interleaved buffer.

use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};
use gltf::Semantic;

use crate::accessor::{AccessorView, BufferSet, ComponentType};
use crate::error::ImportError;
use crate::mesh::{Mesh, PrimitiveTopology, SubMesh, SubMeshData, VertexStreams};
use crate::tangent::{self, TangentBasis};

use super::Importer;

/// Reads of one primitive, tagged with the submesh name for errors.
struct PrimitiveReader<'a> {
    buffers: &'a BufferSet,
    primitive: &'a gltf::Primitive<'a>,
    submesh: &'a str,
}

impl<'a> PrimitiveReader<'a> {
    fn view(&self, semantic: &Semantic, attribute: &'static str) -> Result<Option<AccessorView<'a>>, ImportError> {
        let Some(accessor) = self.primitive.get(semantic) else {
            return Ok(None);
        };
        AccessorView::new(&accessor, self.buffers)
            .map(Some)
            .ok_or_else(|| ImportError::accessor(format!("{} of {}", attribute, self.submesh)))
    }

    fn unsupported(&self, attribute: &'static str, reason: impl Into<String>) -> ImportError {
        ImportError::UnsupportedAccessor {
            submesh: self.submesh.to_string(),
            attribute,
            reason: reason.into(),
        }
    }

    /// Check element count and component count of an attribute.
    fn check(
        &self,
        view: &AccessorView<'_>,
        attribute: &'static str,
        expected: usize,
        components: usize,
    ) -> Result<(), ImportError> {
        if view.count() != expected {
            return Err(ImportError::AccessorCountMismatch {
                submesh: self.submesh.to_string(),
                attribute,
                expected,
                found: view.count(),
            });
        }
        if view.components() != components {
            return Err(self.unsupported(
                attribute,
                format!("{} components, expected {}", view.components(), components),
            ));
        }
        Ok(())
    }

    fn read_all<T>(
        &self,
        view: &AccessorView<'_>,
        attribute: &'static str,
        read: impl Fn(&AccessorView<'_>, usize) -> Option<T>,
    ) -> Result<Vec<T>, ImportError> {
        (0..view.count())
            .map(|i| {
                read(view, i).ok_or_else(|| {
                    ImportError::accessor(format!("{} of {} element {}", attribute, self.submesh, i))
                })
            })
            .collect()
    }

    /// Float, or normalized unsigned byte/short, as texcoords and weights allow.
    fn check_normalized(&self, view: &AccessorView<'_>, attribute: &'static str) -> Result<(), ImportError> {
        let ok = match view.component_type() {
            ComponentType::Float => true,
            ComponentType::UnsignedByte | ComponentType::UnsignedShort => view.is_normalized(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.unsupported(
                attribute,
                format!("component type {:?} (normalized: {})", view.component_type(), view.is_normalized()),
            ))
        }
    }

    fn check_float(&self, view: &AccessorView<'_>, attribute: &'static str) -> Result<(), ImportError> {
        if view.component_type().is_float() {
            Ok(())
        } else {
            Err(self.unsupported(attribute, format!("component type {:?}", view.component_type())))
        }
    }

    fn texcoords(&self, set: u32, count: usize) -> Result<Option<Vec<Vec2>>, ImportError> {
        let attribute = if set == 0 { "TEXCOORD_0" } else { "TEXCOORD_1" };
        let Some(view) = self.view(&Semantic::TexCoords(set), attribute)? else {
            return Ok(None);
        };
        self.check(&view, attribute, count, 2)?;
        self.check_normalized(&view, attribute)?;
        self.read_all(&view, attribute, |v, i| v.normalized_floats::<2>(i).map(Vec2::from_array))
            .map(Some)
    }

    fn joints(&self, set: u32, count: usize) -> Result<Option<Vec<[u16; 4]>>, ImportError> {
        let attribute = if set == 0 { "JOINTS_0" } else { "JOINTS_1" };
        let Some(view) = self.view(&Semantic::Joints(set), attribute)? else {
            return Ok(None);
        };
        self.check(&view, attribute, count, 4)?;
        if !matches!(
            view.component_type(),
            ComponentType::UnsignedByte | ComponentType::UnsignedShort
        ) {
            return Err(self.unsupported(attribute, format!("component type {:?}", view.component_type())));
        }
        self.read_all(&view, attribute, |v, i| v.joints::<4>(i)).map(Some)
    }

    fn weights(&self, set: u32, count: usize) -> Result<Option<Vec<Vec4>>, ImportError> {
        let attribute = if set == 0 { "WEIGHTS_0" } else { "WEIGHTS_1" };
        let Some(view) = self.view(&Semantic::Weights(set), attribute)? else {
            return Ok(None);
        };
        self.check(&view, attribute, count, 4)?;
        self.check_normalized(&view, attribute)?;
        self.read_all(&view, attribute, |v, i| v.normalized_floats::<4>(i).map(Vec4::from_array))
            .map(Some)
    }

    fn streams(&self) -> Result<VertexStreams, ImportError> {
        let positions = self
            .view(&Semantic::Positions, "POSITION")?
            .ok_or_else(|| ImportError::MissingPosition(self.submesh.to_string()))?;
        let count = positions.count();
        // VEC4 positions keep their w, VEC3 positions get w = 1
        let components = if positions.components() == 4 { 4 } else { 3 };
        self.check(&positions, "POSITION", count, components)?;
        self.check_float(&positions, "POSITION")?;
        let positions = if components == 4 {
            self.read_all(&positions, "POSITION", |v, i| v.floats::<4>(i).map(Vec4::from_array))?
        } else {
            self.read_all(&positions, "POSITION", |v, i| {
                v.floats::<3>(i).map(|p| Vec3::from_array(p).extend(1.0))
            })?
        };

        let normals = match self.view(&Semantic::Normals, "NORMAL")? {
            Some(view) => {
                self.check(&view, "NORMAL", count, 3)?;
                self.check_float(&view, "NORMAL")?;
                Some(self.read_all(&view, "NORMAL", |v, i| v.floats::<3>(i).map(Vec3::from_array))?)
            }
            None => None,
        };

        let tangents = match self.view(&Semantic::Tangents, "TANGENT")? {
            Some(view) => {
                self.check(&view, "TANGENT", count, 4)?;
                self.check_float(&view, "TANGENT")?;
                Some(self.read_all(&view, "TANGENT", |v, i| v.floats::<4>(i).map(Vec4::from_array))?)
            }
            None => None,
        };

        let texcoords0 = self.texcoords(0, count)?;
        let texcoords1 = self.texcoords(1, count)?;
        if texcoords1.is_some() && texcoords0.is_none() {
            tracing::warn!("{}: TEXCOORD_1 without TEXCOORD_0 is ignored", self.submesh);
        }

        let joints0 = self.joints(0, count)?;
        let joints1 = self.joints(1, count)?;
        let weights0 = self.weights(0, count)?;
        let weights1 = self.weights(1, count)?;
        if joints0.is_some() != weights0.is_some() {
            tracing::warn!("{}: JOINTS_0 and WEIGHTS_0 must come together, skinning disabled", self.submesh);
        }

        let mut streams = VertexStreams {
            positions,
            normals,
            tangents: None,
            texcoords0,
            texcoords1,
            joints0,
            joints1,
            weights0,
            weights1,
        };
        // Store explicit tangents for now; the basis is completed once the
        // index buffer is known.
        if let (Some(normals), Some(tangents)) = (&streams.normals, &tangents) {
            streams.tangents = Some(tangent::from_explicit(normals, tangents));
        }
        Ok(streams)
    }

    fn indices(&self, vertex_count: usize) -> Result<Vec<i32>, ImportError> {
        let Some(accessor) = self.primitive.indices() else {
            return Ok((0..vertex_count as i32).collect());
        };
        let what = || format!("indices of {}", self.submesh);
        let view = AccessorView::new(&accessor, self.buffers)
            .ok_or_else(|| ImportError::accessor(what()))?;
        if view.components() != 1 {
            return Err(self.unsupported("indices", format!("{} components, expected 1", view.components())));
        }
        (0..view.count())
            .map(|i| {
                view.index(i)
                    .filter(|&index| index >= 0 && (index as usize) < vertex_count)
                    .ok_or_else(|| ImportError::accessor(format!("{} element {}", what(), i)))
            })
            .collect()
    }
}

/// Fill in tangents for streams that have normals and texcoords but no
/// explicit tangents. Without texcoords there is no tangent basis.
fn complete_tangents(streams: &mut VertexStreams, topology: PrimitiveTopology, indices: &[i32]) {
    if streams.tangents.is_some() {
        return;
    }
    let (Some(normals), Some(uvs)) = (&streams.normals, &streams.texcoords0) else {
        return;
    };
    let positions: Vec<Vec3> = streams.positions.iter().map(|p| p.truncate()).collect();
    let basis: Vec<TangentBasis> =
        tangent::generate(&positions, normals, uvs, &topology.triangles(indices));
    streams.tangents = Some(basis);
}

impl Importer<'_> {
    /// Import `mesh` and its primitives, or return the registered copy.
    pub(crate) fn import_mesh(&mut self, mesh: &gltf::Mesh<'_>) -> Result<Arc<Mesh>, ImportError> {
        let mesh_name = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh_{}", mesh.index()));
        if let Some(existing) = self.registry.mesh(&mesh_name) {
            tracing::debug!("Mesh cache hit: {}", mesh_name);
            return Ok(existing);
        }

        let mut result = Mesh::new(mesh_name.clone());
        for primitive in mesh.primitives() {
            let submesh_name = format!("{}_{}", mesh_name, primitive.index());
            let submesh = match self.registry.submesh(&submesh_name) {
                Some(existing) => existing,
                None => self.import_primitive(&primitive, submesh_name)?,
            };
            result.add_submesh(submesh);
        }

        tracing::debug!(
            "Built mesh {} ({} submeshes)",
            mesh_name,
            result.submeshes().len()
        );
        Ok(self.registry.insert_mesh(Arc::new(result)))
    }

    fn import_primitive(
        &mut self,
        primitive: &gltf::Primitive<'_>,
        name: String,
    ) -> Result<Arc<SubMesh>, ImportError> {
        let mode = primitive.mode();
        let topology = PrimitiveTopology::from_code(mode.as_gl_enum()).ok_or_else(|| {
            ImportError::UnsupportedTopology {
                submesh: name.clone(),
                mode: format!("{:?}", mode),
            }
        })?;

        let (mut streams, indices) = {
            let reader = PrimitiveReader {
                buffers: &self.buffers,
                primitive,
                submesh: &name,
            };
            let streams = reader.streams()?;
            let indices = reader.indices(streams.positions.len())?;
            (streams, indices)
        };
        complete_tangents(&mut streams, topology, &indices);

        let attributes = streams.attributes();
        let material = self.resolve_material(&primitive.material(), attributes)?;
        let binding = self
            .factory
            .prepare_bsdf_material(&material, streams.is_skinned())?;

        let (layout, vertices) = streams.interleave();
        let data = SubMeshData {
            name,
            layout,
            vertices,
            number_vertices: streams.positions.len() as u32,
            indices,
            topology,
            aabb: streams.aabb(),
        };
        let submesh = SubMesh::upload(
            self.device(),
            data,
            material,
            binding,
            self.config.free_host_memory,
        )?;
        tracing::debug!(
            "Uploaded submesh {} ({} vertices, {} indices, stride {})",
            submesh.name,
            submesh.number_vertices,
            submesh.number_indices,
            submesh.layout.stride()
        );
        Ok(self.registry.insert_submesh(Arc::new(submesh)))
    }
}
