//! glTF 2.0 importer.
//!
//! Turns a `.gltf` or `.glb` asset into a [`Scene`]: one [`Object`] per root
//! node of the selected glTF scene, with meshes, materials, textures,
//! animation channels and shader modules registered in an
//! [`AssetRegistry`].
//!
//! Imports are all-or-nothing. Every registry insertion made by a failed
//! import is rolled back, and the partially built scene (with its device
//! buffers) is dropped before the error is returned.
//!
//! [`Object`]: crate::scene::Object

mod animation;
mod material;
mod primitive;
mod skin;

use std::path::Path;

use glam::{Quat, Vec3};
use hashbrown::HashMap;

use crate::accessor::BufferSet;
use crate::config::ImportConfig;
use crate::device::{RenderDevice, RenderFactory};
use crate::error::ImportError;
use crate::glb::{Glb, is_glb};
use crate::node::{Camera, Light, LightKind, Node, NodeId, NodeRole, Projection};
use crate::registry::AssetRegistry;
use crate::scene::Scene;

use skin::SkinTable;

/// State shared by the import stages of one asset.
pub(crate) struct Importer<'a> {
    pub(crate) buffers: BufferSet,
    pub(crate) base_dir: Option<&'a Path>,
    pub(crate) registry: &'a mut AssetRegistry,
    pub(crate) factory: &'a dyn RenderFactory,
    pub(crate) config: &'a ImportConfig,
}

/// Load a `.gltf` or `.glb` file.
///
/// External buffers and images are resolved relative to the file's
/// directory, which is also the first root searched for shaders.
pub fn load(
    path: &Path,
    registry: &mut AssetRegistry,
    factory: &dyn RenderFactory,
    config: &ImportConfig,
) -> Result<Scene, ImportError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if !matches!(extension.as_deref(), Some("gltf" | "glb")) {
        let error = ImportError::UnsupportedExtension(path.to_path_buf());
        tracing::error!("{}", error);
        return Err(error);
    }

    let bytes = std::fs::read(path).map_err(|source| {
        let error = ImportError::Io {
            path: path.to_path_buf(),
            source,
        };
        tracing::error!("{}", error);
        error
    })?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("scene");
    load_slice(&bytes, name, path.parent(), registry, factory, config)
}

/// Load an asset held in memory. `base_dir` resolves external URIs; without
/// it only GLB-embedded data can be used.
pub fn load_slice(
    bytes: &[u8],
    name: &str,
    base_dir: Option<&Path>,
    registry: &mut AssetRegistry,
    factory: &dyn RenderFactory,
    config: &ImportConfig,
) -> Result<Scene, ImportError> {
    let checkpoint = registry.checkpoint();

    match import(bytes, name, base_dir, registry, factory, config) {
        Ok(scene) => {
            if config.free_host_memory {
                registry.free_host_memory_since(checkpoint);
            }
            let stats = registry.stats();
            tracing::info!(
                "Imported {}: {} objects, {} nodes, {} meshes, {} materials, {} animations",
                name,
                scene.objects().len(),
                scene.graph.len(),
                stats.meshes,
                stats.materials,
                stats.animations
            );
            Ok(scene)
        }
        Err(e) => {
            tracing::error!("Failed to import {}: {}", name, e);
            registry.rollback(checkpoint);
            Err(e)
        }
    }
}

fn import(
    bytes: &[u8],
    name: &str,
    base_dir: Option<&Path>,
    registry: &mut AssetRegistry,
    factory: &dyn RenderFactory,
    config: &ImportConfig,
) -> Result<Scene, ImportError> {
    let (json, bin) = if is_glb(bytes) {
        let glb = Glb::from_slice(bytes)?;
        (glb.json, glb.bin)
    } else {
        (bytes, None)
    };

    let gltf = gltf::Gltf::from_slice_without_validation(json)?;
    validate(&gltf.document)?;
    let document = &gltf.document;
    let buffers = BufferSet::load(document, bin, base_dir)?;

    let gltf_scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or(ImportError::NoScene)?;

    let skins = SkinTable::build(document, &buffers)?;

    let mut importer = Importer {
        buffers,
        base_dir,
        registry,
        factory,
        config,
    };

    let scene_name = gltf_scene.name().unwrap_or(name).to_string();
    let mut scene = Scene::new(scene_name, factory.buffer_count());
    let mut node_map: HashMap<usize, NodeId> = HashMap::new();

    for root in gltf_scene.nodes() {
        let root_id = importer.build_subtree(&mut scene, root, &skins, &mut node_map)?;
        let object_name = scene
            .graph
            .get(root_id)
            .map(|n| n.name.clone())
            .unwrap_or_default();
        scene.add_object(object_name, root_id);
    }

    importer.link_skins(&mut scene, document, &skins, &node_map);
    importer.import_animations(&mut scene, document, &node_map)?;

    let ids: Vec<NodeId> = scene.graph.ids().collect();
    for id in ids {
        scene.graph.sort_children(id);
    }
    let roots: Vec<NodeId> = scene.objects().iter().map(|o| o.root()).collect();
    for root in roots {
        scene.graph.refresh_bounds(root);
    }

    Ok(scene)
}

/// Run the glTF validation rules, accepting four-component positions.
///
/// glTF requires `POSITION` min/max bounds to hold three values, which
/// rejects VEC4 position accessors; their bounds are left unchecked.
fn validate(document: &gltf::Document) -> Result<(), ImportError> {
    use gltf::json::validation::{Error, Validate};

    let root = document.as_json();
    let vec4_bounds = vec4_position_bounds(root);
    let mut errors = Vec::new();
    root.validate(root, gltf::json::Path::new, &mut |path, error| {
        let path = path();
        if matches!(error, Error::Invalid) && vec4_bounds.contains(&path.0) {
            return;
        }
        errors.push((path, error));
    });

    if errors.is_empty() {
        Ok(())
    } else {
        Err(gltf::Error::Validation(errors).into())
    }
}

/// JSON paths of the min/max bounds of every VEC4 `POSITION` accessor.
fn vec4_position_bounds(root: &gltf::json::Root) -> Vec<String> {
    use gltf::json::accessor::Type;
    use gltf::json::mesh::Semantic;
    use gltf::json::validation::Checked;

    let mut paths = Vec::new();
    for (m, mesh) in root.meshes.iter().enumerate() {
        for (p, primitive) in mesh.primitives.iter().enumerate() {
            let Some(index) = primitive.attributes.get(&Checked::Valid(Semantic::Positions)) else {
                continue;
            };
            let Some(accessor) = root.accessors.get(index.value()) else {
                continue;
            };
            if accessor.type_ != Checked::Valid(Type::Vec4) {
                continue;
            }
            let position = gltf::json::Path::new()
                .field("meshes")
                .index(m)
                .field("primitives")
                .index(p)
                .field("attributes")
                .key("POSITION");
            paths.push(position.field("min").0);
            paths.push(position.field("max").0);
        }
    }
    paths
}

impl Importer<'_> {
    /// Create the nodes below `root` in pre-order and link them.
    fn build_subtree(
        &mut self,
        scene: &mut Scene,
        root: gltf::Node<'_>,
        skins: &SkinTable,
        node_map: &mut HashMap<usize, NodeId>,
    ) -> Result<NodeId, ImportError> {
        let root_id = self.build_node(scene, &root, skins)?;
        node_map.insert(root.index(), root_id);

        let mut stack: Vec<(gltf::Node<'_>, NodeId)> = vec![(root, root_id)];
        while let Some((gltf_node, id)) = stack.pop() {
            for child in gltf_node.children() {
                if node_map.contains_key(&child.index()) {
                    tracing::warn!("Node {} has more than one parent, ignoring link", child.index());
                    continue;
                }
                let child_id = self.build_node(scene, &child, skins)?;
                node_map.insert(child.index(), child_id);
                scene.graph.add_child(id, child_id);
                stack.push((child, child_id));
            }
        }
        Ok(root_id)
    }

    fn build_node(
        &mut self,
        scene: &mut Scene,
        gltf_node: &gltf::Node<'_>,
        skins: &SkinTable,
    ) -> Result<NodeId, ImportError> {
        let name = gltf_node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node_{}", gltf_node.index()));
        let role = skins.role(gltf_node.index());
        let mut node = Node::new(name, role.clone(), self.factory.buffer_count());

        let (translation, rotation, scale) = gltf_node.transform().decomposed();
        node.set_translate(Vec3::from_array(translation));
        node.set_rotate(Quat::from_array(rotation));
        node.set_scale(Vec3::from_array(scale));

        if let Some(mesh) = gltf_node.mesh() {
            let mesh = self.import_mesh(&mesh)?;
            node.add_mesh(mesh);
            let buffer = self
                .factory
                .prepare_transform_uniform_buffer(&format!("{}_transform", node.name))?;
            node.set_transform_buffer(buffer);
        }

        if let NodeRole::Armature { joint_count } = role {
            let buffer = self
                .factory
                .prepare_joints_uniform_buffer(&format!("{}_joints", node.name), joint_count)?;
            node.set_joints_buffer(buffer);
        }

        if let Some(camera) = gltf_node.camera() {
            node.add_camera(import_camera(&camera));
        }

        if let Some(light) = gltf_node.light() {
            node.add_light(import_light(&light));
        }

        Ok(scene.graph.insert(node))
    }

    /// Point every skinned mesh node at the armature of its skin.
    fn link_skins(
        &self,
        scene: &mut Scene,
        document: &gltf::Document,
        skins: &SkinTable,
        node_map: &HashMap<usize, NodeId>,
    ) {
        for gltf_node in document.nodes() {
            let (Some(skin), Some(&id)) = (gltf_node.skin(), node_map.get(&gltf_node.index())) else {
                continue;
            };
            let armature = skins
                .armature(skin.index())
                .and_then(|a| node_map.get(&a))
                .copied();
            if armature.is_none() {
                tracing::warn!(
                    "Skin {} of node {} has no armature in the imported scene",
                    skin.index(),
                    gltf_node.index()
                );
            }
            if let Some(node) = scene.graph.get_mut(id) {
                node.set_skin_armature(armature);
            }
        }
    }

    pub(crate) fn device(&self) -> &dyn RenderDevice {
        self.factory.device()
    }
}

fn import_camera(camera: &gltf::Camera<'_>) -> Camera {
    let name = camera
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("camera_{}", camera.index()));
    let projection = match camera.projection() {
        gltf::camera::Projection::Perspective(p) => Projection::Perspective {
            yfov: p.yfov(),
            aspect_ratio: p.aspect_ratio(),
            znear: p.znear(),
            zfar: p.zfar(),
        },
        gltf::camera::Projection::Orthographic(o) => Projection::Orthographic {
            xmag: o.xmag(),
            ymag: o.ymag(),
            znear: o.znear(),
            zfar: o.zfar(),
        },
    };
    Camera::new(name, projection)
}

fn import_light(light: &gltf::khr_lights_punctual::Light<'_>) -> Light {
    use gltf::khr_lights_punctual::Kind;

    let name = light
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("light_{}", light.index()));
    let kind = match light.kind() {
        Kind::Directional => LightKind::Directional,
        Kind::Point => LightKind::Point,
        Kind::Spot {
            inner_cone_angle,
            outer_cone_angle,
        } => LightKind::Spot {
            inner_cone_angle,
            outer_cone_angle,
        },
    };
    let mut result = Light::new(name, kind);
    result.color = Vec3::from_array(light.color());
    result.intensity = light.intensity();
    result.range = light.range();
    result
}
