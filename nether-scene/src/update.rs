//! Per-frame transform propagation.
//!
//! One traversal per frame-buffer slot. Dirty state flows down the tree, the
//! nearest armature travels with it, and uniform uploads only happen for
//! nodes that are dirty in the requested slot.

use glam::Mat4;

use crate::device::{
    DeviceError, JOINT_MATRICES_OFFSET, JOINT_NORMAL_MATRICES_OFFSET, MAT3_SIZE, MAT4_SIZE,
    MAX_JOINTS, UniformBuffer,
};
use crate::graph::SceneGraph;
use crate::node::{Node, NodeId, NodeRole, mat3_std140, normal_matrix};

/// State threaded from a node to its children.
#[derive(Debug, Clone, Copy)]
pub struct UpdateContext {
    pub delta_time: f32,
    pub slot: usize,
    pub parent_matrix: Mat4,
    pub parent_dirty: bool,
    /// Nearest armature at or above the parent.
    pub armature: Option<NodeId>,
}

/// Hook run before a node is updated. Returning false skips the node and
/// its whole subtree for this traversal.
pub trait UpdateInterceptor {
    fn visit(&self, id: NodeId, node: &mut Node, context: &UpdateContext) -> bool;
}

impl<F> UpdateInterceptor for F
where
    F: Fn(NodeId, &mut Node, &UpdateContext) -> bool,
{
    fn visit(&self, id: NodeId, node: &mut Node, context: &UpdateContext) -> bool {
        self(id, node, context)
    }
}

/// Upload `matrix` and its normal matrix.
fn upload_matrix_pair(
    buffer: &UniformBuffer,
    slot: usize,
    matrix_offset: u64,
    normal_offset: u64,
    matrix: &Mat4,
) -> Result<(), DeviceError> {
    buffer.upload(slot, matrix_offset, bytemuck::bytes_of(matrix))?;
    let normal = mat3_std140(&normal_matrix(matrix));
    buffer.upload(slot, normal_offset, bytemuck::cast_slice(&normal))
}

impl SceneGraph {
    /// Propagate transforms below `root` for frame-buffer `slot`.
    pub fn update_transforms(
        &mut self,
        root: NodeId,
        delta_time: f32,
        slot: usize,
        parent_matrix: Mat4,
        parent_dirty: bool,
        interceptors: &[&dyn UpdateInterceptor],
    ) {
        let armature = self
            .get(root)
            .and_then(|n| n.parent)
            .and_then(|p| self.armature_of(p));
        let mut stack = vec![(
            root,
            UpdateContext {
                delta_time,
                slot,
                parent_matrix,
                parent_dirty,
                armature,
            },
        )];

        while let Some((id, context)) = stack.pop() {
            let Some(node) = self.get_mut(id) else {
                continue;
            };
            if interceptors.iter().any(|i| !i.visit(id, node, &context)) {
                continue;
            }

            node.ensure_slot(slot);
            let animated = node.animate(context.delta_time);
            if context.parent_dirty || animated {
                node.dirty[slot] = true;
            }
            let dirty = node.dirty[slot];
            let armature = if node.role().is_armature() {
                Some(id)
            } else {
                context.armature
            };

            let mut joint = None;
            if dirty {
                let world = context.parent_matrix * node.local_matrix();
                node.world_matrix = world;
                for camera in &mut node.cameras {
                    camera.update_view_matrix(&world);
                }
                for light in &mut node.lights {
                    light.update_world(&world);
                }

                match node.role() {
                    NodeRole::Armature { .. } => match &node.joints_buffer {
                        Some(buffer) => {
                            if let Err(e) =
                                upload_matrix_pair(buffer, slot, 0, MAT4_SIZE, &world.inverse())
                            {
                                tracing::error!("{}: armature upload failed: {}", node.name, e);
                            }
                        }
                        None => tracing::error!("{}: armature has no joints buffer", node.name),
                    },
                    NodeRole::Joint {
                        joint_index,
                        inverse_bind_matrix,
                    } => joint = Some((*joint_index, world * *inverse_bind_matrix)),
                    NodeRole::Plain => {}
                }

                if !node.meshes().is_empty() {
                    match &node.transform_buffer {
                        Some(buffer) => {
                            if let Err(e) = upload_matrix_pair(buffer, slot, 0, MAT4_SIZE, &world)
                            {
                                tracing::error!("{}: transform upload failed: {}", node.name, e);
                            }
                        }
                        None => tracing::error!("{}: mesh node has no transform buffer", node.name),
                    }
                }
            }

            let world = node.world_matrix;
            let children = node.children.clone();
            node.dirty[slot] = false;

            if let Some((joint_index, matrix)) = joint {
                self.upload_joint(id, context.armature, joint_index, slot, &matrix);
            }

            for &child in children.iter().rev() {
                stack.push((
                    child,
                    UpdateContext {
                        parent_matrix: world,
                        parent_dirty: dirty,
                        armature,
                        ..context
                    },
                ));
            }
        }
    }

    /// Write one joint's skinning matrix into its armature's joint buffer.
    /// Failures skip this joint only.
    fn upload_joint(
        &self,
        id: NodeId,
        armature: Option<NodeId>,
        joint_index: usize,
        slot: usize,
        matrix: &Mat4,
    ) {
        let name = self.get(id).map(|n| n.name.as_str()).unwrap_or("?");
        if joint_index >= MAX_JOINTS {
            tracing::error!(
                "{}: joint index {} exceeds maximum {}",
                name,
                joint_index,
                MAX_JOINTS
            );
            return;
        }
        let Some(armature) = armature.and_then(|a| self.get(a)) else {
            tracing::error!("{}: joint has no armature ancestor", name);
            return;
        };
        let Some(buffer) = &armature.joints_buffer else {
            tracing::error!("{}: armature {} has no joints buffer", name, armature.name);
            return;
        };

        let index = joint_index as u64;
        if let Err(e) = upload_matrix_pair(
            buffer,
            slot,
            JOINT_MATRICES_OFFSET + index * MAT4_SIZE,
            JOINT_NORMAL_MATRICES_OFFSET + index * MAT3_SIZE,
            matrix,
        ) {
            tracing::error!("{}: joint upload failed: {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceBuffer, HostDevice, HostRenderFactory, RenderFactory};
    use crate::mesh::Mesh;
    use glam::{Quat, Vec3};
    use std::cell::RefCell;
    use std::sync::Arc;

    const EPS: f32 = 1e-5;

    fn factory() -> HostRenderFactory {
        HostRenderFactory::new(HostDevice::new(), 2)
    }

    fn read_mat4(buffer: &UniformBuffer, slot: usize, offset: u64) -> Mat4 {
        let bytes = buffer
            .buffer()
            .read(buffer.dynamic_offset(slot) + offset, MAT4_SIZE)
            .unwrap();
        bytemuck::pod_read_unaligned(&bytes)
    }

    fn mesh_node(graph: &mut SceneGraph, factory: &HostRenderFactory, name: &str) -> NodeId {
        let mut node = Node::new(name, NodeRole::Plain, 2);
        node.add_mesh(Arc::new(Mesh::new(format!("{name}_mesh"))));
        node.set_transform_buffer(
            factory
                .prepare_transform_uniform_buffer(&format!("{name}_transform"))
                .unwrap(),
        );
        graph.insert(node)
    }

    #[test]
    fn test_world_matrix_composes_parent() {
        let factory = factory();
        let mut graph = SceneGraph::new();
        let parent = graph.insert(Node::new("parent", NodeRole::Plain, 2));
        let child = mesh_node(&mut graph, &factory, "child");
        graph.add_child(parent, child);
        graph.get_mut(parent).unwrap().set_translate(Vec3::new(1.0, 0.0, 0.0));
        graph.get_mut(child).unwrap().set_translate(Vec3::new(0.0, 2.0, 0.0));

        graph.update_transforms(parent, 0.0, 0, Mat4::IDENTITY, false, &[]);

        let world = graph.get(child).unwrap().world_matrix();
        assert_eq!(world.w_axis.truncate(), Vec3::new(1.0, 2.0, 0.0));
        let uploaded = read_mat4(graph.get(child).unwrap().transform_buffer().unwrap(), 0, 0);
        assert_eq!(uploaded, world);
    }

    #[test]
    fn test_dirty_flag_cleared_per_slot() {
        let factory = factory();
        let mut graph = SceneGraph::new();
        let node = mesh_node(&mut graph, &factory, "n");

        graph.update_transforms(node, 0.0, 0, Mat4::IDENTITY, false, &[]);
        assert!(!graph.get(node).unwrap().is_dirty(0));
        assert!(graph.get(node).unwrap().is_dirty(1));

        graph.get_mut(node).unwrap().set_translate(Vec3::ONE);
        assert!(graph.get(node).unwrap().is_dirty(0));
    }

    #[test]
    fn test_clean_node_skips_upload() {
        let factory = factory();
        let mut graph = SceneGraph::new();
        let node = mesh_node(&mut graph, &factory, "n");
        graph.update_transforms(node, 0.0, 0, Mat4::IDENTITY, false, &[]);

        // Scribble over the slot; a clean update must leave it alone.
        let buffer = graph.get(node).unwrap().transform_buffer().unwrap().clone();
        buffer.upload(0, 0, &[0u8; 64]).unwrap();
        graph.update_transforms(node, 0.0, 0, Mat4::IDENTITY, false, &[]);
        assert_eq!(read_mat4(&buffer, 0, 0), Mat4::ZERO);

        // A dirty parent forces the write.
        graph.update_transforms(node, 0.0, 0, Mat4::IDENTITY, true, &[]);
        assert_eq!(read_mat4(&buffer, 0, 0), Mat4::IDENTITY);
    }

    #[test]
    fn test_slot_grows_on_demand() {
        let mut graph = SceneGraph::new();
        let node = graph.insert(Node::new("n", NodeRole::Plain, 1));
        graph.update_transforms(node, 0.0, 3, Mat4::IDENTITY, false, &[]);
        let node = graph.get(node).unwrap();
        assert!(!node.is_dirty(3));
        assert!(node.is_dirty(2));
    }

    #[test]
    fn test_joint_writes_into_armature_buffer() {
        let factory = factory();
        let mut graph = SceneGraph::new();

        let mut armature = Node::new("armature", NodeRole::Armature { joint_count: 2 }, 2);
        armature.set_joints_buffer(factory.prepare_joints_uniform_buffer("joints", 2).unwrap());
        armature.set_translate(Vec3::new(0.0, 0.0, 3.0));
        let armature = graph.insert(armature);

        let bind = Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0));
        let mut bone = Node::new(
            "bone",
            NodeRole::Joint {
                joint_index: 1,
                inverse_bind_matrix: bind,
            },
            2,
        );
        bone.set_translate(Vec3::new(0.0, 1.0, 0.0));
        // Intermediate plain node: the joint still resolves the armature
        let holder = graph.insert(Node::new("holder", NodeRole::Plain, 2));
        let bone = graph.insert(bone);
        graph.add_child(armature, holder);
        graph.add_child(holder, bone);

        graph.update_transforms(armature, 0.0, 1, Mat4::IDENTITY, false, &[]);

        let buffer = graph.get(armature).unwrap().joints_buffer().unwrap().clone();
        let header = read_mat4(&buffer, 1, 0);
        assert!(header.abs_diff_eq(Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)), EPS));

        let joint = read_mat4(&buffer, 1, JOINT_MATRICES_OFFSET + MAT4_SIZE);
        let expected = graph.get(bone).unwrap().world_matrix() * bind;
        assert!(joint.abs_diff_eq(expected, EPS));
        // Slot 0 untouched
        assert_eq!(read_mat4(&buffer, 0, JOINT_MATRICES_OFFSET + MAT4_SIZE), Mat4::ZERO);
    }

    #[test]
    fn test_orphan_joint_does_not_stop_traversal() {
        let factory = factory();
        let mut graph = SceneGraph::new();
        let orphan = graph.insert(Node::new(
            "orphan",
            NodeRole::Joint {
                joint_index: 0,
                inverse_bind_matrix: Mat4::IDENTITY,
            },
            2,
        ));
        let child = mesh_node(&mut graph, &factory, "child");
        graph.add_child(orphan, child);
        graph.get_mut(orphan).unwrap().set_translate(Vec3::X);

        graph.update_transforms(orphan, 0.0, 0, Mat4::IDENTITY, false, &[]);
        let uploaded = read_mat4(graph.get(child).unwrap().transform_buffer().unwrap(), 0, 0);
        assert_eq!(uploaded, Mat4::from_translation(Vec3::X));
    }

    #[test]
    fn test_joint_index_out_of_range_is_skipped() {
        let factory = factory();
        let mut graph = SceneGraph::new();
        let mut armature = Node::new("armature", NodeRole::Armature { joint_count: 1 }, 2);
        armature.set_joints_buffer(factory.prepare_joints_uniform_buffer("joints", 1).unwrap());
        let armature = graph.insert(armature);
        let bone = graph.insert(Node::new(
            "bone",
            NodeRole::Joint {
                joint_index: MAX_JOINTS,
                inverse_bind_matrix: Mat4::IDENTITY,
            },
            2,
        ));
        graph.add_child(armature, bone);

        graph.update_transforms(armature, 0.0, 0, Mat4::IDENTITY, false, &[]);
        assert!(!graph.get(bone).unwrap().is_dirty(0));
    }

    #[test]
    fn test_interceptor_veto_skips_subtree() {
        let mut graph = SceneGraph::new();
        let root = graph.insert(Node::new("root", NodeRole::Plain, 1));
        let culled = graph.insert(Node::new("culled", NodeRole::Plain, 1));
        let below = graph.insert(Node::new("below", NodeRole::Plain, 1));
        let kept = graph.insert(Node::new("kept", NodeRole::Plain, 1));
        graph.add_child(root, culled);
        graph.add_child(culled, below);
        graph.add_child(root, kept);
        graph.get_mut(root).unwrap().set_translate(Vec3::Y);

        let visited = RefCell::new(Vec::new());
        let log = |_: NodeId, node: &mut Node, _: &UpdateContext| {
            visited.borrow_mut().push(node.name.clone());
            true
        };
        let cull = |_: NodeId, node: &mut Node, _: &UpdateContext| node.name != "culled";
        graph.update_transforms(root, 0.0, 0, Mat4::IDENTITY, false, &[&log, &cull]);

        assert_eq!(*visited.borrow(), vec!["root", "culled", "kept"]);
        assert_eq!(graph.get(below).unwrap().world_matrix(), Mat4::IDENTITY);
        assert!(graph.get(culled).unwrap().is_dirty(0));
        assert_eq!(
            graph.get(kept).unwrap().world_matrix(),
            Mat4::from_translation(Vec3::Y)
        );
    }

    #[test]
    fn test_camera_view_follows_world() {
        use crate::node::{Camera, Projection};

        let mut graph = SceneGraph::new();
        let mut node = Node::new("eye", NodeRole::Plain, 1);
        node.add_camera(Camera::new(
            "cam",
            Projection::Perspective {
                yfov: 1.0,
                aspect_ratio: None,
                znear: 0.1,
                zfar: None,
            },
        ));
        node.set_rotate(Quat::from_rotation_y(0.3));
        node.set_translate(Vec3::new(0.0, 1.0, 5.0));
        let id = graph.insert(node);

        graph.update_transforms(id, 0.0, 0, Mat4::IDENTITY, false, &[]);
        let node = graph.get(id).unwrap();
        let product = node.cameras()[0].view_matrix * node.world_matrix();
        assert!(product.abs_diff_eq(Mat4::IDENTITY, EPS));
    }

    #[test]
    fn test_light_follows_parent_transform() {
        use crate::node::{Light, LightKind};

        let mut graph = SceneGraph::new();
        let mut parent = Node::new("rig", NodeRole::Plain, 1);
        parent.set_translate(Vec3::X);
        let parent = graph.insert(parent);

        let mut lamp = Node::new("lamp", NodeRole::Plain, 1);
        lamp.add_light(Light::new("key", LightKind::Point));
        lamp.set_translate(Vec3::new(0.0, 4.0, 0.0));
        // Point the local -Z axis straight down
        lamp.set_rotate(Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2));
        let lamp = graph.insert(lamp);
        graph.add_child(parent, lamp);

        graph.update_transforms(parent, 0.0, 0, Mat4::IDENTITY, false, &[]);
        let light = &graph.get(lamp).unwrap().lights()[0];
        assert!(light.position.abs_diff_eq(Vec3::new(1.0, 4.0, 0.0), EPS));
        assert!(light.direction.abs_diff_eq(Vec3::NEG_Y, EPS));

        // Moving the parent moves the light on the next update
        graph.get_mut(parent).unwrap().set_translate(Vec3::ZERO);
        graph.update_transforms(parent, 0.0, 0, Mat4::IDENTITY, false, &[]);
        let light = &graph.get(lamp).unwrap().lights()[0];
        assert!(light.position.abs_diff_eq(Vec3::new(0.0, 4.0, 0.0), EPS));
    }

    #[test]
    fn test_animation_marks_dirty_each_tick() {
        use crate::animation::Animation;
        use crate::channel::{Channel, ChannelTarget, Interpolator};

        let factory = factory();
        let mut graph = SceneGraph::new();
        let id = mesh_node(&mut graph, &factory, "anim");
        let channel = Channel::from_samples(
            "x",
            ChannelTarget::Translate,
            0,
            Interpolator::Linear,
            &[0.0, 4.0],
            &[0.0, 4.0],
        )
        .unwrap();
        graph
            .get_mut(id)
            .unwrap()
            .add_animation(Animation::with_channels("move", vec![Arc::new(channel)]));

        graph.update_transforms(id, 1.0, 0, Mat4::IDENTITY, false, &[]);
        graph.update_transforms(id, 1.0, 0, Mat4::IDENTITY, false, &[]);
        let node = graph.get(id).unwrap();
        assert_eq!(node.world_matrix().w_axis.x, 2.0);
        let uploaded = read_mat4(node.transform_buffer().unwrap(), 0, 0);
        assert_eq!(uploaded.w_axis.x, 2.0);
    }
}
