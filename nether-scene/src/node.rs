//! Scene nodes.
//!
//! A node carries a local TRS transform, the post-animation "final" TRS, the
//! cached world matrix and one dirty flag per in-flight frame buffer. Its role
//! (plain, armature root or joint) is fixed at construction.

use std::sync::Arc;

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3, Vec4};
use smallvec::SmallVec;
use thiserror::Error;

use crate::animation::Animation;
use crate::bounds::Aabb;
use crate::channel::{Bracket, Channel, ChannelTarget, Interpolator};
use crate::device::{DeviceError, RenderFactory, UniformBuffer};
use crate::mesh::Mesh;

/// Number of addressable layers.
pub const MAX_LAYERS: u32 = 20;
/// Nodes start on layer 0 only.
pub const DEFAULT_LAYERS: u32 = 0x01;

/// Stable handle of a node inside a [`crate::graph::SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Role
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum NodeRole {
    /// Ordinary transform carrier.
    Plain,
    /// Owns the joint-matrix buffer for the joints beneath it.
    Armature { joint_count: usize },
    /// Writes one entry of the nearest armature ancestor's joint buffer.
    Joint {
        joint_index: usize,
        inverse_bind_matrix: Mat4,
    },
}

impl NodeRole {
    /// Map the `(joint_count, joint_index)` encoding to a role; `-1` means
    /// "no joint index". Returns `None` for combinations no role covers.
    pub fn classify(joint_count: usize, joint_index: i32, inverse_bind_matrix: Mat4) -> Option<Self> {
        match (joint_count, joint_index) {
            (0, -1) => Some(Self::Plain),
            (count, -1) if count > 0 => Some(Self::Armature { joint_count: count }),
            (0, index) if index >= 0 => Some(Self::Joint {
                joint_index: index as usize,
                inverse_bind_matrix,
            }),
            _ => None,
        }
    }

    pub fn joint_count(&self) -> usize {
        match self {
            Self::Armature { joint_count } => *joint_count,
            _ => 0,
        }
    }

    /// Joint index, `-1` for non-joints.
    pub fn joint_index(&self) -> i32 {
        match self {
            Self::Joint { joint_index, .. } => *joint_index as i32,
            _ => -1,
        }
    }

    pub fn is_plain(&self) -> bool {
        matches!(self, Self::Plain)
    }

    pub fn is_armature(&self) -> bool {
        matches!(self, Self::Armature { .. })
    }

    pub fn is_joint(&self) -> bool {
        matches!(self, Self::Joint { .. })
    }
}

// =============================================================================
// Camera
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        yfov: f32,
        aspect_ratio: Option<f32>,
        znear: f32,
        zfar: Option<f32>,
    },
    Orthographic {
        xmag: f32,
        ymag: f32,
        znear: f32,
        zfar: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub name: String,
    pub projection: Projection,
    pub view_matrix: Mat4,
}

impl Camera {
    pub fn new(name: impl Into<String>, projection: Projection) -> Self {
        Self {
            name: name.into(),
            projection,
            view_matrix: Mat4::IDENTITY,
        }
    }

    pub fn update_view_matrix(&mut self, world: &Mat4) {
        self.view_matrix = world.inverse();
    }
}

// =============================================================================
// Light
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional,
    Point,
    Spot {
        inner_cone_angle: f32,
        outer_cone_angle: f32,
    },
}

/// Punctual light attached to a node. Position and direction are in world
/// space and follow the node through transform updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub range: Option<f32>,
    pub position: Vec3,
    /// The node's local -Z axis.
    pub direction: Vec3,
}

impl Light {
    pub fn new(name: impl Into<String>, kind: LightKind) -> Self {
        Self {
            name: name.into(),
            kind,
            color: Vec3::ONE,
            intensity: 1.0,
            range: None,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
        }
    }

    pub fn update_world(&mut self, world: &Mat4) {
        self.position = world.w_axis.truncate();
        self.direction = world.transform_vector3(Vec3::NEG_Z).normalize_or_zero();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayerError {
    #[error("layer {0} out of range (0..20)")]
    OutOfRange(u32),
}

// =============================================================================
// Node
// =============================================================================

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    role: NodeRole,

    translate: Vec3,
    rotate: Quat,
    scale: Vec3,

    final_translate: Vec3,
    final_rotate: Quat,
    final_scale: Vec3,

    pub(crate) world_matrix: Mat4,
    pub(crate) dirty: SmallVec<[bool; 4]>,
    layers: u32,

    meshes: Vec<Arc<Mesh>>,
    pub(crate) cameras: Vec<Camera>,
    pub(crate) lights: Vec<Light>,
    animations: Vec<Animation>,
    current_animation: Option<usize>,

    pub(crate) transform_buffer: Option<UniformBuffer>,
    pub(crate) joints_buffer: Option<UniformBuffer>,
    /// Armature whose joint buffer skins this node's meshes.
    pub(crate) skin_armature: Option<NodeId>,

    pub(crate) aabb: Aabb,
}

impl Node {
    pub fn new(name: impl Into<String>, role: NodeRole, buffer_count: u32) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            role,
            translate: Vec3::ZERO,
            rotate: Quat::IDENTITY,
            scale: Vec3::ONE,
            final_translate: Vec3::ZERO,
            final_rotate: Quat::IDENTITY,
            final_scale: Vec3::ONE,
            world_matrix: Mat4::IDENTITY,
            dirty: SmallVec::from_elem(true, buffer_count.max(1) as usize),
            layers: DEFAULT_LAYERS,
            meshes: Vec::new(),
            cameras: Vec::new(),
            lights: Vec::new(),
            animations: Vec::new(),
            current_animation: None,
            transform_buffer: None,
            joints_buffer: None,
            skin_armature: None,
            aabb: Aabb::EMPTY,
        }
    }

    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    // =========================================================================
    // Transform
    // =========================================================================

    pub fn translate(&self) -> Vec3 {
        self.translate
    }

    pub fn rotate(&self) -> Quat {
        self.rotate
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_translate(&mut self, translate: Vec3) {
        self.translate = translate;
        self.set_dirty();
    }

    /// Rotations are stored normalized.
    pub fn set_rotate(&mut self, rotate: Quat) {
        self.rotate = rotate.normalize();
        self.set_dirty();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.set_dirty();
    }

    pub fn final_translate(&self) -> Vec3 {
        self.final_translate
    }

    pub fn final_rotate(&self) -> Quat {
        self.final_rotate
    }

    pub fn final_scale(&self) -> Vec3 {
        self.final_scale
    }

    /// `T * R * S` of the final transform.
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.final_scale, self.final_rotate, self.final_translate)
    }

    /// `T * R * S` of the static transform.
    pub fn static_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotate, self.translate)
    }

    pub fn world_matrix(&self) -> Mat4 {
        self.world_matrix
    }

    // =========================================================================
    // Dirty flags
    // =========================================================================

    /// Mark every frame-buffer slot dirty.
    pub fn set_dirty(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = true);
    }

    pub fn is_dirty(&self, slot: usize) -> bool {
        self.dirty.get(slot).copied().unwrap_or(true)
    }

    /// Grow the flag vector to cover `slot`; new slots start dirty.
    pub(crate) fn ensure_slot(&mut self, slot: usize) {
        if slot >= self.dirty.len() {
            self.dirty.resize(slot + 1, true);
        }
    }

    // =========================================================================
    // Layers
    // =========================================================================

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn is_on_layer(&self, layer: u32) -> bool {
        layer < MAX_LAYERS && self.layers & (1 << layer) != 0
    }

    /// True when the node shares any layer with `mask`.
    pub fn is_on_any_layer(&self, mask: u32) -> bool {
        self.layers & mask != 0
    }

    pub fn set_on_layer(&mut self, layer: u32) -> Result<(), LayerError> {
        if layer >= MAX_LAYERS {
            return Err(LayerError::OutOfRange(layer));
        }
        self.layers |= 1 << layer;
        Ok(())
    }

    pub fn remove_from_layer(&mut self, layer: u32) -> Result<(), LayerError> {
        if layer >= MAX_LAYERS {
            return Err(LayerError::OutOfRange(layer));
        }
        self.layers &= !(1 << layer);
        Ok(())
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    pub fn meshes(&self) -> &[Arc<Mesh>] {
        &self.meshes
    }

    /// Attach a mesh and grow the bounding box to cover it.
    pub fn add_mesh(&mut self, mesh: Arc<Mesh>) {
        self.aabb = self.aabb.union(&mesh.aabb());
        self.meshes.push(mesh);
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    pub fn add_camera(&mut self, camera: Camera) {
        self.cameras.push(camera);
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }

    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn transform_buffer(&self) -> Option<&UniformBuffer> {
        self.transform_buffer.as_ref()
    }

    pub fn set_transform_buffer(&mut self, buffer: UniformBuffer) {
        self.transform_buffer = Some(buffer);
        self.set_dirty();
    }

    pub fn joints_buffer(&self) -> Option<&UniformBuffer> {
        self.joints_buffer.as_ref()
    }

    pub fn set_joints_buffer(&mut self, buffer: UniformBuffer) {
        self.joints_buffer = Some(buffer);
        self.set_dirty();
    }

    pub fn skin_armature(&self) -> Option<NodeId> {
        self.skin_armature
    }

    pub fn set_skin_armature(&mut self, armature: Option<NodeId>) {
        self.skin_armature = armature;
    }

    // =========================================================================
    // Animation
    // =========================================================================

    pub fn animations(&self) -> &[Animation] {
        &self.animations
    }

    pub fn animations_mut(&mut self) -> &mut [Animation] {
        &mut self.animations
    }

    /// Add an animation; the first one added becomes current.
    pub fn add_animation(&mut self, animation: Animation) {
        self.animations.push(animation);
        if self.current_animation.is_none() && self.animations.len() == 1 {
            self.current_animation = Some(0);
        }
    }

    pub fn current_animation(&self) -> Option<usize> {
        self.current_animation
    }

    /// Select the current animation; out-of-range indices select none.
    pub fn set_current_animation(&mut self, index: Option<usize>) {
        self.current_animation = index.filter(|&i| i < self.animations.len());
        self.set_dirty();
    }

    /// Recompute the final TRS. Returns true when an animation ran.
    pub(crate) fn animate(&mut self, delta_time: f32) -> bool {
        self.final_translate = self.translate;
        self.final_rotate = self.rotate;
        self.final_scale = self.scale;

        let Some(animation) = self
            .current_animation
            .and_then(|index| self.animations.get_mut(index))
        else {
            return false;
        };
        let time = animation.update(delta_time);

        let mut rotation: [Option<&Channel>; 4] = [None; 4];
        let mut euler: Option<Vec3> = None;

        for channel in animation.channels() {
            let element = channel.element();
            match channel.target() {
                ChannelTarget::Rotate => rotation[element] = Some(channel.as_ref()),
                ChannelTarget::Translate => {
                    if let Some(value) = channel.evaluate(time) {
                        self.final_translate[element] = value;
                    }
                }
                ChannelTarget::Scale => {
                    if let Some(value) = channel.evaluate(time) {
                        self.final_scale[element] = value;
                    }
                }
                ChannelTarget::EulerRotate => {
                    if let Some(value) = channel.evaluate(time) {
                        let angles = euler.get_or_insert_with(|| {
                            let (z, y, x) = self.rotate.to_euler(EulerRot::ZYX);
                            Vec3::new(x, y, z)
                        });
                        angles[element] = value;
                    }
                }
            }
        }

        if rotation.iter().any(Option::is_some) {
            self.final_rotate = resolve_rotation(&rotation, time, self.rotate);
        }
        if let Some(angles) = euler {
            self.final_rotate = Quat::from_euler(EulerRot::ZYX, angles.z, angles.y, angles.x);
        }
        true
    }

    // =========================================================================
    // Cloning
    // =========================================================================

    /// Copy for instancing: fresh uniform buffers with the same layout,
    /// shared meshes, cloned animations, all slots dirty. Links are left for
    /// the caller to remap.
    pub fn duplicate(&self, factory: &dyn RenderFactory) -> Result<Node, DeviceError> {
        let transform_buffer = match &self.transform_buffer {
            Some(_) => Some(factory.prepare_transform_uniform_buffer(&format!("{}_transform", self.name))?),
            None => None,
        };
        let joints_buffer = match &self.joints_buffer {
            Some(_) => Some(factory.prepare_joints_uniform_buffer(
                &format!("{}_joints", self.name),
                self.role.joint_count(),
            )?),
            None => None,
        };

        Ok(Node {
            name: self.name.clone(),
            parent: self.parent,
            children: self.children.clone(),
            role: self.role.clone(),
            translate: self.translate,
            rotate: self.rotate,
            scale: self.scale,
            final_translate: self.final_translate,
            final_rotate: self.final_rotate,
            final_scale: self.final_scale,
            world_matrix: self.world_matrix,
            dirty: SmallVec::from_elem(true, self.dirty.len()),
            layers: self.layers,
            meshes: self.meshes.clone(),
            cameras: self.cameras.clone(),
            lights: self.lights.clone(),
            animations: self.animations.iter().map(Animation::clone_named).collect(),
            current_animation: self.current_animation,
            transform_buffer,
            joints_buffer,
            skin_armature: self.skin_armature,
            aabb: self.aabb,
        })
    }
}

/// Resolve the quaternion channels together so all four components share
/// one interpolation parameter.
fn resolve_rotation(channels: &[Option<&Channel>; 4], time: f32, fallback: Quat) -> Quat {
    let Some(lead) = channels.iter().flatten().find(|c| !c.is_empty()) else {
        return fallback;
    };
    let fallback4 = Vec4::from(fallback.to_array());

    let key = |select: &dyn Fn(&Channel) -> Option<f32>| -> Vec4 {
        let mut value = fallback4;
        for (element, channel) in channels.iter().enumerate() {
            if let Some(v) = (*channel).and_then(select) {
                value[element] = v;
            }
        }
        value
    };

    match lead.bracket(time) {
        Bracket::Empty => fallback,
        Bracket::Before => to_quat(key(&|c| c.keys().first().map(|k| k.value)), fallback),
        Bracket::After => to_quat(key(&|c| c.keys().last().map(|k| k.value)), fallback),
        Bracket::Between { index, t } => match lead.interpolator() {
            Interpolator::Constant => {
                to_quat(key(&|c| c.keys().get(index).map(|k| k.value)), fallback)
            }
            Interpolator::Linear => {
                let a = to_quat(key(&|c| c.keys().get(index).map(|k| k.value)), fallback);
                let b = to_quat(key(&|c| c.keys().get(index + 1).map(|k| k.value)), fallback);
                a.slerp(b, t)
            }
            Interpolator::CatmullRom | Interpolator::CubicSpline => to_quat(
                key(&|c| (index + 1 < c.keys().len()).then(|| c.interpolate(index, t))),
                fallback,
            ),
        },
    }
}

fn to_quat(value: Vec4, fallback: Quat) -> Quat {
    if value.length_squared() > 0.0 {
        Quat::from_vec4(value).normalize()
    } else {
        fallback
    }
}

/// Normal matrix of `m`: inverse-transpose of its upper 3x3.
pub(crate) fn normal_matrix(m: &Mat4) -> Mat3 {
    Mat3::from_mat4(*m).inverse().transpose()
}

/// A `mat3` laid out as three std140 vec4 columns.
pub(crate) fn mat3_std140(m: &Mat3) -> [f32; 12] {
    let c = m.to_cols_array();
    [
        c[0], c[1], c[2], 0.0, c[3], c[4], c[5], 0.0, c[6], c[7], c[8], 0.0,
    ]
}
